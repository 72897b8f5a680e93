use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::task::JoinSet;

/// Supervise a set of fire-and-forget tasks.
///
/// Each pull loop owns one supervisor for its in-flight jobs, heartbeats,
/// naks, and middleware hooks. Finished entries are reaped on every `start`
/// so the set stays proportional to the number of active tasks. Dropping
/// the supervisor aborts everything it still tracks.
pub(crate) struct Tasks {
    name: String,
    set: Mutex<JoinSet<()>>,
    done: AtomicBool,
}

impl Tasks {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            set: Mutex::new(JoinSet::new()),
            done: AtomicBool::new(false),
        }
    }

    /// Spawn a task and track it.
    ///
    /// Must not be called after [`Tasks::wait`] has returned.
    pub(crate) fn start<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        assert!(
            !self.done.load(Ordering::Acquire),
            "task started on a drained supervisor"
        );
        let mut set = self.set.lock().expect("tasks mutex poisoned");
        while let Some(result) = set.try_join_next() {
            if let Err(err) = result {
                if err.is_panic() {
                    tracing::error!(supervisor = %self.name, "supervised task panicked");
                }
            }
        }
        set.spawn(future);
    }

    /// Abort all supervised tasks. Safe to call more than once.
    pub(crate) fn cancel(&self) {
        self.set.lock().expect("tasks mutex poisoned").abort_all();
    }

    /// Wait for every supervised task to finish.
    ///
    /// Tasks are allowed to start further tasks while the drain is in
    /// progress (a failing job enqueues its nak and hooks here), so the
    /// drain loops until the set is observed empty. May be called at most
    /// once.
    pub(crate) async fn wait(&self) {
        loop {
            let mut batch = {
                let mut set = self.set.lock().expect("tasks mutex poisoned");
                if set.is_empty() {
                    break;
                }
                std::mem::take(&mut *set)
            };
            while let Some(result) = batch.join_next().await {
                if let Err(err) = result {
                    if err.is_panic() {
                        tracing::error!(supervisor = %self.name, "supervised task panicked");
                    }
                }
            }
        }
        let was_done = self.done.swap(true, Ordering::AcqRel);
        assert!(!was_done, "supervisor drained twice");
    }
}

impl std::fmt::Debug for Tasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tasks").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn wait_drains_all_tasks() {
        let tasks = Tasks::new("test");
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            tasks.start(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        tasks.wait().await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn wait_picks_up_tasks_started_mid_drain() {
        let tasks = Arc::new(Tasks::new("test"));
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let tasks = tasks.clone();
            let counter = counter.clone();
            tasks.clone().start(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let inner = counter.clone();
                tasks.start(async move {
                    inner.fetch_add(1, Ordering::SeqCst);
                });
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        tasks.wait().await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let tasks = Tasks::new("test");
        tasks.start(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        tasks.cancel();
        tasks.cancel();
        tasks.wait().await;
    }

    #[tokio::test]
    async fn finished_tasks_are_compacted() {
        let tasks = Tasks::new("test");
        for _ in 0..100 {
            tasks.start(async {});
            tokio::task::yield_now().await;
        }
        let len = tasks.set.lock().unwrap().len();
        assert!(len < 100, "set should self-clean, had {len} entries");
        tasks.wait().await;
    }

    #[tokio::test]
    #[should_panic(expected = "drained supervisor")]
    async fn start_after_wait_panics() {
        let tasks = Tasks::new("test");
        tasks.wait().await;
        tasks.start(async {});
    }
}
