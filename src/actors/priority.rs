use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Priority of an actor compared to other actors on the same instance.
///
/// Actors with a higher priority have a higher chance to get started
/// earlier when the process-wide job limit is contended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Favored over everything else under contention.
    High = 0,
    /// The default.
    #[default]
    Normal = 1,
    /// Yields to the other two bands under contention.
    Low = 2,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Normal => write!(f, "normal"),
            Priority::Low => write!(f, "low"),
        }
    }
}

impl Priority {
    /// Acquire a permit of the shared semaphore, biased by priority.
    ///
    /// Lower-priority callers pass through the queue once per level before
    /// joining it for real, so same-batch waiters resolve in priority
    /// order. This is a coarse fairness hint, not a strict guarantee.
    pub(crate) async fn acquire(self, sem: &Arc<Semaphore>) -> OwnedSemaphorePermit {
        for _ in 0..self as usize {
            let permit = Arc::clone(sem)
                .acquire_owned()
                .await
                .expect("semaphore closed");
            drop(permit);
            tokio::task::yield_now().await;
        }
        Arc::clone(sem)
            .acquire_owned()
            .await
            .expect("semaphore closed")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn same_batch_waiters_resolve_in_priority_order() {
        let sem = Arc::new(Semaphore::new(1));
        let blocker = sem.clone().acquire_owned().await.unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        // submitted worst-first so FIFO alone would invert the expectation
        for priority in [Priority::Low, Priority::Normal, Priority::High] {
            let sem = sem.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _permit = priority.acquire(&sem).await;
                order.lock().unwrap().push(priority);
                tokio::task::yield_now().await;
            }));
        }
        // let every waiter reach its first acquire before opening the gate
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        drop(blocker);
        for handle in handles {
            handle.await.unwrap();
        }

        let order = order.lock().unwrap().clone();
        assert_eq!(order, vec![Priority::High, Priority::Normal, Priority::Low]);
    }

    #[tokio::test]
    async fn acquire_holds_a_single_permit() {
        let sem = Arc::new(Semaphore::new(2));
        let permit = Priority::Low.acquire(&sem).await;
        assert_eq!(sem.available_permits(), 1);
        drop(permit);
        assert_eq!(sem.available_permits(), 2);
    }

    #[tokio::test]
    async fn uncontended_acquire_is_immediate() {
        let sem = Arc::new(Semaphore::new(1));
        tokio::time::timeout(Duration::from_secs(1), Priority::Low.acquire(&sem))
            .await
            .expect("acquire should not block on a free semaphore");
    }
}
