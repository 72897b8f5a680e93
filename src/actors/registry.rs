use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream;
use async_nats::Client;
use futures::future::try_join_all;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use crate::errors::Error;

use super::actor::{ListenContext, RawActor};
use super::execute_in::ExecuteIn;

/// Options for [`ConnectedActors::listen`].
#[derive(Debug, Clone)]
pub struct ListenOpts {
    /// Poll each actor once, handle everything polled, and exit. Useful in
    /// tests when the messages are already in the queue.
    pub burst: bool,
    /// How many poll requests may be in flight at once. Defaults to the
    /// number of actors; lower it when sockets are scarce and actors should
    /// take turns.
    pub max_polls: Option<usize>,
    /// How long each poll request waits for messages. Low values produce
    /// more requests but detect broken connections faster.
    pub poll_delay: Duration,
    /// How many messages to pull per poll request. Leave it at 1 when
    /// scaling horizontally, so waiting messages can go to other instances.
    pub batch: usize,
    /// How many handlers may run at the same time on this instance, across
    /// all actors.
    pub max_jobs: usize,
    /// Size of the blocking lane for [`ExecuteIn::Blocking`] actors.
    /// Defaults to `min(cpus + 4, 32)`.
    pub max_threads: Option<usize>,
    /// Size of the compute lane for [`ExecuteIn::Compute`] actors.
    /// Defaults to the number of CPUs.
    pub max_compute: Option<usize>,
}

impl Default for ListenOpts {
    fn default() -> Self {
        Self {
            burst: false,
            max_polls: None,
            poll_delay: Duration::from_secs(2),
            batch: 1,
            max_jobs: 16,
            max_threads: None,
            max_compute: None,
        }
    }
}

impl ListenOpts {
    /// Burst mode: poll once, drain, exit.
    pub fn burst(mut self) -> Self {
        self.burst = true;
        self
    }

    /// Cap concurrent poll requests.
    pub fn max_polls(mut self, max_polls: usize) -> Self {
        assert!(max_polls >= 1, "max_polls must be at least 1");
        self.max_polls = Some(max_polls);
        self
    }

    /// How long each poll request waits for messages.
    pub fn poll_delay(mut self, poll_delay: Duration) -> Self {
        self.poll_delay = poll_delay;
        self
    }

    /// How many messages to pull per poll request.
    pub fn batch(mut self, batch: usize) -> Self {
        assert!(batch >= 1, "batch must be at least 1");
        self.batch = batch;
        self
    }

    /// Cap concurrent handlers on this instance.
    pub fn max_jobs(mut self, max_jobs: usize) -> Self {
        assert!(max_jobs >= 1, "max_jobs must be at least 1");
        self.max_jobs = max_jobs;
        self
    }

    /// Cap the blocking lane.
    pub fn max_threads(mut self, max_threads: usize) -> Self {
        assert!(max_threads >= 1, "max_threads must be at least 1");
        self.max_threads = Some(max_threads);
        self
    }

    /// Cap the compute lane.
    pub fn max_compute(mut self, max_compute: usize) -> Self {
        assert!(max_compute >= 1, "max_compute must be at least 1");
        self.max_compute = Some(max_compute);
        self
    }
}

/// Registry of [`Actor`](crate::Actor) declarations.
///
/// ```no_run
/// # async fn example() -> Result<(), walnats::Error> {
/// async fn send_email(user: String) -> Result<(), walnats::BoxError> {
///     Ok(())
/// }
///
/// let user_created = walnats::Event::<String>::new("user-created");
/// let send_email = walnats::Actor::new("send-email", user_created, send_email);
/// let actors = walnats::Actors::new(vec![send_email.raw()]);
/// let conn = actors.connect("nats://localhost:4222").await?;
/// conn.register().await?;
/// conn.listen(Default::default()).await?;
/// # Ok(())
/// # }
/// ```
pub struct Actors {
    actors: Vec<Arc<dyn RawActor>>,
}

impl Actors {
    /// Build the registry. Actor names must be unique per stream: the name
    /// is the durable consumer id.
    pub fn new(actors: Vec<Arc<dyn RawActor>>) -> Self {
        assert!(!actors.is_empty(), "at least one actor must be registered");
        let mut seen = HashSet::new();
        for actor in &actors {
            assert!(
                seen.insert((actor.stream_name(), actor.name().to_owned())),
                "duplicate actor name `{}` for event `{}`",
                actor.name(),
                actor.event_name()
            );
        }
        Self { actors }
    }

    /// Find a registered actor by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn RawActor>> {
        self.actors.iter().find(|a| a.name() == name)
    }

    /// Connect to the broker, owning the connection.
    pub async fn connect(&self, server: &str) -> Result<ConnectedActors, Error> {
        let client = async_nats::connect(server).await.map_err(Error::nats)?;
        Ok(self.with_client(client))
    }

    /// Use an already connected client.
    ///
    /// The client handle is shared, not owned: the same connection can run
    /// a publisher and a subscriber side by side.
    pub fn with_client(&self, client: Client) -> ConnectedActors {
        let js = jetstream::new(client.clone());
        ConnectedActors {
            client,
            js,
            actors: Arc::new(self.actors.clone()),
        }
    }
}

impl std::fmt::Debug for Actors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.actors.iter().map(|a| a.name()).collect();
        f.debug_struct("Actors").field("actors", &names).finish()
    }
}

/// An [`Actors`] registry connected to the broker. Use it to listen for
/// events.
#[derive(Clone)]
pub struct ConnectedActors {
    client: Client,
    js: jetstream::Context,
    actors: Arc<Vec<Arc<dyn RawActor>>>,
}

impl ConnectedActors {
    /// Register the durable consumers for all actors.
    ///
    /// The corresponding streams must exist (see
    /// [`ConnectedEvents::register`](crate::ConnectedEvents::register));
    /// from the moment a consumer exists, its stream retains every message
    /// for the actor, even while nobody listens.
    pub async fn register(&self) -> Result<(), Error> {
        try_join_all(self.actors.iter().map(|actor| actor.add(&self.js))).await?;
        Ok(())
    }

    /// Pull messages and run handlers for all registered actors, forever.
    ///
    /// In burst mode the call returns after a single poll per actor has
    /// been drained.
    pub async fn listen(&self, opts: ListenOpts) -> Result<(), Error> {
        self.listen_with_signal(opts, std::future::pending()).await
    }

    /// Like [`ConnectedActors::listen`], but shuts down gracefully when
    /// `signal` resolves: polling stops, in-flight handlers are aborted,
    /// and their messages are redelivered by the broker after `ack_wait`.
    pub async fn listen_with_signal(
        &self,
        opts: ListenOpts,
        signal: impl Future<Output = ()> + Send,
    ) -> Result<(), Error> {
        let poll_sem = Arc::new(Semaphore::new(
            opts.max_polls.unwrap_or_else(|| self.actors.len().max(1)),
        ));
        let global_sem = Arc::new(Semaphore::new(opts.max_jobs));
        // lanes are created only when some actor asks for them
        let blocking_lane = self
            .actors
            .iter()
            .any(|a| a.execute_in() == ExecuteIn::Blocking)
            .then(|| {
                Arc::new(Semaphore::new(
                    opts.max_threads.unwrap_or_else(default_threads),
                ))
            });
        let compute_lane = self
            .actors
            .iter()
            .any(|a| a.execute_in() == ExecuteIn::Compute)
            .then(|| Arc::new(Semaphore::new(opts.max_compute.unwrap_or_else(num_cpus::get))));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut loops: JoinSet<Result<(), Error>> = JoinSet::new();
        for actor in self.actors.iter() {
            let ctx = ListenContext {
                client: self.client.clone(),
                js: self.js.clone(),
                poll_sem: poll_sem.clone(),
                global_sem: global_sem.clone(),
                blocking_lane: blocking_lane.clone(),
                compute_lane: compute_lane.clone(),
                poll_delay: opts.poll_delay,
                batch: opts.batch,
                burst: opts.burst,
                shutdown: shutdown_rx.clone(),
            };
            loops.spawn(Arc::clone(actor).listen(ctx));
        }
        drop(shutdown_rx);

        tokio::pin!(signal);
        let mut signalled = false;
        loop {
            let joined = if signalled {
                loops.join_next().await
            } else {
                tokio::select! {
                    _ = &mut signal => {
                        signalled = true;
                        let _ = shutdown_tx.send(true);
                        continue;
                    }
                    joined = loops.join_next() => joined,
                }
            };
            match joined {
                None => return Ok(()),
                Some(Ok(Ok(()))) => {}
                // dropping the JoinSet aborts the remaining loops
                Some(Ok(Err(err))) => return Err(err),
                Some(Err(join_err)) => {
                    return Err(Error::Nats(format!("actor loop failed: {join_err}")))
                }
            }
        }
    }
}

impl std::fmt::Debug for ConnectedActors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.actors.iter().map(|a| a.name()).collect();
        f.debug_struct("ConnectedActors")
            .field("actors", &names)
            .finish_non_exhaustive()
    }
}

fn default_threads() -> usize {
    (num_cpus::get() + 4).min(32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Actor, Event};

    #[test]
    #[should_panic(expected = "duplicate actor name")]
    fn duplicate_consumers_are_rejected() {
        let event = Event::<String>::new("e");
        let a = Actor::new("same", event.clone(), |_| async { Ok(()) });
        let b = Actor::new("same", event, |_| async { Ok(()) });
        Actors::new(vec![a.raw(), b.raw()]);
    }

    #[test]
    fn same_name_on_different_events_is_fine() {
        let a = Actor::new("worker", Event::<String>::new("e-one"), |_| async { Ok(()) });
        let b = Actor::new("worker", Event::<String>::new("e-two"), |_| async { Ok(()) });
        let actors = Actors::new(vec![a.raw(), b.raw()]);
        assert!(actors.get("worker").is_some());
        assert!(actors.get("missing").is_none());
    }

    #[test]
    fn default_lane_size_is_bounded() {
        assert!(default_threads() <= 32);
        assert!(default_threads() >= 5);
    }
}
