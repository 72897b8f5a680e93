use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_nats::jetstream::{self, consumer, AckKind};
use async_nats::Client;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tokio::sync::{watch, Semaphore};

use crate::context::{Context, ErrorContext, Failure, Metadata, OkContext};
use crate::errors::{BoxError, Error};
use crate::events::{now_epoch, validate_name, Event};
use crate::headers;
use crate::middlewares::Middleware;
use crate::tasks::Tasks;

use super::execute_in::ExecuteIn;
use super::priority::Priority;

type PullConsumer = consumer::Consumer<consumer::pull::Config>;
type AsyncHandler<T, R> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<R, BoxError>> + Send + Sync>;
type BlockingHandler<T, R> = Arc<dyn Fn(T) -> Result<R, BoxError> + Send + Sync>;

enum HandlerKind<T, R> {
    Async(AsyncHandler<T, R>),
    Blocking(BlockingHandler<T, R>),
}

impl<T, R> Clone for HandlerKind<T, R> {
    fn clone(&self) -> Self {
        match self {
            HandlerKind::Async(f) => HandlerKind::Async(f.clone()),
            HandlerKind::Blocking(f) => HandlerKind::Blocking(f.clone()),
        }
    }
}

/// A durable subscriber bound to a specific [`Event`].
///
/// Exactly one running instance of the same actor receives each message,
/// so the same actor can run on many machines and the work is spread
/// between them without losing a single message.
///
/// ```
/// use walnats::{Actor, Event};
///
/// async fn send_email(user: String) -> Result<(), walnats::BoxError> {
///     println!("sending email to {user}");
///     Ok(())
/// }
///
/// let user_created = Event::<String>::new("user-created");
/// let send_email = Actor::new("send-email", user_created, send_email);
/// ```
///
/// The options submitted into the broker (`description`, `ack_wait`,
/// `max_attempts`, `max_ack_pending`) cannot be changed after the actor is
/// registered for the first time.
pub struct Actor<T, R = ()> {
    name: Arc<str>,
    event: Event<T, R>,
    handler: HandlerKind<T, R>,
    description: Option<String>,
    ack_wait: Duration,
    max_attempts: Option<u32>,
    max_ack_pending: i64,
    middlewares: Vec<Arc<dyn Middleware>>,
    max_jobs: usize,
    job_timeout: Duration,
    execute_in: ExecuteIn,
    retry_delay: Vec<f64>,
    pulse: bool,
    priority: Priority,
}

impl<T, R> Clone for Actor<T, R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            event: self.event.clone(),
            handler: self.handler.clone(),
            description: self.description.clone(),
            ack_wait: self.ack_wait,
            max_attempts: self.max_attempts,
            max_ack_pending: self.max_ack_pending,
            middlewares: self.middlewares.clone(),
            max_jobs: self.max_jobs,
            job_timeout: self.job_timeout,
            execute_in: self.execute_in,
            retry_delay: self.retry_delay.clone(),
            pulse: self.pulse,
            priority: self.priority,
        }
    }
}

impl<T, R> std::fmt::Debug for Actor<T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor")
            .field("name", &self.name)
            .field("event", &self.event.name())
            .finish_non_exhaustive()
    }
}

impl<T, R> Actor<T, R> {
    /// Declare an actor with an async handler.
    ///
    /// The name is used as the durable consumer name on the broker and must
    /// be unique per event and never change: a renamed actor leaves behind
    /// a consumer that keeps accumulating messages.
    pub fn new<F, Fut>(name: &str, event: Event<T, R>, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
    {
        Self::build(
            name,
            event,
            HandlerKind::Async(Arc::new(move |msg| Box::pin(handler(msg)))),
            ExecuteIn::Main,
        )
    }

    /// Declare an actor with a blocking (non-async) handler.
    ///
    /// The handler runs on the blocking lane by default; pick
    /// [`ExecuteIn::Compute`] for CPU-bound work, or [`ExecuteIn::Main`]
    /// for handlers fast enough to run on the dispatcher.
    pub fn blocking<F>(name: &str, event: Event<T, R>, handler: F) -> Self
    where
        F: Fn(T) -> Result<R, BoxError> + Send + Sync + 'static,
    {
        Self::build(
            name,
            event,
            HandlerKind::Blocking(Arc::new(handler)),
            ExecuteIn::Blocking,
        )
    }

    fn build(name: &str, event: Event<T, R>, handler: HandlerKind<T, R>, execute_in: ExecuteIn) -> Self {
        validate_name("actor", name);
        Self {
            name: name.into(),
            event,
            handler,
            description: None,
            ack_wait: Duration::from_secs(16),
            max_attempts: None,
            max_ack_pending: 1000,
            middlewares: Vec::new(),
            max_jobs: 16,
            job_timeout: Duration::from_secs(32),
            execute_in,
            retry_delay: vec![0.5, 1.0, 2.0, 4.0],
            pulse: true,
            priority: Priority::Normal,
        }
    }

    /// Attach a description to the durable consumer on the broker.
    pub fn description(mut self, description: &str) -> Self {
        assert!(
            description.len() <= 4096,
            "actor description must be at most 4096 characters"
        );
        self.description = Some(description.to_owned());
        self
    }

    /// How long the broker waits since the last update before redelivering
    /// the message. While the handler runs, a pulse extends the deadline.
    pub fn ack_wait(mut self, ack_wait: Duration) -> Self {
        assert!(ack_wait > Duration::ZERO, "ack_wait must be positive");
        self.ack_wait = ack_wait;
        self
    }

    /// How many delivery attempts the broker makes before giving up on a
    /// message. Unbounded when not set.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        assert!(max_attempts > 0, "max_attempts must be positive");
        self.max_attempts = Some(max_attempts);
        self
    }

    /// How many messages may be awaiting an ack across the whole system.
    /// Delivery pauses when the limit is reached.
    pub fn max_ack_pending(mut self, max_ack_pending: i64) -> Self {
        assert!(max_ack_pending > 0, "max_ack_pending must be positive");
        self.max_ack_pending = max_ack_pending;
        self
    }

    /// Hooks triggered at different stages of message handling. Useful for
    /// logs, metrics, and alerts; middlewares cannot affect flow control.
    pub fn middlewares(mut self, middlewares: impl IntoIterator<Item = Arc<dyn Middleware>>) -> Self {
        self.middlewares = middlewares.into_iter().collect();
        self
    }

    /// How many jobs this actor may run concurrently on this instance.
    pub fn max_jobs(mut self, max_jobs: usize) -> Self {
        assert!(max_jobs >= 1, "max_jobs must be at least 1");
        self.max_jobs = max_jobs;
        self
    }

    /// How long a single handler invocation may take. A handler exceeding
    /// the limit is cancelled and the message is nak'ed like any failure.
    /// Has no effect on blocking handlers running on the dispatcher.
    pub fn job_timeout(mut self, job_timeout: Duration) -> Self {
        assert!(job_timeout > Duration::ZERO, "job_timeout must be positive");
        self.job_timeout = job_timeout;
        self
    }

    /// Where to run the handler. Async handlers can only run on the
    /// dispatcher; the pool lanes require a handler built with
    /// [`Actor::blocking`].
    pub fn execute_in(mut self, execute_in: ExecuteIn) -> Self {
        if matches!(self.handler, HandlerKind::Async(_)) {
            assert!(
                execute_in == ExecuteIn::Main,
                "async handlers run on the dispatcher; pool lanes need Actor::blocking"
            );
        }
        self.execute_in = execute_in;
        self
    }

    /// Delays (in seconds) before each retry. When the attempt number runs
    /// past the sequence, the last delay keeps being used. The delay only
    /// applies to explicit naks; if the whole instance dies, the broker
    /// redelivers after `ack_wait` instead.
    pub fn retry_delay(mut self, retry_delay: Vec<f64>) -> Self {
        assert!(!retry_delay.is_empty(), "retry_delay must not be empty");
        assert!(
            retry_delay.iter().all(|d| d.is_finite() && *d >= 0.0),
            "retry delays must be finite and non-negative"
        );
        self.retry_delay = retry_delay;
        self
    }

    /// Keep signalling the broker that the message is in progress while the
    /// handler runs. Disabling the pulse means the handler must finish
    /// faster than `ack_wait`, but a stuck handler cannot hold a message
    /// forever.
    pub fn pulse(mut self, pulse: bool) -> Self {
        self.pulse = pulse;
        self
    }

    /// Priority of the actor compared to other actors on this instance.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// The actor name, used as the durable consumer name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The event the actor listens to.
    pub fn event(&self) -> &Event<T, R> {
        &self.event
    }

    pub(crate) fn consumer_config(&self) -> consumer::pull::Config {
        consumer::pull::Config {
            durable_name: Some(self.name.to_string()),
            description: self.description.clone(),
            ack_policy: consumer::AckPolicy::Explicit,
            ack_wait: self.ack_wait,
            max_deliver: self.max_attempts.map(i64::from).unwrap_or_default(),
            max_ack_pending: self.max_ack_pending,
            ..Default::default()
        }
    }

    /// How long to nak a message for before the given delivery attempt is
    /// retried.
    fn nak_delay(&self, attempt: Option<i64>) -> Duration {
        if self.retry_delay.is_empty() {
            return Duration::ZERO;
        }
        let index = match attempt {
            None => 0,
            Some(attempt) => (attempt.max(0) as usize).min(self.retry_delay.len() - 1),
        };
        Duration::from_secs_f64(self.retry_delay[index])
    }
}

/// 0-indexed attempt number for this delivery.
///
/// Every delivery counts, including the trip that naks a delayed message
/// back into the queue: the first real run of a delayed message reports
/// one prior attempt.
fn adjusted_attempts(num_delivered: i64) -> u64 {
    (num_delivered - 1).max(0) as u64
}

fn header_str(msg: &jetstream::Message, name: &str) -> Option<String> {
    msg.headers
        .as_ref()?
        .get(name)
        .map(|value| value.as_str().to_owned())
}

fn message_metadata(msg: &jetstream::Message) -> (u64, i64, DateTime<Utc>) {
    match msg.info() {
        Ok(info) => (
            info.stream_sequence,
            info.delivered,
            DateTime::from_timestamp_nanos(info.published.unix_timestamp_nanos() as i64),
        ),
        Err(err) => {
            tracing::warn!(error = %err, "failed to parse message metadata");
            (0, 1, Utc::now())
        }
    }
}

/// Aborts the in-progress pulse task when the message handling ends.
struct PulseGuard {
    task: tokio::task::JoinHandle<()>,
}

impl PulseGuard {
    fn spawn(ack_wait: Duration, msg: Arc<jetstream::Message>, actor: Arc<str>) -> Self {
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(ack_wait / 2).await;
                if let Err(err) = msg.ack_with(AckKind::Progress).await {
                    tracing::warn!(actor = %actor, error = %err, "failed to send in-progress pulse");
                }
            }
        });
        Self { task }
    }
}

impl Drop for PulseGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Everything a message handling task needs besides the message itself.
#[derive(Clone)]
struct HandleDeps {
    actor_sem: Arc<Semaphore>,
    global_sem: Arc<Semaphore>,
    lane: Option<Arc<Semaphore>>,
    tasks: Arc<Tasks>,
    client: Client,
}

/// Shared wiring handed to every actor's pull loop by
/// [`ConnectedActors::listen`](crate::ConnectedActors::listen).
pub struct ListenContext {
    pub(crate) client: Client,
    pub(crate) js: jetstream::Context,
    pub(crate) poll_sem: Arc<Semaphore>,
    pub(crate) global_sem: Arc<Semaphore>,
    pub(crate) blocking_lane: Option<Arc<Semaphore>>,
    pub(crate) compute_lane: Option<Arc<Semaphore>>,
    pub(crate) poll_delay: Duration,
    pub(crate) batch: usize,
    pub(crate) burst: bool,
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl std::fmt::Debug for ListenContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenContext")
            .field("poll_delay", &self.poll_delay)
            .field("batch", &self.batch)
            .field("burst", &self.burst)
            .finish_non_exhaustive()
    }
}

/// Type-erased view of an [`Actor`], as stored in an [`Actors`] registry.
///
/// [`Actors`]: crate::Actors
#[async_trait]
pub trait RawActor: Send + Sync {
    /// The actor name (durable consumer name).
    fn name(&self) -> &str;

    /// Name of the event the actor listens to.
    fn event_name(&self) -> &str;

    /// Name of the stream the durable consumer is bound to.
    fn stream_name(&self) -> String;

    /// Where the handler runs.
    fn execute_in(&self) -> ExecuteIn;

    /// Register the durable consumer on the broker.
    async fn add(&self, js: &jetstream::Context) -> Result<(), Error>;

    /// Run the pull loop until shutdown (or one drained poll in burst mode).
    async fn listen(self: Arc<Self>, ctx: ListenContext) -> Result<(), Error>;
}

#[async_trait]
impl<T, R> RawActor for Actor<T, R>
where
    T: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        Actor::name(self)
    }

    fn event_name(&self) -> &str {
        self.event.name()
    }

    fn stream_name(&self) -> String {
        self.event.stream_name()
    }

    fn execute_in(&self) -> ExecuteIn {
        self.execute_in
    }

    async fn add(&self, js: &jetstream::Context) -> Result<(), Error> {
        let stream = js
            .get_stream(self.stream_name())
            .await
            .map_err(Error::nats)?;
        stream
            .create_consumer(self.consumer_config())
            .await
            .map_err(|err| Error::from_consumer_error(&self.name, err.kind(), &err))?;
        Ok(())
    }

    async fn listen(self: Arc<Self>, ctx: ListenContext) -> Result<(), Error> {
        let stream = ctx
            .js
            .get_stream(self.stream_name())
            .await
            .map_err(Error::nats)?;
        let consumer: PullConsumer = stream
            .get_consumer(self.name.as_ref())
            .await
            .map_err(Error::nats)?;

        let tasks = Arc::new(Tasks::new(format!("actors/{}", self.name)));
        let actor_sem = Arc::new(Semaphore::new(self.max_jobs));
        let lane = match self.execute_in {
            ExecuteIn::Main => None,
            ExecuteIn::Blocking => ctx.blocking_lane.clone(),
            ExecuteIn::Compute => ctx.compute_lane.clone(),
        };
        let mut shutdown = ctx.shutdown.clone();

        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }
            let pulled = tokio::select! {
                _ = shutdown.changed() => break Ok(()),
                res = self.pull_and_dispatch(&consumer, &ctx, &tasks, &actor_sem, &lane) => res,
            };
            if let Err(err) = pulled {
                break Err(err);
            }
            if ctx.burst {
                tasks.wait().await;
                break Ok(());
            }
        };
        tasks.cancel();
        result
    }
}

impl<T, R> Actor<T, R>
where
    T: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    /// Type-erased handle for listing the actor in an
    /// [`Actors`](crate::Actors) registry.
    pub fn raw(&self) -> Arc<dyn RawActor> {
        Arc::new(self.clone())
    }

    async fn pull_and_dispatch(
        self: &Arc<Self>,
        consumer: &PullConsumer,
        ctx: &ListenContext,
        tasks: &Arc<Tasks>,
        actor_sem: &Arc<Semaphore>,
        lane: &Option<Arc<Semaphore>>,
    ) -> Result<(), Error> {
        // don't poll messages the instance has no capacity to handle
        if actor_sem.available_permits() == 0 {
            drop(actor_sem.acquire().await.expect("semaphore closed"));
        }
        if ctx.global_sem.available_permits() == 0 {
            drop(ctx.global_sem.acquire().await.expect("semaphore closed"));
        }

        let messages = {
            let _poll = ctx.poll_sem.acquire().await.expect("semaphore closed");
            // a batch request waits up to poll_delay for messages and ends
            // the stream; an empty poll is not an error
            let mut batch = consumer
                .batch()
                .max_messages(ctx.batch)
                .expires(ctx.poll_delay)
                .messages()
                .await
                .map_err(Error::nats)?;
            let mut messages = Vec::new();
            while let Some(item) = batch.next().await {
                messages.push(item.map_err(Error::nats)?);
            }
            messages
        };

        for msg in messages {
            let deps = HandleDeps {
                actor_sem: actor_sem.clone(),
                global_sem: ctx.global_sem.clone(),
                lane: lane.clone(),
                tasks: tasks.clone(),
                client: ctx.client.clone(),
            };
            tasks.start(Arc::clone(self).handle_message(msg, deps));
        }
        Ok(())
    }

    async fn handle_message(self: Arc<Self>, msg: jetstream::Message, deps: HandleDeps) {
        // a message delayed into the future goes back into the queue
        // without touching the handler or any middlewares
        let delay_header = header_str(&msg, headers::DELAY);
        if let Some(value) = delay_header.as_deref() {
            match value.parse::<f64>() {
                Ok(until) => {
                    let left = until - now_epoch();
                    if left > 0.001 {
                        let delay = Duration::from_secs_f64(left);
                        if let Err(err) = msg.ack_with(AckKind::Nak(Some(delay))).await {
                            tracing::error!(actor = %self.name, error = %err, "failed to nak delayed message");
                        }
                        return;
                    }
                }
                Err(err) => {
                    tracing::warn!(actor = %self.name, error = %err, "malformed delay header");
                }
            }
        }

        let msg = Arc::new(msg);
        let pulse_guard = self.pulse.then(|| {
            PulseGuard::spawn(self.ack_wait, Arc::clone(&msg), Arc::clone(&self.name))
        });

        let (seq, delivered, published) = message_metadata(&msg);
        let meta = Metadata {
            stream_sequence: seq,
            num_delivered: delivered,
            timestamp: published,
        };
        let attempts = adjusted_attempts(delivered);
        let trace_id = header_str(&msg, headers::TRACE);

        let (ctx, outcome, started) = {
            let _actor_permit = deps.actor_sem.acquire().await.expect("semaphore closed");
            let _global_permit = self.priority.acquire(&deps.global_sem).await;
            let started = Instant::now();

            match self.event.decode(&msg.payload) {
                Ok(payload) => {
                    let ctx = Context::new(
                        Arc::clone(&self.name),
                        self.event.name_arc(),
                        Some(Arc::new(payload.clone()) as Arc<dyn Any + Send + Sync>),
                        meta,
                        attempts,
                        trace_id,
                    );
                    for mw in &self.middlewares {
                        let mw = Arc::clone(mw);
                        let ctx = ctx.clone();
                        deps.tasks.start(async move { mw.on_start(&ctx).await });
                    }
                    let outcome = self.execute(payload, &deps).await;
                    (ctx, outcome, started)
                }
                Err(err) => {
                    let ctx = Context::new(
                        Arc::clone(&self.name),
                        self.event.name_arc(),
                        None,
                        meta,
                        attempts,
                        trace_id,
                    );
                    let err: BoxError = Box::new(err);
                    (ctx, Err(Failure::decode(err)), started)
                }
            }
        };

        match outcome {
            Err(failure) => {
                drop(pulse_guard);
                tracing::error!(
                    actor = %self.name,
                    event = %self.event.name(),
                    kind = %failure.kind(),
                    error = %failure,
                    "unhandled failure in actor"
                );
                let delay = self.nak_delay(Some(delivered));
                let nak_msg = Arc::clone(&msg);
                let actor = Arc::clone(&self.name);
                deps.tasks.start(async move {
                    if let Err(err) = nak_msg.ack_with(AckKind::Nak(Some(delay))).await {
                        tracing::error!(actor = %actor, error = %err, "failed to nak message");
                    }
                });
                let ectx = ErrorContext::new(ctx, failure);
                for mw in &self.middlewares {
                    let mw = Arc::clone(mw);
                    let ectx = ectx.clone();
                    deps.tasks.start(async move { mw.on_failure(&ectx).await });
                }
            }
            Ok(response) => {
                drop(pulse_guard);
                if let Err(err) = msg.ack().await {
                    tracing::error!(actor = %self.name, error = %err, "failed to ack message");
                }
                if let Some(serializer) = self.event.response_serializer() {
                    if let Some(reply) = header_str(&msg, headers::REPLY) {
                        match serializer.encode(&response) {
                            Ok(payload) => {
                                let client = deps.client.clone();
                                let reply_headers = msg.headers.clone().unwrap_or_default();
                                deps.tasks.start(async move {
                                    // best effort: the requester may be gone
                                    let published = client
                                        .publish_with_headers(reply, reply_headers, payload)
                                        .await;
                                    if let Err(err) = published {
                                        tracing::debug!(error = %err, "failed to publish response");
                                    }
                                });
                            }
                            Err(err) => {
                                tracing::error!(
                                    actor = %self.name,
                                    error = %err,
                                    "failed to encode response"
                                );
                            }
                        }
                    }
                }
                let octx = OkContext::new(ctx, started.elapsed());
                for mw in &self.middlewares {
                    let mw = Arc::clone(mw);
                    let octx = octx.clone();
                    deps.tasks.start(async move { mw.on_success(&octx).await });
                }
            }
        }
    }

    async fn execute(&self, message: T, deps: &HandleDeps) -> Result<R, Failure> {
        match &self.handler {
            HandlerKind::Async(handler) => {
                let job = AssertUnwindSafe(handler.as_ref()(message)).catch_unwind();
                match tokio::time::timeout(self.job_timeout, job).await {
                    Err(_) => Err(Failure::timeout(self.job_timeout)),
                    Ok(Err(panic)) => Err(Failure::panic(panic)),
                    Ok(Ok(Ok(response))) => Ok(response),
                    Ok(Ok(Err(err))) => Err(Failure::handler(err)),
                }
            }
            // a blocking handler kept on the dispatcher runs inline; no
            // timeout can apply because nothing yields
            HandlerKind::Blocking(handler) if self.execute_in == ExecuteIn::Main => {
                match std::panic::catch_unwind(AssertUnwindSafe(|| handler.as_ref()(message))) {
                    Ok(Ok(response)) => Ok(response),
                    Ok(Err(err)) => Err(Failure::handler(err)),
                    Err(panic) => Err(Failure::panic(panic)),
                }
            }
            HandlerKind::Blocking(handler) => {
                let _lane = match &deps.lane {
                    Some(lane) => Some(
                        Arc::clone(lane)
                            .acquire_owned()
                            .await
                            .expect("semaphore closed"),
                    ),
                    None => None,
                };
                let handler = Arc::clone(handler);
                let job = tokio::task::spawn_blocking(move || handler.as_ref()(message));
                match tokio::time::timeout(self.job_timeout, job).await {
                    Err(_) => Err(Failure::timeout(self.job_timeout)),
                    Ok(Err(join_err)) => {
                        if join_err.is_panic() {
                            Err(Failure::panic(join_err.into_panic()))
                        } else {
                            Err(Failure::handler(Box::new(join_err)))
                        }
                    }
                    Ok(Ok(Ok(response))) => Ok(response),
                    Ok(Ok(Err(err))) => Err(Failure::handler(err)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_actor(retry_delay: Vec<f64>) -> Actor<String> {
        let event = Event::<String>::new("e");
        Actor::new("a", event, |_| async { Ok(()) }).retry_delay(retry_delay)
    }

    #[test]
    fn nak_delay_clamps_to_the_schedule() {
        let actor = make_actor(vec![4.0, 5.0, 6.0]);
        assert_eq!(actor.nak_delay(None), Duration::from_secs(4));
        assert_eq!(actor.nak_delay(Some(0)), Duration::from_secs(4));
        assert_eq!(actor.nak_delay(Some(1)), Duration::from_secs(5));
        assert_eq!(actor.nak_delay(Some(2)), Duration::from_secs(6));
        assert_eq!(actor.nak_delay(Some(3)), Duration::from_secs(6));
        assert_eq!(actor.nak_delay(Some(13)), Duration::from_secs(6));
    }

    #[test]
    fn default_retry_schedule() {
        let event = Event::<String>::new("e");
        let actor = Actor::new("a", event, |_| async { Ok(()) });
        assert_eq!(actor.nak_delay(Some(0)), Duration::from_millis(500));
        assert_eq!(actor.nak_delay(Some(3)), Duration::from_secs(4));
        assert_eq!(actor.nak_delay(Some(9)), Duration::from_secs(4));
    }

    #[test]
    fn attempts_follow_the_delivery_count() {
        // first delivery
        assert_eq!(adjusted_attempts(1), 0);
        // second delivery, whether a retry or the redelivery of a delayed
        // message
        assert_eq!(adjusted_attempts(2), 1);
        assert_eq!(adjusted_attempts(5), 4);
        // defensive floor
        assert_eq!(adjusted_attempts(0), 0);
    }

    #[test]
    fn consumer_config_is_derived_from_the_actor() {
        let event = Event::<String>::new("sms.sent");
        let actor = Actor::new("notify-admin", event, |_| async { Ok(()) })
            .description("notify the admin about sent sms")
            .ack_wait(Duration::from_secs(8))
            .max_attempts(5)
            .max_ack_pending(100);
        let config = actor.consumer_config();
        assert_eq!(config.durable_name.as_deref(), Some("notify-admin"));
        assert_eq!(
            config.description.as_deref(),
            Some("notify the admin about sent sms")
        );
        assert_eq!(config.ack_wait, Duration::from_secs(8));
        assert_eq!(config.max_deliver, 5);
        assert_eq!(config.max_ack_pending, 100);
        assert_eq!(actor.stream_name(), "sms-sent");
    }

    #[test]
    fn unlimited_attempts_leave_max_deliver_unset() {
        let actor = make_actor(vec![1.0]);
        assert_eq!(actor.consumer_config().max_deliver, 0);
    }

    #[test]
    #[should_panic(expected = "retry_delay must not be empty")]
    fn empty_retry_delay_is_rejected() {
        make_actor(vec![]);
    }

    #[test]
    #[should_panic(expected = "pool lanes need Actor::blocking")]
    fn async_handler_cannot_move_to_a_pool() {
        let event = Event::<String>::new("e");
        let _ = Actor::new("a", event, |_| async { Ok(()) }).execute_in(ExecuteIn::Blocking);
    }

    #[test]
    #[should_panic(expected = "kebab-case")]
    fn actor_names_are_validated() {
        let event = Event::<String>::new("e");
        let _ = Actor::new("Not Valid", event, |_| async { Ok(()) });
    }

    #[test]
    fn blocking_handler_may_run_inline() {
        let event = Event::<String>::new("e");
        let actor = Actor::blocking("a", event, |_| Ok(())).execute_in(ExecuteIn::Main);
        assert_eq!(RawActor::execute_in(&actor), ExecuteIn::Main);
    }
}
