use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::errors::BoxError;

/// Broker-provided delivery metadata for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    /// Sequence number of the message in its stream.
    pub stream_sequence: u64,
    /// How many times the broker has delivered this message, starting at 1.
    pub num_delivered: i64,
    /// When the message was received by the broker.
    pub timestamp: DateTime<Utc>,
}

/// What went wrong while handling a message.
///
/// This is the framework-level taxonomy of failures; the
/// [`FrequencyMiddleware`](crate::middlewares::FrequencyMiddleware) keys its
/// failure deduplication on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The handler returned an error.
    Handler,
    /// The handler did not finish within the actor's `job_timeout`.
    Timeout,
    /// The handler panicked.
    Panic,
    /// The payload could not be decoded.
    Decode,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Handler => write!(f, "handler"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Panic => write!(f, "panic"),
            FailureKind::Decode => write!(f, "decode"),
        }
    }
}

/// A failure captured by the subscription runtime.
#[derive(Debug, Clone)]
pub struct Failure {
    kind: FailureKind,
    error: Arc<BoxError>,
}

impl Failure {
    pub(crate) fn handler(error: BoxError) -> Self {
        Self {
            kind: FailureKind::Handler,
            error: Arc::new(error),
        }
    }

    pub(crate) fn timeout(limit: Duration) -> Self {
        Self {
            kind: FailureKind::Timeout,
            error: Arc::new(format!("handler did not finish within {limit:?}").into()),
        }
    }

    pub(crate) fn panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "handler panicked".to_owned());
        Self {
            kind: FailureKind::Panic,
            error: Arc::new(message.into()),
        }
    }

    pub(crate) fn decode(error: BoxError) -> Self {
        Self {
            kind: FailureKind::Decode,
            error: Arc::new(error),
        }
    }

    /// The failure category.
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// The underlying error.
    pub fn error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.error.as_ref().as_ref()
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.error)
    }
}

/// Information about the message being handled, passed into
/// [`Middleware::on_start`](crate::middlewares::Middleware::on_start) hooks.
///
/// Contexts are cheap to clone; the runtime clones them for every hook so
/// that hooks can run fire-and-forget.
#[derive(Clone)]
pub struct Context {
    actor_name: Arc<str>,
    event_name: Arc<str>,
    message: Option<Arc<dyn Any + Send + Sync>>,
    meta: Metadata,
    attempts: u64,
    trace_id: Option<Arc<str>>,
}

impl Context {
    pub(crate) fn new(
        actor_name: Arc<str>,
        event_name: Arc<str>,
        message: Option<Arc<dyn Any + Send + Sync>>,
        meta: Metadata,
        attempts: u64,
        trace_id: Option<String>,
    ) -> Self {
        Self {
            actor_name,
            event_name,
            message,
            meta,
            attempts,
            trace_id: trace_id.map(Into::into),
        }
    }

    /// Name of the actor handling the message.
    pub fn actor_name(&self) -> &str {
        &self.actor_name
    }

    /// Name of the event the message belongs to.
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// The decoded payload, or `None` when decoding failed.
    pub fn message<T: 'static>(&self) -> Option<&T> {
        self.message.as_ref()?.downcast_ref()
    }

    /// Broker-provided delivery metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.meta
    }

    /// Sequence number of the message in its stream.
    pub fn seq_number(&self) -> u64 {
        self.meta.stream_sequence
    }

    /// How many delivery attempts were made before this one (0-indexed).
    ///
    /// Every delivery counts, including the trip that naks a delayed
    /// message back into the queue: the first real run of a delayed
    /// message reports one prior attempt.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Check if this is the first attempt to handle the message.
    pub fn is_first_attempt(&self) -> bool {
        self.attempts == 0
    }

    /// Trace id from the `Walnats-Trace` header, if any.
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub(crate) fn actor_key(&self) -> String {
        format!("{}.{}", self.event_name, self.actor_name)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("actor", &self.actor_name)
            .field("event", &self.event_name)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

/// Context for [`Middleware::on_success`] hooks.
///
/// [`Middleware::on_success`]: crate::middlewares::Middleware::on_success
#[derive(Debug, Clone)]
pub struct OkContext {
    ctx: Context,
    duration: Duration,
}

impl OkContext {
    pub(crate) fn new(ctx: Context, duration: Duration) -> Self {
        Self { ctx, duration }
    }

    /// How long the handler ran.
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl std::ops::Deref for OkContext {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.ctx
    }
}

/// Context for [`Middleware::on_failure`] hooks.
///
/// When the failure is [`FailureKind::Decode`], [`Context::message`] is
/// `None`.
///
/// [`Middleware::on_failure`]: crate::middlewares::Middleware::on_failure
#[derive(Debug, Clone)]
pub struct ErrorContext {
    ctx: Context,
    failure: Failure,
}

impl ErrorContext {
    pub(crate) fn new(ctx: Context, failure: Failure) -> Self {
        Self { ctx, failure }
    }

    /// The captured failure.
    pub fn failure(&self) -> &Failure {
        &self.failure
    }

    /// The failure category.
    pub fn kind(&self) -> FailureKind {
        self.failure.kind()
    }
}

impl std::ops::Deref for ErrorContext {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.ctx
    }
}

#[cfg(test)]
pub(crate) fn test_context(
    actor: &str,
    event: &str,
    attempts: u64,
) -> Context {
    Context::new(
        actor.into(),
        event.into(),
        None,
        Metadata {
            stream_sequence: 1,
            num_delivered: attempts as i64 + 1,
            timestamp: Utc::now(),
        },
        attempts,
        None,
    )
}
