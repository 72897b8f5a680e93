use async_nats::jetstream::context::CreateStreamErrorKind;
use async_nats::jetstream::ErrorCode;
use async_nats::jetstream::stream::ConsumerErrorKind;
use thiserror::Error;

/// Boxed error type carried by handlers and middleware contexts.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced at the public API boundary.
///
/// Handler failures never show up here: they are logged, nak'ed with the
/// retry delay, and delivered to `on_failure` hooks instead. Fetch timeouts
/// are expected and silently drive the poll loop.
#[derive(Debug, Error)]
pub enum Error {
    /// Stream name already in use with a different configuration.
    ///
    /// Either two events share a name, or the event configuration changed
    /// and `register` was called with `update: false`.
    #[error("stream `{0}` already exists with a different configuration")]
    StreamExists(String),

    /// The stream configuration is invalid or an immutable option changed.
    #[error("invalid or immutable configuration for stream `{0}`")]
    StreamConfig(String),

    /// Consumer name already in use with a different configuration.
    ///
    /// Either two actors listening to the same event share a name, or an
    /// option that cannot be updated for an existing consumer changed.
    #[error("consumer `{0}` already exists with a different configuration")]
    ConsumerExists(String),

    /// The serializer failed to encode an outgoing message.
    #[error("failed to encode message: {0}")]
    Encode(#[source] BoxError),

    /// The serializer failed to decode an incoming message.
    #[error("failed to decode message: {0}")]
    Decode(#[source] BoxError),

    /// No response arrived in time for [`ConnectedEvents::request`].
    ///
    /// [`ConnectedEvents::request`]: crate::ConnectedEvents::request
    #[error("no response received within {0:?}")]
    RequestTimeout(std::time::Duration),

    /// Any other broker transport error, surfaced unchanged.
    #[error("NATS error: {0}")]
    Nats(String),
}

impl Error {
    pub(crate) fn nats(err: impl std::fmt::Display) -> Self {
        Error::Nats(err.to_string())
    }

    /// Map a stream create/update failure onto the framework taxonomy.
    ///
    /// `CreateStreamErrorKind` is shared by the create and update calls, so
    /// one classifier covers `register` in both modes.
    pub(crate) fn from_stream_error(
        stream: &str,
        kind: CreateStreamErrorKind,
        err: impl std::fmt::Display,
    ) -> Self {
        match kind {
            CreateStreamErrorKind::JetStream(api)
                if api.error_code() == ErrorCode::STREAM_NAME_EXIST =>
            {
                Error::StreamExists(stream.to_owned())
            }
            CreateStreamErrorKind::JetStream(api)
                if api.error_code() == ErrorCode::STREAM_INVALID_CONFIG =>
            {
                Error::StreamConfig(stream.to_owned())
            }
            _ => Error::nats(err),
        }
    }

    pub(crate) fn from_consumer_error(
        consumer: &str,
        kind: ConsumerErrorKind,
        err: impl std::fmt::Display,
    ) -> Self {
        match kind {
            ConsumerErrorKind::JetStream(api)
                if api.error_code() == ErrorCode::CONSUMER_NAME_EXIST =>
            {
                Error::ConsumerExists(consumer.to_owned())
            }
            _ => Error::nats(err),
        }
    }
}
