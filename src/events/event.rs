use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::{self, stream};
use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::errors::Error;
use crate::serializers::{JsonSerializer, Serializer};

use super::registry::FeedMessage;

/// Stream configuration options limiting the stream size.
///
/// When any of the limits is reached, the broker drops old messages to fit.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Limits {
    /// Maximum age of any message in the stream.
    pub age: Option<Duration>,
    /// How many consumers can be defined for the stream.
    pub consumers: Option<i32>,
    /// How many messages may be in the stream.
    pub messages: Option<i64>,
    /// How many bytes the stream may contain.
    pub bytes: Option<i64>,
    /// The largest message the stream will accept.
    pub message_size: Option<i32>,
}

impl Limits {
    pub(crate) fn validate(&self) {
        if let Some(age) = self.age {
            assert!(age > Duration::ZERO, "limits.age must be positive");
        }
        if let Some(consumers) = self.consumers {
            assert!(consumers > 0, "limits.consumers must be positive");
        }
        if let Some(messages) = self.messages {
            assert!(messages > 0, "limits.messages must be positive");
        }
        if let Some(bytes) = self.bytes {
            assert!(bytes > 0, "limits.bytes must be positive");
        }
        if let Some(size) = self.message_size {
            assert!(size > 0, "limits.message_size must be positive");
        }
    }
}

pub(crate) fn validate_name(kind: &str, name: &str) {
    assert!(!name.is_empty(), "{kind} name must not be empty");
    assert!(name.len() <= 64, "{kind} name must be at most 64 characters");
    assert!(
        name.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.'),
        "{kind} name `{name}` must be kebab-case (lowercase letters, digits, `-`, `.`)"
    );
    assert!(
        !name.starts_with(['-', '.']) && !name.ends_with(['-', '.']),
        "{kind} name `{name}` must not start or end with a separator"
    );
}

/// Container for everything there is to know about an event: name, stream
/// configuration, payload type, serializer.
///
/// The second type parameter is the response payload for request/reply
/// events; plain events leave it at the unit default. Events are immutable
/// and cheap to clone.
///
/// ```
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct User {
///     id: u64,
/// }
///
/// let user_created = walnats::Event::<User>::new("user-created");
/// assert_eq!(user_created.name(), "user-created");
/// ```
pub struct Event<T, R = ()> {
    name: Arc<str>,
    description: Option<Arc<str>>,
    limits: Limits,
    serializer: Arc<dyn Serializer<T>>,
    response_serializer: Option<Arc<dyn Serializer<R>>>,
}

impl<T, R> Clone for Event<T, R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            description: self.description.clone(),
            limits: self.limits,
            serializer: self.serializer.clone(),
            response_serializer: self.response_serializer.clone(),
        }
    }
}

impl<T, R> std::fmt::Debug for Event<T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event").field("name", &self.name).finish()
    }
}

impl<T> Event<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Declare an event serialized as JSON.
    ///
    /// The name is used for the subject and stream names and can never
    /// change. It must be 1-64 lowercase kebab-case characters; `.` is
    /// allowed as a hierarchy separator.
    pub fn new(name: &str) -> Self {
        Self::with_serializer(name, JsonSerializer::default())
    }
}

impl<T> Event<T> {
    /// Declare an event with an explicit serializer (protobuf, raw bytes,
    /// ISO-8601, or any of the wrappers).
    pub fn with_serializer(name: &str, serializer: impl Serializer<T> + 'static) -> Self {
        validate_name("event", name);
        Self {
            name: name.into(),
            description: None,
            limits: Limits::default(),
            serializer: Arc::new(serializer),
            response_serializer: None,
        }
    }

    /// Turn the event into a request/reply event with a JSON response.
    ///
    /// The very same copy must be used by both the requesting side and the
    /// actor, otherwise the response won't be emitted.
    pub fn with_response<R>(self) -> Event<T, R>
    where
        R: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.with_response_serializer(JsonSerializer::default())
    }

    /// Turn the event into a request/reply event with an explicit response
    /// serializer.
    pub fn with_response_serializer<R>(
        self,
        serializer: impl Serializer<R> + 'static,
    ) -> Event<T, R> {
        Event {
            name: self.name,
            description: self.description,
            limits: self.limits,
            serializer: self.serializer,
            response_serializer: Some(Arc::new(serializer)),
        }
    }
}

impl<T, R> Event<T, R> {
    /// Attach a human-readable description, shown in the stream description
    /// on the broker.
    pub fn description(mut self, description: &str) -> Self {
        assert!(
            description.len() <= 4096,
            "event description must be at most 4096 characters"
        );
        self.description = Some(description.into());
        self
    }

    /// Restrict the stream size.
    pub fn limits(mut self, limits: Limits) -> Self {
        limits.validate();
        self.limits = limits;
        self
    }

    /// The event name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        self.name.clone()
    }

    /// The subject messages are published to.
    pub fn subject_name(&self) -> &str {
        &self.name
    }

    /// The stream providing persistence for the subject.
    ///
    /// Exactly one stream exists per event; subject hierarchy separators
    /// are not valid in stream names and become dashes.
    pub fn stream_name(&self) -> String {
        self.name.replace('.', "-")
    }

    pub(crate) fn encode(&self, message: &T) -> Result<Bytes, Error> {
        self.serializer.encode(message).map_err(Error::Encode)
    }

    pub(crate) fn decode(&self, data: &[u8]) -> Result<T, Error> {
        self.serializer.decode(data).map_err(Error::Decode)
    }

    pub(crate) fn response_serializer(&self) -> Option<&Arc<dyn Serializer<R>>> {
        self.response_serializer.as_ref()
    }

    pub(crate) fn decode_response(&self, data: &[u8]) -> Result<R, Error> {
        let serializer = self
            .response_serializer
            .as_ref()
            .expect("event has no response serializer");
        serializer.decode(data).map_err(Error::Decode)
    }

    pub(crate) fn stream_config(&self) -> stream::Config {
        let mut config = stream::Config {
            name: self.stream_name(),
            subjects: vec![self.name.to_string()],
            description: self.description.as_ref().map(|d| d.to_string()),
            // interest retention: a message is dropped once every
            // registered consumer has acked it
            retention: stream::RetentionPolicy::Interest,
            ..Default::default()
        };
        if let Some(age) = self.limits.age {
            config.max_age = age;
        }
        if let Some(consumers) = self.limits.consumers {
            config.max_consumers = consumers;
        }
        if let Some(messages) = self.limits.messages {
            config.max_messages = messages;
        }
        if let Some(bytes) = self.limits.bytes {
            config.max_bytes = bytes;
        }
        if let Some(size) = self.limits.message_size {
            config.max_message_size = size;
        }
        config
    }
}

impl<T, R> Event<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    /// Type-erased handle for listing the event in an
    /// [`Events`](crate::Events) registry.
    pub fn raw(&self) -> Arc<dyn RawEvent> {
        Arc::new(self.clone())
    }
}

/// Type-erased view of an [`Event`], as stored in an [`Events`] registry.
///
/// [`Events`]: crate::Events
#[async_trait]
pub trait RawEvent: Send + Sync {
    /// The event name.
    fn name(&self) -> &str;

    /// The subject messages are published to.
    fn subject_name(&self) -> &str;

    /// The stream providing persistence for the subject.
    fn stream_name(&self) -> String;

    /// Idempotently create and/or update the stream.
    async fn sync(&self, js: &jetstream::Context, create: bool, update: bool)
        -> Result<(), Error>;

    /// Live-monitor the subject, pushing each decoded payload into the feed.
    ///
    /// The subscription is non-durable: messages published while nobody
    /// listens are not replayed.
    async fn monitor(&self, client: Client, feed: mpsc::Sender<FeedMessage>);
}

#[async_trait]
impl<T, R> RawEvent for Event<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        Event::name(self)
    }

    fn subject_name(&self) -> &str {
        Event::subject_name(self)
    }

    fn stream_name(&self) -> String {
        Event::stream_name(self)
    }

    async fn sync(
        &self,
        js: &jetstream::Context,
        create: bool,
        update: bool,
    ) -> Result<(), Error> {
        let stream = self.stream_name();
        let config = self.stream_config();
        if create {
            match js.create_stream(config.clone()).await {
                Ok(_) => return Ok(()),
                Err(err) => {
                    let classified = Error::from_stream_error(&stream, err.kind(), &err);
                    match classified {
                        // an existing stream is fine as long as we are
                        // allowed to bring its config up to date
                        Error::StreamExists(_) if update => {}
                        other => return Err(other),
                    }
                }
            }
        }
        if update {
            js.update_stream(&config)
                .await
                .map_err(|err| Error::from_stream_error(&stream, err.kind(), &err))?;
        }
        Ok(())
    }

    async fn monitor(&self, client: Client, feed: mpsc::Sender<FeedMessage>) {
        let mut sub = match client.subscribe(self.subject_name().to_string()).await {
            Ok(sub) => sub,
            Err(err) => {
                tracing::error!(event = %self.name, error = %err, "failed to subscribe for monitoring");
                return;
            }
        };
        while let Some(msg) = sub.next().await {
            match self.decode(&msg.payload) {
                Ok(payload) => {
                    let message = FeedMessage::new(
                        self.name.to_string(),
                        Arc::new(payload) as Arc<dyn Any + Send + Sync>,
                    );
                    if feed.send(message).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    tracing::warn!(event = %self.name, error = %err, "failed to decode monitored message");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_name_replaces_dots() {
        let event = Event::<String>::new("orders.created");
        assert_eq!(event.subject_name(), "orders.created");
        assert_eq!(event.stream_name(), "orders-created");
    }

    #[test]
    fn stream_config_maps_limits() {
        let event = Event::<String>::new("parcel-delivered")
            .description("a parcel has reached its destination")
            .limits(Limits {
                age: Some(Duration::from_secs(600)),
                messages: Some(10_000),
                ..Limits::default()
            });
        let config = event.stream_config();
        assert_eq!(config.name, "parcel-delivered");
        assert_eq!(config.subjects, vec!["parcel-delivered".to_string()]);
        assert_eq!(config.retention, stream::RetentionPolicy::Interest);
        assert_eq!(config.max_age, Duration::from_secs(600));
        assert_eq!(config.max_messages, 10_000);
        assert_eq!(
            config.description.as_deref(),
            Some("a parcel has reached its destination")
        );
    }

    #[test]
    fn roundtrip_through_default_serializer() {
        let event = Event::<Vec<String>>::new("batch");
        let msg = vec!["a".to_string(), "b".to_string()];
        let data = event.encode(&msg).unwrap();
        assert_eq!(event.decode(&data).unwrap(), msg);
    }

    #[test]
    #[should_panic(expected = "must not be empty")]
    fn empty_name_is_rejected() {
        Event::<String>::new("");
    }

    #[test]
    #[should_panic(expected = "kebab-case")]
    fn wildcard_in_name_is_rejected() {
        Event::<String>::new("orders.*");
    }

    #[test]
    #[should_panic(expected = "kebab-case")]
    fn uppercase_name_is_rejected() {
        Event::<String>::new("Orders");
    }

    #[test]
    #[should_panic(expected = "at most 64")]
    fn overlong_name_is_rejected() {
        Event::<String>::new(&"x".repeat(65));
    }

    #[test]
    #[should_panic(expected = "limits.age must be positive")]
    fn zero_age_limit_is_rejected() {
        Event::<String>::new("e").limits(Limits {
            age: Some(Duration::ZERO),
            ..Limits::default()
        });
    }
}
