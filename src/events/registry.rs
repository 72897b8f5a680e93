use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream;
use async_nats::{Client, HeaderMap};
use futures::future::try_join_all;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::errors::Error;
use crate::headers;

use super::cloud_event::CloudEvent;
use super::event::{Event, RawEvent};

/// Seconds since the UNIX epoch, as carried by the `Walnats-Delay` header.
pub(crate) fn now_epoch() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Additional headers to attach to an emitted message.
#[derive(Debug, Clone)]
pub enum Meta {
    /// A plain list of header pairs.
    Headers(Vec<(String, String)>),
    /// CloudEvents metadata, projected as `ce-*` headers.
    CloudEvent(CloudEvent),
}

impl From<CloudEvent> for Meta {
    fn from(meta: CloudEvent) -> Self {
        Meta::CloudEvent(meta)
    }
}

impl From<Vec<(String, String)>> for Meta {
    fn from(pairs: Vec<(String, String)>) -> Self {
        Meta::Headers(pairs)
    }
}

/// Options for [`ConnectedEvents::emit`].
#[derive(Debug, Clone, Default)]
pub struct EmitOpts {
    /// Unique id of the message used for deduplication. Messages with the
    /// same id emitted within the broker's deduplication window (2 minutes
    /// by default) are dropped.
    pub uid: Option<String>,
    /// Request id for distributed tracing, carried in `Walnats-Trace`.
    pub trace_id: Option<String>,
    /// Minimum delay before an actor may process the message. The message
    /// is delivered immediately; actors nak it back until the deadline.
    pub delay: Option<Duration>,
    /// Extra headers, plain or CloudEvents.
    pub meta: Option<Meta>,
    /// When set, performs a JetStream-acknowledged publish instead of a
    /// fire-and-forget one.
    pub sync: bool,
}

impl EmitOpts {
    /// Set the deduplication id.
    pub fn uid(mut self, uid: &str) -> Self {
        self.uid = Some(uid.to_owned());
        self
    }

    /// Set the trace id.
    pub fn trace_id(mut self, trace_id: &str) -> Self {
        self.trace_id = Some(trace_id.to_owned());
        self
    }

    /// Delay processing of the message.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Attach extra headers.
    pub fn meta(mut self, meta: impl Into<Meta>) -> Self {
        self.meta = Some(meta.into());
        self
    }

    /// Wait for the broker to acknowledge the publish.
    pub fn sync(mut self) -> Self {
        self.sync = true;
        self
    }
}

/// Options for [`ConnectedEvents::request`].
#[derive(Debug, Clone)]
pub struct RequestOpts {
    /// Deduplication id, as in [`EmitOpts::uid`].
    pub uid: Option<String>,
    /// Trace id, as in [`EmitOpts::trace_id`].
    pub trace_id: Option<String>,
    /// Processing delay, as in [`EmitOpts::delay`].
    pub delay: Option<Duration>,
    /// Extra headers, as in [`EmitOpts::meta`].
    pub meta: Option<Meta>,
    /// How long to wait for the response.
    pub timeout: Duration,
}

impl Default for RequestOpts {
    fn default() -> Self {
        Self {
            uid: None,
            trace_id: None,
            delay: None,
            meta: None,
            timeout: Duration::from_secs(4),
        }
    }
}

pub(crate) fn make_headers(
    uid: Option<&str>,
    trace_id: Option<&str>,
    delay: Option<Duration>,
    meta: Option<&Meta>,
    reply: Option<&str>,
    now: f64,
) -> Option<HeaderMap> {
    let mut pairs: Vec<(String, String)> = match meta {
        None => Vec::new(),
        Some(Meta::Headers(headers)) => headers.clone(),
        Some(Meta::CloudEvent(ce)) => ce.as_headers(),
    };
    match (uid, meta) {
        (Some(uid), _) => pairs.push((headers::MSG_ID.to_owned(), uid.to_owned())),
        (None, Some(Meta::CloudEvent(ce))) if !ce.id.is_empty() => {
            pairs.push((headers::MSG_ID.to_owned(), ce.id.clone()));
        }
        _ => {}
    }
    if let Some(trace_id) = trace_id {
        pairs.push((headers::TRACE.to_owned(), trace_id.to_owned()));
    }
    if let Some(delay) = delay {
        let until = now + delay.as_secs_f64();
        pairs.push((headers::DELAY.to_owned(), format!("{until}")));
    }
    if let Some(reply) = reply {
        pairs.push((headers::REPLY.to_owned(), reply.to_owned()));
    }
    if pairs.is_empty() {
        return None;
    }
    let mut map = HeaderMap::new();
    for (name, value) in &pairs {
        map.insert(name.as_str(), value.as_str());
    }
    Some(map)
}

/// Registry of [`Event`] declarations.
///
/// ```no_run
/// # async fn example() -> Result<(), walnats::Error> {
/// let user_created = walnats::Event::<String>::new("user-created");
/// let events = walnats::Events::new(vec![user_created.raw()]);
/// let conn = events.connect("nats://localhost:4222").await?;
/// conn.register(true, false).await?;
/// conn.emit(&user_created, &"mark".to_string(), Default::default()).await?;
/// # Ok(())
/// # }
/// ```
pub struct Events {
    events: Vec<Arc<dyn RawEvent>>,
}

impl Events {
    /// Build the registry. Event names must be unique.
    pub fn new(events: Vec<Arc<dyn RawEvent>>) -> Self {
        assert!(!events.is_empty(), "at least one event must be registered");
        let mut seen = HashSet::new();
        for event in &events {
            assert!(
                seen.insert(event.name().to_owned()),
                "duplicate event name `{}`",
                event.name()
            );
        }
        Self { events }
    }

    /// Find a registered event by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn RawEvent>> {
        self.events.iter().find(|e| e.name() == name)
    }

    /// Connect to the broker, owning the connection.
    pub async fn connect(&self, server: &str) -> Result<ConnectedEvents, Error> {
        let client = async_nats::connect(server).await.map_err(Error::nats)?;
        Ok(self.with_client(client))
    }

    /// Use an already connected client.
    ///
    /// The client handle is shared, not owned: the same connection can run
    /// a publisher and a subscriber side by side, and dropping the
    /// [`ConnectedEvents`] does not close it as long as other handles are
    /// alive.
    pub fn with_client(&self, client: Client) -> ConnectedEvents {
        let js = jetstream::new(client.clone());
        ConnectedEvents {
            client,
            js,
            events: Arc::new(self.events.clone()),
        }
    }
}

impl std::fmt::Debug for Events {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.events.iter().map(|e| e.name()).collect();
        f.debug_struct("Events").field("events", &names).finish()
    }
}

/// An [`Events`] registry connected to the broker. Use it to emit events.
#[derive(Clone)]
pub struct ConnectedEvents {
    client: Client,
    js: jetstream::Context,
    events: Arc<Vec<Arc<dyn RawEvent>>>,
}

impl ConnectedEvents {
    /// Create (and/or update) the JetStream streams for all registered
    /// events.
    ///
    /// With `create` only, hitting an existing stream whose configuration
    /// differs fails with [`Error::StreamExists`]; add `update` to bring
    /// stream configurations up to date instead.
    pub async fn register(&self, create: bool, update: bool) -> Result<(), Error> {
        try_join_all(
            self.events
                .iter()
                .map(|event| event.sync(&self.js, create, update)),
        )
        .await?;
        Ok(())
    }

    /// Send an event into the broker. The event must be registered first.
    pub async fn emit<T, R>(
        &self,
        event: &Event<T, R>,
        message: &T,
        opts: EmitOpts,
    ) -> Result<(), Error> {
        debug_assert!(
            self.events.iter().any(|e| e.name() == event.name()),
            "event `{}` is not in the registry",
            event.name()
        );
        let payload = event.encode(message)?;
        let headers = make_headers(
            opts.uid.as_deref(),
            opts.trace_id.as_deref(),
            opts.delay,
            opts.meta.as_ref(),
            None,
            now_epoch(),
        );
        let subject = event.subject_name().to_string();
        if opts.sync {
            let published = match headers {
                Some(headers) => self
                    .js
                    .publish_with_headers(subject, headers, payload)
                    .await
                    .map_err(Error::nats)?,
                None => self.js.publish(subject, payload).await.map_err(Error::nats)?,
            };
            let ack = published.await.map_err(Error::nats)?;
            if ack.duplicate {
                tracing::debug!(
                    event = %event.name(),
                    "duplicate message dropped by the broker"
                );
            }
        } else {
            match headers {
                Some(headers) => self
                    .client
                    .publish_with_headers(subject, headers, payload)
                    .await
                    .map_err(Error::nats)?,
                None => self
                    .client
                    .publish(subject, payload)
                    .await
                    .map_err(Error::nats)?,
            }
        }
        Ok(())
    }

    /// Emit a message and wait for a response from the handling actor.
    ///
    /// The event must have been declared with
    /// [`Event::with_response`]. Exactly one response is returned even if
    /// several actors reply; the first one wins. Fails with
    /// [`Error::RequestTimeout`] when no response arrives in
    /// [`RequestOpts::timeout`].
    pub async fn request<T, R>(
        &self,
        event: &Event<T, R>,
        message: &T,
        opts: RequestOpts,
    ) -> Result<R, Error> {
        assert!(
            event.response_serializer().is_some(),
            "request requires an event declared with a response"
        );
        let payload = event.encode(message)?;
        let inbox = self.client.new_inbox();
        let mut sub = self
            .client
            .subscribe(inbox.clone())
            .await
            .map_err(Error::nats)?;
        let headers = make_headers(
            opts.uid.as_deref(),
            opts.trace_id.as_deref(),
            opts.delay,
            opts.meta.as_ref(),
            Some(&inbox),
            now_epoch(),
        )
        .unwrap_or_default();
        let result = async {
            let published = self
                .js
                .publish_with_headers(event.subject_name().to_string(), headers, payload)
                .await
                .map_err(Error::nats)?;
            published.await.map_err(Error::nats)?;
            match tokio::time::timeout(opts.timeout, sub.next()).await {
                Err(_) => Err(Error::RequestTimeout(opts.timeout)),
                Ok(None) => Err(Error::Nats("reply subscription closed".to_owned())),
                Ok(Some(msg)) => event.decode_response(&msg.payload),
            }
        }
        .await;
        if let Err(err) = sub.unsubscribe().await {
            tracing::debug!(error = %err, "failed to unsubscribe from reply inbox");
        }
        result
    }

    /// Live-feed of all registered events.
    ///
    /// Messages emitted while nobody is listening are not replayed; this is
    /// a debugging aid, not a durable consumer. Dropping the feed cancels
    /// the underlying subscriptions.
    pub fn monitor(&self) -> EventFeed {
        let (tx, rx) = mpsc::channel(256);
        let mut tasks = Vec::new();
        for event in self.events.iter() {
            let event = event.clone();
            let client = self.client.clone();
            let tx = tx.clone();
            tasks.push(tokio::spawn(async move {
                event.monitor(client, tx).await;
            }));
        }
        EventFeed { rx, tasks }
    }
}

impl std::fmt::Debug for ConnectedEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.events.iter().map(|e| e.name()).collect();
        f.debug_struct("ConnectedEvents")
            .field("events", &names)
            .finish_non_exhaustive()
    }
}

/// A decoded message observed by [`ConnectedEvents::monitor`].
pub struct FeedMessage {
    event: String,
    payload: Arc<dyn Any + Send + Sync>,
}

impl FeedMessage {
    pub(crate) fn new(event: String, payload: Arc<dyn Any + Send + Sync>) -> Self {
        Self { event, payload }
    }

    /// Name of the event the message belongs to.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// The decoded payload, if it is of type `T`.
    pub fn payload<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }
}

impl std::fmt::Debug for FeedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedMessage")
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}

/// Scoped live feed returned by [`ConnectedEvents::monitor`].
#[derive(Debug)]
pub struct EventFeed {
    rx: mpsc::Receiver<FeedMessage>,
    tasks: Vec<JoinHandle<()>>,
}

impl EventFeed {
    /// Wait for the next observed message.
    pub async fn next(&mut self) -> Option<FeedMessage> {
        self.rx.recv().await
    }
}

impl Drop for EventFeed {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Event;

    fn header<'a>(map: &'a HeaderMap, name: &str) -> Option<&'a str> {
        map.get(name).map(|v| v.as_str())
    }

    #[test]
    fn uid_becomes_msg_id() {
        let map = make_headers(Some("uid-1"), None, None, None, None, 0.0).unwrap();
        assert_eq!(header(&map, "Nats-Msg-Id"), Some("uid-1"));
    }

    #[test]
    fn cloud_event_id_is_msg_id_fallback() {
        let meta = Meta::CloudEvent(CloudEvent::new("ce-41", "/orders", "order-placed"));
        let map = make_headers(None, None, None, Some(&meta), None, 0.0).unwrap();
        assert_eq!(header(&map, "Nats-Msg-Id"), Some("ce-41"));
        assert_eq!(header(&map, "ce-specversion"), Some("1.0"));

        // an explicit uid wins over the CloudEvent id
        let map = make_headers(Some("uid-1"), None, None, Some(&meta), None, 0.0).unwrap();
        assert_eq!(header(&map, "Nats-Msg-Id"), Some("uid-1"));
    }

    #[test]
    fn trace_and_reply_headers() {
        let map = make_headers(None, Some("trace-7"), None, None, Some("_INBOX.x"), 0.0).unwrap();
        assert_eq!(header(&map, "Walnats-Trace"), Some("trace-7"));
        assert_eq!(header(&map, "Walnats-Reply"), Some("_INBOX.x"));
    }

    #[test]
    fn delay_is_absolute_epoch_seconds() {
        let now = 1_670_000_000.0;
        let map = make_headers(None, None, Some(Duration::from_millis(1500)), None, None, now)
            .unwrap();
        let value: f64 = header(&map, "Walnats-Delay").unwrap().parse().unwrap();
        assert!((value - (now + 1.5)).abs() < 1e-6);
    }

    #[test]
    fn plain_meta_is_merged() {
        let meta = Meta::Headers(vec![("x-team".to_owned(), "logistics".to_owned())]);
        let map = make_headers(None, None, None, Some(&meta), None, 0.0).unwrap();
        assert_eq!(header(&map, "x-team"), Some("logistics"));
        assert_eq!(header(&map, "Nats-Msg-Id"), None);
    }

    #[test]
    fn no_headers_means_none() {
        assert!(make_headers(None, None, None, None, None, 0.0).is_none());
    }

    #[test]
    #[should_panic(expected = "duplicate event name")]
    fn duplicate_names_are_rejected() {
        let a = Event::<String>::new("same");
        let b = Event::<u64>::new("same");
        Events::new(vec![a.raw(), b.raw()]);
    }
}
