#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub
)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! Typed NATS JetStream actor framework for event-driven background jobs
//! and microservices.
//!
//! - Declare typed [`Event`]s and durable [`Actor`]s, connect them to the
//!   broker, and let the runtime pull, decode, dispatch, and ack.
//! - At-least-once delivery with per-actor retry backoff and in-progress
//!   pulses for long jobs.
//! - Three-tier concurrency control: poll, per-actor, and process-wide,
//!   with priority-aware scheduling.
//! - Delayed messages, deduplication ids, request/reply over an inbox,
//!   CloudEvents metadata, middleware hooks.
//!
//! Publisher side:
//! ```rust,no_run
//! # async fn example() -> Result<(), walnats::Error> {
//! let user_created = walnats::Event::<String>::new("user-created");
//! let events = walnats::Events::new(vec![user_created.raw()]);
//! let conn = events.connect("nats://localhost:4222").await?;
//! conn.register(true, false).await?;
//! conn.emit(&user_created, &"mark".to_string(), Default::default())
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! Subscriber side:
//! ```rust,no_run
//! use walnats::{Actor, Actors, Event, ListenOpts};
//!
//! async fn send_email(user: String) -> Result<(), walnats::BoxError> {
//!     println!("sending email to {user}");
//!     Ok(())
//! }
//!
//! # async fn example() -> Result<(), walnats::Error> {
//! let user_created = Event::<String>::new("user-created");
//! let send_email = Actor::new("send-email", user_created, send_email);
//! let actors = Actors::new(vec![send_email.raw()]);
//! let conn = actors.connect("nats://localhost:4222").await?;
//! conn.register().await?;
//! conn.listen(ListenOpts::default()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Exactly one instance of an actor receives each message, so both sides
//! can run on as many machines as needed. Handler failures are logged,
//! nak'ed with the actor's retry schedule, and delivered to
//! [`middlewares`] hooks; they never take the subscription down.

pub mod decorators;
pub mod headers;
pub mod middlewares;
pub mod serializers;

mod actors;
mod context;
mod errors;
mod events;
mod tasks;

pub use actors::{Actor, Actors, ConnectedActors, ExecuteIn, ListenContext, ListenOpts, Priority, RawActor};
pub use context::{Context, ErrorContext, Failure, FailureKind, Metadata, OkContext};
pub use errors::{BoxError, Error};
pub use events::{
    Clock, CloudEvent, ConnectedEvents, EmitOpts, Event, EventFeed, Events, FeedMessage, Limits,
    Meta, RawEvent, RequestOpts,
};

pub use async_nats::{Client, ConnectError, ConnectOptions};

/// Connect to a NATS server without authentication.
///
/// Useful for sharing one connection between
/// [`Events::with_client`] and [`Actors::with_client`]; for credentials or
/// other advanced options, build the client through [`ConnectOptions`]
/// instead.
pub async fn connect(url: &str) -> Result<Client, ConnectError> {
    async_nats::connect(url).await
}
