//! Hooks triggered at different stages of message handling.
//!
//! Most of the time, regular [decorators](crate::decorators) are a better
//! fit. Middlewares are useful when extra context is needed, like how many
//! times a message was redelivered. In particular: logs, metrics, alerts.
//! Middlewares cannot be used for flow control: every hook is dispatched
//! fire-and-forget, and nothing a hook does can affect the message
//! acknowledgement.

mod log;
mod wrappers;

pub use log::LogMiddleware;
pub use wrappers::{ErrorThresholdMiddleware, FrequencyMiddleware};

use async_trait::async_trait;

use crate::context::{Context, ErrorContext, OkContext};

/// Hooks into the lifecycle of message handling.
///
/// All hooks default to no-ops; implement only the ones needed.
///
/// ```
/// use async_trait::async_trait;
/// use walnats::middlewares::Middleware;
/// use walnats::ErrorContext;
///
/// struct AlertOnFailure;
///
/// #[async_trait]
/// impl Middleware for AlertOnFailure {
///     async fn on_failure(&self, ctx: &ErrorContext) {
///         eprintln!("actor {} failed: {}", ctx.actor_name(), ctx.failure());
///     }
/// }
/// ```
#[async_trait]
pub trait Middleware: Send + Sync {
    /// The payload is decoded and the handler is about to start.
    async fn on_start(&self, _ctx: &Context) {}

    /// The handler finished successfully and the message is acked.
    async fn on_success(&self, _ctx: &OkContext) {}

    /// Decoding or the handler failed and the message is nak'ed.
    async fn on_failure(&self, _ctx: &ErrorContext) {}
}
