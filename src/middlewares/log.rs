use async_trait::async_trait;

use crate::context::{Context, ErrorContext, OkContext};

use super::Middleware;

/// Write a structured log record on every stage of message handling.
///
/// Start and success are logged at debug level, failures at error level,
/// all with actor/event/attempt fields attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMiddleware;

#[async_trait]
impl Middleware for LogMiddleware {
    async fn on_start(&self, ctx: &Context) {
        tracing::debug!(
            actor = ctx.actor_name(),
            event = ctx.event_name(),
            attempt = ctx.attempts(),
            "event received"
        );
    }

    async fn on_success(&self, ctx: &OkContext) {
        tracing::debug!(
            actor = ctx.actor_name(),
            event = ctx.event_name(),
            attempt = ctx.attempts(),
            duration = ctx.duration().as_secs_f64(),
            "event processed"
        );
    }

    async fn on_failure(&self, ctx: &ErrorContext) {
        tracing::error!(
            actor = ctx.actor_name(),
            event = ctx.event_name(),
            attempt = ctx.attempts(),
            kind = %ctx.kind(),
            error = %ctx.failure(),
            "actor failed"
        );
    }
}
