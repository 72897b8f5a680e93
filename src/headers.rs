//! Reserved message headers.
//!
//! These names are part of the wire protocol and never change.

/// Deduplication id, consumed by the broker itself.
pub const MSG_ID: &str = "Nats-Msg-Id";

/// Inbox subject the response should be published to (request/reply).
///
/// The broker's native reply header cannot be reused here because JetStream
/// occupies it for ack coordination.
pub const REPLY: &str = "Walnats-Reply";

/// Opaque trace id for distributed tracing.
pub const TRACE: &str = "Walnats-Trace";

/// UTC epoch seconds (as a decimal string) before which actors must nak the
/// message back with the remaining delay instead of running the handler.
pub const DELAY: &str = "Walnats-Delay";
