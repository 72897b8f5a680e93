//! Encoding and decoding of event payloads.
//!
//! Every [`Event`](crate::Event) owns a serializer. [`Event::new`] picks
//! [`JsonSerializer`], the right default for typed structs, primitives and
//! chrono types. Protobuf, raw-bytes and bare ISO-8601 payloads, as well as
//! the compression/signing/encryption wrappers, are opted into with
//! [`Event::with_serializer`](crate::Event::with_serializer).
//!
//! [`Event::new`]: crate::Event::new

mod basic;
mod wrappers;

pub use basic::{DatetimeSerializer, JsonSerializer, ProtobufSerializer, RawSerializer};
pub use wrappers::{FernetSerializer, GzipSerializer, HmacSerializer};

use bytes::Bytes;

use crate::errors::BoxError;

/// Turn a message into bytes and back again.
///
/// Implementations must round-trip: `decode(encode(x)) == x`.
pub trait Serializer<T>: Send + Sync {
    /// Turn a message into the payload bytes to publish.
    fn encode(&self, message: &T) -> Result<Bytes, BoxError>;

    /// Turn received payload bytes back into a message.
    fn decode(&self, data: &[u8]) -> Result<T, BoxError>;
}
