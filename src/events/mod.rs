mod clock;
mod cloud_event;
mod event;
mod registry;

pub use clock::Clock;
pub use cloud_event::CloudEvent;
pub use event::{Event, Limits, RawEvent};
pub use registry::{
    ConnectedEvents, EmitOpts, EventFeed, Events, FeedMessage, Meta, RequestOpts,
};

pub(crate) use event::validate_name;
pub(crate) use registry::now_epoch;
