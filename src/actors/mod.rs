mod actor;
mod execute_in;
mod priority;
mod registry;

pub use actor::{Actor, ListenContext, RawActor};
pub use execute_in::ExecuteIn;
pub use priority::Priority;
pub use registry::{Actors, ConnectedActors, ListenOpts};
