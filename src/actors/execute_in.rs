/// Where the handler runs.
///
/// Async handlers run on the dispatcher. Handlers built with
/// [`Actor::blocking`](crate::Actor::blocking) run off it, on one of two
/// separately bounded lanes of the blocking thread pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ExecuteIn {
    /// Await the async handler on the dispatcher thread.
    ///
    /// The right choice for async handlers and for sync handlers fast
    /// enough to not stall the event loop.
    #[default]
    Main,

    /// Run the sync handler on the blocking lane.
    ///
    /// Use it for slow IO-bound handlers that cannot be async. The lane is
    /// bounded by the `max_threads` option of
    /// [`ConnectedActors::listen`](crate::ConnectedActors::listen).
    Blocking,

    /// Run the sync handler on the compute lane.
    ///
    /// Use it for CPU-bound handlers so they cannot starve the IO-bound
    /// lane. Bounded by the `max_compute` option of
    /// [`ConnectedActors::listen`](crate::ConnectedActors::listen),
    /// defaulting to the number of CPUs.
    Compute,
}
