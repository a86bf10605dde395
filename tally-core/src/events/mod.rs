//! Run lifecycle events.
//!
//! The runner publishes progress through a handler trait; external
//! collaborators (notification transports, audit sinks, schedulers)
//! subscribe by installing a handler on the dispatcher. Handlers must
//! be fast and non-blocking — they run on the worker thread.

pub mod dispatcher;
pub mod handler;
pub mod types;

pub use dispatcher::EventDispatcher;
pub use handler::TallyEventHandler;
