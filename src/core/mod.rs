//! Asynchronous dispatch engine.
//!
//! ```text
//! backend ─► delivery thread ─► EventQueue ─► dispatch thread ─► handlers
//!                                                  │
//!                                           RequestRegistry
//! ```

mod connection;
mod delivery;
mod dispatcher;
mod event;
mod event_queue;
mod handler;
mod registry;

pub use connection::*;
pub use dispatcher::DispatchState;
pub use dispatcher::DispatchStatus;
pub use dispatcher::Dispatcher;
pub use dispatcher::LoopControl;
pub use event::*;
pub use event_queue::EventQueue;
pub use event_queue::ReadinessHandle;
pub(crate) use event_queue::QueueItem;
pub use handler::*;
pub use registry::*;

#[cfg(test)]
mod connection_test;
#[cfg(test)]
mod delivery_test;
#[cfg(test)]
mod event_queue_test;
