//! Dispatch thread
//!
//! Pops events from the [`EventQueue`], resolves them against the
//! [`RequestRegistry`] and runs the matching handler with the registry lock
//! released.
//!
//! ```text
//!   Idle ──(connection running)──► Draining ──(marker, or stopped and queue empty)──► Stopped
//! ```
//!
//! Each spawned dispatch thread owns its own [`DispatchStatus`], so a thread
//! left over from an earlier session never overwrites the state of its
//! successor.

use std::any::Any;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::Event;
use super::EventQueue;
use super::HandlerEntry;
use super::Notification;
use super::QueueItem;
use super::RequestRegistry;
use crate::metrics::DISPATCHED_EVENTS;
use crate::metrics::EVENT_QUEUE_DEPTH;
use crate::metrics::HANDLER_FAILURES;
use crate::metrics::ORPHAN_EVENTS;
use crate::metrics::SESSION_REARMS;

/// Outcome of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DispatchState {
    /// Spawned, not yet looping
    Idle = 0,
    /// Popping and dispatching events
    Draining = 1,
    Stopped = 2,
}

impl DispatchState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => DispatchState::Idle,
            1 => DispatchState::Draining,
            _ => DispatchState::Stopped,
        }
    }
}

/// Dispatch state shared between the dispatch thread and its owner.
#[derive(Debug)]
pub struct DispatchStatus(AtomicU8);

impl Default for DispatchStatus {
    fn default() -> Self {
        Self::new(DispatchState::Stopped)
    }
}

impl DispatchStatus {
    pub fn new(state: DispatchState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> DispatchState {
        DispatchState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(
        &self,
        state: DispatchState,
    ) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Resolves events to handlers and invokes them.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<RequestRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<RequestRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver one event. Returns `false` when no handler was registered for it.
    pub fn dispatch(
        &self,
        event: Event,
    ) -> bool {
        let req_id = event.req_id();

        match &event {
            Event::Completion(_) => match self.registry.resolve_completion(req_id) {
                Some(entry) => {
                    self.invoke(&entry, event, "completion");
                    true
                }
                None => {
                    self.orphan(&event, "completion");
                    false
                }
            },

            Event::Watch(watch) => {
                let session = watch.event_type.is_session();

                if let Some(entry) = self.registry.resolve_watcher(req_id, watch.event_type) {
                    self.invoke(&entry, event, "watch");
                    if session && !req_id.is_global() {
                        self.registry.restore_watcher(req_id, entry);
                        SESSION_REARMS.with_label_values(&["watch"]).inc();
                    }
                    return true;
                }

                // A session notice for a call that is still waiting on its
                // response goes to the completion, which stays registered.
                if session {
                    if let Some(entry) = self.registry.peek_completion(req_id) {
                        self.invoke(&entry, event, "session");
                        self.registry.restore_completion(req_id, entry);
                        SESSION_REARMS.with_label_values(&["completion"]).inc();
                        return true;
                    }
                }

                self.orphan(&event, "watch");
                false
            }
        }
    }

    fn invoke(
        &self,
        entry: &HandlerEntry,
        event: Event,
        kind: &'static str,
    ) {
        let req_id = event.req_id();
        let notification = Notification {
            event,
            context: entry.context.clone(),
        };

        trace!(%req_id, kind, "invoking handler");
        match panic::catch_unwind(AssertUnwindSafe(|| entry.handler.handle(&notification))) {
            Ok(Ok(())) => {
                DISPATCHED_EVENTS.with_label_values(&[kind]).inc();
            }
            Ok(Err(e)) => {
                error!(%req_id, kind, error = %e, "handler returned an error");
                HANDLER_FAILURES.with_label_values(&["error"]).inc();
            }
            Err(payload) => {
                error!(%req_id, kind, panic = panic_message(&payload), "handler panicked");
                HANDLER_FAILURES.with_label_values(&["panic"]).inc();
            }
        }
    }

    fn orphan(
        &self,
        event: &Event,
        kind: &'static str,
    ) {
        warn!(
            req_id = %event.req_id(),
            kind,
            path = event.path().unwrap_or(""),
            "Duplicate or unhandled event, dropping"
        );
        ORPHAN_EVENTS.with_label_values(&[kind]).inc();
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Pop and dispatch a single queue item.
///
/// Once the connection is no longer running the loop keeps going only while
/// events are still queued.
pub(crate) fn dispatch_once(
    queue: &EventQueue,
    dispatcher: &Dispatcher,
    running: &AtomicBool,
) -> LoopControl {
    let item = queue.pop_item(true);
    EVENT_QUEUE_DEPTH.set(queue.len() as i64);

    match item {
        None | Some(QueueItem::Shutdown) => LoopControl::Stop,
        Some(QueueItem::Event(event)) => {
            dispatcher.dispatch(event);

            if running.load(Ordering::Acquire) || !queue.is_empty() {
                LoopControl::Continue
            } else {
                LoopControl::Stop
            }
        }
    }
}

/// Body of the dispatch thread.
pub(crate) fn run_dispatch_loop(
    queue: Arc<EventQueue>,
    dispatcher: Dispatcher,
    running: Arc<AtomicBool>,
    status: Arc<DispatchStatus>,
) {
    debug!("dispatch thread started");
    if running.load(Ordering::Acquire) {
        status.set(DispatchState::Draining);
    }

    while dispatch_once(&queue, &dispatcher, &running) == LoopControl::Continue {}

    status.set(DispatchState::Stopped);
    debug!(remaining = queue.len(), "dispatch thread stopped");
}
