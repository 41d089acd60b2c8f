//! Event delivery thread: moves raw backend events onto the [`EventQueue`].

use std::sync::Arc;

use tracing::debug;
use tracing::error;
use tracing::trace;

use super::EventQueue;
use crate::backend::Backend;
use crate::backend::BackendEvent;
use crate::Error;

/// Body of the delivery thread.
///
/// Blocks in [`Backend::next_event`] until the backend hands over its shutdown
/// marker. A closed handle ends the thread quietly; any other backend error is
/// logged and ends it too.
pub(crate) fn run_delivery_loop(
    backend: Arc<dyn Backend>,
    queue: Arc<EventQueue>,
) {
    debug!("event delivery thread started");

    loop {
        match backend.next_event() {
            Ok(BackendEvent::Event(event)) => {
                trace!(req_id = %event.req_id(), "queueing backend event");
                queue.push(event);
            }
            Ok(BackendEvent::Shutdown) => {
                debug!("event delivery received shutdown marker");
                break;
            }
            Err(Error::HandleClosed) => {
                debug!("backend handle already closed");
                break;
            }
            Err(e) => {
                error!(error = %e, "backend failed to deliver events");
                break;
            }
        }
    }

    debug!("event delivery thread stopped");
}
