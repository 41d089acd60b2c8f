use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::Event;
use crate::HandlerError;

/// Caller supplied value handed back alongside every event for a request.
pub type Context = Arc<dyn Any + Send + Sync>;

pub type HandlerResult = std::result::Result<(), HandlerError>;

/// What a handler receives: the event plus the context registered with it.
#[derive(Clone)]
pub struct Notification {
    pub event: Event,
    pub context: Option<Context>,
}

impl Notification {
    /// Downcast the registered context.
    pub fn context<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.context.as_ref().and_then(|c| c.downcast_ref::<T>())
    }
}

impl fmt::Debug for Notification {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Notification")
            .field("event", &self.event)
            .field("has_context", &self.context.is_some())
            .finish()
    }
}

/// User callback for completions and watchers.
///
/// Runs on the dispatch thread. Returned errors and panics are caught and
/// logged; they never stop delivery of later events.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(
        &self,
        notification: &Notification,
    ) -> HandlerResult;
}

impl<F> EventHandler for F
where
    F: Fn(&Notification) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(
        &self,
        notification: &Notification,
    ) -> HandlerResult {
        self(notification)
    }
}

pub type SharedHandler = Arc<dyn EventHandler>;

/// Wrap a closure as a shareable handler.
pub fn handler<F>(f: F) -> SharedHandler
where
    F: Fn(&Notification) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}
