use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::Context;
use crate::HandlerEntry;
use crate::HandlerResult;
use crate::Notification;
use crate::SharedHandler;

/// Per-call handlers.
///
/// A callback makes the call asynchronous: it returns as soon as the backend
/// accepted it and the callback later receives the completion. A watcher is
/// only accepted by operations that can leave a watch behind.
#[derive(Clone, Default)]
pub struct CallOptions {
    pub(crate) callback: Option<SharedHandler>,
    pub(crate) callback_context: Option<Context>,
    pub(crate) watcher: Option<SharedHandler>,
    pub(crate) watcher_context: Option<Context>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback<F>(
        self,
        f: F,
    ) -> Self
    where
        F: Fn(&Notification) -> HandlerResult + Send + Sync + 'static,
    {
        self.callback_handler(Arc::new(f))
    }

    pub fn callback_handler(
        mut self,
        handler: SharedHandler,
    ) -> Self {
        self.callback = Some(handler);
        self
    }

    pub fn callback_context<T: Any + Send + Sync>(
        mut self,
        context: T,
    ) -> Self {
        self.callback_context = Some(Arc::new(context));
        self
    }

    pub fn watcher<F>(
        self,
        f: F,
    ) -> Self
    where
        F: Fn(&Notification) -> HandlerResult + Send + Sync + 'static,
    {
        self.watcher_handler(Arc::new(f))
    }

    pub fn watcher_handler(
        mut self,
        handler: SharedHandler,
    ) -> Self {
        self.watcher = Some(handler);
        self
    }

    pub fn watcher_context<T: Any + Send + Sync>(
        mut self,
        context: T,
    ) -> Self {
        self.watcher_context = Some(Arc::new(context));
        self
    }

    pub fn is_async(&self) -> bool {
        self.callback.is_some()
    }

    pub fn has_watcher(&self) -> bool {
        self.watcher.is_some()
    }

    pub(crate) fn into_entries(self) -> (Option<HandlerEntry>, Option<HandlerEntry>) {
        let completion = self
            .callback
            .map(|handler| HandlerEntry::new(handler, self.callback_context));
        let watcher = self
            .watcher
            .map(|handler| HandlerEntry::new(handler, self.watcher_context));
        (completion, watcher)
    }
}

impl fmt::Debug for CallOptions {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("callback", &self.callback.is_some())
            .field("watcher", &self.watcher.is_some())
            .finish()
    }
}
