//! Request Registry
//!
//! Correlates request ids with the handlers waiting on them. Two tables sit
//! behind one lock:
//!
//! - completions: one-shot, removed when the matching response is resolved
//! - watchers: single-fire, except the global watcher and session events
//!
//! The lock is only held for map operations. Handlers are cloned out and run
//! by the dispatch thread with the lock released, so a handler may issue new
//! calls without deadlocking.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use tracing::debug;
use tracing::trace;

use super::Context;
use super::EventType;
use super::RequestId;
use super::SharedHandler;
use crate::constants::FIRST_REQ_ID;

/// Handler plus the context it was registered with.
#[derive(Clone)]
pub struct HandlerEntry {
    pub handler: SharedHandler,
    pub context: Option<Context>,
}

impl HandlerEntry {
    pub fn new(
        handler: SharedHandler,
        context: Option<Context>,
    ) -> Self {
        Self { handler, context }
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("has_context", &self.context.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct RegistryInner {
    next_id: i64,
    completions: HashMap<RequestId, HandlerEntry>,
    watchers: HashMap<RequestId, HandlerEntry>,
}

/// Entries discarded by [`RequestRegistry::clear_for_reopen`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClearedEntries {
    pub watchers: usize,
    pub completions: usize,
}

#[derive(Debug)]
pub struct RequestRegistry {
    inner: Mutex<RegistryInner>,
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                next_id: FIRST_REQ_ID,
                completions: HashMap::new(),
                watchers: HashMap::new(),
            }),
        }
    }

    /// Hand out a fresh request id and record the handlers for it.
    pub fn allocate(
        &self,
        completion: Option<HandlerEntry>,
        watcher: Option<HandlerEntry>,
    ) -> RequestId {
        let mut inner = self.inner.lock();
        let req_id = RequestId::new(inner.next_id);
        inner.next_id += 1;

        if let Some(entry) = completion {
            inner.completions.insert(req_id, entry);
        }
        if let Some(entry) = watcher {
            inner.watchers.insert(req_id, entry);
        }

        trace!(%req_id, "request allocated");
        req_id
    }

    /// Remove and return the completion for `req_id`.
    pub fn resolve_completion(
        &self,
        req_id: RequestId,
    ) -> Option<HandlerEntry> {
        self.inner.lock().completions.remove(&req_id)
    }

    /// Return the completion for `req_id` without consuming it.
    pub fn peek_completion(
        &self,
        req_id: RequestId,
    ) -> Option<HandlerEntry> {
        self.inner.lock().completions.get(&req_id).cloned()
    }

    /// Return the watcher for `req_id`.
    ///
    /// The global watcher and any watcher hit by a session event stay
    /// registered; every other watcher is removed (single fire).
    pub fn resolve_watcher(
        &self,
        req_id: RequestId,
        event_type: EventType,
    ) -> Option<HandlerEntry> {
        let mut inner = self.inner.lock();
        if req_id.is_global() || event_type.is_session() {
            inner.watchers.get(&req_id).cloned()
        } else {
            inner.watchers.remove(&req_id)
        }
    }

    /// Put a completion back unless one is already registered.
    pub fn restore_completion(
        &self,
        req_id: RequestId,
        entry: HandlerEntry,
    ) {
        self.inner.lock().completions.entry(req_id).or_insert(entry);
    }

    /// Put a watcher back unless one is already registered.
    pub fn restore_watcher(
        &self,
        req_id: RequestId,
        entry: HandlerEntry,
    ) {
        self.inner.lock().watchers.entry(req_id).or_insert(entry);
    }

    /// Forget everything registered under `req_id`.
    pub fn discard(
        &self,
        req_id: RequestId,
    ) {
        let mut inner = self.inner.lock();
        inner.completions.remove(&req_id);
        if !req_id.is_global() {
            inner.watchers.remove(&req_id);
        }
    }

    /// Forget the watcher registered under `req_id`, leaving any completion.
    pub fn discard_watcher(
        &self,
        req_id: RequestId,
    ) {
        if !req_id.is_global() {
            self.inner.lock().watchers.remove(&req_id);
        }
    }

    pub fn install_global_watcher(
        &self,
        entry: HandlerEntry,
    ) {
        self.inner.lock().watchers.insert(RequestId::GLOBAL, entry);
    }

    /// Drop every pending entry and re-install the global watcher.
    ///
    /// Callers must re-arm their watches after a reopen. Pending completions
    /// belong to the previous session and are dropped as well.
    pub fn clear_for_reopen(
        &self,
        global: HandlerEntry,
    ) -> ClearedEntries {
        let mut inner = self.inner.lock();

        let cleared = ClearedEntries {
            watchers: inner.watchers.keys().filter(|id| !id.is_global()).count(),
            completions: inner.completions.len(),
        };

        inner.watchers.clear();
        inner.completions.clear();
        inner.watchers.insert(RequestId::GLOBAL, global);

        debug!(
            dropped_watchers = cleared.watchers,
            dropped_completions = cleared.completions,
            "registry cleared for reopen"
        );
        cleared
    }

    pub fn has_completion(
        &self,
        req_id: RequestId,
    ) -> bool {
        self.inner.lock().completions.contains_key(&req_id)
    }

    pub fn has_watcher(
        &self,
        req_id: RequestId,
    ) -> bool {
        self.inner.lock().watchers.contains_key(&req_id)
    }

    pub fn pending_completions(&self) -> usize {
        self.inner.lock().completions.len()
    }

    /// Number of watchers, the global watcher included.
    pub fn pending_watchers(&self) -> usize {
        self.inner.lock().watchers.len()
    }
}
