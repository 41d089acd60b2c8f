//! Lifecycle coordinator
//!
//! Owns the backend handle, the event queue and the two worker threads, and
//! sequences open, close and reopen under the lifecycle lock.
//!
//! Lock order: operation guard, lifecycle lock, registry lock. The operation
//! guard serializes `open`, `close` and `reopen` as whole operations, so a
//! reopen is never split by a concurrent open and a second close only returns
//! once the first one has finished. The registry lock is only taken inside the
//! lifecycle lock when the registry is cleared on (re)open. Threads are joined
//! with the lifecycle lock released so a handler running on the dispatch
//! thread can still reach the connection.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use crossbeam_channel::bounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::delivery::run_delivery_loop;
use super::dispatcher::run_dispatch_loop;
use super::handler;
use super::ConnectionState;
use super::DispatchState;
use super::DispatchStatus;
use super::Dispatcher;
use super::Event;
use super::EventQueue;
use super::HandlerEntry;
use super::ReadinessHandle;
use super::RequestId;
use super::RequestRegistry;
use crate::backend::Backend;
use crate::backend::ConnectionTarget;
use crate::backend::SessionInfo;
use crate::ClientConfig;
use crate::DispatchMode;
use crate::Error;
use crate::Result;

struct DispatchThread {
    handle: JoinHandle<()>,
    /// Disconnects when the thread body returns
    done: Receiver<()>,
    status: Arc<DispatchStatus>,
}

#[derive(Default)]
struct Lifecycle {
    queue: Option<Arc<EventQueue>>,
    delivery: Option<JoinHandle<()>>,
    dispatch: Option<DispatchThread>,
}

/// One backend session plus the threads that deliver its events.
pub struct Connection {
    target: ConnectionTarget,
    config: ClientConfig,
    backend: Arc<dyn Backend>,
    registry: Arc<RequestRegistry>,
    dispatcher: Dispatcher,
    global_watcher: HandlerEntry,

    ops: Mutex<()>,
    lifecycle: Mutex<Lifecycle>,
    /// Written only with the lifecycle lock held
    running: Arc<AtomicBool>,
    /// Written only with the lifecycle lock held
    closed: AtomicBool,
}

impl std::fmt::Debug for Connection {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.target)
            .field("running", &self.is_running())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Create an unopened connection. Call [`Self::open`] to start the session.
    pub fn new(
        target: ConnectionTarget,
        config: ClientConfig,
        backend: Arc<dyn Backend>,
        global_watcher: Option<HandlerEntry>,
    ) -> Self {
        let registry = Arc::new(RequestRegistry::new());
        Self {
            target,
            config,
            backend,
            dispatcher: Dispatcher::new(registry.clone()),
            registry,
            global_watcher: global_watcher.unwrap_or_else(default_global_watcher),
            ops: Mutex::new(()),
            lifecycle: Mutex::new(Lifecycle::default()),
            running: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(true),
        }
    }

    /// Start a session and the worker threads.
    ///
    /// Waits up to `timeout` for the backend to report `Connected`. The wait is
    /// advisory: the state reached is returned either way.
    pub fn open(
        &self,
        timeout: Duration,
    ) -> Result<ConnectionState> {
        let _ops = self.ops.lock();
        self.open_locked(timeout)
    }

    fn open_locked(
        &self,
        timeout: Duration,
    ) -> Result<ConnectionState> {
        let mut lifecycle = self.lifecycle.lock();
        if self.is_running() {
            return Err(Error::BadArguments("connection is already open".to_string()));
        }

        let cleared = self.registry.clear_for_reopen(self.global_watcher.clone());
        if cleared.watchers > 0 || cleared.completions > 0 {
            info!(
                watchers = cleared.watchers,
                completions = cleared.completions,
                "dropped registrations of the previous session"
            );
        }

        let queue = Arc::new(EventQueue::new(self.config.clear_reads_on_pop)?);

        self.backend.init(&self.target, self.config.session_timeout())?;
        self.closed.store(false, Ordering::Release);

        let state = self.wait_for_connected(timeout);
        if state != ConnectionState::Connected {
            warn!(target = %self.target, ?state, ?timeout, "session not connected after open timeout");
        }

        lifecycle.queue = Some(queue.clone());
        self.running.store(true, Ordering::Release);

        let delivery = {
            let backend = self.backend.clone();
            let queue = queue.clone();
            thread::Builder::new()
                .name("zk-event-delivery".to_string())
                .spawn(move || run_delivery_loop(backend, queue))?
        };
        lifecycle.delivery = Some(delivery);

        if self.config.dispatch_mode == DispatchMode::Thread {
            lifecycle.dispatch = Some(self.spawn_dispatch(queue)?);
        }

        info!(target = %self.target, ?state, mode = ?self.config.dispatch_mode, "connection opened");
        Ok(state)
    }

    fn spawn_dispatch(
        &self,
        queue: Arc<EventQueue>,
    ) -> Result<DispatchThread> {
        let (done_tx, done) = bounded::<()>(0);
        let dispatcher = self.dispatcher.clone();
        let running = self.running.clone();
        let status = Arc::new(DispatchStatus::new(DispatchState::Idle));

        let handle = {
            let status = status.clone();
            thread::Builder::new()
                .name("zk-dispatch".to_string())
                .spawn(move || {
                    let _done = done_tx;
                    run_dispatch_loop(queue, dispatcher, running, status);
                })?
        };

        Ok(DispatchThread { handle, done, status })
    }

    fn wait_for_connected(
        &self,
        timeout: Duration,
    ) -> ConnectionState {
        // No deadline when the timeout does not fit into an Instant.
        let deadline = Instant::now().checked_add(timeout);
        let interval = self.config.connect_poll_interval();

        loop {
            let state = self.backend.state();
            if state == ConnectionState::Connected {
                return state;
            }
            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return state;
                    }
                    interval.min(deadline - now)
                }
                None => interval,
            };
            thread::sleep(pause);
        }
    }

    /// Stop the worker threads and release the backend handle.
    ///
    /// Safe to call repeatedly and from a handler. Never waits longer than the
    /// configured grace period for the dispatch thread. A close issued by a
    /// handler while another thread is closing waits for that close to finish.
    pub fn close(&self) -> Result<()> {
        let _ops = self.ops.lock();
        self.close_locked()
    }

    fn close_locked(&self) -> Result<()> {
        let (queue, delivery, dispatch) = {
            let mut lifecycle = self.lifecycle.lock();
            if self.is_closed() && !self.is_running() {
                return Ok(());
            }
            self.running.store(false, Ordering::Release);
            (
                lifecycle.queue.clone(),
                lifecycle.delivery.take(),
                lifecycle.dispatch.take(),
            )
        };
        debug!(target = %self.target, "closing connection");

        self.backend.wake_event_loop();
        if let Some(delivery) = delivery {
            if delivery.join().is_err() {
                warn!("event delivery thread panicked");
            }
        }

        if let Some(queue) = &queue {
            queue.push_shutdown();
        }
        if let Some(dispatch) = dispatch {
            self.wait_for_dispatch(dispatch);
        }

        let mut lifecycle = self.lifecycle.lock();
        let result = if self.closed.swap(true, Ordering::AcqRel) {
            Ok(())
        } else {
            self.backend.close_handle()
        };
        if let Some(queue) = lifecycle.queue.take() {
            queue.close();
        }

        info!(target = %self.target, "connection closed");
        result
    }

    fn wait_for_dispatch(
        &self,
        dispatch: DispatchThread,
    ) {
        if dispatch.handle.thread().id() == thread::current().id() {
            debug!("close called from the dispatch thread; not waiting for it");
            return;
        }

        let grace = self.config.dispatch_join_grace();
        match dispatch.done.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if dispatch.handle.join().is_err() {
                    warn!("dispatch thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "dispatch thread did not stop within the grace period, detaching it"
                );
            }
        }
    }

    /// Close, then open a fresh session.
    ///
    /// Watchers and pending completions of the old session are dropped; the
    /// global watcher is re-installed. Request ids keep increasing. No other
    /// open or close can run between the two halves.
    pub fn reopen(
        &self,
        timeout: Duration,
    ) -> Result<ConnectionState> {
        let _ops = self.ops.lock();
        self.close_locked()?;
        self.open_locked(timeout)
    }

    /// Register handlers and return the id to tag the backend call with.
    pub fn allocate_request(
        &self,
        completion: Option<HandlerEntry>,
        watcher: Option<HandlerEntry>,
    ) -> RequestId {
        self.registry.allocate(completion, watcher)
    }

    /// Pop the next queued event. `None` when not running or nothing is queued.
    pub fn get_next_event(
        &self,
        blocking: bool,
    ) -> Option<Event> {
        if !self.is_running() {
            return None;
        }
        let queue = self.lifecycle.lock().queue.clone()?;
        queue.pop(blocking)
    }

    /// Pop one event and run its handler on the calling thread.
    ///
    /// Returns `false` when there was nothing to dispatch.
    pub fn dispatch_next_callback(
        &self,
        blocking: bool,
    ) -> bool {
        match self.get_next_event(blocking) {
            Some(event) => {
                self.dispatcher.dispatch(event);
                true
            }
            None => false,
        }
    }

    /// Read end of the current queue's readiness pipe.
    ///
    /// A reopen creates a new queue, so the handle must be fetched again.
    pub fn readiness_handle(&self) -> Option<ReadinessHandle> {
        self.lifecycle.lock().queue.as_ref()?.readiness_handle()
    }

    /// Fail unless calls can currently be issued.
    pub fn assert_open(&self) -> Result<()> {
        if !self.is_running() || self.is_closed() {
            return Err(Error::ShuttingDown);
        }
        match self.backend.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::ExpiredSession => Err(Error::SessionExpired),
            _ => Err(Error::NotConnected),
        }
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_closed() {
            return ConnectionState::Closed;
        }
        self.backend.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// State of the current dispatch thread. `Stopped` when there is none,
    /// which is always the case in [`DispatchMode::Manual`].
    pub fn dispatch_state(&self) -> DispatchState {
        self.lifecycle
            .lock()
            .dispatch
            .as_ref()
            .map_or(DispatchState::Stopped, |dispatch| dispatch.status.get())
    }

    pub fn session(&self) -> Option<SessionInfo> {
        if self.is_closed() {
            return None;
        }
        self.backend.session()
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.registry
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close connection on drop");
        }
    }
}

fn default_global_watcher() -> HandlerEntry {
    HandlerEntry::new(
        handler(|notification| {
            if let Event::Watch(watch) = &notification.event {
                debug!(
                    state = ?watch.state,
                    event_type = ?watch.event_type,
                    path = watch.path.as_deref().unwrap_or(""),
                    "global watcher notified"
                );
            }
            Ok(())
        }),
        None,
    )
}
