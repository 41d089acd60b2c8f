//! Ordered hand-off between the delivery thread and the dispatch thread.
//!
//! ```text
//! backend ─► delivery thread ─► EventQueue ─► dispatch thread ─► handlers
//!                                   │
//!                                   └─► readiness pipe (one byte per item)
//! ```
//!
//! Every pushed item is sent first and then writes one byte to a non-blocking
//! pipe, so that foreign event loops can wait on the read end next to their
//! own descriptors. A byte that can be read always stands for an item that can
//! already be popped. Each pop consumes one byte again, unless the readiness
//! handle was handed out, in which case the holder drains the pipe itself.

use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::fd::RawFd;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use crossbeam_channel::unbounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use mio::unix::SourceFd;
use tracing::debug;
use tracing::warn;

use super::Event;
use crate::Result;

/// Items carried by the queue.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum QueueItem {
    Event(Event),
    /// Pushed by the lifecycle coordinator when closing
    Shutdown,
}

struct ReadinessPipe {
    tx: mio::unix::pipe::Sender,
    rx: mio::unix::pipe::Receiver,
    /// Set while signals are being dropped because the pipe is full
    saturated: AtomicBool,
}

impl ReadinessPipe {
    fn open() -> Result<Self> {
        let (tx, rx) = mio::unix::pipe::new()?;
        Ok(Self {
            tx,
            rx,
            saturated: AtomicBool::new(false),
        })
    }

    fn signal(&self) {
        match (&self.tx).write(b"0") {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if !self.saturated.swap(true, Ordering::AcqRel) {
                    warn!(
                        "readiness pipe full, dropping signals; drain the queue until it is empty"
                    );
                }
            }
            Err(e) => debug!(?e, "failed to signal readiness pipe"),
        }
    }

    fn consume(&self) -> std::io::Result<bool> {
        let mut buf = [0u8; 1];
        match (&self.rx).read(&mut buf) {
            Ok(n) => {
                if n == 1 {
                    self.saturated.store(false, Ordering::Release);
                }
                Ok(n == 1)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// FIFO of events with an out-of-band readiness signal.
pub struct EventQueue {
    sender: Sender<QueueItem>,
    receiver: Receiver<QueueItem>,
    pipe: ArcSwapOption<ReadinessPipe>,
    clear_reads_on_pop: AtomicBool,
}

impl std::fmt::Debug for EventQueue {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("len", &self.receiver.len())
            .field("closed", &self.is_closed())
            .field("clear_reads_on_pop", &self.clear_reads_on_pop.load(Ordering::Relaxed))
            .finish()
    }
}

impl EventQueue {
    pub fn new(clear_reads_on_pop: bool) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let pipe = ReadinessPipe::open()?;

        Ok(Self {
            sender,
            receiver,
            pipe: ArcSwapOption::from_pointee(pipe),
            clear_reads_on_pop: AtomicBool::new(clear_reads_on_pop),
        })
    }

    /// Append an event. Never blocks.
    pub fn push(
        &self,
        event: Event,
    ) {
        self.push_item(QueueItem::Event(event));
    }

    pub(crate) fn push_shutdown(&self) {
        self.push_item(QueueItem::Shutdown);
    }

    fn push_item(
        &self,
        item: QueueItem,
    ) {
        // The queue owns a receiver, so the channel can never be disconnected.
        if self.sender.send(item).is_err() {
            debug!("event queue receiver dropped");
            return;
        }

        // Send first: a poller woken by the byte always finds the item. A pop
        // that races ahead of the byte leaves it behind as a spurious wakeup.
        let pipe = self.pipe.load();
        if let Some(pipe) = &*pipe {
            pipe.signal();
        }
    }

    /// Pop the next item.
    ///
    /// With `blocking` the caller is suspended until an item is available;
    /// otherwise `None` is returned right away when the queue is empty.
    pub(crate) fn pop_item(
        &self,
        blocking: bool,
    ) -> Option<QueueItem> {
        let item = if blocking {
            self.receiver.recv().ok()
        } else {
            self.receiver.try_recv().ok()
        };

        if item.is_some() && self.clear_reads_on_pop.load(Ordering::Acquire) {
            let pipe = self.pipe.load();
            if let Some(pipe) = &*pipe {
                if let Err(e) = pipe.consume() {
                    debug!(?e, "failed to clear readiness pipe");
                }
            }
        }

        item
    }

    /// Pop the next event, skipping the internal shutdown marker.
    pub fn pop(
        &self,
        blocking: bool,
    ) -> Option<Event> {
        match self.pop_item(blocking)? {
            QueueItem::Event(event) => Some(event),
            QueueItem::Shutdown => None,
        }
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Hand out the readiness handle.
    ///
    /// From now on pops no longer drain the pipe: the holder reads one byte per
    /// event it processes (see [`ReadinessHandle::consume`]).
    pub fn readiness_handle(&self) -> Option<ReadinessHandle> {
        let pipe = self.pipe.load_full()?;
        self.clear_reads_on_pop.store(false, Ordering::Release);
        Some(ReadinessHandle { pipe })
    }

    pub fn set_clear_reads_on_pop(
        &self,
        clear: bool,
    ) {
        self.clear_reads_on_pop.store(clear, Ordering::Release);
    }

    /// Release the readiness pipe. Safe to call more than once.
    pub fn close(&self) {
        if self.pipe.swap(None).is_some() {
            debug!("event queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.pipe.load().is_none()
    }
}

/// Read end of the readiness pipe.
///
/// Becomes readable once an event is queued. Register
/// [`AsRawFd::as_raw_fd`] with any poller, or the handle itself with a
/// `mio::Poll`.
///
/// The pipe holds one byte per queued event up to the kernel pipe capacity
/// (64 KiB on Linux); beyond that signals are dropped. On wakeup, drain the
/// handle with [`Self::consume`] and then pop without blocking until the
/// queue reports empty, instead of popping once per byte. Bytes may outlive
/// the events they announced, so an empty pop after a wakeup is expected.
#[derive(Clone)]
pub struct ReadinessHandle {
    pipe: Arc<ReadinessPipe>,
}

impl ReadinessHandle {
    /// Read one readiness byte. Returns `false` when nothing was pending.
    pub fn consume(&self) -> std::io::Result<bool> {
        self.pipe.consume()
    }
}

impl AsRawFd for ReadinessHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.pipe.rx.as_raw_fd()
    }
}

impl mio::event::Source for ReadinessHandle {
    fn register(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interests: mio::Interest,
    ) -> std::io::Result<()> {
        SourceFd(&self.as_raw_fd()).register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interests: mio::Interest,
    ) -> std::io::Result<()> {
        SourceFd(&self.as_raw_fd()).reregister(registry, token, interests)
    }

    fn deregister(
        &mut self,
        registry: &mio::Registry,
    ) -> std::io::Result<()> {
        SourceFd(&self.as_raw_fd()).deregister(registry)
    }
}

impl std::fmt::Debug for ReadinessHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ReadinessHandle").field("fd", &self.as_raw_fd()).finish()
    }
}
