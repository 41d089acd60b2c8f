//! Await an asynchronous call from async code.

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::CallOptions;
use super::Reply;
use crate::Error;
use crate::Event;
use crate::Result;

/// Receiving side of [`awaitable`].
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<Reply>,
}

impl PendingReply {
    /// Wait for the completion.
    ///
    /// Fails with [`Error::ShuttingDown`] if the callback was dropped without
    /// firing, which happens when the connection is reopened or closed first.
    pub async fn wait(self) -> Result<Reply> {
        self.rx.await.map_err(|_| Error::ShuttingDown)
    }

    /// Non-async variant of [`Self::wait`] for use outside a runtime.
    pub fn blocking_wait(self) -> Result<Reply> {
        self.rx.blocking_recv().map_err(|_| Error::ShuttingDown)
    }
}

/// Call options whose callback resolves the returned [`PendingReply`].
///
/// Session notices delivered to the callback while the call is pending are
/// skipped; only the completion itself resolves the reply.
pub fn awaitable() -> (CallOptions, PendingReply) {
    let (tx, rx) = oneshot::channel();
    let tx = Mutex::new(Some(tx));

    let options = CallOptions::new().callback(move |notification| {
        if let Event::Completion(completion) = &notification.event {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(Reply::from(completion.clone()));
            }
        }
        Ok(())
    });

    (options, PendingReply { rx })
}
