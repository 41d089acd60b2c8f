//! Operation shims on top of the dispatch engine.
//!
//! Every operation takes a path plus [`CallOptions`]. Without a callback the
//! call is synchronous and the [`Reply`] carries the result; with a callback
//! the call returns once the backend accepted it and the result arrives
//! through the callback on the dispatch thread.
//!
//! ```no_run
//! use zk_dispatch::CallOptions;
//! use zk_dispatch::Client;
//!
//! let client = Client::builder("localhost:2181/app").build().unwrap();
//! client
//!     .create("/jobs", "", zk_dispatch::Acl::open_unsafe(), 0, CallOptions::new())
//!     .unwrap();
//!
//! client
//!     .get_children(
//!         "/jobs",
//!         CallOptions::new().watcher(|n| {
//!             println!("children changed: {:?}", n.event);
//!             Ok(())
//!         }),
//!     )
//!     .unwrap();
//! ```

mod awaitable;
mod builder;
mod options;

pub use awaitable::*;
pub use builder::*;
pub use options::*;


use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;
use tracing::trace;

use crate::backend::Call;
use crate::backend::CallMode;
use crate::backend::ConnectionTarget;
use crate::backend::Operation;
use crate::handler;
use crate::Acl;
use crate::CompletionEvent;
use crate::Connection;
use crate::ConnectionState;
use crate::Error;
use crate::Event;
use crate::EventHandler;
use crate::Notification;
use crate::Payload;
use crate::ReadinessHandle;
use crate::RequestId;
use crate::Result;
use crate::RequestRegistry;
use crate::ResultCode;
use crate::SharedHandler;

/// Result of an operation.
///
/// For asynchronous calls `rc` only reports whether the backend accepted the
/// call and `payload` is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub req_id: RequestId,
    pub rc: ResultCode,
    pub payload: Payload,
}

impl Reply {
    /// Turn a non-ok result code into [`Error::Keeper`].
    pub fn ok(self) -> Result<Payload> {
        self.rc.into_result()?;
        Ok(self.payload)
    }
}

impl From<CompletionEvent> for Reply {
    fn from(c: CompletionEvent) -> Self {
        Self {
            req_id: c.req_id,
            rc: c.rc,
            payload: c.payload,
        }
    }
}

/// Client handle. Cheap to clone; all clones share one connection.
#[derive(Debug, Clone)]
pub struct Client {
    connection: Arc<Connection>,
}

impl Client {
    pub fn builder(target: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(target)
    }

    pub fn get(
        &self,
        path: &str,
        options: CallOptions,
    ) -> Result<Reply> {
        let op = Operation::Get {
            path: path.to_string(),
            watch: options.has_watcher(),
        };
        self.submit(op, options)
    }

    pub fn set(
        &self,
        path: &str,
        data: impl Into<Bytes>,
        version: i32,
        options: CallOptions,
    ) -> Result<Reply> {
        let op = Operation::Set {
            path: path.to_string(),
            data: data.into(),
            version,
        };
        self.submit(op, options)
    }

    /// Create a node. The created path (which may carry a sequence suffix) is
    /// returned as [`Payload::String`], relative to the chroot.
    pub fn create(
        &self,
        path: &str,
        data: impl Into<Bytes>,
        acl: Vec<Acl>,
        flags: u32,
        options: CallOptions,
    ) -> Result<Reply> {
        let op = Operation::Create {
            path: path.to_string(),
            data: data.into(),
            acl,
            flags,
        };
        self.submit(op, options)
    }

    pub fn delete(
        &self,
        path: &str,
        version: i32,
        options: CallOptions,
    ) -> Result<Reply> {
        let op = Operation::Delete {
            path: path.to_string(),
            version,
        };
        self.submit(op, options)
    }

    pub fn exists(
        &self,
        path: &str,
        options: CallOptions,
    ) -> Result<Reply> {
        let op = Operation::Exists {
            path: path.to_string(),
            watch: options.has_watcher(),
        };
        self.submit(op, options)
    }

    pub fn get_children(
        &self,
        path: &str,
        options: CallOptions,
    ) -> Result<Reply> {
        let op = Operation::GetChildren {
            path: path.to_string(),
            watch: options.has_watcher(),
        };
        self.submit(op, options)
    }

    pub fn get_acl(
        &self,
        path: &str,
        options: CallOptions,
    ) -> Result<Reply> {
        let op = Operation::GetAcl {
            path: path.to_string(),
        };
        self.submit(op, options)
    }

    pub fn set_acl(
        &self,
        path: &str,
        acl: Vec<Acl>,
        version: i32,
        options: CallOptions,
    ) -> Result<Reply> {
        let op = Operation::SetAcl {
            path: path.to_string(),
            acl,
            version,
        };
        self.submit(op, options)
    }

    fn submit(
        &self,
        op: Operation,
        mut options: CallOptions,
    ) -> Result<Reply> {
        validate_path(op.path())?;
        if options.has_watcher() && !op.supports_watch() {
            return Err(Error::BadArguments(format!(
                "{} does not accept a watcher",
                op.name()
            )));
        }
        self.connection.assert_open()?;

        let target = self.connection.target();
        let registry = self.connection.registry();
        let is_create = matches!(op, Operation::Create { .. });
        let is_exists = matches!(op, Operation::Exists { .. });
        if is_create && target.is_chrooted() {
            if let Some(callback) = options.callback.take() {
                options.callback = Some(strip_chroot_callback(target.clone(), callback));
            }
        }
        if options.has_watcher() {
            if let Some(callback) = options.callback.take() {
                options.callback = Some(discard_unset_watch_callback(
                    Arc::downgrade(registry),
                    is_exists,
                    callback,
                ));
            }
        }

        let mode = if options.is_async() {
            CallMode::Async
        } else {
            CallMode::Sync
        };
        let watch_requested = options.has_watcher();
        let (completion, watcher) = options.into_entries();
        let req_id = self.connection.allocate_request(completion, watcher);
        let name = op.name();

        trace!(%req_id, op = name, ?mode, "issuing call");
        let result = match self.connection.backend().issue_call(req_id, Call { op, mode }) {
            Ok(result) => result,
            Err(e) => {
                registry.discard(req_id);
                return Err(e);
            }
        };

        match mode {
            CallMode::Async => {
                if !result.rc.is_ok() {
                    debug!(%req_id, op = name, rc = ?result.rc, "call rejected by backend");
                    registry.discard(req_id);
                }
            }
            CallMode::Sync => {
                if watch_requested && !watch_was_set(result.rc, is_exists) {
                    registry.discard(req_id);
                }
            }
        }

        let mut payload = result.payload;
        if is_create {
            strip_chroot_payload(target, &mut payload);
        }

        Ok(Reply {
            req_id,
            rc: result.rc,
            payload,
        })
    }

    /// Close and open a fresh session. Watches must be set again afterwards.
    pub fn reopen(
        &self,
        timeout: Duration,
    ) -> Result<ConnectionState> {
        self.connection.reopen(timeout)
    }

    pub fn close(&self) -> Result<()> {
        self.connection.close()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    pub fn session_id(&self) -> Option<i64> {
        self.connection.session().map(|s| s.session_id)
    }

    pub fn session_passwd(&self) -> Option<Vec<u8>> {
        self.connection.session().map(|s| s.passwd)
    }

    pub fn chroot(&self) -> Option<&str> {
        self.connection.target().chroot()
    }

    /// See [`Connection::readiness_handle`].
    pub fn readiness_handle(&self) -> Option<ReadinessHandle> {
        self.connection.readiness_handle()
    }

    /// See [`Connection::dispatch_next_callback`].
    pub fn dispatch_next_callback(
        &self,
        blocking: bool,
    ) -> bool {
        self.connection.dispatch_next_callback(blocking)
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

/// A failed read leaves no watch behind, except exists on a missing node.
fn watch_was_set(
    rc: ResultCode,
    is_exists: bool,
) -> bool {
    rc.is_ok() || (is_exists && rc == ResultCode::NoNode)
}

/// Drop the watcher of an asynchronous read once its completion shows the
/// backend never set the watch. Runs before the user callback.
fn discard_unset_watch_callback(
    registry: Weak<RequestRegistry>,
    is_exists: bool,
    callback: SharedHandler,
) -> SharedHandler {
    handler(move |notification| {
        if let Event::Completion(completion) = &notification.event {
            if !watch_was_set(completion.rc, is_exists) {
                if let Some(registry) = registry.upgrade() {
                    trace!(req_id = %completion.req_id, rc = ?completion.rc, "dropping unset watch");
                    registry.discard_watcher(completion.req_id);
                }
            }
        }
        callback.handle(notification)
    })
}

fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(Error::BadArguments(format!(
            "path must start with /, got {path:?}"
        )));
    }
    Ok(())
}

fn strip_chroot_payload(
    target: &ConnectionTarget,
    payload: &mut Payload,
) {
    if let Payload::String(Some(path)) = payload {
        *path = target.strip_chroot(path);
    }
}

/// The backend reports created paths with the chroot prefix; strip it before
/// the callback sees the completion.
fn strip_chroot_callback(
    target: ConnectionTarget,
    callback: SharedHandler,
) -> SharedHandler {
    handler(move |notification| match &notification.event {
        Event::Completion(completion) => {
            let mut completion = completion.clone();
            strip_chroot_payload(&target, &mut completion.payload);
            callback.handle(&Notification {
                event: Event::Completion(completion),
                context: notification.context.clone(),
            })
        }
        Event::Watch(_) => callback.handle(notification),
    })
}
