//! Backend handle abstraction
//!
//! The backend owns the wire/session protocol. The dispatch engine only needs
//! it to: start a session, hand out raw events (blocking), wake a blocked
//! reader with a shutdown marker, report the session state, issue calls and
//! release its resources.
//!
//! [`MemoryBackend`] is an in-process implementation used by the tests and
//! for embedding.

mod memory;
mod target;

pub use memory::*;
pub use target::*;


use std::time::Duration;

use bytes::Bytes;
#[cfg(test)]
use mockall::automock;

use crate::Acl;
use crate::ConnectionState;
use crate::Event;
use crate::Payload;
use crate::RequestId;
use crate::Result;
use crate::ResultCode;

/// What the backend hands to the event delivery thread.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Event(Event),
    /// Injected by [`Backend::wake_event_loop`]; ends the delivery thread
    Shutdown,
}

/// Operation payloads understood by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Get {
        path: String,
        watch: bool,
    },
    Set {
        path: String,
        data: Bytes,
        version: i32,
    },
    Create {
        path: String,
        data: Bytes,
        acl: Vec<Acl>,
        flags: u32,
    },
    Delete {
        path: String,
        version: i32,
    },
    Exists {
        path: String,
        watch: bool,
    },
    GetChildren {
        path: String,
        watch: bool,
    },
    GetAcl {
        path: String,
    },
    SetAcl {
        path: String,
        acl: Vec<Acl>,
        version: i32,
    },
}

impl Operation {
    pub fn path(&self) -> &str {
        match self {
            Operation::Get { path, .. }
            | Operation::Set { path, .. }
            | Operation::Create { path, .. }
            | Operation::Delete { path, .. }
            | Operation::Exists { path, .. }
            | Operation::GetChildren { path, .. }
            | Operation::GetAcl { path }
            | Operation::SetAcl { path, .. } => path,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Get { .. } => "get",
            Operation::Set { .. } => "set",
            Operation::Create { .. } => "create",
            Operation::Delete { .. } => "delete",
            Operation::Exists { .. } => "exists",
            Operation::GetChildren { .. } => "get_children",
            Operation::GetAcl { .. } => "get_acl",
            Operation::SetAcl { .. } => "set_acl",
        }
    }

    /// Whether the operation can leave a watch behind.
    pub fn supports_watch(&self) -> bool {
        matches!(
            self,
            Operation::Get { .. } | Operation::Exists { .. } | Operation::GetChildren { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// Result returned directly from `issue_call`
    Sync,
    /// Result delivered later as a completion event tagged with the request id
    Async,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub op: Operation,
    pub mode: CallMode,
}

/// Direct result of `issue_call`. For async calls this only says whether the
/// call was queued.
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub rc: ResultCode,
    pub payload: Payload,
}

impl CallResult {
    pub fn ok(payload: Payload) -> Self {
        Self {
            rc: ResultCode::Ok,
            payload,
        }
    }

    pub fn err(rc: ResultCode) -> Self {
        Self {
            rc,
            payload: Payload::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: i64,
    pub passwd: Vec<u8>,
}

#[cfg_attr(test, automock)]
pub trait Backend: Send + Sync + 'static {
    /// Establish a new session. Called again on reopen.
    fn init(
        &self,
        target: &ConnectionTarget,
        session_timeout: Duration,
    ) -> Result<()>;

    /// Block until the next raw event or the shutdown marker is available.
    ///
    /// [`crate::Error::HandleClosed`] signals the handle is already gone.
    fn next_event(&self) -> Result<BackendEvent>;

    /// Unblock a pending [`Backend::next_event`] with the shutdown marker.
    fn wake_event_loop(&self);

    /// Release all backend resources.
    fn close_handle(&self) -> Result<()>;

    fn state(&self) -> ConnectionState;

    fn issue_call(
        &self,
        req_id: RequestId,
        call: Call,
    ) -> Result<CallResult>;

    fn session(&self) -> Option<SessionInfo>;
}
