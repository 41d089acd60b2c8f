//! Events flowing from the backend to the dispatch thread.
//!
//! An [`Event`] is either the response to one asynchronous call
//! ([`CompletionEvent`]) or a change notification ([`WatchEvent`]). The
//! dispatch thread routes on the variant: completions resolve the completion
//! table, watch events resolve the watcher table.

use std::fmt;

use bytes::Bytes;

use crate::constants::GLOBAL_WATCHER_REQ_ID;
use crate::ResultCode;

/// Correlates a call with the events it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(i64);

impl RequestId {
    /// Sentinel id of the global watcher.
    pub const GLOBAL: RequestId = RequestId(GLOBAL_WATCHER_REQ_ID);

    pub const fn new(id: i64) -> Self {
        RequestId(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn is_global(&self) -> bool {
        *self == Self::GLOBAL
    }
}

impl fmt::Display for RequestId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session state as tracked by the backend handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    NotConnected,
    Connecting,
    Associating,
    Connected,
    Closed,
    ExpiredSession,
    AuthFailed,
}

impl ConnectionState {
    pub fn code(&self) -> i32 {
        match self {
            ConnectionState::NotConnected => 999,
            ConnectionState::Connecting => 1,
            ConnectionState::Associating => 2,
            ConnectionState::Connected => 3,
            ConnectionState::Closed => 0,
            ConnectionState::ExpiredSession => -112,
            ConnectionState::AuthFailed => -113,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            999 => Some(ConnectionState::NotConnected),
            1 => Some(ConnectionState::Connecting),
            2 => Some(ConnectionState::Associating),
            3 => Some(ConnectionState::Connected),
            0 => Some(ConnectionState::Closed),
            -112 => Some(ConnectionState::ExpiredSession),
            -113 => Some(ConnectionState::AuthFailed),
            _ => None,
        }
    }
}

/// Kind of change reported by a watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Created,
    Deleted,
    Changed,
    Child,
    /// Connection/session level notification
    Session,
    NotWatching,
}

impl EventType {
    pub fn code(&self) -> i32 {
        match self {
            EventType::Created => 1,
            EventType::Deleted => 2,
            EventType::Changed => 3,
            EventType::Child => 4,
            EventType::Session => -1,
            EventType::NotWatching => -2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(EventType::Created),
            2 => Some(EventType::Deleted),
            3 => Some(EventType::Changed),
            4 => Some(EventType::Child),
            -1 => Some(EventType::Session),
            -2 => Some(EventType::NotWatching),
            _ => None,
        }
    }

    pub fn is_session(&self) -> bool {
        matches!(self, EventType::Session)
    }
}

/// Node metadata, opaque to the dispatch engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stat {
    pub czxid: i64,
    pub mzxid: i64,
    pub ctime: i64,
    pub mtime: i64,
    pub version: i32,
    pub cversion: i32,
    pub aversion: i32,
    pub ephemeral_owner: i64,
    pub data_length: i32,
    pub num_children: i32,
    pub pzxid: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AclId {
    pub scheme: String,
    pub id: String,
}

/// Permission record, opaque to the dispatch engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Acl {
    pub perms: u32,
    pub id: AclId,
}

impl Acl {
    pub fn new(
        perms: u32,
        scheme: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            perms,
            id: AclId {
                scheme: scheme.into(),
                id: id.into(),
            },
        }
    }

    /// `world:anyone` with every permission.
    pub fn open_unsafe() -> Vec<Acl> {
        vec![Acl::new(crate::constants::PERM_ALL, "world", "anyone")]
    }
}

/// Typed result body carried by completions and sync replies.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Payload {
    #[default]
    None,
    Data {
        data: Option<Bytes>,
        stat: Option<Stat>,
    },
    Stat(Option<Stat>),
    Children {
        children: Vec<String>,
        stat: Option<Stat>,
    },
    Acl {
        acl: Vec<Acl>,
        stat: Option<Stat>,
    },
    String(Option<String>),
}

impl Payload {
    pub fn stat(&self) -> Option<&Stat> {
        match self {
            Payload::Data { stat, .. }
            | Payload::Stat(stat)
            | Payload::Children { stat, .. }
            | Payload::Acl { stat, .. } => stat.as_ref(),
            Payload::None | Payload::String(_) => None,
        }
    }

    pub fn data(&self) -> Option<&Bytes> {
        match self {
            Payload::Data { data, .. } => data.as_ref(),
            _ => None,
        }
    }

    pub fn children(&self) -> Option<&[String]> {
        match self {
            Payload::Children { children, .. } => Some(children),
            _ => None,
        }
    }

    pub fn acl(&self) -> Option<&[Acl]> {
        match self {
            Payload::Acl { acl, .. } => Some(acl),
            _ => None,
        }
    }

    pub fn string(&self) -> Option<&str> {
        match self {
            Payload::String(s) => s.as_deref(),
            _ => None,
        }
    }
}

/// Response to one asynchronous call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionEvent {
    pub req_id: RequestId,
    pub rc: ResultCode,
    pub path: Option<String>,
    pub payload: Payload,
}

/// Change notification for a path, or a session notification when
/// `event_type` is [`EventType::Session`].
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    pub req_id: RequestId,
    pub event_type: EventType,
    pub state: ConnectionState,
    pub path: Option<String>,
}

impl WatchEvent {
    /// Session notification addressed to the global watcher.
    pub fn session(state: ConnectionState) -> Self {
        Self {
            req_id: RequestId::GLOBAL,
            event_type: EventType::Session,
            state,
            path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Completion(CompletionEvent),
    Watch(WatchEvent),
}

impl Event {
    pub fn req_id(&self) -> RequestId {
        match self {
            Event::Completion(c) => c.req_id,
            Event::Watch(w) => w.req_id,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            Event::Completion(c) => c.path.as_deref(),
            Event::Watch(w) => w.path.as_deref(),
        }
    }

    pub fn is_session(&self) -> bool {
        matches!(self, Event::Watch(w) if w.event_type.is_session())
    }

    pub fn as_completion(&self) -> Option<&CompletionEvent> {
        match self {
            Event::Completion(c) => Some(c),
            Event::Watch(_) => None,
        }
    }

    pub fn as_watch(&self) -> Option<&WatchEvent> {
        match self {
            Event::Watch(w) => Some(w),
            Event::Completion(_) => None,
        }
    }
}

impl From<CompletionEvent> for Event {
    fn from(e: CompletionEvent) -> Self {
        Event::Completion(e)
    }
}

impl From<WatchEvent> for Event {
    fn from(e: WatchEvent) -> Self {
        Event::Watch(e)
    }
}
