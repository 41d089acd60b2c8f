//! In-process backend.
//!
//! Keeps a small node tree and the watches set on it, and reports results the
//! way a real server session would: sync calls answer directly, async calls
//! answer with a completion event on the event stream, and watches fire as
//! watch events tagged with the request id that set them.
//!
//! Test hooks let callers drive the session state, inject raw events and hold
//! back async completions to release them in any order.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use bytes::Bytes;
use crossbeam_channel::unbounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::debug;
use tracing::trace;

use super::Backend;
use super::BackendEvent;
use super::Call;
use super::CallMode;
use super::CallResult;
use super::ConnectionTarget;
use super::Operation;
use super::SessionInfo;
use crate::constants::ANY_VERSION;
use crate::constants::CREATE_EPHEMERAL;
use crate::constants::CREATE_SEQUENCE;
use crate::Acl;
use crate::CompletionEvent;
use crate::ConnectionState;
use crate::Error;
use crate::Event;
use crate::EventType;
use crate::Payload;
use crate::RequestId;
use crate::Result;
use crate::ResultCode;
use crate::Stat;
use crate::WatchEvent;

#[derive(Debug, Clone)]
struct Node {
    data: Bytes,
    acl: Vec<Acl>,
    stat: Stat,
    next_sequence: i32,
}

impl Node {
    fn new(
        data: Bytes,
        acl: Vec<Acl>,
        zxid: i64,
        ephemeral_owner: i64,
    ) -> Self {
        let now = now_millis();
        Self {
            stat: Stat {
                czxid: zxid,
                mzxid: zxid,
                ctime: now,
                mtime: now,
                ephemeral_owner,
                data_length: data.len() as i32,
                pzxid: zxid,
                ..Stat::default()
            },
            data,
            acl,
            next_sequence: 0,
        }
    }
}

type Outcome = (ResultCode, Payload, Vec<WatchEvent>);

#[derive(Debug)]
struct MemoryState {
    state: ConnectionState,
    handle_closed: bool,
    channel: Option<(Sender<BackendEvent>, Receiver<BackendEvent>)>,
    target: Option<ConnectionTarget>,
    nodes: BTreeMap<String, Node>,
    data_watches: HashMap<String, Vec<RequestId>>,
    child_watches: HashMap<String, Vec<RequestId>>,
    held: VecDeque<CompletionEvent>,
    hold_completions: bool,
    connect_on_init: bool,
    zxid: i64,
    session_id: i64,
    calls: Vec<(RequestId, Call)>,
}

/// Backend keeping the whole data tree in memory.
#[derive(Debug)]
pub struct MemoryBackend {
    inner: Mutex<MemoryState>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Backend whose sessions connect as soon as `init` runs.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::new(Bytes::new(), Acl::open_unsafe(), 0, 0));

        Self {
            inner: Mutex::new(MemoryState {
                state: ConnectionState::NotConnected,
                handle_closed: false,
                channel: None,
                target: None,
                nodes,
                data_watches: HashMap::new(),
                child_watches: HashMap::new(),
                held: VecDeque::new(),
                hold_completions: false,
                connect_on_init: true,
                zxid: 0,
                session_id: 0,
                calls: Vec::new(),
            }),
        }
    }

    /// Backend whose sessions stay in `Connecting` until [`Self::set_state`].
    pub fn unreachable() -> Self {
        let backend = Self::new();
        backend.connect_on_init(false);
        backend
    }

    /// Whether the next `init` reaches `Connected` right away.
    pub fn connect_on_init(
        &self,
        connect: bool,
    ) {
        self.inner.lock().connect_on_init = connect;
    }

    /// Change the session state and notify the global watcher.
    pub fn set_state(
        &self,
        state: ConnectionState,
    ) {
        let mut inner = self.inner.lock();
        inner.state = state;
        inner.emit(Event::Watch(WatchEvent::session(state)));
    }

    /// Put a raw event on the stream as if the server had produced it.
    pub fn inject(
        &self,
        event: Event,
    ) {
        self.inner.lock().emit(event);
    }

    /// Keep async completions back until [`Self::release`] is called.
    pub fn hold_completions(
        &self,
        hold: bool,
    ) {
        self.inner.lock().hold_completions = hold;
    }

    /// Emit the held completion for `req_id`. Returns `false` if none is held.
    pub fn release(
        &self,
        req_id: RequestId,
    ) -> bool {
        let mut inner = self.inner.lock();
        let Some(pos) = inner.held.iter().position(|c| c.req_id == req_id) else {
            return false;
        };
        if let Some(completion) = inner.held.remove(pos) {
            inner.emit(Event::Completion(completion));
        }
        true
    }

    /// Emit every held completion in issue order.
    pub fn release_all(&self) -> usize {
        let mut inner = self.inner.lock();
        let held: Vec<_> = inner.held.drain(..).collect();
        let count = held.len();
        for completion in held {
            inner.emit(Event::Completion(completion));
        }
        count
    }

    pub fn held_completions(&self) -> usize {
        self.inner.lock().held.len()
    }

    /// Calls received so far, in arrival order.
    pub fn calls(&self) -> Vec<(RequestId, Call)> {
        self.inner.lock().calls.clone()
    }

    /// Data stored at `path` (chroot relative).
    pub fn node_data(
        &self,
        path: &str,
    ) -> Option<Bytes> {
        let inner = self.inner.lock();
        let full = inner.full_path(path);
        inner.nodes.get(&full).map(|n| n.data.clone())
    }

    pub fn is_handle_closed(&self) -> bool {
        self.inner.lock().handle_closed
    }
}

impl Backend for MemoryBackend {
    fn init(
        &self,
        target: &ConnectionTarget,
        session_timeout: Duration,
    ) -> Result<()> {
        let mut inner = self.inner.lock();

        inner.session_id += 1;
        inner.handle_closed = false;
        inner.channel = Some(unbounded());
        inner.target = Some(target.clone());
        inner.data_watches.clear();
        inner.child_watches.clear();
        inner.held.clear();
        inner.nodes.retain(|_, node| node.stat.ephemeral_owner == 0);

        if let Some(chroot) = target.chroot() {
            inner.ensure_path(chroot);
        }

        debug!(
            target = %target,
            session_id = inner.session_id,
            session_timeout_ms = session_timeout.as_millis() as u64,
            "memory backend session initialized"
        );

        if inner.connect_on_init {
            inner.state = ConnectionState::Connected;
            inner.emit(Event::Watch(WatchEvent::session(ConnectionState::Connected)));
        } else {
            inner.state = ConnectionState::Connecting;
        }
        Ok(())
    }

    fn next_event(&self) -> Result<BackendEvent> {
        let receiver = {
            let inner = self.inner.lock();
            match (&inner.channel, inner.handle_closed) {
                (Some((_, rx)), false) => rx.clone(),
                _ => return Err(Error::HandleClosed),
            }
        };

        receiver.recv().map_err(|_| Error::HandleClosed)
    }

    fn wake_event_loop(&self) {
        let inner = self.inner.lock();
        if let Some((tx, _)) = &inner.channel {
            let _ = tx.send(BackendEvent::Shutdown);
        }
    }

    fn close_handle(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.handle_closed = true;
        inner.state = ConnectionState::Closed;
        inner.channel = None;
        inner.held.clear();
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    fn issue_call(
        &self,
        req_id: RequestId,
        call: Call,
    ) -> Result<CallResult> {
        let mut inner = self.inner.lock();
        if inner.handle_closed || inner.channel.is_none() {
            return Err(Error::HandleClosed);
        }
        inner.calls.push((req_id, call.clone()));

        if inner.state != ConnectionState::Connected {
            return Ok(CallResult::err(ResultCode::ConnectionLoss));
        }

        let path = call.op.path().to_string();
        let (rc, payload, fired) = inner.execute(req_id, call.op);
        trace!(%req_id, %path, ?rc, fired = fired.len(), "memory backend executed call");

        for event in fired {
            inner.emit(Event::Watch(event));
        }

        match call.mode {
            CallMode::Sync => Ok(CallResult { rc, payload }),
            CallMode::Async => {
                let completion = CompletionEvent {
                    req_id,
                    rc,
                    path: Some(path),
                    payload,
                };
                if inner.hold_completions {
                    inner.held.push_back(completion);
                } else {
                    inner.emit(Event::Completion(completion));
                }
                Ok(CallResult::ok(Payload::None))
            }
        }
    }

    fn session(&self) -> Option<SessionInfo> {
        let inner = self.inner.lock();
        (inner.session_id > 0).then(|| SessionInfo {
            session_id: inner.session_id,
            passwd: inner.session_id.to_be_bytes().to_vec(),
        })
    }
}

impl MemoryState {
    fn emit(
        &self,
        event: Event,
    ) {
        if let Some((tx, _)) = &self.channel {
            let _ = tx.send(BackendEvent::Event(event));
        }
    }

    fn full_path(
        &self,
        path: &str,
    ) -> String {
        match self.target.as_ref().and_then(|t| t.chroot()) {
            Some(chroot) if path == "/" => chroot.to_string(),
            Some(chroot) => format!("{chroot}{path}"),
            None => path.to_string(),
        }
    }

    fn client_path(
        &self,
        full: &str,
    ) -> String {
        match &self.target {
            Some(target) => target.strip_chroot(full),
            None => full.to_string(),
        }
    }

    fn next_zxid(&mut self) -> i64 {
        self.zxid += 1;
        self.zxid
    }

    fn ensure_path(
        &mut self,
        full: &str,
    ) {
        let mut current = String::new();
        for segment in full.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            if !self.nodes.contains_key(&current) {
                let zxid = self.next_zxid();
                self.nodes
                    .insert(current.clone(), Node::new(Bytes::new(), Acl::open_unsafe(), zxid, 0));
            }
        }
    }

    fn take_watches(
        watches: &mut HashMap<String, Vec<RequestId>>,
        full: &str,
    ) -> Vec<RequestId> {
        watches.remove(full).unwrap_or_default()
    }

    fn fire(
        &self,
        ids: Vec<RequestId>,
        event_type: EventType,
        full: &str,
        out: &mut Vec<WatchEvent>,
    ) {
        let path = self.client_path(full);
        out.extend(ids.into_iter().map(|req_id| WatchEvent {
            req_id,
            event_type,
            state: ConnectionState::Connected,
            path: Some(path.clone()),
        }));
    }

    fn children_of(
        &self,
        full: &str,
    ) -> Vec<String> {
        let prefix = if full == "/" {
            "/".to_string()
        } else {
            format!("{full}/")
        };
        self.nodes
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(str::to_string)
            .collect()
    }

    fn execute(
        &mut self,
        req_id: RequestId,
        op: Operation,
    ) -> Outcome {
        match op {
            Operation::Get { path, watch } => {
                let full = self.full_path(&path);
                match self.nodes.get(&full) {
                    Some(node) => {
                        let payload = Payload::Data {
                            data: Some(node.data.clone()),
                            stat: Some(node.stat.clone()),
                        };
                        if watch {
                            self.data_watches.entry(full).or_default().push(req_id);
                        }
                        (ResultCode::Ok, payload, vec![])
                    }
                    None => (ResultCode::NoNode, Payload::Data { data: None, stat: None }, vec![]),
                }
            }
            Operation::Exists { path, watch } => {
                let full = self.full_path(&path);
                if watch {
                    self.data_watches.entry(full.clone()).or_default().push(req_id);
                }
                match self.nodes.get(&full) {
                    Some(node) => (ResultCode::Ok, Payload::Stat(Some(node.stat.clone())), vec![]),
                    None => (ResultCode::NoNode, Payload::Stat(None), vec![]),
                }
            }
            Operation::GetChildren { path, watch } => {
                let full = self.full_path(&path);
                let Some(node) = self.nodes.get(&full) else {
                    return (
                        ResultCode::NoNode,
                        Payload::Children {
                            children: vec![],
                            stat: None,
                        },
                        vec![],
                    );
                };
                let stat = node.stat.clone();
                let children = self.children_of(&full);
                if watch {
                    self.child_watches.entry(full).or_default().push(req_id);
                }
                (
                    ResultCode::Ok,
                    Payload::Children {
                        children,
                        stat: Some(stat),
                    },
                    vec![],
                )
            }
            Operation::GetAcl { path } => {
                let full = self.full_path(&path);
                match self.nodes.get(&full) {
                    Some(node) => (
                        ResultCode::Ok,
                        Payload::Acl {
                            acl: node.acl.clone(),
                            stat: Some(node.stat.clone()),
                        },
                        vec![],
                    ),
                    None => (
                        ResultCode::NoNode,
                        Payload::Acl {
                            acl: vec![],
                            stat: None,
                        },
                        vec![],
                    ),
                }
            }
            Operation::Create {
                path,
                data,
                acl,
                flags,
            } => self.create(&path, data, acl, flags),
            Operation::Delete { path, version } => self.delete(&path, version),
            Operation::Set {
                path,
                data,
                version,
            } => {
                let full = self.full_path(&path);
                let zxid = self.zxid + 1;
                let Some(node) = self.nodes.get_mut(&full) else {
                    return (ResultCode::NoNode, Payload::Stat(None), vec![]);
                };
                if version != ANY_VERSION && version != node.stat.version {
                    return (ResultCode::BadVersion, Payload::Stat(None), vec![]);
                }
                node.stat.version += 1;
                node.stat.mzxid = zxid;
                node.stat.mtime = now_millis();
                node.stat.data_length = data.len() as i32;
                node.data = data;
                let stat = node.stat.clone();
                self.zxid = zxid;

                let mut fired = Vec::new();
                let ids = Self::take_watches(&mut self.data_watches, &full);
                self.fire(ids, EventType::Changed, &full, &mut fired);
                (ResultCode::Ok, Payload::Stat(Some(stat)), fired)
            }
            Operation::SetAcl { path, acl, version } => {
                let full = self.full_path(&path);
                let Some(node) = self.nodes.get_mut(&full) else {
                    return (ResultCode::NoNode, Payload::Stat(None), vec![]);
                };
                if version != ANY_VERSION && version != node.stat.aversion {
                    return (ResultCode::BadVersion, Payload::Stat(None), vec![]);
                }
                node.stat.aversion += 1;
                node.acl = acl;
                (ResultCode::Ok, Payload::Stat(Some(node.stat.clone())), vec![])
            }
        }
    }

    fn create(
        &mut self,
        path: &str,
        data: Bytes,
        acl: Vec<Acl>,
        flags: u32,
    ) -> Outcome {
        let failed = |rc| (rc, Payload::String(None), vec![]);

        let full = self.full_path(path);
        let Some((parent, _)) = full.rsplit_once('/') else {
            return failed(ResultCode::BadArguments);
        };
        let parent = if parent.is_empty() { "/" } else { parent }.to_string();

        let Some(parent_node) = self.nodes.get_mut(&parent) else {
            return failed(ResultCode::NoNode);
        };
        if parent_node.stat.ephemeral_owner != 0 {
            return failed(ResultCode::NoChildrenForEphemerals);
        }

        let created = if flags & CREATE_SEQUENCE != 0 {
            let seq = parent_node.next_sequence;
            parent_node.next_sequence += 1;
            format!("{full}{seq:010}")
        } else {
            full
        };
        if self.nodes.contains_key(&created) {
            return failed(ResultCode::NodeExists);
        }

        let zxid = self.next_zxid();
        let owner = if flags & CREATE_EPHEMERAL != 0 {
            self.session_id
        } else {
            0
        };
        self.nodes.insert(created.clone(), Node::new(data, acl, zxid, owner));

        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.stat.cversion += 1;
            parent_node.stat.num_children += 1;
            parent_node.stat.pzxid = zxid;
        }

        let mut fired = Vec::new();
        let ids = Self::take_watches(&mut self.data_watches, &created);
        self.fire(ids, EventType::Created, &created, &mut fired);
        let ids = Self::take_watches(&mut self.child_watches, &parent);
        self.fire(ids, EventType::Child, &parent, &mut fired);

        // Like the native client, the created path is reported with the chroot prefix.
        (ResultCode::Ok, Payload::String(Some(created)), fired)
    }

    fn delete(
        &mut self,
        path: &str,
        version: i32,
    ) -> Outcome {
        let full = self.full_path(path);
        if full == "/" || self.target.as_ref().and_then(|t| t.chroot()) == Some(full.as_str()) {
            return (ResultCode::BadArguments, Payload::None, vec![]);
        }

        let Some(node) = self.nodes.get(&full) else {
            return (ResultCode::NoNode, Payload::None, vec![]);
        };
        if version != ANY_VERSION && version != node.stat.version {
            return (ResultCode::BadVersion, Payload::None, vec![]);
        }
        if !self.children_of(&full).is_empty() {
            return (ResultCode::NotEmpty, Payload::None, vec![]);
        }

        self.nodes.remove(&full);
        let zxid = self.next_zxid();
        let parent = match full.rsplit_once('/') {
            Some(("", _)) | None => "/".to_string(),
            Some((parent, _)) => parent.to_string(),
        };
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.stat.cversion += 1;
            parent_node.stat.num_children -= 1;
            parent_node.stat.pzxid = zxid;
        }

        let mut fired = Vec::new();
        let ids = Self::take_watches(&mut self.data_watches, &full);
        self.fire(ids, EventType::Deleted, &full, &mut fired);
        let ids = Self::take_watches(&mut self.child_watches, &full);
        self.fire(ids, EventType::Deleted, &full, &mut fired);
        let ids = Self::take_watches(&mut self.child_watches, &parent);
        self.fire(ids, EventType::Child, &parent, &mut fired);

        (ResultCode::Ok, Payload::None, fired)
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
