use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use bytes::Bytes;
use crossbeam_channel::unbounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use tracing_test::traced_test;

use super::*;
use crate::backend::Backend;
use crate::backend::BackendEvent;
use crate::backend::Call;
use crate::backend::CallMode;
use crate::backend::ConnectionTarget;
use crate::backend::MemoryBackend;
use crate::backend::MockBackend;
use crate::backend::Operation;
use crate::ClientConfig;
use crate::DispatchMode;
use crate::Error;
use crate::ResultCode;

const WAIT: Duration = Duration::from_secs(2);

fn test_config() -> ClientConfig {
    ClientConfig {
        connect_timeout_ms: 500,
        connect_poll_interval_ms: 10,
        dispatch_join_grace_ms: 200,
        ..Default::default()
    }
}

fn target() -> ConnectionTarget {
    ConnectionTarget::parse("localhost:2181").unwrap()
}

fn connection(
    backend: &Arc<MemoryBackend>,
    config: ClientConfig,
    global: Option<HandlerEntry>,
) -> Connection {
    Connection::new(target(), config, backend.clone() as Arc<dyn Backend>, global)
}

/// Handler forwarding every notification into a channel.
fn forwarding() -> (HandlerEntry, Receiver<Event>) {
    let (tx, rx) = unbounded();
    let entry = HandlerEntry::new(
        handler(move |n| {
            let _ = tx.send(n.event.clone());
            Ok(())
        }),
        None,
    );
    (entry, rx)
}

fn create_async(
    conn: &Connection,
    req_id: RequestId,
    path: &str,
) {
    conn.backend()
        .issue_call(
            req_id,
            Call {
                op: Operation::Create {
                    path: path.to_string(),
                    data: Bytes::new(),
                    acl: crate::Acl::open_unsafe(),
                    flags: 0,
                },
                mode: CallMode::Async,
            },
        )
        .unwrap();
}

#[test]
fn open_connects_and_notifies_global_watcher() {
    let backend = Arc::new(MemoryBackend::new());
    let (global, events) = forwarding();
    let conn = connection(&backend, test_config(), Some(global));

    assert!(conn.is_closed());
    assert_eq!(conn.state(), ConnectionState::Closed);

    let state = conn.open(Duration::from_millis(500)).unwrap();
    assert_eq!(state, ConnectionState::Connected);
    assert!(conn.is_running());
    assert!(conn.is_connected());
    assert!(conn.session().is_some());

    let first = events.recv_timeout(WAIT).unwrap();
    assert!(first.is_session());
    assert_eq!(first.as_watch().unwrap().state, ConnectionState::Connected);

    conn.close().unwrap();
}

#[test]
fn open_twice_is_rejected() {
    let backend = Arc::new(MemoryBackend::new());
    let conn = connection(&backend, test_config(), None);

    conn.open(Duration::from_millis(100)).unwrap();
    assert!(matches!(conn.open(Duration::from_millis(100)), Err(Error::BadArguments(_))));
    conn.close().unwrap();
}

#[test]
fn open_wait_is_advisory() {
    let backend = Arc::new(MemoryBackend::unreachable());
    let conn = connection(&backend, test_config(), None);

    let started = Instant::now();
    let state = conn.open(Duration::from_millis(100)).unwrap();

    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(state, ConnectionState::Connecting);
    assert!(conn.is_running());
    assert!(!conn.is_connected());
    assert!(matches!(conn.assert_open(), Err(Error::NotConnected)));

    conn.close().unwrap();
}

#[test]
fn backend_init_failure_propagates() {
    let mut backend = MockBackend::new();
    backend
        .expect_init()
        .times(1)
        .returning(|_, _| Err(Error::Backend("no route to host".to_string())));

    let conn = Connection::new(target(), test_config(), Arc::new(backend), None);
    assert!(matches!(conn.open(Duration::from_millis(10)), Err(Error::Backend(_))));
    assert!(!conn.is_running());
    assert!(conn.is_closed());
}

#[test]
fn completion_is_dispatched_with_context() {
    let backend = Arc::new(MemoryBackend::new());
    let conn = connection(&backend, test_config(), None);
    conn.open(Duration::from_millis(500)).unwrap();

    let (tx, rx) = unbounded();
    let entry = HandlerEntry::new(
        handler(move |n| {
            let ctx = n.context::<&'static str>().copied();
            let _ = tx.send((n.event.clone(), ctx));
            Ok(())
        }),
        Some(Arc::new("ctx")),
    );
    let req_id = conn.allocate_request(Some(entry), None);
    create_async(&conn, req_id, "/node");

    let (event, ctx) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(event.req_id(), req_id);
    assert_eq!(event.as_completion().unwrap().rc, ResultCode::Ok);
    assert_eq!(ctx, Some("ctx"));
    assert_eq!(conn.registry().pending_completions(), 0);

    conn.close().unwrap();
}

#[test]
fn close_is_idempotent_and_reports_closed() {
    let backend = Arc::new(MemoryBackend::new());
    let conn = connection(&backend, test_config(), None);

    // nothing to do before the first open
    conn.close().unwrap();

    conn.open(Duration::from_millis(500)).unwrap();
    conn.close().unwrap();
    conn.close().unwrap();

    assert!(!conn.is_running());
    assert!(conn.is_closed());
    assert!(backend.is_handle_closed());
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(conn.dispatch_state(), DispatchState::Stopped);
    assert!(conn.get_next_event(false).is_none());
    assert!(conn.readiness_handle().is_none());
    assert!(matches!(conn.assert_open(), Err(Error::ShuttingDown)));
}

#[test]
fn close_releases_backend_handle_once() {
    let (tx, rx): (Sender<BackendEvent>, Receiver<BackendEvent>) = unbounded();

    let mut backend = MockBackend::new();
    backend.expect_init().times(1).returning(|_, _| Ok(()));
    backend.expect_state().returning(|| ConnectionState::Connected);
    backend
        .expect_next_event()
        .returning(move || rx.recv().map_err(|_| Error::HandleClosed));
    backend.expect_wake_event_loop().times(1).returning(move || {
        let _ = tx.send(BackendEvent::Shutdown);
    });
    backend.expect_close_handle().times(1).returning(|| Ok(()));

    let conn = Connection::new(target(), test_config(), Arc::new(backend), None);
    conn.open(Duration::from_millis(100)).unwrap();
    conn.close().unwrap();
    conn.close().unwrap();
}

#[test]
#[traced_test]
fn close_is_bounded_when_a_handler_is_stuck() {
    let backend = Arc::new(MemoryBackend::new());
    let conn = connection(&backend, test_config(), None);
    conn.open(Duration::from_millis(500)).unwrap();

    let (entered_tx, entered_rx) = unbounded();
    let (release_tx, release_rx) = unbounded::<()>();
    let entry = HandlerEntry::new(
        handler(move |_| {
            let _ = entered_tx.send(());
            let _ = release_rx.recv();
            Ok(())
        }),
        None,
    );
    let req_id = conn.allocate_request(Some(entry), None);
    create_async(&conn, req_id, "/stuck");
    entered_rx.recv_timeout(WAIT).unwrap();

    let started = Instant::now();
    conn.close().unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < WAIT);
    assert!(conn.is_closed());
    assert!(logs_contain("did not stop within the grace period"));

    release_tx.send(()).unwrap();
}

#[test]
fn close_from_a_handler_does_not_deadlock() {
    let backend = Arc::new(MemoryBackend::new());
    let conn = Arc::new(connection(&backend, test_config(), None));
    conn.open(Duration::from_millis(500)).unwrap();

    let (done_tx, done_rx) = unbounded();
    let weak = Arc::downgrade(&conn);
    let entry = HandlerEntry::new(
        handler(move |_| {
            if let Some(conn) = weak.upgrade() {
                let _ = done_tx.send(conn.close().is_ok());
            }
            Ok(())
        }),
        None,
    );
    let req_id = conn.allocate_request(Some(entry), None);
    create_async(&conn, req_id, "/self-close");

    assert!(done_rx.recv_timeout(WAIT).unwrap());
    assert!(conn.is_closed());
}

#[test]
fn reopen_clears_watchers_and_keeps_global() {
    let backend = Arc::new(MemoryBackend::new());
    let (global, global_events) = forwarding();
    let conn = connection(&backend, test_config(), Some(global));
    conn.open(Duration::from_millis(500)).unwrap();
    global_events.recv_timeout(WAIT).unwrap();

    let (watch, _watch_events) = forwarding();
    let before = conn.allocate_request(None, Some(watch));
    assert!(conn.registry().has_watcher(before));
    let (completion, _) = forwarding();
    let pending = conn.allocate_request(Some(completion), None);

    let state = conn.reopen(Duration::from_millis(500)).unwrap();
    assert_eq!(state, ConnectionState::Connected);

    assert!(!conn.registry().has_watcher(before));
    assert!(!conn.registry().has_completion(pending));
    assert!(conn.registry().has_watcher(RequestId::GLOBAL));
    assert_eq!(conn.registry().pending_watchers(), 1);

    // the global watcher hears the new session
    let event = global_events.recv_timeout(WAIT).unwrap();
    assert!(event.is_session());

    let after = conn.allocate_request(None, None);
    assert!(after > pending);

    conn.close().unwrap();
}

#[test]
fn session_state_changes_reach_assert_open() {
    let backend = Arc::new(MemoryBackend::new());
    let conn = connection(&backend, test_config(), None);

    assert!(matches!(conn.assert_open(), Err(Error::ShuttingDown)));
    conn.open(Duration::from_millis(500)).unwrap();
    assert!(conn.assert_open().is_ok());

    backend.set_state(ConnectionState::ExpiredSession);
    assert!(matches!(conn.assert_open(), Err(Error::SessionExpired)));
    backend.set_state(ConnectionState::Connecting);
    assert!(matches!(conn.assert_open(), Err(Error::NotConnected)));

    conn.close().unwrap();
}

#[test]
fn manual_mode_dispatches_on_the_calling_thread() {
    let backend = Arc::new(MemoryBackend::new());
    let config = ClientConfig {
        dispatch_mode: DispatchMode::Manual,
        ..test_config()
    };
    let (global, global_events) = forwarding();
    let conn = connection(&backend, config, Some(global));
    conn.open(Duration::from_millis(500)).unwrap();
    assert_eq!(conn.dispatch_state(), DispatchState::Stopped);

    let handle = conn.readiness_handle().unwrap();

    // The session notice sits in the queue until we dispatch it ourselves.
    let deadline = Instant::now() + WAIT;
    while !handle.consume().unwrap() {
        assert!(Instant::now() < deadline, "readiness pipe never became readable");
        thread::sleep(Duration::from_millis(5));
    }
    assert!(global_events.try_recv().is_err());
    assert!(conn.dispatch_next_callback(false));
    assert!(global_events.try_recv().unwrap().is_session());
    assert!(!conn.dispatch_next_callback(false));

    conn.close().unwrap();
}

#[test]
fn get_next_event_pops_without_dispatching() {
    let backend = Arc::new(MemoryBackend::new());
    let config = ClientConfig {
        dispatch_mode: DispatchMode::Manual,
        ..test_config()
    };
    let conn = connection(&backend, config, None);
    conn.open(Duration::from_millis(500)).unwrap();

    let event = conn.get_next_event(true).unwrap();
    assert!(event.is_session());
    assert!(conn.registry().has_watcher(RequestId::GLOBAL));

    conn.close().unwrap();
    assert!(conn.get_next_event(true).is_none());
}

#[test]
fn open_accepts_a_timeout_beyond_the_clock_range() {
    let backend = Arc::new(MemoryBackend::new());
    let conn = connection(&backend, test_config(), None);

    let state = conn.open(Duration::MAX).unwrap();
    assert_eq!(state, ConnectionState::Connected);
    assert!(conn.is_running());

    conn.close().unwrap();
    assert!(conn.is_closed());
}

fn wait_for_dispatch_state(
    conn: &Connection,
    expected: DispatchState,
) {
    let deadline = Instant::now() + WAIT;
    while conn.dispatch_state() != expected {
        assert!(Instant::now() < deadline, "dispatch state never became {:?}", expected);
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn dispatch_thread_drains_while_running_and_each_session_has_its_own_state() {
    let backend = Arc::new(MemoryBackend::new());
    let conn = connection(&backend, test_config(), None);

    conn.open(Duration::from_millis(500)).unwrap();
    wait_for_dispatch_state(&conn, DispatchState::Draining);

    conn.reopen(Duration::from_millis(500)).unwrap();
    wait_for_dispatch_state(&conn, DispatchState::Draining);
    // the previous thread has stopped by now and must not show through
    thread::sleep(Duration::from_millis(50));
    assert_eq!(conn.dispatch_state(), DispatchState::Draining);

    conn.close().unwrap();
    assert_eq!(conn.dispatch_state(), DispatchState::Stopped);
}

#[test]
fn concurrent_reopens_never_interleave() {
    let backend = Arc::new(MemoryBackend::new());
    let conn = Arc::new(connection(&backend, test_config(), None));
    conn.open(Duration::from_millis(500)).unwrap();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let conn = conn.clone();
            thread::spawn(move || {
                (0..5)
                    .map(|_| conn.reopen(Duration::from_millis(500)))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for worker in workers {
        for result in worker.join().unwrap() {
            assert_eq!(result.unwrap(), ConnectionState::Connected);
        }
    }
    assert!(conn.is_running());
    assert!(!conn.is_closed());

    conn.close().unwrap();
}

#[test]
fn concurrent_close_returns_only_after_the_threads_are_gone() {
    let backend = Arc::new(MemoryBackend::new());
    let conn = Arc::new(connection(&backend, test_config(), None));
    conn.open(Duration::from_millis(500)).unwrap();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let conn = conn.clone();
            thread::spawn(move || {
                conn.close().unwrap();
                (conn.is_closed(), conn.dispatch_state(), conn.readiness_handle().is_none())
            })
        })
        .collect();

    for worker in workers {
        assert_eq!(worker.join().unwrap(), (true, DispatchState::Stopped, true));
    }
    assert!(backend.is_handle_closed());
}
