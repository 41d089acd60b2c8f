use std::sync::Arc;

use mockall::Sequence;
use tracing_test::traced_test;

use super::delivery::run_delivery_loop;
use super::*;
use crate::backend::BackendEvent;
use crate::backend::MockBackend;
use crate::Error;

fn session_event() -> Event {
    Event::Watch(WatchEvent::session(ConnectionState::Connected))
}

#[test]
fn events_are_queued_until_shutdown_marker() {
    let mut backend = MockBackend::new();
    let mut seq = Sequence::new();
    backend
        .expect_next_event()
        .times(2)
        .in_sequence(&mut seq)
        .returning(|| Ok(BackendEvent::Event(session_event())));
    backend
        .expect_next_event()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Ok(BackendEvent::Shutdown));

    let queue = Arc::new(EventQueue::new(true).unwrap());
    run_delivery_loop(Arc::new(backend), queue.clone());

    assert_eq!(queue.len(), 2);
    assert_eq!(queue.pop(false).unwrap().req_id(), RequestId::GLOBAL);
}

#[test]
#[traced_test]
fn closed_handle_ends_the_loop_quietly() {
    let mut backend = MockBackend::new();
    backend.expect_next_event().times(1).returning(|| Err(Error::HandleClosed));

    let queue = Arc::new(EventQueue::new(true).unwrap());
    run_delivery_loop(Arc::new(backend), queue.clone());

    assert!(queue.is_empty());
    assert!(logs_contain("backend handle already closed"));
    assert!(!logs_contain("backend failed to deliver events"));
}

#[test]
#[traced_test]
fn backend_error_is_logged_and_ends_the_loop() {
    let mut backend = MockBackend::new();
    backend
        .expect_next_event()
        .times(1)
        .returning(|| Err(Error::Backend("socket reset".to_string())));

    let queue = Arc::new(EventQueue::new(true).unwrap());
    run_delivery_loop(Arc::new(backend), queue);

    assert!(logs_contain("backend failed to deliver events"));
    assert!(logs_contain("socket reset"));
}
