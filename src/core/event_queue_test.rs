use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::*;
use crate::ConnectionState;
use crate::RequestId;
use crate::WatchEvent;

fn watch_event(id: i64) -> Event {
    Event::Watch(WatchEvent {
        req_id: RequestId::new(id),
        event_type: crate::EventType::Changed,
        state: ConnectionState::Connected,
        path: Some(format!("/node-{id}")),
    })
}

#[test]
fn pop_should_return_events_in_push_order() {
    let queue = EventQueue::new(true).unwrap();
    for id in 1..=5 {
        queue.push(watch_event(id));
    }

    let ids: Vec<i64> = (0..5).map(|_| queue.pop(false).unwrap().req_id().value()).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[test]
fn non_blocking_pop_on_empty_queue_returns_none() {
    let queue = EventQueue::new(true).unwrap();
    assert!(queue.pop(false).is_none());
    assert!(queue.is_empty());
}

#[test]
fn blocking_pop_should_wait_for_producer() {
    let queue = Arc::new(EventQueue::new(true).unwrap());

    let producer = {
        let queue = queue.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            queue.push(watch_event(7));
        })
    };

    let event = queue.pop(true).expect("blocking pop should yield the event");
    assert_eq!(event.req_id(), RequestId::new(7));
    producer.join().unwrap();
}

#[test]
fn shutdown_marker_is_not_surfaced_as_event() {
    let queue = EventQueue::new(true).unwrap();
    queue.push_shutdown();
    queue.push(watch_event(1));

    assert_eq!(queue.pop_item(false), Some(QueueItem::Shutdown));
    assert!(matches!(queue.pop_item(false), Some(QueueItem::Event(_))));

    queue.push_shutdown();
    assert!(queue.pop(false).is_none());
}

#[test]
fn pops_drain_readiness_pipe_by_default() {
    let queue = EventQueue::new(true).unwrap();
    queue.push(watch_event(1));
    queue.push(watch_event(2));
    queue.pop(false).unwrap();
    queue.pop(false).unwrap();

    // Taking the handle now shows whether bytes were left behind.
    let handle = queue.readiness_handle().unwrap();
    assert!(!handle.consume().unwrap());
}

#[test]
fn readiness_handle_opts_out_of_clearing() {
    let queue = EventQueue::new(true).unwrap();
    let handle = queue.readiness_handle().unwrap();

    queue.push(watch_event(1));
    queue.push(watch_event(2));
    queue.pop(false).unwrap();

    // Both bytes remain for the handle owner.
    assert!(handle.consume().unwrap());
    assert!(handle.consume().unwrap());
    assert!(!handle.consume().unwrap());
}

#[test]
fn close_is_idempotent_and_stops_signalling() {
    let queue = EventQueue::new(true).unwrap();
    assert!(!queue.is_closed());

    queue.close();
    queue.close();
    assert!(queue.is_closed());
    assert!(queue.readiness_handle().is_none());

    // Events still flow without the pipe.
    queue.push(watch_event(3));
    assert_eq!(queue.pop(false).unwrap().req_id(), RequestId::new(3));
}

#[test]
fn readiness_handle_wakes_a_mio_poll() {
    let queue = EventQueue::new(true).unwrap();
    let mut handle = queue.readiness_handle().unwrap();

    let mut poll = mio::Poll::new().unwrap();
    let mut events = mio::Events::with_capacity(4);
    poll.registry()
        .register(&mut handle, mio::Token(7), mio::Interest::READABLE)
        .unwrap();

    poll.poll(&mut events, Some(Duration::from_millis(10))).unwrap();
    assert!(events.is_empty());

    queue.push(watch_event(1));
    poll.poll(&mut events, Some(Duration::from_secs(1))).unwrap();
    assert!(events.iter().any(|e| e.token() == mio::Token(7) && e.is_readable()));

    assert!(handle.consume().unwrap());
    assert_eq!(queue.pop(false).unwrap().req_id(), RequestId::new(1));
}

#[test]
fn every_readiness_byte_announces_a_poppable_event() {
    const COUNT: i64 = 20_000;

    let queue = Arc::new(EventQueue::new(true).unwrap());
    let mut handle = queue.readiness_handle().unwrap();
    let mut poll = mio::Poll::new().unwrap();
    let mut events = mio::Events::with_capacity(4);
    poll.registry()
        .register(&mut handle, mio::Token(1), mio::Interest::READABLE)
        .unwrap();

    let producer = {
        let queue = queue.clone();
        thread::spawn(move || {
            for id in 1..=COUNT {
                queue.push(watch_event(id));
            }
        })
    };

    let mut popped = 0;
    while popped < COUNT {
        poll.poll(&mut events, Some(Duration::from_secs(2))).unwrap();
        assert!(!events.is_empty(), "stalled after {popped} events");
        while handle.consume().unwrap() {
            let event = queue.pop(false).expect("readiness byte without a queued event");
            popped += 1;
            assert_eq!(event.req_id(), RequestId::new(popped));
        }
    }

    producer.join().unwrap();
    assert!(queue.is_empty());
}

#[test]
#[tracing_test::traced_test]
fn full_readiness_pipe_is_reported_once_and_drain_recovers_every_event() {
    // more items than a default 64 KiB pipe can announce
    const COUNT: i64 = 70_000;

    let queue = EventQueue::new(true).unwrap();
    let handle = queue.readiness_handle().unwrap();
    for id in 1..=COUNT {
        queue.push(Event::Watch(WatchEvent {
            req_id: RequestId::new(id),
            event_type: crate::EventType::Changed,
            state: ConnectionState::Connected,
            path: None,
        }));
    }

    logs_assert(|lines: &[&str]| {
        match lines.iter().filter(|line| line.contains("readiness pipe full")).count() {
            1 => Ok(()),
            n => Err(format!("expected one saturation warning, got {n}")),
        }
    });

    while handle.consume().unwrap() {}
    let mut popped = 0;
    while queue.pop(false).is_some() {
        popped += 1;
    }
    assert_eq!(popped, COUNT);
}
