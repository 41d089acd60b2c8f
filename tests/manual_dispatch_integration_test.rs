mod common;

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::unbounded;
use mio::Events;
use mio::Interest;
use mio::Poll;
use mio::Token;
use zk_dispatch::backend::MemoryBackend;
use zk_dispatch::Acl;
use zk_dispatch::CallOptions;
use zk_dispatch::Client;
use zk_dispatch::DispatchMode;

const READY: Token = Token(1);

#[test]
fn foreign_event_loop_drives_callbacks_through_readiness_handle() {
    let backend = Arc::new(MemoryBackend::new());
    let client = Client::builder("localhost:2181")
        .set_config(common::test_config())
        .dispatch_mode(DispatchMode::Manual)
        .backend(backend)
        .build()
        .unwrap();

    let mut handle = client.readiness_handle().unwrap();
    let mut poll = Poll::new().unwrap();
    poll.registry()
        .register(&mut handle, READY, Interest::READABLE)
        .unwrap();

    let (tx, rx) = unbounded();
    for path in ["/one", "/two"] {
        let tx = tx.clone();
        client
            .create(
                path,
                "",
                Acl::open_unsafe(),
                0,
                CallOptions::new().callback(move |_| {
                    let _ = tx.send(path);
                    Ok(())
                }),
            )
            .unwrap();
    }

    // session notice plus two completions
    let mut dispatched = 0;
    let mut events = Events::with_capacity(8);
    while dispatched < 3 {
        poll.poll(&mut events, Some(Duration::from_secs(2))).unwrap();
        assert!(!events.is_empty(), "readiness handle never fired");
        while handle.consume().unwrap() {}
        while client.dispatch_next_callback(false) {
            dispatched += 1;
        }
    }

    assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["/one", "/two"]);
    client.close().unwrap();
}
