#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::unbounded;
use crossbeam_channel::Receiver;
use zk_dispatch::backend::Backend;
use zk_dispatch::backend::ConnectionTarget;
use zk_dispatch::backend::MemoryBackend;
use zk_dispatch::handler;
use zk_dispatch::ClientConfig;
use zk_dispatch::Connection;
use zk_dispatch::Event;
use zk_dispatch::HandlerEntry;

pub const WAIT: Duration = Duration::from_secs(2);

pub fn test_config() -> ClientConfig {
    ClientConfig {
        connect_timeout_ms: 500,
        connect_poll_interval_ms: 10,
        dispatch_join_grace_ms: 200,
        ..Default::default()
    }
}

/// Open connection over a fresh in-memory backend.
pub fn open_connection(global: Option<HandlerEntry>) -> (Arc<MemoryBackend>, Connection) {
    let backend = Arc::new(MemoryBackend::new());
    let connection = Connection::new(
        ConnectionTarget::parse("localhost:2181").unwrap(),
        test_config(),
        backend.clone() as Arc<dyn Backend>,
        global,
    );
    connection.open(Duration::from_millis(500)).unwrap();
    (backend, connection)
}

/// Handler forwarding `(label, event)` into a channel.
pub fn recording(label: &'static str) -> (HandlerEntry, Receiver<(&'static str, Event)>) {
    let (tx, rx) = unbounded();
    let entry = HandlerEntry::new(
        handler(move |n| {
            let _ = tx.send((label, n.event.clone()));
            Ok(())
        }),
        None,
    );
    (entry, rx)
}
