use lazy_static::lazy_static;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;

lazy_static! {
    pub static ref DISPATCHED_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("dispatched_events", "Events handed to a completion or watcher handler"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref ORPHAN_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("orphan_events", "Events without a registered handler"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref HANDLER_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("handler_failures", "Handlers that returned an error or panicked"),
        &["reason"]
    )
    .expect("metric can not be created");

    pub static ref SESSION_REARMS: IntCounterVec = IntCounterVec::new(
        Opts::new("session_rearms", "Entries restored after delivering a session event"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref EVENT_QUEUE_DEPTH: IntGauge =
        IntGauge::new("event_queue_depth", "Events waiting for the dispatch thread")
            .expect("metric can not be created");
}

/// Register the dispatch metrics with `registry`.
pub fn register_custom_metrics(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(DISPATCHED_EVENTS.clone()))?;
    registry.register(Box::new(ORPHAN_EVENTS.clone()))?;
    registry.register(Box::new(HANDLER_FAILURES.clone()))?;
    registry.register(Box::new(SESSION_REARMS.clone()))?;
    registry.register(Box::new(EVENT_QUEUE_DEPTH.clone()))?;
    Ok(())
}

#[cfg(test)]
mod metrics_test;
