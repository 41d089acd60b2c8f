use super::*;

fn create_test_registry() -> Registry {
    let registry = Registry::new_custom(Some("zk".to_string()), None).unwrap();
    register_custom_metrics(&registry).unwrap();
    registry
}

#[test]
fn test_custom_registry() {
    let registry = create_test_registry();

    DISPATCHED_EVENTS.with_label_values(&["completion"]).inc();
    let metrics = &registry.gather();
    assert!(!metrics.is_empty());

    let metric_names: Vec<_> = metrics.iter().map(|m| m.get_name()).collect();
    assert!(
        metric_names.contains(&"zk_dispatched_events"),
        "Missing zk_dispatched_events"
    );
}

#[test]
fn test_counter_increment() {
    let before = ORPHAN_EVENTS.with_label_values(&["metrics_test"]).get();

    ORPHAN_EVENTS.with_label_values(&["metrics_test"]).inc();
    ORPHAN_EVENTS.with_label_values(&["metrics_test"]).inc();

    let value = ORPHAN_EVENTS.with_label_values(&["metrics_test"]).get();
    assert_eq!(value, before + 2, "Counter should increment correctly");
}
