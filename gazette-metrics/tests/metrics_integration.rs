//! Integration tests for metrics collection
//!
//! Verifies that the local counters behind each collector track the events
//! recorded, including under concurrent use.
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use gazette_metrics::{DistributionMetrics, SubscriptionMetrics};

#[test]
fn test_send_outcome_counters() {
    let metrics = DistributionMetrics::new().expect("Failed to create distribution metrics");

    for i in 0..10 {
        metrics.record_send_started();
        metrics.record_send_finished(i % 3 != 0);
    }

    assert_eq!(metrics.successes(), 6);
    assert_eq!(metrics.failures(), 4);
    assert_eq!(metrics.in_flight(), 0, "Every started send finished");
}

#[test]
fn test_in_flight_tracks_unfinished_sends() {
    let metrics = DistributionMetrics::new().expect("Failed to create distribution metrics");

    for _ in 0..5 {
        metrics.record_send_started();
    }
    metrics.record_send_finished(true);

    assert_eq!(metrics.in_flight(), 4);
}

#[test]
fn test_page_and_run_counters() {
    let metrics = DistributionMetrics::new().expect("Failed to create distribution metrics");

    metrics.record_page_persisted();
    metrics.record_page_persisted();
    metrics.record_page_failed();
    metrics.record_run("completed", 1.25);
    metrics.record_run("cancelled", 0.5);

    assert_eq!(metrics.pages_persisted(), 2);
    assert_eq!(metrics.pages_failed(), 1);
    assert_eq!(metrics.runs(), 2);
}

#[test]
fn test_concurrent_sends_are_counted_exactly() {
    let metrics = Arc::new(DistributionMetrics::new().expect("Failed to create metrics"));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let metrics = Arc::clone(&metrics);
            std::thread::spawn(move || {
                for _ in 0..1_000 {
                    metrics.record_send_started();
                    metrics.record_send_finished(t % 2 == 0);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    assert_eq!(metrics.successes(), 4_000);
    assert_eq!(metrics.failures(), 4_000);
    assert_eq!(metrics.in_flight(), 0);
}

#[test]
fn test_subscription_counters() {
    let metrics = SubscriptionMetrics::new().expect("Failed to create subscription metrics");

    metrics.record_subscribed("created");
    metrics.record_subscribed("unchanged");
    metrics.record_unsubscribed("deactivated");
    metrics.record_rejected("subscribe");
    metrics.record_error("unsubscribe");

    assert_eq!(metrics.subscribed(), 2);
    assert_eq!(metrics.unsubscribed(), 1);
    assert_eq!(metrics.rejected(), 1);
    assert_eq!(metrics.errors(), 1);
}
