//! Subscription request metrics

use std::sync::atomic::{AtomicU64, Ordering};

use opentelemetry::{KeyValue, metrics::Counter};

use crate::MetricsError;

/// Subscription metrics collector
#[derive(Debug)]
pub struct SubscriptionMetrics {
    /// Total number of subscription requests by operation and result
    requests_total: Counter<u64>,

    subscribed: AtomicU64,
    unsubscribed: AtomicU64,
    rejected: AtomicU64,
    errors: AtomicU64,
}

impl SubscriptionMetrics {
    /// Create a new subscription metrics collector
    ///
    /// # Errors
    ///
    /// Returns an error if metric instruments cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        let requests_total = opentelemetry::global::meter("gazette.subscription")
            .u64_counter("gazette.subscription.requests.total")
            .with_description("Total number of subscription requests by operation and result")
            .build();

        Ok(Self {
            requests_total,
            subscribed: AtomicU64::new(0),
            unsubscribed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        })
    }

    fn record(&self, operation: &'static str, result: &'static str) {
        self.requests_total.add(
            1,
            &[
                KeyValue::new("operation", operation),
                KeyValue::new("result", result),
            ],
        );
    }

    /// Record a subscribe that left the subscriber active
    ///
    /// `result` distinguishes `created`, `reactivated` and `unchanged`.
    pub fn record_subscribed(&self, result: &'static str) {
        self.record("subscribe", result);
        self.subscribed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an unsubscribe that completed, whether or not anything changed
    pub fn record_unsubscribed(&self, result: &'static str) {
        self.record("unsubscribe", result);
        self.unsubscribed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request refused because the email was invalid
    pub fn record_rejected(&self, operation: &'static str) {
        self.record(operation, "invalid");
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request that failed in the store
    pub fn record_error(&self, operation: &'static str) {
        self.record(operation, "error");
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn subscribed(&self) -> u64 {
        self.subscribed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn unsubscribed(&self) -> u64 {
        self.unsubscribed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}
