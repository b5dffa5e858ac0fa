//! Distribution run metrics
//!
//! Tracks newsletter fan-out including:
//! - Send attempts by outcome (success/failure)
//! - Sends currently in flight
//! - Delivery-log pages persisted, and pages that failed to persist
//! - Run counts and durations by result (completed/cancelled/failed)

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter, UpDownCounter},
};

use crate::MetricsError;

/// Distribution metrics collector
#[derive(Debug)]
pub struct DistributionMetrics {
    /// Total number of send attempts by outcome
    sends_total: Counter<u64>,

    /// Number of sends awaiting the transport
    sends_in_flight: UpDownCounter<i64>,

    /// Total number of delivery-log pages written
    pages_persisted: Counter<u64>,

    /// Total number of delivery-log pages whose bulk write failed
    page_failures: Counter<u64>,

    /// Total number of distribution runs by result
    runs_total: Counter<u64>,

    /// Distribution of run durations in seconds
    run_duration: Histogram<f64>,

    success_count: AtomicU64,
    failure_count: AtomicU64,
    page_count: AtomicU64,
    page_failure_count: AtomicU64,
    in_flight_count: AtomicI64,
    run_count: AtomicU64,
}

impl DistributionMetrics {
    /// Create a new distribution metrics collector
    ///
    /// # Errors
    ///
    /// Returns an error if metric instruments cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        let meter = meter();

        let sends_total = meter
            .u64_counter("gazette.distribution.sends.total")
            .with_description("Total number of send attempts by outcome")
            .build();

        let sends_in_flight = meter
            .i64_up_down_counter("gazette.distribution.sends.in_flight")
            .with_description("Number of sends awaiting the mail transport")
            .build();

        let pages_persisted = meter
            .u64_counter("gazette.distribution.pages.persisted.total")
            .with_description("Total number of delivery-log pages written")
            .build();

        let page_failures = meter
            .u64_counter("gazette.distribution.pages.failed.total")
            .with_description("Total number of delivery-log pages that failed to persist")
            .build();

        let runs_total = meter
            .u64_counter("gazette.distribution.runs.total")
            .with_description("Total number of distribution runs by result")
            .build();

        let run_duration = meter
            .f64_histogram("gazette.distribution.run.duration.seconds")
            .with_description("Distribution of run durations")
            .build();

        Ok(Self {
            sends_total,
            sends_in_flight,
            pages_persisted,
            page_failures,
            runs_total,
            run_duration,
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            page_count: AtomicU64::new(0),
            page_failure_count: AtomicU64::new(0),
            in_flight_count: AtomicI64::new(0),
            run_count: AtomicU64::new(0),
        })
    }

    /// Record that a send was handed to the transport
    pub fn record_send_started(&self) {
        self.sends_in_flight.add(1, &[]);
        self.in_flight_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a send
    pub fn record_send_finished(&self, success: bool) {
        self.sends_in_flight.add(-1, &[]);
        self.in_flight_count.fetch_sub(1, Ordering::Relaxed);

        let outcome = if success {
            self.success_count.fetch_add(1, Ordering::Relaxed);
            "success"
        } else {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
            "failure"
        };
        self.sends_total.add(1, &[KeyValue::new("outcome", outcome)]);
    }

    /// Record a successful bulk write of one page of delivery-log records
    pub fn record_page_persisted(&self) {
        self.pages_persisted.add(1, &[]);
        self.page_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a bulk write that failed
    pub fn record_page_failed(&self) {
        self.page_failures.add(1, &[]);
        self.page_failure_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the end of a run
    ///
    /// `result` is one of `completed`, `cancelled` or `failed`.
    pub fn record_run(&self, result: &'static str, duration_secs: f64) {
        let attributes = [KeyValue::new("result", result)];
        self.runs_total.add(1, &attributes);
        self.run_duration.record(duration_secs, &attributes);
        self.run_count.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn successes(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn pages_persisted(&self) -> u64 {
        self.page_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn pages_failed(&self) -> u64 {
        self.page_failure_count.load(Ordering::Relaxed)
    }

    /// Sends currently awaiting the transport
    #[must_use]
    pub fn in_flight(&self) -> i64 {
        self.in_flight_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn runs(&self) -> u64 {
        self.run_count.load(Ordering::Relaxed)
    }
}

/// Get the OpenTelemetry meter for distribution metrics
fn meter() -> Meter {
    opentelemetry::global::meter("gazette.distribution")
}
