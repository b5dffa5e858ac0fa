//! Paged, bounded fan-out of one issue to every active subscriber

use std::{
    collections::HashMap,
    fmt,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use futures_util::FutureExt;
use gazette_common::{
    DeliveryLogRecord, DeliveryOutcome, Issue, Signal, Subscriber, internal, outgoing,
};
use gazette_store::{DeliveryLogStore, PageRequest, SubscriberStore};
use serde::Deserialize;
use tokio::{
    sync::broadcast::{self, error::TryRecvError},
    task::{self, JoinSet},
};

use crate::{error::DistributionError, transport::MailTransport};

const fn default_page_size() -> usize {
    10_000
}

const fn default_max_concurrent_sends() -> usize {
    64
}

/// Paging and concurrency limits for distribution runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DistributionConfig {
    /// Subscribers fetched, sent and logged per page
    ///
    /// Default: 10,000
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Maximum sends awaiting the transport at once
    ///
    /// Default: 64
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_concurrent_sends: default_max_concurrent_sends(),
        }
    }
}

/// Outcome of one distribution run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionSummary {
    pub issue_label: String,
    /// Active subscribers counted when the run started
    pub total_subscribers: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Pages whose records were persisted
    pub pages: u64,
    pub elapsed: Duration,
    /// The run stopped early on shutdown; later pages were not sent
    pub cancelled: bool,
}

impl DistributionSummary {
    /// Subscribers a send was attempted for
    #[must_use]
    pub const fn processed(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Successful sends as a percentage of attempted sends
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        match self.processed() {
            0 => 0.0,
            processed => self.success_count as f64 * 100.0 / processed as f64,
        }
    }

    /// Wall-clock milliseconds spent per counted subscriber
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_ms_per_subscriber(&self) -> f64 {
        match self.total_subscribers {
            0 => 0.0,
            total => self.elapsed.as_secs_f64() * 1_000.0 / total as f64,
        }
    }
}

impl fmt::Display for DistributionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} subscribers, {} sent, {} failed in {:.3}s ({:.2} ms/subscriber, {:.1}% success){}",
            self.issue_label,
            self.total_subscribers,
            self.success_count,
            self.failure_count,
            self.elapsed.as_secs_f64(),
            self.avg_ms_per_subscriber(),
            self.success_rate(),
            if self.cancelled { ", cancelled" } else { "" }
        )
    }
}

/// Counters for a run in progress
#[derive(Debug)]
struct DistributionRun {
    issue: Issue,
    total_subscribers: u64,
    success: AtomicU64,
    failure: AtomicU64,
    pages: AtomicU64,
    started: Instant,
}

impl DistributionRun {
    fn new(issue: Issue, total_subscribers: u64) -> Self {
        Self {
            issue,
            total_subscribers,
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
            pages: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    fn fold(&self, record: &DeliveryLogRecord) {
        let counter = if record.outcome.is_success() {
            &self.success
        } else {
            &self.failure
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn summary(&self, cancelled: bool) -> DistributionSummary {
        DistributionSummary {
            issue_label: self.issue.label.clone(),
            total_subscribers: self.total_subscribers,
            success_count: self.success.load(Ordering::Relaxed),
            failure_count: self.failure.load(Ordering::Relaxed),
            pages: self.pages.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
            cancelled,
        }
    }
}

/// Send one issue to one subscriber and record what happened
///
/// Transport errors and panics both become FAILURE.
async fn send_one(
    transport: Arc<dyn MailTransport>,
    subscriber: Subscriber,
    issue: Issue,
) -> DeliveryLogRecord {
    let metrics = gazette_metrics::metrics();
    if let Some(metrics) = metrics {
        metrics.distribution.record_send_started();
    }

    let attempt = AssertUnwindSafe(transport.send(&subscriber.email, &issue.content))
        .catch_unwind()
        .await;

    let sent = match attempt {
        Ok(Ok(sent)) => sent,
        Ok(Err(e)) => {
            tracing::warn!(subscriber = %subscriber.id, error = %e, "Send failed");
            false
        }
        Err(_) => {
            tracing::error!(subscriber = %subscriber.id, "Transport panicked during send");
            false
        }
    };

    if let Some(metrics) = metrics {
        metrics.distribution.record_send_finished(sent);
    }

    DeliveryLogRecord::new(&subscriber, &issue, DeliveryOutcome::from_sent(sent))
}

/// Whether a shutdown has been signalled since the last check
fn shutdown_requested(shutdown: Option<&mut broadcast::Receiver<Signal>>) -> bool {
    let Some(shutdown) = shutdown else {
        return false;
    };

    match shutdown.try_recv() {
        Ok(Signal::Shutdown | Signal::Finalised) | Err(TryRecvError::Lagged(_)) => true,
        Err(TryRecvError::Empty | TryRecvError::Closed) => false,
    }
}

/// Distributes issues to every active subscriber
///
/// Pages are handled one at a time: fetch, send concurrently (at most
/// `max_concurrent_sends` in flight), then persist the page's records in a
/// single bulk write before the next fetch.
#[derive(Debug, Clone)]
pub struct DistributionEngine {
    subscribers: Arc<dyn SubscriberStore>,
    delivery_log: Arc<dyn DeliveryLogStore>,
    transport: Arc<dyn MailTransport>,
    config: DistributionConfig,
}

impl DistributionEngine {
    pub fn new(
        subscribers: Arc<dyn SubscriberStore>,
        delivery_log: Arc<dyn DeliveryLogStore>,
        transport: Arc<dyn MailTransport>,
        config: DistributionConfig,
    ) -> Self {
        Self {
            subscribers,
            delivery_log,
            transport,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &DistributionConfig {
        &self.config
    }

    /// Send `issue` to every active subscriber
    ///
    /// # Errors
    /// [`DistributionError::Persistence`] if a page's records cannot be
    /// written; pages already written stay written and later pages are not
    /// attempted. [`DistributionError::Store`] if subscribers cannot be
    /// counted or paged.
    pub async fn distribute(&self, issue: &Issue) -> Result<DistributionSummary, DistributionError> {
        self.run(issue, None).await
    }

    /// As [`distribute`](Self::distribute), stopping early on shutdown
    ///
    /// The signal is checked between pages: the page in flight is finished
    /// and persisted, no further page is fetched, and the summary comes back
    /// with `cancelled` set.
    ///
    /// # Errors
    /// As [`distribute`](Self::distribute)
    pub async fn distribute_until(
        &self,
        issue: &Issue,
        shutdown: &mut broadcast::Receiver<Signal>,
    ) -> Result<DistributionSummary, DistributionError> {
        self.run(issue, Some(shutdown)).await
    }

    #[tracing::instrument(level = "info", skip_all, fields(issue = %issue.label))]
    async fn run(
        &self,
        issue: &Issue,
        mut shutdown: Option<&mut broadcast::Receiver<Signal>>,
    ) -> Result<DistributionSummary, DistributionError> {
        let total = self.subscribers.count_active().await?;
        let run = DistributionRun::new(issue.clone(), total);

        internal!(
            level = INFO,
            "Distributing {} to {total} active subscribers",
            issue.label
        );

        let page_size = self.config.page_size.max(1);
        let mut request = PageRequest::first(page_size);
        let mut cancelled = false;

        loop {
            if shutdown_requested(shutdown.as_deref_mut()) {
                tracing::warn!(page = request.number, "Shutdown requested, stopping distribution");
                cancelled = true;
                break;
            }

            let page = self.subscribers.find_active_page(request).await?;
            if page.is_empty() {
                break;
            }

            let has_next = page.has_next;
            let next = request.next(&page);
            let records = self.send_page(&run, page.records).await;

            if let Err(source) = self.delivery_log.save_all(&records).await {
                tracing::error!(page = request.number, error = %source, "Failed to persist page");
                if let Some(metrics) = gazette_metrics::metrics() {
                    metrics.distribution.record_page_failed();
                    metrics
                        .distribution
                        .record_run("failed", run.started.elapsed().as_secs_f64());
                }
                return Err(DistributionError::Persistence {
                    page: request.number,
                    source,
                });
            }

            run.pages.fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = gazette_metrics::metrics() {
                metrics.distribution.record_page_persisted();
            }

            tracing::debug!(
                page = request.number,
                records = records.len(),
                success = run.success.load(Ordering::Relaxed),
                failure = run.failure.load(Ordering::Relaxed),
                "Page persisted"
            );

            if !has_next {
                break;
            }
            request = next;
        }

        let summary = run.summary(cancelled);
        if let Some(metrics) = gazette_metrics::metrics() {
            let result = if cancelled { "cancelled" } else { "completed" };
            metrics
                .distribution
                .record_run(result, summary.elapsed.as_secs_f64());
        }

        Ok(summary)
    }

    /// Fan out one page, returning one record per subscriber
    async fn send_page(
        &self,
        run: &DistributionRun,
        subscribers: Vec<Subscriber>,
    ) -> Vec<DeliveryLogRecord> {
        let mut records = Vec::with_capacity(subscribers.len());
        let mut pending = subscribers.into_iter();
        let mut join_set = JoinSet::new();
        let mut in_flight = HashMap::new();

        let spawn = |join_set: &mut JoinSet<DeliveryLogRecord>,
                     in_flight: &mut HashMap<task::Id, Subscriber>,
                     subscriber: Subscriber| {
            outgoing!("Queueing send to subscriber {}", subscriber.id);
            let handle = join_set.spawn(send_one(
                Arc::clone(&self.transport),
                subscriber.clone(),
                run.issue.clone(),
            ));
            in_flight.insert(handle.id(), subscriber);
        };

        for subscriber in pending
            .by_ref()
            .take(self.config.max_concurrent_sends.max(1))
        {
            spawn(&mut join_set, &mut in_flight, subscriber);
        }

        while let Some(joined) = join_set.join_next_with_id().await {
            if let Some(record) = settle(joined, &mut in_flight, &run.issue) {
                run.fold(&record);
                records.push(record);
            }

            if let Some(subscriber) = pending.next() {
                spawn(&mut join_set, &mut in_flight, subscriber);
            }
        }

        records
    }
}

/// Turn a finished send task into its record
///
/// A task that died outside the transport call still owes its subscriber a
/// FAILURE record.
fn settle(
    joined: Result<(task::Id, DeliveryLogRecord), task::JoinError>,
    in_flight: &mut HashMap<task::Id, Subscriber>,
    issue: &Issue,
) -> Option<DeliveryLogRecord> {
    match joined {
        Ok((id, record)) => {
            in_flight.remove(&id);
            Some(record)
        }
        Err(e) => {
            tracing::error!(error = %e, "Send task did not complete");
            let subscriber = in_flight.remove(&e.id())?;
            if let Some(metrics) = gazette_metrics::metrics() {
                metrics.distribution.record_send_finished(false);
            }
            Some(DeliveryLogRecord::new(
                &subscriber,
                issue,
                DeliveryOutcome::Failure,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use gazette_common::{EmailAddress, NewSubscriber, SubscriberId};
    use gazette_store::{MemorySubscriberStore, TestDeliveryLog};

    use super::*;
    use crate::{LoggingTransport, error::TransportError};

    #[derive(Debug)]
    struct Flaky;

    #[async_trait::async_trait]
    impl MailTransport for Flaky {
        async fn send(&self, to: &EmailAddress, _: &str) -> Result<bool, TransportError> {
            match to.as_str() {
                s if s.starts_with("error") => Err(TransportError::Unavailable("down".into())),
                s if s.starts_with("panic") => panic!("transport bug"),
                s if s.starts_with("false") => Ok(false),
                _ => Ok(true),
            }
        }
    }

    async fn seed(store: &MemorySubscriberStore, prefixes: &[&str]) {
        for (i, prefix) in prefixes.iter().enumerate() {
            let email = EmailAddress::parse(&format!("{prefix}{i}@example.com")).unwrap();
            store.insert(NewSubscriber::new(email)).await.unwrap();
        }
    }

    fn engine(
        store: &MemorySubscriberStore,
        log: &TestDeliveryLog,
        transport: Arc<dyn MailTransport>,
        page_size: usize,
    ) -> DistributionEngine {
        DistributionEngine::new(
            Arc::new(store.clone()),
            Arc::new(log.clone()),
            transport,
            DistributionConfig {
                page_size,
                max_concurrent_sends: 2,
            },
        )
    }

    #[test]
    fn test_summary_rates() {
        let summary = DistributionSummary {
            issue_label: "n1.md".to_string(),
            total_subscribers: 4,
            success_count: 3,
            failure_count: 1,
            pages: 1,
            elapsed: Duration::from_millis(200),
            cancelled: false,
        };

        assert!((summary.success_rate() - 75.0).abs() < f64::EPSILON);
        assert!((summary.avg_ms_per_subscriber() - 50.0).abs() < 1e-9);
        assert_eq!(
            summary.to_string(),
            "n1.md: 4 subscribers, 3 sent, 1 failed in 0.200s (50.00 ms/subscriber, 75.0% success)"
        );
    }

    #[test]
    fn test_empty_summary_rates_are_zero() {
        let summary = DistributionSummary {
            issue_label: "n1.md".to_string(),
            total_subscribers: 0,
            success_count: 0,
            failure_count: 0,
            pages: 0,
            elapsed: Duration::from_millis(5),
            cancelled: false,
        };
        assert!(summary.success_rate().abs() < f64::EPSILON);
        assert!(summary.avg_ms_per_subscriber().abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_errors_and_panics_are_isolated() {
        let store = MemorySubscriberStore::new();
        seed(&store, &["ok", "error", "panic", "false", "ok"]).await;
        let log = TestDeliveryLog::new();

        let summary = engine(&store, &log, Arc::new(Flaky), 10)
            .distribute(&Issue::new("n1.md", "hello"))
            .await
            .unwrap();

        assert_eq!(summary.total_subscribers, 5);
        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.failure_count, 3);
        assert_eq!(log.record_count(), 5);
        assert_eq!(log.batches(), vec![5]);

        for record in log.records() {
            let subscriber = store
                .all()
                .into_iter()
                .find(|s| s.id == record.subscriber_id)
                .unwrap();
            let expected = subscriber.email.as_str().starts_with("ok");
            assert_eq!(record.outcome.is_success(), expected, "{}", subscriber.email);
        }
    }

    #[tokio::test]
    async fn test_lost_send_task_still_gets_a_failure_record() {
        let subscriber = Subscriber {
            id: SubscriberId(3),
            email: EmailAddress::parse("lost@example.com").unwrap(),
            active: true,
        };
        let issue = Issue::new("n1.md", "hello");

        let mut join_set = JoinSet::new();
        let handle = join_set.spawn(std::future::pending::<DeliveryLogRecord>());
        let mut in_flight = HashMap::from([(handle.id(), subscriber.clone())]);
        handle.abort();

        let joined = join_set.join_next_with_id().await.unwrap();
        assert!(joined.is_err());

        let record = settle(joined, &mut in_flight, &issue).unwrap();
        assert_eq!(record.subscriber_id, subscriber.id);
        assert_eq!(record.outcome, DeliveryOutcome::Failure);
        assert_eq!(record.issue_label, "n1.md");
        assert!(in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_finished_send_task_is_taken_off_the_books() {
        let subscriber = Subscriber {
            id: SubscriberId(4),
            email: EmailAddress::parse("done@example.com").unwrap(),
            active: true,
        };
        let issue = Issue::new("n1.md", "hello");
        let record = DeliveryLogRecord::new(&subscriber, &issue, DeliveryOutcome::Success);

        let mut join_set = JoinSet::new();
        let handle = join_set.spawn(async move { record });
        let mut in_flight = HashMap::from([(handle.id(), subscriber)]);

        let joined = join_set.join_next_with_id().await.unwrap();
        let settled = settle(joined, &mut in_flight, &issue).unwrap();
        assert!(settled.outcome.is_success());
        assert!(in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_one_bulk_write_per_page() {
        let store = MemorySubscriberStore::new();
        seed(&store, &["ok"; 7]).await;
        let log = TestDeliveryLog::new();

        let summary = engine(&store, &log, Arc::new(LoggingTransport), 3)
            .distribute(&Issue::new("n1.md", "hello"))
            .await
            .unwrap();

        assert_eq!(summary.pages, 3);
        assert_eq!(log.batches(), vec![3, 3, 1]);
        assert_eq!(summary.success_count, 7);
    }

    #[tokio::test]
    async fn test_exact_page_boundary_has_no_empty_write() {
        let store = MemorySubscriberStore::new();
        seed(&store, &["ok"; 4]).await;
        let log = TestDeliveryLog::new();

        engine(&store, &log, Arc::new(LoggingTransport), 2)
            .distribute(&Issue::new("n1.md", "hello"))
            .await
            .unwrap();

        assert_eq!(log.batches(), vec![2, 2]);
    }

    #[tokio::test]
    async fn test_no_subscribers() {
        let store = MemorySubscriberStore::new();
        let log = TestDeliveryLog::new();

        let summary = engine(&store, &log, Arc::new(LoggingTransport), 10)
            .distribute(&Issue::new("n1.md", "hello"))
            .await
            .unwrap();

        assert_eq!(summary.processed(), 0);
        assert_eq!(summary.pages, 0);
        assert!(log.batches().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_stops_the_run() {
        let store = MemorySubscriberStore::new();
        seed(&store, &["ok"; 6]).await;
        let log = TestDeliveryLog::new();
        log.fail_on_batch(1);

        let err = engine(&store, &log, Arc::new(LoggingTransport), 2)
            .distribute(&Issue::new("n1.md", "hello"))
            .await
            .unwrap_err();

        assert!(matches!(err, DistributionError::Persistence { page: 1, .. }));
        assert_eq!(log.batches(), vec![2], "Page 0 stays, page 2 is never sent");
        assert_eq!(log.record_count(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_between_pages() {
        let store = MemorySubscriberStore::new();
        seed(&store, &["ok"; 6]).await;
        let log = TestDeliveryLog::new();
        let (tx, mut rx) = broadcast::channel(4);

        tx.send(Signal::Shutdown).unwrap();
        let summary = engine(&store, &log, Arc::new(LoggingTransport), 2)
            .distribute_until(&Issue::new("n1.md", "hello"), &mut rx)
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.processed(), 0);
        assert!(log.batches().is_empty());
    }

    #[tokio::test]
    async fn test_no_shutdown_runs_to_completion() {
        let store = MemorySubscriberStore::new();
        seed(&store, &["ok"; 3]).await;
        let log = TestDeliveryLog::new();
        let (_tx, mut rx) = broadcast::channel::<Signal>(4);

        let summary = engine(&store, &log, Arc::new(LoggingTransport), 2)
            .distribute_until(&Issue::new("n1.md", "hello"), &mut rx)
            .await
            .unwrap();

        assert!(!summary.cancelled);
        assert_eq!(summary.success_count, 3);
    }
}
