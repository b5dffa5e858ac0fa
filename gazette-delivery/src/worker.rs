//! Consumes dispatches and runs the distribution engine for each

use std::sync::Arc;

use gazette_common::{Signal, incoming, internal};
use tokio::sync::{broadcast, mpsc};

use crate::{
    engine::{DistributionEngine, DistributionSummary},
    error::DistributionError,
    publisher::NewsletterDispatch,
};

/// Receives [`NewsletterDispatch`]es and distributes them one at a time
///
/// Every dispatch is distributed from scratch, even if the same issue
/// arrives twice. A failed run is logged and the worker moves on to the
/// next dispatch.
#[derive(Debug)]
pub struct DistributionWorker {
    engine: Arc<DistributionEngine>,
    receiver: mpsc::Receiver<NewsletterDispatch>,
}

impl DistributionWorker {
    pub const fn new(
        engine: Arc<DistributionEngine>,
        receiver: mpsc::Receiver<NewsletterDispatch>,
    ) -> Self {
        Self { engine, receiver }
    }

    /// Handle one dispatch
    ///
    /// # Errors
    /// If the run had to be abandoned
    pub async fn handle(
        &self,
        dispatch: NewsletterDispatch,
        shutdown: &mut broadcast::Receiver<Signal>,
    ) -> Result<DistributionSummary, DistributionError> {
        incoming!(
            level = INFO,
            "Received dispatch for {} published at {}",
            dispatch.issue_label,
            dispatch.published_at
        );

        let issue = dispatch.into_issue();
        let summary = self.engine.distribute_until(&issue, shutdown).await?;

        tracing::info!(
            issue = %summary.issue_label,
            total = summary.total_subscribers,
            success = summary.success_count,
            failure = summary.failure_count,
            elapsed_ms = summary.elapsed.as_millis(),
            ms_per_subscriber = format_args!("{:.2}", summary.avg_ms_per_subscriber()),
            success_rate = format_args!("{:.1}%", summary.success_rate()),
            cancelled = summary.cancelled,
            "Distribution finished"
        );

        Ok(summary)
    }

    /// Process dispatches until shutdown or until every sender is gone
    ///
    /// A shutdown that arrives mid-run lets the current page finish, then
    /// the worker exits.
    pub async fn serve(mut self, mut shutdown: broadcast::Receiver<Signal>) {
        internal!(level = INFO, "Distribution worker starting");

        loop {
            tokio::select! {
                dispatch = self.receiver.recv() => {
                    let Some(dispatch) = dispatch else {
                        internal!("Dispatch channel closed");
                        break;
                    };

                    match self.handle(dispatch, &mut shutdown).await {
                        Ok(summary) if summary.cancelled => break,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "Distribution run failed");
                        }
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!("Distribution worker received shutdown signal");
                        }
                        Err(e) => {
                            tracing::error!("Distribution worker shutdown channel error: {e}");
                        }
                    }
                    break;
                }
            }
        }

        internal!(level = INFO, "Distribution worker shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gazette_common::{EmailAddress, Issue, NewSubscriber};
    use gazette_store::{MemorySubscriberStore, SubscriberStore, TestDeliveryLog};

    use super::*;
    use crate::{DistributionConfig, LoggingTransport, publisher::dispatch_channel};

    async fn setup() -> (TestDeliveryLog, Arc<DistributionEngine>) {
        let store = MemorySubscriberStore::new();
        for i in 0..3 {
            let email = EmailAddress::parse(&format!("r{i}@example.com")).unwrap();
            store.insert(NewSubscriber::new(email)).await.unwrap();
        }
        let log = TestDeliveryLog::new();
        let engine = DistributionEngine::new(
            Arc::new(store),
            Arc::new(log.clone()),
            Arc::new(LoggingTransport),
            DistributionConfig::default(),
        );
        (log, Arc::new(engine))
    }

    #[tokio::test]
    async fn test_worker_distributes_each_dispatch() {
        let (log, engine) = setup().await;
        let (tx, rx) = dispatch_channel(4);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);

        let worker = tokio::spawn(DistributionWorker::new(engine, rx).serve(shutdown_rx));

        let issue = Issue::new("n1.md", "hello");
        tx.send(NewsletterDispatch::new(&issue)).await.unwrap();
        // Redelivery of the same issue runs again
        tx.send(NewsletterDispatch::new(&issue)).await.unwrap();

        log.wait_for_count(6, Duration::from_secs(5)).await.unwrap();
        assert_eq!(log.batches(), vec![3, 3]);

        shutdown_tx.send(Signal::Shutdown).unwrap();
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_worker_survives_failed_run() {
        let (log, engine) = setup().await;
        log.fail_on_batch(0);
        let (tx, rx) = dispatch_channel(4);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(4);

        let worker = tokio::spawn(DistributionWorker::new(engine, rx).serve(shutdown_rx));

        tx.send(NewsletterDispatch::new(&Issue::new("n1.md", "a")))
            .await
            .unwrap();
        tx.send(NewsletterDispatch::new(&Issue::new("n2.md", "b")))
            .await
            .unwrap();

        log.wait_for_count(3, Duration::from_secs(5)).await.unwrap();
        assert!(log.records().iter().all(|r| r.issue_label == "n2.md"));

        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_handle_returns_summary() {
        let (_log, engine) = setup().await;
        let (_tx, rx) = dispatch_channel(1);
        let (_shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let summary = DistributionWorker::new(engine, rx)
            .handle(
                NewsletterDispatch::new(&Issue::new("n1.md", "hello")),
                &mut shutdown_rx,
            )
            .await
            .unwrap();

        assert_eq!(summary.total_subscribers, 3);
        assert_eq!(summary.success_count, 3);
        assert_eq!(summary.failure_count, 0);
    }
}
