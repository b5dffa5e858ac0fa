use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use gazette_api::{ApiConfig, ApiServer, ApiState, HealthChecker};
use gazette_common::{Signal, internal, logging};
use gazette_delivery::{
    DistributionConfig, DistributionEngine, DistributionWorker, IssuePublisher, IssueSequencer,
    IssuesConfig, LoggingTransport, MailTransport, Schedule, Scheduler, SubscriptionManager,
    dispatch_channel,
};
use gazette_metrics::MetricsConfig;
use gazette_store::{StoreConfig, Stores};
use serde::Deserialize;
use tokio::sync::broadcast;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "GAZETTE_CONFIG";

/// Top-level configuration, read from RON
///
/// ```ron
/// Gazette (
///     store: Sqlite(path: "/var/lib/gazette/gazette.db"),
///     issues: (directory: "newsletters", extension: "md", gap_policy: Fail),
///     distribution: (page_size: 10000, max_concurrent_sends: 64),
///     schedule: Daily(hour: 8, minute: 0, utc_offset_hours: 9),
///     api: (listen_address: "[::]:8080"),
///     metrics: (enabled: false),
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Gazette {
    pub store: StoreConfig,
    pub issues: IssuesConfig,
    pub distribution: DistributionConfig,
    pub schedule: Schedule,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    /// Dispatches the scheduler may queue ahead of the worker
    pub dispatch_capacity: usize,
}

const fn default_dispatch_capacity() -> usize {
    16
}

impl Default for Gazette {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            issues: IssuesConfig::default(),
            distribution: DistributionConfig::default(),
            schedule: Schedule::default(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            dispatch_capacity: default_dispatch_capacity(),
        }
    }
}

/// Find the configuration file using the following precedence:
/// 1. `explicit`, when given
/// 2. `GAZETTE_CONFIG` environment variable
/// 3. ./gazette.config.ron (current working directory)
/// 4. /etc/gazette/gazette.config.ron (system-wide config)
///
/// # Errors
///
/// If a named file does not exist, or none of the default paths do.
pub fn find_config_file(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        anyhow::bail!("Config file does not exist: {}", path.display());
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        PathBuf::from("./gazette.config.ron"),
        PathBuf::from("/etc/gazette/gazette.config.ron"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

/// Read and parse a config file
///
/// # Errors
///
/// If the file cannot be read or is not valid config.
pub fn load_config(path: &Path) -> anyhow::Result<Gazette> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    ron::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
}

/// Wait for CTRL+C or SIGTERM
async fn shutdown_signal() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r?;
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate signal received, shutting down");
        }
    }

    Ok(())
}

fn joined<E>(
    result: Result<Result<(), E>, tokio::task::JoinError>,
    task: &str,
) -> anyhow::Result<()>
where
    E: std::error::Error + Send + Sync + 'static,
{
    result
        .with_context(|| format!("{task} task panicked"))?
        .with_context(|| format!("{task} failed"))
}

impl Gazette {
    /// Open the configured stores
    ///
    /// # Errors
    ///
    /// If the database cannot be opened or migrated.
    pub fn open_stores(&self) -> anyhow::Result<Stores> {
        self.store.open().context("Failed to open stores")
    }

    #[must_use]
    pub fn sequencer(&self, stores: &Stores) -> IssueSequencer {
        IssueSequencer::new(
            Arc::new(self.issues.source()),
            stores.delivery_log.clone(),
            self.issues.gap_policy,
        )
    }

    #[must_use]
    pub fn engine(&self, stores: &Stores, transport: Arc<dyn MailTransport>) -> DistributionEngine {
        DistributionEngine::new(
            stores.subscribers.clone(),
            stores.delivery_log.clone(),
            transport,
            self.distribution,
        )
    }

    /// Run every component until CTRL+C or SIGTERM
    ///
    /// # Errors
    ///
    /// If a component fails to start, or the scheduler stops on a fatal
    /// error.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();
        self.run_until(shutdown_signal()).await
    }

    /// Run every component until `stop` resolves
    ///
    /// On stop, the shutdown signal is broadcast and every component is
    /// awaited. The worker finishes the page it is on before exiting.
    ///
    /// # Errors
    ///
    /// As [`run`](Self::run), plus any error `stop` resolves to.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run_until<F>(self, stop: F) -> anyhow::Result<()>
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        gazette_metrics::init_metrics(&self.metrics)?;
        self.schedule.validate()?;

        let (shutdown, _) = broadcast::channel(16);
        let health = Arc::new(HealthChecker::new());

        let stores = self.open_stores()?;
        health.set_store_ready(true);

        let subscriptions = SubscriptionManager::new(stores.subscribers.clone());
        let engine = Arc::new(self.engine(&stores, Arc::new(LoggingTransport)));
        let (sender, receiver) = dispatch_channel(self.dispatch_capacity);
        let scheduler = Scheduler::new(
            self.schedule,
            IssuePublisher::new(self.sequencer(&stores), sender),
        );

        let api = if self.api.enabled {
            let state = ApiState {
                subscriptions,
                health: health.clone(),
            };
            Some(ApiServer::new(&self.api, state).await?)
        } else {
            internal!(level = INFO, "HTTP API disabled");
            None
        };

        internal!(level = INFO, "Controller running");

        let worker =
            tokio::spawn(DistributionWorker::new(engine, receiver).serve(shutdown.subscribe()));
        health.set_worker_ready(true);

        let mut scheduler = {
            let receiver = shutdown.subscribe();
            tokio::spawn(async move { scheduler.serve(receiver).await })
        };
        health.set_scheduler_ready(true);

        let api = api.map(|server| tokio::spawn(server.serve(shutdown.subscribe())));

        let ret = tokio::select! {
            r = stop => {
                let _ = shutdown.send(Signal::Shutdown);
                let scheduled = joined(scheduler.await, "Scheduler");
                r.and(scheduled)
            }
            r = &mut scheduler => {
                let _ = shutdown.send(Signal::Shutdown);
                joined(r, "Scheduler")
            }
        };

        internal!(level = INFO, "Shutting down...");
        health.set_scheduler_ready(false);

        worker.await.context("Worker task panicked")?;
        health.set_worker_ready(false);

        if let Some(api) = api {
            joined(api.await, "API server")?;
        }

        internal!(level = INFO, "Shutdown complete");

        ret
    }
}
