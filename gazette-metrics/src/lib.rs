//! OpenTelemetry metrics for the gazette newsletter service
//!
//! Metrics are pushed over OTLP to an OpenTelemetry Collector, which can
//! expose them in Prometheus format for scraping.
//!
//! - **Distribution Metrics**: sends by outcome, in-flight sends, persisted
//!   pages, run counts and durations
//! - **Subscription Metrics**: subscribe/unsubscribe requests by result
//!
//! # Usage
//!
//! ```rust,no_run
//! use gazette_metrics::{init_metrics, MetricsConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MetricsConfig {
//!     enabled: true,
//!     endpoint: "http://localhost:4318/v1/metrics".to_string(),
//! };
//!
//! init_metrics(&config)?;
//! # Ok(())
//! # }
//! ```

mod config;
mod distribution;
mod error;
mod exporter;
mod subscription;

pub use config::MetricsConfig;
pub use distribution::DistributionMetrics;
pub use error::MetricsError;
use once_cell::sync::OnceCell;
pub use subscription::SubscriptionMetrics;

/// Global metrics instance
static METRICS_INSTANCE: OnceCell<Metrics> = OnceCell::new();

/// Root metrics container
#[derive(Debug)]
pub struct Metrics {
    pub distribution: DistributionMetrics,
    pub subscription: SubscriptionMetrics,
}

/// Initialize the metrics system
///
/// Call once at startup, before anything is recorded. A no-op when metrics
/// are disabled in the config.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or if called twice.
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        tracing::info!("Metrics collection is disabled");
        return Ok(());
    }

    tracing::info!(
        endpoint = %config.endpoint,
        "Initializing OpenTelemetry metrics with OTLP exporter"
    );

    let provider = exporter::init_otlp_exporter(&config.endpoint)?;
    opentelemetry::global::set_meter_provider(provider);

    let metrics = Metrics {
        distribution: DistributionMetrics::new()?,
        subscription: SubscriptionMetrics::new()?,
    };

    METRICS_INSTANCE
        .set(metrics)
        .map_err(|_| MetricsError::AlreadyInitialized)?;

    tracing::info!("Metrics collection initialized successfully");

    Ok(())
}

/// Get the global metrics instance, if [`init_metrics`] enabled it
#[must_use]
pub fn metrics() -> Option<&'static Metrics> {
    METRICS_INSTANCE.get()
}

/// Check if metrics are enabled
#[must_use]
pub fn is_enabled() -> bool {
    METRICS_INSTANCE.get().is_some()
}
