//! HTTP front end for gazette
//!
//! # Endpoints
//!
//! - **`POST /api/subscriptions`** - subscribe `{ "email": ... }`
//! - **`POST /api/subscriptions/unsubscribe`** - unsubscribe `{ "email": ... }`
//! - **`/health/live`** - liveness probe, 200 while the process can answer
//! - **`/health/ready`** - readiness probe, 200 once the store, worker and
//!   scheduler are up
//!
//! Validation failures answer 400 with `{ "error": ... }`; store and
//! invariant failures answer 500.

mod checker;
mod config;
mod error;
mod server;

pub use checker::{HealthChecker, HealthStatus};
pub use config::ApiConfig;
pub use error::{ApiError, ErrorBody};
pub use server::{ApiServer, ApiState, SubscriptionRequest, SubscriptionResponse, router};
