//! HTTP server for the subscription API and health probes

use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use gazette_common::{EmailAddress, Signal};
use gazette_delivery::{SubscribeOutcome, SubscriptionError, SubscriptionManager};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;

use crate::{ApiConfig, ApiError, HealthChecker};

/// Shared handler state
#[derive(Debug, Clone)]
pub struct ApiState {
    pub subscriptions: SubscriptionManager,
    pub health: Arc<HealthChecker>,
}

/// Body of both subscription endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionRequest {
    /// A missing field is treated like a blank address
    #[serde(default)]
    pub email: String,
}

/// Body returned on success
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionResponse {
    pub email: String,
    pub status: String,
    pub message: String,
}

/// Build the router with every route and the request timeout applied
pub fn router(state: ApiState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/api/subscriptions", post(subscribe_handler))
        .route("/api/subscriptions/unsubscribe", post(unsubscribe_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
}

/// Subscription API server
pub struct ApiServer {
    listener: TcpListener,
    router: Router,
}

impl ApiServer {
    /// Bind the listener and build the router
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the configured address fails.
    pub async fn new(config: &ApiConfig, state: ApiState) -> Result<Self, ApiError> {
        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|e| ApiError::BindError {
                address: config.listen_address.clone(),
                source: e,
            })?;

        tracing::info!(address = %config.listen_address, "API server bound successfully");

        let router = router(state, Duration::from_secs(config.request_timeout_secs));

        Ok(Self { listener, router })
    }

    /// Address the server is listening on
    ///
    /// # Errors
    ///
    /// If the socket address cannot be read.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ApiError> {
        self.listener
            .local_addr()
            .map_err(|e| ApiError::ServerError(e.to_string()))
    }

    /// Run the server until a shutdown signal is received
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(
        self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), ApiError> {
        tracing::info!("API server starting");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("API server received shutdown signal");
            })
            .await
            .map_err(|e| ApiError::ServerError(e.to_string()))?;

        tracing::info!("API server stopped");
        Ok(())
    }
}

async fn subscribe_handler(
    State(state): State<ApiState>,
    Json(request): Json<SubscriptionRequest>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let subscription = state.subscriptions.subscribe_str(&request.email).await?;
    let email = subscription.subscriber.email.to_string();

    let message = match subscription.outcome {
        SubscribeOutcome::Created | SubscribeOutcome::Joined => "Subscribed",
        SubscribeOutcome::Reactivated => "Subscription reactivated",
        SubscribeOutcome::Unchanged => "Already subscribed",
    };

    Ok(Json(SubscriptionResponse {
        email,
        status: subscription.outcome.as_str().to_string(),
        message: message.to_string(),
    }))
}

async fn unsubscribe_handler(
    State(state): State<ApiState>,
    Json(request): Json<SubscriptionRequest>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let email = EmailAddress::parse(&request.email).map_err(SubscriptionError::from)?;
    let changed = state.subscriptions.unsubscribe(email.clone()).await?;

    let (status, message) = if changed {
        ("unsubscribed", "Unsubscribed")
    } else {
        ("unchanged", "Not subscribed")
    };

    Ok(Json(SubscriptionResponse {
        email: email.to_string(),
        status: status.to_string(),
        message: message.to_string(),
    }))
}

async fn liveness_handler(State(state): State<ApiState>) -> Response {
    if state.health.is_alive() {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response()
    }
}

async fn readiness_handler(State(state): State<ApiState>) -> Response {
    let status = state.health.get_status();
    if status.ready {
        (StatusCode::OK, "OK").into_response()
    } else {
        tracing::warn!(
            store_ready = status.store_ready,
            worker_ready = status.worker_ready,
            scheduler_ready = status.scheduler_ready,
            "Readiness probe failed"
        );
        (StatusCode::SERVICE_UNAVAILABLE, Json(status)).into_response()
    }
}
