//! Health check endpoint for service monitoring.

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{app::AppState, error::AppError, resilience::CircuitState};

/// Health check response.
///
/// Returns service status, store connectivity and the state of each
/// downstream circuit breaker.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy`, or `degraded` while any breaker is not closed
    pub status: String,

    /// Transfer store connection status
    pub store: String,

    pub dependencies: Vec<DependencyHealth>,

    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DependencyHealth {
    pub name: String,
    pub circuit: CircuitState,
}

/// Health check handler.
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "status": "healthy",
///   "store": "connected",
///   "dependencies": [{ "name": "ledger-service", "circuit": "CLOSED" }],
///   "timestamp": "2025-12-21T19:00:00Z"
/// }
/// ```
///
/// # Response (500 Internal Server Error)
///
/// If the store is unreachable, returns standard error response.
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    state.store.ping().await?;

    let dependencies: Vec<DependencyHealth> = state
        .breakers
        .states()
        .into_iter()
        .map(|(name, circuit)| DependencyHealth { name, circuit })
        .collect();

    let status = if dependencies
        .iter()
        .all(|d| d.circuit == CircuitState::Closed)
    {
        "healthy"
    } else {
        "degraded"
    };

    Ok(Json(HealthResponse {
        status: status.to_string(),
        store: "connected".to_string(),
        dependencies,
        timestamp: Utc::now(),
    }))
}
