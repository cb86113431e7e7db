//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::Ordering;

use crate::db::jobs;
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the job store cannot be queried
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// `channel` or `http`
    pub transport: String,
    /// Jobs not yet DONE or FAILED
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_jobs: Option<u64>,
    /// Accepted push deliveries still being handled
    pub push_in_flight: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = Utc::now()
        .signed_duration_since(state.startup_time)
        .num_seconds()
        .max(0) as u64;

    let active_jobs = match jobs::count_active(&state.ctx.pool).await {
        Ok(count) => Some(count),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not count active jobs");
            None
        }
    };

    Json(HealthResponse {
        status: if active_jobs.is_some() { "ok" } else { "degraded" }.to_string(),
        module: "labelcheck-pipeline".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        transport: state.transport_mode.as_str().to_string(),
        active_jobs,
        push_in_flight: state.push_in_flight.load(Ordering::SeqCst),
        last_error: state.last_error.read().await.clone(),
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
