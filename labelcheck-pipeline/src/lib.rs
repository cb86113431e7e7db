//! labelcheck-pipeline library interface
//!
//! Event-driven label compliance pipeline: extraction, per-group rule
//! evaluation and report assembly, driven by an at-least-once transport.

pub mod api;
pub mod checklist;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::coordinator::PipelineContext;
pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::config::{TransportConfig, TransportMode};
use crate::services::DispatcherOptions;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Handler context (pool, collaborators, transport, event bus)
    pub ctx: Arc<PipelineContext>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last push-delivery error, for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
    /// How this service publishes messages
    pub transport_mode: TransportMode,
    /// Redelivery bound for messages accepted on `/push/*`
    pub push_delivery: DispatcherOptions,
    /// Accepted push deliveries whose handler has not finished
    pub push_in_flight: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self {
            ctx,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
            transport_mode: TransportMode::default(),
            push_delivery: TransportConfig::default().dispatcher_options(),
            push_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_transport(mut self, mode: TransportMode, push_delivery: DispatcherOptions) -> Self {
        self.transport_mode = mode;
        self.push_delivery = push_delivery;
        self
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::job_routes())
        .merge(api::push_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
