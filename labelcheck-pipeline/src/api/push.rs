//! Push delivery endpoints
//!
//! An HTTP transport delivers each message by POSTing it here. The message is
//! acknowledged with 202 as soon as it parses and the handler runs in a
//! detached task, so a publisher timing out never cancels a handler halfway
//! through a group. A handler error is redelivered locally after a backoff,
//! up to `max_deliveries`.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use tokio::task::JoinHandle;

use crate::coordinator;
use crate::models::{CompletionMessage, FanOutMessage, UploadTrigger};
use crate::services::PipelineMessage;
use crate::AppState;

/// POST /push/upload
pub async fn push_upload(
    State(state): State<AppState>,
    Json(message): Json<UploadTrigger>,
) -> (StatusCode, Json<Value>) {
    accept(state, PipelineMessage::Upload(message))
}

/// POST /push/fan-out
pub async fn push_fan_out(
    State(state): State<AppState>,
    Json(message): Json<FanOutMessage>,
) -> (StatusCode, Json<Value>) {
    accept(state, PipelineMessage::FanOut(message))
}

/// POST /push/completion
pub async fn push_completion(
    State(state): State<AppState>,
    Json(message): Json<CompletionMessage>,
) -> (StatusCode, Json<Value>) {
    accept(state, PipelineMessage::Completion(message))
}

fn accept(state: AppState, message: PipelineMessage) -> (StatusCode, Json<Value>) {
    let body = json!({
        "accepted": true,
        "kind": message.kind(),
        "job_id": message.job_id(),
    });
    spawn_delivery(state, message);
    (StatusCode::ACCEPTED, Json(body))
}

/// Run the handler for `message` until it returns Ok or deliveries run out
pub fn spawn_delivery(state: AppState, message: PipelineMessage) -> JoinHandle<()> {
    state.push_in_flight.fetch_add(1, Ordering::SeqCst);

    tokio::spawn(async move {
        let kind = message.kind();
        let job_id = message.job_id();
        let options = state.push_delivery;
        let max_deliveries = options.max_deliveries.max(1);

        for attempt in 1..=max_deliveries {
            match coordinator::dispatch(&state.ctx, message.clone()).await {
                Ok(outcome) => {
                    tracing::debug!(job_id = %job_id, kind, attempt, ?outcome, "Push delivery handled");
                    break;
                }
                Err(e) => {
                    *state.last_error.write().await = Some(format!("{}: {}", kind, e));
                    if attempt == max_deliveries {
                        tracing::error!(
                            job_id = %job_id,
                            kind,
                            attempts = attempt,
                            error = %e,
                            "Push delivery failed, attempts exhausted"
                        );
                        break;
                    }
                    tracing::warn!(
                        job_id = %job_id,
                        kind,
                        attempt,
                        error = %e,
                        "Push delivery failed, redelivering"
                    );
                    tokio::time::sleep(options.redelivery_backoff).await;
                }
            }
        }

        state.push_in_flight.fetch_sub(1, Ordering::SeqCst);
    })
}

/// Build push delivery routes
pub fn push_routes() -> Router<AppState> {
    Router::new()
        .route("/push/upload", post(push_upload))
        .route("/push/fan-out", post(push_fan_out))
        .route("/push/completion", post(push_completion))
}
