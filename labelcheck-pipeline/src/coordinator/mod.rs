//! Pipeline coordinators
//!
//! Three stateless handlers, each safe to invoke any number of times,
//! concurrently, in any order:
//! - `extraction::handle_upload_trigger` (phase 1, fan-out)
//! - `group_executor::handle_group_message` (phase 2, one group)
//! - `aggregator::handle_completion_message` (fan-in, report assembly)
//!
//! No in-process locks guard job state. Every shared mutation is a
//! conditional single-row update or an insert-if-absent in the store.

pub mod aggregator;
pub mod extraction;
pub mod group_executor;
pub mod local;
pub mod report_builder;
pub mod sweeper;

use chrono::Utc;
use labelcheck_common::events::{EventBus, PipelineEvent};
use labelcheck_common::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use crate::checklist;
use crate::config::PipelineConfig;
use crate::db::jobs;
use crate::models::{HandlerOutcome, Job, JobStatus, UploadTrigger};
use crate::services::{
    Detector, EvaluationService, ExtractionService, FixtureExtractionService, MessageTransport,
    OfflineEvaluator, PipelineMessage, RuleDetector,
};
use crate::utils::retry_on_lock;

/// Everything a handler invocation needs
#[derive(Clone)]
pub struct PipelineContext {
    pub pool: SqlitePool,
    pub extraction: Arc<dyn ExtractionService>,
    pub evaluation: Arc<dyn EvaluationService>,
    pub detector: Arc<dyn Detector>,
    pub transport: Arc<dyn MessageTransport>,
    pub config: PipelineConfig,
    pub event_bus: EventBus,
}

impl PipelineContext {
    /// Context with offline collaborators and default tuning
    pub fn new(pool: SqlitePool, transport: Arc<dyn MessageTransport>) -> Self {
        Self {
            pool,
            extraction: Arc::new(FixtureExtractionService::new()),
            evaluation: Arc::new(OfflineEvaluator),
            detector: Arc::new(RuleDetector),
            transport,
            config: PipelineConfig::default(),
            event_bus: EventBus::new(256),
        }
    }

    pub fn with_extraction(mut self, extraction: Arc<dyn ExtractionService>) -> Self {
        self.extraction = extraction;
        self
    }

    pub fn with_evaluation(mut self, evaluation: Arc<dyn EvaluationService>) -> Self {
        self.evaluation = evaluation;
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Upper bound for retrying a locked store operation
    pub fn lock_wait_ms(&self) -> u64 {
        self.config.db_max_lock_wait_ms
    }

    pub(crate) fn emit_status_change(&self, job_id: Uuid, old: JobStatus, new: JobStatus) {
        self.event_bus.emit_lossy(PipelineEvent::JobStatusChanged {
            job_id,
            old_status: old.to_string(),
            new_status: new.to_string(),
            timestamp: Utc::now(),
        });
    }
}

/// Route a transport delivery to its handler
pub async fn dispatch(ctx: &PipelineContext, message: PipelineMessage) -> Result<HandlerOutcome> {
    match message {
        PipelineMessage::Upload(m) => extraction::handle_upload_trigger(ctx, m.job_id).await,
        PipelineMessage::FanOut(m) => group_executor::handle_group_message(ctx, &m).await,
        PipelineMessage::Completion(m) => aggregator::handle_completion_message(ctx, &m).await,
    }
}

/// Create a QUEUED job and publish its upload trigger
///
/// If the publish fails the job stays QUEUED; the stalled-job sweep fails it.
pub async fn submit_job(ctx: &PipelineContext, image_refs: &[String]) -> Result<Job> {
    let job_id = Uuid::new_v4();
    let job = retry_on_lock("create_job", ctx.lock_wait_ms(), || {
        jobs::create_job(&ctx.pool, job_id, image_refs, checklist::total_groups())
    })
    .await?;

    tracing::info!(job_id = %job_id, images = image_refs.len(), "Job created");

    ctx.transport.publish_upload(UploadTrigger { job_id }).await?;
    Ok(job)
}
