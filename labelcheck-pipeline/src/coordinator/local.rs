//! Sequential single-call mode
//!
//! Runs the same three handlers through a FIFO queue with concurrency 1. The
//! guarded store operations are identical to concurrent mode, so the job and
//! claim ledger end state is the same.

use labelcheck_common::Result;
use std::sync::Arc;
use uuid::Uuid;

use super::{dispatch, submit_job, PipelineContext};
use crate::models::{HandlerOutcome, Job, UploadTrigger};
use crate::services::{MessageTransport, QueueTransport};

/// Rebuild `ctx` around a fresh queue transport with in-handler concurrency collapsed
pub fn sequential_context(ctx: PipelineContext) -> (PipelineContext, Arc<QueueTransport>) {
    let queue = Arc::new(QueueTransport::new());
    let config = ctx.config.sequential();
    let ctx = PipelineContext {
        transport: queue.clone(),
        config,
        ..ctx
    };
    (ctx, queue)
}

/// Publish the upload trigger for `job_id` and drain the queue
///
/// `queue` must be the transport held by `ctx`. A handler error stops the run
/// and is returned; messages still queued stay queued.
pub async fn run_job_sequentially(
    ctx: &PipelineContext,
    queue: &QueueTransport,
    job_id: Uuid,
) -> Result<Vec<HandlerOutcome>> {
    queue.publish_upload(UploadTrigger { job_id }).await?;
    drain_queue(ctx, queue).await
}

/// Create a job from `image_refs` and run it to completion sequentially
pub async fn submit_and_run(
    ctx: &PipelineContext,
    queue: &QueueTransport,
    image_refs: &[String],
) -> Result<(Job, Vec<HandlerOutcome>)> {
    let job = submit_job(ctx, image_refs).await?;
    let outcomes = drain_queue(ctx, queue).await?;
    Ok((job, outcomes))
}

async fn drain_queue(ctx: &PipelineContext, queue: &QueueTransport) -> Result<Vec<HandlerOutcome>> {
    let mut outcomes = Vec::new();
    while let Some(message) = queue.pop().await {
        let kind = message.kind();
        let outcome = dispatch(ctx, message).await?;
        tracing::debug!(kind, ?outcome, "Sequential step");
        outcomes.push(outcome);
    }
    Ok(outcomes)
}
