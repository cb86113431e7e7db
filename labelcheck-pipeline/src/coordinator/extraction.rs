//! Extraction Coordinator
//!
//! Phase 1: the QUEUED → EXTRACTING conditional update is the idempotency gate.
//! Only its winner calls the extraction service. Fan-out is all-or-nothing
//! per publish; a redelivered trigger for an EXTRACTED job re-publishes the
//! batch and the group claims absorb the duplicates.

use labelcheck_common::Result;
use uuid::Uuid;

use super::PipelineContext;
use crate::checklist;
use crate::db::facts::facts_reference_for;
use crate::db::jobs;
use crate::models::{FanOutMessage, HandlerOutcome, JobStatus};
use crate::utils::{call_with_retry, retry_on_lock};

/// `handleUploadTrigger(job_id)`
pub async fn handle_upload_trigger(ctx: &PipelineContext, job_id: Uuid) -> Result<HandlerOutcome> {
    let wait = ctx.lock_wait_ms();

    let Some(job) = retry_on_lock("load_job", wait, || jobs::load_job(&ctx.pool, job_id)).await?
    else {
        tracing::warn!(job_id = %job_id, "Upload trigger for unknown job");
        return Ok(HandlerOutcome::ignored("unknown job"));
    };

    match job.status {
        JobStatus::Queued => {}
        JobStatus::Extracted => {
            // A previous invocation persisted facts but may have lost its publish
            let Some(facts_reference) = job.facts_reference.as_deref() else {
                return Ok(HandlerOutcome::ignored("extracted job has no facts reference"));
            };
            let groups = publish_fan_out(ctx, job_id, facts_reference).await?;
            tracing::info!(job_id = %job_id, groups = groups.len(), "Re-published fan-out for extracted job");
            return Ok(HandlerOutcome::ignored("already extracted; fan-out re-published"));
        }
        other => {
            tracing::debug!(job_id = %job_id, status = %other, "Duplicate upload trigger ignored");
            return Ok(HandlerOutcome::ignored(format!("job is {}", other)));
        }
    }

    let claimed = retry_on_lock("claim_extraction", wait, || {
        jobs::transition(&ctx.pool, job_id, JobStatus::Queued, JobStatus::Extracting)
    })
    .await?;
    if !claimed {
        tracing::debug!(job_id = %job_id, "Extraction already claimed by another invocation");
        return Ok(HandlerOutcome::ignored("extraction already claimed"));
    }
    ctx.emit_status_change(job_id, JobStatus::Queued, JobStatus::Extracting);
    tracing::info!(job_id = %job_id, images = job.image_refs.len(), "Extraction started");

    let attempted = call_with_retry("extract", ctx.config.extraction_policy(), || {
        ctx.extraction.extract(job_id, &job.image_refs)
    })
    .await;

    let facts = match attempted.result {
        Ok(facts) => facts,
        Err(e) => {
            let reason = format!(
                "extraction failed after {} attempt(s): {}",
                attempted.attempts, e
            );
            tracing::error!(job_id = %job_id, attempts = attempted.attempts, error = %e, "Extraction failed");

            let failed = retry_on_lock("mark_failed", wait, || {
                jobs::mark_failed(&ctx.pool, job_id, JobStatus::Extracting, &reason)
            })
            .await?;
            if failed {
                ctx.emit_status_change(job_id, JobStatus::Extracting, JobStatus::Failed);
            }
            return Ok(HandlerOutcome::Failed { reason });
        }
    };

    let facts_reference = facts_reference_for(job_id);
    let persisted = retry_on_lock("persist_facts", wait, || {
        jobs::persist_facts_and_mark_extracted(&ctx.pool, job_id, &facts_reference, &facts)
    })
    .await?;
    if !persisted {
        tracing::warn!(job_id = %job_id, "Job left EXTRACTING while extraction ran; facts discarded");
        return Ok(HandlerOutcome::ignored("job no longer extracting"));
    }
    ctx.emit_status_change(job_id, JobStatus::Extracting, JobStatus::Extracted);

    let groups = publish_fan_out(ctx, job_id, &facts_reference).await?;
    tracing::info!(
        job_id = %job_id,
        attempts = attempted.attempts,
        groups = groups.len(),
        "Extraction complete, fan-out dispatched"
    );

    Ok(HandlerOutcome::Dispatched { groups })
}

/// Publish one fan-out message per evaluation group as a single batch
async fn publish_fan_out(
    ctx: &PipelineContext,
    job_id: Uuid,
    facts_reference: &str,
) -> Result<Vec<String>> {
    let groups = checklist::group_names();
    let batch: Vec<FanOutMessage> = groups
        .iter()
        .map(|group_name| FanOutMessage {
            job_id,
            group_name: group_name.clone(),
            facts_reference: facts_reference.to_string(),
        })
        .collect();

    ctx.transport.publish_fan_out(batch).await?;
    Ok(groups)
}
