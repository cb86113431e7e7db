//! Completion Aggregator
//!
//! Fan-in: each distinct group is counted once by a single conditional
//! UPDATE. Whichever invocation observes `completed == total` races for the
//! `report-claim` insert; only its winner assembles the report.

use chrono::Utc;
use labelcheck_common::events::PipelineEvent;
use labelcheck_common::Result;

use super::{report_builder, PipelineContext};
use crate::checklist;
use crate::db::{jobs, reports, unit_records};
use crate::models::{CompletionMessage, HandlerOutcome, JobStatus, UnitKind, UnitStatus, REPORT_CLAIM};
use crate::utils::retry_on_lock;

/// `handleCompletionMessage(job_id, group_name)`
pub async fn handle_completion_message(
    ctx: &PipelineContext,
    message: &CompletionMessage,
) -> Result<HandlerOutcome> {
    let job_id = message.job_id;
    let group = message.group_name.as_str();
    let wait = ctx.lock_wait_ms();

    let Some(job) = retry_on_lock("load_job", wait, || jobs::load_job(&ctx.pool, job_id)).await?
    else {
        tracing::warn!(job_id = %job_id, group, "Completion for unknown job");
        return Ok(HandlerOutcome::ignored("unknown job"));
    };
    if job.status.is_terminal() {
        tracing::debug!(job_id = %job_id, group, status = %job.status, "Completion for finished job ignored");
        return Ok(HandlerOutcome::ignored(format!("job is {}", job.status)));
    }
    if checklist::group(group).is_none() {
        tracing::warn!(job_id = %job_id, group, "Completion for unknown group");
        return Ok(HandlerOutcome::ignored("unknown group"));
    }

    let counted = retry_on_lock("count_group_completion", wait, || {
        jobs::count_group_completion(&ctx.pool, job_id, group)
    })
    .await?;

    let (completed, total) = match counted {
        Some((completed, total)) => {
            tracing::info!(job_id = %job_id, group, completed, total, "Group completion counted");
            ctx.event_bus.emit_lossy(PipelineEvent::GroupCompleted {
                job_id,
                group: group.to_string(),
                completed_groups: completed,
                total_groups: total,
                timestamp: Utc::now(),
            });
            (completed, total)
        }
        None => {
            // Already counted, or the job is not collecting completions
            let Some(job) =
                retry_on_lock("load_job", wait, || jobs::load_job(&ctx.pool, job_id)).await?
            else {
                return Ok(HandlerOutcome::ignored("unknown job"));
            };
            if job.status != JobStatus::ComplianceStarted {
                return Ok(HandlerOutcome::ignored(format!("job is {}", job.status)));
            }
            tracing::debug!(job_id = %job_id, group, "Group already counted");
            (job.completed_groups, job.total_groups)
        }
    };

    if completed < total {
        return Ok(HandlerOutcome::Waiting {
            completed_groups: completed,
            total_groups: total,
        });
    }

    let claimed = retry_on_lock("claim_report", wait, || {
        unit_records::try_claim(&ctx.pool, job_id, REPORT_CLAIM, UnitKind::Marker)
    })
    .await?;
    if !claimed {
        tracing::debug!(job_id = %job_id, group, "Report already claimed by another invocation");
        return Ok(HandlerOutcome::Waiting {
            completed_groups: completed,
            total_groups: total,
        });
    }

    let report = retry_on_lock("assemble_report", wait, || {
        report_builder::assemble_report(&ctx.pool, job_id)
    })
    .await?;
    let total_checks = report.summary.total_checks;

    let finalized = retry_on_lock("finalize_report", wait, || {
        reports::finalize_report(&ctx.pool, job_id, &report)
    })
    .await?;
    if !finalized {
        tracing::warn!(job_id = %job_id, "Job left COMPLIANCE_STARTED before the report was stored");
        return Ok(HandlerOutcome::ignored("job no longer accepting a report"));
    }

    retry_on_lock("close_report_claim", wait, || {
        unit_records::complete(&ctx.pool, job_id, REPORT_CLAIM, UnitStatus::Done, None)
    })
    .await?;

    ctx.emit_status_change(job_id, JobStatus::ComplianceStarted, JobStatus::Done);
    ctx.event_bus.emit_lossy(PipelineEvent::ReportAssembled {
        job_id,
        total_checks,
        timestamp: Utc::now(),
    });
    tracing::info!(
        job_id = %job_id,
        total_checks,
        pass = report.summary.pass,
        fail = report.summary.fail,
        needs_review = report.summary.needs_review,
        "Report assembled"
    );

    Ok(HandlerOutcome::Assembled)
}
