//! Group Executor
//!
//! Phase 2: the `group-claim:<group>` insert is the sole guard against
//! duplicate fan-out delivery. Its winner runs every applicable check of the
//! group once, records each result, marks the group done and publishes one
//! completion message. Checks never abort their siblings.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use labelcheck_common::events::PipelineEvent;
use labelcheck_common::{Error, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

use super::PipelineContext;
use crate::checklist::{self, CheckUnit};
use crate::db::{facts, jobs, unit_records};
use crate::models::unit_record::{group_claim, group_done};
use crate::models::{
    CheckKind, CheckResult, CompletionMessage, FanOutMessage, HandlerOutcome, JobStatus,
    LabelFacts, UnitKind, UnitStatus, Verdict,
};
use crate::utils::{call_with_retry, retry_on_lock};

/// `handleGroupMessage(job_id, group_name, facts_reference)`
pub async fn handle_group_message(
    ctx: &PipelineContext,
    message: &FanOutMessage,
) -> Result<HandlerOutcome> {
    let job_id = message.job_id;
    let wait = ctx.lock_wait_ms();

    let Some(group) = checklist::group(&message.group_name) else {
        tracing::warn!(job_id = %job_id, group = %message.group_name, "Fan-out for unknown group");
        return Ok(HandlerOutcome::ignored("unknown group"));
    };

    let Some(job) = retry_on_lock("load_job", wait, || jobs::load_job(&ctx.pool, job_id)).await?
    else {
        tracing::warn!(job_id = %job_id, group = group.name, "Fan-out for unknown job");
        return Ok(HandlerOutcome::ignored("unknown job"));
    };
    if job.status == JobStatus::Failed || !job.status.has_reached(JobStatus::Extracted) {
        return Ok(HandlerOutcome::ignored(format!("job is {}", job.status)));
    }

    let claim = group_claim(group.name);
    let done_marker = group_done(group.name);
    let claimed = retry_on_lock("claim_group", wait, || {
        unit_records::try_claim(&ctx.pool, job_id, &claim, UnitKind::Marker)
    })
    .await?;

    if !claimed {
        let done = retry_on_lock("check_group_done", wait, || {
            unit_records::exists(&ctx.pool, job_id, &done_marker)
        })
        .await?;
        if done {
            // Heals a completion publish lost after the group finished
            ctx.transport
                .publish_completion(CompletionMessage {
                    job_id,
                    group_name: group.name.to_string(),
                })
                .await?;
            tracing::debug!(job_id = %job_id, group = group.name, "Group already done; completion re-published");
        } else {
            tracing::debug!(job_id = %job_id, group = group.name, "Group already claimed");
        }
        return Ok(HandlerOutcome::ignored("group already claimed"));
    }

    ctx.event_bus.emit_lossy(PipelineEvent::GroupClaimed {
        job_id,
        group: group.name.to_string(),
        timestamp: Utc::now(),
    });

    let started = retry_on_lock("start_compliance", wait, || {
        jobs::transition(
            &ctx.pool,
            job_id,
            JobStatus::Extracted,
            JobStatus::ComplianceStarted,
        )
    })
    .await?;
    if started {
        ctx.emit_status_change(job_id, JobStatus::Extracted, JobStatus::ComplianceStarted);
    }

    let facts = retry_on_lock("load_facts", wait, || {
        facts::load_facts(&ctx.pool, &message.facts_reference)
    })
    .await?
    .ok_or_else(|| Error::NotFound(format!("facts {}", message.facts_reference)))?;
    let facts = Arc::new(facts);

    let units = group.applicable_units(&facts);
    tracing::info!(job_id = %job_id, group = group.name, checks = units.len(), "Executing group");

    let (evaluation_units, detector_units): (Vec<CheckUnit>, Vec<CheckUnit>) = units
        .into_iter()
        .partition(|u| u.kind == CheckKind::Evaluation);

    let evaluations = stream::iter(evaluation_units)
        .map(|unit| run_evaluation_check(ctx, job_id, group.name, unit, &facts))
        .buffer_unordered(ctx.config.max_concurrent_checks.max(1))
        .collect::<Vec<_>>();

    let permits = Arc::new(Semaphore::new(ctx.config.detector_workers.max(1)));
    let detections = futures::future::join_all(detector_units.into_iter().map(|unit| {
        run_detector_check(
            ctx,
            job_id,
            group.name,
            unit,
            Arc::clone(&facts),
            Arc::clone(&permits),
        )
    }));

    let (evaluated, detected) = tokio::join!(evaluations, detections);

    let mut checks = 0;
    let mut degraded = 0;
    let mut first_error = None;
    for result in evaluated.into_iter().chain(detected) {
        match result {
            Ok(Some(check)) => {
                checks += 1;
                if check.degraded {
                    degraded += 1;
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(job_id = %job_id, group = group.name, error = %e, "Check record failed");
                first_error.get_or_insert(e);
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    let summary = serde_json::json!({ "checks": checks, "degraded": degraded });
    retry_on_lock("close_group_claim", wait, || {
        unit_records::complete(&ctx.pool, job_id, &claim, UnitStatus::Done, Some(&summary))
    })
    .await?;
    retry_on_lock("mark_group_done", wait, || {
        unit_records::insert_marker(&ctx.pool, job_id, &done_marker)
    })
    .await?;

    ctx.transport
        .publish_completion(CompletionMessage {
            job_id,
            group_name: group.name.to_string(),
        })
        .await?;

    tracing::info!(job_id = %job_id, group = group.name, checks, degraded, "Group complete");

    Ok(HandlerOutcome::Executed {
        group: group.name.to_string(),
        checks,
        degraded,
    })
}

/// One evaluation-service check: claim, call with retries, record
///
/// Returns None when the check record already existed.
async fn run_evaluation_check(
    ctx: &PipelineContext,
    job_id: Uuid,
    group: &str,
    unit: CheckUnit,
    facts: &LabelFacts,
) -> Result<Option<CheckResult>> {
    if !claim_check(ctx, job_id, unit.id).await? {
        return Ok(None);
    }

    let attempted = call_with_retry(unit.id, ctx.config.evaluation_policy(), || {
        ctx.evaluation.evaluate(unit.id, facts)
    })
    .await;

    let (status, result) = match attempted.result {
        Ok(evaluation) => (
            UnitStatus::Done,
            CheckResult {
                check_id: unit.id.to_string(),
                group: group.to_string(),
                kind: CheckKind::Evaluation,
                verdict: evaluation.verdict,
                rationale: evaluation.rationale,
                evidence: Vec::new(),
                attempts: attempted.attempts,
                degraded: false,
            },
        ),
        Err(e) => {
            tracing::warn!(
                job_id = %job_id,
                check_id = unit.id,
                attempts = attempted.attempts,
                error = %e,
                "Check degraded to needs_review"
            );
            ctx.event_bus.emit_lossy(PipelineEvent::CheckDegraded {
                job_id,
                check_id: unit.id.to_string(),
                attempts: attempted.attempts,
                error: e.to_string(),
                timestamp: Utc::now(),
            });
            (
                UnitStatus::Error,
                CheckResult::degraded(unit.id, group, attempted.attempts, &e.to_string()),
            )
        }
    };

    record_check(ctx, job_id, status, &result).await?;
    Ok(Some(result))
}

/// One detector check on the blocking pool, bounded by `permits`
async fn run_detector_check(
    ctx: &PipelineContext,
    job_id: Uuid,
    group: &str,
    unit: CheckUnit,
    facts: Arc<LabelFacts>,
    permits: Arc<Semaphore>,
) -> Result<Option<CheckResult>> {
    if !claim_check(ctx, job_id, unit.id).await? {
        return Ok(None);
    }

    let permit = permits
        .acquire_owned()
        .await
        .map_err(|e| Error::Internal(format!("detector pool closed: {}", e)))?;
    let detector = Arc::clone(&ctx.detector);
    let check_id = unit.id;
    let joined = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        detector.detect(check_id, &facts)
    })
    .await;

    let (status, result) = match joined {
        Ok(detection) => (
            UnitStatus::Done,
            CheckResult {
                check_id: unit.id.to_string(),
                group: group.to_string(),
                kind: CheckKind::Detector,
                verdict: detection.verdict,
                rationale: String::new(),
                evidence: detection.evidence,
                attempts: 1,
                degraded: false,
            },
        ),
        Err(e) => {
            tracing::error!(job_id = %job_id, check_id = unit.id, error = %e, "Detector task failed");
            (
                UnitStatus::Error,
                CheckResult {
                    check_id: unit.id.to_string(),
                    group: group.to_string(),
                    kind: CheckKind::Detector,
                    verdict: Verdict::NeedsReview,
                    rationale: format!("detector failed: {}", e),
                    evidence: Vec::new(),
                    attempts: 1,
                    degraded: true,
                },
            )
        }
    };

    record_check(ctx, job_id, status, &result).await?;
    Ok(Some(result))
}

async fn claim_check(ctx: &PipelineContext, job_id: Uuid, check_id: &str) -> Result<bool> {
    let claimed = retry_on_lock("claim_check", ctx.lock_wait_ms(), || {
        unit_records::try_claim(&ctx.pool, job_id, check_id, UnitKind::Check)
    })
    .await?;
    if !claimed {
        tracing::warn!(job_id = %job_id, check_id, "Check record already exists; skipping");
    }
    Ok(claimed)
}

async fn record_check(
    ctx: &PipelineContext,
    job_id: Uuid,
    status: UnitStatus,
    result: &CheckResult,
) -> Result<()> {
    let payload = serde_json::to_value(result)?;
    retry_on_lock("record_check", ctx.lock_wait_ms(), || {
        unit_records::complete(&ctx.pool, job_id, &result.check_id, status, Some(&payload))
    })
    .await?;
    Ok(())
}
