//! Stalled-job sweep
//!
//! A handler that hits a store error after claiming work leaves a RUNNING
//! claim that no redelivery can re-take. Jobs stuck in a non-terminal status
//! past `stalled_job_timeout` are moved to FAILED, conditional on the status
//! the sweep observed.

use chrono::Utc;
use labelcheck_common::{Error, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::PipelineContext;
use crate::db::jobs;
use crate::models::JobStatus;
use crate::utils::retry_on_lock;

pub const STALLED_REASON: &str = "stalled";

/// Fail every stalled job; returns how many were moved
pub async fn sweep_stalled_jobs(ctx: &PipelineContext) -> Result<usize> {
    let timeout = chrono::Duration::from_std(ctx.config.stalled_job_timeout())
        .map_err(|e| Error::Config(format!("stalled_job_timeout out of range: {}", e)))?;
    let cutoff = Utc::now() - timeout;
    let wait = ctx.lock_wait_ms();

    let stalled = retry_on_lock("find_stalled", wait, || jobs::find_stalled(&ctx.pool, cutoff)).await?;

    let mut failed = 0;
    for (job_id, status) in stalled {
        let moved = retry_on_lock("fail_stalled", wait, || {
            jobs::mark_failed(&ctx.pool, job_id, status, STALLED_REASON)
        })
        .await?;
        if moved {
            tracing::warn!(job_id = %job_id, status = %status, "Stalled job failed");
            ctx.emit_status_change(job_id, status, JobStatus::Failed);
            failed += 1;
        }
    }

    if failed > 0 {
        tracing::info!(failed, "Stalled-job sweep complete");
    }
    Ok(failed)
}

/// Sweep once now, then every `sweep_interval`
pub fn spawn_sweeper(ctx: Arc<PipelineContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ctx.config.sweep_interval());
        loop {
            interval.tick().await;
            if let Err(e) = sweep_stalled_jobs(&ctx).await {
                tracing::error!(error = %e, "Stalled-job sweep failed");
            }
        }
    })
}
