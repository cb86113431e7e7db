//! Concurrent delivery tests
//!
//! Duplicate and sibling messages are delivered from separate tasks on a
//! multi-threaded runtime; the store guards must hold without any in-process
//! locking.

mod helpers;

use helpers::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use labelcheck_pipeline::coordinator::{
    aggregator, dispatch, extraction, group_executor, local, submit_job, PipelineContext,
};
use labelcheck_pipeline::db::{jobs, reports, unit_records};
use labelcheck_pipeline::models::{HandlerOutcome, JobStatus, UnitStatus};
use labelcheck_pipeline::services::{ChannelTransport, Dispatcher, DispatcherOptions};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_upload_triggers_extract_once() {
    let h = Harness::new().await;
    let job_id = h.create_job().await;
    let ctx = Arc::new(h.ctx.clone());

    let mut set = JoinSet::new();
    for _ in 0..4 {
        let ctx = Arc::clone(&ctx);
        set.spawn(async move { extraction::handle_upload_trigger(&ctx, job_id).await });
    }

    let mut dispatched = 0;
    let mut ignored = 0;
    while let Some(joined) = set.join_next().await {
        match joined.unwrap().unwrap() {
            HandlerOutcome::Dispatched { .. } => dispatched += 1,
            outcome if outcome.is_ignored() => ignored += 1,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(dispatched, 1);
    assert_eq!(ignored, 3);
    assert_eq!(h.extraction.calls(), 1);
    assert_eq!(h.status(job_id).await, JobStatus::Extracted);
    // Late duplicates may re-publish the batch after EXTRACTED; never fewer than one batch
    assert!(h.queue.fan_outs().await.len() >= 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_fan_out_executes_group_once() {
    let h = Harness::new().await;
    let job_id = h.create_job().await;
    extraction::handle_upload_trigger(&h.ctx, job_id).await.unwrap();

    let identity = h
        .queue
        .fan_outs()
        .await
        .into_iter()
        .find(|m| m.group_name == "identity")
        .unwrap();
    let ctx = Arc::new(h.ctx.clone());

    let mut set = JoinSet::new();
    for _ in 0..3 {
        let ctx = Arc::clone(&ctx);
        let message = identity.clone();
        set.spawn(async move { group_executor::handle_group_message(&ctx, &message).await });
    }

    let mut executed = 0;
    while let Some(joined) = set.join_next().await {
        let outcome = joined.unwrap().unwrap();
        match outcome {
            HandlerOutcome::Executed { .. } => executed += 1,
            outcome => assert!(outcome.is_ignored(), "{:?}", outcome),
        }
    }

    assert_eq!(executed, 1);
    assert_eq!(h.evaluator.total_calls(), 4);
    let records = unit_records::load_check_records(&h.pool, job_id).await.unwrap();
    assert_eq!(records.len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_completions_both_counted() {
    let h = Harness::new().await;
    let job_id = h.create_job().await;
    let completions = extract_and_execute(&h, job_id).await;
    let ctx = Arc::new(h.ctx.clone());

    let mut set = JoinSet::new();
    for completion in completions
        .into_iter()
        .filter(|c| c.group_name == "identity" || c.group_name == "content")
    {
        let ctx = Arc::clone(&ctx);
        set.spawn(async move { aggregator::handle_completion_message(&ctx, &completion).await });
    }
    while let Some(joined) = set.join_next().await {
        assert!(joined.unwrap().unwrap().is_waiting());
    }

    let job = jobs::load_job(&h.pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.completed_groups, 2);
    let mut counted = jobs::counted_groups(&h.pool, job_id).await.unwrap();
    counted.sort();
    assert_eq!(counted, vec!["content", "identity"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_final_completions_assemble_once() {
    let h = Harness::new().await;
    let job_id = h.create_job().await;
    let completions = extract_and_execute(&h, job_id).await;
    let ctx = Arc::new(h.ctx.clone());

    let mut set = JoinSet::new();
    for completion in completions {
        let ctx = Arc::clone(&ctx);
        set.spawn(async move { aggregator::handle_completion_message(&ctx, &completion).await });
    }

    let mut assembled = 0;
    let mut waiting = 0;
    while let Some(joined) = set.join_next().await {
        match joined.unwrap().unwrap() {
            HandlerOutcome::Assembled => assembled += 1,
            outcome if outcome.is_waiting() => waiting += 1,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(assembled, 1);
    assert_eq!(waiting, 2);
    assert_eq!(h.status(job_id).await, JobStatus::Done);
    let claim = unit_records::load(&h.pool, job_id, "report-claim").await.unwrap().unwrap();
    assert_eq!(claim.status, UnitStatus::Done);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispatch_matches_sequential_run() {
    let h = Harness::new().await;

    // Sequential single-call mode
    let (seq_ctx, queue) = local::sequential_context(h.ctx.clone());
    let (seq_job, outcomes) = local::submit_and_run(&seq_ctx, &queue, &["front.png".to_string()])
        .await
        .unwrap();
    assert_eq!(outcomes.last(), Some(&HandlerOutcome::Assembled));

    // Concurrent dispatcher delivering every message twice
    let (transport, rx) = ChannelTransport::new();
    let ctx = Arc::new(
        PipelineContext::new(h.pool.clone(), Arc::new(transport.clone()))
            .with_extraction(h.extraction.clone())
            .with_evaluation(h.evaluator.clone())
            .with_config(fast_config()),
    );
    let dispatcher = Dispatcher::new(
        Arc::clone(&ctx),
        &transport,
        rx,
        DispatcherOptions {
            max_deliveries: 3,
            redelivery_backoff: Duration::from_millis(10),
            duplicate_delivery: true,
        },
    )
    .spawn();

    let job = submit_job(&ctx, &["front.png".to_string()]).await.unwrap();

    let mut status = JobStatus::Queued;
    for _ in 0..500 {
        status = h.status(job.job_id).await;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    dispatcher.abort();
    assert_eq!(status, JobStatus::Done);
    // Duplicate deliveries never re-run extraction
    assert_eq!(h.extraction.calls(), 2);

    let sequential = reports::load_report(&h.pool, seq_job.job_id).await.unwrap().unwrap();
    let concurrent = reports::load_report(&h.pool, job.job_id).await.unwrap().unwrap();
    assert_eq!(comparable_content(&sequential), comparable_content(&concurrent));

    let ledger = |records: Vec<labelcheck_pipeline::models::UnitRecord>| {
        records
            .into_iter()
            .map(|r| (r.unit_name, r.status))
            .collect::<Vec<_>>()
    };
    assert_eq!(
        ledger(unit_records::list_for_job(&h.pool, seq_job.job_id).await.unwrap()),
        ledger(unit_records::list_for_job(&h.pool, job.job_id).await.unwrap())
    );
}

#[tokio::test]
async fn test_dispatch_routes_by_message_kind() {
    let h = Harness::new().await;
    let job_id = h.create_job().await;

    let (ctx, queue) = local::sequential_context(h.ctx.clone());
    let outcomes = local::run_job_sequentially(&ctx, &queue, job_id).await.unwrap();

    // upload, three groups, three completions
    assert_eq!(outcomes.len(), 7);
    assert!(matches!(outcomes[0], HandlerOutcome::Dispatched { .. }));
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, HandlerOutcome::Executed { .. }))
            .count(),
        3
    );
    assert_eq!(outcomes[6], HandlerOutcome::Assembled);
    assert!(queue.pop().await.is_none());

    // Replaying every message is a no-op
    for message in queue.published().await {
        assert!(dispatch(&ctx, message).await.unwrap().is_ignored());
    }
}
