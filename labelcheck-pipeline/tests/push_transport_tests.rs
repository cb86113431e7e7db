//! HTTP push round trip
//!
//! A real server exposes `/push/*` and the pipeline publishes to it through
//! `HttpPushTransport`. Evaluations take longer than the client timeout, so
//! the endpoints must acknowledge before the handlers finish.

mod helpers;

use helpers::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use labelcheck_pipeline::config::TransportMode;
use labelcheck_pipeline::coordinator::{submit_job, PipelineContext};
use labelcheck_pipeline::db::{jobs, unit_records};
use labelcheck_pipeline::models::{JobStatus, UnitStatus};
use labelcheck_pipeline::services::{DispatcherOptions, HttpPushTransport};
use labelcheck_pipeline::{build_router, AppState};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_groups_complete_over_http_push() {
    let (_temp_dir, pool) = create_test_db().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let transport =
        HttpPushTransport::new(format!("http://{}", addr), Duration::from_secs(1)).unwrap();
    let extraction = Arc::new(CountingExtraction::returning(sample_facts()));
    let evaluator =
        Arc::new(ScriptedEvaluator::passing().with_delay(Duration::from_millis(1500)));
    let ctx = PipelineContext::new(pool.clone(), Arc::new(transport))
        .with_extraction(extraction.clone())
        .with_evaluation(evaluator.clone())
        .with_config(fast_config());

    let state = AppState::new(Arc::new(ctx.clone())).with_transport(
        TransportMode::Http,
        DispatcherOptions {
            max_deliveries: 3,
            redelivery_backoff: Duration::from_millis(50),
            duplicate_delivery: false,
        },
    );
    let router = build_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let job = submit_job(&ctx, &["uploads/front.png".to_string()]).await.unwrap();

    let done = wait_until(Duration::from_secs(20), || async {
        jobs::load_job(&pool, job.job_id)
            .await
            .unwrap()
            .map(|j| j.status == JobStatus::Done)
            .unwrap_or(false)
    })
    .await;
    assert!(done, "job did not reach DONE over HTTP push");

    let records = unit_records::list_for_job(&pool, job.job_id).await.unwrap();
    assert!(records.iter().all(|r| r.status != UnitStatus::Running));
    for group in ["identity", "content", "tables"] {
        let marker = format!("group-done:{}", group);
        assert!(unit_records::exists(&pool, job.job_id, &marker).await.unwrap());
    }
    assert_eq!(extraction.calls(), 1);
    assert_eq!(evaluator.total_calls(), 8);

    assert!(wait_until(Duration::from_secs(5), || async {
        state.push_in_flight.load(Ordering::SeqCst) == 0
    })
    .await);
    assert!(state.last_error.read().await.is_none());
}
