//! Shared fixtures for pipeline integration tests
//!
//! Each harness owns a temp-file database, a queue transport that records
//! every publish, and scripted collaborators that count their calls.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use labelcheck_common::db::DatabaseOptions;
use labelcheck_pipeline::checklist;
use labelcheck_pipeline::config::PipelineConfig;
use labelcheck_pipeline::coordinator::PipelineContext;
use labelcheck_pipeline::db::{self, jobs};
use labelcheck_pipeline::models::{LabelFacts, Verdict};
use labelcheck_pipeline::services::{
    Detection, Detector, Evaluation, EvaluationService, ExtractionService, QueueTransport,
    RuleDetector, ServiceError,
};

/// Create temporary test database with the pipeline schema
///
/// TempDir must be kept alive for the duration of the test
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("labelcheck.db");
    let pool = db::open_pool(&db_path, &DatabaseOptions::default())
        .await
        .expect("Failed to open test database");
    (temp_dir, pool)
}

/// Facts for a label with a claim tag, a nutrition table and one E-number
pub fn sample_facts() -> LabelFacts {
    LabelFacts::new(json!({
        "text": "Oat Crackers / Craquelins d'avoine. Ingredients: oats, sunflower oil, salt, E330. \
                 Best before 2026 DE 01. Product of Canada.",
        "fields": {
            "common_name": { "text": "Oat Crackers", "confidence": 0.97 },
            "ingredients": { "text": "oats, sunflower oil, salt, E330", "confidence": 0.91 },
            "claim_tag_type": { "text": "source of fibre", "confidence": 0.88 }
        },
        "panels": {
            "nutrition_facts": {
                "text": "Nutrition Facts Valeur nutritive Per 30 g Calories 120 Fat 4 g \
                         Saturated 0.5 g Trans 0 g Carbohydrate 20 g Fibre 3 g Sugars 1 g \
                         Protein 3 g Cholesterol 0 mg Sodium 150 mg Potassium 90 mg \
                         Calcium 10 mg Iron 1 mg"
            }
        }
    }))
}

/// Facts without the claim tag field, so `claim_tag` does not apply
pub fn facts_without_claim_tag() -> LabelFacts {
    let mut facts = sample_facts();
    if let Some(fields) = facts.0.get_mut("fields").and_then(|f| f.as_object_mut()) {
        fields.remove("claim_tag_type");
    }
    facts
}

/// Checks that run against [`sample_facts`]
pub fn applicable_check_count() -> usize {
    let facts = sample_facts();
    checklist::GROUPS
        .iter()
        .map(|g| g.applicable_units(&facts).len())
        .sum()
}

/// Small retry budget with millisecond backoff
pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        check_max_retries: 2,
        extraction_max_retries: 1,
        retry_backoff_ms: 1,
        evaluation_timeout_secs: 5,
        extraction_timeout_secs: 5,
        ..PipelineConfig::default()
    }
}

/// Extraction stand-in that returns fixed facts and counts calls
pub struct CountingExtraction {
    facts: LabelFacts,
    fail: bool,
    calls: AtomicU32,
}

impl CountingExtraction {
    pub fn returning(facts: LabelFacts) -> Self {
        Self {
            facts,
            fail: false,
            calls: AtomicU32::new(0),
        }
    }

    /// Every call fails with a retryable error
    pub fn failing() -> Self {
        Self {
            facts: sample_facts(),
            fail: true,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractionService for CountingExtraction {
    async fn extract(&self, _job_id: Uuid, _image_refs: &[String]) -> Result<LabelFacts, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Give concurrent duplicates a chance to overlap
        tokio::task::yield_now().await;
        if self.fail {
            return Err(ServiceError::Api {
                status: 503,
                message: "extraction backend unavailable".to_string(),
            });
        }
        Ok(self.facts.clone())
    }
}

/// Evaluation stand-in: passes every check except those scripted to fail
pub struct ScriptedEvaluator {
    delay: Option<Duration>,
    always_fail: HashSet<String>,
    verdicts: HashMap<String, Verdict>,
    calls: Mutex<HashMap<String, u32>>,
}

impl ScriptedEvaluator {
    pub fn passing() -> Self {
        Self {
            delay: None,
            always_fail: HashSet::new(),
            verdicts: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// `check_id` fails every attempt with a retryable error
    pub fn failing_check(mut self, check_id: &str) -> Self {
        self.always_fail.insert(check_id.to_string());
        self
    }

    /// Every call sleeps `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_verdict(mut self, check_id: &str, verdict: Verdict) -> Self {
        self.verdicts.insert(check_id.to_string(), verdict);
        self
    }

    pub fn calls_for(&self, check_id: &str) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(check_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl EvaluationService for ScriptedEvaluator {
    async fn evaluate(&self, check_id: &str, _facts: &LabelFacts) -> Result<Evaluation, ServiceError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(check_id.to_string())
            .or_insert(0) += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.always_fail.contains(check_id) {
            return Err(ServiceError::Network(format!("{}: connection reset", check_id)));
        }
        let verdict = self
            .verdicts
            .get(check_id)
            .copied()
            .unwrap_or(Verdict::Pass);
        Ok(Evaluation {
            verdict,
            rationale: format!("{} looks fine", check_id),
        })
    }
}

/// Rule detector that panics on one check id
pub struct PanickingDetector {
    pub check_id: &'static str,
}

impl Detector for PanickingDetector {
    fn detect(&self, check_id: &str, facts: &LabelFacts) -> Detection {
        if check_id == self.check_id {
            panic!("detector blew up on {}", check_id);
        }
        RuleDetector.detect(check_id, facts)
    }
}

/// Poll `check` every 20ms until it returns true or `timeout` elapses
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Pipeline wired to a recording queue transport
pub struct Harness {
    _temp_dir: TempDir,
    pub pool: SqlitePool,
    pub queue: Arc<QueueTransport>,
    pub extraction: Arc<CountingExtraction>,
    pub evaluator: Arc<ScriptedEvaluator>,
    pub ctx: PipelineContext,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with(CountingExtraction::returning(sample_facts()), ScriptedEvaluator::passing()).await
    }

    pub async fn with(extraction: CountingExtraction, evaluator: ScriptedEvaluator) -> Self {
        let (temp_dir, pool) = create_test_db().await;
        let queue = Arc::new(QueueTransport::new());
        let extraction = Arc::new(extraction);
        let evaluator = Arc::new(evaluator);

        let ctx = PipelineContext::new(pool.clone(), queue.clone())
            .with_extraction(extraction.clone())
            .with_evaluation(evaluator.clone())
            .with_config(fast_config());

        Self {
            _temp_dir: temp_dir,
            pool,
            queue,
            extraction,
            evaluator,
            ctx,
        }
    }

    /// Insert a QUEUED job without publishing its trigger
    pub async fn create_job(&self) -> Uuid {
        let job_id = Uuid::new_v4();
        jobs::create_job(
            &self.pool,
            job_id,
            &["uploads/front.png".to_string()],
            checklist::total_groups(),
        )
        .await
        .expect("Failed to create job");
        job_id
    }

    pub async fn status(&self, job_id: Uuid) -> labelcheck_pipeline::models::JobStatus {
        jobs::load_job(&self.pool, job_id)
            .await
            .unwrap()
            .expect("job exists")
            .status
    }
}

/// Report body with the job id removed, for comparing two jobs
pub fn comparable_content(report: &labelcheck_pipeline::models::Report) -> serde_json::Value {
    let mut content = report.content();
    if let Some(map) = content.as_object_mut() {
        map.remove("job_id");
    }
    content
}

/// Deliver the upload trigger and every fan-out message, returning the
/// completion messages without delivering them
pub async fn extract_and_execute(
    h: &Harness,
    job_id: Uuid,
) -> Vec<labelcheck_pipeline::models::CompletionMessage> {
    use labelcheck_pipeline::coordinator::dispatch;
    use labelcheck_pipeline::models::HandlerOutcome;
    use labelcheck_pipeline::services::PipelineMessage;

    let outcome = labelcheck_pipeline::coordinator::extraction::handle_upload_trigger(&h.ctx, job_id)
        .await
        .unwrap();
    assert!(matches!(outcome, HandlerOutcome::Dispatched { .. }), "{:?}", outcome);

    for message in h.queue.drain().await {
        let outcome = dispatch(&h.ctx, message).await.unwrap();
        assert!(matches!(outcome, HandlerOutcome::Executed { .. }), "{:?}", outcome);
    }

    h.queue
        .drain()
        .await
        .into_iter()
        .filter_map(|m| match m {
            PipelineMessage::Completion(c) => Some(c),
            _ => None,
        })
        .collect()
}
