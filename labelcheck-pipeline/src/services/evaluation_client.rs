//! Evaluation service clients
//!
//! One call judges one checklist question against the extracted facts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::ServiceError;
use crate::models::{LabelFacts, Verdict};

const USER_AGENT: &str = concat!("labelcheck-pipeline/", env!("CARGO_PKG_VERSION"));

/// `{result, rationale}` returned by the evaluation service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    #[serde(rename = "result")]
    pub verdict: Verdict,
    #[serde(default)]
    pub rationale: String,
}

/// `evaluate(check_id, facts) -> {result, rationale} | error`
#[async_trait]
pub trait EvaluationService: Send + Sync {
    async fn evaluate(&self, check_id: &str, facts: &LabelFacts) -> Result<Evaluation, ServiceError>;
}

#[derive(Debug, Serialize)]
struct EvaluateRequest<'a> {
    check_id: &'a str,
    facts: &'a LabelFacts,
}

/// HTTP evaluation client (`POST {base_url}/evaluate`)
pub struct HttpEvaluationClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpEvaluationClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl EvaluationService for HttpEvaluationClient {
    async fn evaluate(&self, check_id: &str, facts: &LabelFacts) -> Result<Evaluation, ServiceError> {
        let url = format!("{}/evaluate", self.base_url);
        tracing::debug!(check_id, url = %url, "Requesting evaluation");

        let response = self
            .http_client
            .post(&url)
            .json(&EvaluateRequest { check_id, facts })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ServiceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Evaluation>()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))
    }
}

/// Offline stand-in: every question is left for a human reviewer
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineEvaluator;

#[async_trait]
impl EvaluationService for OfflineEvaluator {
    async fn evaluate(&self, check_id: &str, _facts: &LabelFacts) -> Result<Evaluation, ServiceError> {
        Ok(Evaluation {
            verdict: Verdict::NeedsReview,
            rationale: format!("{}: no evaluation service configured", check_id),
        })
    }
}
