//! Extraction service clients
//!
//! Extraction turns uploaded label images into a facts payload. The pipeline
//! treats it as one opaque, retryable call.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Component, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use super::error::ServiceError;
use crate::models::LabelFacts;

const USER_AGENT: &str = concat!("labelcheck-pipeline/", env!("CARGO_PKG_VERSION"));

/// `extract(job_id, image_refs) -> facts | error`
#[async_trait]
pub trait ExtractionService: Send + Sync {
    async fn extract(&self, job_id: Uuid, image_refs: &[String]) -> Result<LabelFacts, ServiceError>;
}

#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    job_id: Uuid,
    image_refs: &'a [String],
}

/// HTTP extraction client (`POST {base_url}/extract`)
pub struct HttpExtractionClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpExtractionClient {
    /// `timeout` bounds each request at the socket level; callers add their own deadline too
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
impl ExtractionService for HttpExtractionClient {
    async fn extract(&self, job_id: Uuid, image_refs: &[String]) -> Result<LabelFacts, ServiceError> {
        let url = format!("{}/extract", self.base_url);
        tracing::debug!(job_id = %job_id, images = image_refs.len(), url = %url, "Requesting extraction");

        let response = self
            .http_client
            .post(&url)
            .json(&ExtractRequest { job_id, image_refs })
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

        let facts: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;
        if !facts.is_object() {
            return Err(ServiceError::Parse("facts payload is not an object".to_string()));
        }
        Ok(LabelFacts::new(facts))
    }
}

/// Offline extraction: each image reference is a path to a facts JSON file
///
/// Multiple files (e.g. front and back panels) are merged into one payload.
#[derive(Debug, Clone, Default)]
pub struct FixtureExtractionService {
    base_dir: Option<PathBuf>,
}

impl FixtureExtractionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Confine references to files under `base_dir`
    ///
    /// Absolute paths and `..` components are rejected, so request-supplied
    /// references cannot name arbitrary server files.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    fn resolve(&self, image_ref: &str) -> Result<PathBuf, ServiceError> {
        let path = PathBuf::from(image_ref);
        let Some(dir) = &self.base_dir else {
            return Ok(path);
        };
        let confined = path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !confined {
            return Err(ServiceError::Unavailable(format!(
                "image ref {:?} is outside the fixture directory",
                image_ref
            )));
        }
        Ok(dir.join(path))
    }
}

#[async_trait]
impl ExtractionService for FixtureExtractionService {
    async fn extract(&self, job_id: Uuid, image_refs: &[String]) -> Result<LabelFacts, ServiceError> {
        if image_refs.is_empty() {
            return Err(ServiceError::Unavailable(format!(
                "job {} has no images to extract",
                job_id
            )));
        }

        let mut panels = Vec::with_capacity(image_refs.len());
        for image_ref in image_refs {
            let path = self.resolve(image_ref)?;
            let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                ServiceError::Unavailable(format!("read {} failed: {}", path.display(), e))
            })?;
            let value: Value = serde_json::from_str(&content)
                .map_err(|e| ServiceError::Parse(format!("{}: {}", path.display(), e)))?;
            panels.push(value);
        }

        Ok(merge_facts(panels))
    }
}

/// Merge per-image facts: texts are joined, the first non-blank field wins,
/// candidate lists are concatenated, panels are unioned
pub fn merge_facts(parts: Vec<Value>) -> LabelFacts {
    let mut texts = Vec::new();
    let mut fields = Map::new();
    let mut fields_all = Map::new();
    let mut panels = Map::new();

    for part in parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            if !text.trim().is_empty() {
                texts.push(text.to_string());
            }
        }
        if let Some(Value::Object(map)) = part.get("fields") {
            for (name, field) in map {
                let blank = field
                    .get("text")
                    .and_then(Value::as_str)
                    .map_or(true, |t| t.trim().is_empty());
                if !blank && !fields.contains_key(name) {
                    fields.insert(name.clone(), field.clone());
                }
            }
        }
        if let Some(Value::Object(map)) = part.get("fields_all") {
            for (name, candidates) in map {
                let entry = fields_all
                    .entry(name.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let (Value::Array(acc), Value::Array(more)) = (entry, candidates) {
                    acc.extend(more.iter().cloned());
                }
            }
        }
        if let Some(Value::Object(map)) = part.get("panels") {
            for (name, panel) in map {
                panels.entry(name.clone()).or_insert_with(|| panel.clone());
            }
        }
    }

    LabelFacts::new(serde_json::json!({
        "text": texts.join("\n"),
        "fields": fields,
        "fields_all": fields_all,
        "panels": panels,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_merge_prefers_first_non_blank_field() {
        let merged = merge_facts(vec![
            json!({"text": "front", "fields": {"common_name": {"text": ""}}}),
            json!({
                "text": "back",
                "fields": {"common_name": {"text": "Crackers"}},
                "fields_all": {"common_name": [{"text": "Crackers"}]},
                "panels": {"nutrition": {"text": "Calories 120"}}
            }),
        ]);

        assert_eq!(merged.full_text(), "front\nback");
        assert_eq!(merged.field_text("common_name"), Some("Crackers"));
        assert_eq!(merged.panel_text("nutrition"), Some("Calories 120"));
    }

    #[tokio::test]
    async fn test_fixture_reads_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("front.json"),
            r#"{"text": "Granola", "fields": {"common_name": {"text": "Granola"}}}"#,
        )
        .unwrap();

        let service = FixtureExtractionService::with_base_dir(dir.path());
        let facts = service
            .extract(Uuid::new_v4(), &["front.json".to_string()])
            .await
            .unwrap();
        assert_eq!(facts.field_text("common_name"), Some("Granola"));
    }

    #[tokio::test]
    async fn test_confined_fixture_rejects_escaping_refs() {
        let dir = TempDir::new().unwrap();
        let fixtures = dir.path().join("fixtures");
        std::fs::create_dir(&fixtures).unwrap();
        std::fs::write(dir.path().join("secret.json"), r#"{"text": "secret"}"#).unwrap();

        let service = FixtureExtractionService::with_base_dir(&fixtures);
        let outside = dir.path().join("secret.json").to_string_lossy().to_string();

        for image_ref in [outside, "../secret.json".to_string(), "a/../../secret.json".to_string()] {
            let err = service
                .extract(Uuid::new_v4(), &[image_ref.clone()])
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::Unavailable(_)), "{}: {:?}", image_ref, err);
            assert!(!err.is_retryable());
        }
    }

    #[tokio::test]
    async fn test_fixture_missing_file_is_permanent() {
        let service = FixtureExtractionService::new();
        let err = service
            .extract(Uuid::new_v4(), &["/nonexistent/front.json".to_string()])
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
