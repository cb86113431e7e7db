//! Extracted facts storage

use labelcheck_common::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::LabelFacts;

/// Deterministic reference, so every extraction attempt for a job names the same row
pub fn facts_reference_for(job_id: Uuid) -> String {
    format!("facts/{}", job_id)
}

pub async fn load_facts(pool: &SqlitePool, facts_reference: &str) -> Result<Option<LabelFacts>> {
    let json: Option<String> =
        sqlx::query_scalar("SELECT facts_json FROM label_facts WHERE facts_reference = ?")
            .bind(facts_reference)
            .fetch_optional(pool)
            .await?;

    Ok(json
        .map(|j| serde_json::from_str::<LabelFacts>(&j))
        .transpose()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::jobs;
    use crate::db::test_support::temp_pool;
    use crate::models::JobStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_load_persisted_facts() {
        let (_dir, pool) = temp_pool().await;
        let job_id = Uuid::new_v4();
        jobs::create_job(&pool, job_id, &[], 3).await.unwrap();
        jobs::transition(&pool, job_id, JobStatus::Queued, JobStatus::Extracting)
            .await
            .unwrap();

        let reference = facts_reference_for(job_id);
        let facts = LabelFacts::new(json!({"fields": {"common_name": {"text": "Crackers"}}}));
        jobs::persist_facts_and_mark_extracted(&pool, job_id, &reference, &facts)
            .await
            .unwrap();

        let loaded = load_facts(&pool, &reference).await.unwrap().unwrap();
        assert_eq!(loaded.field_text("common_name"), Some("Crackers"));
        assert!(load_facts(&pool, "facts/missing").await.unwrap().is_none());
    }
}
