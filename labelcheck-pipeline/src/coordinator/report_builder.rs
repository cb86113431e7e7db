//! Report assembly
//!
//! The report is a pure function of the stored check records: groups in
//! checklist order, checks sorted by id. Arrival order of completion messages
//! cannot change it.

use chrono::{DateTime, Utc};
use labelcheck_common::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::checklist::{self, GROUPS};
use crate::db::unit_records;
use crate::models::{
    CheckKind, CheckResult, GroupSection, Report, ReportSummary, UnitRecord, Verdict,
};

/// Load every check record for `job_id` and build the report
pub async fn assemble_report(pool: &SqlitePool, job_id: Uuid) -> Result<Report> {
    let records = unit_records::load_check_records(pool, job_id).await?;
    build_report(job_id, &records, Utc::now())
}

/// Build a report from check records
///
/// Catalogue checks without a record did not apply to this label and are
/// listed under `not_applicable`.
pub fn build_report(
    job_id: Uuid,
    records: &[UnitRecord],
    generated_at: DateTime<Utc>,
) -> Result<Report> {
    let mut results: Vec<CheckResult> = records
        .iter()
        .map(record_to_result)
        .collect::<Result<_>>()?;
    results.sort_by(|a, b| a.check_id.cmp(&b.check_id));

    let summary = ReportSummary::tally(&results);

    let groups = GROUPS
        .iter()
        .map(|group| GroupSection {
            group: group.name.to_string(),
            checks: results
                .iter()
                .filter(|r| r.group == group.name)
                .cloned()
                .collect(),
        })
        .collect();

    let mut not_applicable: Vec<String> = GROUPS
        .iter()
        .flat_map(|g| g.units.iter())
        .filter(|u| !results.iter().any(|r| r.check_id == u.id))
        .map(|u| u.id.to_string())
        .collect();
    not_applicable.sort();

    Ok(Report {
        job_id,
        generated_at,
        summary,
        groups,
        not_applicable,
    })
}

/// A record without a payload was claimed but never closed
fn record_to_result(record: &UnitRecord) -> Result<CheckResult> {
    match &record.payload {
        Some(payload) => Ok(serde_json::from_value(payload.clone())?),
        None => {
            let group = checklist::group_of(&record.unit_name)
                .map(|g| g.name)
                .unwrap_or("unknown");
            let kind = checklist::group_of(&record.unit_name)
                .and_then(|g| g.units.iter().find(|u| u.id == record.unit_name))
                .map(|u| u.kind)
                .unwrap_or(CheckKind::Evaluation);
            Ok(CheckResult {
                check_id: record.unit_name.clone(),
                group: group.to_string(),
                kind,
                verdict: Verdict::NeedsReview,
                rationale: "no result was recorded".to_string(),
                evidence: Vec::new(),
                attempts: 0,
                degraded: true,
            })
        }
    }
}
