//! Final compliance report

use super::check::{CheckResult, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Verdict tallies across every recorded check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_checks: u32,
    pub pass: u32,
    pub fail: u32,
    pub needs_review: u32,
    pub degraded: u32,
    /// pass / (pass + fail); 0.0 when nothing was decided
    pub compliance_rate: f64,
}

impl ReportSummary {
    pub fn tally<'a>(results: impl IntoIterator<Item = &'a CheckResult>) -> Self {
        let mut summary = ReportSummary::default();
        for result in results {
            summary.total_checks += 1;
            match result.verdict {
                Verdict::Pass => summary.pass += 1,
                Verdict::Fail => summary.fail += 1,
                Verdict::NeedsReview => summary.needs_review += 1,
            }
            if result.degraded {
                summary.degraded += 1;
            }
        }
        let decided = summary.pass + summary.fail;
        if decided > 0 {
            summary.compliance_rate = f64::from(summary.pass) / f64::from(decided);
        }
        summary
    }
}

/// One group's results, sorted by check id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSection {
    pub group: String,
    pub checks: Vec<CheckResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub job_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub summary: ReportSummary,
    /// Groups in checklist order
    pub groups: Vec<GroupSection>,
    /// Conditional checks that did not apply to this label
    #[serde(default)]
    pub not_applicable: Vec<String>,
}

impl Report {
    /// Report body without the generation timestamp
    pub fn content(&self) -> serde_json::Value {
        serde_json::json!({
            "job_id": self.job_id,
            "summary": self.summary,
            "groups": self.groups,
            "not_applicable": self.not_applicable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::check::CheckKind;

    fn result(id: &str, verdict: Verdict, degraded: bool) -> CheckResult {
        CheckResult {
            check_id: id.to_string(),
            group: "identity".to_string(),
            kind: CheckKind::Evaluation,
            verdict,
            rationale: String::new(),
            evidence: Vec::new(),
            attempts: 1,
            degraded,
        }
    }

    #[test]
    fn test_tally_counts_verdicts() {
        let results = vec![
            result("a", Verdict::Pass, false),
            result("b", Verdict::Pass, false),
            result("c", Verdict::Fail, false),
            result("d", Verdict::NeedsReview, true),
        ];
        let summary = ReportSummary::tally(&results);
        assert_eq!(summary.total_checks, 4);
        assert_eq!(summary.pass, 2);
        assert_eq!(summary.fail, 1);
        assert_eq!(summary.needs_review, 1);
        assert_eq!(summary.degraded, 1);
        assert!((summary.compliance_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_tally_has_zero_rate() {
        let summary = ReportSummary::tally(&Vec::<CheckResult>::new());
        assert_eq!(summary.total_checks, 0);
        assert_eq!(summary.compliance_rate, 0.0);
    }
}
