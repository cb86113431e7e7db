//! Per-check results stored in the claim ledger

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one check unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    NeedsReview,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::NeedsReview => "needs_review",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a check unit is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Remote reasoning call; network-bound and fallible
    Evaluation,
    /// Local rule-based computation; pure and infallible
    Detector,
}

/// Result body persisted as the payload of a check record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check_id: String,
    pub group: String,
    pub kind: CheckKind,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rationale: String,
    /// Detector findings; empty for evaluation checks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
    /// Calls made before the result was obtained (1 for detectors)
    pub attempts: u32,
    /// True when retries were exhausted and the verdict fell back to needs_review
    #[serde(default)]
    pub degraded: bool,
}

impl CheckResult {
    /// Fallback result recorded when every attempt failed
    pub fn degraded(check_id: &str, group: &str, attempts: u32, error: &str) -> Self {
        Self {
            check_id: check_id.to_string(),
            group: group.to_string(),
            kind: CheckKind::Evaluation,
            verdict: Verdict::NeedsReview,
            rationale: format!("evaluation unavailable after {} attempts: {}", attempts, error),
            evidence: Vec::new(),
            attempts,
            degraded: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_result_needs_review() {
        let result = CheckResult::degraded("bilingual", "identity", 3, "timeout");
        assert_eq!(result.verdict, Verdict::NeedsReview);
        assert!(result.degraded);
        assert_eq!(result.attempts, 3);
        assert!(result.rationale.contains("timeout"));
    }

    #[test]
    fn test_verdict_wire_format() {
        assert_eq!(
            serde_json::to_value(Verdict::NeedsReview).unwrap(),
            serde_json::json!("needs_review")
        );
        let parsed: Verdict = serde_json::from_str("\"fail\"").unwrap();
        assert_eq!(parsed, Verdict::Fail);
    }
}
