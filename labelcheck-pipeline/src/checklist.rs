//! Static checklist partition
//!
//! The checklist is split into a fixed set of named evaluation groups. Each
//! group is executed by exactly one group executor invocation per job.

use crate::models::{CheckKind, LabelFacts};

/// One checklist question or detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckUnit {
    pub id: &'static str,
    pub kind: CheckKind,
    /// Facts field that must be non-blank for the check to apply
    pub requires_field: Option<&'static str>,
}

impl CheckUnit {
    const fn evaluation(id: &'static str) -> Self {
        Self {
            id,
            kind: CheckKind::Evaluation,
            requires_field: None,
        }
    }

    const fn detector(id: &'static str) -> Self {
        Self {
            id,
            kind: CheckKind::Detector,
            requires_field: None,
        }
    }

    const fn conditional(id: &'static str, field: &'static str) -> Self {
        Self {
            id,
            kind: CheckKind::Evaluation,
            requires_field: Some(field),
        }
    }

    /// Whether this unit should run against `facts`
    pub fn applies_to(&self, facts: &LabelFacts) -> bool {
        match self.requires_field {
            Some(field) => facts.has_field(field),
            None => true,
        }
    }
}

/// Named, fixed set of check units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationGroup {
    pub name: &'static str,
    pub units: &'static [CheckUnit],
}

impl EvaluationGroup {
    /// Units that apply to `facts`, in catalogue order
    pub fn applicable_units(&self, facts: &LabelFacts) -> Vec<CheckUnit> {
        self.units
            .iter()
            .filter(|u| u.applies_to(facts))
            .copied()
            .collect()
    }

    /// Units skipped for `facts`
    pub fn not_applicable(&self, facts: &LabelFacts) -> Vec<&'static str> {
        self.units
            .iter()
            .filter(|u| !u.applies_to(facts))
            .map(|u| u.id)
            .collect()
    }
}

pub const GROUPS: &[EvaluationGroup] = &[
    EvaluationGroup {
        name: "identity",
        units: &[
            CheckUnit::evaluation("common_name"),
            CheckUnit::evaluation("bilingual"),
            CheckUnit::evaluation("country_origin"),
            CheckUnit::evaluation("irradiation"),
        ],
    },
    EvaluationGroup {
        name: "content",
        units: &[
            CheckUnit::evaluation("ingredients"),
            CheckUnit::evaluation("date_marking"),
            CheckUnit::evaluation("fop_symbol"),
            CheckUnit::conditional("claim_tag", "claim_tag_type"),
        ],
    },
    EvaluationGroup {
        name: "tables",
        units: &[
            CheckUnit::detector("nutrition_facts"),
            CheckUnit::detector("sweeteners"),
            CheckUnit::detector("supplements"),
            CheckUnit::detector("additives"),
        ],
    },
];

/// Look up a group by name
pub fn group(name: &str) -> Option<&'static EvaluationGroup> {
    GROUPS.iter().find(|g| g.name == name)
}

pub fn group_names() -> Vec<String> {
    GROUPS.iter().map(|g| g.name.to_string()).collect()
}

pub fn total_groups() -> u32 {
    GROUPS.len() as u32
}

/// Group owning `check_id`, if any
pub fn group_of(check_id: &str) -> Option<&'static EvaluationGroup> {
    GROUPS
        .iter()
        .find(|g| g.units.iter().any(|u| u.id == check_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_three_groups() {
        assert_eq!(total_groups(), 3);
        assert_eq!(group_names(), vec!["identity", "content", "tables"]);
    }

    #[test]
    fn test_check_ids_are_unique_and_never_marker_names() {
        let mut seen = HashSet::new();
        for g in GROUPS {
            for unit in g.units {
                assert!(seen.insert(unit.id), "duplicate check id {}", unit.id);
                assert!(!unit.id.contains(':'));
                assert_ne!(unit.id, crate::models::REPORT_CLAIM);
            }
        }
    }

    #[test]
    fn test_claim_tag_only_applies_with_claim_type() {
        let content = group("content").unwrap();

        let without = LabelFacts::new(json!({"fields": {}}));
        assert_eq!(content.applicable_units(&without).len(), 3);
        assert_eq!(content.not_applicable(&without), vec!["claim_tag"]);

        let with = LabelFacts::new(json!({
            "fields": {"claim_tag_type": {"text": "nutrient content"}}
        }));
        assert_eq!(content.applicable_units(&with).len(), 4);
        assert!(content.not_applicable(&with).is_empty());
    }

    #[test]
    fn test_lookup() {
        assert!(group("unknown").is_none());
        assert_eq!(group_of("sweeteners").unwrap().name, "tables");
        assert_eq!(group_of("bilingual").unwrap().name, "identity");
    }
}
