//! Extracted label facts
//!
//! Opaque to the coordinators; only detectors and the checklist applicability
//! test look inside. Shape produced by the extraction service:
//!
//! ```json
//! {
//!   "text": "...full OCR text...",
//!   "fields": { "<name>": { "text": "...", "confidence": 0.93 } },
//!   "fields_all": { "<name>": [ { "text": "..." } ] },
//!   "panels": { "<name>": { "text": "..." } }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Facts payload as returned by the extraction service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelFacts(pub Value);

impl LabelFacts {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Best text for a field: `fields[name].text`, else the first `fields_all[name]` candidate
    pub fn field_text(&self, name: &str) -> Option<&str> {
        let primary = self
            .0
            .get("fields")
            .and_then(|f| f.get(name))
            .and_then(|f| f.get("text"))
            .and_then(Value::as_str)
            .filter(|t| !t.trim().is_empty());
        if primary.is_some() {
            return primary;
        }
        self.0
            .get("fields_all")
            .and_then(|f| f.get(name))
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .and_then(|c| c.get("text"))
            .and_then(Value::as_str)
            .filter(|t| !t.trim().is_empty())
    }

    /// True when the field carries non-blank text
    pub fn has_field(&self, name: &str) -> bool {
        self.field_text(name).is_some()
    }

    /// Full label text
    pub fn full_text(&self) -> &str {
        self.0.get("text").and_then(Value::as_str).unwrap_or("")
    }

    pub fn panel_text(&self, name: &str) -> Option<&str> {
        self.0
            .get("panels")
            .and_then(|p| p.get(name))
            .and_then(|p| p.get("text"))
            .and_then(Value::as_str)
    }
}
