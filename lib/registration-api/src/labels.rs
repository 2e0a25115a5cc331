//! Label matching for workload selection

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A required `key=value` label
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMatch {
    pub key: String,
    pub value: String,
}

impl LabelMatch {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// True when every entry of `required` is present in `labels` with the same value
pub fn matches_all(labels: &BTreeMap<String, String>, required: &[LabelMatch]) -> bool {
    required
        .iter()
        .all(|label| labels.get(&label.key) == Some(&label.value))
}

/// Service selector semantics: a selector must be non-empty to select anything
pub fn selector_matches(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    !selector.is_empty()
        && selector
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
}

/// Parse a JSON list like `[{"key":"app","value":"ext"}]`.
/// An empty string or `[]` means no labels.
pub fn parse_label_matches(text: &str) -> Result<Vec<LabelMatch>, serde_json::Error> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(text)
}
