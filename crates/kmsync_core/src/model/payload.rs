//! Content payload model.
//!
//! # Responsibility
//! - Wrap the free-form body stored behind a `content_ref`.
//! - Decide whether a payload carries real user content.
//!
//! # Invariants
//! - Markup-only or whitespace-only text never counts as real content.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static MARKUP_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid markup tag regex"));
static ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(nbsp|#160|#xa0);").expect("valid html entity regex"));

/// Body of one entity as stored in the content store.
///
/// Narrative text, matrix rows and attachment lists all travel as JSON.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentPayload(pub Value);

impl ContentPayload {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Payload with no body at all.
    pub fn empty() -> Self {
        Self(Value::Null)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Returns whether the payload holds anything a user would miss.
    ///
    /// Strings count once markup tags, `&nbsp;` and whitespace are stripped;
    /// numbers count; `null`, booleans and empty containers do not.
    pub fn has_real_content(&self) -> bool {
        value_has_content(&self.0)
    }
}

impl From<Value> for ContentPayload {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

fn value_has_content(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(_) => false,
        Value::Number(_) => true,
        Value::String(text) => text_has_content(text),
        Value::Array(items) => items.iter().any(value_has_content),
        Value::Object(members) => members.values().any(value_has_content),
    }
}

fn text_has_content(text: &str) -> bool {
    let without_tags = MARKUP_TAG_RE.replace_all(text, " ");
    let without_entities = ENTITY_RE.replace_all(&without_tags, " ");
    !without_entities.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::ContentPayload;
    use serde_json::json;

    #[test]
    fn empty_shapes_have_no_real_content() {
        assert!(!ContentPayload::empty().has_real_content());
        assert!(!ContentPayload::new(json!("")).has_real_content());
        assert!(!ContentPayload::new(json!("  \n\t ")).has_real_content());
        assert!(!ContentPayload::new(json!({"synthesis": "<p></p>", "rows": []})).has_real_content());
        assert!(!ContentPayload::new(json!({"body": "<p>&nbsp;</p>", "draft": true})).has_real_content());
    }

    #[test]
    fn text_numbers_and_nested_rows_count_as_content() {
        assert!(ContentPayload::new(json!("hello")).has_real_content());
        assert!(ContentPayload::new(json!({"synthesis": "<p>Finding</p>"})).has_real_content());
        assert!(ContentPayload::new(json!({"matrix": [[null], [{"score": 4}]]})).has_real_content());
    }
}
