//! Structured contracts produced by the classifier stages.
//!
//! Both records are decoded leniently: every field has a default so a
//! partially filled reply still yields a usable value, and filter values
//! accept scalar-or-sequence JSON (the model emits both).

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// First-stage classification of a user question.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentDescription {
    /// Whether the question can be answered with a warehouse query at all.
    #[serde(default)]
    pub is_queryable: bool,
    /// Reply to deliver verbatim when the question is not queryable.
    #[serde(default)]
    pub reply_to_user: Option<String>,
    #[serde(default)]
    pub client_related: bool,
    /// Free-text customer fragments, in the order they were mentioned.
    #[serde(default)]
    pub clients_mentioned: Vec<String>,
    #[serde(default)]
    pub confirmation_required: bool,
    #[serde(default)]
    pub chart_or_file_requested: bool,
}

/// Second-stage filter/metric extraction.
///
/// Filter keys iterate in sorted order (`BTreeMap`), which is what makes
/// the emitted query deterministic for identical input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default, deserialize_with = "literal_value_map")]
    pub filters: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub metrics: Vec<String>,
}

fn literal_value_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: BTreeMap<String, Value> = BTreeMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(column, value)| (column, literal_values(value)))
        .collect())
}

/// Normalize a scalar-or-sequence JSON value to a list of literals.
/// Nested containers are dropped, not rejected.
fn literal_values(value: Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) => vec![s],
        Value::Number(n) => vec![n.to_string()],
        Value::Bool(b) => vec![b.to_string()],
        Value::Array(items) => items
            .into_iter()
            .flat_map(|item| match item {
                Value::Array(_) | Value::Object(_) => Vec::new(),
                scalar => literal_values(scalar),
            })
            .collect(),
        Value::Object(_) => Vec::new(),
    }
}
