//! Fuzzy resolution of free-text customer mentions against the canonical
//! catalog of customer names.

use crate::error::{AssistantError, Result};
use crate::metadata::TableMetadata;
use crate::warehouse::Warehouse;
use itertools::Itertools;
use std::collections::BTreeSet;
use strsim::normalized_levenshtein;
use tracing::debug;

/// Outcome of resolving one set of mentions. Ambiguity and absence are
/// normal terminal branches, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// At least one catalog name scored above the exact threshold.
    DirectMatch { exact: BTreeSet<String> },
    /// Only mid-range candidates; the user has to pick one.
    AmbiguousMatch { candidates: BTreeSet<String> },
    NotFound,
}

/// Fuzzy matcher for customer names with an explicit two-tier policy:
/// confident, ambiguous, or unrelated.
pub struct CustomerMatcher {
    /// Score (0-100) at or above which a name is trusted without asking.
    pub exact_threshold: f64,
    /// Noise floor; candidates scoring below are considered unrelated.
    pub ambiguity_floor: f64,
    /// How many catalog entries to consider per mention.
    pub top_n: usize,
}

impl Default for CustomerMatcher {
    fn default() -> Self {
        Self {
            exact_threshold: 85.0,
            ambiguity_floor: 55.0,
            top_n: 10,
        }
    }
}

impl CustomerMatcher {
    pub fn new(exact_threshold: f64, ambiguity_floor: f64) -> Self {
        Self {
            exact_threshold,
            ambiguity_floor,
            ..Self::default()
        }
    }

    fn tokens(s: &str) -> BTreeSet<String> {
        s.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Token-set similarity in [0, 100]: insensitive to word order and
    /// repeated tokens, and a mention that is a token subset of a catalog
    /// name scores 100.
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        let tokens_a = Self::tokens(a);
        let tokens_b = Self::tokens(b);
        if tokens_a.is_empty() || tokens_b.is_empty() {
            return 0.0;
        }

        let common = tokens_a.intersection(&tokens_b).join(" ");
        let only_a = tokens_a.difference(&tokens_b).join(" ");
        let only_b = tokens_b.difference(&tokens_a).join(" ");

        let combined_a = join_tokens(&common, &only_a);
        let combined_b = join_tokens(&common, &only_b);

        let best = [
            normalized_levenshtein(&common, &combined_a),
            normalized_levenshtein(&common, &combined_b),
            normalized_levenshtein(&combined_a, &combined_b),
        ]
        .into_iter()
        .fold(0.0, f64::max);

        best * 100.0
    }

    /// The `top_n` highest-scoring catalog entries for one mention,
    /// best first.
    pub fn top_matches<'a>(&self, mention: &str, catalog: &'a [String]) -> Vec<(&'a str, f64)> {
        let mut scored: Vec<(&str, f64)> = catalog
            .iter()
            .map(|name| (name.as_str(), self.similarity(mention, name)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.top_n);
        scored
    }

    /// Classify all mentions against the catalog in one decision: exact
    /// hits win outright, otherwise ambiguous candidates are surfaced,
    /// otherwise nothing matched. Buckets are deduplicated across mentions.
    pub fn match_customers(&self, mentioned: &[String], catalog: &[String]) -> MatchOutcome {
        let mut exact = BTreeSet::new();
        let mut fuzzy = BTreeSet::new();

        for mention in mentioned {
            for (name, score) in self.top_matches(mention, catalog) {
                if score >= self.exact_threshold {
                    debug!(name, score, "exact candidate");
                    exact.insert(name.to_string());
                } else if score >= self.ambiguity_floor {
                    debug!(name, score, "ambiguous candidate");
                    fuzzy.insert(name.to_string());
                }
            }
        }

        if !exact.is_empty() {
            MatchOutcome::DirectMatch { exact }
        } else if !fuzzy.is_empty() {
            MatchOutcome::AmbiguousMatch { candidates: fuzzy }
        } else {
            MatchOutcome::NotFound
        }
    }
}

fn join_tokens(base: &str, extra: &str) -> String {
    match (base.is_empty(), extra.is_empty()) {
        (true, _) => extra.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{} {}", base, extra),
    }
}

/// Fetch the full distinct set of canonical customer names. Always a fresh
/// snapshot per resolution; never cached across requests.
pub async fn load_customer_catalog(
    warehouse: &dyn Warehouse,
    meta: &TableMetadata,
) -> Result<Vec<String>> {
    let sql = format!(
        "SELECT DISTINCT {col} FROM {table} WHERE {col} IS NOT NULL",
        col = meta.customer_column,
        table = meta.table_id,
    );
    let result = warehouse
        .run_query(&sql)
        .await
        .map_err(|e| AssistantError::Catalog(e.to_string()))?;

    let names: Vec<String> = result
        .rows
        .iter()
        .filter_map(|row| row.get(&meta.customer_column))
        .filter_map(|value| value.as_str().map(str::to_string))
        .collect();

    debug!(count = names.len(), "customer catalog fetched");
    Ok(names)
}
