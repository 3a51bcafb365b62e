//! Week anchoring for the reporting snapshot column.
//!
//! Questions reference weeks symbolically ("this week", "last week"); the
//! classifier emits the placeholder tokens `CURRENT` / `PREVIOUS` under the
//! `data_week` filter. This module resolves those placeholders to concrete
//! week-start dates exactly once, at the boundary between filter extraction
//! and query construction.

use chrono::{Datelike, Duration, NaiveDate};
use std::collections::BTreeMap;

/// Name of the snapshot-week column. The only filter column with a
/// two-phase lifecycle (symbolic token, then concrete date).
pub const DATA_WEEK_COLUMN: &str = "data_week";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A single `data_week` filter value: a symbolic week reference or a
/// literal already carrying a concrete date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeekValue {
    Current,
    Previous,
    Literal(String),
}

impl WeekValue {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "CURRENT" => WeekValue::Current,
            "PREVIOUS" => WeekValue::Previous,
            other => WeekValue::Literal(other.to_string()),
        }
    }

    /// Collapse to a concrete literal. Literals pass through verbatim;
    /// rejecting malformed dates is the query builder's concern.
    pub fn resolve(self, current: NaiveDate, previous: NaiveDate) -> String {
        match self {
            WeekValue::Current => current.format(DATE_FORMAT).to_string(),
            WeekValue::Previous => previous.format(DATE_FORMAT).to_string(),
            WeekValue::Literal(raw) => raw,
        }
    }
}

/// The most recent week-start (Monday) on or before `today`, and the
/// Monday before that.
pub fn week_anchors(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let days_since_monday = today.weekday().num_days_from_monday() as i64;
    let current = today - Duration::days(days_since_monday);
    (current, current - Duration::days(7))
}

/// Resolve symbolic week tokens in `filters` in place.
///
/// Absent or empty `data_week` defaults to the current week start alone.
/// Idempotent on input that contains only literal dates.
pub fn resolve_data_week(filters: &mut BTreeMap<String, Vec<String>>, today: NaiveDate) {
    let (current, previous) = week_anchors(today);
    let values = filters.entry(DATA_WEEK_COLUMN.to_string()).or_default();

    if values.is_empty() {
        values.push(current.format(DATE_FORMAT).to_string());
        return;
    }

    for value in values.iter_mut() {
        *value = WeekValue::parse(value).resolve(current, previous);
    }
}
