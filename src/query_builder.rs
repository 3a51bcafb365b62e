//! Deterministic query construction from a validated filter specification.
//!
//! Every emitted query references only allow-listed columns. Filter values
//! are rendered as literals (quoted or not by declared column type); the
//! column-name path is closed to injection because unknown columns are
//! dropped before they reach the query text.

use crate::intent::FilterSpec;
use crate::metadata::{ColumnType, TableMetadata};
use itertools::Itertools;
use tracing::warn;

/// Build the full query text for one filter specification.
///
/// Metrics in the aggregatable set become `SUM(col) AS col`; other metrics
/// are dimensions, selected as-is and collected (first-seen order, no
/// duplicates) into the shared group-by/order-by list. An empty metric list
/// selects every allow-listed column unaggregated.
pub fn build_query(spec: &FilterSpec, meta: &TableMetadata) -> String {
    let (metric_names, aggregate) = if spec.metrics.is_empty() {
        (meta.allowed_columns.clone(), false)
    } else {
        (spec.metrics.clone(), true)
    };

    let mut select_items: Vec<String> = Vec::new();
    let mut dimensions: Vec<String> = Vec::new();

    for metric in &metric_names {
        if !meta.is_allowed(metric) {
            warn!(column = %metric, "dropping metric outside the allow-list");
            continue;
        }
        if aggregate && meta.is_aggregatable(metric) {
            select_items.push(format!("SUM({m}) AS {m}", m = metric));
        } else {
            select_items.push(metric.clone());
            if !dimensions.contains(metric) {
                dimensions.push(metric.clone());
            }
        }
    }

    if select_items.is_empty() {
        // Every requested metric was dropped; fall back to the full
        // allow-list so the query still selects something meaningful.
        for column in &meta.allowed_columns {
            select_items.push(column.clone());
            dimensions.push(column.clone());
        }
    }

    let where_clause = build_where_clause(spec, meta);

    let mut sql = format!(
        "SELECT {} FROM {} WHERE {}",
        select_items.join(", "),
        meta.table_id,
        where_clause,
    );
    if !dimensions.is_empty() {
        let dims = dimensions.join(", ");
        sql.push_str(&format!(" GROUP BY {dims} ORDER BY {dims}"));
    }
    sql
}

fn build_where_clause(spec: &FilterSpec, meta: &TableMetadata) -> String {
    let mut clauses: Vec<String> = Vec::new();

    for (column, values) in &spec.filters {
        if !meta.is_allowed(column) {
            warn!(column = %column, "dropping filter on column outside the allow-list");
            continue;
        }
        if values.is_empty() {
            continue;
        }
        let column_type = match meta.column_type(column) {
            Some(t) => t,
            None => {
                warn!(column = %column, "column missing from type schema, dropping filter");
                continue;
            }
        };
        let rendered = values
            .iter()
            .map(|v| render_literal(v, column_type))
            .join(", ");
        clauses.push(format!("{} IN ({})", column, rendered));
    }

    if clauses.is_empty() {
        "1=1".to_string()
    } else {
        clauses.join(" AND ")
    }
}

fn render_literal(value: &str, column_type: ColumnType) -> String {
    if column_type.is_numeric() {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "''"))
    }
}
