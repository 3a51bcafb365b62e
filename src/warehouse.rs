//! Warehouse access behind a narrow trait.
//!
//! The trait returns `Result` so callers can tell "zero rows" from "the
//! query failed"; collapsing a failure to an empty table is a policy
//! decision the orchestrator makes, not something hidden here.

use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::{PgColumn, PgPoolOptions, PgRow};
use sqlx::{Column, PgPool, Row, TypeInfo};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Tabular result of one warehouse query: ordered columns, typed cells.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<HashMap<String, Value>>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render as CSV (header + rows, column order preserved) for handoff
    /// to the analysis collaborator.
    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(&self.columns)
            .map_err(|e| AssistantError::Format(format!("csv header: {}", e)))?;
        for row in &self.rows {
            let record: Vec<String> = self
                .columns
                .iter()
                .map(|column| match row.get(column) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                })
                .collect();
            writer
                .write_record(&record)
                .map_err(|e| AssistantError::Format(format!("csv row: {}", e)))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| AssistantError::Format(format!("csv flush: {}", e)))?;
        String::from_utf8(bytes).map_err(|e| AssistantError::Format(e.to_string()))
    }
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Execute one query string. Failures propagate.
    async fn run_query(&self, sql: &str) -> Result<QueryResult>;
}

/// PostgreSQL-backed warehouse client.
pub struct PostgresWarehouse {
    pool: PgPool,
}

impl PostgresWarehouse {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| AssistantError::Query(format!("warehouse connection failed: {}", e)))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    async fn run_query(&self, sql: &str) -> Result<QueryResult> {
        debug!(%sql, "running warehouse query");
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AssistantError::Query(e.to_string()))?;

        let columns: Vec<String> = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut record = HashMap::new();
            for column in row.columns() {
                record.insert(column.name().to_string(), decode_cell(row, column));
            }
            records.push(record);
        }

        Ok(QueryResult {
            columns,
            rows: records,
        })
    }
}

/// Best-effort conversion of one cell into JSON. A cell whose type we do
/// not recognize (or that fails to decode) becomes null rather than
/// failing the whole result.
fn decode_cell(row: &PgRow, column: &PgColumn) -> Value {
    let idx = column.ordinal();
    match column.type_info().name() {
        "INT2" => row
            .try_get::<Option<i16>, _>(idx)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "INT4" => row
            .try_get::<Option<i32>, _>(idx)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "INT8" => row
            .try_get::<Option<i64>, _>(idx)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)
            .ok()
            .flatten()
            .map(|v| Value::from(v as f64))
            .unwrap_or(Value::Null),
        "FLOAT8" | "NUMERIC" => row
            .try_get::<Option<f64>, _>(idx)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "BOOL" => row
            .try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(idx)
            .ok()
            .flatten()
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .ok()
            .flatten()
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
            .ok()
            .flatten()
            .map(|d| Value::String(d.to_rfc3339()))
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result_with_rows() -> QueryResult {
        QueryResult {
            columns: vec!["country".to_string(), "revenue".to_string()],
            rows: vec![
                [
                    ("country".to_string(), json!("ES")),
                    ("revenue".to_string(), json!(1250.5)),
                ]
                .into_iter()
                .collect(),
                [
                    ("country".to_string(), json!("FR")),
                    ("revenue".to_string(), Value::Null),
                ]
                .into_iter()
                .collect(),
            ],
        }
    }

    #[test]
    fn test_csv_preserves_column_order_and_blanks_nulls() {
        let csv = result_with_rows().to_csv().unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("country,revenue"));
        assert_eq!(lines.next(), Some("ES,1250.5"));
        assert_eq!(lines.next(), Some("FR,"));
    }

    #[test]
    fn test_empty_result_is_header_only() {
        let result = QueryResult {
            columns: vec!["a".to_string()],
            rows: vec![],
        };
        assert!(result.is_empty());
        assert_eq!(result.to_csv().unwrap().trim(), "a");
    }
}
