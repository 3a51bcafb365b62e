//! Per-table query configuration: the allow-list of columns a question may
//! filter or select on, the aggregatable measure set, and the type schema
//! that decides literal quoting. Supplied externally as a JSON file and
//! loaded once at startup.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Semantic type tag for a column, used solely to decide how filter
/// literals are rendered (numeric types unquoted, everything else quoted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Int,
    Float,
    Date,
    DateTime,
    Bool,
    Decimal,
}

impl ColumnType {
    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnType::Int | ColumnType::Float | ColumnType::Decimal)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMetadata {
    /// Fully qualified table identifier the assistant queries.
    pub table_id: String,
    /// Column holding canonical customer names, used by the catalog fetch.
    pub customer_column: String,
    /// Columns a question may filter or select on. Anything else is dropped.
    pub allowed_columns: Vec<String>,
    /// Measures that are summed when selected; a subset of `allowed_columns`.
    pub aggregatable_columns: Vec<String>,
    /// Column name to type tag, for literal quoting.
    pub schema: HashMap<String, ColumnType>,
}

impl TableMetadata {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn is_allowed(&self, column: &str) -> bool {
        self.allowed_columns.iter().any(|c| c == column)
    }

    pub fn is_aggregatable(&self, column: &str) -> bool {
        self.aggregatable_columns.iter().any(|c| c == column)
    }

    pub fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.schema.get(column).copied()
    }
}
