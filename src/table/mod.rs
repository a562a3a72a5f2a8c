//! In-memory tabular records.
//!
//! A [`Table`] is a rectangular, row-addressable dataset with named columns.
//! Cells are `Option<String>`: `None` is the missing-value marker. The graph
//! builder only needs column lookup by name and per-row value access, so the
//! table does no type inference beyond what [`Table::candidate_columns`] needs.
//!
//! ## Modules
//!
//! - [`loader`] — CSV (delimiter sniffing) and JSON-records loading

pub mod loader;

pub use loader::{load_csv, load_csv_bytes, load_json_records, load_json_str, load_table};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

use crate::error::{GraphError, Result};

/// Default cardinality cut-off for [`Table::candidate_columns`].
pub const DEFAULT_MAX_UNIQUE: usize = 200;

/// Most distinct values a text column may have to be offered as a filter.
pub const FILTER_MAX_TEXT_UNIQUE: usize = 200;

/// Most distinct values a numeric column may have to be offered as a filter.
pub const FILTER_MAX_NUMERIC_UNIQUE: usize = 20;

/// A rectangular table of optional string cells.
///
/// Deserialization goes through [`Table::from_rows`], so a ragged table is
/// rejected instead of loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTable")]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

/// Unchecked serde shape of a [`Table`].
#[derive(Deserialize)]
struct RawTable {
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<Option<String>>>,
}

impl TryFrom<RawTable> for Table {
    type Error = GraphError;

    fn try_from(raw: RawTable) -> Result<Self> {
        Table::from_rows(raw.columns, raw.rows)
    }
}

impl Table {
    /// Create an empty table with the given column names.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Create a table from column names and rows, checking that every row
    /// has exactly one cell per column.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Result<Self> {
        let mut table = Self::new(columns);
        table.rows.reserve(rows.len());
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Append a row. Fails if its width differs from the column count.
    pub fn push_row(&mut self, row: Vec<Option<String>>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(GraphError::invalid(format!(
                "row {} has {} cells, expected {}",
                self.rows.len(),
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Column names in table order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate over rows as cell slices.
    pub fn rows(&self) -> impl Iterator<Item = &[Option<String>]> {
        self.rows.iter().map(|r| r.as_slice())
    }

    /// Value at `(row, column)`, `None` when missing or out of range.
    pub fn value(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column)?.as_deref()
    }

    /// Return a new table keeping only rows that satisfy every filter.
    ///
    /// A row passes a filter when its value in the filtered column is one of
    /// the allowed values; a missing value never passes. Filters with an
    /// empty allowed set are ignored, matching a multiselect with nothing
    /// chosen.
    pub fn filter(&self, filters: &[ColumnFilter]) -> Result<Table> {
        let mut resolved: Vec<(usize, HashSet<&str>)> = Vec::with_capacity(filters.len());
        for f in filters {
            let idx = self.column_index(&f.column).ok_or_else(|| {
                GraphError::invalid(format!("unknown filter column '{}'", f.column))
            })?;
            if f.allowed.is_empty() {
                continue;
            }
            resolved.push((idx, f.allowed.iter().map(|v| v.as_str()).collect()));
        }

        let rows = self
            .rows
            .iter()
            .filter(|row| {
                resolved.iter().all(|(idx, allowed)| {
                    row[*idx]
                        .as_deref()
                        .map(|v| allowed.contains(v))
                        .unwrap_or(false)
                })
            })
            .cloned()
            .collect::<Vec<_>>();

        tracing::debug!(
            "Filtered table: {} of {} rows kept ({} active filters)",
            rows.len(),
            self.rows.len(),
            resolved.len()
        );

        Ok(Table {
            columns: self.columns.clone(),
            rows,
        })
    }

    /// Number of distinct non-missing values in a column.
    pub fn distinct_count(&self, column: usize) -> usize {
        self.rows
            .iter()
            .filter_map(|r| r.get(column).and_then(|c| c.as_deref()))
            .collect::<HashSet<_>>()
            .len()
    }

    /// Whether every non-missing value in a column parses as a number.
    pub fn is_numeric(&self, column: usize) -> bool {
        self.rows
            .iter()
            .filter_map(|r| r.get(column).and_then(|c| c.as_deref()))
            .all(|v| v.parse::<f64>().is_ok())
    }

    /// Columns suitable as node sources: textual columns, or any column with
    /// fewer than `max_unique` distinct values.
    pub fn candidate_columns(&self, max_unique: usize) -> Vec<String> {
        (0..self.columns.len())
            .filter(|&c| !self.is_numeric(c) || self.distinct_count(c) < max_unique)
            .map(|c| self.columns[c].clone())
            .collect()
    }

    /// Columns worth offering as row filters, sorted by name: text columns
    /// with at most [`FILTER_MAX_TEXT_UNIQUE`] distinct values and numeric
    /// columns with at most [`FILTER_MAX_NUMERIC_UNIQUE`].
    pub fn filter_candidates(&self) -> Vec<String> {
        let mut columns: Vec<String> = (0..self.columns.len())
            .filter(|&c| {
                let limit = if self.is_numeric(c) {
                    FILTER_MAX_NUMERIC_UNIQUE
                } else {
                    FILTER_MAX_TEXT_UNIQUE
                };
                self.distinct_count(c) <= limit
            })
            .map(|c| self.columns[c].clone())
            .collect();
        columns.sort();
        columns
    }
}

/// Keep rows whose `column` value is one of `allowed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnFilter {
    pub column: String,
    pub allowed: Vec<String>,
}

impl ColumnFilter {
    pub fn new(column: impl Into<String>, allowed: Vec<String>) -> Self {
        Self {
            column: column.into(),
            allowed,
        }
    }
}

/// Parses `COLUMN=v1,v2,...`.
impl FromStr for ColumnFilter {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        let (column, values) = s
            .split_once('=')
            .ok_or_else(|| GraphError::invalid(format!("filter '{}' is not COLUMN=v1,v2", s)))?;
        let column = column.trim();
        if column.is_empty() {
            return Err(GraphError::invalid(format!("filter '{}' has no column", s)));
        }
        let allowed = values
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
            .collect();
        Ok(Self::new(column, allowed))
    }
}
