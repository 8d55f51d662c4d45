//! Result sets and legacy-style row projections.

use std::collections::HashMap;

use crate::error::{BridgeError, Result};
use crate::value::SqlValue;

/// One statement's worth of results: ordered column names plus rows whose
/// values align positionally with the columns.
///
/// The statement executor returns `Option<ResultSet>`; `None` means the
/// statement produced no column descriptors at all (plain DML or DDL),
/// which is distinct from a SELECT that matched zero rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl ResultSet {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Reshape every row into a legacy-style case-insensitive projection.
    pub fn view_rows(&self) -> Vec<RowView> {
        self.rows
            .iter()
            .map(|row| RowView::new(&self.columns, row.clone()))
            .collect()
    }
}

/// Case-insensitive, alias-aware view over one result row.
///
/// Built once per row at shaping time: the backing map holds exactly one
/// entry per distinct lower-cased column name, and lookups normalize the
/// requested key before resolution. One legacy alias survives: `offset`
/// resolves to the `cmOffset` column when present.
#[derive(Debug, Clone)]
pub struct RowView {
    columns: Vec<String>,
    values: HashMap<String, SqlValue>,
}

impl RowView {
    /// Shape one row. Timestamp values are stringified here, matching what
    /// legacy callers always saw for date/time columns.
    pub fn new(columns: &[String], values: Vec<SqlValue>) -> Self {
        let mut map = HashMap::with_capacity(columns.len());
        for (name, value) in columns.iter().zip(values) {
            let value = match value {
                SqlValue::DateTime(_) | SqlValue::DateTimeOffset(_) => {
                    SqlValue::String(value.to_string())
                }
                other => other,
            };
            map.insert(name.to_lowercase(), value);
        }
        Self {
            columns: columns.to_vec(),
            values: map,
        }
    }

    /// Look up a field by name, case-insensitively.
    pub fn get(&self, key: &str) -> Result<&SqlValue> {
        let lower = key.to_lowercase();
        if let Some(value) = self.values.get(&lower) {
            return Ok(value);
        }
        if lower == "offset" {
            if let Some(value) = self.values.get("cmoffset") {
                return Ok(value);
            }
        }
        Err(BridgeError::UnknownField {
            key: key.to_string(),
            available: self.columns.clone(),
        })
    }

    /// Whether a field resolves, under the same rules as [`RowView::get`].
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_ok()
    }

    /// Column names in their original order and case.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }
}
