//! Row and Flush-Unit Data Model
//!
//! A `Row` is an ordered mapping from column name to typed value plus a
//! caller-supplied key used for offset correlation. Rows are immutable once
//! appended. A `FlushUnit` is an immutable batch of rows with a strictly
//! increasing per-channel sequence number, handed to the uploader as one
//! durability unit.

use serde::{Deserialize, Serialize};

/// Typed cell value for a row column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
}

impl Value {
    /// Rough encoded size in bytes, used for byte-threshold accounting
    pub fn encoded_size(&self) -> usize {
        match self {
            Value::Int(_) => 8,
            Value::Float(_) => 8,
            Value::Str(s) => s.len(),
            Value::Bool(_) => 1,
            Value::Null => 0,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// One ingested row: ordered columns plus the caller's correlation key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    key: String,
    columns: Vec<(String, Value)>,
    size_bytes: usize,
}

impl Row {
    /// Build a row from its key and ordered columns.
    /// The size estimate is computed once here; rows never change after.
    pub fn new(key: impl Into<String>, columns: Vec<(String, Value)>) -> Self {
        let key = key.into();
        let size_bytes = key.len()
            + columns
                .iter()
                .map(|(name, value)| name.len() + value.encoded_size())
                .sum::<usize>();
        Row {
            key,
            columns,
            size_bytes,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn columns(&self) -> &[(String, Value)] {
        &self.columns
    }

    /// Estimated encoded size in bytes
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }
}

/// Immutable batch of rows handed to the uploader as one durability unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushUnit {
    seq: u64,
    rows: Vec<Row>,
    size_bytes: usize,
}

impl FlushUnit {
    /// Assemble a flush unit. Sequence numbers are assigned by the row
    /// buffer at drain time and strictly increase per channel.
    pub(crate) fn new(seq: u64, rows: Vec<Row>) -> Self {
        debug_assert!(!rows.is_empty(), "flush units are never empty");
        let size_bytes = rows.iter().map(Row::size_bytes).sum();
        FlushUnit {
            seq,
            rows,
            size_bytes,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Key of the last row in the unit; carried back in the upload ack
    pub fn last_key(&self) -> &str {
        self.rows
            .last()
            .map(|r| r.key())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_size_accounts_for_key_and_columns() {
        let row = Row::new(
            "42",
            vec![
                ("c1".to_string(), Value::Int(42)),
                ("c2".to_string(), Value::Str("42".to_string())),
            ],
        );
        // key "42" (2) + "c1" (2) + Int (8) + "c2" (2) + "42" (2)
        assert_eq!(row.size_bytes(), 16);
    }

    #[test]
    fn test_flush_unit_last_key() {
        let rows = vec![
            Row::new("1", vec![("c1".to_string(), Value::Int(1))]),
            Row::new("2", vec![("c1".to_string(), Value::Int(2))]),
            Row::new("3", vec![("c1".to_string(), Value::Int(3))]),
        ];
        let unit = FlushUnit::new(7, rows);
        assert_eq!(unit.seq(), 7);
        assert_eq!(unit.row_count(), 3);
        assert_eq!(unit.last_key(), "3");
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from(5i64), Value::Int(5));
        assert_eq!(Value::from("abc"), Value::Str("abc".to_string()));
        assert_eq!(Value::from(true), Value::Bool(true));
    }
}
