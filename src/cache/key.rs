//! Primary Key Module
//!
//! Canonical identity for rows addressed by a (possibly composite) primary key.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Column name to value mapping used for rows and key parts.
pub type Row = BTreeMap<String, Value>;

/// Separator placed between `col=value` pairs of a canonical key.
pub const KEY_SEPARATOR: char = '|';

// == Primary Key ==
/// A primary key made of one or more column/value pairs.
///
/// Pairs are held sorted by column name, so two keys built from the same
/// pairs in any order compare equal and share one canonical string.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrimaryKey(Row);

impl PrimaryKey {
    // == Constructor ==
    pub fn new(parts: Row) -> Self {
        Self(parts)
    }

    /// Builds a key from `(column, value)` pairs in any order.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    // == Canonical ==
    /// Returns the canonical identity string, e.g. `item_id=3|order_id=100`.
    ///
    /// Values are rendered as JSON text, so the string `"1"` and the number
    /// `1` stay distinct.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        for (i, (col, value)) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(KEY_SEPARATOR);
            }
            out.push_str(col);
            out.push('=');
            out.push_str(&value.to_string());
        }
        out
    }

    /// Column names in sorted order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_row(&self) -> &Row {
        &self.0
    }

    pub fn into_row(self) -> Row {
        self.0
    }
}

impl From<Row> for PrimaryKey {
    fn from(parts: Row) -> Self {
        Self::new(parts)
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

// == Row Key ==
/// Identity of a cached row: table name plus canonical primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey {
    pub table: String,
    pub key: String,
}

impl RowKey {
    pub fn new(table: impl Into<String>, primary_key: &PrimaryKey) -> Self {
        Self {
            table: table.into(),
            key: primary_key.canonical(),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.key)
    }
}
