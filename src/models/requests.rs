//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;

use crate::cache::{PrimaryKey, Row};

/// Request body for PUT /rows
#[derive(Debug, Clone, Deserialize)]
pub struct SetRowRequest {
    /// Target table
    pub table: String,
    /// Primary key columns and values
    pub primary_key: PrimaryKey,
    /// Full set of value columns for the row
    #[serde(default)]
    pub columns: Row,
}

/// Request body for POST /rows/lookup and DELETE /rows
#[derive(Debug, Clone, Deserialize)]
pub struct RowKeyRequest {
    pub table: String,
    pub primary_key: PrimaryKey,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_request_deserialize() {
        let body = r#"{"table": "users", "primary_key": {"id": 1}, "columns": {"name": "Alice"}}"#;
        let req: SetRowRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.table, "users");
        assert_eq!(req.primary_key.get("id"), Some(&json!(1)));
        assert_eq!(req.columns["name"], json!("Alice"));
    }

    #[test]
    fn test_set_request_columns_default_empty() {
        let body = r#"{"table": "users", "primary_key": {"id": 1}}"#;
        let req: SetRowRequest = serde_json::from_str(body).unwrap();
        assert!(req.columns.is_empty());
    }

    #[test]
    fn test_key_request_deserialize_composite() {
        let body = r#"{"table": "order_items", "primary_key": {"order_id": 100, "item_id": 3}}"#;
        let req: RowKeyRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.primary_key.canonical(), "item_id=3|order_id=100");
    }

    #[test]
    fn test_key_request_requires_primary_key() {
        let body = r#"{"table": "users"}"#;
        assert!(serde_json::from_str::<RowKeyRequest>(body).is_err());
    }
}
