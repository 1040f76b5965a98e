//! Response DTOs for the cache server API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::{PrimaryKey, Row, StatsSnapshot};

/// Response body for POST /rows/lookup
#[derive(Debug, Clone, Serialize)]
pub struct RowResponse {
    pub table: String,
    /// Canonical form of the primary key
    pub key: String,
    pub columns: Row,
}

impl RowResponse {
    pub fn new(table: impl Into<String>, primary_key: &PrimaryKey, columns: Row) -> Self {
        Self {
            table: table.into(),
            key: primary_key.canonical(),
            columns,
        }
    }
}

/// Response body for PUT /rows and DELETE /rows
#[derive(Debug, Clone, Serialize)]
pub struct MutationResponse {
    /// Success message
    pub message: String,
    pub table: String,
    /// Canonical form of the primary key
    pub key: String,
}

impl MutationResponse {
    pub fn stored(table: impl Into<String>, primary_key: &PrimaryKey) -> Self {
        Self::new(table.into(), primary_key, "stored")
    }

    pub fn deleted(table: impl Into<String>, primary_key: &PrimaryKey) -> Self {
        Self::new(table.into(), primary_key, "deleted")
    }

    fn new(table: String, primary_key: &PrimaryKey, action: &str) -> Self {
        let key = primary_key.canonical();
        Self {
            message: format!("Row '{}' in '{}' {} successfully", key, table, action),
            table,
            key,
        }
    }
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub counters: StatsSnapshot,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
    /// sets + gets + deletes
    pub total_operations: u64,
}

impl From<StatsSnapshot> for StatsResponse {
    fn from(counters: StatsSnapshot) -> Self {
        Self {
            hit_rate: counters.hit_rate(),
            total_operations: counters.total_operations(),
            counters,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy" while accepting mutations, "closed" after shutdown
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self::with_status("healthy")
    }

    pub fn closed() -> Self {
        Self::with_status("closed")
    }

    fn with_status(status: &str) -> Self {
        Self {
            status: status.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
