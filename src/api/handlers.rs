//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.

use std::sync::Arc;

use axum::{extract::State, Json};

use crate::cache::RowKey;
use crate::error::{CacheError, Result};
use crate::facade::{validate_target, CacheDb};
use crate::models::{
    HealthResponse, MutationResponse, RowKeyRequest, RowResponse, SetRowRequest, StatsResponse,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheDb>,
}

impl AppState {
    pub fn new(cache: Arc<CacheDb>) -> Self {
        Self { cache }
    }
}

/// Handler for PUT /rows
///
/// Stores a row in the cache; the backing store is written behind.
pub async fn set_row_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRowRequest>,
) -> Result<Json<MutationResponse>> {
    let response = MutationResponse::stored(&req.table, &req.primary_key);
    state.cache.set(&req.table, req.primary_key, req.columns)?;

    Ok(Json(response))
}

/// Handler for POST /rows/lookup
///
/// Returns the cached row, 404 if absent or expired.
pub async fn get_row_handler(
    State(state): State<AppState>,
    Json(req): Json<RowKeyRequest>,
) -> Result<Json<RowResponse>> {
    validate_target(&req.table, &req.primary_key)?;

    let columns = state
        .cache
        .get(&req.table, &req.primary_key)
        .ok_or_else(|| CacheError::NotFound(RowKey::new(&req.table, &req.primary_key).to_string()))?;

    Ok(Json(RowResponse::new(req.table, &req.primary_key, columns)))
}

/// Handler for DELETE /rows
pub async fn delete_row_handler(
    State(state): State<AppState>,
    Json(req): Json<RowKeyRequest>,
) -> Result<Json<MutationResponse>> {
    let response = MutationResponse::deleted(&req.table, &req.primary_key);
    state.cache.delete(&req.table, req.primary_key)?;

    Ok(Json(response))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(state.cache.stats().into())
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    if state.cache.is_closed() {
        Json(HealthResponse::closed())
    } else {
        Json(HealthResponse::healthy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::cache::{PrimaryKey, Row};
    use crate::config::Config;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn state(dir: &TempDir) -> AppState {
        let backend = Arc::new(MemoryBackend::new().with_table("users", &["id"], &["name"]));
        let config = Config::default()
            .with_ttl(Duration::from_secs(60))
            .with_wal_path(dir.path().join("cache.wal"))
            .with_sync_writes(false);
        AppState::new(Arc::new(CacheDb::open(config, backend).await.unwrap()))
    }

    fn key_req(id: i64) -> RowKeyRequest {
        RowKeyRequest {
            table: "users".to_string(),
            primary_key: PrimaryKey::from_pairs([("id", json!(id))]),
        }
    }

    fn set_req(id: i64, name: &str) -> SetRowRequest {
        let mut columns = Row::new();
        columns.insert("name".into(), json!(name));
        SetRowRequest {
            table: "users".to_string(),
            primary_key: PrimaryKey::from_pairs([("id", json!(id))]),
            columns,
        }
    }

    #[tokio::test]
    async fn test_set_and_get_handler() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;

        let result = set_row_handler(State(state.clone()), Json(set_req(1, "Alice"))).await;
        assert!(result.is_ok());

        let response = get_row_handler(State(state), Json(key_req(1))).await.unwrap();
        assert_eq!(response.columns["name"], json!("Alice"));
        assert_eq!(response.key, "id=1");
    }

    #[tokio::test]
    async fn test_get_missing_row() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;

        let result = get_row_handler(State(state), Json(key_req(404))).await;
        assert!(matches!(result, Err(CacheError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_handler() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;

        set_row_handler(State(state.clone()), Json(set_req(1, "Alice")))
            .await
            .unwrap();
        let result = delete_row_handler(State(state.clone()), Json(key_req(1))).await;
        assert!(result.is_ok());

        let result = get_row_handler(State(state), Json(key_req(1))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_stats_handler() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;

        let response = stats_handler(State(state)).await;
        assert_eq!(response.counters.hits, 0);
        assert_eq!(response.hit_rate, 0.0);
    }

    #[tokio::test]
    async fn test_health_handler() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;

        assert_eq!(health_handler(State(state.clone())).await.status, "healthy");
        state.cache.shutdown().await.unwrap();
        assert_eq!(health_handler(State(state)).await.status, "closed");
    }

    #[tokio::test]
    async fn test_set_invalid_request() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;

        let mut req = set_req(1, "Alice");
        req.table = String::new();
        let result = set_row_handler(State(state.clone()), Json(req)).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));

        let mut req = key_req(1);
        req.primary_key = PrimaryKey::default();
        let result = get_row_handler(State(state.clone()), Json(req.clone())).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
        let result = delete_row_handler(State(state), Json(req)).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }
}
