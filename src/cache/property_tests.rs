//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the keyed store against a simple sequential model.

use proptest::prelude::*;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

use crate::cache::{KeyedStore, PrimaryKey, Row, RowKey};

// == Test Configuration ==
const TEST_TTL: Duration = Duration::from_secs(300);

// == Strategies ==
/// Small key space so sequences revisit the same rows
fn id_strategy() -> impl Strategy<Value = i64> {
    0i64..8
}

fn table_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("users"), Just("orders")]
}

/// Generates row values with one or two columns
fn row_strategy() -> impl Strategy<Value = Row> {
    ("[a-zA-Z0-9 ]{1,32}", prop::option::of(0i64..1000)).prop_map(|(name, qty)| {
        let mut row = Row::new();
        row.insert("name".into(), json!(name));
        if let Some(qty) = qty {
            row.insert("qty".into(), json!(qty));
        }
        row
    })
}

fn pk(id: i64) -> PrimaryKey {
    PrimaryKey::from_pairs([("id", json!(id))])
}

/// Generates a sequence of cache operations for testing
#[derive(Debug, Clone)]
enum CacheOp {
    Set {
        table: &'static str,
        id: i64,
        row: Row,
    },
    Get {
        table: &'static str,
        id: i64,
    },
    Delete {
        table: &'static str,
        id: i64,
    },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (table_strategy(), id_strategy(), row_strategy())
            .prop_map(|(table, id, row)| CacheOp::Set { table, id, row }),
        (table_strategy(), id_strategy()).prop_map(|(table, id)| CacheOp::Get { table, id }),
        (table_strategy(), id_strategy()).prop_map(|(table, id)| CacheOp::Delete { table, id }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Reads always agree with a sequential map model, and every mutation of
    // a key carries a strictly larger version than the one before it.
    #[test]
    fn prop_matches_sequential_model(ops in prop::collection::vec(cache_op_strategy(), 1..80)) {
        let store = KeyedStore::new(TEST_TTL);
        let mut model: HashMap<(&'static str, i64), Row> = HashMap::new();
        let mut last_version: HashMap<(&'static str, i64), u64> = HashMap::new();

        for op in ops {
            match op {
                CacheOp::Set { table, id, row } => {
                    let m = store.upsert(table, pk(id), row.clone());
                    let prev = last_version.insert((table, id), m.version).unwrap_or(0);
                    prop_assert!(m.version > prev, "version went from {} to {}", prev, m.version);
                    model.insert((table, id), row);
                }
                CacheOp::Get { table, id } => {
                    prop_assert_eq!(store.get(table, &pk(id)), model.get(&(table, id)).cloned());
                }
                CacheOp::Delete { table, id } => {
                    let m = store.delete(table, pk(id));
                    let prev = last_version.insert((table, id), m.version).unwrap_or(0);
                    prop_assert!(m.version > prev);
                    prop_assert!(m.is_tombstone());
                    model.remove(&(table, id));
                }
            }
        }
    }

    // Storing V1 then V2 under one key leaves exactly V2 visible.
    #[test]
    fn prop_last_write_wins(rows in prop::collection::vec(row_strategy(), 1..20)) {
        let store = KeyedStore::new(TEST_TTL);
        let count = rows.len() as u64;

        for row in &rows {
            store.upsert("users", pk(1), row.clone());
            let got = store.get("users", &pk(1));
            prop_assert_eq!(got.as_ref(), Some(row));
        }

        let entry = store.entry("users", &pk(1)).unwrap();
        prop_assert_eq!(entry.version, count);
        prop_assert_eq!(store.len(), 1);
    }

    // A delete is observable immediately, whatever came before it.
    #[test]
    fn prop_delete_removes_entry(id in id_strategy(), rows in prop::collection::vec(row_strategy(), 0..5)) {
        let store = KeyedStore::new(TEST_TTL);
        for row in rows {
            store.upsert("users", pk(id), row);
        }

        store.delete("users", pk(id));
        prop_assert!(store.get("users", &pk(id)).is_none());
    }

    // Composite keys address the same entry regardless of column order.
    #[test]
    fn prop_composite_key_order_independent(
        parts in prop::collection::btree_map("[a-z]{1,8}", 0i64..100, 1..5),
        row in row_strategy()
    ) {
        let forward: Vec<(String, i64)> = parts.iter().map(|(k, v)| (k.clone(), *v)).collect();
        let mut backward = forward.clone();
        backward.reverse();

        let a = PrimaryKey::from_pairs(forward);
        let b = PrimaryKey::from_pairs(backward);
        prop_assert_eq!(RowKey::new("t", &a), RowKey::new("t", &b));

        let store = KeyedStore::new(TEST_TTL);
        store.upsert("t", a, row.clone());
        prop_assert_eq!(store.get("t", &b), Some(row));
    }
}

// == Property Test for Error Response Format ==
// This tests the CacheError -> HTTP response conversion

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    // Every error renders as JSON with a string "error" field.
    #[test]
    fn prop_error_response_format(
        error_msg in "[a-zA-Z0-9 _-]{1,100}"
    ) {
        use crate::error::CacheError;
        use axum::body::to_bytes;
        use axum::response::IntoResponse;

        let error_variants = vec![
            CacheError::NotFound(error_msg.clone()),
            CacheError::InvalidRequest(error_msg.clone()),
            CacheError::Config(error_msg.clone()),
            CacheError::MissingPrimaryKey(error_msg.clone()),
            CacheError::Internal(error_msg.clone()),
        ];

        let rt = tokio::runtime::Runtime::new().unwrap();

        for error in error_variants {
            let expected_msg = error.to_string();
            let response = error.into_response();

            let content_type = response.headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok());
            prop_assert!(
                content_type.map(|ct| ct.contains("application/json")).unwrap_or(false),
                "Response should have JSON content-type"
            );

            let body = response.into_body();
            let bytes = rt.block_on(async {
                to_bytes(body, usize::MAX).await.unwrap()
            });

            let json: serde_json::Value = serde_json::from_slice(&bytes)
                .expect("Response body should be valid JSON");

            let error_value = json.get("error").expect("JSON response should contain 'error' field");
            prop_assert_eq!(error_value.as_str(), Some(expected_msg.as_str()));
        }
    }
}

// == Property Test for Concurrent Operation Correctness ==

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    // Concurrent writers never lose a version bump on a shared key.
    #[test]
    fn prop_concurrent_versions_are_dense(
        writers in 2usize..6,
        writes_per_writer in 1usize..40,
        ids in prop::collection::vec(id_strategy(), 1..4)
    ) {
        use std::sync::Arc;

        let store = Arc::new(KeyedStore::new(TEST_TTL));
        let ids = Arc::new(ids);

        let handles: Vec<_> = (0..writers)
            .map(|w| {
                let store = store.clone();
                let ids = ids.clone();
                std::thread::spawn(move || {
                    for i in 0..writes_per_writer {
                        let id = ids[i % ids.len()];
                        let mut row = Row::new();
                        row.insert("writer".into(), json!(w));
                        store.upsert("users", pk(id), row);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().expect("writer should not panic");
        }

        let mut expected: HashMap<i64, u64> = HashMap::new();
        for i in 0..writes_per_writer {
            *expected.entry(ids[i % ids.len()]).or_default() += writers as u64;
        }

        for (id, count) in expected {
            let entry = store.entry("users", &pk(id)).unwrap();
            prop_assert_eq!(entry.version, count);
        }
    }
}
