//! Cache Entry Module
//!
//! Defines the structure for individual cached rows with TTL and version metadata.

use std::time::{Duration, Instant};

use crate::cache::{Mutation, PrimaryKey, Row};

// == Cache Entry ==
/// A cached row with its expiration deadline, version and dirty flag.
///
/// `columns == None` marks a pending deletion: the row is already gone for
/// readers and waits for the sweeper to hand its tombstone to the flush
/// pipeline.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Key the row was written with
    pub primary_key: PrimaryKey,
    /// Latest known non-key values, `None` once deleted
    pub columns: Option<Row>,
    /// Absolute expiration deadline
    pub expires_at: Instant,
    /// Per-key version, incremented on every mutation
    pub version: u64,
    /// True until the backing store confirms this version
    pub dirty: bool,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a dirty entry that expires `ttl` from now.
    pub fn new(primary_key: PrimaryKey, columns: Row, version: u64, ttl: Duration) -> Self {
        Self {
            primary_key,
            columns: Some(columns),
            expires_at: Instant::now() + ttl,
            version,
            dirty: true,
        }
    }

    /// Creates a pending deletion that is due for the next sweep.
    pub fn tombstone(primary_key: PrimaryKey, version: u64) -> Self {
        Self {
            primary_key,
            columns: None,
            expires_at: Instant::now(),
            version,
            dirty: true,
        }
    }

    // == Is Expired ==
    /// Checks if the entry is due for eviction.
    ///
    /// An entry is expired once `now >= expires_at`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// True when a reader may see this entry's columns.
    pub fn is_visible(&self, now: Instant) -> bool {
        self.columns.is_some() && !self.is_expired(now)
    }

    /// Captures the entry's current state as a detached mutation.
    pub fn to_mutation(&self, table: &str) -> Mutation {
        match &self.columns {
            Some(columns) => Mutation::upsert(
                table,
                self.primary_key.clone(),
                columns.clone(),
                self.version,
            ),
            None => Mutation::tombstone(table, self.primary_key.clone(), self.version),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread::sleep;

    fn key() -> PrimaryKey {
        PrimaryKey::from_pairs([("id", json!(1))])
    }

    fn row(name: &str) -> Row {
        let mut r = Row::new();
        r.insert("name".into(), json!(name));
        r
    }

    #[test]
    fn test_entry_creation() {
        let entry = CacheEntry::new(key(), row("Alice"), 1, Duration::from_secs(60));

        assert_eq!(entry.version, 1);
        assert!(entry.dirty);
        assert!(entry.is_visible(Instant::now()));
    }

    #[test]
    fn test_entry_expiration() {
        let entry = CacheEntry::new(key(), row("Alice"), 1, Duration::from_millis(50));

        assert!(!entry.is_expired(Instant::now()));

        sleep(Duration::from_millis(80));

        assert!(entry.is_expired(Instant::now()));
        assert!(!entry.is_visible(Instant::now()));
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let mut entry = CacheEntry::new(key(), row("Alice"), 1, Duration::from_secs(60));
        let now = Instant::now();
        entry.expires_at = now;

        // Entry should be expired when current time >= expires_at
        assert!(entry.is_expired(now), "Entry should be expired at boundary");
    }

    #[test]
    fn test_tombstone_is_invisible_and_due() {
        let entry = CacheEntry::tombstone(key(), 3);
        let now = Instant::now();

        assert!(!entry.is_visible(now));
        assert!(entry.is_expired(now));
        assert!(entry.to_mutation("users").is_tombstone());
    }

    #[test]
    fn test_to_mutation_copies_state() {
        let mut entry = CacheEntry::new(key(), row("Alice"), 2, Duration::from_secs(60));
        let captured = entry.to_mutation("users");

        entry.columns = Some(row("Bob"));
        entry.version = 3;

        assert_eq!(captured.version, 2);
        assert_eq!(captured.columns, Some(row("Alice")));
    }
}
