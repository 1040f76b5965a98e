//! Keyed Store Module
//!
//! Sharded in-memory map from (table, canonical primary key) to versioned entries.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::cache::{CacheEntry, Mutation, PrimaryKey, Row, RowKey};

// == Keyed Store ==
/// Concurrent row store with per-key atomic read-modify-write.
///
/// Every mutation of one key happens under that key's shard lock, so version
/// bumps, column swaps and expiry refreshes never interleave. Different keys
/// proceed independently.
#[derive(Debug)]
pub struct KeyedStore {
    /// Live entries and pending deletions
    entries: DashMap<RowKey, CacheEntry>,
    /// Last version issued for keys whose entry has been removed
    version_floor: DashMap<RowKey, u64>,
    /// Highest version among keys whose history was retired
    retired_floor: AtomicU64,
    /// TTL applied on every upsert
    ttl: Duration,
}

impl KeyedStore {
    // == Constructor ==
    /// Creates an empty store whose entries live for `ttl` after each write.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            version_floor: DashMap::new(),
            retired_floor: AtomicU64::new(0),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // == Upsert ==
    /// Creates or replaces a row.
    ///
    /// A new entry continues the key's version chain (1 for a never-seen key);
    /// an existing entry gets its columns replaced, version incremented, dirty
    /// flag set and expiry refreshed.
    pub fn upsert(&self, table: &str, primary_key: PrimaryKey, columns: Row) -> Mutation {
        match self.upsert_with(table, primary_key, columns, |_| Ok::<_, Infallible>(())) {
            Ok(mutation) => mutation,
            Err(never) => match never {},
        }
    }

    /// Upsert that runs `commit` on the resulting mutation while the key is
    /// locked and before any state changes.
    ///
    /// If `commit` fails the store is left untouched and the error returned.
    pub fn upsert_with<F, E>(
        &self,
        table: &str,
        primary_key: PrimaryKey,
        columns: Row,
        commit: F,
    ) -> Result<Mutation, E>
    where
        F: FnOnce(&Mutation) -> Result<(), E>,
    {
        let row_key = RowKey::new(table, &primary_key);

        match self.entries.entry(row_key) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                let mutation =
                    Mutation::upsert(table, primary_key, columns.clone(), entry.version + 1);
                commit(&mutation)?;

                entry.columns = Some(columns);
                entry.version = mutation.version;
                entry.dirty = true;
                entry.expires_at = Instant::now() + self.ttl;
                Ok(mutation)
            }
            Entry::Vacant(vacant) => {
                let version = self.next_fresh_version(vacant.key());
                let mutation = Mutation::upsert(table, primary_key.clone(), columns.clone(), version);
                commit(&mutation)?;

                self.version_floor.remove(vacant.key());
                vacant.insert(CacheEntry::new(primary_key, columns, version, self.ttl));
                Ok(mutation)
            }
        }
    }

    // == Get ==
    /// Returns a copy of the row's columns if present and not expired.
    pub fn get(&self, table: &str, primary_key: &PrimaryKey) -> Option<Row> {
        let row_key = RowKey::new(table, primary_key);
        let entry = self.entries.get(&row_key)?;

        if entry.is_visible(Instant::now()) {
            entry.columns.clone()
        } else {
            None
        }
    }

    /// Returns a copy of the full entry, expired or not.
    pub fn entry(&self, table: &str, primary_key: &PrimaryKey) -> Option<CacheEntry> {
        let row_key = RowKey::new(table, primary_key);
        self.entries.get(&row_key).map(|e| e.clone())
    }

    // == Delete ==
    /// Hides the row immediately and records a tombstone for it.
    ///
    /// Works whether or not the key is cached, so a row that only exists in
    /// the backing store is still deleted there.
    pub fn delete(&self, table: &str, primary_key: PrimaryKey) -> Mutation {
        match self.delete_with(table, primary_key, |_| Ok::<_, Infallible>(())) {
            Ok(mutation) => mutation,
            Err(never) => match never {},
        }
    }

    /// Delete with a commit hook, see [`KeyedStore::upsert_with`].
    pub fn delete_with<F, E>(
        &self,
        table: &str,
        primary_key: PrimaryKey,
        commit: F,
    ) -> Result<Mutation, E>
    where
        F: FnOnce(&Mutation) -> Result<(), E>,
    {
        let row_key = RowKey::new(table, &primary_key);

        match self.entries.entry(row_key) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                let mutation = Mutation::tombstone(table, primary_key, entry.version + 1);
                commit(&mutation)?;

                entry.columns = None;
                entry.version = mutation.version;
                entry.dirty = true;
                entry.expires_at = Instant::now();
                Ok(mutation)
            }
            Entry::Vacant(vacant) => {
                let version = self.next_fresh_version(vacant.key());
                let mutation = Mutation::tombstone(table, primary_key.clone(), version);
                commit(&mutation)?;

                self.version_floor.remove(vacant.key());
                vacant.insert(CacheEntry::tombstone(primary_key, version));
                Ok(mutation)
            }
        }
    }

    // == Sweeping ==
    /// Returns the keys of entries due for eviction at `now`.
    pub fn expired_keys(&self, now: Instant) -> Vec<RowKey> {
        self.entries
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Removes one entry if it is still expired at `now`.
    ///
    /// The check and the removal happen under the key's lock, so an entry
    /// refreshed by a concurrent `set` is left alone.
    pub fn remove_expired(&self, row_key: &RowKey, now: Instant) -> Option<CacheEntry> {
        match self.entries.entry(row_key.clone()) {
            Entry::Occupied(occupied) if occupied.get().is_expired(now) => {
                self.version_floor
                    .insert(row_key.clone(), occupied.get().version);
                Some(occupied.remove())
            }
            _ => None,
        }
    }

    /// Removes every entry and returns the dirty ones as mutations.
    pub fn drain(&self) -> Vec<Mutation> {
        let keys: Vec<RowKey> = self.entries.iter().map(|e| e.key().clone()).collect();
        let mut pending = Vec::new();

        for row_key in keys {
            if let Entry::Occupied(occupied) = self.entries.entry(row_key.clone()) {
                self.version_floor
                    .insert(row_key.clone(), occupied.get().version);
                let entry = occupied.remove();
                if entry.dirty {
                    pending.push(entry.to_mutation(&row_key.table));
                }
            }
        }

        pending
    }

    // == Checkpointing ==
    /// Captures every dirty entry without evicting it.
    pub fn dirty_snapshot(&self) -> Vec<Mutation> {
        self.entries
            .iter()
            .filter(|e| e.value().dirty)
            .map(|e| e.value().to_mutation(&e.key().table))
            .collect()
    }

    /// Clears the dirty flag if the live entry still holds `version`.
    ///
    /// Returns true if the flag was cleared.
    pub fn mark_clean(&self, row_key: &RowKey, version: u64) -> bool {
        match self.entries.get_mut(row_key) {
            Some(mut entry) if entry.version == version => {
                entry.dirty = false;
                true
            }
            _ => false,
        }
    }

    // == Recovery ==
    /// Recreates an entry from a logged upsert, keeping the newest version.
    ///
    /// The entry is dirty and expires after `grace`.
    pub fn restore(&self, mutation: &Mutation, grace: Duration) {
        let Some(columns) = mutation.columns.clone() else {
            self.seed_version(mutation.row_key(), mutation.version);
            return;
        };

        let restored =
            CacheEntry::new(mutation.primary_key.clone(), columns, mutation.version, grace);

        match self.entries.entry(mutation.row_key()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().version < mutation.version {
                    occupied.insert(restored);
                }
            }
            Entry::Vacant(vacant) => {
                self.version_floor.remove(vacant.key());
                vacant.insert(restored);
            }
        }
    }

    /// Raises the version floor of a key with no live entry.
    pub fn seed_version(&self, row_key: RowKey, version: u64) {
        if self.entries.contains_key(&row_key) {
            return;
        }
        self.version_floor
            .entry(row_key)
            .and_modify(|v| *v = (*v).max(version))
            .or_insert(version);
    }

    /// Forgets the version history of a key with no live entry once every
    /// version issued for it is settled.
    ///
    /// `forget` runs under the key's lock, so no `set` can slip in between
    /// it and the removal. Later fresh versions start above every retired
    /// one, which keeps them ahead of settle markers still in the log.
    pub fn retire_settled<F>(&self, row_key: &RowKey, settled: u64, forget: F) -> bool
    where
        F: FnOnce(),
    {
        let Entry::Vacant(_locked) = self.entries.entry(row_key.clone()) else {
            return false;
        };

        let issued = self.version_floor.get(row_key).map(|v| *v).unwrap_or(0);
        if issued > settled {
            return false;
        }

        self.retired_floor.fetch_max(settled, Ordering::SeqCst);
        forget();
        self.version_floor.remove(row_key);
        true
    }

    // == Length ==
    /// Returns the number of entries, pending deletions included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn next_fresh_version(&self, row_key: &RowKey) -> u64 {
        let floor = match self.version_floor.get(row_key) {
            Some(v) => *v,
            None => self.retired_floor.load(Ordering::SeqCst),
        };
        floor + 1
    }
}
