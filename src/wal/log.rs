//! WAL writer, replay and compaction
//!
//! The log is a single append-only file. Appends are serialized by a mutex and
//! optionally fsynced; compaction rewrites the surviving records to a sibling
//! file and renames it over the original. Appends only wait for the final
//! copy-and-rename step of a compaction, never for the rewrite itself.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::record::{decode, encode, Decoded, LogEntry, LogRecord, SettleOutcome};
use crate::cache::{Mutation, RowKey};
use crate::error::{CacheError, Result};

struct LogWriter {
    file: File,
    size: u64,
    records: u64,
    next_seq: u64,
}

// == Durable Log ==
/// Crash-surviving record of every mutation accepted by the cache.
pub struct DurableLog {
    path: PathBuf,
    sync: bool,
    writer: Mutex<LogWriter>,
    /// Serializes compaction passes
    compacting: Mutex<()>,
}

/// Survivors of a compaction pass written to the staging file, waiting for
/// the records appended since the pass started.
struct Staged {
    file: File,
    prefix_len: u64,
    kept: u64,
    size: u64,
}

/// Records read back from the log.
#[derive(Debug, Default)]
pub struct Replay {
    pub records: Vec<LogRecord>,
}

/// Outcome of a compaction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compaction {
    pub records_before: u64,
    pub records_after: u64,
    pub bytes_after: u64,
}

impl DurableLog {
    // == Open ==
    /// Opens or creates the log at `path`.
    ///
    /// A torn tail left by a crash mid-append is reported and cut off so that
    /// later appends stay readable.
    pub fn open(path: impl AsRef<Path>, sync: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| CacheError::log(&path, e))?;
        }

        // Leftover from a compaction interrupted before its rename
        let staging = staging_path(&path);
        if staging.exists() {
            warn!(path = %staging.display(), "Removing unfinished compaction file");
            fs::remove_file(&staging).map_err(|e| CacheError::log(&staging, e))?;
        }

        let bytes = read_or_empty(&path)?;
        let scan = scan(&bytes);
        if let Some(reason) = &scan.torn {
            warn!(
                path = %path.display(),
                valid_bytes = scan.valid_len,
                dropped_bytes = bytes.len() - scan.valid_len,
                reason = %reason,
                "Write-ahead log has a torn tail, truncating to last good record"
            );
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| CacheError::log(&path, e))?;
        if scan.torn.is_some() {
            file.set_len(scan.valid_len as u64)
                .map_err(|e| CacheError::log(&path, e))?;
            file.sync_all().map_err(|e| CacheError::log(&path, e))?;
        }

        let next_seq = scan.records.last().map_or(1, |r| r.seq + 1);
        info!(
            path = %path.display(),
            records = scan.records.len(),
            bytes = scan.valid_len,
            "Write-ahead log opened"
        );

        Ok(Self {
            path,
            sync,
            writer: Mutex::new(LogWriter {
                file,
                size: scan.valid_len as u64,
                records: scan.records.len() as u64,
                next_seq,
            }),
            compacting: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.writer.lock().size
    }

    pub fn record_count(&self) -> u64 {
        self.writer.lock().records
    }

    // == Append ==
    /// Appends a mutation; returns once it is on stable storage (when syncing).
    pub fn append_mutation(&self, mutation: &Mutation) -> Result<u64> {
        self.append(LogEntry::Mutation(mutation.clone()))
    }

    /// Records that `row_key` needs no flushing up to `version`.
    pub fn append_settled(
        &self,
        row_key: &RowKey,
        version: u64,
        outcome: SettleOutcome,
    ) -> Result<u64> {
        self.append(LogEntry::Settled {
            row_key: row_key.clone(),
            version,
            outcome,
        })
    }

    fn append(&self, entry: LogEntry) -> Result<u64> {
        let mut writer = self.writer.lock();
        let seq = writer.next_seq;
        let frame = encode(&LogRecord { seq, entry })?;

        if let Err(e) = write_frame(&mut writer.file, &frame, self.sync) {
            // Cut off whatever part of the frame made it to disk
            let size = writer.size;
            if let Err(trunc) = writer.file.set_len(size) {
                warn!(error = %trunc, "Failed to roll back partial log append");
            }
            return Err(CacheError::log(&self.path, e));
        }

        writer.next_seq += 1;
        writer.size += frame.len() as u64;
        writer.records += 1;
        Ok(seq)
    }

    // == Replay ==
    /// Reads back every well-formed record in append order.
    pub fn replay(&self) -> Result<Replay> {
        // Hold the writer so the file is not growing underneath us
        let _writer = self.writer.lock();
        let bytes = read_or_empty(&self.path)?;
        let scan = scan(&bytes);
        if let Some(reason) = scan.torn {
            warn!(reason = %reason, "Skipping malformed log tail during replay");
        }
        Ok(Replay {
            records: scan.records,
        })
    }

    // == Compaction ==
    /// Drops every record already settled according to `settled` (and to the
    /// log's own markers), keeping unsettled mutations in order.
    ///
    /// The surviving records are written to a staging file, synced, and
    /// renamed over the log, so a crash at any point leaves either the old or
    /// the new file intact. Records appended while the pass runs are carried
    /// over unchanged.
    pub fn compact(&self, settled: &HashMap<RowKey, u64>) -> Result<Compaction> {
        let _pass = self.compacting.lock();
        let staged = self.stage(settled)?;
        self.install(staged)
    }

    /// Rewrites the log as of now into the staging file without blocking
    /// appends.
    fn stage(&self, settled: &HashMap<RowKey, u64>) -> Result<Staged> {
        let prefix_len = self.writer.lock().size;

        let mut bytes = read_or_empty(&self.path)?;
        bytes.truncate(prefix_len as usize);
        let scan = scan(&bytes);

        let mut floor = settled.clone();
        merge_settled(&mut floor, &scan.records);

        let staging = staging_path(&self.path);
        let mut file = File::create(&staging).map_err(|e| CacheError::log(&staging, e))?;
        let mut kept = 0u64;
        let mut size = 0u64;

        for record in &scan.records {
            let LogEntry::Mutation(m) = &record.entry else {
                continue;
            };
            if m.version <= floor.get(&m.row_key()).copied().unwrap_or(0) {
                continue;
            }
            let frame = encode(record)?;
            file.write_all(&frame)
                .map_err(|e| CacheError::log(&staging, e))?;
            kept += 1;
            size += frame.len() as u64;
        }
        file.sync_data()
            .map_err(|e| CacheError::log(&staging, e))?;

        Ok(Staged {
            file,
            prefix_len,
            kept,
            size,
        })
    }

    /// Copies the records appended since `stage` and swaps the staging file
    /// in. Appends wait only for this step.
    fn install(&self, mut staged: Staged) -> Result<Compaction> {
        let staging = staging_path(&self.path);
        let mut writer = self.writer.lock();

        let tail = read_range(&self.path, staged.prefix_len, writer.size)?;
        let tail_records = scan(&tail).records.len() as u64;
        staged
            .file
            .write_all(&tail)
            .map_err(|e| CacheError::log(&staging, e))?;
        staged
            .file
            .sync_all()
            .map_err(|e| CacheError::log(&staging, e))?;
        drop(staged.file);

        fs::rename(&staging, &self.path).map_err(|e| CacheError::log(&self.path, e))?;
        sync_parent(&self.path);

        writer.file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| CacheError::log(&self.path, e))?;

        let result = Compaction {
            records_before: writer.records,
            records_after: staged.kept + tail_records,
            bytes_after: staged.size + tail.len() as u64,
        };
        writer.records = result.records_after;
        writer.size = result.bytes_after;

        debug!(
            before = result.records_before,
            after = result.records_after,
            carried_over = tail_records,
            bytes = result.bytes_after,
            "Write-ahead log compacted"
        );
        Ok(result)
    }
}

impl Replay {
    /// Highest settled version per key.
    pub fn settled_versions(&self) -> HashMap<RowKey, u64> {
        let mut settled = HashMap::new();
        merge_settled(&mut settled, &self.records);
        settled
    }

    /// Highest version ever logged per key, settled or not.
    pub fn last_versions(&self) -> HashMap<RowKey, u64> {
        let mut last: HashMap<RowKey, u64> = HashMap::new();
        for record in &self.records {
            let (key, version) = match &record.entry {
                LogEntry::Mutation(m) => (m.row_key(), m.version),
                LogEntry::Settled {
                    row_key, version, ..
                } => (row_key.clone(), *version),
            };
            let slot = last.entry(key).or_default();
            *slot = (*slot).max(version);
        }
        last
    }

    /// Unsettled mutations, newest per key, in log order.
    ///
    /// Older versions of a key are superseded by the newest one and never
    /// reach the backing store.
    pub fn pending(&self) -> Vec<Mutation> {
        let settled = self.settled_versions();
        let mut newest: HashMap<RowKey, (usize, &Mutation)> = HashMap::new();

        for (idx, record) in self.records.iter().enumerate() {
            let LogEntry::Mutation(m) = &record.entry else {
                continue;
            };
            let key = m.row_key();
            if m.version <= settled.get(&key).copied().unwrap_or(0) {
                continue;
            }
            let newer = newest
                .get(&key)
                .map_or(true, |(_, seen)| m.version > seen.version);
            if newer {
                newest.insert(key, (idx, m));
            }
        }

        let mut pending: Vec<(usize, &Mutation)> = newest.into_values().collect();
        pending.sort_by_key(|(idx, _)| *idx);
        pending.into_iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

struct Scan {
    records: Vec<LogRecord>,
    valid_len: usize,
    torn: Option<String>,
}

fn scan(bytes: &[u8]) -> Scan {
    let mut records = Vec::new();
    let mut offset = 0;

    loop {
        match decode(&bytes[offset..]) {
            Decoded::Record(record, used) => {
                records.push(record);
                offset += used;
            }
            Decoded::End => {
                return Scan {
                    records,
                    valid_len: offset,
                    torn: None,
                }
            }
            Decoded::Torn(reason) => {
                return Scan {
                    records,
                    valid_len: offset,
                    torn: Some(reason),
                }
            }
        }
    }
}

fn merge_settled(settled: &mut HashMap<RowKey, u64>, records: &[LogRecord]) {
    for record in records {
        if let LogEntry::Settled {
            row_key, version, ..
        } = &record.entry
        {
            let slot = settled.entry(row_key.clone()).or_default();
            *slot = (*slot).max(*version);
        }
    }
}

fn write_frame(file: &mut File, frame: &[u8], sync: bool) -> io::Result<()> {
    file.write_all(frame)?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

fn read_or_empty(path: &Path) -> Result<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(CacheError::log(path, e)),
    }
}

fn read_range(path: &Path, start: u64, end: u64) -> Result<Vec<u8>> {
    let mut file = File::open(path).map_err(|e| CacheError::log(path, e))?;
    file.seek(SeekFrom::Start(start))
        .map_err(|e| CacheError::log(path, e))?;

    let mut bytes = Vec::with_capacity(end.saturating_sub(start) as usize);
    file.take(end.saturating_sub(start))
        .read_to_end(&mut bytes)
        .map_err(|e| CacheError::log(path, e))?;
    Ok(bytes)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".compact");
    PathBuf::from(name)
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
            warn!(error = %e, "Failed to sync log directory after compaction");
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}
