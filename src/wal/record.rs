//! WAL record types and framing
//!
//! Each record is stored as `[len: u32 LE][crc32c: u32 LE][payload]`, the
//! payload being the JSON encoding of a [`LogRecord`]. The checksum covers the
//! payload only.

use crc32c::crc32c;
use serde::{Deserialize, Serialize};

use crate::cache::{Mutation, RowKey};
use crate::error::Result;

/// Bytes in a record header (length + checksum).
pub const HEADER_LEN: usize = 8;

/// Largest payload accepted on replay; anything bigger is a torn header.
pub const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// How a logged mutation left the flush pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettleOutcome {
    /// Confirmed by the backing store
    Applied,
    /// Given up on by an operator
    Discarded,
}

/// Body of a log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEntry {
    /// A mutation accepted into the cache
    Mutation(Mutation),
    /// Every mutation of `row_key` up to `version` needs no further flushing
    Settled {
        row_key: RowKey,
        version: u64,
        outcome: SettleOutcome,
    },
}

/// A sequenced log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub seq: u64,
    pub entry: LogEntry,
}

/// Result of decoding one record from the front of a buffer.
#[derive(Debug)]
pub enum Decoded {
    /// A valid record and the number of bytes it occupied
    Record(LogRecord, usize),
    /// Clean end of input
    End,
    /// Torn or corrupt bytes; replay must stop here
    Torn(String),
}

/// Frames a record for appending.
pub fn encode(record: &LogRecord) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(record)?;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32c(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decodes the record at the start of `buf`.
pub fn decode(buf: &[u8]) -> Decoded {
    if buf.is_empty() {
        return Decoded::End;
    }
    if buf.len() < HEADER_LEN {
        return Decoded::Torn(format!("short header ({} bytes)", buf.len()));
    }

    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let crc = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);

    if len > MAX_RECORD_LEN {
        return Decoded::Torn(format!("record length {} exceeds limit", len));
    }
    let Some(payload) = buf.get(HEADER_LEN..HEADER_LEN + len) else {
        return Decoded::Torn(format!(
            "short payload ({} of {} bytes)",
            buf.len() - HEADER_LEN,
            len
        ));
    };
    if crc32c(payload) != crc {
        return Decoded::Torn("checksum mismatch".to_string());
    }

    match serde_json::from_slice::<LogRecord>(payload) {
        Ok(record) => Decoded::Record(record, HEADER_LEN + len),
        Err(e) => Decoded::Torn(format!("undecodable payload: {}", e)),
    }
}
