//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CacheError, Result};

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Time a fresh or refreshed entry stays valid before eviction
    pub ttl: Duration,
    /// Period of the expiration sweeper
    pub sweep_interval: Duration,
    /// Maximum number of mutations waiting in the flush queue
    pub queue_capacity: usize,
    /// Attempts per mutation before it is set aside as failed
    pub max_attempts: u32,
    /// Base delay of the exponential retry backoff
    pub retry_base: Duration,
    /// Timeout applied to every backing store call
    pub backend_timeout: Duration,
    /// TTL given to entries recreated from the write-ahead log
    pub replay_grace: Duration,
    /// Confirmed mutations between two log compactions
    pub compact_every: u64,
    /// Location of the write-ahead log file
    pub wal_path: PathBuf,
    /// Fsync the log after every append
    pub sync_writes: bool,
    /// HTTP server port
    pub server_port: u16,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_TTL_MS` - Entry TTL in milliseconds (default: 2000)
    /// - `SWEEP_INTERVAL_MS` - Sweeper period in milliseconds (default: 100)
    /// - `FLUSH_QUEUE_CAPACITY` - Flush queue bound (default: 1024)
    /// - `FLUSH_MAX_ATTEMPTS` - Attempts per mutation (default: 5)
    /// - `FLUSH_RETRY_BASE_MS` - Backoff base in milliseconds (default: 50)
    /// - `BACKEND_TIMEOUT_MS` - Backing store call timeout (default: 5000)
    /// - `REPLAY_GRACE_MS` - TTL of replayed entries (default: 500)
    /// - `LOG_COMPACT_EVERY` - Confirmations between compactions (default: 256)
    /// - `WAL_PATH` - Write-ahead log file (default: data/cachedb.wal)
    /// - `WAL_SYNC` - Fsync every append (default: true)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ttl: env_millis("CACHE_TTL_MS").unwrap_or(defaults.ttl),
            sweep_interval: env_millis("SWEEP_INTERVAL_MS").unwrap_or(defaults.sweep_interval),
            queue_capacity: env_parse("FLUSH_QUEUE_CAPACITY").unwrap_or(defaults.queue_capacity),
            max_attempts: env_parse("FLUSH_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            retry_base: env_millis("FLUSH_RETRY_BASE_MS").unwrap_or(defaults.retry_base),
            backend_timeout: env_millis("BACKEND_TIMEOUT_MS").unwrap_or(defaults.backend_timeout),
            replay_grace: env_millis("REPLAY_GRACE_MS").unwrap_or(defaults.replay_grace),
            compact_every: env_parse("LOG_COMPACT_EVERY").unwrap_or(defaults.compact_every),
            wal_path: env::var("WAL_PATH")
                .ok()
                .map(PathBuf::from)
                .unwrap_or(defaults.wal_path),
            sync_writes: env_parse("WAL_SYNC").unwrap_or(defaults.sync_writes),
            server_port: env_parse("SERVER_PORT").unwrap_or(defaults.server_port),
        }
    }

    /// Checks that the configuration can drive a working cache.
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(CacheError::Config("ttl must be greater than zero".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(CacheError::Config(
                "sweep_interval must be greater than zero".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(CacheError::Config(
                "queue_capacity must be greater than zero".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(CacheError::Config(
                "max_attempts must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    // == Builder Setters ==
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, base: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.retry_base = base;
        self
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    pub fn with_replay_grace(mut self, grace: Duration) -> Self {
        self.replay_grace = grace;
        self
    }

    pub fn with_compact_every(mut self, every: u64) -> Self {
        self.compact_every = every;
        self
    }

    pub fn with_wal_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.wal_path = path.into();
        self
    }

    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(2000),
            sweep_interval: Duration::from_millis(100),
            queue_capacity: 1024,
            max_attempts: 5,
            retry_base: Duration::from_millis(50),
            backend_timeout: Duration::from_millis(5000),
            replay_grace: Duration::from_millis(500),
            compact_every: 256,
            wal_path: PathBuf::from("data/cachedb.wal"),
            sync_writes: true,
            server_port: 3000,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_millis(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.ttl, Duration::from_secs(2));
        assert_eq!(config.sweep_interval, Duration::from_millis(100));
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.server_port, 3000);
        assert!(config.sync_writes);
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("CACHE_TTL_MS");
        env::remove_var("SWEEP_INTERVAL_MS");
        env::remove_var("FLUSH_QUEUE_CAPACITY");
        env::remove_var("WAL_PATH");
        env::remove_var("SERVER_PORT");

        let config = Config::from_env();
        assert_eq!(config.ttl, Duration::from_secs(2));
        assert_eq!(config.sweep_interval, Duration::from_millis(100));
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.wal_path, PathBuf::from("data/cachedb.wal"));
        assert_eq!(config.server_port, 3000);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(Config::default().validate().is_ok());
        assert!(Config::default()
            .with_ttl(Duration::ZERO)
            .validate()
            .is_err());
        assert!(Config::default().with_queue_capacity(0).validate().is_err());
        assert!(Config::default()
            .with_retry(0, Duration::from_millis(1))
            .validate()
            .is_err());
        assert!(Config::default()
            .with_sweep_interval(Duration::ZERO)
            .validate()
            .is_err());
    }
}
