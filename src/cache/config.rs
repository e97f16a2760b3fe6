//! Engine configuration.
//!
//! Built from the `[cache]` section of `rollcall.toml`, or directly via
//! `Default` in tests and embedders.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_FETCH_TIMEOUT_MS: u64 = 8_000;
const DEFAULT_SNAPSHOT_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1_000;
const DEFAULT_FLUSH_BATCH_LIMIT: usize = 100;
pub(crate) const DEFAULT_CHANGE_TOPIC: &str = "profiles";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Upper bound on a single remote fetch (single or batch).
    pub fetch_timeout_ms: u64,
    /// Snapshots older than this are treated as absent.
    pub snapshot_ttl_secs: u64,
    /// Cadence of the auto-flush loop.
    pub flush_interval_ms: u64,
    /// Maximum snapshots written per flush batch.
    pub flush_batch_limit: usize,
    /// Change-bus topic carrying profile mutations.
    pub change_topic: String,
    /// Read and write snapshots through the side store.
    pub enable_side_store: bool,
    /// Resolve avatar references in the background.
    pub enable_enrichment: bool,
    /// Write canonical avatar keys back for legacy avatar URLs.
    pub enable_backfill: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            snapshot_ttl_secs: DEFAULT_SNAPSHOT_TTL_SECS,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            flush_batch_limit: DEFAULT_FLUSH_BATCH_LIMIT,
            change_topic: DEFAULT_CHANGE_TOPIC.to_string(),
            enable_side_store: true,
            enable_enrichment: true,
            enable_backfill: true,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            fetch_timeout_ms: settings.fetch_timeout.as_millis() as u64,
            snapshot_ttl_secs: settings.snapshot_ttl.as_secs(),
            flush_interval_ms: settings.flush_interval.as_millis() as u64,
            flush_batch_limit: settings.flush_batch_limit.get(),
            change_topic: settings.change_topic.clone(),
            enable_side_store: settings.enable_side_store,
            enable_enrichment: settings.enable_enrichment,
            enable_backfill: settings.enable_backfill,
        }
    }
}

impl CacheConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms.max(1))
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    /// Batch limit, clamped to at least one entry.
    pub fn flush_batch_limit(&self) -> usize {
        self.flush_batch_limit.max(1)
    }
}
