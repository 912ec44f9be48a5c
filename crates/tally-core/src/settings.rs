//! Settings provider
//!
//! Typed accessors over the settings key/value table, with the documented
//! defaults the pipeline falls back to. Durations are stored in seconds.
//! The known-asset set lives in its own table and is loaded per merge so
//! user edits take effect immediately.

use std::time::Duration;

use crate::db::Database;
use crate::error::Result;
use crate::merge::MergeConfig;
use crate::models::KnownAssetSet;

pub const MERGE_WINDOW_SECS: &str = "merge_window_secs";
pub const RAW_DEDUP_TTL_SECS: &str = "raw_dedup_ttl_secs";
pub const RAW_DEDUP_CAPACITY: &str = "raw_dedup_capacity";
pub const AUTO_GROUP: &str = "auto_group";
pub const ANALYZER_TIMEOUT_SECS: &str = "analyzer_timeout_secs";
pub const FINGERPRINT_REQUIRES_KIND: &str = "fingerprint_requires_kind";

pub const DEFAULT_MERGE_WINDOW_SECS: u64 = 180;
pub const DEFAULT_RAW_DEDUP_TTL_SECS: u64 = 300;
pub const DEFAULT_RAW_DEDUP_CAPACITY: u64 = 4096;
pub const DEFAULT_ANALYZER_TIMEOUT_SECS: u64 = 30;

/// Point-in-time view of the pipeline's tunables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub merge_window: Duration,
    pub raw_dedup_ttl: Duration,
    pub raw_dedup_capacity: usize,
    pub auto_group: bool,
    pub analyzer_timeout: Duration,
    pub fingerprint_requires_kind: bool,
}

impl PipelineConfig {
    pub fn merge_config(&self) -> MergeConfig {
        MergeConfig {
            window: self.merge_window,
            auto_group: self.auto_group,
            require_same_kind: self.fingerprint_requires_kind,
        }
    }
}

/// Settings provider consumed by the pipeline.
#[derive(Clone)]
pub struct Settings {
    db: Database,
}

impl Settings {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn get_u64(&self, key: &str, default: u64) -> Result<u64> {
        Ok(self
            .db
            .get_setting(key)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(default))
    }

    fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        Ok(self
            .db
            .get_setting(key)?
            .map(|v| v == "true" || v == "1")
            .unwrap_or(default))
    }

    /// Snapshot the current tunables.
    pub fn snapshot(&self) -> Result<PipelineConfig> {
        Ok(PipelineConfig {
            merge_window: Duration::from_secs(
                self.get_u64(MERGE_WINDOW_SECS, DEFAULT_MERGE_WINDOW_SECS)?,
            ),
            raw_dedup_ttl: Duration::from_secs(
                self.get_u64(RAW_DEDUP_TTL_SECS, DEFAULT_RAW_DEDUP_TTL_SECS)?,
            ),
            raw_dedup_capacity: self
                .get_u64(RAW_DEDUP_CAPACITY, DEFAULT_RAW_DEDUP_CAPACITY)?
                as usize,
            auto_group: self.get_bool(AUTO_GROUP, true)?,
            analyzer_timeout: Duration::from_secs(
                self.get_u64(ANALYZER_TIMEOUT_SECS, DEFAULT_ANALYZER_TIMEOUT_SECS)?,
            ),
            fingerprint_requires_kind: self.get_bool(FINGERPRINT_REQUIRES_KIND, false)?,
        })
    }

    pub fn known_assets(&self) -> Result<KnownAssetSet> {
        self.db.known_assets()
    }
}
