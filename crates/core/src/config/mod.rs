//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (SNAPCACHE_*)
//! 2. TOML config file (if SNAPCACHE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Deserializer, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (SNAPCACHE_*)
/// 2. TOML config file (if SNAPCACHE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite key/value database.
    ///
    /// Set via SNAPCACHE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// On-disk snapshot format version. Bumping it orphans every older key.
    #[serde(default = "default_snapshot_version")]
    pub snapshot_version: u32,

    /// Serialized envelopes above this size are split into chunks.
    #[serde(default = "default_chunk_threshold_bytes")]
    pub chunk_threshold_bytes: usize,

    /// Serialized envelopes above this size are never persisted.
    #[serde(default = "default_max_snapshot_bytes")]
    pub max_snapshot_bytes: usize,

    /// Envelopes older than this are evicted on read.
    #[serde(default = "default_max_snapshot_age_ms")]
    pub max_snapshot_age_ms: i64,

    /// Size ceiling for the compact profile snapshot.
    #[serde(default = "default_compact_max_bytes")]
    pub compact_max_bytes: usize,

    /// Cache epoch baked into compact snapshot keys.
    ///
    /// Set via SNAPCACHE_CACHE_EPOCH environment variable. Numeric values
    /// are taken as their decimal text.
    #[serde(default = "default_cache_epoch", deserialize_with = "string_or_integer")]
    pub cache_epoch: String,

    /// Community whose directory is prefetched at boot.
    #[serde(default = "default_community")]
    pub default_community: String,

    /// Staleness threshold for boot-time prefetch targets.
    #[serde(default = "default_boot_stale_ms")]
    pub boot_stale_ms: u64,

    /// Staleness threshold for on-demand list targets.
    #[serde(default = "default_list_stale_ms")]
    pub list_stale_ms: u64,

    /// Conversation previews hydrated inline before the rest go idle.
    #[serde(default = "default_inline_preview_count")]
    pub inline_preview_count: usize,

    /// Inline previews processed between pauses.
    #[serde(default = "default_preview_batch_size")]
    pub preview_batch_size: usize,

    /// Pause between inline preview batches in milliseconds.
    #[serde(default = "default_preview_pause_ms")]
    pub preview_pause_ms: u64,

    /// Maximum number of pending hydration jobs.
    #[serde(default = "default_job_queue_capacity")]
    pub job_queue_capacity: usize,

    /// Maximum number of pending idle tasks.
    #[serde(default = "default_idle_queue_capacity")]
    pub idle_queue_capacity: usize,

    /// Delay between consecutive idle tasks in milliseconds.
    #[serde(default = "default_idle_task_delay_ms")]
    pub idle_task_delay_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./snapcache.sqlite")
}

fn default_snapshot_version() -> u32 {
    2
}

fn default_chunk_threshold_bytes() -> usize {
    48 * 1024
}

fn default_max_snapshot_bytes() -> usize {
    80 * 1024
}

fn default_max_snapshot_age_ms() -> i64 {
    14 * 24 * 60 * 60 * 1000
}

fn default_compact_max_bytes() -> usize {
    45 * 1024 // stays below the 50KB per-value ceiling of small stores
}

fn default_cache_epoch() -> String {
    "1".into()
}

/// Environment values that look numeric arrive as numbers.
fn string_or_integer<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Unsigned(u64),
        Signed(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Unsigned(value) => value.to_string(),
        Raw::Signed(value) => value.to_string(),
    })
}

fn default_community() -> String {
    "edge-patagonia".into()
}

fn default_boot_stale_ms() -> u64 {
    300_000
}

fn default_list_stale_ms() -> u64 {
    30_000
}

fn default_inline_preview_count() -> usize {
    3
}

fn default_preview_batch_size() -> usize {
    2
}

fn default_preview_pause_ms() -> u64 {
    16
}

fn default_job_queue_capacity() -> usize {
    24
}

fn default_idle_queue_capacity() -> usize {
    12
}

fn default_idle_task_delay_ms() -> u64 {
    12
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            snapshot_version: default_snapshot_version(),
            chunk_threshold_bytes: default_chunk_threshold_bytes(),
            max_snapshot_bytes: default_max_snapshot_bytes(),
            max_snapshot_age_ms: default_max_snapshot_age_ms(),
            compact_max_bytes: default_compact_max_bytes(),
            cache_epoch: default_cache_epoch(),
            default_community: default_community(),
            boot_stale_ms: default_boot_stale_ms(),
            list_stale_ms: default_list_stale_ms(),
            inline_preview_count: default_inline_preview_count(),
            preview_batch_size: default_preview_batch_size(),
            preview_pause_ms: default_preview_pause_ms(),
            job_queue_capacity: default_job_queue_capacity(),
            idle_queue_capacity: default_idle_queue_capacity(),
            idle_task_delay_ms: default_idle_task_delay_ms(),
        }
    }
}

impl AppConfig {
    /// Boot prefetch staleness threshold as Duration.
    pub fn boot_stale(&self) -> Duration {
        Duration::from_millis(self.boot_stale_ms)
    }

    /// On-demand list staleness threshold as Duration.
    pub fn list_stale(&self) -> Duration {
        Duration::from_millis(self.list_stale_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `SNAPCACHE_`
    /// 2. TOML file from `SNAPCACHE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("SNAPCACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("SNAPCACHE_")
                .ignore(&["config_file"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
