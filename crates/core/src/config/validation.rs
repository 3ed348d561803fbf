//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `snapshot_version` is 0
    /// - `chunk_threshold_bytes` is 0 or larger than `max_snapshot_bytes`
    /// - any age, threshold or capacity is 0
    /// - `cache_epoch` or `default_community` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.snapshot_version == 0 {
            return Err(invalid("snapshot_version", "must be at least 1"));
        }

        if self.chunk_threshold_bytes == 0 {
            return Err(invalid("chunk_threshold_bytes", "must be greater than 0"));
        }
        if self.chunk_threshold_bytes > self.max_snapshot_bytes {
            return Err(invalid("chunk_threshold_bytes", "must not exceed max_snapshot_bytes"));
        }
        if self.compact_max_bytes == 0 {
            return Err(invalid("compact_max_bytes", "must be greater than 0"));
        }

        if self.max_snapshot_age_ms <= 0 {
            return Err(invalid("max_snapshot_age_ms", "must be greater than 0"));
        }
        if self.boot_stale_ms == 0 {
            return Err(invalid("boot_stale_ms", "must be greater than 0"));
        }
        if self.list_stale_ms == 0 {
            return Err(invalid("list_stale_ms", "must be greater than 0"));
        }

        if self.preview_batch_size == 0 {
            return Err(invalid("preview_batch_size", "must be greater than 0"));
        }
        if self.job_queue_capacity == 0 {
            return Err(invalid("job_queue_capacity", "must be greater than 0"));
        }
        if self.idle_queue_capacity == 0 {
            return Err(invalid("idle_queue_capacity", "must be greater than 0"));
        }

        if self.cache_epoch.is_empty() {
            return Err(invalid("cache_epoch", "must not be empty"));
        }
        if self.default_community.is_empty() {
            return Err(invalid("default_community", "must not be empty"));
        }

        if self.inline_preview_count == 0 {
            tracing::warn!("inline_preview_count is 0; every conversation preview will be deferred to the idle queue");
        }

        Ok(())
    }
}
