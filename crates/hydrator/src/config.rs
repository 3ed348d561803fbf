//! Scheduler tuning derived from the shared application config.

use std::time::Duration;

use snapcache_core::AppConfig;

/// Thresholds and batch sizes used by [`crate::Hydrator`].
#[derive(Debug, Clone)]
pub struct HydratorConfig {
    /// Community whose directory first page is hydrated at boot.
    pub default_community: String,
    /// Staleness threshold for boot prefetch targets.
    pub boot_stale: Duration,
    /// Staleness threshold for on-demand lists.
    pub list_stale: Duration,
    /// Pending previews hydrated inline before the rest go to the idle queue.
    pub inline_preview_count: usize,
    /// Inline previews handled between pauses.
    pub preview_batch_size: usize,
    pub preview_pause: Duration,
    pub job_queue_capacity: usize,
    pub idle_queue_capacity: usize,
    pub idle_task_delay: Duration,
}

impl Default for HydratorConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for HydratorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            default_community: config.default_community.clone(),
            boot_stale: config.boot_stale(),
            list_stale: config.list_stale(),
            inline_preview_count: config.inline_preview_count,
            preview_batch_size: config.preview_batch_size.max(1),
            preview_pause: Duration::from_millis(config.preview_pause_ms),
            job_queue_capacity: config.job_queue_capacity,
            idle_queue_capacity: config.idle_queue_capacity,
            idle_task_delay: Duration::from_millis(config.idle_task_delay_ms),
        }
    }
}
