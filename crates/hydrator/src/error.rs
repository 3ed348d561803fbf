//! Hydration error types.

/// Errors raised while hydrating a target.
///
/// These surface at the job boundary, where they are logged; no hydration
/// failure is fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum HydrateError {
    /// The remote collaborator failed or returned an unusable response.
    #[error("remote fetch failed: {0}")]
    Remote(String),

    /// Snapshot or profile persistence failed at the storage layer.
    #[error("storage error: {0}")]
    Storage(#[from] snapcache_core::Error),

    /// A value could not be converted to or from its cached JSON form.
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Realtime subscribe or unsubscribe failed.
    #[error("realtime error: {0}")]
    Realtime(String),
}
