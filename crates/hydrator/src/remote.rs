//! Remote backend seam.

use async_trait::async_trait;
use snapcache_core::model::{
    Conversation, ConversationPreviewEntry, ConversationsPage, DirectoryPage, ProfileData, SavedProfile,
};

use crate::HydrateError;

/// Fetches authoritative data from the backend.
///
/// Timeouts and retries belong to the implementation; the scheduler treats
/// every failure as terminal for the current job.
#[async_trait]
pub trait Remote: Send + Sync {
    /// One page of a community directory, 1-based.
    async fn directory_page(&self, community: &str, page: u32) -> Result<DirectoryPage, HydrateError>;

    async fn profile_bundle(&self, user_id: &str, user_name: &str) -> Result<ProfileData, HydrateError>;

    async fn want_to_meet(&self, user_id: &str) -> Result<Vec<SavedProfile>, HydrateError>;

    /// One page of the user's conversation list, without previews.
    async fn conversations_page(&self, user_id: &str, page: u32) -> Result<ConversationsPage, HydrateError>;

    /// Build the preview row (latest message, unread count) for one conversation.
    async fn conversation_preview(
        &self, conversation: &Conversation, user_id: &str,
    ) -> Result<ConversationPreviewEntry, HydrateError>;
}
