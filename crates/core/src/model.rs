//! Domain records persisted by the snapshot cache.
//!
//! These mirror what the remote collaborator returns. Field names serialize in
//! camelCase so snapshots stay readable next to the backend's own JSON.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A user profile as returned by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub avatar_url: String,
    /// RFC 3339 timestamp of the last backend update.
    #[serde(default)]
    pub updated: String,
}

/// An item on a profile grid or backlog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    /// Id of the referenced catalogue entry.
    pub ref_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub list: bool,
    #[serde(default)]
    pub backlog: bool,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub prompt_context: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub updated: String,
}

/// Everything needed to render a profile screen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileData {
    pub profile: Profile,
    #[serde(default)]
    pub grid_items: Vec<Item>,
    #[serde(default)]
    pub backlog_items: Vec<Item>,
}

/// One page of the shared community directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryPage {
    pub page: u32,
    #[serde(default)]
    pub next_page: Option<u32>,
    #[serde(default)]
    pub total_items: u32,
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

/// A profile the viewer saved as "want to meet".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SavedProfile {
    pub id: String,
    pub user: Profile,
    #[serde(default)]
    pub created: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub is_direct: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub created: String,
}

/// A conversation row in the inbox. `latest_message` is filled in lazily.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPreviewEntry {
    pub conversation: Conversation,
    #[serde(default)]
    pub latest_message: Option<Message>,
    #[serde(default)]
    pub unread_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationsPage {
    #[serde(default)]
    pub entries: Vec<ConversationPreviewEntry>,
    #[serde(default)]
    pub next_page: Option<u32>,
}

/// One page of a single conversation's messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessagesPage {
    pub conversation_id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}
