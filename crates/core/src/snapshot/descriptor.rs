//! Snapshot key families and their namespaced storage keys.

use std::borrow::Cow;
use std::fmt;

use crate::Error;

/// Logical snapshot families, each parameterised by the id it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SnapshotKind {
    /// First page of a community directory, by community id.
    DirectoryFirstPage(String),
    /// Full profile bundle, by user id.
    Profile(String),
    /// Profile record without its item lists, by user id.
    ProfileHeader(String),
    /// The viewer's "want to meet" list, by user id.
    WantToMeetList(String),
    /// First page of the viewer's conversation list, by user id.
    MessagesThreadsFirstPage(String),
    /// First page of a single conversation, by conversation id.
    ChatThreadFirstPage(String),
}

impl SnapshotKind {
    /// All family names accepted by [`SnapshotKind::parse`].
    pub const FAMILIES: [&'static str; 6] =
        ["directory", "profile", "profileHeader", "wantToMeet", "messages", "chat"];

    pub fn family(&self) -> &'static str {
        match self {
            SnapshotKind::DirectoryFirstPage(_) => "directory",
            SnapshotKind::Profile(_) => "profile",
            SnapshotKind::ProfileHeader(_) => "profileHeader",
            SnapshotKind::WantToMeetList(_) => "wantToMeet",
            SnapshotKind::MessagesThreadsFirstPage(_) => "messages",
            SnapshotKind::ChatThreadFirstPage(_) => "chat",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            SnapshotKind::DirectoryFirstPage(id)
            | SnapshotKind::Profile(id)
            | SnapshotKind::ProfileHeader(id)
            | SnapshotKind::WantToMeetList(id)
            | SnapshotKind::MessagesThreadsFirstPage(id)
            | SnapshotKind::ChatThreadFirstPage(id) => id,
        }
    }

    /// Key within the snapshot namespace, independent of format version.
    ///
    /// `#` separates chunk indexes in storage keys, so it is escaped in ids
    /// (along with `%`) and a primary key can never read as a chunk key.
    pub fn logical_key(&self) -> String {
        let id = escape_id(self.id());
        match self {
            SnapshotKind::DirectoryFirstPage(_) => format!("directory:firstPage:{id}"),
            SnapshotKind::Profile(_) => format!("profile:self:{id}"),
            SnapshotKind::ProfileHeader(_) => format!("profile:self:header:{id}"),
            SnapshotKind::WantToMeetList(_) => format!("wantToMeet:list:{id}"),
            SnapshotKind::MessagesThreadsFirstPage(_) => format!("messages:threads:firstPage:{id}"),
            SnapshotKind::ChatThreadFirstPage(_) => format!("chat:thread:firstPage:{id}"),
        }
    }

    /// Build a kind from a family name and id.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for an unknown family, an empty id, or an
    /// id containing `#`.
    pub fn parse(family: &str, id: &str) -> Result<Self, Error> {
        if id.trim().is_empty() {
            return Err(Error::InvalidInput("snapshot id must not be empty".into()));
        }
        if id.contains('#') {
            return Err(Error::InvalidInput(format!("snapshot id '{id}' must not contain '#'")));
        }
        let id = id.to_string();
        match family {
            "directory" => Ok(SnapshotKind::DirectoryFirstPage(id)),
            "profile" => Ok(SnapshotKind::Profile(id)),
            "profileHeader" => Ok(SnapshotKind::ProfileHeader(id)),
            "wantToMeet" => Ok(SnapshotKind::WantToMeetList(id)),
            "messages" => Ok(SnapshotKind::MessagesThreadsFirstPage(id)),
            "chat" => Ok(SnapshotKind::ChatThreadFirstPage(id)),
            other => Err(Error::InvalidInput(format!(
                "unknown snapshot kind '{other}', expected one of {}",
                Self::FAMILIES.join(", ")
            ))),
        }
    }
}

fn escape_id(id: &str) -> Cow<'_, str> {
    if id.contains(['#', '%']) {
        Cow::Owned(id.replace('%', "%25").replace('#', "%23"))
    } else {
        Cow::Borrowed(id)
    }
}

/// Fully namespaced storage key: `{prefix}:{formatVersion}:{logicalKey}`.
///
/// Because the format version is part of the key, bumping it orphans every
/// older entry instead of misreading it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotDescriptor {
    storage_key: String,
}

impl SnapshotDescriptor {
    pub fn new(prefix: &str, version: u32, kind: &SnapshotKind) -> Self {
        Self { storage_key: format!("{prefix}:{version}:{}", kind.logical_key()) }
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }
}

impl fmt::Display for SnapshotDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_format() {
        let kind = SnapshotKind::Profile("u1".into());
        let descriptor = SnapshotDescriptor::new("snapshot", 2, &kind);
        assert_eq!(descriptor.storage_key(), "snapshot:2:profile:self:u1");
    }

    #[test]
    fn test_version_changes_key() {
        let kind = SnapshotKind::DirectoryFirstPage("edge".into());
        let v2 = SnapshotDescriptor::new("snapshot", 2, &kind);
        let v3 = SnapshotDescriptor::new("snapshot", 3, &kind);
        assert_ne!(v2, v3);
        assert_eq!(v3.to_string(), "snapshot:3:directory:firstPage:edge");
    }

    #[test]
    fn test_parse_round_trips_family() {
        for family in SnapshotKind::FAMILIES {
            let kind = SnapshotKind::parse(family, "x1").unwrap();
            assert_eq!(kind.family(), family);
            assert_eq!(kind.id(), "x1");
        }
    }

    #[test]
    fn test_parse_rejects_unknown_and_empty() {
        assert!(matches!(SnapshotKind::parse("feed", "x"), Err(Error::InvalidInput(_))));
        assert!(matches!(SnapshotKind::parse("profile", "  "), Err(Error::InvalidInput(_))));
        assert!(matches!(SnapshotKind::parse("profile", "u1#0"), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_hash_in_id_never_forms_chunk_key() {
        let kind = SnapshotKind::Profile("u1#0".into());
        let descriptor = SnapshotDescriptor::new("snapshot", 2, &kind);
        assert_eq!(descriptor.storage_key(), "snapshot:2:profile:self:u1%230");
        assert!(crate::snapshot::chunk::parse_chunk_key(descriptor.storage_key()).is_none());

        let escaped = SnapshotDescriptor::new("snapshot", 2, &SnapshotKind::Profile("u1%230".into()));
        assert_ne!(escaped, descriptor);
    }

    #[test]
    fn test_header_key() {
        let kind = SnapshotKind::ProfileHeader("u1".into());
        assert_eq!(kind.logical_key(), "profile:self:header:u1");
    }
}
