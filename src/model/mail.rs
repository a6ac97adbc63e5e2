//! Mailbox item identities and the record a hit points at.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of an item inside one mailbox.
pub type ItemId = i32;

/// Identifier of a folder inside one mailbox.
pub type FolderId = i32;

/// Identifier a full-text document is filed under. Several items may share
/// one (revisions), and one item may have several documents (MIME parts).
pub type IndexId = i32;

/// Well-known folder ids.
pub mod folders {
    use super::FolderId;

    pub const INBOX: FolderId = 2;
    pub const TRASH: FolderId = 3;
    pub const SPAM: FolderId = 4;
    pub const SENT: FolderId = 5;
}

/// An item living in another account's mailbox.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RemoteItemId {
    /// Owning account.
    pub account: String,
    /// Item id inside that account's mailbox.
    pub id: ItemId,
}

impl RemoteItemId {
    pub fn new(account: impl Into<String>, id: ItemId) -> Self {
        Self {
            account: account.into(),
            id,
        }
    }
}

impl fmt::Display for RemoteItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.account, self.id)
    }
}

/// A local or remote item reference, as written in queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemRef {
    Local(ItemId),
    Remote(RemoteItemId),
}

/// Kind of mailbox item.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Conversation,
    Message,
    Chat,
    Contact,
    Appointment,
    Task,
    Document,
    Note,
}

impl ItemType {
    /// Whether one item of this type legitimately yields several hits, one
    /// per matching sub-document.
    pub fn repeats_per_item(self) -> bool {
        matches!(self, ItemType::Message | ItemType::Chat)
    }

    /// The stored types a requested result type is answered from.
    /// Conversations are assembled from their messages and chats.
    pub fn storage_types(self) -> &'static [ItemType] {
        match self {
            ItemType::Conversation | ItemType::Message => &[ItemType::Message, ItemType::Chat],
            ItemType::Chat => &[ItemType::Chat],
            ItemType::Contact => &[ItemType::Contact],
            ItemType::Appointment => &[ItemType::Appointment],
            ItemType::Task => &[ItemType::Task],
            ItemType::Document => &[ItemType::Document],
            ItemType::Note => &[ItemType::Note],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemType::Conversation => "conversation",
            ItemType::Message => "message",
            ItemType::Chat => "chat",
            ItemType::Contact => "contact",
            ItemType::Appointment => "appointment",
            ItemType::Task => "task",
            ItemType::Document => "document",
            ItemType::Note => "note",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "conversation" | "conv" => ItemType::Conversation,
            "message" | "msg" => ItemType::Message,
            "chat" => ItemType::Chat,
            "contact" => ItemType::Contact,
            "appointment" => ItemType::Appointment,
            "task" => ItemType::Task,
            "document" | "doc" => ItemType::Document,
            "note" => ItemType::Note,
            other => return Err(format!("unknown item type: {other}")),
        })
    }
}

/// Metadata for one stored item, as kept by the relational store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailItem {
    pub id: ItemId,

    /// Full-text document id, absent for items that were never indexed.
    #[serde(default)]
    pub index_id: Option<IndexId>,

    #[serde(rename = "type")]
    pub item_type: ItemType,

    pub folder_id: FolderId,

    /// Owning conversation (0 if none).
    #[serde(default)]
    pub conversation_id: ItemId,

    /// Parent item (the message of an attachment-derived item, the
    /// conversation of a message).
    #[serde(default)]
    pub parent_id: Option<ItemId>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Date the item was received or created.
    pub date: DateTime<Utc>,

    /// Date of the last metadata change.
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,

    /// Change sequence number of the last modification.
    #[serde(default)]
    pub mod_seq: i64,

    /// Size in bytes.
    #[serde(default)]
    pub size: u64,

    #[serde(default)]
    pub subject: String,

    #[serde(default)]
    pub sender: String,

    /// Calendar start/end for appointments and tasks, epoch millis.
    #[serde(default)]
    pub calendar_start: Option<i64>,
    #[serde(default)]
    pub calendar_end: Option<i64>,
}

impl MailItem {
    /// A minimal record; remaining fields take their defaults.
    pub fn new(id: ItemId, item_type: ItemType, folder_id: FolderId, date: DateTime<Utc>) -> Self {
        Self {
            id,
            index_id: Some(id),
            item_type,
            folder_id,
            conversation_id: 0,
            parent_id: None,
            tags: Vec::new(),
            date,
            modified: None,
            mod_seq: 0,
            size: 0,
            subject: String::new(),
            sender: String::new(),
            calendar_start: None,
            calendar_end: None,
        }
    }
}
