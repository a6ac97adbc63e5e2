//! Search hits and the diagnostics that travel with them.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::mail::{IndexId, ItemId, ItemType, MailItem};
use super::sort::SortKey;

/// How much of each matching row the relational store returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchMode {
    /// The full item record.
    #[default]
    Item,
    /// Identifiers only.
    Id,
    /// The item's change sequence number.
    ModSeq,
    /// The item's parent id.
    Parent,
}

/// What a hit carries besides its identity, selected by [`FetchMode`].
#[derive(Debug, Clone, PartialEq)]
pub enum RowPayload {
    Item(Arc<MailItem>),
    Id,
    ModSeq(i64),
    Parent(Option<ItemId>),
}

/// Identity used to suppress duplicate hits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HitKey {
    pub item_id: ItemId,
    /// Sub-document part, for item types that yield one hit per part.
    pub part: Option<String>,
}

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub item_id: ItemId,
    /// Owning conversation (0 if none).
    pub conversation_id: ItemId,
    pub item_type: ItemType,
    pub sort_key: SortKey,
    pub index_id: Option<IndexId>,
    /// Matching sub-document (MIME part), when the full-text index
    /// reported one.
    pub part: Option<String>,
    pub payload: RowPayload,
}

impl Hit {
    pub fn key(&self) -> HitKey {
        HitKey {
            item_id: self.item_id,
            part: self.part.clone(),
        }
    }

    /// Whether `other` refers to the same item and, when both hits name a
    /// sub-document, the same sub-document.
    pub fn same_document(&self, other: &Hit) -> bool {
        if self.item_id != other.item_id {
            return false;
        }
        match (&self.part, &other.part) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    /// The full item record, when fetched.
    pub fn item(&self) -> Option<&MailItem> {
        match &self.payload {
            RowPayload::Item(item) => Some(item),
            _ => None,
        }
    }
}

/// Diagnostic information gathered while executing a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResultInfo {
    /// A term that looks misspelled, with candidate corrections.
    Suggestion {
        term: String,
        suggestions: Vec<String>,
    },
    /// A wildcard term and how many terms it expanded to.
    WildcardExpansion {
        pattern: String,
        expanded: usize,
        truncated: bool,
    },
    /// Free-form note from a backend.
    Note { message: String },
}

impl fmt::Display for ResultInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultInfo::Suggestion { term, suggestions } => {
                write!(f, "did you mean {} for '{term}'", suggestions.join(" / "))
            }
            ResultInfo::WildcardExpansion {
                pattern,
                expanded,
                truncated,
            } => {
                write!(f, "'{pattern}' expanded to {expanded} terms")?;
                if *truncated {
                    f.write_str(" (truncated)")?;
                }
                Ok(())
            }
            ResultInfo::Note { message } => f.write_str(message),
        }
    }
}

/// Append `incoming` to `infos`, skipping entries already present.
pub fn merge_result_info(infos: &mut Vec<ResultInfo>, incoming: impl IntoIterator<Item = ResultInfo>) {
    for info in incoming {
        if !infos.contains(&info) {
            infos.push(info);
        }
    }
}
