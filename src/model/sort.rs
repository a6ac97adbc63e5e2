//! Sort orders and the keys hits are compared by.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::mail::{ItemId, MailItem};

/// Field a result set is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortField {
    None,
    Date,
    Id,
    Size,
    Subject,
    Sender,
}

/// Requested result ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    /// Backend order, no guarantees.
    None,
    DateAsc,
    #[default]
    DateDesc,
    IdAsc,
    IdDesc,
    SizeAsc,
    SizeDesc,
    SubjectAsc,
    SubjectDesc,
    SenderAsc,
    SenderDesc,
}

impl SortOrder {
    pub fn field(self) -> SortField {
        match self {
            SortOrder::None => SortField::None,
            SortOrder::DateAsc | SortOrder::DateDesc => SortField::Date,
            SortOrder::IdAsc | SortOrder::IdDesc => SortField::Id,
            SortOrder::SizeAsc | SortOrder::SizeDesc => SortField::Size,
            SortOrder::SubjectAsc | SortOrder::SubjectDesc => SortField::Subject,
            SortOrder::SenderAsc | SortOrder::SenderDesc => SortField::Sender,
        }
    }

    pub fn is_ordered(self) -> bool {
        self != SortOrder::None
    }

    pub fn is_descending(self) -> bool {
        matches!(
            self,
            SortOrder::DateDesc
                | SortOrder::IdDesc
                | SortOrder::SizeDesc
                | SortOrder::SubjectDesc
                | SortOrder::SenderDesc
        )
    }

    /// Compare two keys in result order: `Less` means `a` is delivered
    /// before `b`. Unordered sorts treat every pair as equal.
    pub fn compare(self, a: &SortKey, b: &SortKey) -> Ordering {
        if !self.is_ordered() {
            return Ordering::Equal;
        }
        let natural = a.cmp(b);
        if self.is_descending() {
            natural.reverse()
        } else {
            natural
        }
    }

    /// Compare two (key, item id) pairs in result order, breaking key ties
    /// by item id in the same direction.
    pub fn compare_with_id(self, a: (&SortKey, ItemId), b: (&SortKey, ItemId)) -> Ordering {
        self.compare(a.0, b.0).then_with(|| {
            let ids = a.1.cmp(&b.1);
            if self.is_descending() {
                ids.reverse()
            } else {
                ids
            }
        })
    }

    /// Extract this order's key from an item.
    pub fn key_for(self, item: &MailItem) -> SortKey {
        match self.field() {
            SortField::None => SortKey::None,
            SortField::Date => SortKey::Long(item.date.timestamp_millis()),
            SortField::Id => SortKey::Int(item.id),
            SortField::Size => SortKey::Long(item.size as i64),
            SortField::Subject => SortKey::Str(item.subject.to_lowercase()),
            SortField::Sender => SortKey::Str(item.sender.to_lowercase()),
        }
    }

    /// Parse an opaque cursor sort value into this order's key kind.
    pub fn parse_key(self, value: &str) -> Option<SortKey> {
        match self.field() {
            SortField::None => None,
            SortField::Date | SortField::Size => value.trim().parse().ok().map(SortKey::Long),
            SortField::Id => value.trim().parse().ok().map(SortKey::Int),
            SortField::Subject | SortField::Sender => Some(SortKey::Str(value.to_lowercase())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::None => "none",
            SortOrder::DateAsc => "date-asc",
            SortOrder::DateDesc => "date-desc",
            SortOrder::IdAsc => "id-asc",
            SortOrder::IdDesc => "id-desc",
            SortOrder::SizeAsc => "size-asc",
            SortOrder::SizeDesc => "size-desc",
            SortOrder::SubjectAsc => "subject-asc",
            SortOrder::SubjectDesc => "subject-desc",
            SortOrder::SenderAsc => "sender-asc",
            SortOrder::SenderDesc => "sender-desc",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "none" => SortOrder::None,
            "date-asc" | "dateasc" => SortOrder::DateAsc,
            "date-desc" | "datedesc" | "date" => SortOrder::DateDesc,
            "id-asc" | "idasc" => SortOrder::IdAsc,
            "id-desc" | "iddesc" | "id" => SortOrder::IdDesc,
            "size-asc" | "sizeasc" => SortOrder::SizeAsc,
            "size-desc" | "sizedesc" | "size" => SortOrder::SizeDesc,
            "subject-asc" | "subjasc" | "subject" => SortOrder::SubjectAsc,
            "subject-desc" | "subjdesc" => SortOrder::SubjectDesc,
            "sender-asc" | "nameasc" | "sender" => SortOrder::SenderAsc,
            "sender-desc" | "namedesc" => SortOrder::SenderDesc,
            other => return Err(format!("unknown sort order: {other}")),
        })
    }
}

/// Value a hit is ordered by. The variant always matches the active sort
/// order's field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SortKey {
    None,
    Int(i32),
    Long(i64),
    Str(String),
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortKey::None => Ok(()),
            SortKey::Int(v) => write!(f, "{v}"),
            SortKey::Long(v) => write!(f, "{v}"),
            SortKey::Str(v) => f.write_str(v),
        }
    }
}
