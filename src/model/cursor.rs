//! Pagination cursors.

use serde::{Deserialize, Serialize};

use super::mail::ItemId;

/// Position in a sorted result set, taken from a hit the caller already
/// saw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Item id of the hit the cursor was taken at.
    pub item_id: ItemId,
    /// That hit's sort value, rendered as text.
    pub sort_value: String,
    /// Optional far bound of the page.
    #[serde(default)]
    pub end_sort_value: Option<String>,
    /// Whether the caller wants the cursor's numeric offset computed.
    #[serde(default)]
    pub include_offset: bool,
}

impl Cursor {
    pub fn new(item_id: ItemId, sort_value: impl Into<String>) -> Self {
        Self {
            item_id,
            sort_value: sort_value.into(),
            end_sort_value: None,
            include_offset: false,
        }
    }

    pub fn with_end(mut self, end: impl Into<String>) -> Self {
        self.end_sort_value = Some(end.into());
        self
    }

    pub fn with_offset(mut self) -> Self {
        self.include_offset = true;
        self
    }
}

/// Which side of the cursor a page is taken from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageDirection {
    #[default]
    Forward,
    Backward,
}
