//! Core data model: items, targets, sort orders, hits and cursors.

pub mod cursor;
pub mod hit;
pub mod mail;
pub mod sort;
pub mod target;
pub mod text;

pub use cursor::{Cursor, PageDirection};
pub use hit::{FetchMode, Hit, HitKey, ResultInfo, RowPayload};
pub use mail::{folders, FolderId, IndexId, ItemId, ItemRef, ItemType, MailItem, RemoteItemId};
pub use sort::{SortField, SortKey, SortOrder};
pub use target::{QueryTarget, TargetSet};
pub use text::{TextField, TextPredicate, TextTerm};
