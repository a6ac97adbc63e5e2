//! A conjunction of simple predicates over one item.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{FolderId, IndexId, ItemId, ItemType, RemoteItemId};

use super::range::{CursorRange, Range, RangeKind};

/// A folder in another account's mailbox.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RemoteFolder {
    pub folder: RemoteItemId,
    /// Path below the folder, when the query named one.
    #[serde(default)]
    pub subpath: Option<String>,
    #[serde(default)]
    pub include_subfolders: bool,
}

impl fmt::Display for RemoteFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.folder)?;
        if let Some(ref sub) = self.subpath {
            write!(f, "/{sub}")?;
        }
        if self.include_subfolders {
            f.write_str("/*")?;
        }
        Ok(())
    }
}

/// Predicates that must all hold for an item to match.
///
/// Every field is optional; an all-default leaf matches everything.
/// Required "any-of" sets (folders, items, index ids, types) never keep an
/// element that is also forbidden: such an element is dropped, and a
/// required set emptied that way marks the leaf as matching nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Leaf {
    /// All of these tags.
    pub tags: BTreeSet<String>,
    pub exclude_tags: BTreeSet<String>,

    /// In one of these folders.
    pub folders: BTreeSet<FolderId>,
    pub exclude_folders: BTreeSet<FolderId>,
    pub remote_folders: BTreeSet<RemoteFolder>,
    pub exclude_remote_folders: BTreeSet<RemoteFolder>,

    pub conversation_id: Option<ItemId>,
    pub prohibited_conversation_ids: BTreeSet<ItemId>,
    pub remote_conversation_id: Option<RemoteItemId>,
    pub prohibited_remote_conversation_ids: BTreeSet<RemoteItemId>,

    /// One of these items.
    pub item_ids: BTreeSet<ItemId>,
    pub prohibited_item_ids: BTreeSet<ItemId>,
    pub remote_item_ids: BTreeSet<RemoteItemId>,
    pub prohibited_remote_item_ids: BTreeSet<RemoteItemId>,

    /// Filed under one of these full-text documents.
    pub index_ids: BTreeSet<IndexId>,
    pub has_index_id: Option<bool>,

    /// One of these item types.
    pub types: BTreeSet<ItemType>,
    pub exclude_types: BTreeSet<ItemType>,

    pub ranges: BTreeMap<RangeKind, Vec<Range>>,
    pub cursor_range: Option<CursorRange>,

    /// Set when the predicates contradict each other.
    pub no_results: bool,
    /// Set once trash/spam defaulting has been decided for this leaf.
    pub spam_trash_setting: bool,
}

impl Leaf {
    pub fn new() -> Self {
        Self::default()
    }

    /// A leaf that matches nothing.
    pub fn no_results() -> Self {
        Self {
            no_results: true,
            ..Self::default()
        }
    }

    /// Whether no predicate is set. The trash/spam bookkeeping flag does
    /// not count as a predicate.
    pub fn is_empty(&self) -> bool {
        !self.no_results
            && self.tags.is_empty()
            && self.exclude_tags.is_empty()
            && self.folders.is_empty()
            && self.exclude_folders.is_empty()
            && self.remote_folders.is_empty()
            && self.exclude_remote_folders.is_empty()
            && self.conversation_id.is_none()
            && self.prohibited_conversation_ids.is_empty()
            && self.remote_conversation_id.is_none()
            && self.prohibited_remote_conversation_ids.is_empty()
            && self.item_ids.is_empty()
            && self.prohibited_item_ids.is_empty()
            && self.remote_item_ids.is_empty()
            && self.prohibited_remote_item_ids.is_empty()
            && self.index_ids.is_empty()
            && self.has_index_id.is_none()
            && self.types.is_empty()
            && self.exclude_types.is_empty()
            && self.ranges.is_empty()
            && self.cursor_range.is_none()
    }

    /// Whether the only predicate set is the required folder set.
    pub fn is_folder_only(&self) -> bool {
        if self.folders.is_empty() {
            return false;
        }
        let mut probe = self.clone();
        probe.folders.clear();
        probe.spam_trash_setting = false;
        probe.is_empty()
    }

    pub fn has_spam_trash_setting(&self) -> bool {
        self.spam_trash_setting || !self.folders.is_empty() || !self.remote_folders.is_empty()
    }

    /// Whether the leaf pins the result to a conversation or listed items.
    pub fn pins_items(&self) -> bool {
        self.conversation_id.is_some() || !self.item_ids.is_empty()
    }

    // ── Conjunction ─────────────────────────────────────────────

    /// AND `other` into this leaf.
    pub fn and(&mut self, other: Leaf) {
        self.no_results |= other.no_results;
        self.spam_trash_setting |= other.spam_trash_setting;

        self.tags.extend(other.tags);
        self.exclude_tags.extend(other.exclude_tags);

        intersect_required(&mut self.folders, other.folders, &mut self.no_results);
        self.exclude_folders.extend(other.exclude_folders);
        intersect_required(
            &mut self.remote_folders,
            other.remote_folders,
            &mut self.no_results,
        );
        self.exclude_remote_folders
            .extend(other.exclude_remote_folders);

        unify(
            &mut self.conversation_id,
            other.conversation_id,
            &mut self.no_results,
        );
        self.prohibited_conversation_ids
            .extend(other.prohibited_conversation_ids);
        unify(
            &mut self.remote_conversation_id,
            other.remote_conversation_id,
            &mut self.no_results,
        );
        self.prohibited_remote_conversation_ids
            .extend(other.prohibited_remote_conversation_ids);

        intersect_required(&mut self.item_ids, other.item_ids, &mut self.no_results);
        self.prohibited_item_ids.extend(other.prohibited_item_ids);
        intersect_required(
            &mut self.remote_item_ids,
            other.remote_item_ids,
            &mut self.no_results,
        );
        self.prohibited_remote_item_ids
            .extend(other.prohibited_remote_item_ids);

        intersect_required(&mut self.index_ids, other.index_ids, &mut self.no_results);
        unify(&mut self.has_index_id, other.has_index_id, &mut self.no_results);

        intersect_required(&mut self.types, other.types, &mut self.no_results);
        self.exclude_types.extend(other.exclude_types);

        for (kind, ranges) in other.ranges {
            let slot = self.ranges.entry(kind).or_default();
            for r in ranges {
                if !slot.contains(&r) {
                    slot.push(r);
                }
            }
        }
        if let Some(theirs) = other.cursor_range {
            match self.cursor_range {
                None => self.cursor_range = Some(theirs),
                Some(ref mut mine) => {
                    let overlap = if mine.sort == theirs.sort {
                        mine.range.intersect(&theirs.range)
                    } else {
                        None
                    };
                    match overlap {
                        Some(range) => mine.range = range,
                        None => debug!(kept = %mine, dropped = %theirs, "Cursor ranges do not combine"),
                    }
                }
            }
        }

        self.normalize();
    }

    /// Enforce the required/forbidden invariants.
    fn normalize(&mut self) {
        if !self.tags.is_disjoint(&self.exclude_tags) {
            self.no_results = true;
        }
        subtract_forbidden(&mut self.folders, &self.exclude_folders, &mut self.no_results);
        subtract_forbidden(
            &mut self.remote_folders,
            &self.exclude_remote_folders,
            &mut self.no_results,
        );
        subtract_forbidden(
            &mut self.item_ids,
            &self.prohibited_item_ids,
            &mut self.no_results,
        );
        subtract_forbidden(
            &mut self.remote_item_ids,
            &self.prohibited_remote_item_ids,
            &mut self.no_results,
        );
        subtract_forbidden(&mut self.types, &self.exclude_types, &mut self.no_results);

        if let Some(conv) = self.conversation_id {
            if self.prohibited_conversation_ids.contains(&conv) {
                self.no_results = true;
            }
        }
        if let Some(ref conv) = self.remote_conversation_id {
            if self.prohibited_remote_conversation_ids.contains(conv) {
                self.no_results = true;
            }
        }
        if self.has_index_id == Some(false) && !self.index_ids.is_empty() {
            self.no_results = true;
        }
    }

    // ── Single-predicate builders ───────────────────────────────

    pub fn add_tag(&mut self, tag: impl Into<String>, truth: bool) {
        let mut l = Leaf::new();
        if truth {
            l.tags.insert(tag.into());
        } else {
            l.exclude_tags.insert(tag.into());
        }
        self.and(l);
    }

    pub fn add_folder(&mut self, folder: FolderId, truth: bool) {
        let mut l = Leaf::new();
        if truth {
            l.folders.insert(folder);
        } else {
            l.exclude_folders.insert(folder);
        }
        self.and(l);
    }

    pub fn add_remote_folder(&mut self, folder: RemoteFolder, truth: bool) {
        let mut l = Leaf::new();
        if truth {
            l.remote_folders.insert(folder);
        } else {
            l.exclude_remote_folders.insert(folder);
        }
        self.and(l);
    }

    pub fn add_conversation(&mut self, conv: ItemId, truth: bool) {
        let mut l = Leaf::new();
        if truth {
            l.conversation_id = Some(conv);
        } else {
            l.prohibited_conversation_ids.insert(conv);
        }
        self.and(l);
    }

    pub fn add_remote_conversation(&mut self, conv: RemoteItemId, truth: bool) {
        let mut l = Leaf::new();
        if truth {
            l.remote_conversation_id = Some(conv);
        } else {
            l.prohibited_remote_conversation_ids.insert(conv);
        }
        self.and(l);
    }

    pub fn add_item_id(&mut self, id: ItemId, truth: bool) {
        let mut l = Leaf::new();
        if truth {
            l.item_ids.insert(id);
        } else {
            l.prohibited_item_ids.insert(id);
        }
        self.and(l);
    }

    pub fn add_remote_item_id(&mut self, id: RemoteItemId, truth: bool) {
        let mut l = Leaf::new();
        if truth {
            l.remote_item_ids.insert(id);
        } else {
            l.prohibited_remote_item_ids.insert(id);
        }
        self.and(l);
    }

    pub fn add_type(&mut self, item_type: ItemType, truth: bool) {
        let mut l = Leaf::new();
        if truth {
            l.types.insert(item_type);
        } else {
            l.exclude_types.insert(item_type);
        }
        self.and(l);
    }

    /// Add a range; a range with neither bound set matches everything and
    /// is ignored (or nothing, when negated).
    pub fn add_range(&mut self, kind: RangeKind, range: Range) {
        if range.is_unbounded() {
            if range.negated {
                self.no_results = true;
            }
            return;
        }
        let mut l = Leaf::new();
        l.ranges.insert(kind, vec![range]);
        self.and(l);
    }

    /// Restrict the leaf to the given types.
    pub fn set_types(&mut self, types: &BTreeSet<ItemType>) {
        if types.is_empty() {
            return;
        }
        let l = Leaf {
            types: types.clone(),
            ..Leaf::default()
        };
        self.and(l);
    }

    /// Exclude the given folders unless a trash/spam decision was already
    /// made for this leaf.
    pub fn ensure_spam_trash_setting(&mut self, excluded: &[FolderId]) {
        if self.has_spam_trash_setting() {
            return;
        }
        for &folder in excluded {
            self.exclude_folders.insert(folder);
        }
        self.spam_trash_setting = true;
        self.normalize();
    }
}

/// Intersect two any-of sets where an empty set means "unconstrained".
fn intersect_required<T: Ord>(mine: &mut BTreeSet<T>, theirs: BTreeSet<T>, no_results: &mut bool) {
    if theirs.is_empty() {
        return;
    }
    if mine.is_empty() {
        *mine = theirs;
        return;
    }
    mine.retain(|v| theirs.contains(v));
    if mine.is_empty() {
        *no_results = true;
    }
}

fn subtract_forbidden<T: Ord>(required: &mut BTreeSet<T>, forbidden: &BTreeSet<T>, no_results: &mut bool) {
    if required.is_empty() || forbidden.is_empty() {
        return;
    }
    required.retain(|v| !forbidden.contains(v));
    if required.is_empty() {
        *no_results = true;
    }
}

fn unify<T: PartialEq>(mine: &mut Option<T>, theirs: Option<T>, no_results: &mut bool) {
    match (mine.as_ref(), theirs) {
        (_, None) => {}
        (None, Some(v)) => *mine = Some(v),
        (Some(a), Some(b)) => {
            if *a != b {
                *no_results = true;
            }
        }
    }
}

// ── Rendering ───────────────────────────────────────────────────

fn push_set<T: fmt::Display>(parts: &mut Vec<String>, label: &str, set: &BTreeSet<T>, negated: bool) {
    if set.is_empty() {
        return;
    }
    let joined = set.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(",");
    let sign = if negated { "-" } else { "" };
    parts.push(format!("{sign}{label}:{joined}"));
}

impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.no_results {
            return f.write_str("(NO_RESULTS)");
        }
        let mut parts = Vec::new();
        push_set(&mut parts, "IN", &self.folders, false);
        push_set(&mut parts, "IN", &self.exclude_folders, true);
        push_set(&mut parts, "REMOTE_IN", &self.remote_folders, false);
        push_set(&mut parts, "REMOTE_IN", &self.exclude_remote_folders, true);
        push_set(&mut parts, "TAG", &self.tags, false);
        push_set(&mut parts, "TAG", &self.exclude_tags, true);
        if let Some(conv) = self.conversation_id {
            parts.push(format!("CONV:{conv}"));
        }
        push_set(&mut parts, "CONV", &self.prohibited_conversation_ids, true);
        if let Some(ref conv) = self.remote_conversation_id {
            parts.push(format!("CONV:{conv}"));
        }
        push_set(&mut parts, "CONV", &self.prohibited_remote_conversation_ids, true);
        push_set(&mut parts, "ITEM", &self.item_ids, false);
        push_set(&mut parts, "ITEM", &self.prohibited_item_ids, true);
        push_set(&mut parts, "ITEM", &self.remote_item_ids, false);
        push_set(&mut parts, "ITEM", &self.prohibited_remote_item_ids, true);
        push_set(&mut parts, "INDEXID", &self.index_ids, false);
        if let Some(has) = self.has_index_id {
            parts.push(format!("HAS_INDEXID:{has}"));
        }
        push_set(&mut parts, "TYPE", &self.types, false);
        push_set(&mut parts, "TYPE", &self.exclude_types, true);
        for (kind, ranges) in &self.ranges {
            for r in ranges {
                parts.push(format!("{kind}:{r}"));
            }
        }
        if let Some(ref c) = self.cursor_range {
            parts.push(c.to_string());
        }
        write!(f, "({})", parts.join(" "))
    }
}
