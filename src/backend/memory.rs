//! In-memory mailbox: a relational store and a full-text index over a
//! vector of items.
//!
//! Complexity: every query is a linear scan, O(n) in the number of items
//! (or documents). Good enough for fixtures and small mailboxes.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constraint::{ConstraintTree, Leaf, RangeKind, RangeValue};
use crate::error::{Result, SearchError};
use crate::model::{
    FetchMode, IndexId, ItemId, MailItem, RemoteItemId, ResultInfo, RowPayload, SortField,
    SortOrder, TextField, TextPredicate, TextTerm,
};

use super::{
    DbResult, Page, RelationalBackend, SelectivityOracle, TextDoc, TextHits, TextIndex,
    TextSearcher,
};

/// One indexed full-text document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextDocument {
    pub index_id: IndexId,
    pub item_id: ItemId,
    #[serde(default)]
    pub part: Option<String>,
    /// Field text, keyed by field. `All` is not a valid key.
    #[serde(default)]
    pub fields: BTreeMap<TextField, String>,
}

impl TextDocument {
    /// A document whose body text is `content`.
    pub fn new(index_id: IndexId, item_id: ItemId, content: impl Into<String>) -> Self {
        Self {
            index_id,
            item_id,
            part: None,
            fields: BTreeMap::from([(TextField::Content, content.into())]),
        }
    }

    pub fn with_part(mut self, part: impl Into<String>) -> Self {
        self.part = Some(part.into());
        self
    }

    pub fn with_field(mut self, field: TextField, text: impl Into<String>) -> Self {
        self.fields.insert(field, text.into());
        self
    }
}

/// On-disk layout of a mailbox file.
#[derive(Debug, Serialize, Deserialize)]
pub struct MailboxFile {
    #[serde(default = "default_account")]
    pub account: String,
    pub items: Vec<MailItem>,
    #[serde(default)]
    pub documents: Vec<TextDocument>,
}

fn default_account() -> String {
    "local".to_string()
}

#[derive(Debug)]
struct MailboxData {
    account: String,
    items: Vec<Arc<MailItem>>,
    by_id: HashMap<ItemId, usize>,
    conversation_sizes: HashMap<ItemId, i64>,
    documents: Vec<TextDocument>,
}

/// A mailbox held entirely in memory. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MemoryMailbox {
    data: Arc<MailboxData>,
}

impl MemoryMailbox {
    pub fn new(account: impl Into<String>, items: Vec<MailItem>, documents: Vec<TextDocument>) -> Self {
        let mut by_id = HashMap::with_capacity(items.len());
        let mut conversation_sizes: HashMap<ItemId, i64> = HashMap::new();
        for (i, item) in items.iter().enumerate() {
            by_id.insert(item.id, i);
            if item.conversation_id != 0 {
                *conversation_sizes.entry(item.conversation_id).or_default() += 1;
            }
        }
        Self {
            data: Arc::new(MailboxData {
                account: account.into(),
                items: items.into_iter().map(Arc::new).collect(),
                by_id,
                conversation_sizes,
                documents,
            }),
        }
    }

    /// Load a mailbox from a JSON [`MailboxFile`].
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| SearchError::io(path, e))?;
        let file: MailboxFile =
            serde_json::from_str(&contents).map_err(|e| SearchError::InvalidFixture {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        debug!(
            path = %path.display(),
            items = file.items.len(),
            documents = file.documents.len(),
            "Loaded mailbox"
        );
        Ok(Self::new(file.account, file.items, file.documents))
    }

    pub fn account(&self) -> &str {
        &self.data.account
    }

    pub fn items(&self) -> impl Iterator<Item = &MailItem> {
        self.data.items.iter().map(|i| i.as_ref())
    }

    pub fn len(&self) -> usize {
        self.data.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.items.is_empty()
    }

    pub fn get(&self, id: ItemId) -> Option<&MailItem> {
        self.data.by_id.get(&id).map(|&i| self.data.items[i].as_ref())
    }

    /// Whether `item` satisfies `constraints`.
    pub fn matches(&self, item: &MailItem, constraints: &ConstraintTree) -> bool {
        self.data.tree_matches(item, constraints)
    }
}

impl MailboxData {
    fn tree_matches(&self, item: &MailItem, tree: &ConstraintTree) -> bool {
        match tree {
            ConstraintTree::Leaf(leaf) => self.leaf_matches(item, leaf),
            ConstraintTree::Intersection(children) => {
                children.iter().all(|c| self.tree_matches(item, c))
            }
            ConstraintTree::Union(children) => children.iter().any(|c| self.tree_matches(item, c)),
        }
    }

    fn is_local(&self, id: &RemoteItemId, local: ItemId) -> bool {
        id.account == self.account && id.id == local
    }

    /// Check whether a single item matches a leaf. Cheap identity checks
    /// first, ranges last.
    fn leaf_matches(&self, item: &MailItem, leaf: &Leaf) -> bool {
        if leaf.no_results {
            return false;
        }

        // 1. Item identity
        if !leaf.item_ids.is_empty() && !leaf.item_ids.contains(&item.id) {
            return false;
        }
        if leaf.prohibited_item_ids.contains(&item.id) {
            return false;
        }
        if !leaf.remote_item_ids.is_empty()
            && !leaf.remote_item_ids.iter().any(|r| self.is_local(r, item.id))
        {
            return false;
        }
        if leaf
            .prohibited_remote_item_ids
            .iter()
            .any(|r| self.is_local(r, item.id))
        {
            return false;
        }

        // 2. Type
        if !leaf.types.is_empty() && !leaf.types.contains(&item.item_type) {
            return false;
        }
        if leaf.exclude_types.contains(&item.item_type) {
            return false;
        }

        // 3. Folder
        if !leaf.folders.is_empty() && !leaf.folders.contains(&item.folder_id) {
            return false;
        }
        if leaf.exclude_folders.contains(&item.folder_id) {
            return false;
        }
        if !leaf.remote_folders.is_empty()
            && !leaf
                .remote_folders
                .iter()
                .any(|rf| self.is_local(&rf.folder, item.folder_id))
        {
            return false;
        }
        if leaf
            .exclude_remote_folders
            .iter()
            .any(|rf| self.is_local(&rf.folder, item.folder_id))
        {
            return false;
        }

        // 4. Conversation
        if let Some(conv) = leaf.conversation_id {
            if item.conversation_id != conv {
                return false;
            }
        }
        if leaf.prohibited_conversation_ids.contains(&item.conversation_id) {
            return false;
        }
        if let Some(ref conv) = leaf.remote_conversation_id {
            if !self.is_local(conv, item.conversation_id) {
                return false;
            }
        }
        if leaf
            .prohibited_remote_conversation_ids
            .iter()
            .any(|c| self.is_local(c, item.conversation_id))
        {
            return false;
        }

        // 5. Full-text document
        if !leaf.index_ids.is_empty()
            && !item.index_id.is_some_and(|id| leaf.index_ids.contains(&id))
        {
            return false;
        }
        if let Some(has) = leaf.has_index_id {
            if item.index_id.is_some() != has {
                return false;
            }
        }

        // 6. Tags
        if !leaf.tags.iter().all(|t| item.tags.contains(t)) {
            return false;
        }
        if leaf.exclude_tags.iter().any(|t| item.tags.contains(t)) {
            return false;
        }

        // 7. Ranges
        for (kind, ranges) in &leaf.ranges {
            let value = self.range_value(item, *kind);
            if !ranges.iter().all(|r| r.matches(value.as_ref())) {
                return false;
            }
        }
        if let Some(ref cursor) = leaf.cursor_range {
            let value = match cursor.sort.field() {
                SortField::Subject => Some(RangeValue::Str(item.subject.to_lowercase())),
                SortField::Sender => Some(RangeValue::Str(item.sender.to_lowercase())),
                SortField::Date => Some(RangeValue::Long(item.date.timestamp_millis())),
                SortField::Size => Some(RangeValue::Long(item.size as i64)),
                SortField::Id => Some(RangeValue::Long(item.id as i64)),
                SortField::None => None,
            };
            if !cursor.range.matches(value.as_ref()) {
                return false;
            }
        }

        true
    }

    fn range_value(&self, item: &MailItem, kind: RangeKind) -> Option<RangeValue> {
        match kind {
            RangeKind::Date => Some(RangeValue::Long(item.date.timestamp_millis())),
            RangeKind::ModifyDate => item.modified.map(|d| RangeValue::Long(d.timestamp_millis())),
            RangeKind::CalendarStart => item.calendar_start.map(RangeValue::Long),
            RangeKind::CalendarEnd => item.calendar_end.map(RangeValue::Long),
            RangeKind::Size => Some(RangeValue::Long(item.size as i64)),
            RangeKind::ModSequence => Some(RangeValue::Long(item.mod_seq)),
            RangeKind::ConversationCount => Some(RangeValue::Long(
                self.conversation_sizes
                    .get(&item.conversation_id)
                    .copied()
                    .unwrap_or(1),
            )),
            RangeKind::Subject => Some(RangeValue::Str(item.subject.to_lowercase())),
            RangeKind::Sender => Some(RangeValue::Str(item.sender.to_lowercase())),
            RangeKind::ItemId => Some(RangeValue::Long(item.id as i64)),
        }
    }

    fn sorted_matches(&self, constraints: &ConstraintTree, sort: SortOrder) -> Vec<&Arc<MailItem>> {
        let mut matched: Vec<&Arc<MailItem>> = self
            .items
            .iter()
            .filter(|item| self.tree_matches(item, constraints))
            .collect();
        if sort.is_ordered() {
            matched.sort_by(|a, b| {
                sort.compare_with_id((&sort.key_for(a), a.id), (&sort.key_for(b), b.id))
            });
        }
        matched
    }
}

impl RelationalBackend for MemoryMailbox {
    fn search(
        &self,
        constraints: &ConstraintTree,
        sort: SortOrder,
        fetch: FetchMode,
        page: Option<Page>,
    ) -> Result<Vec<DbResult>> {
        let matched = self.data.sorted_matches(constraints, sort);
        let window: Box<dyn Iterator<Item = &&Arc<MailItem>>> = match page {
            Some(p) => Box::new(matched.iter().skip(p.offset).take(p.limit)),
            None => Box::new(matched.iter()),
        };
        Ok(window
            .map(|item| DbResult {
                item_id: item.id,
                index_id: item.index_id,
                item_type: item.item_type,
                conversation_id: item.conversation_id,
                sort_key: sort.key_for(item),
                payload: match fetch {
                    FetchMode::Item => RowPayload::Item(Arc::clone(item)),
                    FetchMode::Id => RowPayload::Id,
                    FetchMode::ModSeq => RowPayload::ModSeq(item.mod_seq),
                    FetchMode::Parent => RowPayload::Parent(item.parent_id),
                },
            })
            .collect())
    }

    fn count(&self, constraints: &ConstraintTree) -> Result<usize> {
        Ok(self
            .data
            .items
            .iter()
            .filter(|item| self.data.tree_matches(item, constraints))
            .count())
    }
}

impl TextIndex for MemoryMailbox {
    fn open_searcher(&self) -> Result<Box<dyn TextSearcher>> {
        Ok(Box::new(MemorySearcher {
            data: Arc::clone(&self.data),
            closed: false,
        }))
    }

    fn doc_frequency(&self, term: &TextTerm) -> Result<usize> {
        Ok(self
            .data
            .documents
            .iter()
            .filter(|d| term_matches(d, term))
            .count())
    }

    fn total_docs(&self) -> Result<usize> {
        Ok(self.data.documents.len())
    }
}

impl SelectivityOracle for MemoryMailbox {
    fn term_frequency(&self, term: &TextTerm) -> Result<(usize, usize)> {
        Ok((self.doc_frequency(term)?, self.total_docs()?))
    }

    fn relational_count(&self, constraints: &ConstraintTree) -> Result<usize> {
        self.count(constraints)
    }
}

/// Searcher over a [`MemoryMailbox`]'s documents.
pub struct MemorySearcher {
    data: Arc<MailboxData>,
    closed: bool,
}

impl TextSearcher for MemorySearcher {
    fn search(
        &mut self,
        predicate: &TextPredicate,
        filter: Option<&BTreeSet<IndexId>>,
        limit: usize,
        sort: SortOrder,
    ) -> Result<TextHits> {
        if self.closed {
            return Err(SearchError::TextIndex("searcher already closed".into()));
        }
        let mut docs: Vec<&TextDocument> = self
            .data
            .documents
            .iter()
            .filter(|d| filter.is_none_or(|ids| ids.contains(&d.index_id)))
            .filter(|d| predicate_matches(d, predicate))
            .collect();

        if sort.is_ordered() {
            let key = |d: &TextDocument| {
                self.data
                    .by_id
                    .get(&d.item_id)
                    .map(|&i| sort.key_for(&self.data.items[i]))
            };
            docs.sort_by(|a, b| {
                let by_item = match (key(a), key(b)) {
                    (Some(ka), Some(kb)) => sort.compare_with_id((&ka, a.item_id), (&kb, b.item_id)),
                    (ka, kb) => ka.is_none().cmp(&kb.is_none()),
                };
                by_item.then_with(|| a.part.cmp(&b.part))
            });
        }

        let total_hits = docs.len();
        let mut info = Vec::new();
        collect_wildcard_info(&self.data.documents, predicate, &mut info);
        Ok(TextHits {
            docs: docs
                .into_iter()
                .take(limit)
                .map(|d| TextDoc {
                    index_id: d.index_id,
                    item_id: d.item_id,
                    part: d.part.clone(),
                })
                .collect(),
            total_hits,
            info,
        })
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

fn predicate_matches(doc: &TextDocument, predicate: &TextPredicate) -> bool {
    match predicate {
        TextPredicate::Term(term) => term_matches(doc, term),
        TextPredicate::All(parts) => parts.iter().all(|p| predicate_matches(doc, p)),
        TextPredicate::Any(parts) => parts.iter().any(|p| predicate_matches(doc, p)),
        TextPredicate::Not(inner) => !predicate_matches(doc, inner),
    }
}

/// Case-insensitive match of one term against the document's fields.
fn term_matches(doc: &TextDocument, term: &TextTerm) -> bool {
    let check = |text: &str| {
        let text_lower = text.to_lowercase();
        match term.wildcard_prefix() {
            Some(prefix) => {
                let prefix = prefix.to_lowercase();
                text_lower.split_whitespace().any(|w| w.starts_with(&prefix))
            }
            None => text_lower.contains(&term.text.to_lowercase()),
        }
    };
    match term.field {
        TextField::All => doc.fields.values().any(|t| check(t)),
        field => doc.fields.get(&field).is_some_and(|t| check(t)),
    }
}

fn collect_wildcard_info(documents: &[TextDocument], predicate: &TextPredicate, out: &mut Vec<ResultInfo>) {
    match predicate {
        TextPredicate::Term(term) => {
            if let Some(prefix) = term.wildcard_prefix() {
                let prefix = prefix.to_lowercase();
                let words: BTreeSet<String> = documents
                    .iter()
                    .flat_map(|d| d.fields.values())
                    .flat_map(|t| t.to_lowercase().split_whitespace().map(str::to_string).collect::<Vec<_>>())
                    .filter(|w| w.starts_with(&prefix))
                    .collect();
                out.push(ResultInfo::WildcardExpansion {
                    pattern: term.text.clone(),
                    expanded: words.len(),
                    truncated: false,
                });
            }
        }
        TextPredicate::All(parts) | TextPredicate::Any(parts) => {
            for p in parts {
                collect_wildcard_info(documents, p, out);
            }
        }
        TextPredicate::Not(inner) => collect_wildcard_info(documents, inner, out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::Range;
    use crate::model::ItemType;
    use chrono::{TimeZone, Utc};

    fn make_item(id: ItemId, folder: i32, date_ms: i64, subject: &str) -> MailItem {
        let mut item = MailItem::new(
            id,
            ItemType::Message,
            folder,
            Utc.timestamp_millis_opt(date_ms).single().expect("valid date"),
        );
        item.subject = subject.to_string();
        item.size = 1000 * id as u64;
        item
    }

    fn mailbox() -> MemoryMailbox {
        let mut items = vec![
            make_item(1, 2, 1_000, "Budget Report"),
            make_item(2, 2, 3_000, "Meeting Notes"),
            make_item(3, 5, 2_000, "Re: Budget Report"),
            make_item(4, 3, 4_000, "Deleted"),
        ];
        items[0].tags = vec!["work".into()];
        items[2].tags = vec!["work".into(), "urgent".into()];
        let docs = vec![
            TextDocument::new(1, 1, "quarterly budget attached"),
            TextDocument::new(2, 2, "agenda for monday"),
            TextDocument::new(3, 3, "budget looks fine").with_part("1"),
            TextDocument::new(3, 3, "spreadsheet with budgets").with_part("2"),
        ];
        MemoryMailbox::new("me", items, docs)
    }

    fn ids(rows: &[DbResult]) -> Vec<ItemId> {
        rows.iter().map(|r| r.item_id).collect()
    }

    #[test]
    fn test_leaf_filters() {
        let mb = mailbox();
        let mut leaf = Leaf::new();
        leaf.add_tag("work", true);
        let rows = mb
            .search(&leaf.into(), SortOrder::DateAsc, FetchMode::Id, None)
            .expect("search");
        assert_eq!(ids(&rows), vec![1, 3]);
    }

    #[test]
    fn test_union_and_exclusion() {
        let mb = mailbox();
        let mut a = Leaf::new();
        a.add_folder(5, true);
        let mut b = Leaf::new();
        b.add_tag("urgent", false);
        b.add_folder(3, false);
        let tree = ConstraintTree::from(a).or(b.into());
        let rows = mb
            .search(&tree, SortOrder::IdAsc, FetchMode::Id, None)
            .expect("search");
        assert_eq!(ids(&rows), vec![1, 2, 3]);
    }

    #[test]
    fn test_sort_and_paging() {
        let mb = mailbox();
        let rows = mb
            .search(
                &ConstraintTree::default(),
                SortOrder::DateDesc,
                FetchMode::Id,
                Some(Page { offset: 1, limit: 2 }),
            )
            .expect("search");
        assert_eq!(ids(&rows), vec![2, 3]);
    }

    #[test]
    fn test_size_range() {
        let mb = mailbox();
        let mut leaf = Leaf::new();
        leaf.add_range(RangeKind::Size, Range::above(RangeValue::Long(2_500)));
        assert_eq!(mb.count(&leaf.into()).expect("count"), 2);
    }

    #[test]
    fn test_remote_ids_of_own_account_are_local() {
        let mb = mailbox();
        let mut leaf = Leaf::new();
        leaf.add_remote_item_id(RemoteItemId::new("me", 2), true);
        assert_eq!(mb.count(&leaf.clone().into()).expect("count"), 1);
        let mut other = Leaf::new();
        other.add_remote_item_id(RemoteItemId::new("someone-else", 2), true);
        assert_eq!(mb.count(&other.into()).expect("count"), 0);
    }

    #[test]
    fn test_fetch_modes() {
        let mb = mailbox();
        let mut leaf = Leaf::new();
        leaf.add_item_id(1, true);
        let tree: ConstraintTree = leaf.into();
        let rows = mb
            .search(&tree, SortOrder::None, FetchMode::Item, None)
            .expect("search");
        assert!(matches!(rows[0].payload, RowPayload::Item(ref i) if i.subject == "Budget Report"));
        let rows = mb
            .search(&tree, SortOrder::None, FetchMode::ModSeq, None)
            .expect("search");
        assert_eq!(rows[0].payload, RowPayload::ModSeq(0));
    }

    #[test]
    fn test_text_search_sorted_with_parts() {
        let mb = mailbox();
        let mut searcher = mb.open_searcher().expect("open");
        let hits = searcher
            .search(
                &TextPredicate::term(TextField::Content, "budget"),
                None,
                10,
                SortOrder::DateDesc,
            )
            .expect("search");
        let found: Vec<_> = hits
            .docs
            .iter()
            .map(|d| (d.item_id, d.part.clone()))
            .collect();
        assert_eq!(
            found,
            vec![(3, Some("1".into())), (3, Some("2".into())), (1, None)]
        );
        assert_eq!(hits.total_hits, 3);
        searcher.close();
    }

    #[test]
    fn test_text_search_filter_and_limit() {
        let mb = mailbox();
        let mut searcher = mb.open_searcher().expect("open");
        let filter = BTreeSet::from([1]);
        let hits = searcher
            .search(
                &TextPredicate::term(TextField::All, "budget"),
                Some(&filter),
                10,
                SortOrder::None,
            )
            .expect("search");
        assert_eq!(hits.docs.len(), 1);

        let limited = searcher
            .search(
                &TextPredicate::term(TextField::All, "budget"),
                None,
                1,
                SortOrder::DateAsc,
            )
            .expect("search");
        assert_eq!(limited.docs.len(), 1);
        assert_eq!(limited.total_hits, 3);
    }

    #[test]
    fn test_wildcard_reports_expansion() {
        let mb = mailbox();
        let mut searcher = mb.open_searcher().expect("open");
        let hits = searcher
            .search(
                &TextPredicate::term(TextField::Content, "budg*"),
                None,
                10,
                SortOrder::None,
            )
            .expect("search");
        assert_eq!(hits.total_hits, 3);
        assert_eq!(
            hits.info,
            vec![ResultInfo::WildcardExpansion {
                pattern: "budg*".into(),
                expanded: 2,
                truncated: false,
            }]
        );
    }

    #[test]
    fn test_doc_frequency() {
        let mb = mailbox();
        let term = TextTerm::new(TextField::Content, "budget");
        assert_eq!(mb.doc_frequency(&term).expect("freq"), 3);
        assert_eq!(mb.total_docs().expect("total"), 4);
    }

    #[test]
    fn test_load_rejects_bad_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("box.json");
        std::fs::write(&path, "{ not json").expect("write");
        let err = MemoryMailbox::load(&path).expect_err("must fail");
        assert!(matches!(err, SearchError::InvalidFixture { .. }));
    }
}
