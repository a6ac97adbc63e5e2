//! Interfaces to the stores a search reads from.
//!
//! The planner never touches storage directly. It asks a
//! [`RelationalBackend`] for metadata rows, a [`TextIndex`] for matching
//! full-text documents, and a [`SelectivityOracle`] for the statistics it
//! bases its strategy on.

pub mod memory;

use std::collections::BTreeSet;

use crate::constraint::ConstraintTree;
use crate::error::Result;
use crate::model::{
    FetchMode, IndexId, ItemId, ItemType, ResultInfo, RowPayload, SortKey, SortOrder,
    TextPredicate, TextTerm,
};

/// A window into a sorted relational result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

/// One row returned by the relational store.
#[derive(Debug, Clone, PartialEq)]
pub struct DbResult {
    pub item_id: ItemId,
    pub index_id: Option<IndexId>,
    pub item_type: ItemType,
    pub conversation_id: ItemId,
    pub sort_key: SortKey,
    pub payload: RowPayload,
}

/// The metadata store.
pub trait RelationalBackend {
    /// Rows matching `constraints`, ordered by `sort` (ties broken by item
    /// id in the same direction), restricted to `page` when given.
    fn search(
        &self,
        constraints: &ConstraintTree,
        sort: SortOrder,
        fetch: FetchMode,
        page: Option<Page>,
    ) -> Result<Vec<DbResult>>;

    /// Exact number of rows matching `constraints`.
    fn count(&self, constraints: &ConstraintTree) -> Result<usize>;
}

/// One matching full-text document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDoc {
    pub index_id: IndexId,
    pub item_id: ItemId,
    /// Sub-document (MIME part) the match was found in.
    pub part: Option<String>,
}

/// The first `limit` documents of a text search plus its total size.
#[derive(Debug, Clone, Default)]
pub struct TextHits {
    pub docs: Vec<TextDoc>,
    pub total_hits: usize,
    pub info: Vec<ResultInfo>,
}

/// An open full-text searcher. Holds index resources until closed.
pub trait TextSearcher {
    /// Documents matching `predicate`, optionally restricted to `filter`
    /// index ids, in `sort` order.
    fn search(
        &mut self,
        predicate: &TextPredicate,
        filter: Option<&BTreeSet<IndexId>>,
        limit: usize,
        sort: SortOrder,
    ) -> Result<TextHits>;

    /// Release the searcher. Called exactly once.
    fn close(&mut self);
}

/// The full-text index.
pub trait TextIndex {
    fn open_searcher(&self) -> Result<Box<dyn TextSearcher>>;

    /// Number of documents containing `term`.
    fn doc_frequency(&self, term: &TextTerm) -> Result<usize>;

    fn total_docs(&self) -> Result<usize>;
}

/// Statistics the execution planner chooses its strategy from.
pub trait SelectivityOracle {
    /// `(documents containing term, total documents)`.
    fn term_frequency(&self, term: &TextTerm) -> Result<(usize, usize)>;

    /// Exact number of relational rows matching `constraints`.
    fn relational_count(&self, constraints: &ConstraintTree) -> Result<usize>;
}

impl<T: SelectivityOracle + ?Sized> SelectivityOracle for &T {
    fn term_frequency(&self, term: &TextTerm) -> Result<(usize, usize)> {
        (**self).term_frequency(term)
    }

    fn relational_count(&self, constraints: &ConstraintTree) -> Result<usize> {
        (**self).relational_count(constraints)
    }
}

/// The default oracle: asks the live backends.
pub struct BackendStatistics<'a> {
    relational: &'a dyn RelationalBackend,
    text: &'a dyn TextIndex,
}

impl<'a> BackendStatistics<'a> {
    pub fn new(relational: &'a dyn RelationalBackend, text: &'a dyn TextIndex) -> Self {
        Self { relational, text }
    }
}

impl SelectivityOracle for BackendStatistics<'_> {
    fn term_frequency(&self, term: &TextTerm) -> Result<(usize, usize)> {
        Ok((self.text.doc_frequency(term)?, self.text.total_docs()?))
    }

    fn relational_count(&self, constraints: &ConstraintTree) -> Result<usize> {
        self.relational.count(constraints)
    }
}
