//! Full-text operation: streams matching documents out of the text index
//! in chunks.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use tracing::debug;

use crate::backend::{TextDoc, TextSearcher};
use crate::error::{Result, SearchError};
use crate::model::hit::merge_result_info;
use crate::model::{IndexId, ResultInfo, TextPredicate};

use super::{Combine, QueryContext};

/// Hard ceiling on how many documents one text search may request.
pub const MAX_TOP_DOCS: usize = 1_000_000;

/// Documents of one chunk, grouped by index id in arrival order.
#[derive(Debug, Default, Clone)]
pub struct TextChunk {
    order: Vec<IndexId>,
    docs: HashMap<IndexId, Vec<TextDoc>>,
    doc_count: usize,
}

impl TextChunk {
    pub fn add(&mut self, doc: TextDoc) {
        let slot = self.docs.entry(doc.index_id).or_insert_with(|| {
            self.order.push(doc.index_id);
            Vec::new()
        });
        slot.push(doc);
        self.doc_count += 1;
    }

    pub fn extend(&mut self, other: TextChunk) {
        for id in other.order {
            if let Some(docs) = other.docs.get(&id) {
                for doc in docs {
                    self.add(doc.clone());
                }
            }
        }
    }

    pub fn contains(&self, index_id: IndexId) -> bool {
        self.docs.contains_key(&index_id)
    }

    pub fn get(&self, index_id: IndexId) -> Option<&[TextDoc]> {
        self.docs.get(&index_id).map(Vec::as_slice)
    }

    /// Index ids in the order their first document arrived.
    pub fn index_ids(&self) -> &[IndexId] {
        &self.order
    }

    pub fn index_id_set(&self) -> BTreeSet<IndexId> {
        self.order.iter().copied().collect()
    }

    pub fn doc_count(&self) -> usize {
        self.doc_count
    }

    pub fn is_empty(&self) -> bool {
        self.doc_count == 0
    }
}

/// A full-text predicate plus the state of its open searcher.
pub struct TextOp {
    predicate: TextPredicate,
    filter: Option<BTreeSet<IndexId>>,
    info: Vec<ResultInfo>,
    spam_trash_setting: bool,

    searcher: Option<Box<dyn TextSearcher>>,
    docs: Vec<TextDoc>,
    total_hits: usize,
    limit: usize,
    pos: usize,
    has_run: bool,
    closed: bool,
}

impl TextOp {
    pub fn new(predicate: TextPredicate) -> Self {
        Self {
            predicate,
            filter: None,
            info: Vec::new(),
            spam_trash_setting: false,
            searcher: None,
            docs: Vec::new(),
            total_hits: 0,
            limit: 0,
            pos: 0,
            has_run: false,
            closed: false,
        }
    }

    pub fn predicate(&self) -> &TextPredicate {
        &self.predicate
    }

    pub fn result_info(&self) -> &[ResultInfo] {
        &self.info
    }

    pub fn add_result_info(&mut self, info: ResultInfo) {
        merge_result_info(&mut self.info, [info]);
    }

    pub fn has_spam_trash_setting(&self) -> bool {
        self.spam_trash_setting
    }

    pub fn force_spam_trash_setting(&mut self) {
        self.spam_trash_setting = true;
    }

    /// Copy the query part, leaving execution state behind.
    pub fn clone_for_rewrite(&self) -> TextOp {
        debug_assert!(!self.has_run && self.searcher.is_none());
        let mut copy = TextOp::new(self.predicate.clone());
        copy.info = self.info.clone();
        copy.spam_trash_setting = self.spam_trash_setting;
        copy
    }

    /// Merge two text operations into one predicate.
    pub fn combine(self, other: TextOp, how: Combine) -> TextOp {
        let predicate = match how {
            Combine::And => self.predicate.and(other.predicate),
            Combine::Or => self.predicate.or(other.predicate),
        };
        let mut merged = TextOp::new(predicate);
        merged.info = self.info;
        merge_result_info(&mut merged.info, other.info);
        merged.spam_trash_setting = self.spam_trash_setting || other.spam_trash_setting;
        merged
    }

    /// Restrict subsequent searches to `ids`. Restarts the search.
    pub fn set_filter(&mut self, ids: BTreeSet<IndexId>) {
        self.filter = Some(ids);
        self.rewind();
    }

    /// Drop the index-id restriction. Restarts the search.
    pub fn clear_filter(&mut self) {
        if self.filter.take().is_some() {
            self.rewind();
        }
    }

    /// Forget fetched documents so the next chunk starts from the first
    /// match again.
    pub fn rewind(&mut self) {
        self.docs.clear();
        self.total_hits = 0;
        self.limit = 0;
        self.pos = 0;
        self.has_run = false;
    }

    /// Run the initial search with room for `n` documents, if it has not
    /// run yet. Returns the total number of matching documents.
    pub fn fetch_first(&mut self, ctx: &QueryContext<'_>, n: usize) -> Result<usize> {
        if !self.has_run {
            self.run(ctx, n.max(1))?;
        }
        Ok(self.total_hits)
    }

    /// Next group of at least `max` documents (fewer at the end). A chunk
    /// never stops between two documents of the same index id when they
    /// arrive back to back.
    pub fn next_chunk(&mut self, ctx: &QueryContext<'_>, max: usize) -> Result<TextChunk> {
        let max = max.max(1);
        if !self.has_run {
            self.run(ctx, max.saturating_mul(3).min(MAX_TOP_DOCS))?;
        }
        let mut chunk = TextChunk::default();
        loop {
            if self.pos >= self.docs.len() {
                if self.pos >= self.total_hits || self.limit >= MAX_TOP_DOCS {
                    break;
                }
                let next_limit = self.limit.saturating_mul(4).min(MAX_TOP_DOCS);
                self.run(ctx, next_limit)?;
                if self.pos >= self.docs.len() {
                    break;
                }
            }
            let doc = &self.docs[self.pos];
            if chunk.doc_count() >= max && !chunk.contains(doc.index_id) {
                break;
            }
            chunk.add(doc.clone());
            self.pos += 1;
        }
        Ok(chunk)
    }

    fn run(&mut self, ctx: &QueryContext<'_>, limit: usize) -> Result<()> {
        if self.closed {
            return Err(SearchError::Closed);
        }
        if self.searcher.is_none() {
            self.searcher = Some(ctx.text.open_searcher()?);
        }
        let Some(searcher) = self.searcher.as_mut() else {
            return Err(SearchError::NotStarted);
        };
        let hits = searcher.search(&self.predicate, self.filter.as_ref(), limit, ctx.params.sort)?;
        debug!(
            predicate = %self.predicate,
            limit,
            returned = hits.docs.len(),
            total = hits.total_hits,
            "Text search"
        );
        merge_result_info(&mut self.info, hits.info);
        self.docs = hits.docs;
        self.total_hits = hits.total_hits;
        self.limit = limit;
        self.has_run = true;
        Ok(())
    }

    /// Release the searcher. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut searcher) = self.searcher.take() {
            searcher.close();
        }
        self.closed = true;
        self.docs.clear();
    }
}

impl fmt::Debug for TextOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextOp")
            .field("predicate", &self.predicate)
            .field("filter", &self.filter)
            .field("open", &self.searcher.is_some())
            .finish()
    }
}

impl fmt::Display for TextOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TEXT[{}]", self.predicate)
    }
}
