//! Relational operation: a constraint tree answered by the relational
//! store, optionally joined with a fused full-text predicate.
//!
//! The join strategy is chosen lazily on the first pull:
//!
//! - `RelationalOnly`: no text predicate; page through the store.
//! - `TextFirst`: pull chunks of index ids from the text index and ask the
//!   store for the rows filed under them.
//! - `RelationalFirst`: page rows out of the store and keep the ones the
//!   text index matches when restricted to those rows.
//!
//! `RelationalFirst` wins when the constraints pin a conversation or item
//! set, when a single term is so common that the text index filters next
//! to nothing, or when a bounded probe of the text index finds more hits
//! than the store has rows.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::ops::Bound;

use tracing::{debug, warn};

use crate::backend::{DbResult, Page};
use crate::constraint::{ConstraintTree, CursorRange, Leaf, Range, RangeKind, RangeValue};
use crate::error::{Result, SearchError};
use crate::model::hit::merge_result_info;
use crate::model::{
    FolderId, Hit, IndexId, ItemType, PageDirection, QueryTarget, ResultInfo, SortField, SortKey,
    SortOrder,
};

use super::dedup::HitDedupCache;
use super::text::{TextChunk, TextOp};
use super::{Combine, QueryContext};

/// How a relational operation joins its rows with the text index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    NoResults,
    RelationalOnly,
    TextFirst,
    RelationalFirst,
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecMode::NoResults => "no-results",
            ExecMode::RelationalOnly => "relational-only",
            ExecMode::TextFirst => "text-first",
            ExecMode::RelationalFirst => "relational-first",
        })
    }
}

struct RelationalExec {
    mode: Option<ExecMode>,
    initial_chunk: usize,
    hits_per_chunk: usize,
    max_chunk: usize,
    /// Rows already taken from the store, for offset paging.
    offset: usize,
    rows: Vec<DbResult>,
    row_pos: usize,
    text_chunk: TextChunk,
    pending: VecDeque<Hit>,
    end_of_rows: bool,
    /// No hit has been handed out by `next()` yet.
    at_start: bool,
    seen: HitDedupCache,
    cursor_offset: Option<usize>,
    closed: bool,
}

/// A constraint tree plus an optional fused text predicate.
pub struct RelationalOp {
    constraints: ConstraintTree,
    text: Option<TextOp>,
    target: QueryTarget,
    info: Vec<ResultInfo>,
    exec: Option<RelationalExec>,
}

impl Default for RelationalOp {
    fn default() -> Self {
        Self::new()
    }
}

impl RelationalOp {
    /// An operation matching every item.
    pub fn new() -> Self {
        Self::with_constraints(ConstraintTree::default())
    }

    pub fn with_constraints(constraints: ConstraintTree) -> Self {
        Self {
            constraints,
            text: None,
            target: QueryTarget::Unspecified,
            info: Vec::new(),
            exec: None,
        }
    }

    /// An operation that answers a text predicate on its own.
    pub fn from_text(text: TextOp) -> Self {
        let mut op = Self::new();
        if text.has_spam_trash_setting() {
            op.constraints.force_spam_trash_setting();
        }
        op.text = Some(text);
        op
    }

    /// An operation matching everything outside `excluded` folders.
    pub fn excluding_folders(excluded: &[FolderId]) -> Self {
        let mut op = Self::new();
        op.constraints.ensure_spam_trash_setting(excluded);
        op
    }

    pub fn constraints(&self) -> &ConstraintTree {
        &self.constraints
    }

    pub fn constraints_mut(&mut self) -> &mut ConstraintTree {
        &mut self.constraints
    }

    /// The leaf that new ANDed predicates go into.
    pub fn top_leaf_mut(&mut self) -> &mut Leaf {
        self.constraints.top_leaf_mut()
    }

    pub fn text(&self) -> Option<&TextOp> {
        self.text.as_ref()
    }

    pub fn target(&self) -> &QueryTarget {
        &self.target
    }

    /// Pin the operation to `target`. Pinning an operation that already
    /// has a different explicit target makes it match nothing.
    pub fn set_target(&mut self, target: QueryTarget) {
        if self.target.is_explicit() && target.is_explicit() && self.target != target {
            debug_assert!(false, "conflicting targets {} and {target}", self.target);
            self.constraints.top_leaf_mut().no_results = true;
            return;
        }
        if target.is_explicit() {
            self.target = target;
        }
    }

    pub fn exec_mode(&self) -> Option<ExecMode> {
        self.exec.as_ref().and_then(|e| e.mode)
    }

    pub fn has_no_results(&self) -> bool {
        self.constraints.has_no_results()
    }

    /// Whether the operation matches everything in its target.
    pub fn has_all_results(&self) -> bool {
        self.text.is_none() && self.constraints.is_empty()
    }

    pub fn has_spam_trash_setting(&self) -> bool {
        self.constraints.has_spam_trash_setting()
            || self.text.as_ref().is_some_and(TextOp::has_spam_trash_setting)
    }

    pub fn ensure_spam_trash_setting(&mut self, excluded: &[FolderId]) {
        if !self.has_spam_trash_setting() {
            self.constraints.ensure_spam_trash_setting(excluded);
        }
    }

    pub fn force_spam_trash_setting(&mut self) {
        self.constraints.force_spam_trash_setting();
    }

    pub fn result_info(&self) -> Vec<ResultInfo> {
        let mut infos = self.info.clone();
        if let Some(ref text) = self.text {
            merge_result_info(&mut infos, text.result_info().iter().cloned());
        }
        infos
    }

    /// Number of results before the cursor, when it was requested.
    pub fn cursor_offset(&self) -> Option<usize> {
        self.exec.as_ref().and_then(|e| e.cursor_offset)
    }

    pub fn clone_for_rewrite(&self) -> RelationalOp {
        debug_assert!(self.exec.is_none(), "cloned after begin()");
        RelationalOp {
            constraints: self.constraints.clone(),
            text: self.text.as_ref().map(TextOp::clone_for_rewrite),
            target: self.target.clone(),
            info: self.info.clone(),
            exec: None,
        }
    }

    pub(crate) fn optimize_constraints(&mut self) {
        let constraints = std::mem::take(&mut self.constraints);
        self.constraints = constraints.optimize();
    }

    /// Join a text predicate into this operation.
    pub fn fuse_text(&mut self, text: TextOp) {
        self.text = Some(match self.text.take() {
            Some(existing) => existing.combine(text, Combine::And),
            None => text,
        });
    }

    // ── Combination ─────────────────────────────────────────────

    /// AND two relational operations. `None` means they target different
    /// mailboxes and can never match together.
    pub(crate) fn conjoin(mut self, mut other: RelationalOp) -> Option<RelationalOp> {
        if self.has_all_results() {
            if self.has_spam_trash_setting() {
                other.force_spam_trash_setting();
            }
            return Some(other);
        }
        if other.has_all_results() {
            if other.has_spam_trash_setting() {
                self.force_spam_trash_setting();
            }
            return Some(self);
        }
        if self.target.is_explicit() && other.target.is_explicit() && self.target != other.target {
            return None;
        }
        if !self.target.is_explicit() {
            self.target = other.target;
        }
        if let Some(text) = other.text {
            self.fuse_text(text);
        }
        self.constraints = self.constraints.and(other.constraints);
        merge_result_info(&mut self.info, other.info);
        Some(self)
    }

    /// Whether [`RelationalOp::disjoin`] can merge the two operations.
    pub(crate) fn can_disjoin(&self, other: &RelationalOp) -> bool {
        if self.has_no_results() || other.has_no_results() {
            return true;
        }
        if self.target != other.target {
            return false;
        }
        if self.has_all_results() || other.has_all_results() {
            return true;
        }
        self.text.is_none() && other.text.is_none()
    }

    /// OR two relational operations; only valid when `can_disjoin` holds.
    pub(crate) fn disjoin(mut self, other: RelationalOp) -> RelationalOp {
        if self.has_no_results() {
            return other;
        }
        if other.has_no_results() {
            return self;
        }
        if self.has_all_results() {
            return self;
        }
        if other.has_all_results() {
            return other;
        }
        debug_assert!(self.text.is_none() && other.text.is_none());
        self.constraints = self.constraints.or(other.constraints);
        merge_result_info(&mut self.info, other.info);
        self
    }

    // ── Execution ───────────────────────────────────────────────

    pub fn begin(&mut self, ctx: &QueryContext<'_>) -> Result<()> {
        debug_assert!(self.exec.is_none(), "begin() called twice");
        let max_chunk = ctx.planner.max_chunk_size.max(1);
        let mut hits_per_chunk = ctx.chunk_size.clamp(1, max_chunk);

        let types = ctx.params.storage_types();
        self.constraints.set_types(&types);

        let cursor_offset = self.apply_cursor(ctx)?;

        if let Some(ref mut text) = self.text {
            // text filtering drops rows, so ask for more per round trip
            hits_per_chunk = hits_per_chunk.saturating_mul(2).min(max_chunk);
            text.rewind();
        }

        debug!(
            constraints = %self.constraints,
            target = %self.target,
            hits_per_chunk,
            "Begin relational operation"
        );

        self.exec = Some(RelationalExec {
            mode: None,
            initial_chunk: hits_per_chunk,
            hits_per_chunk,
            max_chunk,
            offset: 0,
            rows: Vec::new(),
            row_pos: 0,
            text_chunk: TextChunk::default(),
            pending: VecDeque::new(),
            end_of_rows: false,
            at_start: true,
            seen: HitDedupCache::new(ctx.planner.dedup_capacity),
            cursor_offset,
            closed: false,
        });
        Ok(())
    }

    /// Narrow the constraints to the cursor's window and, if requested,
    /// count the rows that sort before the cursor.
    fn apply_cursor(&mut self, ctx: &QueryContext<'_>) -> Result<Option<usize>> {
        let Some(ref cursor) = ctx.params.cursor else {
            return Ok(None);
        };
        // conversation results are regrouped after the fact, so a message
        // level window would drop conversations straddling the cursor
        if ctx.params.types.contains(&ItemType::Conversation) {
            return Ok(None);
        }
        let sort = ctx.params.sort;
        if !sort.is_ordered() {
            return Err(SearchError::InvalidCursor(
                "a cursor requires an ordered sort".into(),
            ));
        }
        let value = parse_cursor_value(sort, &cursor.sort_value)?;
        let end = cursor
            .end_sort_value
            .as_deref()
            .map(|v| parse_cursor_value(sort, v))
            .transpose()?;

        let offset = if cursor.include_offset {
            let mut before = self.constraints.clone();
            add_sort_range(before.top_leaf_mut(), sort, strictly_before(sort, value.clone()));
            // rows sharing the cursor's value come first when their id does
            let mut tied = self.constraints.clone();
            let leaf = tied.top_leaf_mut();
            let exact = Range::new(Bound::Included(value.clone()), Bound::Included(value.clone()));
            add_sort_range(leaf, sort, exact);
            leaf.add_range(
                RangeKind::ItemId,
                strictly_before(sort, RangeValue::Long(cursor.item_id as i64)),
            );
            Some(ctx.relational.count(&before)? + ctx.relational.count(&tied)?)
        } else {
            None
        };

        let window = match ctx.params.direction {
            PageDirection::Forward => forward_window(sort, value, end),
            PageDirection::Backward => backward_window(sort, value, end),
        };
        add_sort_range(self.constraints.top_leaf_mut(), sort, window);
        Ok(offset)
    }

    pub fn peek(&mut self, ctx: &QueryContext<'_>) -> Result<Option<Hit>> {
        let Self {
            constraints,
            text,
            exec,
            ..
        } = self;
        let exec = exec.as_mut().ok_or(SearchError::NotStarted)?;
        if exec.closed {
            return Err(SearchError::Closed);
        }
        loop {
            if let Some(hit) = exec.pending.front() {
                return Ok(Some(hit.clone()));
            }
            if exec.row_pos >= exec.rows.len() {
                if exec.end_of_rows {
                    return Ok(None);
                }
                exec.fetch_chunk(constraints, text.as_mut(), ctx)?;
                continue;
            }
            let row = &exec.rows[exec.row_pos];
            exec.row_pos += 1;
            let docs = match (text.is_some(), row.index_id) {
                (true, Some(index_id)) => exec.text_chunk.get(index_id),
                _ => None,
            };
            let hits: Vec<Hit> = match docs {
                Some(docs) if row.item_type.repeats_per_item() => docs
                    .iter()
                    .map(|d| hit_from_row(row, d.part.clone()))
                    .collect(),
                _ => vec![hit_from_row(row, None)],
            };
            for hit in hits {
                if exec.seen.first_sighting(hit.key()) {
                    exec.pending.push_back(hit);
                }
            }
        }
    }

    pub fn next(&mut self, ctx: &QueryContext<'_>) -> Result<Option<Hit>> {
        if self.peek(ctx)?.is_none() {
            return Ok(None);
        }
        let exec = self.exec.as_mut().ok_or(SearchError::NotStarted)?;
        exec.at_start = false;
        Ok(exec.pending.pop_front())
    }

    /// Rewind to the first hit. Until the first `next()` the rows already
    /// fetched are replayed instead of being fetched again.
    pub fn reset(&mut self) -> Result<()> {
        let exec = self.exec.as_mut().ok_or(SearchError::NotStarted)?;
        if exec.closed {
            return Err(SearchError::Closed);
        }
        exec.pending.clear();
        exec.seen.clear();
        exec.row_pos = 0;
        if exec.at_start {
            return Ok(());
        }
        exec.rows.clear();
        exec.offset = 0;
        exec.end_of_rows = false;
        exec.text_chunk = TextChunk::default();
        exec.hits_per_chunk = exec.initial_chunk;
        exec.at_start = true;
        if let Some(ref mut text) = self.text {
            text.rewind();
        }
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(ref mut text) = self.text {
            text.close();
        }
        if let Some(ref mut exec) = self.exec {
            exec.closed = true;
            exec.rows.clear();
            exec.pending.clear();
        }
    }
}

impl RelationalExec {
    fn grow_chunk(&mut self) {
        self.hits_per_chunk = self.hits_per_chunk.saturating_mul(2).min(self.max_chunk);
    }

    fn fetch_chunk(
        &mut self,
        constraints: &ConstraintTree,
        mut text: Option<&mut TextOp>,
        ctx: &QueryContext<'_>,
    ) -> Result<()> {
        let mode = match self.mode {
            Some(mode) => mode,
            None => {
                let mode = choose_mode(constraints, text.as_deref_mut(), ctx)?;
                debug!(%mode, constraints = %constraints, "Chose execution mode");
                self.mode = Some(mode);
                mode
            }
        };
        self.rows.clear();
        self.row_pos = 0;

        match (mode, text) {
            (ExecMode::NoResults, _) => self.end_of_rows = true,
            (ExecMode::RelationalOnly, _) | (_, None) => self.fetch_relational_only(constraints, ctx)?,
            (ExecMode::TextFirst, Some(text)) => self.fetch_text_first(constraints, text, ctx)?,
            (ExecMode::RelationalFirst, Some(text)) => {
                self.fetch_relational_first(constraints, text, ctx)?
            }
        }
        debug!(
            %mode,
            rows = self.rows.len(),
            next_chunk = self.hits_per_chunk,
            end = self.end_of_rows,
            "Fetched chunk"
        );
        Ok(())
    }

    fn fetch_relational_only(&mut self, constraints: &ConstraintTree, ctx: &QueryContext<'_>) -> Result<()> {
        let limit = self.hits_per_chunk;
        let rows = ctx.relational.search(
            constraints,
            ctx.params.sort,
            ctx.params.fetch,
            Some(Page {
                offset: self.offset,
                limit,
            }),
        )?;
        self.offset += rows.len();
        if rows.len() < limit {
            self.end_of_rows = true;
        }
        self.rows = rows;
        self.grow_chunk();
        Ok(())
    }

    fn fetch_text_first(
        &mut self,
        constraints: &ConstraintTree,
        text: &mut TextOp,
        ctx: &QueryContext<'_>,
    ) -> Result<()> {
        loop {
            let batch = ctx.planner.in_clause_batch_size.max(1).min(self.hits_per_chunk);
            let chunk = text.next_chunk(ctx, batch)?;
            self.grow_chunk();
            if chunk.is_empty() {
                self.end_of_rows = true;
                return Ok(());
            }
            let mut scoped = constraints.clone();
            scoped.top_leaf_mut().and(Leaf {
                index_ids: chunk.index_id_set(),
                ..Leaf::default()
            });
            let rows = ctx
                .relational
                .search(&scoped, ctx.params.sort, ctx.params.fetch, None)?;
            self.text_chunk = chunk;
            if !rows.is_empty() {
                self.rows = rows;
                return Ok(());
            }
        }
    }

    fn fetch_relational_first(
        &mut self,
        constraints: &ConstraintTree,
        text: &mut TextOp,
        ctx: &QueryContext<'_>,
    ) -> Result<()> {
        let batch = self.max_chunk;
        let mut indexed = constraints.clone();
        indexed.top_leaf_mut().has_index_id = Some(true);
        loop {
            let mut rows = ctx.relational.search(
                &indexed,
                ctx.params.sort,
                ctx.params.fetch,
                Some(Page {
                    offset: self.offset,
                    limit: batch,
                }),
            )?;
            self.offset += rows.len();
            if rows.len() < batch {
                self.end_of_rows = true;
            }
            if rows.is_empty() {
                return Ok(());
            }

            let ids: BTreeSet<IndexId> = rows.iter().filter_map(|r| r.index_id).collect();
            text.set_filter(ids.clone());
            let matched = gather_filtered(text, &ids, batch.saturating_mul(3), ctx);
            text.clear_filter();
            let matched = matched?;

            rows.retain(|r| r.index_id.is_some_and(|id| matched.contains(id)));
            if !rows.is_empty() {
                self.rows = rows;
                self.text_chunk = matched;
                return Ok(());
            }
            if self.end_of_rows {
                return Ok(());
            }
        }
    }
}

/// Pull every text match inside `ids`; any match outside it means the two
/// stores disagree.
fn gather_filtered(
    text: &mut TextOp,
    ids: &BTreeSet<IndexId>,
    batch: usize,
    ctx: &QueryContext<'_>,
) -> Result<TextChunk> {
    let mut all = TextChunk::default();
    loop {
        let chunk = text.next_chunk(ctx, batch)?;
        if let Some(stray) = chunk.index_ids().iter().find(|id| !ids.contains(id)) {
            warn!(index_id = *stray, "Text hit outside the relational batch");
            return Err(SearchError::Inconsistent(format!(
                "full-text hit for index id {stray} is not part of the current relational batch"
            )));
        }
        let short = chunk.doc_count() < batch;
        all.extend(chunk);
        if short {
            return Ok(all);
        }
    }
}

fn choose_mode(
    constraints: &ConstraintTree,
    text: Option<&mut TextOp>,
    ctx: &QueryContext<'_>,
) -> Result<ExecMode> {
    if constraints.has_no_results() {
        return Ok(ExecMode::NoResults);
    }
    let Some(text) = text else {
        return Ok(ExecMode::RelationalOnly);
    };
    if constraints.prefers_relational_first() {
        return Ok(ExecMode::RelationalFirst);
    }
    if let Some(term) = text.predicate().single_term() {
        let (freq, total) = ctx.oracle.term_frequency(term)?;
        let cutoff = total as f64 * ctx.planner.text_first_doc_freq_cutoff;
        if total > 0 && freq as f64 > cutoff {
            debug!(%term, freq, total, "Common term, querying the relational store first");
            return Ok(ExecMode::RelationalFirst);
        }
    }
    let probe = ctx.planner.probe_hits.max(1);
    let text_hits = text.fetch_first(ctx, probe)?;
    if text_hits > probe {
        let rows = ctx.oracle.relational_count(constraints)?;
        if rows < text_hits {
            debug!(text_hits, rows, "Relational side is narrower");
            return Ok(ExecMode::RelationalFirst);
        }
    }
    Ok(ExecMode::TextFirst)
}

fn hit_from_row(row: &DbResult, part: Option<String>) -> Hit {
    Hit {
        item_id: row.item_id,
        conversation_id: row.conversation_id,
        item_type: row.item_type,
        sort_key: row.sort_key.clone(),
        index_id: row.index_id,
        part,
        payload: row.payload.clone(),
    }
}

// ── Cursor windows ──────────────────────────────────────────────

fn parse_cursor_value(sort: SortOrder, raw: &str) -> Result<RangeValue> {
    match sort.parse_key(raw) {
        Some(SortKey::Int(v)) => Ok(RangeValue::Long(v as i64)),
        Some(SortKey::Long(v)) => Ok(RangeValue::Long(v)),
        Some(SortKey::Str(s)) => Ok(RangeValue::Str(s)),
        Some(SortKey::None) | None => Err(SearchError::InvalidCursor(format!(
            "cannot read '{raw}' as a {sort} sort value"
        ))),
    }
}

/// Natural-order range of values delivered strictly before `value`.
fn strictly_before(sort: SortOrder, value: RangeValue) -> Range {
    if sort.is_descending() {
        Range::above(value)
    } else {
        Range::below(value)
    }
}

/// From the cursor (inclusive) up to the end bound (exclusive).
fn forward_window(sort: SortOrder, value: RangeValue, end: Option<RangeValue>) -> Range {
    let far = end.map_or(Bound::Unbounded, Bound::Excluded);
    if sort.is_descending() {
        Range::new(far, Bound::Included(value))
    } else {
        Range::new(Bound::Included(value), far)
    }
}

/// From the end bound up to the cursor, both inclusive.
fn backward_window(sort: SortOrder, value: RangeValue, end: Option<RangeValue>) -> Range {
    let near = end.map_or(Bound::Unbounded, Bound::Included);
    if sort.is_descending() {
        Range::new(Bound::Included(value), near)
    } else {
        Range::new(near, Bound::Included(value))
    }
}

fn add_sort_range(leaf: &mut Leaf, sort: SortOrder, range: Range) {
    match sort.field() {
        SortField::Date => leaf.add_range(RangeKind::Date, range),
        SortField::Size => leaf.add_range(RangeKind::Size, range),
        SortField::Id => leaf.add_range(RangeKind::ItemId, range),
        SortField::Subject | SortField::Sender => {
            leaf.cursor_range = Some(CursorRange { range, sort });
        }
        SortField::None => {}
    }
}

impl fmt::Display for RelationalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = if self.target.is_explicit() {
            format!("@{}", self.target)
        } else {
            String::new()
        };
        match self.text {
            Some(ref text) => write!(f, "({text} AND DB{target}[{}])", self.constraints),
            None => write!(f, "DB{target}[{}]", self.constraints),
        }
    }
}

impl fmt::Debug for RelationalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationalOp")
            .field("constraints", &self.constraints.to_string())
            .field("text", &self.text)
            .field("target", &self.target)
            .field("mode", &self.exec_mode())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::backend::memory::{MemoryMailbox, TextDocument};
    use crate::backend::{RelationalBackend, TextDoc, TextHits, TextIndex, TextSearcher};
    use crate::config::PlannerConfig;
    use crate::model::{FetchMode, ItemId, MailItem, TextField, TextPredicate, TextTerm};
    use crate::ops::testing::context;
    use crate::search::SearchParams;

    fn item(id: ItemId, item_type: ItemType) -> MailItem {
        MailItem::new(
            id,
            item_type,
            2,
            Utc.timestamp_opt(1_000 * id as i64, 0).single().expect("date"),
        )
    }

    fn text_op(word: &str) -> RelationalOp {
        RelationalOp::from_text(TextOp::new(TextPredicate::term(TextField::Content, word)))
    }

    fn drain(op: &mut RelationalOp, ctx: &QueryContext<'_>) -> Vec<Hit> {
        let mut hits = Vec::new();
        while let Some(hit) = op.next(ctx).expect("next") {
            hits.push(hit);
        }
        hits
    }

    /// Ten messages; documents 1-3 contain "rare", every document "mail".
    fn corpus() -> MemoryMailbox {
        let mut items: Vec<MailItem> = (1..=10).map(|id| item(id, ItemType::Message)).collect();
        items[1].tags = vec!["t".into()];
        let docs = (1..=10)
            .map(|id| {
                let body = if id <= 3 { "rare mail" } else { "plain mail" };
                TextDocument::new(id, id, body)
            })
            .collect();
        MemoryMailbox::new("me", items, docs)
    }

    struct RecordingBackend {
        inner: MemoryMailbox,
        pages: RefCell<Vec<usize>>,
    }

    impl RelationalBackend for RecordingBackend {
        fn search(
            &self,
            constraints: &ConstraintTree,
            sort: SortOrder,
            fetch: FetchMode,
            page: Option<Page>,
        ) -> Result<Vec<DbResult>> {
            if let Some(p) = page {
                self.pages.borrow_mut().push(p.limit);
            }
            self.inner.search(constraints, sort, fetch, page)
        }

        fn count(&self, constraints: &ConstraintTree) -> Result<usize> {
            self.inner.count(constraints)
        }
    }

    #[test]
    fn test_chunks_double_up_to_the_cap() {
        let mailbox = MemoryMailbox::new(
            "me",
            (1..=20).map(|id| item(id, ItemType::Message)).collect(),
            Vec::new(),
        );
        let backend = RecordingBackend {
            inner: mailbox.clone(),
            pages: RefCell::new(Vec::new()),
        };
        let params = SearchParams::default();
        let planner = PlannerConfig {
            max_chunk_size: 8,
            ..PlannerConfig::default()
        };
        let ctx = QueryContext {
            relational: &backend,
            text: &mailbox,
            oracle: &mailbox,
            params: &params,
            planner: &planner,
            chunk_size: 2,
        };

        let mut op = RelationalOp::new();
        op.begin(&ctx).expect("begin");
        assert_eq!(drain(&mut op, &ctx).len(), 20);
        assert_eq!(op.exec_mode(), Some(ExecMode::RelationalOnly));
        assert_eq!(*backend.pages.borrow(), vec![2, 4, 8, 8]);
    }

    #[test]
    fn test_mode_selection() {
        let mailbox = corpus();
        let params = SearchParams::default();
        let planner = PlannerConfig::default();
        let ctx = context(&mailbox, &params, &planner);

        // rare term, nothing narrower on the relational side
        let mut op = text_op("rare");
        op.begin(&ctx).expect("begin");
        assert_eq!(drain(&mut op, &ctx).len(), 3);
        assert_eq!(op.exec_mode(), Some(ExecMode::TextFirst));

        // a term in every document filters nothing
        let mut op = text_op("mail");
        op.begin(&ctx).expect("begin");
        assert_eq!(drain(&mut op, &ctx).len(), 10);
        assert_eq!(op.exec_mode(), Some(ExecMode::RelationalFirst));

        // explicit items pin the relational side
        let mut op = text_op("rare");
        op.top_leaf_mut().item_ids.extend([3, 4]);
        op.begin(&ctx).expect("begin");
        let hits = drain(&mut op, &ctx);
        assert_eq!(hits.iter().map(|h| h.item_id).collect::<Vec<_>>(), vec![3]);
        assert_eq!(op.exec_mode(), Some(ExecMode::RelationalFirst));
    }

    #[test]
    fn test_probe_prefers_narrow_relational_side() {
        let mailbox = corpus();
        let params = SearchParams::default();
        let planner = PlannerConfig {
            probe_hits: 1,
            ..PlannerConfig::default()
        };
        let ctx = context(&mailbox, &params, &planner);

        let mut op = text_op("rare");
        op.top_leaf_mut().add_tag("t", true);
        op.begin(&ctx).expect("begin");
        let hits = drain(&mut op, &ctx);
        assert_eq!(hits.iter().map(|h| h.item_id).collect::<Vec<_>>(), vec![2]);
        assert_eq!(op.exec_mode(), Some(ExecMode::RelationalFirst));
    }

    #[test]
    fn test_one_hit_per_part_only_for_messages() {
        let items = vec![item(1, ItemType::Appointment), item(2, ItemType::Message)];
        let docs = ["1", "2", "3"]
            .iter()
            .flat_map(|part| {
                [
                    TextDocument::new(1, 1, "alpha").with_part(*part),
                    TextDocument::new(2, 2, "alpha").with_part(*part),
                ]
            })
            .collect();
        let mailbox = MemoryMailbox::new("me", items, docs);
        let params = SearchParams::default();
        let planner = PlannerConfig::default();
        let ctx = context(&mailbox, &params, &planner);

        let mut op = text_op("alpha");
        op.begin(&ctx).expect("begin");
        let hits = drain(&mut op, &ctx);
        assert_eq!(hits.iter().filter(|h| h.item_id == 1).count(), 1);
        let mut parts: Vec<_> = hits
            .iter()
            .filter(|h| h.item_id == 2)
            .filter_map(|h| h.part.clone())
            .collect();
        parts.sort();
        assert_eq!(parts, vec!["1", "2", "3"]);
    }

    struct StrayIndex;

    struct StraySearcher;

    impl TextSearcher for StraySearcher {
        fn search(
            &mut self,
            _predicate: &TextPredicate,
            _filter: Option<&BTreeSet<IndexId>>,
            _limit: usize,
            _sort: SortOrder,
        ) -> Result<TextHits> {
            Ok(TextHits {
                docs: vec![
                    TextDoc {
                        index_id: 1,
                        item_id: 1,
                        part: None,
                    },
                    TextDoc {
                        index_id: 99,
                        item_id: 99,
                        part: None,
                    },
                ],
                total_hits: 2,
                info: Vec::new(),
            })
        }

        fn close(&mut self) {}
    }

    impl TextIndex for StrayIndex {
        fn open_searcher(&self) -> Result<Box<dyn TextSearcher>> {
            Ok(Box::new(StraySearcher))
        }

        fn doc_frequency(&self, _term: &TextTerm) -> Result<usize> {
            Ok(1)
        }

        fn total_docs(&self) -> Result<usize> {
            Ok(100)
        }
    }

    #[test]
    fn test_text_hit_outside_batch_is_inconsistent() {
        let mailbox = MemoryMailbox::new(
            "me",
            vec![item(1, ItemType::Message), item(2, ItemType::Message)],
            Vec::new(),
        );
        let params = SearchParams::default();
        let planner = PlannerConfig::default();
        let ctx = QueryContext {
            text: &StrayIndex,
            ..context(&mailbox, &params, &planner)
        };

        let mut op = text_op("anything");
        op.top_leaf_mut().item_ids.extend([1, 2]);
        op.begin(&ctx).expect("begin");
        assert!(matches!(op.next(&ctx), Err(SearchError::Inconsistent(_))));
    }

    #[test]
    fn test_reset_replays_and_close_is_final() {
        let mailbox = corpus();
        let params = SearchParams::default().with_sort(SortOrder::IdAsc);
        let planner = PlannerConfig::default();
        let ctx = context(&mailbox, &params, &planner);

        let mut op = RelationalOp::new();
        assert!(matches!(op.peek(&ctx), Err(SearchError::NotStarted)));
        op.begin(&ctx).expect("begin");
        assert_eq!(op.peek(&ctx).expect("peek").map(|h| h.item_id), Some(1));
        op.reset().expect("reset before next");
        let first = drain(&mut op, &ctx);
        op.reset().expect("reset after next");
        assert_eq!(drain(&mut op, &ctx), first);

        op.close();
        op.close();
        assert!(matches!(op.peek(&ctx), Err(SearchError::Closed)));
    }

    #[test]
    fn test_cursor_offset_counts_hits_before_cursor() {
        let mailbox = corpus();
        let cursor = crate::model::Cursor::new(5, "5000000").with_offset();
        let params = SearchParams::default()
            .with_sort(SortOrder::DateAsc)
            .with_cursor(cursor);
        let planner = PlannerConfig::default();
        let ctx = context(&mailbox, &params, &planner);

        let mut op = RelationalOp::new();
        op.begin(&ctx).expect("begin");
        assert_eq!(op.cursor_offset(), Some(4));
        let ids: Vec<_> = drain(&mut op, &ctx).iter().map(|h| h.item_id).collect();
        assert_eq!(ids, vec![5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_cursor_offset_counts_equal_values_by_item_id() {
        let same = Utc.timestamp_opt(1_000, 0).single().expect("date");
        let items = (1..=3)
            .map(|id| MailItem::new(id, ItemType::Message, 2, same))
            .collect();
        let mailbox = MemoryMailbox::new("me", items, Vec::new());
        let planner = PlannerConfig::default();

        for (sort, expected) in [(SortOrder::DateAsc, 1), (SortOrder::DateDesc, 1)] {
            let cursor = crate::model::Cursor::new(2, "1000000").with_offset();
            let params = SearchParams::default().with_sort(sort).with_cursor(cursor);
            let ctx = context(&mailbox, &params, &planner);
            let mut op = RelationalOp::new();
            op.begin(&ctx).expect("begin");
            assert_eq!(op.cursor_offset(), Some(expected), "{sort}");
        }

        let cursor = crate::model::Cursor::new(3, "1000000").with_offset();
        let params = SearchParams::default()
            .with_sort(SortOrder::DateAsc)
            .with_cursor(cursor);
        let ctx = context(&mailbox, &params, &planner);
        let mut op = RelationalOp::new();
        op.begin(&ctx).expect("begin");
        assert_eq!(op.cursor_offset(), Some(2));
    }

    #[test]
    fn test_text_first_keeps_planned_constraints() {
        let mailbox = corpus();
        let params = SearchParams::default();
        let planner = PlannerConfig::default();
        let ctx = context(&mailbox, &params, &planner);

        let mut op = text_op("rare");
        op.top_leaf_mut().index_ids.extend([2, 3, 7]);
        let planned = op.to_string();
        op.begin(&ctx).expect("begin");
        let ids: Vec<_> = drain(&mut op, &ctx).iter().map(|h| h.item_id).collect();
        assert_eq!(op.exec_mode(), Some(ExecMode::TextFirst));
        assert_eq!(ids, vec![3, 2]);
        assert_eq!(op.to_string(), planned);

        op.reset().expect("reset");
        let again: Vec<_> = drain(&mut op, &ctx).iter().map(|h| h.item_id).collect();
        assert_eq!(again, ids);
        assert_eq!(op.to_string(), planned);
    }
}
