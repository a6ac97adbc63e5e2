//! AND of several operations, merged by walking all children in sort
//! order and keeping the hits every child agrees on.

use std::cmp::Ordering;
use std::collections::VecDeque;

use tracing::debug;

use crate::error::{Result, SearchError};
use crate::model::{Hit, ItemId, SortKey, SortOrder};

use super::{Operation, QueryContext};

/// Where the merge loop stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    /// No group is buffered.
    Empty,
    /// The first child advanced to its next sort key.
    Grouping,
    /// Every child holds a group at the same sort key.
    Aligned,
    /// Matching hits are waiting in the output queue.
    Emitting,
    /// Some child ran dry; nothing more can match.
    Exhausted,
}

/// Outcome of aligning a child to a sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Matched,
    /// The child's next hit sorts after the key.
    Missed,
    Exhausted,
}

/// The hits of one child that share a single sort key.
#[derive(Debug, Default)]
pub struct HitGrouper {
    hits: Vec<Hit>,
}

impl HitGrouper {
    pub fn hits(&self) -> &[Hit] {
        &self.hits
    }

    pub fn key(&self) -> Option<&SortKey> {
        self.hits.first().map(|h| &h.sort_key)
    }

    pub fn clear(&mut self) {
        self.hits.clear();
    }

    /// Replace the group with the child's next hit and every hit after it
    /// with the same sort key. Returns `false` when the child is done.
    pub fn advance(
        &mut self,
        op: &mut Operation,
        ctx: &QueryContext<'_>,
        sort: SortOrder,
    ) -> Result<bool> {
        self.hits.clear();
        let Some(first) = op.next(ctx)? else {
            return Ok(false);
        };
        self.hits.push(first);
        self.take_equal(op, ctx, sort)?;
        Ok(true)
    }

    /// Skip the child's hits sorting before `key`, then group the ones
    /// equal to it.
    pub fn align_to(
        &mut self,
        op: &mut Operation,
        ctx: &QueryContext<'_>,
        sort: SortOrder,
        key: &SortKey,
    ) -> Result<Align> {
        self.hits.clear();
        loop {
            let Some(hit) = op.peek(ctx)? else {
                return Ok(Align::Exhausted);
            };
            match sort.compare(&hit.sort_key, key) {
                Ordering::Less => {
                    op.next(ctx)?;
                }
                Ordering::Equal => break,
                Ordering::Greater => return Ok(Align::Missed),
            }
        }
        if let Some(first) = op.next(ctx)? {
            self.hits.push(first);
        }
        self.take_equal(op, ctx, sort)?;
        Ok(Align::Matched)
    }

    fn take_equal(&mut self, op: &mut Operation, ctx: &QueryContext<'_>, sort: SortOrder) -> Result<()> {
        let Some(key) = self.key().cloned() else {
            return Ok(());
        };
        while let Some(hit) = op.peek(ctx)? {
            if sort.compare(&hit.sort_key, &key) != Ordering::Equal {
                break;
            }
            if let Some(hit) = op.next(ctx)? {
                self.hits.push(hit);
            }
        }
        Ok(())
    }

    /// Whether the group holds a hit for the same document as `hit`.
    pub fn contains(&self, hit: &Hit) -> bool {
        self.hits.iter().any(|h| h.same_document(hit))
    }
}

struct IntersectionExec {
    groupers: Vec<HitGrouper>,
    ready: VecDeque<Hit>,
    state: MergeState,
    child_chunk: usize,
    closed: bool,
}

impl IntersectionExec {
    /// Queue, once each, the hits of every child for `item_id` that all
    /// other children also hold.
    fn emit_item(&mut self, item_id: ItemId) {
        for (i, grouper) in self.groupers.iter().enumerate() {
            for hit in grouper.hits.iter().filter(|h| h.item_id == item_id) {
                let everywhere = self
                    .groupers
                    .iter()
                    .enumerate()
                    .all(|(j, other)| j == i || other.contains(hit));
                if everywhere && !self.ready.iter().any(|r| r.key() == hit.key()) {
                    self.ready.push_back(hit.clone());
                }
            }
        }
    }
}

/// AND of child operations.
#[derive(Debug)]
pub struct IntersectionOp {
    children: Vec<Operation>,
    exec: Option<IntersectionExec>,
}

impl std::fmt::Debug for IntersectionExec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntersectionExec")
            .field("state", &self.state)
            .field("ready", &self.ready.len())
            .finish()
    }
}

impl IntersectionOp {
    pub fn new(children: Vec<Operation>) -> Self {
        Self {
            children,
            exec: None,
        }
    }

    pub fn children(&self) -> &[Operation] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<Operation> {
        &mut self.children
    }

    pub fn into_children(self) -> Vec<Operation> {
        self.children
    }

    pub fn state(&self) -> Option<MergeState> {
        self.exec.as_ref().map(|e| e.state)
    }

    pub fn begin(&mut self, ctx: &QueryContext<'_>) -> Result<()> {
        let child_chunk = ctx.chunk_size.saturating_add(1).saturating_mul(3);
        let child_ctx = ctx.with_chunk_size(child_chunk);
        let mut state = if self.children.is_empty() {
            MergeState::Exhausted
        } else {
            MergeState::Empty
        };
        for child in &mut self.children {
            child.begin(&child_ctx)?;
        }
        for child in &mut self.children {
            if child.peek(&child_ctx)?.is_none() {
                debug!(child = %child, "Intersection child is empty");
                state = MergeState::Exhausted;
                break;
            }
        }
        self.exec = Some(IntersectionExec {
            groupers: self.children.iter().map(|_| HitGrouper::default()).collect(),
            ready: VecDeque::new(),
            state,
            child_chunk,
            closed: false,
        });
        Ok(())
    }

    fn fill(&mut self, ctx: &QueryContext<'_>) -> Result<()> {
        let Self { children, exec } = self;
        let exec = exec.as_mut().ok_or(SearchError::NotStarted)?;
        if exec.closed {
            return Err(SearchError::Closed);
        }
        let ctx = ctx.with_chunk_size(exec.child_chunk);
        let sort = ctx.params.sort;

        while exec.ready.is_empty() {
            if exec.state == MergeState::Exhausted {
                return Ok(());
            }
            exec.state = MergeState::Grouping;
            if !exec.groupers[0].advance(&mut children[0], &ctx, sort)? {
                exec.state = MergeState::Exhausted;
                return Ok(());
            }
            let Some(key) = exec.groupers[0].key().cloned() else {
                exec.state = MergeState::Empty;
                continue;
            };

            let mut aligned = true;
            for (grouper, child) in exec.groupers.iter_mut().zip(children.iter_mut()).skip(1) {
                match grouper.align_to(child, &ctx, sort, &key)? {
                    Align::Matched => {}
                    Align::Missed => {
                        aligned = false;
                        break;
                    }
                    Align::Exhausted => {
                        exec.state = MergeState::Exhausted;
                        return Ok(());
                    }
                }
            }
            if !aligned {
                exec.state = MergeState::Empty;
                continue;
            }

            exec.state = MergeState::Aligned;
            let mut ids: Vec<ItemId> = Vec::new();
            for hit in exec.groupers[0].hits() {
                if !ids.contains(&hit.item_id) {
                    ids.push(hit.item_id);
                }
            }
            for id in ids {
                exec.emit_item(id);
            }
            exec.state = if exec.ready.is_empty() {
                MergeState::Empty
            } else {
                MergeState::Emitting
            };
        }
        Ok(())
    }

    pub fn peek(&mut self, ctx: &QueryContext<'_>) -> Result<Option<Hit>> {
        self.fill(ctx)?;
        Ok(self.exec.as_ref().and_then(|e| e.ready.front().cloned()))
    }

    pub fn next(&mut self, ctx: &QueryContext<'_>) -> Result<Option<Hit>> {
        self.fill(ctx)?;
        Ok(self.exec.as_mut().and_then(|e| e.ready.pop_front()))
    }

    pub fn reset(&mut self) -> Result<()> {
        let exec = self.exec.as_mut().ok_or(SearchError::NotStarted)?;
        if exec.closed {
            return Err(SearchError::Closed);
        }
        for child in &mut self.children {
            child.reset()?;
        }
        exec.groupers.iter_mut().for_each(HitGrouper::clear);
        exec.ready.clear();
        exec.state = if self.children.is_empty() {
            MergeState::Exhausted
        } else {
            MergeState::Empty
        };
        Ok(())
    }

    pub fn close(&mut self) {
        for child in &mut self.children {
            child.close();
        }
        if let Some(ref mut exec) = self.exec {
            exec.closed = true;
            exec.ready.clear();
            exec.state = MergeState::Exhausted;
        }
    }
}
