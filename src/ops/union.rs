//! OR of several operations, merged in sort order.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{Result, SearchError};
use crate::model::{Hit, TargetSet};

use super::dedup::HitDedupCache;
use super::{Lookahead, Operation, QueryContext};

struct UnionExec {
    heads: Vec<Lookahead>,
    seen: HitDedupCache,
    closed: bool,
}

/// OR of child operations. Hits are merged by the active sort order and
/// reported once even when several children match them.
#[derive(Debug)]
pub struct UnionOp {
    children: Vec<Operation>,
    exec: Option<UnionExec>,
}

impl fmt::Debug for UnionExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnionExec")
            .field("heads", &self.heads.len())
            .field("seen", &self.seen.len())
            .finish()
    }
}

impl UnionOp {
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

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Drop children that can never run where `targets` run. Nested unions
    /// are pruned first. Returns whether anything was removed.
    pub fn prune_incompatible_targets(&mut self, targets: &TargetSet) -> bool {
        if targets.has_unspecified() {
            return false;
        }
        let mut changed = false;
        let children = std::mem::take(&mut self.children);
        for mut child in children {
            if let Operation::Union(ref mut nested) = child {
                changed |= nested.prune_incompatible_targets(targets);
            }
            let own = child.targets();
            if own.has_unspecified() || own.overlaps(targets) {
                self.children.push(child);
            } else {
                changed = true;
            }
        }
        changed
    }

    pub fn begin(&mut self, ctx: &QueryContext<'_>) -> Result<()> {
        for child in &mut self.children {
            child.begin(ctx)?;
        }
        self.exec = Some(UnionExec {
            heads: self.children.iter().map(|_| Lookahead::default()).collect(),
            seen: HitDedupCache::new(ctx.planner.dedup_capacity),
            closed: false,
        });
        Ok(())
    }

    /// Index of the child whose head is the next hit to report, skipping
    /// heads that were already reported through another child.
    fn select(&mut self, ctx: &QueryContext<'_>) -> Result<Option<usize>> {
        let Self { children, exec } = self;
        let exec = exec.as_mut().ok_or(SearchError::NotStarted)?;
        if exec.closed {
            return Err(SearchError::Closed);
        }
        let sort = ctx.params.sort;
        loop {
            for (head, child) in exec.heads.iter_mut().zip(children.iter_mut()) {
                head.fill_with(|| child.next(ctx))?;
            }

            let mut best: Option<(usize, &Hit)> = None;
            for (i, head) in exec.heads.iter().enumerate() {
                let Some(hit) = head.hit() else { continue };
                best = match best {
                    None => Some((i, hit)),
                    Some(_) if !sort.is_ordered() => break,
                    Some((_, current))
                        if sort.compare_with_id(
                            (&hit.sort_key, hit.item_id),
                            (&current.sort_key, current.item_id),
                        ) == Ordering::Less =>
                    {
                        Some((i, hit))
                    }
                    keep => keep,
                };
            }
            let Some((index, hit)) = best else {
                return Ok(None);
            };
            if exec.seen.contains(&hit.key()) {
                exec.heads[index].take();
                continue;
            }
            return Ok(Some(index));
        }
    }

    pub fn peek(&mut self, ctx: &QueryContext<'_>) -> Result<Option<Hit>> {
        let Some(index) = self.select(ctx)? else {
            return Ok(None);
        };
        Ok(self
            .exec
            .as_ref()
            .and_then(|e| e.heads[index].hit().cloned()))
    }

    pub fn next(&mut self, ctx: &QueryContext<'_>) -> Result<Option<Hit>> {
        let Some(index) = self.select(ctx)? else {
            return Ok(None);
        };
        let Some(exec) = self.exec.as_mut() else {
            return Err(SearchError::NotStarted);
        };
        let hit = exec.heads[index].take();
        if let Some(ref hit) = hit {
            exec.seen.first_sighting(hit.key());
        }
        Ok(hit)
    }

    pub fn reset(&mut self) -> Result<()> {
        let exec = self.exec.as_mut().ok_or(SearchError::NotStarted)?;
        if exec.closed {
            return Err(SearchError::Closed);
        }
        for child in &mut self.children {
            child.reset()?;
        }
        exec.heads.iter_mut().for_each(|h| *h = Lookahead::NotFetched);
        exec.seen.clear();
        Ok(())
    }

    pub fn close(&mut self) {
        for child in &mut self.children {
            child.close();
        }
        if let Some(ref mut exec) = self.exec {
            exec.closed = true;
            exec.heads.clear();
        }
    }
}
