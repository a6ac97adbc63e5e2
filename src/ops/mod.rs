//! Operation trees: the executable form of a query.
//!
//! A query compiles to a tree of [`Operation`]s, is rewritten by
//! [`optimize::optimize`], and is then pulled hit by hit through the
//! chunked iterator protocol: `begin`, `peek`, `next`, `reset`,
//! `skip_to`, `close`.

pub mod dedup;
pub mod intersection;
pub mod optimize;
pub mod relational;
pub mod text;
pub mod union;

use std::fmt;

use crate::backend::{RelationalBackend, SelectivityOracle, TextIndex};
use crate::config::{OptimizerConfig, PlannerConfig};
use crate::error::{Result, SearchError};
use crate::model::hit::merge_result_info;
use crate::model::{FolderId, Hit, QueryTarget, ResultInfo, TargetSet};
use crate::search::SearchParams;

pub use intersection::IntersectionOp;
pub use relational::{ExecMode, RelationalOp};
pub use text::TextOp;
pub use union::UnionOp;

/// How two operands are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combine {
    And,
    Or,
}

impl fmt::Display for Combine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Combine::And => "AND",
            Combine::Or => "OR",
        })
    }
}

/// Everything an executing operation reads from: the backends, the
/// request and the tuning knobs.
#[derive(Clone, Copy)]
pub struct QueryContext<'a> {
    pub relational: &'a dyn RelationalBackend,
    pub text: &'a dyn TextIndex,
    pub oracle: &'a dyn SelectivityOracle,
    pub params: &'a SearchParams,
    pub planner: &'a PlannerConfig,
    /// Hits the caller expects to consume per round trip.
    pub chunk_size: usize,
}

impl<'a> QueryContext<'a> {
    pub fn with_chunk_size(self, chunk_size: usize) -> Self {
        Self { chunk_size, ..self }
    }
}

/// One buffered hit pulled ahead of the consumer.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Lookahead {
    #[default]
    NotFetched,
    Buffered(Hit),
    Exhausted,
}

impl Lookahead {
    /// Fill the slot from `fetch` unless it already holds a result.
    pub fn fill_with(
        &mut self,
        fetch: impl FnOnce() -> Result<Option<Hit>>,
    ) -> Result<Option<&Hit>> {
        if matches!(self, Lookahead::NotFetched) {
            *self = match fetch()? {
                Some(hit) => Lookahead::Buffered(hit),
                None => Lookahead::Exhausted,
            };
        }
        Ok(self.hit())
    }

    pub fn hit(&self) -> Option<&Hit> {
        match self {
            Lookahead::Buffered(hit) => Some(hit),
            _ => None,
        }
    }

    /// Consume the buffered hit. An exhausted slot stays exhausted.
    pub fn take(&mut self) -> Option<Hit> {
        match std::mem::take(self) {
            Lookahead::Buffered(hit) => Some(hit),
            Lookahead::Exhausted => {
                *self = Lookahead::Exhausted;
                None
            }
            Lookahead::NotFetched => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Lookahead::Exhausted)
    }
}

/// A node of the operation tree.
#[derive(Debug)]
pub enum Operation {
    Relational(RelationalOp),
    Text(TextOp),
    Intersection(IntersectionOp),
    Union(UnionOp),
    NoResults,
    MatchAll,
}

impl Operation {
    pub fn intersection(children: Vec<Operation>) -> Operation {
        Operation::Intersection(IntersectionOp::new(children))
    }

    pub fn union(children: Vec<Operation>) -> Operation {
        Operation::Union(UnionOp::new(children))
    }

    pub fn optimize(self, config: &OptimizerConfig) -> Operation {
        optimize::optimize(self, config)
    }

    // ── Static properties ───────────────────────────────────────

    pub fn has_no_results(&self) -> bool {
        match self {
            Operation::Relational(op) => op.has_no_results(),
            Operation::Text(_) | Operation::MatchAll => false,
            Operation::Intersection(op) => op.children().iter().any(Operation::has_no_results),
            Operation::Union(op) => op.children().iter().all(Operation::has_no_results),
            Operation::NoResults => true,
        }
    }

    pub fn has_all_results(&self) -> bool {
        match self {
            Operation::Relational(op) => op.has_all_results(),
            Operation::Text(_) | Operation::NoResults => false,
            Operation::Intersection(op) => op.children().iter().all(Operation::has_all_results),
            Operation::Union(op) => op.children().iter().any(Operation::has_all_results),
            Operation::MatchAll => true,
        }
    }

    /// Mailboxes this subtree may run against.
    pub fn targets(&self) -> TargetSet {
        match self {
            Operation::Relational(op) => TargetSet::single(op.target().clone()),
            Operation::Text(_) | Operation::MatchAll | Operation::NoResults => {
                TargetSet::single(QueryTarget::Unspecified)
            }
            Operation::Union(op) => {
                let mut set = TargetSet::new();
                for child in op.children() {
                    set.extend(&child.targets());
                }
                if set.is_empty() {
                    set.insert(QueryTarget::Unspecified);
                }
                set
            }
            Operation::Intersection(op) => {
                let mut children = op.children().iter();
                let Some(first) = children.next() else {
                    return TargetSet::single(QueryTarget::Unspecified);
                };
                children.fold(first.targets(), |acc, child| {
                    acc.intersect_for_and(&child.targets())
                })
            }
        }
    }

    /// Copy the query part of the tree. Only valid before `begin()`.
    pub fn clone_for_rewrite(&self) -> Operation {
        match self {
            Operation::Relational(op) => Operation::Relational(op.clone_for_rewrite()),
            Operation::Text(op) => Operation::Text(op.clone_for_rewrite()),
            Operation::Intersection(op) => Operation::intersection(
                op.children().iter().map(Operation::clone_for_rewrite).collect(),
            ),
            Operation::Union(op) => {
                Operation::union(op.children().iter().map(Operation::clone_for_rewrite).collect())
            }
            Operation::NoResults => Operation::NoResults,
            Operation::MatchAll => Operation::MatchAll,
        }
    }

    // ── Trash / spam defaulting ─────────────────────────────────

    /// Whether every result path already decided whether trash and spam
    /// are searched.
    pub fn has_spam_trash_setting(&self) -> bool {
        match self {
            Operation::Relational(op) => op.has_spam_trash_setting(),
            Operation::Text(op) => op.has_spam_trash_setting(),
            Operation::Intersection(op) => {
                op.children().iter().any(Operation::has_spam_trash_setting)
            }
            Operation::Union(op) => op.children().iter().all(Operation::has_spam_trash_setting),
            Operation::NoResults => true,
            Operation::MatchAll => false,
        }
    }

    /// Exclude `excluded` folders from every result path that has not
    /// decided yet.
    pub fn ensure_spam_trash_setting(self, excluded: &[FolderId]) -> Operation {
        if self.has_spam_trash_setting() {
            return self;
        }
        match self {
            Operation::Relational(mut op) => {
                op.ensure_spam_trash_setting(excluded);
                Operation::Relational(op)
            }
            Operation::Text(text) => Operation::intersection(vec![
                Operation::Text(text),
                Operation::Relational(RelationalOp::excluding_folders(excluded)),
            ]),
            Operation::MatchAll => {
                Operation::Relational(RelationalOp::excluding_folders(excluded))
            }
            Operation::Intersection(op) => {
                let mut children = op.into_children();
                match children.iter_mut().find_map(|c| match c {
                    Operation::Relational(r) => Some(r),
                    _ => None,
                }) {
                    Some(relational) => relational.ensure_spam_trash_setting(excluded),
                    None => children.push(Operation::Relational(RelationalOp::excluding_folders(
                        excluded,
                    ))),
                }
                Operation::intersection(children)
            }
            Operation::Union(op) => Operation::union(
                op.into_children()
                    .into_iter()
                    .map(|c| c.ensure_spam_trash_setting(excluded))
                    .collect(),
            ),
            Operation::NoResults => Operation::NoResults,
        }
    }

    /// Record that trash and spam must not be excluded anywhere below.
    pub fn force_spam_trash_setting(&mut self) {
        match self {
            Operation::Relational(op) => op.force_spam_trash_setting(),
            Operation::Text(op) => op.force_spam_trash_setting(),
            Operation::Intersection(op) => {
                op.children_mut().iter_mut().for_each(Operation::force_spam_trash_setting)
            }
            Operation::Union(op) => {
                op.children_mut().iter_mut().for_each(Operation::force_spam_trash_setting)
            }
            Operation::MatchAll => {
                let mut op = RelationalOp::new();
                op.force_spam_trash_setting();
                *self = Operation::Relational(op);
            }
            Operation::NoResults => {}
        }
    }

    // ── Execution ───────────────────────────────────────────────

    /// Prepare the subtree for iteration. A bare text predicate or
    /// match-all root becomes an equivalent relational operation.
    pub fn begin(&mut self, ctx: &QueryContext<'_>) -> Result<()> {
        match self {
            Operation::Text(_) | Operation::MatchAll => {
                let relational = match std::mem::replace(self, Operation::NoResults) {
                    Operation::Text(text) => RelationalOp::from_text(text),
                    _ => RelationalOp::new(),
                };
                *self = Operation::Relational(relational);
                self.begin(ctx)
            }
            Operation::Relational(op) => op.begin(ctx),
            Operation::Intersection(op) => op.begin(ctx),
            Operation::Union(op) => op.begin(ctx),
            Operation::NoResults => Ok(()),
        }
    }

    /// The next hit without consuming it.
    pub fn peek(&mut self, ctx: &QueryContext<'_>) -> Result<Option<Hit>> {
        match self {
            Operation::Relational(op) => op.peek(ctx),
            Operation::Intersection(op) => op.peek(ctx),
            Operation::Union(op) => op.peek(ctx),
            Operation::NoResults => Ok(None),
            Operation::Text(_) | Operation::MatchAll => Err(SearchError::NotStarted),
        }
    }

    pub fn next(&mut self, ctx: &QueryContext<'_>) -> Result<Option<Hit>> {
        match self {
            Operation::Relational(op) => op.next(ctx),
            Operation::Intersection(op) => op.next(ctx),
            Operation::Union(op) => op.next(ctx),
            Operation::NoResults => Ok(None),
            Operation::Text(_) | Operation::MatchAll => Err(SearchError::NotStarted),
        }
    }

    /// Rewind to the first hit.
    pub fn reset(&mut self) -> Result<()> {
        match self {
            Operation::Relational(op) => op.reset(),
            Operation::Intersection(op) => op.reset(),
            Operation::Union(op) => op.reset(),
            Operation::NoResults => Ok(()),
            Operation::Text(_) | Operation::MatchAll => Err(SearchError::NotStarted),
        }
    }

    /// Discard up to `n` hits; returns how many were discarded.
    pub fn skip_to(&mut self, ctx: &QueryContext<'_>, n: usize) -> Result<usize> {
        let mut skipped = 0;
        while skipped < n && self.next(ctx)?.is_some() {
            skipped += 1;
        }
        Ok(skipped)
    }

    /// Release backend resources. Safe to call more than once.
    pub fn close(&mut self) {
        match self {
            Operation::Relational(op) => op.close(),
            Operation::Text(op) => op.close(),
            Operation::Intersection(op) => op.close(),
            Operation::Union(op) => op.close(),
            Operation::NoResults | Operation::MatchAll => {}
        }
    }

    pub fn result_info(&self) -> Vec<ResultInfo> {
        match self {
            Operation::Relational(op) => op.result_info(),
            Operation::Text(op) => op.result_info().to_vec(),
            Operation::Intersection(op) => collect_info(op.children()),
            Operation::Union(op) => collect_info(op.children()),
            Operation::NoResults | Operation::MatchAll => Vec::new(),
        }
    }

    /// Number of hits sorting before the cursor, when the root computed it.
    pub fn cursor_offset(&self) -> Option<usize> {
        match self {
            Operation::Relational(op) => op.cursor_offset(),
            _ => None,
        }
    }
}

fn collect_info(children: &[Operation]) -> Vec<ResultInfo> {
    let mut infos = Vec::new();
    for child in children {
        merge_result_info(&mut infos, child.result_info());
    }
    infos
}

fn write_list(f: &mut fmt::Formatter<'_>, name: &str, children: &[Operation]) -> fmt::Result {
    write!(f, "{name}(")?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{child}")?;
    }
    f.write_str(")")
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Relational(op) => write!(f, "{op}"),
            Operation::Text(op) => write!(f, "{op}"),
            Operation::Intersection(op) => write_list(f, "INTERSECTION", op.children()),
            Operation::Union(op) => write_list(f, "UNION", op.children()),
            Operation::NoResults => f.write_str("NO_RESULTS"),
            Operation::MatchAll => f.write_str("MATCH_ALL"),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::QueryContext;
    use crate::backend::memory::MemoryMailbox;
    use crate::config::PlannerConfig;
    use crate::search::SearchParams;

    /// A context that answers everything from one in-memory mailbox.
    pub fn context<'a>(
        mailbox: &'a MemoryMailbox,
        params: &'a SearchParams,
        planner: &'a PlannerConfig,
    ) -> QueryContext<'a> {
        QueryContext {
            relational: mailbox,
            text: mailbox,
            oracle: mailbox,
            params,
            planner,
            chunk_size: planner.initial_chunk_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{folders, TextField, TextPredicate};

    fn text(word: &str) -> Operation {
        Operation::Text(TextOp::new(TextPredicate::term(TextField::Content, word)))
    }

    fn local() -> Operation {
        let mut op = RelationalOp::new();
        op.top_leaf_mut().add_tag("a", true);
        op.set_target(QueryTarget::Local);
        Operation::Relational(op)
    }

    fn remote(account: &str) -> Operation {
        let mut op = RelationalOp::new();
        op.top_leaf_mut().add_tag("a", true);
        op.set_target(QueryTarget::Remote(account.into()));
        Operation::Relational(op)
    }

    #[test]
    fn test_lookahead_states() {
        let mut slot = Lookahead::default();
        assert!(slot.fill_with(|| Ok(None)).expect("fill").is_none());
        assert!(slot.is_exhausted());
        // an exhausted slot is not refilled
        assert!(slot.fill_with(|| Err(SearchError::Closed)).expect("fill").is_none());
        assert!(slot.take().is_none());
        assert!(slot.is_exhausted());
    }

    #[test]
    fn test_text_gets_trash_exclusion_sibling() {
        let op = text("x").ensure_spam_trash_setting(&[folders::TRASH, folders::SPAM]);
        assert!(matches!(op, Operation::Intersection(_)));
        assert!(op.has_spam_trash_setting());
        assert_eq!(
            op.to_string(),
            "INTERSECTION(TEXT[content:x], DB[(-IN:3,4)])"
        );
    }

    #[test]
    fn test_spam_setting_applied_per_union_branch() {
        let mut with_folder = RelationalOp::new();
        with_folder.top_leaf_mut().add_folder(folders::TRASH, true);
        let op = Operation::union(vec![Operation::Relational(with_folder), text("x")])
            .ensure_spam_trash_setting(&[folders::TRASH]);
        assert_eq!(
            op.to_string(),
            "UNION(DB[(IN:3)], INTERSECTION(TEXT[content:x], DB[(-IN:3)]))"
        );
    }

    #[test]
    fn test_targets_of_intersection_adopt_explicit_side() {
        let op = Operation::intersection(vec![text("x"), local()]);
        assert_eq!(op.targets(), TargetSet::single(QueryTarget::Local));

        let conflicting = Operation::intersection(vec![local(), remote("a")]);
        assert!(conflicting.targets().is_empty());
    }

    #[test]
    fn test_union_targets_collect_children() {
        let op = Operation::union(vec![local(), remote("a"), remote("a")]);
        assert_eq!(op.targets().explicit_count(), 2);
    }

    #[test]
    fn test_unstarted_text_cannot_be_iterated() {
        let mut op = text("x");
        assert!(matches!(op.reset(), Err(SearchError::NotStarted)));
    }

    #[test]
    fn test_static_result_properties() {
        assert!(Operation::union(vec![Operation::NoResults, Operation::NoResults]).has_no_results());
        assert!(!Operation::intersection(vec![Operation::MatchAll, text("x")]).has_spam_trash_setting());
        assert!(Operation::union(vec![text("x"), Operation::MatchAll]).has_all_results());
    }
}
