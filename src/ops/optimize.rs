//! Rewrites an operation tree into a cheaper equivalent.
//!
//! Each node is simplified bottom-up: results that can never match are
//! dropped, nested nodes of the same kind are flattened, compatible
//! siblings are fused into one backend query, unions are distributed over
//! intersections so that every branch runs against a single mailbox, and
//! a text predicate is joined into its relational sibling.

use tracing::debug;

use crate::config::{DistributionPolicy, OptimizerConfig};
use crate::model::{QueryTarget, TargetSet};

use super::relational::RelationalOp;
use super::union::UnionOp;
use super::{Combine, Operation};

/// Optimize `op`. Running the result through again changes nothing.
pub fn optimize(op: Operation, config: &OptimizerConfig) -> Operation {
    let optimized = optimize_node(op, config);
    debug_assert!(
        matches!(optimized, Operation::Union(_)) || optimized.targets().explicit_count() <= 1,
        "operation {optimized} runs against several mailboxes"
    );
    debug!(tree = %optimized, "Optimized operation tree");
    optimized
}

fn optimize_node(op: Operation, config: &OptimizerConfig) -> Operation {
    match op {
        Operation::Relational(relational) => simplify_relational(relational),
        Operation::Intersection(op) => optimize_intersection(op.into_children(), config),
        Operation::Union(op) => optimize_union(op.into_children(), config),
        other => other,
    }
}

fn simplify_relational(mut op: RelationalOp) -> Operation {
    if op.has_no_results() {
        return Operation::NoResults;
    }
    op.optimize_constraints();
    if op.has_no_results() {
        return Operation::NoResults;
    }
    Operation::Relational(op)
}

// ── Union ───────────────────────────────────────────────────────

fn optimize_union(children: Vec<Operation>, config: &OptimizerConfig) -> Operation {
    let mut flat = Vec::with_capacity(children.len());
    for child in children {
        match optimize_node(child, config) {
            Operation::NoResults => {}
            Operation::MatchAll => return Operation::MatchAll,
            Operation::Union(nested) => flat.extend(nested.into_children()),
            other => flat.push(other),
        }
    }
    match fuse_pairs(flat, Combine::Or) {
        Some(fused) => collapse(fused, Combine::Or),
        None => Operation::MatchAll,
    }
}

// ── Intersection ────────────────────────────────────────────────

fn optimize_intersection(children: Vec<Operation>, config: &OptimizerConfig) -> Operation {
    let mut flat = Vec::with_capacity(children.len());
    for child in children {
        match optimize_node(child, config) {
            Operation::NoResults => return Operation::NoResults,
            Operation::MatchAll => {}
            Operation::Intersection(nested) => flat.extend(nested.into_children()),
            other => flat.push(other),
        }
    }
    if flat.is_empty() {
        return Operation::MatchAll;
    }
    let Some(mut flat) = fuse_pairs(flat, Combine::And) else {
        return Operation::NoResults;
    };

    if and_targets(flat.iter()).is_empty() {
        debug!("Intersection spans disjoint mailboxes");
        return Operation::NoResults;
    }

    let mut pruned = false;
    for i in 0..flat.len() {
        if !matches!(flat[i], Operation::Union(_)) {
            continue;
        }
        let siblings = and_targets(
            flat.iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, op)| op),
        );
        if let Operation::Union(ref mut union) = flat[i] {
            pruned |= union.prune_incompatible_targets(&siblings);
        }
    }
    if pruned {
        return optimize_intersection(flat, config);
    }

    if let Some(pos) = flat
        .iter()
        .position(|c| matches!(c, Operation::Union(u) if should_distribute(u, config)))
    {
        let Operation::Union(union) = flat.remove(pos) else {
            return Operation::NoResults;
        };
        debug!(branches = union.len(), "Distributing union over intersection");
        let branches = union
            .into_children()
            .into_iter()
            .map(|branch| {
                let mut parts: Vec<Operation> =
                    flat.iter().map(Operation::clone_for_rewrite).collect();
                parts.insert(pos, branch);
                Operation::intersection(parts)
            })
            .collect();
        return optimize_union(branches, config);
    }

    fuse_text(&mut flat);
    collapse(flat, Combine::And)
}

/// Targets of the conjunction of `ops`.
fn and_targets<'a>(ops: impl Iterator<Item = &'a Operation>) -> TargetSet {
    ops.fold(TargetSet::single(QueryTarget::Unspecified), |acc, op| {
        acc.intersect_for_and(&op.targets())
    })
}

fn should_distribute(union: &UnionOp, config: &OptimizerConfig) -> bool {
    let mut targets = TargetSet::new();
    for child in union.children() {
        targets.extend(&child.targets());
    }
    if targets.explicit_count() > 1 {
        return true;
    }
    config.distribution == DistributionPolicy::Always
        && union.len() <= config.max_distribution_fanout
}

/// Join the text operand into the relational operand, when both exist.
fn fuse_text(children: &mut Vec<Operation>) {
    let Some(text_pos) = children.iter().position(|c| matches!(c, Operation::Text(_))) else {
        return;
    };
    if !children.iter().any(|c| matches!(c, Operation::Relational(_))) {
        return;
    }
    let Operation::Text(text) = children.remove(text_pos) else {
        return;
    };
    if let Some(Operation::Relational(relational)) = children
        .iter_mut()
        .find(|c| matches!(c, Operation::Relational(_)))
    {
        relational.fuse_text(text);
    }
}

// ── Pairwise fusion ─────────────────────────────────────────────

/// Fuse siblings pairwise until no pair can be fused. `None` means the
/// whole node collapsed: nothing matches (AND) or everything does (OR).
fn fuse_pairs(mut children: Vec<Operation>, how: Combine) -> Option<Vec<Operation>> {
    let mut i = 0;
    'outer: while i < children.len() {
        let mut j = i + 1;
        while j < children.len() {
            if !can_combine(&children[i], &children[j], how) {
                j += 1;
                continue;
            }
            let other = children.remove(j);
            let this = std::mem::replace(&mut children[i], Operation::NoResults);
            match (how, combine(this, other, how)) {
                (Combine::And, Operation::NoResults) => return None,
                (Combine::Or, Operation::MatchAll) => return None,
                (Combine::Or, Operation::NoResults) | (Combine::And, Operation::MatchAll) => {
                    children.remove(i);
                    continue 'outer;
                }
                (_, merged) => {
                    children[i] = merged;
                    j = i + 1;
                }
            }
        }
        i += 1;
    }
    Some(children)
}

/// An all-results relational operand that runs anywhere.
fn is_unrestricted(op: &Operation) -> bool {
    matches!(op, Operation::Relational(r) if r.has_all_results() && !r.target().is_explicit())
}

fn can_combine(a: &Operation, b: &Operation, how: Combine) -> bool {
    match (a, b) {
        (Operation::NoResults | Operation::MatchAll, _)
        | (_, Operation::NoResults | Operation::MatchAll) => true,
        (Operation::Relational(x), Operation::Relational(y)) => match how {
            Combine::And => true,
            Combine::Or => x.can_disjoin(y),
        },
        (Operation::Text(_), Operation::Text(_)) => true,
        _ => how == Combine::And && (is_unrestricted(a) || is_unrestricted(b)),
    }
}

fn combine(a: Operation, b: Operation, how: Combine) -> Operation {
    match (a, b) {
        (Operation::NoResults, other) | (other, Operation::NoResults) => match how {
            Combine::And => Operation::NoResults,
            Combine::Or => other,
        },
        (Operation::MatchAll, other) | (other, Operation::MatchAll) => match how {
            Combine::And => other,
            Combine::Or => Operation::MatchAll,
        },
        (Operation::Relational(x), Operation::Relational(y)) => match how {
            Combine::And => match x.conjoin(y) {
                Some(merged) => simplify_relational(merged),
                None => Operation::NoResults,
            },
            Combine::Or => simplify_relational(x.disjoin(y)),
        },
        (Operation::Text(x), Operation::Text(y)) => Operation::Text(x.combine(y, how)),
        (a, b) => {
            let (all, mut other) = if is_unrestricted(&a) { (a, b) } else { (b, a) };
            if all.has_spam_trash_setting() {
                other.force_spam_trash_setting();
            }
            other
        }
    }
}

fn collapse(mut children: Vec<Operation>, how: Combine) -> Operation {
    match (children.len(), how) {
        (0, Combine::And) => Operation::MatchAll,
        (0, Combine::Or) => Operation::NoResults,
        (1, _) => children.remove(0),
        (_, Combine::And) => Operation::intersection(children),
        (_, Combine::Or) => Operation::union(children),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TextField, TextPredicate};
    use crate::ops::TextOp;

    fn cfg() -> OptimizerConfig {
        OptimizerConfig::default()
    }

    fn tag(name: &str) -> Operation {
        let mut op = RelationalOp::new();
        op.top_leaf_mut().add_tag(name, true);
        Operation::Relational(op)
    }

    fn tag_at(name: &str, target: QueryTarget) -> Operation {
        let mut op = RelationalOp::new();
        op.top_leaf_mut().add_tag(name, true);
        op.set_target(target);
        Operation::Relational(op)
    }

    fn text(word: &str) -> Operation {
        Operation::Text(TextOp::new(TextPredicate::term(TextField::Content, word)))
    }

    fn remote(account: &str) -> QueryTarget {
        QueryTarget::Remote(account.into())
    }

    fn assert_no_single_child(op: &Operation) {
        let children = match op {
            Operation::Intersection(i) => i.children(),
            Operation::Union(u) => u.children(),
            _ => return,
        };
        assert!(children.len() > 1, "single-child node in {op}");
        children.iter().for_each(assert_no_single_child);
    }

    fn complex() -> Operation {
        Operation::intersection(vec![
            text("budget"),
            Operation::union(vec![tag("a"), tag("b"), Operation::NoResults]),
            Operation::intersection(vec![Operation::MatchAll, tag("c")]),
        ])
    }

    #[test]
    fn test_optimize_is_idempotent() {
        let once = complex().optimize(&cfg());
        let rendered = once.to_string();
        let twice = once.optimize(&cfg());
        assert_eq!(twice.to_string(), rendered);
    }

    #[test]
    fn test_no_single_child_nodes_remain() {
        let op = Operation::union(vec![
            Operation::intersection(vec![tag("a")]),
            Operation::union(vec![Operation::intersection(vec![text("x")])]),
        ])
        .optimize(&cfg());
        assert_no_single_child(&op);
        assert_no_single_child(&complex().optimize(&cfg()));
    }

    #[test]
    fn test_conflicting_targets_match_nothing() {
        let op = Operation::intersection(vec![tag_at("a", QueryTarget::Local), tag_at("b", remote("x"))])
            .optimize(&cfg());
        assert!(matches!(op, Operation::NoResults));
    }

    #[test]
    fn test_text_is_fused_into_relational_sibling() {
        let op = Operation::intersection(vec![text("x"), tag("a")]).optimize(&cfg());
        assert_eq!(op.to_string(), "(TEXT[content:x] AND DB[(TAG:a)])");
    }

    #[test]
    fn test_identities() {
        let op = Operation::intersection(vec![Operation::MatchAll, tag("a")]).optimize(&cfg());
        assert_eq!(op.to_string(), "DB[(TAG:a)]");
        let op = Operation::union(vec![Operation::NoResults, tag("a")]).optimize(&cfg());
        assert_eq!(op.to_string(), "DB[(TAG:a)]");
        let op = Operation::union(vec![Operation::MatchAll, tag("a")]).optimize(&cfg());
        assert!(matches!(op, Operation::MatchAll));
        let op = Operation::intersection(vec![Operation::NoResults, tag("a")]).optimize(&cfg());
        assert!(matches!(op, Operation::NoResults));
    }

    #[test]
    fn test_relational_siblings_are_merged() {
        let op = Operation::union(vec![tag("a"), tag("b")]).optimize(&cfg());
        assert_eq!(op.to_string(), "DB[((TAG:a) OR (TAG:b))]");
        let op = Operation::intersection(vec![tag("a"), tag("b")]).optimize(&cfg());
        assert_eq!(op.to_string(), "DB[(TAG:a,b)]");
    }

    #[test]
    fn test_multi_target_union_is_distributed() {
        let config = OptimizerConfig {
            distribution: DistributionPolicy::MultiTarget,
            ..OptimizerConfig::default()
        };
        let op = Operation::intersection(vec![
            text("x"),
            Operation::union(vec![tag_at("a", QueryTarget::Local), tag_at("b", remote("r"))]),
        ])
        .optimize(&config);
        assert_eq!(
            op.to_string(),
            "UNION((TEXT[content:x] AND DB@local[(TAG:a)]), (TEXT[content:x] AND DB@remote:r[(TAG:b)]))"
        );
    }

    #[test]
    fn test_single_target_union_kept_under_multi_target_policy() {
        let config = OptimizerConfig {
            distribution: DistributionPolicy::MultiTarget,
            ..OptimizerConfig::default()
        };
        let op = Operation::intersection(vec![
            text("x"),
            Operation::union(vec![tag("a"), text("y")]),
        ])
        .optimize(&config);
        assert!(matches!(op, Operation::Intersection(_)), "{op}");
    }

    #[test]
    fn test_union_pruned_against_sibling_target() {
        let op = Operation::intersection(vec![
            tag_at("a", remote("r")),
            Operation::union(vec![
                tag_at("b", QueryTarget::Local),
                tag_at("c", remote("r")),
                text("t"),
            ]),
        ])
        .optimize(&cfg());
        assert!(!op.to_string().contains("local"), "{op}");
        assert_no_single_child(&op);
    }
}
