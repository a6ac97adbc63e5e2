//! Boolean combinations of relational predicates.
//!
//! A [`ConstraintTree`] is what a relational operation hands to the
//! relational backend. Leaves hold conjunctions of simple predicates;
//! interior nodes combine them with AND / OR. Contradictions never raise:
//! they mark the affected leaf as matching nothing, and that propagates
//! upwards through [`ConstraintTree::has_no_results`].

pub mod leaf;
pub mod range;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::model::{FolderId, ItemType};

pub use leaf::{Leaf, RemoteFolder};
pub use range::{CursorRange, Range, RangeKind, RangeValue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintTree {
    Leaf(Leaf),
    Intersection(Vec<ConstraintTree>),
    Union(Vec<ConstraintTree>),
}

impl Default for ConstraintTree {
    fn default() -> Self {
        ConstraintTree::Leaf(Leaf::default())
    }
}

impl From<Leaf> for ConstraintTree {
    fn from(leaf: Leaf) -> Self {
        ConstraintTree::Leaf(leaf)
    }
}

impl ConstraintTree {
    /// A tree that matches nothing.
    pub fn no_results() -> Self {
        ConstraintTree::Leaf(Leaf::no_results())
    }

    /// The identity of `and`: no predicates and no bookkeeping flags.
    fn is_and_identity(&self) -> bool {
        matches!(self, ConstraintTree::Leaf(l) if l.is_empty() && !l.spam_trash_setting)
    }

    /// Conjunction. Leaf predicates are merged into the first leaf child of
    /// an intersection; unions are kept verbatim as children.
    pub fn and(self, other: ConstraintTree) -> ConstraintTree {
        if other.is_and_identity() {
            return self;
        }
        if self.is_and_identity() {
            return other;
        }
        match (self, other) {
            (ConstraintTree::Leaf(mut a), ConstraintTree::Leaf(b)) => {
                a.and(b);
                ConstraintTree::Leaf(a)
            }
            (ConstraintTree::Intersection(mut children), other) => {
                and_into(&mut children, other);
                ConstraintTree::Intersection(children)
            }
            (this, ConstraintTree::Intersection(mut children)) => {
                and_into(&mut children, this);
                ConstraintTree::Intersection(children)
            }
            (this, other) => ConstraintTree::Intersection(vec![this, other]),
        }
    }

    /// Disjunction. Unions are flattened; an operand that can never match
    /// is dropped.
    pub fn or(self, other: ConstraintTree) -> ConstraintTree {
        if other.has_no_results() {
            return self;
        }
        if self.has_no_results() {
            return other;
        }
        match (self, other) {
            (ConstraintTree::Union(mut children), ConstraintTree::Union(more)) => {
                children.extend(more);
                ConstraintTree::Union(children)
            }
            (ConstraintTree::Union(mut children), other) => {
                children.push(other);
                ConstraintTree::Union(children)
            }
            (this, ConstraintTree::Union(mut children)) => {
                children.insert(0, this);
                ConstraintTree::Union(children)
            }
            (this, other) => ConstraintTree::Union(vec![this, other]),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ConstraintTree::Leaf(l) => l.is_empty(),
            ConstraintTree::Intersection(children) | ConstraintTree::Union(children) => {
                children.iter().all(ConstraintTree::is_empty)
            }
        }
    }

    pub fn has_no_results(&self) -> bool {
        match self {
            ConstraintTree::Leaf(l) => l.no_results,
            ConstraintTree::Intersection(children) => {
                children.iter().any(ConstraintTree::has_no_results)
            }
            ConstraintTree::Union(children) => children.iter().all(ConstraintTree::has_no_results),
        }
    }

    /// Simplify the tree: factor shared item types out of unions, merge
    /// folder-only alternatives, and collapse single-child nodes.
    pub fn optimize(self) -> ConstraintTree {
        match self {
            ConstraintTree::Leaf(l) => ConstraintTree::Leaf(l),
            ConstraintTree::Intersection(children) => {
                let mut children: Vec<_> =
                    children.into_iter().map(ConstraintTree::optimize).collect();
                if children.len() == 1 {
                    children.remove(0)
                } else {
                    ConstraintTree::Intersection(children)
                }
            }
            ConstraintTree::Union(children) => {
                optimize_union(children.into_iter().map(ConstraintTree::optimize).collect())
            }
        }
    }

    /// The leaf new ANDed predicates go into, creating one when the root is
    /// not a leaf.
    pub fn top_leaf_mut(&mut self) -> &mut Leaf {
        if let ConstraintTree::Union(_) = self {
            let union = std::mem::take(self);
            *self = ConstraintTree::Intersection(vec![ConstraintTree::Leaf(Leaf::new()), union]);
        }
        match self {
            ConstraintTree::Leaf(l) => l,
            ConstraintTree::Intersection(children) => {
                let pos = match children.iter().position(|c| matches!(c, ConstraintTree::Leaf(_))) {
                    Some(pos) => pos,
                    None => {
                        children.insert(0, ConstraintTree::Leaf(Leaf::new()));
                        0
                    }
                };
                match &mut children[pos] {
                    ConstraintTree::Leaf(l) => l,
                    _ => unreachable!("position() located a leaf"),
                }
            }
            ConstraintTree::Union(_) => unreachable!("unions were wrapped above"),
        }
    }

    /// Restrict results to the given item types.
    pub fn set_types(&mut self, types: &BTreeSet<ItemType>) {
        if !types.is_empty() {
            self.top_leaf_mut().set_types(types);
        }
    }

    pub fn has_spam_trash_setting(&self) -> bool {
        match self {
            ConstraintTree::Leaf(l) => l.has_spam_trash_setting(),
            ConstraintTree::Intersection(children) => {
                children.iter().any(ConstraintTree::has_spam_trash_setting)
            }
            ConstraintTree::Union(children) => {
                children.iter().all(ConstraintTree::has_spam_trash_setting)
            }
        }
    }

    /// Exclude `excluded` folders wherever no trash/spam decision was made
    /// yet. Every union branch decides on its own.
    pub fn ensure_spam_trash_setting(&mut self, excluded: &[FolderId]) {
        match self {
            ConstraintTree::Leaf(l) => l.ensure_spam_trash_setting(excluded),
            ConstraintTree::Intersection(_) => {
                if !self.has_spam_trash_setting() {
                    self.top_leaf_mut().ensure_spam_trash_setting(excluded);
                }
            }
            ConstraintTree::Union(children) => {
                for child in children {
                    child.ensure_spam_trash_setting(excluded);
                }
            }
        }
    }

    /// Record that trash/spam defaulting must not be applied.
    pub fn force_spam_trash_setting(&mut self) {
        match self {
            ConstraintTree::Union(children) => {
                for child in children {
                    child.force_spam_trash_setting();
                }
            }
            _ => self.top_leaf_mut().spam_trash_setting = true,
        }
    }

    /// Whether the constraints pin a conversation or explicit items.
    pub fn prefers_relational_first(&self) -> bool {
        match self {
            ConstraintTree::Leaf(l) => l.pins_items(),
            ConstraintTree::Intersection(children) => children
                .iter()
                .any(|c| matches!(c, ConstraintTree::Leaf(l) if l.pins_items())),
            ConstraintTree::Union(_) => false,
        }
    }
}

fn and_into(children: &mut Vec<ConstraintTree>, other: ConstraintTree) {
    match other {
        ConstraintTree::Leaf(leaf) => {
            match children.iter_mut().find_map(|c| match c {
                ConstraintTree::Leaf(l) => Some(l),
                _ => None,
            }) {
                Some(existing) => existing.and(leaf),
                None => children.push(ConstraintTree::Leaf(leaf)),
            }
        }
        ConstraintTree::Intersection(more) => {
            for child in more {
                and_into(children, child);
            }
        }
        union @ ConstraintTree::Union(_) => children.push(union),
    }
}

fn optimize_union(children: Vec<ConstraintTree>) -> ConstraintTree {
    let mut children = factor_types(children);
    merge_folder_leaves(&mut children);
    if children.len() == 1 {
        children.remove(0)
    } else {
        ConstraintTree::Union(children)
    }
}

/// Pull a type set shared by more than two leaf alternatives out of the
/// union: `(T & a) | (T & b) | (T & c)` becomes `T & (a | b | c)`.
fn factor_types(children: Vec<ConstraintTree>) -> Vec<ConstraintTree> {
    let mut groups: BTreeMap<BTreeSet<ItemType>, Vec<usize>> = BTreeMap::new();
    for (i, child) in children.iter().enumerate() {
        if let ConstraintTree::Leaf(l) = child {
            if !l.types.is_empty() && !l.no_results {
                groups.entry(l.types.clone()).or_default().push(i);
            }
        }
    }
    groups.retain(|_, members| members.len() > 2);
    if groups.is_empty() {
        return children;
    }

    let mut slots: Vec<Option<ConstraintTree>> = children.into_iter().map(Some).collect();
    let mut result = Vec::new();
    for (types, members) in groups {
        let residual = members
            .iter()
            .filter_map(|&i| match slots[i].take() {
                Some(ConstraintTree::Leaf(mut l)) => {
                    l.types.clear();
                    Some(ConstraintTree::Leaf(l))
                }
                other => other,
            })
            .collect();
        let types_leaf = Leaf {
            types,
            ..Leaf::default()
        };
        result.push(ConstraintTree::Intersection(vec![
            ConstraintTree::Leaf(types_leaf),
            optimize_union(residual),
        ]));
    }
    result.extend(slots.into_iter().flatten());
    result
}

/// Merge alternatives that only constrain the folder into one leaf.
fn merge_folder_leaves(children: &mut Vec<ConstraintTree>) {
    let folder_only: Vec<usize> = children
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, ConstraintTree::Leaf(l) if l.is_folder_only()))
        .map(|(i, _)| i)
        .collect();
    if folder_only.len() < 2 {
        return;
    }
    let mut merged = Leaf::new();
    for &i in &folder_only {
        if let ConstraintTree::Leaf(l) = &children[i] {
            merged.folders.extend(l.folders.iter().copied());
            merged.spam_trash_setting |= l.spam_trash_setting;
        }
    }
    let first = folder_only[0];
    for &i in folder_only.iter().skip(1).rev() {
        children.remove(i);
    }
    children[first] = ConstraintTree::Leaf(merged);
}

impl fmt::Display for ConstraintTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (children, op) = match self {
            ConstraintTree::Leaf(l) => return write!(f, "{l}"),
            ConstraintTree::Intersection(children) => (children, " AND "),
            ConstraintTree::Union(children) => (children, " OR "),
        };
        f.write_str("(")?;
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                f.write_str(op)?;
            }
            write!(f, "{child}")?;
        }
        f.write_str(")")
    }
}
