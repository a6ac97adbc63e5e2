//! Where a (sub)query is executed.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The mailbox a query operand runs against.
///
/// `Unspecified` operands can run anywhere; every other variant is an
/// explicit target.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryTarget {
    #[default]
    Unspecified,
    /// The mailbox being searched.
    Local,
    /// Some remote mailbox, not yet resolved.
    AnyRemote,
    /// The mailbox of the named account.
    Remote(String),
}

impl QueryTarget {
    pub fn is_explicit(&self) -> bool {
        !matches!(self, QueryTarget::Unspecified)
    }
}

impl fmt::Display for QueryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryTarget::Unspecified => f.write_str("unspecified"),
            QueryTarget::Local => f.write_str("local"),
            QueryTarget::AnyRemote => f.write_str("remote"),
            QueryTarget::Remote(account) => write!(f, "remote:{account}"),
        }
    }
}

/// The set of targets a subtree may execute against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSet(BTreeSet<QueryTarget>);

impl TargetSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(target: QueryTarget) -> Self {
        Self(BTreeSet::from([target]))
    }

    pub fn insert(&mut self, target: QueryTarget) {
        self.0.insert(target);
    }

    pub fn extend(&mut self, other: &TargetSet) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_unspecified(&self) -> bool {
        self.0.contains(&QueryTarget::Unspecified)
    }

    pub fn contains(&self, target: &QueryTarget) -> bool {
        self.0.contains(target)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueryTarget> {
        self.0.iter()
    }

    /// Number of explicit (non-`Unspecified`) targets.
    pub fn explicit_count(&self) -> usize {
        self.0.iter().filter(|t| t.is_explicit()).count()
    }

    /// Whether the two sets share at least one target.
    pub fn overlaps(&self, other: &TargetSet) -> bool {
        self.0.iter().any(|t| other.0.contains(t))
    }

    /// Combine the target sets of two ANDed operands.
    ///
    /// An unspecified operand runs wherever its sibling runs, so it adopts
    /// the other side's targets; two explicit sets intersect and may come
    /// out empty, meaning the conjunction can never match.
    pub fn intersect_for_and(&self, other: &TargetSet) -> TargetSet {
        if self.has_unspecified() {
            if other.has_unspecified() {
                let mut merged = self.clone();
                merged.extend(other);
                merged
            } else {
                other.clone()
            }
        } else if other.has_unspecified() {
            self.clone()
        } else {
            TargetSet(self.0.intersection(&other.0).cloned().collect())
        }
    }
}

impl FromIterator<QueryTarget> for TargetSet {
    fn from_iter<I: IntoIterator<Item = QueryTarget>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for TargetSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, t) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{t}")?;
        }
        f.write_str("}")
    }
}
