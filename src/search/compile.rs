//! Structured query clauses and their translation into operation trees.
//!
//! A [`Clause`] tree is the parsed form of a search query. Compiling it
//! pushes every negation down to the leaves, so the resulting
//! [`Operation`] only contains positive AND / OR nodes over relational and
//! text operands.
//!
//! # JSON form
//!
//! ```json
//! {"and": [
//!     {"in-folder": 2},
//!     {"not": {"tag": "newsletter"}},
//!     {"range": {"kind": "date", "min": "2024-01", "max": "2024-06"}},
//!     {"text": {"term": {"field": "content", "text": "invoice"}}}
//! ]}
//! ```

use std::ops::Bound;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constraint::{Range, RangeKind, RangeValue, RemoteFolder};
use crate::model::{FolderId, ItemRef, ItemType, QueryTarget, TextPredicate};
use crate::ops::{Operation, RelationalOp, TextOp};

/// One node of a structured query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Clause {
    And(Vec<Clause>),
    Or(Vec<Clause>),
    Not(Box<Clause>),
    InFolder(FolderId),
    InRemoteFolder(RemoteFolder),
    Tag(String),
    Conversation(ItemRef),
    Item(ItemRef),
    Type(ItemType),
    Range(RangeClause),
    /// Search every folder, trash and spam included.
    Anywhere,
    Text(TextPredicate),
}

/// Bounds on one item field. Dates may be given as epoch millis, as
/// `YYYY-MM-DD`, `YYYY-MM` or `YYYY` (the whole period), or as RFC 3339
/// timestamps; sizes as bytes or with a `kb` / `mb` / `gb` suffix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeClause {
    pub kind: RangeKind,
    #[serde(default)]
    pub min: Option<RangeValue>,
    #[serde(default = "inclusive")]
    pub min_inclusive: bool,
    #[serde(default)]
    pub max: Option<RangeValue>,
    #[serde(default = "inclusive")]
    pub max_inclusive: bool,
}

fn inclusive() -> bool {
    true
}

impl Clause {
    pub fn and(clauses: impl IntoIterator<Item = Clause>) -> Clause {
        Clause::And(clauses.into_iter().collect())
    }

    pub fn or(clauses: impl IntoIterator<Item = Clause>) -> Clause {
        Clause::Or(clauses.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(clause: Clause) -> Clause {
        Clause::Not(Box::new(clause))
    }

    pub fn tag(name: impl Into<String>) -> Clause {
        Clause::Tag(name.into())
    }

    pub fn text(predicate: TextPredicate) -> Clause {
        Clause::Text(predicate)
    }

    pub fn range(kind: RangeKind, min: Option<RangeValue>, max: Option<RangeValue>) -> Clause {
        Clause::Range(RangeClause {
            kind,
            min,
            min_inclusive: true,
            max,
            max_inclusive: true,
        })
    }
}

/// Translate a clause tree into an (unoptimized) operation tree.
pub fn compile(clause: &Clause) -> Operation {
    compile_with(clause, true)
}

fn compile_with(clause: &Clause, truth: bool) -> Operation {
    match clause {
        Clause::And(children) => combine(children, truth, truth),
        Clause::Or(children) => combine(children, !truth, truth),
        Clause::Not(inner) => compile_with(inner, !truth),
        Clause::InFolder(folder) => relational(truth, QueryTarget::Local, |op| {
            op.top_leaf_mut().add_folder(*folder, truth)
        }),
        Clause::InRemoteFolder(folder) => {
            let target = QueryTarget::Remote(folder.folder.account.clone());
            relational(truth, target, |op| {
                op.top_leaf_mut().add_remote_folder(folder.clone(), truth)
            })
        }
        Clause::Tag(tag) => relational(truth, QueryTarget::Unspecified, |op| {
            op.top_leaf_mut().add_tag(tag.clone(), truth)
        }),
        Clause::Conversation(ItemRef::Local(id)) => relational(truth, QueryTarget::Local, |op| {
            op.top_leaf_mut().add_conversation(*id, truth)
        }),
        Clause::Conversation(ItemRef::Remote(id)) => {
            let target = QueryTarget::Remote(id.account.clone());
            relational(truth, target, |op| {
                op.top_leaf_mut().add_remote_conversation(id.clone(), truth)
            })
        }
        Clause::Item(ItemRef::Local(id)) => relational(truth, QueryTarget::Local, |op| {
            op.top_leaf_mut().add_item_id(*id, truth)
        }),
        Clause::Item(ItemRef::Remote(id)) => {
            let target = QueryTarget::Remote(id.account.clone());
            relational(truth, target, |op| {
                op.top_leaf_mut().add_remote_item_id(id.clone(), truth)
            })
        }
        Clause::Type(item_type) => relational(truth, QueryTarget::Unspecified, |op| {
            op.top_leaf_mut().add_type(*item_type, truth)
        }),
        Clause::Range(range) => match range_of(range) {
            Some(r) => {
                let r = if truth { r } else { r.negate() };
                relational(truth, QueryTarget::Unspecified, |op| {
                    op.top_leaf_mut().add_range(range.kind, r)
                })
            }
            None => {
                warn!(kind = %range.kind, "Unreadable range bound, clause matches nothing");
                if truth {
                    Operation::NoResults
                } else {
                    Operation::MatchAll
                }
            }
        },
        Clause::Anywhere => {
            if truth {
                let mut op = RelationalOp::new();
                op.force_spam_trash_setting();
                Operation::Relational(op)
            } else {
                Operation::NoResults
            }
        }
        Clause::Text(predicate) => {
            let predicate = if truth {
                predicate.clone()
            } else {
                predicate.clone().negate()
            };
            Operation::Text(TextOp::new(predicate))
        }
    }
}

/// AND (`conjunction`) or OR the compiled children.
fn combine(children: &[Clause], conjunction: bool, truth: bool) -> Operation {
    let ops: Vec<Operation> = children.iter().map(|c| compile_with(c, truth)).collect();
    match (conjunction, ops.len()) {
        (true, 0) => Operation::MatchAll,
        (false, 0) => Operation::NoResults,
        (true, _) => Operation::intersection(ops),
        (false, _) => Operation::union(ops),
    }
}

/// A relational leaf operation. Positive clauses about a specific
/// mailbox pin the operation to it.
fn relational(truth: bool, target: QueryTarget, build: impl FnOnce(&mut RelationalOp)) -> Operation {
    let mut op = RelationalOp::new();
    build(&mut op);
    if truth {
        op.set_target(target);
    }
    Operation::Relational(op)
}

// ── Range bounds ────────────────────────────────────────────────

fn range_of(clause: &RangeClause) -> Option<Range> {
    let min = match clause.min {
        Some(ref v) => lower_bound(clause.kind, v, clause.min_inclusive)?,
        None => Bound::Unbounded,
    };
    let max = match clause.max {
        Some(ref v) => upper_bound(clause.kind, v, clause.max_inclusive)?,
        None => Bound::Unbounded,
    };
    Some(Range::new(min, max))
}

fn lower_bound(kind: RangeKind, value: &RangeValue, inclusive: bool) -> Option<Bound<RangeValue>> {
    if let (true, RangeValue::Str(s)) = (is_date(kind), value) {
        let (start, next) = parse_date_period(s)?;
        return Some(Bound::Included(RangeValue::Long(if inclusive { start } else { next })));
    }
    let value = normalize(kind, value)?;
    Some(if inclusive {
        Bound::Included(value)
    } else {
        Bound::Excluded(value)
    })
}

fn upper_bound(kind: RangeKind, value: &RangeValue, inclusive: bool) -> Option<Bound<RangeValue>> {
    if let (true, RangeValue::Str(s)) = (is_date(kind), value) {
        let (start, next) = parse_date_period(s)?;
        return Some(Bound::Excluded(RangeValue::Long(if inclusive { next } else { start })));
    }
    let value = normalize(kind, value)?;
    Some(if inclusive {
        Bound::Included(value)
    } else {
        Bound::Excluded(value)
    })
}

fn is_date(kind: RangeKind) -> bool {
    matches!(
        kind,
        RangeKind::Date | RangeKind::ModifyDate | RangeKind::CalendarStart | RangeKind::CalendarEnd
    )
}

fn normalize(kind: RangeKind, value: &RangeValue) -> Option<RangeValue> {
    match (kind, value) {
        (RangeKind::Size, RangeValue::Str(s)) => parse_size(s).map(RangeValue::Long),
        (k, RangeValue::Str(s)) if k.is_numeric() => s.trim().parse().ok().map(RangeValue::Long),
        (k, RangeValue::Str(s)) if !k.is_numeric() => Some(RangeValue::Str(s.to_lowercase())),
        (k, RangeValue::Long(_)) if !k.is_numeric() => None,
        (_, v) => Some(v.clone()),
    }
}

/// Epoch millis of the start of the period named by `s` and of the start
/// of the period after it.
fn parse_date_period(s: &str) -> Option<(i64, i64)> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<i64>() {
        return Some((ms, ms + 1));
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        let ms = ts.with_timezone(&Utc).timestamp_millis();
        return Some((ms, ms + 1));
    }
    let parts: Vec<&str> = s.split('-').collect();
    let (start, next) = match parts.as_slice() {
        [y, m, d] => {
            let day = NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?)?;
            (day, day.succ_opt()?)
        }
        [y, m] => {
            let year: i32 = y.parse().ok()?;
            let month: u32 = m.parse().ok()?;
            let (ny, nm) = if month == 12 {
                (year + 1, 1)
            } else {
                (year, month + 1)
            };
            (
                NaiveDate::from_ymd_opt(year, month, 1)?,
                NaiveDate::from_ymd_opt(ny, nm, 1)?,
            )
        }
        [y] => {
            let year: i32 = y.parse().ok()?;
            (
                NaiveDate::from_ymd_opt(year, 1, 1)?,
                NaiveDate::from_ymd_opt(year + 1, 1, 1)?,
            )
        }
        _ => return None,
    };
    Some((day_start_millis(start)?, day_start_millis(next)?))
}

fn day_start_millis(day: NaiveDate) -> Option<i64> {
    Some(day.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
}

/// Parse a size like `100kb`, `2mb` or `512`.
fn parse_size(value: &str) -> Option<i64> {
    let lower = value.trim().to_lowercase();
    let (num, multiplier) = if let Some(n) = lower.strip_suffix("gb") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("mb") {
        (n, 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("kb") {
        (n, 1024)
    } else if let Some(n) = lower.strip_suffix('b') {
        (n, 1i64)
    } else {
        (lower.as_str(), 1i64)
    };
    num.trim().parse::<i64>().ok()?.checked_mul(multiplier)
}
