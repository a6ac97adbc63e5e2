//! Range predicates over numeric and string item fields.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

use serde::{Deserialize, Serialize};

use crate::model::SortOrder;

/// The item field a range constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RangeKind {
    Date,
    ModifyDate,
    CalendarStart,
    CalendarEnd,
    Size,
    ModSequence,
    ConversationCount,
    Subject,
    Sender,
    ItemId,
}

impl RangeKind {
    pub fn is_numeric(self) -> bool {
        !matches!(self, RangeKind::Subject | RangeKind::Sender)
    }

    fn label(self) -> &'static str {
        match self {
            RangeKind::Date => "DATE",
            RangeKind::ModifyDate => "MDATE",
            RangeKind::CalendarStart => "CAL_START",
            RangeKind::CalendarEnd => "CAL_END",
            RangeKind::Size => "SIZE",
            RangeKind::ModSequence => "MODSEQ",
            RangeKind::ConversationCount => "CONV_COUNT",
            RangeKind::Subject => "SUBJECT",
            RangeKind::Sender => "SENDER",
            RangeKind::ItemId => "ITEMID",
        }
    }
}

impl fmt::Display for RangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A range endpoint. Numeric kinds use `Long` (dates are epoch millis),
/// string kinds use `Str`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RangeValue {
    Long(i64),
    Str(String),
}

impl fmt::Display for RangeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeValue::Long(v) => write!(f, "{v}"),
            RangeValue::Str(s) => write!(f, "\"{s}\""),
        }
    }
}

/// An interval, possibly negated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    pub min: Bound<RangeValue>,
    pub max: Bound<RangeValue>,
    /// Match values *outside* the interval instead.
    pub negated: bool,
}

impl Range {
    pub fn new(min: Bound<RangeValue>, max: Bound<RangeValue>) -> Self {
        Self {
            min,
            max,
            negated: false,
        }
    }

    /// Values strictly greater than `v`.
    pub fn above(v: RangeValue) -> Self {
        Self::new(Bound::Excluded(v), Bound::Unbounded)
    }

    /// Values strictly less than `v`.
    pub fn below(v: RangeValue) -> Self {
        Self::new(Bound::Unbounded, Bound::Excluded(v))
    }

    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self.min, Bound::Unbounded) && matches!(self.max, Bound::Unbounded)
    }

    /// Whether `value` satisfies the range. A missing value is outside
    /// every interval.
    pub fn matches(&self, value: Option<&RangeValue>) -> bool {
        let inside = match value {
            Some(v) => self.above_min(v) && self.below_max(v),
            None => false,
        };
        inside != self.negated
    }

    /// The overlap of two plain intervals. Negated ranges have no single
    /// interval overlap.
    pub fn intersect(&self, other: &Range) -> Option<Range> {
        if self.negated || other.negated {
            return None;
        }
        Some(Range::new(
            tighter(&self.min, &other.min, Ordering::Greater),
            tighter(&self.max, &other.max, Ordering::Less),
        ))
    }

    fn above_min(&self, v: &RangeValue) -> bool {
        match &self.min {
            Bound::Unbounded => true,
            Bound::Included(m) => v >= m,
            Bound::Excluded(m) => v > m,
        }
    }

    fn below_max(&self, v: &RangeValue) -> bool {
        match &self.max {
            Bound::Unbounded => true,
            Bound::Included(m) => v <= m,
            Bound::Excluded(m) => v < m,
        }
    }
}

/// The stricter of two bounds on the same side; `wins` is how the stricter
/// value compares to the other.
fn tighter(a: &Bound<RangeValue>, b: &Bound<RangeValue>, wins: Ordering) -> Bound<RangeValue> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other.clone(),
        (Bound::Included(x) | Bound::Excluded(x), Bound::Included(y) | Bound::Excluded(y)) => {
            match x.cmp(y) {
                Ordering::Equal if matches!(a, Bound::Excluded(_)) => a.clone(),
                Ordering::Equal => b.clone(),
                ord if ord == wins => a.clone(),
                _ => b.clone(),
            }
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("-")?;
        }
        match &self.min {
            Bound::Unbounded => f.write_str("(*")?,
            Bound::Included(v) => write!(f, "[{v}")?,
            Bound::Excluded(v) => write!(f, "({v}")?,
        }
        f.write_str(",")?;
        match &self.max {
            Bound::Unbounded => f.write_str("*)"),
            Bound::Included(v) => write!(f, "{v}]"),
            Bound::Excluded(v) => write!(f, "{v})"),
        }
    }
}

/// A range over whatever field the given sort order sorts by; used to
/// narrow a scan to a string-sorted cursor window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorRange {
    pub range: Range,
    pub sort: SortOrder,
}

impl fmt::Display for CursorRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CURSOR({}):{}", self.sort, self.range)
    }
}
