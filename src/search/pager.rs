//! Positioning a result stream at a pagination cursor.

use std::cmp::Ordering;
use std::collections::VecDeque;

use tracing::debug;

use crate::error::{Result, SearchError};
use crate::model::{Cursor, Hit, ItemId, SortKey, SortOrder};
use crate::ops::{Operation, QueryContext};

/// A cursor resolved against the active sort order.
#[derive(Debug, Clone)]
pub struct CursorResolver {
    sort: SortOrder,
    key: SortKey,
    item_id: ItemId,
    end: Option<SortKey>,
}

impl CursorResolver {
    pub fn new(cursor: &Cursor, sort: SortOrder) -> Result<Self> {
        if !sort.is_ordered() {
            return Err(SearchError::InvalidCursor(
                "a cursor requires an ordered sort".into(),
            ));
        }
        let parse = |raw: &str| {
            sort.parse_key(raw).ok_or_else(|| {
                SearchError::InvalidCursor(format!("cannot read '{raw}' as a {sort} sort value"))
            })
        };
        Ok(Self {
            sort,
            key: parse(&cursor.sort_value)?,
            item_id: cursor.item_id,
            end: cursor.end_sort_value.as_deref().map(parse).transpose()?,
        })
    }

    /// Whether `hit` is delivered before the first hit after the cursor.
    /// The cursor's own hit counts as before.
    pub fn is_before(&self, hit: &Hit) -> bool {
        match self.sort.compare(&hit.sort_key, &self.key) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal if self.sort.is_descending() => hit.item_id >= self.item_id,
            Ordering::Equal => hit.item_id <= self.item_id,
        }
    }

    /// Whether `hit` is at or past the end bound.
    pub fn reaches_end(&self, hit: &Hit) -> bool {
        self.end
            .as_ref()
            .is_some_and(|end| self.sort.compare(&hit.sort_key, end) != Ordering::Less)
    }

    /// Whether `hit` sorts before the end bound.
    pub fn before_end(&self, hit: &Hit) -> bool {
        self.end
            .as_ref()
            .is_some_and(|end| self.sort.compare(&hit.sort_key, end) == Ordering::Less)
    }

    /// Discard hits up to and including the cursor's own hit.
    pub fn skip_forward(&self, op: &mut Operation, ctx: &QueryContext<'_>) -> Result<usize> {
        let mut skipped = 0;
        while let Some(hit) = op.peek(ctx)? {
            if !self.is_before(&hit) {
                break;
            }
            op.next(ctx)?;
            skipped += 1;
        }
        debug!(skipped, "Positioned after cursor");
        Ok(skipped)
    }

    /// The page that ends at the cursor, nearest hit first: every hit up to
    /// and including the cursor's own, minus those before the end bound.
    pub fn collect_backward(
        &self,
        op: &mut Operation,
        ctx: &QueryContext<'_>,
    ) -> Result<VecDeque<Hit>> {
        let mut page = VecDeque::new();
        while let Some(hit) = op.next(ctx)? {
            if !self.is_before(&hit) {
                break;
            }
            if !self.before_end(&hit) {
                page.push_front(hit);
            }
        }
        debug!(hits = page.len(), "Collected backward page");
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemType, RowPayload};

    fn hit(id: ItemId, millis: i64) -> Hit {
        Hit {
            item_id: id,
            conversation_id: 0,
            item_type: ItemType::Message,
            sort_key: SortKey::Long(millis),
            index_id: Some(id),
            part: None,
            payload: RowPayload::Id,
        }
    }

    #[test]
    fn test_equal_values_break_ties_by_id() {
        let desc = CursorResolver::new(&Cursor::new(5, "100"), SortOrder::DateDesc).expect("cursor");
        assert!(desc.is_before(&hit(9, 200)));
        assert!(desc.is_before(&hit(5, 100)));
        assert!(desc.is_before(&hit(6, 100)));
        assert!(!desc.is_before(&hit(4, 100)));
        assert!(!desc.is_before(&hit(9, 50)));

        let asc = CursorResolver::new(&Cursor::new(5, "100"), SortOrder::DateAsc).expect("cursor");
        assert!(asc.is_before(&hit(4, 100)));
        assert!(!asc.is_before(&hit(6, 100)));
    }

    #[test]
    fn test_end_bound() {
        let cursor = Cursor::new(1, "100").with_end("50");
        let resolver = CursorResolver::new(&cursor, SortOrder::DateDesc).expect("cursor");
        assert!(!resolver.reaches_end(&hit(2, 60)));
        assert!(resolver.reaches_end(&hit(2, 50)));
        assert!(resolver.before_end(&hit(2, 200)));
    }

    #[test]
    fn test_rejects_unordered_and_garbage() {
        assert!(matches!(
            CursorResolver::new(&Cursor::new(1, "100"), SortOrder::None),
            Err(SearchError::InvalidCursor(_))
        ));
        assert!(matches!(
            CursorResolver::new(&Cursor::new(1, "soon"), SortOrder::DateAsc),
            Err(SearchError::InvalidCursor(_))
        ));
    }
}
