//! Integration tests for planning and executing searches against the
//! fixture mailbox.

use std::path::{Path, PathBuf};

use assert_fs::prelude::*;
use chrono::{TimeZone, Utc};

use mailquery::backend::memory::{MemoryMailbox, TextDocument};
use mailquery::config::{Config, OptimizerConfig};
use mailquery::error::SearchError;
use mailquery::model::{
    folders, Cursor, FetchMode, Hit, ItemId, ItemType, MailItem, PageDirection, SortOrder,
    TextField, TextPredicate,
};
use mailquery::search::{Clause, SearchParams, SearchResults, Searcher};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn mailbox() -> MemoryMailbox {
    MemoryMailbox::load(&fixture("mailbox.json")).unwrap()
}

fn word(text: &str) -> Clause {
    Clause::text(TextPredicate::term(TextField::Content, text))
}

fn ids(hits: &[Hit]) -> Vec<ItemId> {
    hits.iter().map(|h| h.item_id).collect()
}

fn all_ids(results: &mut SearchResults<'_>) -> Vec<ItemId> {
    ids(&results.take_hits(100).unwrap())
}

/// Sort value of fixture item `id` under date ordering.
fn date_value(id: ItemId) -> String {
    (1_704_103_200_000_i64 + (id as i64 - 1) * 86_400_000).to_string()
}

// ─── Trash and spam defaulting ──────────────────────────────────────

#[test]
fn test_text_search_skips_trash_and_spam() {
    let mb = mailbox();
    let searcher = Searcher::new(&mb, &mb);
    let mut results = searcher
        .search(&word("budget"), SearchParams::default())
        .unwrap();
    // message 2 matches in two parts, the appointment only once
    assert_eq!(all_ids(&mut results), vec![10, 8, 7, 4, 2, 2, 1]);
}

#[test]
fn test_including_trash_and_spam() {
    let mb = mailbox();
    let searcher = Searcher::new(&mb, &mb);
    let params = SearchParams::default().including_trash().including_spam();
    let mut results = searcher.search(&word("budget"), params).unwrap();
    assert_eq!(all_ids(&mut results), vec![10, 8, 7, 6, 5, 4, 2, 2, 1]);
}

#[test]
fn test_naming_trash_searches_it() {
    let mb = mailbox();
    let searcher = Searcher::new(&mb, &mb);
    let clause = Clause::and([word("budget"), Clause::InFolder(folders::TRASH)]);
    let mut results = searcher.search(&clause, SearchParams::default()).unwrap();
    assert_eq!(all_ids(&mut results), vec![5]);
}

// ─── Clause compilation ─────────────────────────────────────────────

#[test]
fn test_negated_disjunction_matches_neither() {
    let mb = mailbox();
    let searcher = Searcher::new(&mb, &mb);
    let clause = Clause::not(Clause::or([Clause::tag("work"), Clause::tag("personal")]));
    let params = SearchParams::default().with_sort(SortOrder::IdAsc);
    let mut results = searcher.search(&clause, params).unwrap();
    // 6 has no tags either but sits in spam
    assert_eq!(all_ids(&mut results), vec![8]);
}

#[test]
fn test_text_and_tag_fuse_into_one_operation() {
    let mb = mailbox();
    let searcher = Searcher::new(&mb, &mb);
    let clause = Clause::and([word("budget"), Clause::tag("work")]);
    let params = SearchParams::default();
    assert_eq!(
        searcher.explain(&clause, &params),
        "(TEXT[content:budget] AND DB[(-IN:3,4 TAG:work)])"
    );
    let mut results = searcher.search(&clause, params).unwrap();
    assert_eq!(all_ids(&mut results), vec![10, 7, 4, 2, 2, 1]);
}

#[test]
fn test_union_merges_in_sort_order() {
    let mb = mailbox();
    let searcher = Searcher::new(&mb, &mb);
    let clause = Clause::or([Clause::tag("personal"), word("finance")]);
    let mut results = searcher.search(&clause, SearchParams::default()).unwrap();
    assert!(results.operation().to_string().starts_with("UNION("));
    assert_eq!(all_ids(&mut results), vec![9, 7, 3]);
}

#[test]
fn test_union_reports_shared_hit_once() {
    let mb = mailbox();
    let searcher = Searcher::new(&mb, &mb);
    let clause = Clause::or([Clause::tag("urgent"), word("approved")]);
    let mut results = searcher.search(&clause, SearchParams::default()).unwrap();
    assert_eq!(all_ids(&mut results), vec![7]);

    results.reset().unwrap();
    assert_eq!(all_ids(&mut results), vec![7]);
}

#[test]
fn test_contradiction_yields_nothing() {
    let mb = mailbox();
    let searcher = Searcher::new(&mb, &mb);
    let clause = Clause::and([Clause::tag("work"), Clause::not(Clause::tag("work"))]);
    let params = SearchParams::default();
    assert_eq!(searcher.explain(&clause, &params), "NO_RESULTS");
    let mut results = searcher.search(&clause, params).unwrap();
    assert!(results.next().unwrap().is_none());
}

#[test]
fn test_plan_is_stable_under_reoptimization() {
    let mb = mailbox();
    let searcher = Searcher::new(&mb, &mb);
    let clause = Clause::and([
        word("budget"),
        Clause::or([Clause::tag("work"), Clause::tag("urgent")]),
        Clause::not(Clause::InFolder(folders::SENT)),
    ]);
    let plan = searcher.plan(&clause, &SearchParams::default());
    let again = plan.clone_for_rewrite().optimize(&OptimizerConfig::default());
    assert_eq!(plan.to_string(), again.to_string());
}

// ─── Types and fetch modes ──────────────────────────────────────────

#[test]
fn test_type_narrowing() {
    let mb = mailbox();
    let searcher = Searcher::new(&mb, &mb);
    let params = SearchParams::default().with_types([ItemType::Appointment]);
    let mut results = searcher.search(&word("budget"), params).unwrap();
    assert_eq!(all_ids(&mut results), vec![8]);
}

#[test]
fn test_fetch_ids_only() {
    let mb = mailbox();
    let searcher = Searcher::new(&mb, &mb);
    let params = SearchParams::default().with_fetch(FetchMode::Id);
    let mut results = searcher.search(&Clause::tag("personal"), params).unwrap();
    let hits = results.take_hits(10).unwrap();
    assert_eq!(ids(&hits), vec![9, 3]);
    assert!(hits.iter().all(|h| h.item().is_none()));
}

// ─── Cursor paging ──────────────────────────────────────────────────

#[test]
fn test_cursor_resumes_after_last_seen_hit() {
    let mb = mailbox();
    let searcher = Searcher::new(&mb, &mb);
    let everything = Clause::and([]);
    let params = SearchParams::default().with_sort(SortOrder::IdAsc);

    let mut first = searcher.search(&everything, params.clone()).unwrap();
    let page = first.take_hits(4).unwrap();
    assert_eq!(ids(&page), vec![1, 2, 3, 4]);
    first.close();

    let last = page.last().unwrap();
    let cursor = Cursor::new(last.item_id, last.sort_key.to_string()).with_offset();
    let mut second = searcher
        .search(&everything, params.with_cursor(cursor))
        .unwrap();
    assert_eq!(all_ids(&mut second), vec![7, 8, 9, 10]);
    assert_eq!(second.cursor_offset(), Some(3));
}

#[test]
fn test_cursor_stops_at_end_bound() {
    let mb = mailbox();
    let searcher = Searcher::new(&mb, &mb);
    let cursor = Cursor::new(10, date_value(10)).with_end(date_value(4));
    let params = SearchParams::default().with_cursor(cursor);
    let mut results = searcher.search(&Clause::and([]), params).unwrap();
    assert_eq!(all_ids(&mut results), vec![9, 8, 7]);
}

#[test]
fn test_backward_page_ends_at_cursor() {
    let mb = mailbox();
    let searcher = Searcher::new(&mb, &mb);
    let cursor = Cursor::new(4, date_value(4)).with_end(date_value(9));
    let params = SearchParams::default()
        .with_cursor(cursor)
        .with_direction(PageDirection::Backward);
    let mut results = searcher.search(&Clause::and([]), params).unwrap();
    // nearest to the cursor first
    assert_eq!(all_ids(&mut results), vec![4, 7, 8, 9]);
}

#[test]
fn test_cursor_with_text_predicate() {
    let mb = mailbox();
    let searcher = Searcher::new(&mb, &mb);
    let cursor = Cursor::new(7, date_value(7));
    let params = SearchParams::default().with_cursor(cursor);
    let mut results = searcher.search(&word("budget"), params).unwrap();
    assert_eq!(all_ids(&mut results), vec![4, 2, 2, 1]);
}

#[test]
fn test_cursor_rejected_for_unordered_sort() {
    let mb = mailbox();
    let searcher = Searcher::new(&mb, &mb);
    let params = SearchParams::default()
        .with_sort(SortOrder::None)
        .with_cursor(Cursor::new(1, "1"));
    assert!(matches!(
        searcher.search(&Clause::tag("work"), params),
        Err(SearchError::InvalidCursor(_))
    ));
}

#[test]
fn test_small_chunks_return_the_same_hits() {
    let mb = mailbox();
    let searcher = Searcher::new(&mb, &mb);
    let mut config = Config::default();
    config.planner.initial_chunk_size = 1;
    config.planner.max_chunk_size = 2;
    config.planner.in_clause_batch_size = 1;
    let small = Searcher::new(&mb, &mb).with_config(&config);

    let expected = all_ids(&mut searcher.search(&word("budget"), SearchParams::default()).unwrap());
    let got = all_ids(&mut small.search(&word("budget"), SearchParams::default()).unwrap());
    assert_eq!(got, expected);
}

// ─── Resuming over equal sort values ────────────────────────────────

/// Messages sharing timestamps, with ids out of date order.
fn tied_mailbox() -> MemoryMailbox {
    let layout = [
        (1, 300),
        (2, 100),
        (3, 300),
        (4, 200),
        (5, 100),
        (6, 300),
        (7, 200),
        (8, 400),
    ];
    let items = layout
        .iter()
        .map(|&(id, secs)| {
            let date = Utc.timestamp_opt(secs, 0).single().unwrap();
            let mut item = MailItem::new(id, ItemType::Message, folders::INBOX, date);
            if id % 2 == 0 {
                item.tags = vec!["even".into()];
            }
            item
        })
        .collect();
    let docs = [3, 4, 5, 6]
        .iter()
        .map(|&id| TextDocument::new(id, id, "tied"))
        .collect();
    MemoryMailbox::new("me", items, docs)
}

/// A cursor at the k-th hit continues exactly where skipping k hits does.
fn assert_cursor_resumes(
    searcher: &Searcher<'_>,
    clause: &Clause,
    sort: SortOrder,
    with_offset: bool,
) {
    let params = SearchParams::default().with_sort(sort);
    let all = searcher
        .search(clause, params.clone())
        .unwrap()
        .take_hits(100)
        .unwrap();
    assert!(all.len() > 2, "{sort}");

    for k in 1..=all.len() {
        let mut fresh = searcher.search(clause, params.clone()).unwrap();
        assert_eq!(fresh.skip_to(k).unwrap(), k);
        let expected = all_ids(&mut fresh);

        let at = &all[k - 1];
        let mut cursor = Cursor::new(at.item_id, at.sort_key.to_string());
        if with_offset {
            cursor = cursor.with_offset();
        }
        let mut resumed = searcher
            .search(clause, params.clone().with_cursor(cursor))
            .unwrap();
        assert_eq!(all_ids(&mut resumed), expected, "{sort} k={k}");
        if with_offset {
            assert_eq!(resumed.cursor_offset(), Some(k - 1), "{sort} k={k}");
        }
    }
}

#[test]
fn test_cursor_resumes_through_equal_dates() {
    let mb = tied_mailbox();
    let searcher = Searcher::new(&mb, &mb);
    for sort in [SortOrder::DateAsc, SortOrder::DateDesc] {
        assert_cursor_resumes(&searcher, &Clause::and([]), sort, true);
        assert_cursor_resumes(&searcher, &Clause::tag("even"), sort, true);
    }
}

#[test]
fn test_cursor_resumes_through_union_ties() {
    let mb = tied_mailbox();
    let searcher = Searcher::new(&mb, &mb);
    let clause = Clause::or([Clause::tag("even"), word("tied")]);
    let params = SearchParams::default().with_sort(SortOrder::DateAsc);
    assert!(searcher.plan(&clause, &params).to_string().starts_with("UNION("));
    for sort in [SortOrder::DateAsc, SortOrder::DateDesc] {
        assert_cursor_resumes(&searcher, &clause, sort, false);
    }
}

// ─── Mailbox files ──────────────────────────────────────────────────

#[test]
fn test_load_mailbox_from_temp_file() {
    let dir = assert_fs::TempDir::new().unwrap();
    let file = dir.child("mailbox.json");
    file.write_str(
        r#"{"items": [
            {"id": 1, "type": "contact", "folder_id": 7, "date": "2024-03-01T00:00:00Z",
             "tags": ["family"]},
            {"id": 2, "type": "message", "folder_id": 2, "date": "2024-03-02T00:00:00Z",
             "tags": ["family"]}
        ]}"#,
    )
    .unwrap();

    let mb = MemoryMailbox::load(file.path()).unwrap();
    assert_eq!(mb.account(), "local");
    let searcher = Searcher::new(&mb, &mb);
    let params = SearchParams::default().with_types([ItemType::Contact]);
    let mut results = searcher.search(&Clause::tag("family"), params).unwrap();
    assert_eq!(all_ids(&mut results), vec![1]);
}

#[test]
fn test_load_missing_mailbox_is_io_error() {
    let tmp = tempfile::tempdir().unwrap();
    let err = MemoryMailbox::load(&tmp.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, SearchError::Io { .. }));
}
