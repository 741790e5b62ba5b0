use super::*;
use hn_api::{Item, User};

fn story(id: u64, score: i64, descendants: i64, kids: &[u64]) -> Item {
    Item {
        id,
        ty: "story".into(),
        by: Some("alice".into()),
        time: 1_700_000_000 + id,
        title: Some(format!("Story {id}")),
        score: Some(score),
        kids: kids.to_vec(),
        descendants: Some(descendants as u64),
        ..Item::default()
    }
}

fn comment(id: u64, parent: u64, text: &str, kids: &[u64]) -> Item {
    Item {
        id,
        ty: "comment".into(),
        by: Some("bob".into()),
        time: 1_700_000_000 + id,
        text: Some(text.into()),
        parent: Some(parent),
        kids: kids.to_vec(),
        ..Item::default()
    }
}

#[test]
fn upsert_is_idempotent() {
    let store = ItemStore::open_in_memory().unwrap();
    let items = vec![story(1, 30, 5, &[2, 3]), comment(2, 1, "first", &[])];

    store.upsert_items(&items).unwrap();
    store.upsert_items(&items).unwrap();

    let stats = store.stats().unwrap();
    assert_eq!(stats.total_items, 2);
    assert_eq!(stats.max_item_id, 2);
}

#[test]
fn kids_rows_are_replaced() {
    let store = ItemStore::open_in_memory().unwrap();
    store
        .upsert_items(&[
            story(1, 30, 5, &[4, 2, 3]),
            comment(2, 1, "two", &[]),
            comment(3, 1, "three", &[]),
            comment(4, 1, "four", &[]),
        ])
        .unwrap();

    // Re-upsert with one kid gone and the order changed.
    store.upsert_items(&[story(1, 30, 5, &[3, 2])]).unwrap();

    let tree = store.comment_tree(1).unwrap();
    let ids: Vec<u64> = tree.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![3, 2]);
}

#[test]
fn max_item_id_of_empty_catalog() {
    let store = ItemStore::open_in_memory().unwrap();
    assert_eq!(store.max_item_id().unwrap(), 0);
}

#[test]
fn ancestor_walk_finds_root_story() {
    let store = ItemStore::open_in_memory().unwrap();
    store
        .upsert_items(&[
            story(10, 25, 4, &[11]),
            comment(11, 10, "top", &[12]),
            comment(12, 11, "nested", &[]),
        ])
        .unwrap();

    assert_eq!(store.root_story_id(12).unwrap(), Some(10));
    assert_eq!(store.root_story_id(11).unwrap(), Some(10));
    assert_eq!(store.root_story_id(10).unwrap(), Some(10));
    assert_eq!(store.root_story_id(999).unwrap(), None);
}

#[test]
fn eligibility_thresholds() {
    let store = ItemStore::open_in_memory().unwrap();
    store
        .upsert_items(&[
            story(1, 19, 10, &[]),
            story(2, 20, 3, &[]),
            story(3, 100, 2, &[]),
        ])
        .unwrap();

    assert_eq!(store.eligible_story_ids().unwrap(), vec![2]);
    assert_eq!(store.story_eligibility(1).unwrap(), Some((19, 10)));
    assert_eq!(store.story_eligibility(42).unwrap(), None);
}

#[test]
fn eligible_stories_after_cursor() {
    let store = ItemStore::open_in_memory().unwrap();
    store
        .upsert_items(&[story(5, 30, 5, &[]), story(6, 30, 5, &[]), story(7, 30, 5, &[])])
        .unwrap();

    let seeds = store.eligible_stories_after(Some(5)).unwrap();
    let ids: Vec<u64> = seeds.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![6, 7]);
}

#[test]
fn comment_tree_order_and_filtering() {
    let store = ItemStore::open_in_memory().unwrap();
    store
        .upsert_items(&[
            story(1, 30, 5, &[2, 5]),
            comment(2, 1, "first top", &[3, 4]),
            comment(3, 2, "[dead]", &[]),
            comment(4, 2, "reply", &[]),
            comment(5, 1, "second top", &[]),
        ])
        .unwrap();

    let tree = store.comment_tree(1).unwrap();
    let ids: Vec<u64> = tree.iter().map(|c| c.id).collect();

    // Depth first in display order, with the dead comment dropped.
    assert_eq!(ids, vec![2, 4, 5]);
}

#[test]
fn rewind_walks_back_over_stories() {
    let store = ItemStore::open_in_memory().unwrap();
    store
        .upsert_items(&[
            story(10, 30, 5, &[]),
            comment(11, 10, "noise", &[]),
            story(12, 30, 5, &[]),
            story(14, 30, 5, &[]),
        ])
        .unwrap();

    assert_eq!(store.rewind_story_id(14, 0).unwrap(), Some(14));
    assert_eq!(store.rewind_story_id(14, 1).unwrap(), Some(12));
    assert_eq!(store.rewind_story_id(14, 2).unwrap(), Some(10));
    assert_eq!(store.rewind_story_id(14, 3).unwrap(), None);
}

#[test]
fn filter_ids_applies_predicates_and_sort() {
    let store = ItemStore::open_in_memory().unwrap();
    store
        .upsert_items(&[story(1, 10, 5, &[]), story(2, 50, 5, &[]), story(3, 90, 5, &[])])
        .unwrap();

    let filters = SearchFilters {
        min_score: Some(20),
        ..SearchFilters::default()
    };
    let ids = store
        .filter_ids(&[1, 2, 3], &filters, SortBy::Score, SortOrder::Desc)
        .unwrap();
    assert_eq!(ids, vec![3, 2]);

    let by_filter = SearchFilters {
        by: Some("nobody".into()),
        ..SearchFilters::default()
    };
    let ids = store
        .filter_ids(&[1, 2, 3], &by_filter, SortBy::Relevance, SortOrder::Desc)
        .unwrap();
    assert!(ids.is_empty());
}

#[test]
fn item_rows_preserve_requested_order() {
    let store = ItemStore::open_in_memory().unwrap();
    store
        .upsert_items(&[story(1, 10, 5, &[]), story(2, 50, 5, &[])])
        .unwrap();

    let rows = store.item_rows(&[2, 99, 1]).unwrap();
    let ids: Vec<u64> = rows.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![2, 1]);
}

#[test]
fn top_comments_include_first_replies() {
    let store = ItemStore::open_in_memory().unwrap();
    store
        .upsert_items(&[
            story(1, 30, 5, &[2, 4]),
            comment(2, 1, "top one", &[3]),
            comment(3, 2, "reply one", &[]),
            comment(4, 1, "top two", &[]),
        ])
        .unwrap();

    let texts = store.top_comment_texts(1, 5).unwrap();
    assert_eq!(texts, vec!["top one", "reply one", "top two"]);
}

#[test]
fn users_round_trip() {
    let store = ItemStore::open_in_memory().unwrap();
    let user = User {
        id: "alice".into(),
        about: Some("likes rust".into()),
        created: 1_500_000_000,
        karma: 42,
        submitted: vec![1, 2, 3],
    };

    store.upsert_users(std::slice::from_ref(&user)).unwrap();
    store.upsert_users(std::slice::from_ref(&user)).unwrap();

    let guard = store.lock().unwrap();
    let (karma, submitted): (i64, Option<String>) = guard
        .query_row(
            "SELECT karma, submitted FROM users WHERE id = 'alice'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(karma, 42);
    assert_eq!(submitted.as_deref(), Some("1,2,3"));
}
