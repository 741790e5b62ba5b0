use super::{build_parts, story_header, token_len, truncate_tokens, TOKEN_LIMIT};
use hn_store::{CommentRow, StorySeed};

fn seed(title: Option<&str>, text: Option<&str>) -> StorySeed {
    StorySeed {
        id: 1,
        title: title.map(String::from),
        text: text.map(String::from),
    }
}

fn comment(id: u64, parent: u64, text: &str) -> CommentRow {
    CommentRow {
        id,
        parent,
        text: text.into(),
    }
}

/// Roughly `n` tokens of filler ("the" encodes as a single token).
fn filler(n: usize) -> String {
    "the ".repeat(n)
}

#[test]
fn header_requires_title_or_text() {
    assert!(story_header(&seed(None, None)).is_none());
    assert!(story_header(&seed(Some(""), Some(""))).is_none());

    let header = story_header(&seed(Some("A title"), None)).unwrap();
    assert_eq!(header, "Topic: A title\nDiscussion:\n");

    let header = story_header(&seed(Some("A title"), Some("Some text"))).unwrap();
    assert_eq!(header, "Topic: A title\nSome text\nDiscussion:\n");
}

#[test]
fn untitled_story_yields_no_parts() {
    let parts = build_parts(&seed(None, None), &[comment(2, 1, "hello")]);
    assert!(parts.is_empty());
}

#[test]
fn bfs_order_and_indentation() {
    let comments = vec![
        comment(2, 1, "first top"),
        comment(3, 2, "first reply"),
        comment(4, 2, "second reply"),
        comment(5, 3, "nested"),
        comment(6, 1, "second top"),
    ];

    let parts = build_parts(&seed(Some("T"), None), &comments);

    assert_eq!(parts.len(), 1);
    assert_eq!(
        parts[0],
        "Topic: T\nDiscussion:\n\
         first top\n\tfirst reply\n\tsecond reply\n\t\tnested\n\
         second top\n"
    );
}

#[test]
fn builds_deterministically() {
    let comments = vec![
        comment(2, 1, "alpha"),
        comment(3, 2, "beta"),
        comment(4, 1, "gamma"),
    ];
    let story = seed(Some("T"), None);

    assert_eq!(build_parts(&story, &comments), build_parts(&story, &comments));
}

#[test]
fn splits_between_groups_and_repeats_header() {
    let comments = vec![
        comment(2, 1, &filler(5_000)),
        comment(3, 1, &filler(5_000)),
    ];

    let parts = build_parts(&seed(Some("T"), None), &comments);

    assert_eq!(parts.len(), 2);
    for part in &parts {
        assert!(part.starts_with("Topic: T\nDiscussion:\n"));
        assert!(token_len(part) <= TOKEN_LIMIT);
    }
}

#[test]
fn mid_group_split_reemits_top_comment() {
    // One top comment with replies too big for a single part.
    let comments = vec![
        comment(2, 1, "the top comment"),
        comment(3, 2, &filler(3_000)),
        comment(4, 2, &filler(3_000)),
        comment(5, 2, &filler(3_000)),
    ];

    let parts = build_parts(&seed(Some("T"), None), &comments);

    assert!(parts.len() >= 2);
    for part in &parts {
        assert!(token_len(part) <= TOKEN_LIMIT);
        // Every part is self-contained: the group's top-level comment leads.
        assert!(part.contains("the top comment\n"));
    }
}

#[test]
fn truncation_respects_token_budget() {
    let text = filler(100);
    assert_eq!(truncate_tokens(&text, 1_000), text);

    let cut = truncate_tokens(&text, 10);
    assert!(token_len(&cut) <= 10);
    assert!(cut.starts_with("the"));
}

#[test]
fn oversized_single_line_is_skipped() {
    let giant = filler(TOKEN_LIMIT + 500);
    let comments = vec![comment(2, 1, &giant)];

    let parts = build_parts(&seed(Some("T"), None), &comments);

    // Nothing fits, so the only part left is the bare header.
    assert_eq!(parts, vec!["Topic: T\nDiscussion:\n".to_string()]);
}
