//! Token-bounded document parts from a story and its comment tree.
//!
//! Each part stands alone as a readable excerpt: it opens with the story
//! header and carries whole top-level comment groups where they fit. When a
//! group straddles a part boundary the group's top-level comment is repeated
//! so replies never appear without their context.
use hn_store::{CommentRow, StorySeed};
use std::{
    collections::{HashMap, VecDeque},
    sync::OnceLock,
};
use tiktoken_rs::CoreBPE;

/// Per-part budget, in cl100k tokens.
pub const TOKEN_LIMIT: usize = 8_000;

static BPE: OnceLock<CoreBPE> = OnceLock::new();

fn bpe() -> &'static CoreBPE {
    BPE.get_or_init(|| tiktoken_rs::cl100k_base().expect("embedded cl100k vocabulary"))
}

/// Token count of a document candidate.
pub fn token_len(text: &str) -> usize {
    bpe().encode_ordinary(text).len()
}

/// Cut a text down to at most `max_tokens` tokens.
pub fn truncate_tokens(text: &str, max_tokens: usize) -> String {
    let mut tokens = bpe().encode_ordinary(text);
    if tokens.len() <= max_tokens {
        return text.to_owned();
    }
    tokens.truncate(max_tokens);
    bpe()
        .decode(tokens)
        .unwrap_or_else(|_| text.chars().take(max_tokens * 4).collect())
}

fn clean(text: &str) -> String {
    html_text::plain_text(text)
}

/// The header every part opens with. A story with neither title nor text
/// yields no header, and therefore no parts.
pub fn story_header(story: &StorySeed) -> Option<String> {
    let title = story.title.as_deref().unwrap_or_default();
    let text = story.text.as_deref().unwrap_or_default();
    if title.is_empty() && text.is_empty() {
        return None;
    }

    let mut header = format!("Topic: {}\n", clean(title));
    if !text.is_empty() {
        header.push_str(&clean(text));
        header.push('\n');
    }
    header.push_str("Discussion:\n");
    Some(header)
}

fn format_line(level: usize, text: &str) -> String {
    let mut line = "\t".repeat(level);
    line.push_str(text);
    line.push('\n');
    line
}

/// Breadth-first walk of a top-level comment's subtree, as (level, text)
/// lines. Sibling order follows the input order, which the store delivers in
/// `display_order`.
fn bfs_group<'a>(
    top: &'a CommentRow,
    children: &HashMap<u64, Vec<&'a CommentRow>>,
) -> Vec<(usize, String)> {
    let mut group = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back((0usize, top));

    while let Some((level, comment)) = queue.pop_front() {
        group.push((level, clean(&comment.text)));
        if let Some(kids) = children.get(&comment.id) {
            for child in kids {
                queue.push_back((level + 1, child));
            }
        }
    }
    group
}

/// Build the ordered document parts for a story. Deterministic for a given
/// input, so regenerating a story reassigns the same part indices.
pub fn build_parts(story: &StorySeed, comments: &[CommentRow]) -> Vec<String> {
    let Some(header) = story_header(story) else {
        return Vec::new();
    };

    let mut children: HashMap<u64, Vec<&CommentRow>> = HashMap::new();
    for comment in comments {
        children.entry(comment.parent).or_default().push(comment);
    }

    let mut parts = Vec::new();
    let mut current = header.clone();

    for top in children.get(&story.id).cloned().unwrap_or_default() {
        let group = bfs_group(top, &children);

        // The whole group fits: append it and move on.
        let group_text: String = group
            .iter()
            .map(|(level, text)| format_line(*level, text))
            .collect();
        if token_len(&format!("{current}{group_text}")) <= TOKEN_LIMIT {
            current.push_str(&group_text);
            continue;
        }

        // Otherwise pack line by line, flushing full parts as we go.
        let mut i = 0;
        while i < group.len() {
            let (level, text) = &group[i];
            let mut line = format_line(*level, text);

            if token_len(&format!("{current}{line}")) > TOKEN_LIMIT {
                if current != header {
                    parts.push(current);
                }
                current = header.clone();

                // A new part must open with a top-level comment. Re-emit the
                // group's top comment and rebase this line one level deep.
                if *level != 0 {
                    let top_line = format_line(0, &group[0].1);
                    if token_len(&format!("{current}{top_line}")) <= TOKEN_LIMIT {
                        current.push_str(&top_line);
                    }
                    line = format_line(1, text);
                }

                // A single line over budget on its own gets dropped.
                if token_len(&format!("{current}{line}")) > TOKEN_LIMIT {
                    i += 1;
                    continue;
                }
            }

            current.push_str(&line);
            i += 1;
        }
    }

    parts.push(current);
    parts
}

#[cfg(test)]
mod document_tests;
