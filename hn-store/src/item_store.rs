//! The item catalog: items, their ordered children and users.
use crate::{StoreError, StoreResult};
use hn_api::{Item, User};
use log::info;
use rusqlite::{params, types::Value, Connection, OpenFlags, OptionalExtension};
use serde::Deserialize;
use std::{
    collections::HashMap,
    path::Path,
    sync::{Mutex, MutexGuard},
};

/// A story must score at least this much to be worth embedding.
pub const MIN_SCORE: i64 = 20;
/// A story must have at least this many comments to be worth embedding.
pub const MIN_DESCENDANTS: i64 = 3;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id          INTEGER PRIMARY KEY,
    deleted     INTEGER,
    type        TEXT,
    by          TEXT,
    time        INTEGER,
    text        TEXT,
    dead        INTEGER,
    parent      INTEGER,
    poll        INTEGER,
    url         TEXT,
    score       INTEGER,
    title       TEXT,
    parts       TEXT,
    descendants INTEGER
);
CREATE TABLE IF NOT EXISTS kids (
    item          INTEGER NOT NULL,
    kid           INTEGER NOT NULL,
    display_order INTEGER NOT NULL,
    PRIMARY KEY (item, kid)
);
CREATE TABLE IF NOT EXISTS users (
    id        TEXT PRIMARY KEY,
    created   INTEGER,
    karma     INTEGER,
    about     TEXT,
    submitted TEXT
);
CREATE INDEX IF NOT EXISTS idx_items_type ON items(type);
CREATE INDEX IF NOT EXISTS idx_items_parent ON items(parent);
CREATE INDEX IF NOT EXISTS idx_kids_kid ON kids(kid);
"#;

/// The catalog store. Wraps a single [`rusqlite::Connection`] behind a mutex;
/// batch writes commit as one transaction.
pub struct ItemStore {
    conn: Mutex<Connection>,
}

/// The inputs the document builder needs from a story row.
#[derive(Debug, Clone)]
pub struct StorySeed {
    pub id: u64,
    pub title: Option<String>,
    pub text: Option<String>,
}

/// One comment row of a story's tree, in traversal order.
#[derive(Debug, Clone)]
pub struct CommentRow {
    pub id: u64,
    pub parent: u64,
    pub text: String,
}

/// The story attributes the ranker blends with vector distance.
#[derive(Debug, Clone)]
pub struct RankMeta {
    pub title: Option<String>,
    pub score: Option<i64>,
    pub time: Option<i64>,
}

/// A full item row as returned to search clients.
#[derive(Debug, Clone)]
pub struct ItemRow {
    pub id: u64,
    pub ty: String,
    pub by: Option<String>,
    pub time: Option<i64>,
    pub text: Option<String>,
    pub url: Option<String>,
    pub score: Option<i64>,
    pub title: Option<String>,
    pub descendants: Option<i64>,
}

/// Catalog predicates applied to search candidates.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub by: Option<String>,
    pub before_time: Option<i64>,
    pub after_time: Option<i64>,
    pub min_score: Option<i64>,
    pub max_score: Option<i64>,
    pub min_comments: Option<i64>,
    pub max_comments: Option<i64>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.by.is_none()
            && self.before_time.is_none()
            && self.after_time.is_none()
            && self.min_score.is_none()
            && self.max_score.is_none()
            && self.min_comments.is_none()
            && self.max_comments.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Relevance,
    Score,
    Time,
    Descendants,
}

impl SortBy {
    /// Column to sort on, if any. Relevance order comes from the ranker.
    pub fn column(&self) -> Option<&'static str> {
        match self {
            SortBy::Relevance => None,
            SortBy::Score => Some("score"),
            SortBy::Time => Some("time"),
            SortBy::Descendants => Some("descendants"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Aggregate catalog numbers for the metrics report.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    pub max_item_id: u64,
    pub total_items: u64,
    pub max_story_id: u64,
}

impl ItemStore {
    /// Open (or create) the catalog at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!("Opening item store {path:?}");
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open the catalog read-only. The query path uses its own connection so
    /// searches never contend with ingest commits.
    pub fn open_read_only(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory catalog for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Lock)
    }

    /// Upsert a batch of items. The batch commits as a unit; each item's
    /// `kids` rows are replaced wholesale so `display_order` always mirrors
    /// the latest upstream ordering.
    pub fn upsert_items(&self, items: &[Item]) -> StoreResult<()> {
        let mut guard = self.lock()?;
        let tx = guard.transaction()?;
        {
            let mut insert_item = tx.prepare_cached(
                "INSERT OR REPLACE INTO items
                    (id, deleted, type, by, time, text, dead, parent,
                     poll, url, score, title, parts, descendants)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )?;
            let mut clear_kids = tx.prepare_cached("DELETE FROM kids WHERE item = ?1")?;
            let mut insert_kid = tx.prepare_cached(
                "INSERT OR REPLACE INTO kids (item, kid, display_order) VALUES (?1, ?2, ?3)",
            )?;

            for item in items {
                let parts = (!item.parts.is_empty()).then(|| join_ids(&item.parts));
                insert_item.execute(params![
                    item.id as i64,
                    item.deleted,
                    item.ty,
                    item.by,
                    item.time as i64,
                    item.text,
                    item.dead,
                    item.parent.map(|id| id as i64),
                    item.poll.map(|id| id as i64),
                    item.url,
                    item.score,
                    item.title,
                    parts,
                    item.descendants.map(|n| n as i64),
                ])?;

                clear_kids.execute(params![item.id as i64])?;
                for (order, kid) in item.kids.iter().enumerate() {
                    insert_kid.execute(params![item.id as i64, *kid as i64, order as i64])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Upsert a batch of user profiles as a unit.
    pub fn upsert_users(&self, users: &[User]) -> StoreResult<()> {
        let mut guard = self.lock()?;
        let tx = guard.transaction()?;
        {
            let mut insert_user = tx.prepare_cached(
                "INSERT OR REPLACE INTO users (id, created, karma, about, submitted)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;

            for user in users {
                let submitted = (!user.submitted.is_empty()).then(|| join_ids(&user.submitted));
                insert_user.execute(params![
                    user.id,
                    user.created as i64,
                    user.karma as i64,
                    user.about,
                    submitted,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Largest item id committed locally, 0 when the catalog is empty.
    pub fn max_item_id(&self) -> StoreResult<u64> {
        let guard = self.lock()?;
        let max: Option<i64> =
            guard.query_row("SELECT MAX(id) FROM items", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0) as u64)
    }

    /// Climb `parent` edges from any item to its root story. Returns [`None`]
    /// when the chain is broken or ends at something other than a story or
    /// comment root (a poll, say).
    pub fn root_story_id(&self, item_id: u64) -> StoreResult<Option<u64>> {
        let guard = self.lock()?;
        let root: Option<i64> = guard
            .query_row(
                "WITH RECURSIVE item_hierarchy(id, parent) AS (
                    SELECT i.id, i.parent
                    FROM items i
                    WHERE i.id = ?1
                    UNION ALL
                    SELECT i.id, i.parent
                    FROM items i
                    JOIN item_hierarchy ih ON i.id = ih.parent
                    WHERE i.type IN ('comment', 'story')
                )
                SELECT id
                FROM item_hierarchy
                WHERE parent IS NULL",
                params![item_id as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(root.map(|id| id as u64))
    }

    /// All stories that clear the embedding thresholds.
    pub fn eligible_story_ids(&self) -> StoreResult<Vec<u64>> {
        let guard = self.lock()?;
        let mut stmt = guard.prepare_cached(
            "SELECT id FROM items
             WHERE type = 'story' AND score >= ?1 AND descendants >= ?2
             ORDER BY id",
        )?;
        let ids = stmt
            .query_map(params![MIN_SCORE, MIN_DESCENDANTS], |row| {
                row.get::<_, i64>(0).map(|id| id as u64)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Score and comment count for a story, if it exists.
    pub fn story_eligibility(&self, id: u64) -> StoreResult<Option<(i64, i64)>> {
        let guard = self.lock()?;
        let row = guard
            .query_row(
                "SELECT score, descendants FROM items WHERE type = 'story' AND id = ?1",
                params![id as i64],
                |row| {
                    Ok((
                        row.get::<_, Option<i64>>(0)?.unwrap_or(0),
                        row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    ))
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Eligible stories with id greater than `after`, ascending.
    pub fn eligible_stories_after(&self, after: Option<u64>) -> StoreResult<Vec<StorySeed>> {
        let guard = self.lock()?;
        let mut stmt = guard.prepare_cached(
            "SELECT id, title, text FROM items
             WHERE type = 'story' AND score >= ?1 AND descendants >= ?2 AND id > ?3
             ORDER BY id",
        )?;
        let seeds = stmt
            .query_map(
                params![MIN_SCORE, MIN_DESCENDANTS, after.unwrap_or(0) as i64],
                |row| {
                    Ok(StorySeed {
                        id: row.get::<_, i64>(0)? as u64,
                        title: row.get(1)?,
                        text: row.get(2)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(seeds)
    }

    /// Story seed for a single id, when it is a story.
    pub fn story_seed(&self, id: u64) -> StoreResult<Option<StorySeed>> {
        let guard = self.lock()?;
        let seed = guard
            .query_row(
                "SELECT id, title, text FROM items WHERE type = 'story' AND id = ?1",
                params![id as i64],
                |row| {
                    Ok(StorySeed {
                        id: row.get::<_, i64>(0)? as u64,
                        title: row.get(1)?,
                        text: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(seed)
    }

    /// Walk back `offset` stories from the given id, for refreshing recent
    /// embeddings whose discussions have likely grown.
    pub fn rewind_story_id(&self, from: u64, offset: u64) -> StoreResult<Option<u64>> {
        if offset == 0 {
            return Ok(Some(from));
        }
        let guard = self.lock()?;
        let id: Option<i64> = guard
            .query_row(
                "SELECT id FROM (
                    SELECT id FROM items WHERE id < ?1 AND type = 'story' ORDER BY id DESC
                 ) LIMIT 1 OFFSET ?2",
                params![from as i64, (offset - 1) as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(|id| id as u64))
    }

    /// The full comment tree of a story in display order, depth first.
    /// Comments flagged `[dead]` or `[flagged]` are left out.
    pub fn comment_tree(&self, story_id: u64) -> StoreResult<Vec<CommentRow>> {
        let guard = self.lock()?;
        let mut all = Vec::new();
        let top_level = comment_children(&guard, story_id)?;
        for comment in top_level {
            collect_descendants(&guard, comment, &mut all)?;
        }
        all.retain(|comment| {
            !comment.text.contains("[dead]") && !comment.text.contains("[flagged]")
        });
        Ok(all)
    }

    /// Title, score and submission time used to rank a candidate.
    pub fn rank_meta(&self, id: u64) -> StoreResult<Option<RankMeta>> {
        let guard = self.lock()?;
        let meta = guard
            .query_row(
                "SELECT title, score, time FROM items WHERE id = ?1",
                params![id as i64],
                |row| {
                    Ok(RankMeta {
                        title: row.get(0)?,
                        score: row.get(1)?,
                        time: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(meta)
    }

    /// Intersect candidate ids with the filter predicates, sorted by the
    /// requested column. With a relevance sort the rows come back unordered
    /// and the caller keeps the candidate ordering.
    pub fn filter_ids(
        &self,
        candidates: &[u64],
        filters: &SearchFilters,
        sort_by: SortBy,
        sort_order: SortOrder,
    ) -> StoreResult<Vec<u64>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = String::from("SELECT id FROM items WHERE id IN (");
        sql.push_str(&placeholders(candidates.len()));
        sql.push(')');

        let mut params: Vec<Value> = candidates
            .iter()
            .map(|&id| Value::Integer(id as i64))
            .collect();

        if let Some(by) = &filters.by {
            sql.push_str(" AND by = ?");
            params.push(Value::Text(by.clone()));
        }
        if let Some(t) = filters.before_time {
            sql.push_str(" AND time <= ?");
            params.push(Value::Integer(t));
        }
        if let Some(t) = filters.after_time {
            sql.push_str(" AND time >= ?");
            params.push(Value::Integer(t));
        }
        if let Some(n) = filters.min_score {
            sql.push_str(" AND score >= ?");
            params.push(Value::Integer(n));
        }
        if let Some(n) = filters.max_score {
            sql.push_str(" AND score <= ?");
            params.push(Value::Integer(n));
        }
        if let Some(n) = filters.min_comments {
            sql.push_str(" AND descendants >= ?");
            params.push(Value::Integer(n));
        }
        if let Some(n) = filters.max_comments {
            sql.push_str(" AND descendants <= ?");
            params.push(Value::Integer(n));
        }

        if let Some(column) = sort_by.column() {
            sql.push_str(" ORDER BY ");
            sql.push_str(column);
            sql.push_str(match sort_order {
                SortOrder::Asc => " ASC",
                SortOrder::Desc => " DESC",
            });
        }

        let guard = self.lock()?;
        let mut stmt = guard.prepare(&sql)?;
        let ids = stmt
            .query_map(rusqlite::params_from_iter(params), |row| {
                row.get::<_, i64>(0).map(|id| id as u64)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Fetch item rows for the given ids, preserving the input order.
    pub fn item_rows(&self, ids: &[u64]) -> StoreResult<Vec<ItemRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, type, by, time, text, url, score, title, descendants
             FROM items WHERE id IN ({})",
            placeholders(ids.len())
        );
        let params: Vec<Value> = ids.iter().map(|&id| Value::Integer(id as i64)).collect();

        let guard = self.lock()?;
        let mut stmt = guard.prepare(&sql)?;
        let mut by_id: HashMap<u64, ItemRow> = stmt
            .query_map(rusqlite::params_from_iter(params), |row| {
                let id = row.get::<_, i64>(0)? as u64;
                Ok((
                    id,
                    ItemRow {
                        id,
                        ty: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        by: row.get(2)?,
                        time: row.get(3)?,
                        text: row.get(4)?,
                        url: row.get(5)?,
                        score: row.get(6)?,
                        title: row.get(7)?,
                        descendants: row.get(8)?,
                    },
                ))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// The most prominent comment texts of a story: the first `limit` top
    /// level comments, each followed by its own first reply.
    pub fn top_comment_texts(&self, story_id: u64, limit: usize) -> StoreResult<Vec<String>> {
        let guard = self.lock()?;
        let mut texts = Vec::new();

        let mut stmt = guard.prepare_cached(
            "SELECT i.id, i.text FROM items i
             JOIN kids k ON i.id = k.kid
             WHERE k.item = ?1 AND i.type = 'comment' AND i.text IS NOT NULL
             ORDER BY k.display_order
             LIMIT ?2",
        )?;
        let comments = stmt
            .query_map(params![story_id as i64, limit as i64], |row| {
                Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut first_reply = guard.prepare_cached(
            "SELECT i.text FROM items i
             JOIN kids k ON i.id = k.kid
             WHERE k.item = ?1 AND i.type = 'comment' AND i.text IS NOT NULL
             ORDER BY k.display_order
             LIMIT 1",
        )?;
        for (id, text) in comments {
            texts.push(text);
            let reply: Option<String> = first_reply
                .query_row(params![id as i64], |row| row.get(0))
                .optional()?;
            if let Some(reply) = reply {
                texts.push(reply);
            }
        }
        Ok(texts)
    }

    /// Aggregate counts for the metrics report.
    pub fn stats(&self) -> StoreResult<StoreStats> {
        let guard = self.lock()?;
        let (max_item_id, total_items): (Option<i64>, i64) = guard.query_row(
            "SELECT MAX(id), COUNT(*) FROM items",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let max_story_id: Option<i64> = guard.query_row(
            "SELECT MAX(id) FROM items WHERE type = 'story'",
            [],
            |row| row.get(0),
        )?;

        Ok(StoreStats {
            max_item_id: max_item_id.unwrap_or(0) as u64,
            total_items: total_items as u64,
            max_story_id: max_story_id.unwrap_or(0) as u64,
        })
    }
}

/// Ordered direct comment children of an item.
fn comment_children(conn: &Connection, parent: u64) -> StoreResult<Vec<CommentRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT i.id, i.parent, i.text FROM items i
         JOIN kids k ON i.id = k.kid
         WHERE k.item = ?1 AND i.type = 'comment' AND i.text IS NOT NULL
         ORDER BY k.display_order",
    )?;
    let rows = stmt
        .query_map(params![parent as i64], |row| {
            Ok(CommentRow {
                id: row.get::<_, i64>(0)? as u64,
                parent: row.get::<_, Option<i64>>(1)?.unwrap_or_default() as u64,
                text: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn collect_descendants(
    conn: &Connection,
    comment: CommentRow,
    out: &mut Vec<CommentRow>,
) -> StoreResult<()> {
    let id = comment.id;
    out.push(comment);
    for child in comment_children(conn, id)? {
        collect_descendants(conn, child, out)?;
    }
    Ok(())
}

fn placeholders(n: usize) -> String {
    let mut s = "?,".repeat(n);
    s.pop();
    s
}

fn join_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod item_store_tests;
