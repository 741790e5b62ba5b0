//! The HTTP surface: vector search, the ranked query endpoint and metrics.
use crate::answer::AnswerService;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use hn_embed::Embedder;
use hn_store::{EmbeddingStore, ItemStore, SearchFilters, SortBy, SortOrder};
use hn_sync::{SyncService, Telemetry};
use hn_vector::{QueryEngine, VectorIndex};
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{sync::Arc, time::Instant};

/// Default and maximum search depth.
const DEFAULT_TOP_K: usize = 50;
const MAX_TOP_K: usize = 50;
/// Result page clamps for the ranked query endpoint.
const MIN_LIMIT: usize = 3;
const MAX_LIMIT: usize = 50;
const DEFAULT_LIMIT: usize = 10;
/// Shortest accepted query.
const MIN_QUERY_CHARS: usize = 3;

pub struct AppState {
    pub index: Arc<VectorIndex>,
    pub engine: QueryEngine,
    pub items: Arc<ItemStore>,
    pub embeddings: Arc<EmbeddingStore>,
    pub sync: Arc<SyncService>,
    pub telemetry: Arc<Telemetry>,
    pub encoder: Embedder,
    pub answers: AnswerService,
    pub passwd: Option<String>,
    pub debug: bool,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/search", get(search))
        .route("/query", get(query))
        .route("/metrics", get(metrics))
        .with_state(state)
}

type ApiError = (StatusCode, String);

fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, message.to_owned())
}

fn internal(err: impl std::fmt::Display) -> ApiError {
    error!("Request failed: {err}");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_owned())
}

fn validate_query(query: &str) -> Result<&str, ApiError> {
    let query = query.trim();
    if query.chars().count() < MIN_QUERY_CHARS {
        return Err(bad_request("query must be at least 3 characters"));
    }
    Ok(query)
}

#[derive(Deserialize)]
struct SearchParams {
    query: String,
    top_k: Option<usize>,
}

/// `GET /search` — raw nearest neighbors: `[[story_id, distance], ...]` in
/// vector order, deduplicated by story.
async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<(u64, f32)>>, ApiError> {
    let query = validate_query(&params.query)?;

    let top_k = match params.top_k {
        Some(0) => return Ok(Json(Vec::new())),
        Some(top_k) => top_k.clamp(1, MAX_TOP_K),
        None => DEFAULT_TOP_K,
    };

    let start = Instant::now();
    let hits = state.index.search(query, top_k).await.map_err(internal)?;
    if state.debug {
        info!(
            "search({:.3}s) num({top_k} -> {}): '{query}'",
            start.elapsed().as_secs_f64(),
            hits.len()
        );
    }
    Ok(Json(hits))
}

#[derive(Deserialize)]
struct QueryParams {
    query: String,
    by: Option<String>,
    before_time: Option<i64>,
    after_time: Option<i64>,
    min_score: Option<i64>,
    max_score: Option<i64>,
    min_comments: Option<i64>,
    max_comments: Option<i64>,
    sort_by: Option<SortBy>,
    sort_order: Option<SortOrder>,
    skip: Option<usize>,
    limit: Option<usize>,
    answer: Option<bool>,
}

#[derive(Serialize)]
struct ItemSummary {
    id: u64,
    #[serde(rename = "type")]
    ty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    score: i64,
    descendants: i64,
    hn_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<String>,
}

fn format_time(time: Option<i64>) -> Option<String> {
    chrono::DateTime::from_timestamp(time?, 0)
        .map(|datetime| datetime.format("%b %d, %Y %H:%M").to_string())
}

fn format_epoch(time: i64) -> String {
    if time == 0 {
        return "never".to_owned();
    }
    format_time(Some(time)).unwrap_or_else(|| "never".to_owned())
}

/// `GET /query` — the ranked search: blended ordering, catalog filters and
/// an optional generated answer on the first result.
async fn query(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Result<Json<Vec<ItemSummary>>, ApiError> {
    let query = validate_query(&params.query)?;

    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIMIT)
        .clamp(MIN_LIMIT, MAX_LIMIT);
    let skip = params.skip.unwrap_or(0);
    let sort_by = params.sort_by.unwrap_or_default();
    let sort_order = params.sort_order.unwrap_or_default();
    let filters = SearchFilters {
        by: params.by.clone(),
        before_time: params.before_time,
        after_time: params.after_time,
        min_score: params.min_score,
        max_score: params.max_score,
        min_comments: params.min_comments,
        max_comments: params.max_comments,
    };

    let start = Instant::now();
    let ids = state
        .engine
        .search(query, &filters, sort_by, sort_order)
        .await
        .map_err(internal)?;

    let page: Vec<u64> = ids.iter().skip(skip).take(limit).copied().collect();
    let rows = state.items.item_rows(&page).map_err(internal)?;
    if state.debug {
        info!(
            "query({:.3}s) num({} -> {}): '{query}'",
            start.elapsed().as_secs_f64(),
            ids.len(),
            rows.len()
        );
    }

    let mut results: Vec<ItemSummary> = rows
        .into_iter()
        .map(|row| ItemSummary {
            hn_url: format!("https://news.ycombinator.com/item?id={}", row.id),
            id: row.id,
            ty: row.ty,
            by: row.by,
            time: format_time(row.time),
            title: row.title,
            url: row.url,
            score: row.score.unwrap_or(0),
            descendants: row.descendants.unwrap_or(0),
            answer: None,
        })
        .collect();

    if params.answer.unwrap_or(false) {
        if let Some(answer) = state.answers.answer(query, &page).await {
            if let Some(first) = results.first_mut() {
                first.answer = Some(answer);
            }
        }
    }
    Ok(Json(results))
}

#[derive(Deserialize)]
struct MetricsParams {
    passwd: Option<String>,
}

/// `GET /metrics` — counters, flags and store sizes, guarded by the shared
/// secret when one is configured.
async fn metrics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MetricsParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(expected) = &state.passwd {
        if params.passwd.as_deref() != Some(expected.as_str()) {
            return Err((StatusCode::UNAUTHORIZED, "bad password".to_owned()));
        }
    }

    let stats = state.items.stats().map_err(internal)?;
    let (total_embeddings, embedded_stories) = state.embeddings.counts().map_err(internal)?;
    let snapshot = state.telemetry.snapshot();

    Ok(Json(json!({
        "db": {
            "max_item_id": stats.max_item_id,
            "total_items": stats.total_items,
            "max_story_id": stats.max_story_id,
            "total_embeddings": total_embeddings,
            "embedded_stories": embedded_stories,
        },
        "counters": {
            "updates": snapshot.updates,
            "items_updated": snapshot.items_updated,
            "users_updated": snapshot.users_updated,
            "affected_stories": snapshot.affected_stories,
            "embedded_stories": snapshot.embedded_stories,
            "embed_runs": snapshot.embed_runs,
            "cache_size": state.encoder.cache_len(),
            "cache_hits": state.encoder.cache_hits(),
            "index_points": state.index.len(),
        },
        "times": {
            "started_at": format_epoch(snapshot.started_at),
            "last_update": format_epoch(snapshot.last_update),
            "last_embed": format_epoch(snapshot.last_embed),
        },
        "flags": {
            "initial_fetch_completed": state.sync.initial_fetch_completed(),
            "tailer_state": state.sync.tailer_state().as_str(),
        },
    })))
}
