use super::QueryEngine;
use crate::VectorIndex;
use async_trait::async_trait;
use hn_api::Item;
use hn_embed::{Embedder, EmbeddingModel};
use hn_store::{EmbeddingStore, ItemStore, SearchFilters, SortBy, SortOrder};
use std::sync::Arc;

struct StubModel;

#[async_trait]
impl EmbeddingModel for StubModel {
    async fn embed(&self, inputs: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|_| vec![0.0, 0.0]).collect())
    }
}

fn story(id: u64, title: &str, by: &str, score: i64, time: u64) -> Item {
    Item {
        id,
        ty: "story".into(),
        by: Some(by.into()),
        time,
        title: Some(title.into()),
        score: Some(score),
        descendants: Some(5),
        ..Item::default()
    }
}

async fn fixture() -> QueryEngine {
    let items = Arc::new(ItemStore::open_in_memory().unwrap());
    items
        .upsert_items(&[
            story(1, "rust memory safety", "alice", 100, 1_700_000_000),
            story(2, "gardening at night", "bob", 400, 1_600_000_000),
            story(3, "untitled", "alice", 50, 1_700_100_000),
        ])
        .unwrap();

    let embeddings = Arc::new(EmbeddingStore::open_in_memory().unwrap());
    embeddings
        .upsert_parts(&[
            (1, 0, vec![0.0, 0.1]),
            (2, 0, vec![0.3, 0.0]),
            (3, 0, vec![0.0, 0.2]),
        ])
        .unwrap();

    let (encoder, _handle) = Embedder::spawn(Arc::new(StubModel), None);
    let index = Arc::new(VectorIndex::build(embeddings, encoder).unwrap());
    QueryEngine::new(index, items)
}

#[tokio::test]
async fn unfiltered_relevance_search_returns_ranked_ids() {
    let engine = fixture().await;

    let ids = engine
        .search(
            "rust memory",
            &SearchFilters::default(),
            SortBy::Relevance,
            SortOrder::Desc,
        )
        .await
        .unwrap();

    assert_eq!(ids.len(), 3);
    // Close vector, topical title and recency all favor story 1.
    assert_eq!(ids[0], 1);
}

#[tokio::test]
async fn author_filter_intersects_candidates() {
    let engine = fixture().await;

    let filters = SearchFilters {
        by: Some("alice".into()),
        ..SearchFilters::default()
    };
    let ids = engine
        .search("anything", &filters, SortBy::Relevance, SortOrder::Desc)
        .await
        .unwrap();

    assert!(!ids.is_empty());
    assert!(ids.iter().all(|id| [1, 3].contains(id)));
}

#[tokio::test]
async fn explicit_sort_overrides_relevance() {
    let engine = fixture().await;

    let ids = engine
        .search(
            "anything",
            &SearchFilters::default(),
            SortBy::Score,
            SortOrder::Desc,
        )
        .await
        .unwrap();

    assert_eq!(ids, vec![2, 1, 3]);
}

#[tokio::test]
async fn filtered_output_is_subset_of_candidates() {
    let engine = fixture().await;

    let filters = SearchFilters {
        min_score: Some(90),
        ..SearchFilters::default()
    };
    let ids = engine
        .search("anything", &filters, SortBy::Relevance, SortOrder::Desc)
        .await
        .unwrap();

    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, vec![1, 2]);
}
