use super::*;
use crate::encoder::EmbeddingModel;
use async_trait::async_trait;
use hn_api::Item;

struct HashModel;

#[async_trait]
impl EmbeddingModel for HashModel {
    async fn embed(&self, inputs: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(inputs
            .iter()
            .map(|input| vec![input.len() as f32, input.lines().count() as f32])
            .collect())
    }
}

fn story(id: u64, score: i64, descendants: i64, kids: &[u64]) -> Item {
    Item {
        id,
        ty: "story".into(),
        time: 1_700_000_000,
        title: Some(format!("Story {id}")),
        score: Some(score),
        kids: kids.to_vec(),
        descendants: Some(descendants as u64),
        ..Item::default()
    }
}

fn comment(id: u64, parent: u64, text: &str) -> Item {
    Item {
        id,
        ty: "comment".into(),
        time: 1_700_000_000,
        text: Some(text.into()),
        parent: Some(parent),
        ..Item::default()
    }
}

fn fixture() -> (Arc<ItemStore>, Arc<EmbeddingStore>, DocumentEmbedder) {
    let items = Arc::new(ItemStore::open_in_memory().unwrap());
    let embeddings = Arc::new(EmbeddingStore::open_in_memory().unwrap());
    let (encoder, _handle) = Embedder::spawn(Arc::new(HashModel), None);
    let embedder = DocumentEmbedder::new(items.clone(), embeddings.clone(), encoder);
    (items, embeddings, embedder)
}

#[tokio::test]
async fn catchup_covers_every_eligible_story() {
    let (items, embeddings, embedder) = fixture();
    items
        .upsert_items(&[
            story(1, 30, 3, &[2]),
            comment(2, 1, "a comment"),
            story(3, 19, 10, &[4]), // below score threshold
            comment(4, 3, "ignored"),
            story(5, 50, 3, &[6]),
            comment(6, 5, "another comment"),
        ])
        .unwrap();

    embedder.catchup(0).await.unwrap();

    let mut covered = embeddings.embedded_story_ids().unwrap();
    covered.sort_unstable();
    assert_eq!(covered, vec![1, 5]);
}

#[tokio::test]
async fn catchup_resumes_and_backfills_missing() {
    let (items, embeddings, embedder) = fixture();
    items
        .upsert_items(&[
            story(1, 30, 3, &[2]),
            comment(2, 1, "one"),
            story(3, 30, 3, &[4]),
            comment(4, 3, "three"),
            story(5, 30, 3, &[6]),
            comment(6, 5, "five"),
        ])
        .unwrap();

    // Story 5 already embedded, 1 and 3 missing: the pointer must rewind.
    embeddings.upsert_parts(&[(5, 0, vec![1.0, 1.0])]).unwrap();

    embedder.catchup(0).await.unwrap();

    let mut covered = embeddings.embedded_story_ids().unwrap();
    covered.sort_unstable();
    assert_eq!(covered, vec![1, 3, 5]);
}

#[tokio::test]
async fn catchup_is_idempotent() {
    let (items, embeddings, embedder) = fixture();
    items
        .upsert_items(&[story(1, 30, 3, &[2]), comment(2, 1, "hello")])
        .unwrap();

    embedder.catchup(0).await.unwrap();
    let (total_first, _) = embeddings.counts().unwrap();

    embedder.catchup(0).await.unwrap();
    let (total_second, _) = embeddings.counts().unwrap();

    assert_eq!(total_first, total_second);
}

#[tokio::test]
async fn realtime_skips_ineligible_stories() {
    let (items, embeddings, embedder) = fixture();
    items
        .upsert_items(&[
            story(1, 19, 10, &[2]),
            comment(2, 1, "noise"),
            story(3, 20, 3, &[4]),
            comment(4, 3, "signal"),
        ])
        .unwrap();

    let processed = embedder.process_stories(&[1, 3, 999]).await.unwrap();

    assert_eq!(processed, vec![3]);
    assert_eq!(embeddings.embedded_story_ids().unwrap(), vec![3]);
}

#[tokio::test]
async fn reprocessing_replaces_parts() {
    let (items, embeddings, embedder) = fixture();
    items
        .upsert_items(&[story(1, 30, 3, &[2]), comment(2, 1, "first pass")])
        .unwrap();

    embedder.process_stories(&[1]).await.unwrap();
    let before = embeddings.load_story(1).unwrap();

    items
        .upsert_items(&[comment(2, 1, "a rather longer second pass")])
        .unwrap();
    embedder.process_stories(&[1]).await.unwrap();
    let after = embeddings.load_story(1).unwrap();

    assert_eq!(before.len(), after.len());
    assert_ne!(before.vector(0), after.vector(0));
}
