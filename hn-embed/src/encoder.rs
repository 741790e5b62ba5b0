//! A batched request queue in front of the embedding model.
//!
//! All model traffic funnels through a single dispatcher task. Query-time
//! requests jump the queue ahead of document batches, and a persistent LRU
//! keeps repeat inputs off the wire entirely.
use async_trait::async_trait;
use log::{error, info, warn};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

/// Upper bound on cached inputs.
pub const CACHE_LIMIT: usize = 100_000;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("Embedding queue is closed")]
    QueueClosed,
}

/// Queue priority. Queries embed ahead of document batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Normal,
}

/// A black-box embedding model: a batch of inputs in, one fixed-dimension
/// vector per input out.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed(&self, inputs: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

struct EncodeRequest {
    inputs: Vec<String>,
    reply: oneshot::Sender<Vec<Option<Vec<f32>>>>,
}

/// Handle to the embedding queue. Cheap to clone; all clones share the
/// dispatcher and the cache.
#[derive(Clone)]
pub struct Embedder {
    high_tx: mpsc::UnboundedSender<EncodeRequest>,
    normal_tx: mpsc::UnboundedSender<EncodeRequest>,
    cache: Arc<Mutex<EmbedCache>>,
}

/// Collapse case and whitespace so trivially different inputs share one
/// cache entry and one model call.
pub fn normalize(input: &str) -> String {
    let lower = input.to_lowercase();
    lower.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl Embedder {
    /// Spawn the dispatcher over the given model. The cache warm-starts from
    /// `cache_path` when present and appends new entries to it.
    pub fn spawn(
        model: Arc<dyn EmbeddingModel>,
        cache_path: Option<&Path>,
    ) -> (Self, JoinHandle<()>) {
        let cache = Arc::new(Mutex::new(EmbedCache::load(cache_path)));
        let (high_tx, mut high_rx) = mpsc::unbounded_channel();
        let (normal_tx, mut normal_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            loop {
                let request = tokio::select! {
                    biased;
                    request = high_rx.recv() => request,
                    request = normal_rx.recv() => request,
                };
                let Some(EncodeRequest { inputs, reply }) = request else {
                    break;
                };

                let vectors = match model.embed(&inputs).await {
                    Ok(vectors) if vectors.len() == inputs.len() => {
                        vectors.into_iter().map(Some).collect()
                    }
                    Ok(vectors) => {
                        error!(
                            "Model returned {} vectors for {} inputs",
                            vectors.len(),
                            inputs.len()
                        );
                        vec![None; inputs.len()]
                    }
                    Err(err) => {
                        error!("Embedding request failed: {err}");
                        vec![None; inputs.len()]
                    }
                };

                if reply.send(vectors).is_err() {
                    warn!("Embedding caller went away before the reply");
                }
            }
            info!("Embedding dispatcher has exited.");
        });

        (
            Self {
                high_tx,
                normal_tx,
                cache,
            },
            handle,
        )
    }

    /// Embed a batch of inputs. Returns one entry per input in order; an
    /// entry is [`None`] when the model failed for it, and callers drop the
    /// affected item rather than poisoning their batch.
    pub async fn encode(
        &self,
        inputs: &[String],
        priority: Priority,
    ) -> Result<Vec<Option<Vec<f32>>>, EmbedError> {
        let normalized: Vec<String> = inputs.iter().map(|input| normalize(input)).collect();
        let mut results: Vec<Option<Vec<f32>>> = vec![None; inputs.len()];
        let mut pending = Vec::new();

        {
            let mut cache = self.cache.lock().unwrap();
            for (i, key) in normalized.iter().enumerate() {
                match cache.get(key) {
                    Some(vector) => results[i] = Some(vector),
                    None => pending.push(i),
                }
            }
        }
        if pending.is_empty() {
            return Ok(results);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = EncodeRequest {
            inputs: pending.iter().map(|&i| normalized[i].clone()).collect(),
            reply: reply_tx,
        };
        let tx = match priority {
            Priority::High => &self.high_tx,
            Priority::Normal => &self.normal_tx,
        };
        tx.send(request).map_err(|_| EmbedError::QueueClosed)?;
        let vectors = reply_rx.await.map_err(|_| EmbedError::QueueClosed)?;

        let mut cache = self.cache.lock().unwrap();
        for (&i, vector) in pending.iter().zip(vectors) {
            if let Some(vector) = vector {
                cache.insert(&normalized[i], &vector);
                results[i] = Some(vector);
            }
        }
        Ok(results)
    }

    /// Embed a single query at high priority.
    pub async fn encode_query(&self, query: &str) -> Result<Option<Vec<f32>>, EmbedError> {
        let mut vectors = self.encode(&[query.to_owned()], Priority::High).await?;
        Ok(vectors.pop().flatten())
    }

    /// Cached entry count, for the metrics report.
    pub fn cache_len(&self) -> usize {
        self.cache.lock().unwrap().lru.len()
    }

    /// Cache hit count, for the metrics report.
    pub fn cache_hits(&self) -> u64 {
        self.cache.lock().unwrap().hits
    }
}

/// One line of the persisted cache file.
#[derive(Serialize, Deserialize)]
struct CacheRecord {
    query: String,
    embedding: Vec<f32>,
}

struct EmbedCache {
    lru: LruCache<String, Vec<f32>>,
    file: Option<File>,
    path: Option<PathBuf>,
    hits: u64,
}

impl EmbedCache {
    fn load(path: Option<&Path>) -> Self {
        let mut lru = LruCache::new(NonZeroUsize::new(CACHE_LIMIT).unwrap());

        if let Some(path) = path {
            match File::open(path) {
                Ok(file) => {
                    let mut loaded = 0usize;
                    for line in BufReader::new(file).lines() {
                        let Ok(line) = line else { break };
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<CacheRecord>(&line) {
                            Ok(record) => {
                                lru.put(record.query, record.embedding);
                                loaded += 1;
                            }
                            // A torn trailing record from a crash is fine.
                            Err(err) => warn!("Skipping bad cache record: {err}"),
                        }
                    }
                    info!("Loaded {loaded} cache entries from {path:?}");
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
                Err(err) => warn!("Could not read embedder cache {path:?}: {err}"),
            }
        }

        let file = path.and_then(|path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| warn!("Could not open embedder cache for append: {err}"))
                .ok()
        });

        Self {
            lru,
            file,
            path: path.map(Path::to_path_buf),
            hits: 0,
        }
    }

    fn get(&mut self, key: &str) -> Option<Vec<f32>> {
        let vector = self.lru.get(key).cloned();
        if vector.is_some() {
            self.hits += 1;
        }
        vector
    }

    fn insert(&mut self, key: &str, vector: &[f32]) {
        self.lru.put(key.to_owned(), vector.to_vec());

        if let Some(file) = self.file.as_mut() {
            let record = CacheRecord {
                query: key.to_owned(),
                embedding: vector.to_vec(),
            };
            let result = serde_json::to_string(&record)
                .map_err(anyhow::Error::new)
                .and_then(|line| Ok(writeln!(file, "{line}")?));
            if let Err(err) = result {
                warn!("Failed to append cache record to {:?}: {err}", self.path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic fake model that counts calls.
    struct FakeModel {
        calls: AtomicUsize,
    }

    impl FakeModel {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl EmbeddingModel for FakeModel {
        async fn embed(&self, inputs: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(inputs
                .iter()
                .map(|input| vec![input.len() as f32, 1.0])
                .collect())
        }
    }

    struct FailingModel;

    #[async_trait]
    impl EmbeddingModel for FailingModel {
        async fn embed(&self, _inputs: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            anyhow::bail!("model offline")
        }
    }

    #[test]
    fn normalization_collapses_case_and_whitespace() {
        assert_eq!(normalize("  Best   Laptop\nDEALS "), "best laptop deals");
        assert_eq!(normalize("same"), normalize("SAME"));
    }

    #[tokio::test]
    async fn equivalent_queries_share_one_model_call() {
        let model = FakeModel::new();
        let (embedder, _handle) = Embedder::spawn(model.clone(), None);

        let first = embedder.encode_query("Best Laptop").await.unwrap();
        let second = embedder.encode_query("  best   laptop ").await.unwrap();

        assert_eq!(first, second);
        assert!(first.is_some());
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(embedder.cache_hits(), 1);
    }

    #[tokio::test]
    async fn failure_surfaces_as_no_vector() {
        let (embedder, _handle) = Embedder::spawn(Arc::new(FailingModel), None);

        let vectors = embedder
            .encode(&["a".into(), "b".into()], Priority::Normal)
            .await
            .unwrap();

        assert_eq!(vectors, vec![None, None]);
    }

    #[tokio::test]
    async fn cache_persists_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embedder_cache.jsonl");

        let model = FakeModel::new();
        {
            let (embedder, _handle) = Embedder::spawn(model.clone(), Some(path.as_path()));
            embedder.encode_query("warm start").await.unwrap();
        }
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);

        let (embedder, _handle) = Embedder::spawn(model.clone(), Some(path.as_path()));
        let vector = embedder.encode_query("warm START").await.unwrap();

        assert!(vector.is_some());
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(embedder.cache_len(), 1);
    }

    #[tokio::test]
    async fn mixed_batch_only_sends_uncached_inputs() {
        let model = FakeModel::new();
        let (embedder, _handle) = Embedder::spawn(model.clone(), None);

        embedder.encode_query("known").await.unwrap();
        let vectors = embedder
            .encode(&["known".into(), "new input".into()], Priority::Normal)
            .await
            .unwrap();

        assert!(vectors.iter().all(Option::is_some));
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }
}
