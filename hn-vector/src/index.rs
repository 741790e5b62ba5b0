//! The searchable index over the embedding store.
use crate::{
    ivf::{IvfFlat, NLIST, NPROBE},
    VectorError, VectorResult,
};
use hn_embed::Embedder;
use hn_store::EmbeddingStore;
use log::info;
use std::sync::{Arc, RwLock};

/// In-memory index over every persisted document vector. Searches take the
/// read lock and run on in-memory arrays only; mutations take the write
/// lock, so a story's remove and re-add are totally ordered with respect to
/// any search.
pub struct VectorIndex {
    ivf: RwLock<IvfFlat>,
    store: Arc<EmbeddingStore>,
    encoder: Embedder,
}

impl VectorIndex {
    /// Build the index from scratch by scanning the embedding store in
    /// insertion order. The dimension is discovered from the first vector;
    /// any later mismatch aborts the scan.
    pub fn build(store: Arc<EmbeddingStore>, encoder: Embedder) -> VectorResult<Self> {
        let set = store.load_all()?;
        info!("Loaded {} vectors (dim {})", set.len(), set.dim);

        let mut ivf = IvfFlat::train(set.dim, &set.vectors, NLIST, NPROBE);
        for row in 0..set.len() {
            ivf.add(set.ids[row], set.vector(row));
        }
        info!("Trained index with {} points", ivf.len());

        Ok(Self {
            ivf: RwLock::new(ivf),
            store,
            encoder,
        })
    }

    /// Embed the query and return up to `top_k` `(story_id, distance)`
    /// pairs, closest first, one entry per story. A query the model could
    /// not embed yields no results.
    pub async fn search(&self, query: &str, top_k: usize) -> VectorResult<Vec<(u64, f32)>> {
        let Some(vector) = self.encoder.encode_query(query).await? else {
            return Ok(Vec::new());
        };

        let ivf = self.ivf.read().map_err(|_| VectorError::Lock)?;
        if !ivf.is_untrained() && vector.len() != ivf.dim() {
            return Err(VectorError::Dimension {
                expected: ivf.dim(),
                actual: vector.len(),
            });
        }
        Ok(ivf.search(&vector, top_k))
    }

    /// Refresh the given stories: drop all their points, then re-add
    /// whatever the embedding store now holds for them. An index built
    /// before any vectors existed is retrained from the full store instead.
    pub fn update(&self, story_ids: &[u64]) -> VectorResult<()> {
        if self.ivf.read().map_err(|_| VectorError::Lock)?.is_untrained() {
            let set = self.store.load_all()?;
            if set.is_empty() {
                return Ok(());
            }
            let mut ivf = IvfFlat::train(set.dim, &set.vectors, NLIST, NPROBE);
            for row in 0..set.len() {
                ivf.add(set.ids[row], set.vector(row));
            }
            info!("Retrained empty index with {} points", ivf.len());
            *self.ivf.write().map_err(|_| VectorError::Lock)? = ivf;
            return Ok(());
        }

        for &story_id in story_ids {
            // Load outside the lock; the store is single-writer and the
            // worst case is re-adding a part that just changed again.
            let set = self.store.load_story(story_id)?;

            let mut ivf = self.ivf.write().map_err(|_| VectorError::Lock)?;
            if set.dim != 0 && set.dim != ivf.dim() {
                return Err(VectorError::Dimension {
                    expected: ivf.dim(),
                    actual: set.dim,
                });
            }
            ivf.remove_id(story_id);
            for row in 0..set.len() {
                ivf.add(set.ids[row], set.vector(row));
            }
        }
        Ok(())
    }

    /// Total points currently indexed.
    pub fn len(&self) -> usize {
        self.ivf.read().map(|ivf| ivf.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
