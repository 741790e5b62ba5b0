//! Selects eligible stories, builds their document parts and persists the
//! vectors.
use crate::{
    document,
    encoder::{Embedder, Priority},
};
use anyhow::Result;
use hn_store::{EmbeddingStore, ItemStore, StorySeed, MIN_DESCENDANTS, MIN_SCORE};
use log::{info, warn};
use std::{collections::HashSet, sync::Arc};

/// Parts per model request.
pub const BATCH_SIZE: usize = 16;

pub struct DocumentEmbedder {
    items: Arc<ItemStore>,
    embeddings: Arc<EmbeddingStore>,
    encoder: Embedder,
}

impl DocumentEmbedder {
    pub fn new(items: Arc<ItemStore>, embeddings: Arc<EmbeddingStore>, encoder: Embedder) -> Self {
        Self {
            items,
            embeddings,
            encoder,
        }
    }

    /// Embed every eligible story that is not yet covered, resuming from the
    /// last processed story. Stories missing from the embedding store pull
    /// the resume pointer back so nothing is skipped; `offset` walks it back
    /// further to refresh recent stories whose discussions have grown.
    pub async fn catchup(&self, offset: u64) -> Result<()> {
        let eligible: HashSet<u64> = self.items.eligible_story_ids()?.into_iter().collect();
        let embedded: HashSet<u64> = self.embeddings.embedded_story_ids()?.into_iter().collect();

        // Exclusive cursor: stories with a larger id get (re)processed.
        let mut resume = self.embeddings.last_story()?;

        let missing_min = eligible.difference(&embedded).min().copied();
        if let Some(first_missing) = missing_min {
            let rewound = first_missing.saturating_sub(1);
            info!(
                "Found {} missing stories, rewinding resume pointer from {resume:?} to {rewound}",
                eligible.difference(&embedded).count()
            );
            resume = Some(resume.map_or(rewound, |last| last.min(rewound)));
        }

        if offset > 0 {
            if let Some(cursor) = resume {
                resume = self
                    .items
                    .rewind_story_id(cursor, offset)?
                    .map(|id| id.saturating_sub(1));
                info!("Resuming from story {resume:?} (after offset: {offset})");
            }
        }

        let seeds = self.items.eligible_stories_after(resume)?;
        info!("Found {} eligible discussions to embed", seeds.len());

        let mut batch = Vec::new();
        for seed in seeds {
            self.collect_parts(&seed, &mut batch)?;
            while batch.len() >= BATCH_SIZE {
                let rest = batch.split_off(BATCH_SIZE);
                self.flush(std::mem::replace(&mut batch, rest)).await?;
            }
        }
        if !batch.is_empty() {
            self.flush(batch).await?;
        }
        Ok(())
    }

    /// Regenerate all parts for the given stories, skipping any that fall
    /// short of the thresholds. Returns the ids actually processed so the
    /// vector index can be told to refresh them.
    pub async fn process_stories(&self, story_ids: &[u64]) -> Result<Vec<u64>> {
        let mut processed = Vec::new();

        for &story_id in story_ids {
            let Some((score, descendants)) = self.items.story_eligibility(story_id)? else {
                continue;
            };
            if score < MIN_SCORE || descendants < MIN_DESCENDANTS {
                continue;
            }
            let Some(seed) = self.items.story_seed(story_id)? else {
                continue;
            };

            let mut batch = Vec::new();
            self.collect_parts(&seed, &mut batch)?;
            self.flush(batch).await?;
            processed.push(story_id);
        }
        Ok(processed)
    }

    fn collect_parts(&self, seed: &StorySeed, batch: &mut Vec<(u64, u32, String)>) -> Result<()> {
        let comments = self.items.comment_tree(seed.id)?;
        for (part_index, part) in document::build_parts(seed, &comments).into_iter().enumerate() {
            batch.push((seed.id, part_index as u32, part));
        }
        Ok(())
    }

    async fn flush(&self, batch: Vec<(u64, u32, String)>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = batch.iter().map(|(_, _, text)| text.clone()).collect();
        let vectors = self.encoder.encode(&texts, Priority::Normal).await?;

        let mut rows = Vec::with_capacity(batch.len());
        let mut dropped = 0usize;
        for ((story, part_index, _), vector) in batch.into_iter().zip(vectors) {
            match vector {
                Some(vector) => rows.push((story, part_index, vector)),
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            warn!("Dropped {dropped} parts the model returned no vector for");
        }

        self.embeddings.upsert_parts(&rows)?;
        Ok(())
    }
}

#[cfg(test)]
mod engine_tests;
