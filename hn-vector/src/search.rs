//! The full query path: nearest neighbors, ranking, then optional catalog
//! filters and sorting.
use crate::{
    rank::{rank, Candidate},
    VectorIndex, VectorResult,
};
use hn_store::{ItemStore, SearchFilters, SortBy, SortOrder};
use log::debug;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

/// Candidate depth without filters.
const TOP_K: usize = 50;
/// Deeper candidate pool when filters will thin the results out.
const FILTERED_TOP_K: usize = 1_000;

pub struct QueryEngine {
    index: Arc<VectorIndex>,
    items: Arc<ItemStore>,
}

impl QueryEngine {
    pub fn new(index: Arc<VectorIndex>, items: Arc<ItemStore>) -> Self {
        Self { index, items }
    }

    /// Run a ranked search and return the ordered story ids. Without
    /// filters and with a relevance sort the blended ranking is the final
    /// order; otherwise the candidates are intersected with the catalog
    /// predicates and sorted as requested, with relevance preserving the
    /// ranked order among the survivors.
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        sort_by: SortBy,
        sort_order: SortOrder,
    ) -> VectorResult<Vec<u64>> {
        let query = query.trim();
        let top_k = if filters.is_empty() {
            TOP_K
        } else {
            FILTERED_TOP_K
        };

        let hits = self.index.search(query, top_k).await?;

        let mut candidates = Vec::with_capacity(hits.len());
        for (story_id, distance) in hits {
            let Some(meta) = self.items.rank_meta(story_id)? else {
                continue;
            };
            let Some(title) = meta.title else {
                continue;
            };
            candidates.push(Candidate {
                story_id,
                distance,
                title,
                score: meta.score.unwrap_or(1),
                time: meta.time.unwrap_or(0),
            });
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or(0);
        let ranked = rank(query, &candidates, now);
        debug!("Ranked {} of {top_k} candidates for '{query}'", ranked.len());

        if filters.is_empty() && sort_by == SortBy::Relevance {
            return Ok(ranked);
        }

        let mut filtered = self.items.filter_ids(&ranked, filters, sort_by, sort_order)?;
        if sort_by == SortBy::Relevance {
            let position: HashMap<u64, usize> = ranked
                .iter()
                .enumerate()
                .map(|(index, &id)| (id, index))
                .collect();
            filtered.sort_by_key(|id| position.get(id).copied().unwrap_or(usize::MAX));
        }
        Ok(filtered)
    }
}

#[cfg(test)]
mod search_tests;
