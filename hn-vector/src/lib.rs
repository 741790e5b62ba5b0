//! The in-memory vector index and the ranking that turns raw nearest
//! neighbor hits into search results.
use thiserror::Error;

mod index;
mod ivf;
pub mod rank;
mod search;

pub use index::VectorIndex;
pub use ivf::{IvfFlat, NLIST, NPROBE};
pub use search::QueryEngine;

#[derive(Debug, Error)]
pub enum VectorError {
    #[error("Store error: {0}")]
    Store(#[from] hn_store::StoreError),
    #[error("Embedding error: {0}")]
    Embed(#[from] hn_embed::EmbedError),
    #[error("Vector dimension mismatch: index has {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
    #[error("Index lock poisoned")]
    Lock,
}

pub type VectorResult<T> = std::result::Result<T, VectorError>;
