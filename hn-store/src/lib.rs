//! SQLite persistence: the item catalog, the embedding store and the
//! missing-id ledger.
use thiserror::Error;

mod embedding_store;
mod item_store;
mod missing;

pub use embedding_store::{EmbeddingStore, VectorSet};
pub use item_store::{
    CommentRow, ItemRow, ItemStore, RankMeta, SearchFilters, SortBy, SortOrder, StoreStats,
    StorySeed, MIN_DESCENDANTS, MIN_SCORE,
};
pub use missing::MissingIds;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to access store file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store lock poisoned")]
    Lock,
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
