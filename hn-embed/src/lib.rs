//! Turning discussion trees into token-bounded documents and embedding them.
pub mod document;
mod encoder;
mod engine;
mod openai;

pub use encoder::{normalize, EmbedError, Embedder, EmbeddingModel, Priority, CACHE_LIMIT};
pub use engine::{DocumentEmbedder, BATCH_SIZE};
pub use openai::OpenAiModel;
