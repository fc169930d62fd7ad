//! Embedding and vector search infrastructure for resume ranking.
//!
//! # Architecture
//!
//! - `embeddings`: embedding providers (fastembed, feature hashing)
//! - `index`: in-memory vector index with cosine distance search
//! - `storage`: binary file I/O for vectors.bin persistence

pub mod embeddings;
mod index;
mod storage;

pub use embeddings::{provider_for, EmbeddingError, EmbeddingProvider, HashingEmbedder};
pub use index::{IndexEntry, IndexError, Metadata, Neighbor, VectorIndex};
pub use storage::{VectorStorage, VectorStorageError};

/// Default embedding model name
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// File name of the persisted index inside the data directory
pub const VECTORS_FILE: &str = "vectors.bin";
