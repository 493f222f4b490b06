//! recall-text
//!
//! Keyword side of the hybrid engine: a tantivy-analyzer tokenizer, an
//! in-memory BM25 index, and crash-safe on-disk persistence of that index.

pub mod bm25;
pub mod persistence;
pub mod tokenizer;

pub use bm25::{Bm25Stats, SparseHit, SparseIndex, INDEX_SCHEMA_VERSION};
pub use persistence::{checksum, IndexPersistence, PersistedIndexRecord};
pub use tokenizer::Tokenizer;
