//! recall-hybrid
//!
//! Dense + sparse retrieval behind one `search` call, with score fusion and a
//! query-result cache in front.

pub mod fusion;
pub mod retriever;

pub use fusion::{fuse, FusionWeights, SparseCandidate};
pub use retriever::{HybridRetriever, IndexStats, SearchRequest};
