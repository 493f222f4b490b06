use crate::types::{Document, MetadataFilter, SemanticHit};

pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// The external document store / vector database.
///
/// Calls may block on network or disk; callers running on an async runtime
/// are expected to move them onto a blocking thread.
pub trait DocumentStore: Send + Sync {
    /// One page of a collection in stable order. A page shorter than `limit`
    /// marks the end of the collection.
    fn list_documents(&self, collection: &str, limit: usize, offset: usize) -> anyhow::Result<Vec<Document>>;

    /// Nearest neighbors of `query`, closest first, with cosine distances in `[0, 2]`.
    fn semantic_search(
        &self,
        collection: &str,
        query: &str,
        max_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> anyhow::Result<Vec<SemanticHit>>;
}
