//! Thread-safe in-memory [`DocumentStore`].
//!
//! Documents are embedded once on insert; semantic search is a brute-force
//! cosine scan over the collection.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::embed::{cosine_distance, HashingEmbedder};
use crate::traits::{DocumentStore, Embedder};
use crate::types::{Document, MetadataFilter, SemanticHit};

struct StoredDocument {
    document: Document,
    vector: Vec<f32>,
}

pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, Vec<StoredDocument>>>,
    embedder: Box<dyn Embedder>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self { Self::with_embedder(Box::new(HashingEmbedder::default())) }

    pub fn with_embedder(embedder: Box<dyn Embedder>) -> Self {
        Self { collections: RwLock::new(HashMap::new()), embedder }
    }

    /// Insert or replace documents by id. Replaced documents keep their position.
    pub fn upsert<I>(&self, collection: &str, documents: I) -> Result<usize>
    where
        I: IntoIterator<Item = Document>,
    {
        let documents: Vec<Document> = documents.into_iter().collect();
        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts)?;
        anyhow::ensure!(vectors.len() == documents.len(), "embedder returned {} vectors for {} documents", vectors.len(), documents.len());

        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let stored = collections.entry(collection.to_string()).or_default();
        let count = documents.len();
        for (document, vector) in documents.into_iter().zip(vectors) {
            match stored.iter_mut().find(|s| s.document.id == document.id) {
                Some(existing) => *existing = StoredDocument { document, vector },
                None => stored.push(StoredDocument { document, vector }),
            }
        }
        Ok(count)
    }

    pub fn remove(&self, collection: &str, id: &str) -> bool {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let Some(stored) = collections.get_mut(collection) else { return false };
        let before = stored.len();
        stored.retain(|s| s.document.id != id);
        stored.len() != before
    }

    pub fn len(&self, collection: &str) -> usize {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        collections.get(collection).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool { self.len(collection) == 0 }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self { Self::new() }
}

impl DocumentStore for InMemoryDocumentStore {
    fn list_documents(&self, collection: &str, limit: usize, offset: usize) -> Result<Vec<Document>> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        let Some(stored) = collections.get(collection) else { return Ok(Vec::new()) };
        Ok(stored.iter().skip(offset).take(limit).map(|s| s.document.clone()).collect())
    }

    fn semantic_search(
        &self,
        collection: &str,
        query: &str,
        max_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SemanticHit>> {
        let query_vec = self
            .embedder
            .embed_batch(&[query.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector for the query"))?;
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        let Some(stored) = collections.get(collection) else { return Ok(Vec::new()) };
        let mut hits: Vec<SemanticHit> = stored
            .iter()
            .filter(|s| filter.map_or(true, |f| f.matches(&s.document.metadata)))
            .map(|s| SemanticHit { document: s.document.clone(), distance: cosine_distance(&query_vec, &s.vector) })
            .collect();
        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(max_results);
        Ok(hits)
    }
}
