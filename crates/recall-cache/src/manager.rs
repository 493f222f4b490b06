use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

use recall_core::settings::CacheSettings;
use recall_core::{RankedResult, Result};

use crate::bounded::{BoundedCache, CacheStats};

/// Document id → ids of related documents.
pub type CrossReferences = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheManagerStats {
    pub query_result: CacheStats,
    pub embedding: CacheStats,
    pub cross_reference: CacheStats,
    pub total_memory_mb: f64,
}

/// Query-result, embedding and cross-reference caches sharing one memory
/// budget split by the configured shares.
pub struct CacheManager {
    query_result: BoundedCache<Vec<RankedResult>>,
    embedding: BoundedCache<Vec<f32>>,
    cross_reference: BoundedCache<CrossReferences>,
}

impl CacheManager {
    pub fn new(settings: &CacheSettings) -> Result<Self> {
        settings.validate()?;
        let total = settings.max_memory_bytes();
        let ttl = Duration::from_secs(settings.ttl_seconds);
        let budget = |share: f64| ((total as f64) * share) as usize;
        let manager = Self {
            query_result: BoundedCache::new(settings.max_entries, budget(settings.query_share), ttl)?,
            embedding: BoundedCache::new(settings.max_entries, budget(settings.embedding_share), ttl)?,
            cross_reference: BoundedCache::new(settings.max_entries, budget(settings.cross_reference_share), ttl)?,
        };
        info!(max_entries = settings.max_entries, max_memory_mb = settings.max_memory_mb, ttl_seconds = settings.ttl_seconds, "cache manager initialized");
        Ok(manager)
    }

    pub fn get_query_result(&self, key: &str) -> Option<Vec<RankedResult>> { self.query_result.get(key) }

    pub fn cache_query_result(&self, key: impl Into<String>, results: Vec<RankedResult>) -> bool {
        self.query_result.put(key, results)
    }

    /// Drop cached query results only; used after a collection is reindexed.
    pub fn clear_query_results(&self) { self.query_result.clear() }

    pub fn get_embedding(&self, key: &str) -> Option<Vec<f32>> { self.embedding.get(key) }

    pub fn cache_embedding(&self, key: impl Into<String>, vector: Vec<f32>) -> bool {
        self.embedding.put(key, vector)
    }

    pub fn get_cross_reference(&self, key: &str) -> Option<CrossReferences> { self.cross_reference.get(key) }

    pub fn cache_cross_reference(&self, key: impl Into<String>, refs: CrossReferences) -> bool {
        self.cross_reference.put(key, refs)
    }

    pub fn clear_all(&self) {
        self.query_result.clear();
        self.embedding.clear();
        self.cross_reference.clear();
        info!("all caches cleared");
    }

    pub fn stats(&self) -> CacheManagerStats {
        let query_result = self.query_result.stats();
        let embedding = self.embedding.stats();
        let cross_reference = self.cross_reference.stats();
        let total_memory_mb = query_result.memory_usage_mb + embedding.memory_usage_mb + cross_reference.memory_usage_mb;
        CacheManagerStats { query_result, embedding, cross_reference, total_memory_mb }
    }
}
