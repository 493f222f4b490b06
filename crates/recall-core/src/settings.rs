//! Typed engine settings with defaults and fail-fast validation.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub cache: CacheSettings,
    pub retrieval: RetrievalSettings,
    pub bm25: Bm25Settings,
    pub persistence: PersistenceSettings,
}

impl EngineSettings {
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.retrieval.validate()?;
        self.bm25.validate()?;
        self.persistence.validate()
    }
}

/// Limits shared by the three caches. The memory budget is split between
/// them by the `*_share` fractions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub max_entries: usize,
    pub max_memory_mb: f64,
    pub ttl_seconds: u64,
    pub query_share: f64,
    pub embedding_share: f64,
    pub cross_reference_share: f64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_memory_mb: 256.0,
            ttl_seconds: 3600,
            query_share: 0.3,
            embedding_share: 0.5,
            cross_reference_share: 0.2,
        }
    }
}

impl CacheSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(Error::InvalidConfig("cache.max_entries must be positive".into()));
        }
        if !(self.max_memory_mb.is_finite() && self.max_memory_mb > 0.0) {
            return Err(Error::InvalidConfig(format!("cache.max_memory_mb must be positive, got {}", self.max_memory_mb)));
        }
        let shares = [self.query_share, self.embedding_share, self.cross_reference_share];
        if shares.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(Error::InvalidConfig(format!("cache shares must be positive, got {shares:?}")));
        }
        let total: f64 = shares.iter().sum();
        if (total - 1.0).abs() > 1e-3 {
            return Err(Error::InvalidConfig(format!("cache shares must sum to 1.0, got {total}")));
        }
        Ok(())
    }

    pub fn max_memory_bytes(&self) -> usize {
        (self.max_memory_mb * 1024.0 * 1024.0) as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Candidates requested from each side per requested result.
    pub fetch_factor: usize,
    pub dense_weight: f32,
    pub sparse_weight: f32,
    /// Page size used when reloading a collection from the store.
    pub page_size: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { fetch_factor: 2, dense_weight: 0.7, sparse_weight: 0.3, page_size: 500 }
    }
}

impl RetrievalSettings {
    pub fn validate(&self) -> Result<()> {
        if self.fetch_factor == 0 {
            return Err(Error::InvalidConfig("retrieval.fetch_factor must be at least 1".into()));
        }
        if self.page_size == 0 {
            return Err(Error::InvalidConfig("retrieval.page_size must be positive".into()));
        }
        validate_weights(self.dense_weight, self.sparse_weight)
    }
}

pub fn validate_weights(dense: f32, sparse: f32) -> Result<()> {
    for (name, w) in [("dense_weight", dense), ("sparse_weight", sparse)] {
        if !(w.is_finite() && w >= 0.0) {
            return Err(Error::InvalidConfig(format!("{name} must be a non-negative number, got {w}")));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Settings {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Settings {
    fn default() -> Self { Self { k1: 1.2, b: 0.75 } }
}

impl Bm25Settings {
    pub fn validate(&self) -> Result<()> {
        if !(self.k1.is_finite() && self.k1 >= 0.0) {
            return Err(Error::InvalidConfig(format!("bm25.k1 must be non-negative, got {}", self.k1)));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(Error::InvalidConfig(format!("bm25.b must lie in [0, 1], got {}", self.b)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    pub dir: String,
    pub max_age_days: u32,
}

impl Default for PersistenceSettings {
    fn default() -> Self { Self { dir: "data/indexes/bm25".to_string(), max_age_days: 30 } }
}

impl PersistenceSettings {
    pub fn validate(&self) -> Result<()> {
        if self.dir.trim().is_empty() {
            return Err(Error::InvalidConfig("persistence.dir must not be empty".into()));
        }
        Ok(())
    }
}
