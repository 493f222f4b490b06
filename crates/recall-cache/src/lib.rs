//! recall-cache
//!
//! Thread-safe bounded caches (entry count, estimated memory, TTL) and the
//! three-tier manager used by the retriever. See `bounded` for the eviction
//! rules and `footprint` for how entry sizes are estimated.

pub mod bounded;
pub mod fingerprint;
pub mod footprint;
pub mod manager;

pub use bounded::{BoundedCache, CacheStats};
pub use fingerprint::{fingerprint, normalize_query};
pub use footprint::MemoryFootprint;
pub use manager::{CacheManager, CacheManagerStats, CrossReferences};
