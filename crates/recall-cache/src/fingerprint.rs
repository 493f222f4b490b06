use serde::Serialize;
use std::hash::Hasher;
use twox_hash::XxHash64;

use recall_core::Result;

/// Trim, lowercase and collapse internal whitespace so trivially different
/// spellings of a query share one cache slot.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" ")
}

/// Opaque cache key: hex xxHash64 over the normalized query followed by the
/// JSON encoding of `params`.
pub fn fingerprint<P: Serialize + ?Sized>(query: &str, params: &P) -> Result<String> {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(normalize_query(query).as_bytes());
    hasher.write(&[0]);
    hasher.write(&serde_json::to_vec(params)?);
    Ok(format!("{:016x}", hasher.finish()))
}
