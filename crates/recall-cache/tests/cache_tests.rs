use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use recall_cache::{BoundedCache, CacheManager, MemoryFootprint};
use recall_core::settings::CacheSettings;
use recall_core::{Document, Error, RankedResult};

const HOUR: Duration = Duration::from_secs(3600);
const MB: usize = 1024 * 1024;

#[test]
fn two_slot_cache_evicts_oldest_key() {
    let cache: BoundedCache<i64> = BoundedCache::new(2, MB, HOUR).expect("cache");
    assert!(cache.put("a", 1));
    assert!(cache.put("b", 2));
    assert!(cache.put("c", 3));

    assert_eq!(cache.get("a"), None);
    assert_eq!(cache.get("b"), Some(2));
    assert_eq!(cache.get("c"), Some(3));
    assert_eq!(cache.stats().evictions, 1);
}

#[test]
fn get_refreshes_recency() {
    let cache: BoundedCache<i64> = BoundedCache::new(2, MB, HOUR).expect("cache");
    cache.put("a", 1);
    cache.put("b", 2);
    assert_eq!(cache.get("a"), Some(1), "touch a so b becomes least recent");
    cache.put("c", 3);

    assert_eq!(cache.get("a"), Some(1));
    assert_eq!(cache.get("b"), None, "b was least recently used");
    assert_eq!(cache.get("c"), Some(3));

    // touching a again leaves c as the least recent key
    cache.get("a");
    cache.put("d", 4);
    assert_eq!(cache.get("c"), None);
    assert_eq!(cache.get("a"), Some(1));
    assert_eq!(cache.get("d"), Some(4));
}

#[test]
fn reinserting_a_key_replaces_without_double_counting() {
    let cache: BoundedCache<Vec<f32>> = BoundedCache::new(10, MB, HOUR).expect("cache");
    cache.put("v", vec![1.0; 16]);
    let first = cache.memory_bytes();
    cache.put("v", vec![2.0; 16]);
    assert_eq!(cache.memory_bytes(), first);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("v"), Some(vec![2.0; 16]));
    assert_eq!(cache.stats().evictions, 0);
}

#[test]
fn reinserting_a_key_makes_it_most_recent() {
    let cache: BoundedCache<i64> = BoundedCache::new(2, MB, HOUR).expect("cache");
    cache.put("a", 1);
    cache.put("b", 2);
    cache.put("a", 10);
    cache.put("c", 3);
    assert_eq!(cache.get("a"), Some(10));
    assert_eq!(cache.get("b"), None);
}

#[test]
fn bounds_hold_after_every_put() {
    let max_entries = 8;
    let max_memory = 2048;
    let cache: BoundedCache<Vec<f32>> = BoundedCache::new(max_entries, max_memory, HOUR).expect("cache");
    for i in 0..200usize {
        let len = (i * 7) % 90;
        cache.put(format!("k{}", i % 23), vec![0.25; len]);
        assert!(cache.len() <= max_entries, "size {} exceeds {}", cache.len(), max_entries);
        assert!(cache.memory_bytes() < max_memory, "memory {} not under {}", cache.memory_bytes(), max_memory);
    }
    assert!(cache.stats().evictions > 0);
}

#[test]
fn entry_larger_than_budget_is_refused() {
    let cache: BoundedCache<Vec<f32>> = BoundedCache::new(4, 256, HOUR).expect("cache");
    assert!(cache.put("small", vec![1.0; 4]));
    assert!(!cache.put("huge", vec![1.0; 1000]));
    assert_eq!(cache.get("huge"), None);
    assert_eq!(cache.get("small"), Some(vec![1.0; 4]), "refusal does not evict others");
    assert_eq!(cache.stats().rejected, 1);
    assert!(cache.memory_bytes() < 256);
}

#[test]
fn expired_entries_read_as_misses_and_are_removed() {
    let cache: BoundedCache<i64> = BoundedCache::new(4, MB, Duration::from_millis(30)).expect("cache");
    cache.put("a", 1);
    assert_eq!(cache.get("a"), Some(1));
    thread::sleep(Duration::from_millis(80));

    let before = cache.stats();
    assert_eq!(cache.get("a"), None);
    let after = cache.stats();
    assert_eq!(after.size, before.size - 1);
    assert_eq!(after.misses, before.misses + 1);
    assert_eq!(cache.memory_bytes(), 0);
}

#[test]
fn clear_keeps_counters() {
    let cache: BoundedCache<i64> = BoundedCache::new(4, MB, HOUR).expect("cache");
    cache.put("a", 1);
    cache.get("a");
    cache.get("missing");
    cache.clear();

    let stats = cache.stats();
    assert_eq!(stats.size, 0);
    assert_eq!(stats.memory_usage_mb, 0.0);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    assert_eq!(stats.ttl_seconds, 3600);
}

#[test]
fn hit_rate_is_zero_without_requests() {
    let cache: BoundedCache<i64> = BoundedCache::new(4, MB, HOUR).expect("cache");
    assert_eq!(cache.stats().hit_rate, 0.0);
}

#[test]
fn zero_limits_are_configuration_errors() {
    assert!(matches!(BoundedCache::<i64>::new(0, MB, HOUR), Err(Error::InvalidConfig(_))));
    assert!(matches!(BoundedCache::<i64>::new(4, 0, HOUR), Err(Error::InvalidConfig(_))));
}

#[test]
fn concurrent_writers_respect_bounds() {
    let cache: Arc<BoundedCache<Vec<f32>>> = Arc::new(BoundedCache::new(16, 4096, HOUR).expect("cache"));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..500usize {
                    let key = format!("t{}-{}", t, i % 40);
                    if i % 3 == 0 {
                        let _ = cache.get(&key);
                    } else {
                        cache.put(key, vec![0.5; (i % 20) + 1]);
                    }
                }
            })
        })
        .collect();
    for h in handles { h.join().expect("worker"); }

    assert!(cache.len() <= 16);
    assert!(cache.memory_bytes() < 4096);
    let recomputed: usize = (0..8)
        .flat_map(|t| (0..40).map(move |i| format!("t{}-{}", t, i)))
        .filter_map(|k| cache.get(&k).map(|v| (k, v)))
        .map(|(k, v)| k.len() + v.footprint())
        .sum();
    assert!(recomputed <= cache.memory_bytes(), "tracked memory covers every live entry");
}

fn ranked(id: &str) -> RankedResult {
    let mut r = RankedResult::from_document(Document::new(id, format!("content of {id}")));
    r.combined_score = 0.5;
    r
}

#[test]
fn manager_splits_budget_and_reports_combined_stats() {
    let settings = CacheSettings { max_entries: 10, max_memory_mb: 10.0, ..CacheSettings::default() };
    let manager = CacheManager::new(&settings).expect("manager");
    let stats = manager.stats();
    assert!((stats.query_result.max_memory_mb - 3.0).abs() < 1e-6);
    assert!((stats.embedding.max_memory_mb - 5.0).abs() < 1e-6);
    assert!((stats.cross_reference.max_memory_mb - 2.0).abs() < 1e-6);

    assert!(manager.cache_query_result("q1", vec![ranked("a"), ranked("b")]));
    assert!(manager.cache_embedding("e1", vec![0.1; 384]));
    let mut refs = BTreeMap::new();
    refs.insert("a".to_string(), vec!["b".to_string(), "c".to_string()]);
    assert!(manager.cache_cross_reference("x1", refs.clone()));

    assert_eq!(manager.get_query_result("q1").map(|r| r.len()), Some(2));
    assert_eq!(manager.get_embedding("e1").map(|v| v.len()), Some(384));
    assert_eq!(manager.get_cross_reference("x1"), Some(refs));
    assert_eq!(manager.get_embedding("missing"), None);

    let stats = manager.stats();
    let sum = stats.query_result.memory_usage_mb + stats.embedding.memory_usage_mb + stats.cross_reference.memory_usage_mb;
    assert!(stats.total_memory_mb > 0.0);
    assert!((stats.total_memory_mb - sum).abs() < 1e-9);
    assert_eq!(stats.embedding.misses, 1);

    manager.clear_all();
    let cleared = manager.stats();
    assert_eq!(cleared.query_result.size + cleared.embedding.size + cleared.cross_reference.size, 0);
    assert_eq!(cleared.query_result.hits, 1, "counters survive clear_all");
}

#[test]
fn manager_rejects_bad_budget() {
    let settings = CacheSettings { max_memory_mb: -5.0, ..CacheSettings::default() };
    assert!(matches!(CacheManager::new(&settings), Err(Error::InvalidConfig(_))));
}
