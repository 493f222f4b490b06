use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use recall_cache::CacheManager;
use recall_core::settings::{Bm25Settings, EngineSettings};
use recall_core::traits::DocumentStore;
use recall_core::{Document, Error, MetadataFilter, SemanticHit};
use recall_hybrid::{HybridRetriever, SearchRequest};
use recall_text::{IndexPersistence, SparseIndex, Tokenizer};
use tempfile::TempDir;

/// Document store with scripted semantic hits and switchable failures.
#[derive(Default)]
struct ScriptedStore {
    documents: Mutex<Vec<Document>>,
    /// (document id, distance) returned for every semantic query.
    distances: Mutex<Vec<(String, f32)>>,
    fail_semantic: AtomicBool,
    fail_listing: AtomicBool,
    /// Milliseconds every semantic query sleeps before answering.
    semantic_delay_ms: AtomicU64,
    semantic_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl ScriptedStore {
    fn with_documents(documents: Vec<Document>) -> Arc<Self> {
        let store = Self::default();
        *store.documents.lock().expect("lock") = documents;
        Arc::new(store)
    }

    fn script(&self, distances: &[(&str, f32)]) {
        *self.distances.lock().expect("lock") = distances.iter().map(|(id, d)| (id.to_string(), *d)).collect();
    }

    fn remove(&self, id: &str) { self.documents.lock().expect("lock").retain(|d| d.id != id); }

    fn edit(&self, id: &str, content: &str) {
        for d in self.documents.lock().expect("lock").iter_mut().filter(|d| d.id == id) {
            d.content = content.to_string();
        }
    }

    fn semantic_calls(&self) -> usize { self.semantic_calls.load(Ordering::SeqCst) }
}

impl DocumentStore for ScriptedStore {
    fn list_documents(&self, _collection: &str, limit: usize, offset: usize) -> anyhow::Result<Vec<Document>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        anyhow::ensure!(!self.fail_listing.load(Ordering::SeqCst), "store offline");
        Ok(self.documents.lock().expect("lock").iter().skip(offset).take(limit).cloned().collect())
    }

    fn semantic_search(
        &self,
        _collection: &str,
        _query: &str,
        max_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> anyhow::Result<Vec<SemanticHit>> {
        self.semantic_calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(self.semantic_delay_ms.load(Ordering::SeqCst)));
        anyhow::ensure!(!self.fail_semantic.load(Ordering::SeqCst), "vector database timeout");
        let documents = self.documents.lock().expect("lock");
        Ok(self
            .distances
            .lock()
            .expect("lock")
            .iter()
            .filter_map(|(id, distance)| documents.iter().find(|d| &d.id == id).map(|d| (d, *distance)))
            .filter(|(d, _)| filter.map_or(true, |f| f.matches(&d.metadata)))
            .take(max_results)
            .map(|(d, distance)| SemanticHit { document: d.clone(), distance })
            .collect())
    }
}

fn lore() -> Vec<Document> {
    vec![
        Document::new("docA", "dragon dragon lair treasure").with_meta("book", "monsters"),
        Document::new("docB", "dragon cave").with_meta("book", "core"),
        Document::new("docC", "weather table for travel").with_meta("book", "core"),
    ]
}

fn rulebook(n: usize) -> Vec<Document> {
    (0..n).map(|i| Document::new(format!("rule-{i}"), format!("rule {i} covers grapple checks and stealth modifiers"))).collect()
}

fn setup(store: Arc<ScriptedStore>, root: &TempDir, settings: EngineSettings) -> (HybridRetriever, Arc<IndexPersistence>) {
    let persistence = Arc::new(IndexPersistence::open(root.path()).expect("persistence"));
    let cache = Arc::new(CacheManager::new(&settings.cache).expect("cache"));
    let retriever = HybridRetriever::new(store, Arc::clone(&persistence), cache, settings).expect("retriever");
    (retriever, persistence)
}

fn ids(results: &[recall_core::RankedResult]) -> Vec<&str> {
    results.iter().map(|r| r.document_id.as_str()).collect()
}

#[tokio::test]
async fn hybrid_search_fuses_both_sides() {
    let tmp = TempDir::new().expect("tmp");
    let store = ScriptedStore::with_documents(lore());
    store.script(&[("docB", 0.1), ("docC", 0.5)]);
    let (retriever, _) = setup(store.clone(), &tmp, EngineSettings::default());
    assert_eq!(retriever.initialize(&["lore"]).await, 1);

    let results = retriever
        .search(SearchRequest::new("dragon", "lore").max_results(3).weights(0.5, 0.5))
        .await
        .expect("search");
    assert_eq!(ids(&results), vec!["docB", "docA", "docC"]);

    let doc_a = &results[1];
    assert_eq!(doc_a.dense_score, 0.0, "keyword-only hit has no dense score");
    assert!((doc_a.combined_score - 0.5).abs() < 1e-5, "docA has the top raw BM25 score");
    assert_eq!(results[2].sparse_score, 0.0);
    assert!((results[2].combined_score - 0.25).abs() < 1e-5);
}

#[tokio::test]
async fn dense_only_search_skips_the_sparse_index() {
    let tmp = TempDir::new().expect("tmp");
    let store = ScriptedStore::with_documents(lore());
    store.script(&[("docC", 0.3), ("docB", 0.6)]);
    let (retriever, _) = setup(store.clone(), &tmp, EngineSettings::default());
    retriever.initialize(&["lore"]).await;

    let results = retriever.search(SearchRequest::new("dragon", "lore").dense_only()).await.expect("search");
    assert_eq!(ids(&results), vec!["docC", "docB"]);
    assert!(results.iter().all(|r| r.sparse_score == 0.0 && r.combined_score == r.dense_score));
}

#[tokio::test]
async fn filter_applies_to_both_sides() {
    let tmp = TempDir::new().expect("tmp");
    let store = ScriptedStore::with_documents(lore());
    store.script(&[("docB", 0.1), ("docC", 0.5)]);
    let (retriever, _) = setup(store.clone(), &tmp, EngineSettings::default());
    retriever.initialize(&["lore"]).await;

    let filter = MetadataFilter::new().eq("book", "core");
    let results = retriever.search(SearchRequest::new("dragon", "lore").filter(filter)).await.expect("search");
    assert_eq!(ids(&results), vec!["docB", "docC"]);
}

#[tokio::test]
async fn semantic_failure_degrades_to_keyword_results() {
    let tmp = TempDir::new().expect("tmp");
    let store = ScriptedStore::with_documents(lore());
    store.script(&[("docC", 0.1)]);
    let (retriever, _) = setup(store.clone(), &tmp, EngineSettings::default());
    retriever.initialize(&["lore"]).await;
    store.fail_semantic.store(true, Ordering::SeqCst);

    let request = SearchRequest::new("dragon", "lore");
    let results = retriever.search(request.clone()).await.expect("degraded search still succeeds");
    assert_eq!(ids(&results), vec!["docA", "docB"]);
    assert!(results.iter().all(|r| r.dense_score == 0.0));

    // degraded results are not cached
    store.fail_semantic.store(false, Ordering::SeqCst);
    let recovered = retriever.search(request).await.expect("search");
    assert_eq!(store.semantic_calls(), 2);
    assert!(ids(&recovered).contains(&"docC"));
}

#[tokio::test]
async fn both_sides_failing_yields_empty_results() {
    let tmp = TempDir::new().expect("tmp");
    let store = ScriptedStore::with_documents(lore());
    store.fail_semantic.store(true, Ordering::SeqCst);
    let (retriever, _) = setup(store.clone(), &tmp, EngineSettings::default());

    // never initialized: no sparse index either
    let results = retriever.search(SearchRequest::new("dragon", "lore")).await.expect("search");
    assert!(results.is_empty());
}

#[tokio::test]
async fn repeated_queries_are_served_from_cache() {
    let tmp = TempDir::new().expect("tmp");
    let store = ScriptedStore::with_documents(lore());
    store.script(&[("docB", 0.2)]);
    let (retriever, _) = setup(store.clone(), &tmp, EngineSettings::default());
    retriever.initialize(&["lore"]).await;

    let first = retriever.search(SearchRequest::new("Dragon lair", "lore")).await.expect("search");
    let second = retriever.search(SearchRequest::new("  dragon   LAIR ", "lore")).await.expect("search");
    assert_eq!(first, second);
    assert_eq!(store.semantic_calls(), 1);

    retriever.search(SearchRequest::new("dragon lair", "lore").max_results(2)).await.expect("search");
    assert_eq!(store.semantic_calls(), 2, "different parameters use a different cache slot");

    let stats = retriever.cache_stats();
    assert_eq!(stats.query_result.hits, 1);
    assert_eq!(stats.query_result.size, 2);
}

#[tokio::test]
async fn empty_queries_and_bad_weights() {
    let tmp = TempDir::new().expect("tmp");
    let store = ScriptedStore::with_documents(lore());
    let (retriever, _) = setup(store.clone(), &tmp, EngineSettings::default());
    retriever.initialize(&["lore"]).await;

    for query in ["", "   \t"] {
        assert!(retriever.search(SearchRequest::new(query, "lore")).await.expect("search").is_empty());
    }
    assert!(retriever.search(SearchRequest::new("dragon", "lore").max_results(0)).await.expect("search").is_empty());
    assert_eq!(store.semantic_calls(), 0);

    let err = retriever.search(SearchRequest::new("dragon", "lore").weights(-0.1, 1.0)).await.expect_err("negative weight");
    assert!(matches!(err, Error::InvalidConfig(_)), "{err}");
    let err = retriever.search(SearchRequest::new("dragon", "lore").weights(0.5, f32::NAN)).await.expect_err("NaN weight");
    assert!(matches!(err, Error::InvalidConfig(_)), "{err}");
}

#[tokio::test]
async fn initialize_pages_through_the_store_and_persists() {
    let tmp = TempDir::new().expect("tmp");
    let store = ScriptedStore::with_documents(rulebook(5));
    let mut settings = EngineSettings::default();
    settings.retrieval.page_size = 2;
    let (retriever, persistence) = setup(store.clone(), &tmp, settings);

    assert_eq!(retriever.initialize(&["rules"]).await, 1);
    assert_eq!(store.list_calls.load(Ordering::SeqCst), 3, "pages of 2, 2 and 1");
    let stats = retriever.index_stats();
    assert_eq!(stats["rules"].document_count, 5);
    assert!(stats["rules"].has_sparse_index);
    assert_eq!(persistence.record("rules").expect("record saved").document_count, 5);
}

#[tokio::test]
async fn update_index_is_a_noop_while_valid_and_rebuilds_when_stale() {
    let tmp = TempDir::new().expect("tmp");
    let store = ScriptedStore::with_documents(rulebook(5));
    let (retriever, persistence) = setup(store.clone(), &tmp, EngineSettings::default());
    retriever.initialize(&["rules"]).await;
    let original = persistence.record("rules").expect("record");

    retriever.update_index("rules", false).await.expect("update");
    assert_eq!(persistence.record("rules").expect("record"), original, "valid index left alone");

    store.remove("rule-4");
    assert!(!persistence.is_valid("rules", &rulebook(4)), "5 persisted, 4 live");
    retriever.update_index("rules", false).await.expect("update");
    let rebuilt = persistence.record("rules").expect("record");
    assert_eq!(rebuilt.document_count, 4);
    assert_ne!(rebuilt.index_file, original.index_file);
    assert!(persistence.is_valid("rules", &rulebook(4)));
    assert_eq!(retriever.index_stats()["rules"].document_count, 4);

    retriever.update_index("rules", true).await.expect("forced update");
    let forced = persistence.record("rules").expect("record");
    assert_ne!(forced.index_file, rebuilt.index_file, "forced rebuild writes a new generation");
}

#[tokio::test]
async fn rebuild_drops_cached_query_results() {
    let tmp = TempDir::new().expect("tmp");
    let store = ScriptedStore::with_documents(lore());
    let (retriever, _) = setup(store.clone(), &tmp, EngineSettings::default());
    retriever.initialize(&["lore"]).await;

    let before = retriever.search(SearchRequest::new("goblin", "lore")).await.expect("search");
    assert!(before.is_empty());
    store.edit("docC", "goblin ambush on the road");
    retriever.update_index("lore", false).await.expect("update");

    let after = retriever.search(SearchRequest::new("goblin", "lore")).await.expect("search");
    assert_eq!(ids(&after), vec!["docC"]);
    assert_eq!(store.semantic_calls(), 2);
}

#[tokio::test]
async fn restart_reuses_the_persisted_index() {
    let tmp = TempDir::new().expect("tmp");
    let store = ScriptedStore::with_documents(rulebook(5));
    let saved = {
        let (retriever, persistence) = setup(store.clone(), &tmp, EngineSettings::default());
        retriever.initialize(&["rules"]).await;
        persistence.record("rules").expect("record")
    };

    let (retriever, persistence) = setup(store.clone(), &tmp, EngineSettings::default());
    assert_eq!(retriever.initialize(&["rules"]).await, 1);
    assert_eq!(persistence.record("rules").expect("record"), saved, "loaded, not rebuilt");
    let results = retriever.search(SearchRequest::new("grapple", "rules").max_results(3)).await.expect("search");
    assert_eq!(results.len(), 3);
}

#[tokio::test]
async fn failing_collection_does_not_block_the_others() {
    let tmp = TempDir::new().expect("tmp");
    let healthy = ScriptedStore::with_documents(rulebook(3));
    let (retriever, _) = setup(healthy.clone(), &tmp, EngineSettings::default());
    assert_eq!(retriever.initialize(&["rules", "more-rules"]).await, 2);

    healthy.fail_listing.store(true, Ordering::SeqCst);
    let err = retriever.update_index("rules", true).await.expect_err("listing fails");
    assert!(matches!(err, Error::Transient(_)), "{err}");
    assert!(retriever.index_stats()["rules"].has_sparse_index, "previous snapshot kept");
}

#[tokio::test]
async fn invalid_settings_are_rejected() {
    let tmp = TempDir::new().expect("tmp");
    let mut settings = EngineSettings::default();
    settings.retrieval.fetch_factor = 0;
    let persistence = Arc::new(IndexPersistence::open(tmp.path()).expect("persistence"));
    let cache = Arc::new(CacheManager::new(&EngineSettings::default().cache).expect("cache"));
    let store: Arc<dyn DocumentStore> = ScriptedStore::with_documents(Vec::new());
    assert!(matches!(HybridRetriever::new(store, persistence, cache, settings), Err(Error::InvalidConfig(_))));
}

#[tokio::test]
async fn search_overlapping_a_reindex_does_not_cache_its_stale_result() {
    let tmp = TempDir::new().expect("tmp");
    let store = ScriptedStore::with_documents(lore());
    let (retriever, _) = setup(store.clone(), &tmp, EngineSettings::default());
    retriever.initialize(&["lore"]).await;
    store.semantic_delay_ms.store(400, Ordering::SeqCst);

    let (stale, updated) = tokio::join!(retriever.search(SearchRequest::new("goblin", "lore")), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        store.edit("docC", "goblin ambush on the road");
        retriever.update_index("lore", false).await
    });
    updated.expect("update");
    assert!(stale.expect("search").is_empty(), "scored against the previous snapshot");
    assert_eq!(retriever.cache_stats().query_result.size, 0);

    store.semantic_delay_ms.store(0, Ordering::SeqCst);
    let fresh = retriever.search(SearchRequest::new("goblin", "lore")).await.expect("search");
    assert_eq!(ids(&fresh), vec!["docC"]);
    assert_eq!(store.semantic_calls(), 2);
}

#[tokio::test]
async fn abandoned_search_leaves_the_cache_untouched() {
    let tmp = TempDir::new().expect("tmp");
    let store = ScriptedStore::with_documents(lore());
    store.script(&[("docB", 0.2)]);
    let (retriever, _) = setup(store.clone(), &tmp, EngineSettings::default());
    retriever.initialize(&["lore"]).await;
    store.semantic_delay_ms.store(300, Ordering::SeqCst);

    let request = SearchRequest::new("dragon", "lore");
    let timed_out = tokio::time::timeout(Duration::from_millis(50), retriever.search(request.clone())).await;
    assert!(timed_out.is_err());
    // let the orphaned blocking call finish
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(retriever.cache_stats().query_result.size, 0);

    store.semantic_delay_ms.store(0, Ordering::SeqCst);
    let results = retriever.search(request).await.expect("search");
    assert!(ids(&results).contains(&"docB"));
    assert_eq!(retriever.cache_stats().query_result.size, 1);
}

#[tokio::test]
async fn restart_scores_with_the_configured_bm25_parameters() {
    let tmp = TempDir::new().expect("tmp");
    let store = ScriptedStore::with_documents(lore());
    let saved = {
        let (retriever, persistence) = setup(store.clone(), &tmp, EngineSettings::default());
        retriever.initialize(&["lore"]).await;
        persistence.record("lore").expect("record")
    };

    let mut settings = EngineSettings::default();
    settings.bm25.k1 = 0.1;
    let (retriever, persistence) = setup(store.clone(), &tmp, settings);
    retriever.initialize(&["lore"]).await;
    assert_eq!(persistence.record("lore").expect("record"), saved, "loaded, not rebuilt");

    let results = retriever.search(SearchRequest::new("dragon", "lore")).await.expect("search");
    assert_eq!(ids(&results), vec!["docA", "docB"]);

    let tokens = Tokenizer::new().tokenize("dragon");
    let flat = SparseIndex::build(lore(), &Tokenizer::new(), Bm25Settings { k1: 0.1, b: 0.75 }).score(&tokens);
    let default = SparseIndex::build(lore(), &Tokenizer::new(), Bm25Settings::default()).score(&tokens);
    assert!((results[0].sparse_score - flat[0]).abs() < 1e-5, "{} vs {}", results[0].sparse_score, flat[0]);
    assert!((results[0].sparse_score - default[0]).abs() > 1e-3);
}
