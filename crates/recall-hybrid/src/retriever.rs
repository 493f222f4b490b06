//! Hybrid retriever: one entry point for ranked retrieval over a collection.
//!
//! Per collection the retriever owns an immutable [`SparseIndex`] snapshot
//! behind an `Arc`. Searches clone the `Arc` and score without holding any
//! lock; rebuilds construct a complete new index and swap it in one write.
//! Document store calls and BM25 scoring run on blocking threads.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, info, warn};

use recall_cache::{fingerprint, CacheManager, CacheManagerStats};
use recall_core::settings::{validate_weights, EngineSettings};
use recall_core::traits::DocumentStore;
use recall_core::{Document, Error, MetadataFilter, RankedResult, Result, SemanticHit};
use recall_text::{IndexPersistence, SparseIndex, Tokenizer};

use crate::fusion::{self, FusionWeights, SparseCandidate};

/// Parameters of one search. Weights left unset fall back to the configured
/// retrieval defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub collection: String,
    pub max_results: usize,
    pub filter: Option<MetadataFilter>,
    pub use_hybrid: bool,
    pub dense_weight: Option<f32>,
    pub sparse_weight: Option<f32>,
}

impl SearchRequest {
    pub const DEFAULT_MAX_RESULTS: usize = 5;

    pub fn new(query: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            collection: collection.into(),
            max_results: Self::DEFAULT_MAX_RESULTS,
            filter: None,
            use_hybrid: true,
            dense_weight: None,
            sparse_weight: None,
        }
    }

    pub fn max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = (!filter.is_empty()).then_some(filter);
        self
    }

    pub fn dense_only(mut self) -> Self {
        self.use_hybrid = false;
        self
    }

    pub fn weights(mut self, dense: f32, sparse: f32) -> Self {
        self.dense_weight = Some(dense);
        self.sparse_weight = Some(sparse);
        self
    }
}

/// Everything besides the query text that changes the result of a search.
#[derive(Serialize)]
struct CacheKeyParams<'a> {
    collection: &'a str,
    max_results: usize,
    filter: Option<&'a MetadataFilter>,
    use_hybrid: bool,
    dense_weight: f32,
    sparse_weight: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub document_count: usize,
    pub has_sparse_index: bool,
}

#[derive(Default)]
struct CollectionState {
    document_count: usize,
    index: Option<Arc<SparseIndex>>,
    /// Bumped on every index swap.
    generation: u64,
}

/// What a refresh did to the in-memory snapshot.
enum Refresh {
    Unchanged,
    Loaded(SparseIndex),
    Rebuilt(SparseIndex),
}

pub struct HybridRetriever {
    store: Arc<dyn DocumentStore>,
    persistence: Arc<IndexPersistence>,
    cache: Arc<CacheManager>,
    settings: EngineSettings,
    tokenizer: Tokenizer,
    collections: RwLock<HashMap<String, CollectionState>>,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        persistence: Arc<IndexPersistence>,
        cache: Arc<CacheManager>,
        settings: EngineSettings,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            store,
            persistence,
            cache,
            settings,
            tokenizer: Tokenizer::new(),
            collections: RwLock::new(HashMap::new()),
        })
    }

    pub fn settings(&self) -> &EngineSettings { &self.settings }

    pub fn cache_stats(&self) -> CacheManagerStats { self.cache.stats() }

    /// Load documents and a sparse index for every collection concurrently.
    ///
    /// A failing collection is logged and skipped; it is searchable
    /// dense-only until a later `update_index` succeeds. Returns the number of
    /// collections that came up with a sparse index.
    pub async fn initialize(&self, collections: &[&str]) -> usize {
        let outcomes = futures::future::join_all(collections.iter().map(|&c| async move { (c, self.refresh(c, false).await) })).await;
        let mut ready = 0;
        for (collection, outcome) in outcomes {
            match outcome {
                Ok(()) => ready += 1,
                Err(e) => error!(collection, error = %e, "collection failed to initialize"),
            }
        }
        info!(requested = collections.len(), ready, "hybrid retriever initialized");
        ready
    }

    /// Reload `collection` from the store and bring its sparse index up to date.
    ///
    /// Without `force_rebuild` this is a no-op while the persisted index still
    /// matches the live documents. Otherwise the stale record is deleted, the
    /// index rebuilt and persisted, and cached query results are dropped.
    pub async fn update_index(&self, collection: &str, force_rebuild: bool) -> Result<()> {
        self.refresh(collection, force_rebuild).await
    }

    async fn refresh(&self, collection: &str, force_rebuild: bool) -> Result<()> {
        let documents = self.load_documents(collection).await?;
        let document_count = documents.len();
        let has_snapshot = self.snapshot(collection).is_some();

        let name = collection.to_string();
        let persistence = Arc::clone(&self.persistence);
        let tokenizer = self.tokenizer.clone();
        let params = self.settings.bm25;
        let outcome = run_blocking(move || -> Result<Refresh> {
            if !force_rebuild && persistence.is_valid(&name, &documents) {
                if has_snapshot { return Ok(Refresh::Unchanged); }
                // k1 and b come from the current settings, not the ones the index was saved with
                if let Some(index) = persistence.load(&name) { return Ok(Refresh::Loaded(index.with_params(params))); }
            }
            persistence.delete(&name)?;
            let index = SparseIndex::build(documents, &tokenizer, params);
            if let Err(e) = persistence.save(&name, &index) {
                warn!(collection = %name, error = %e, "sparse index rebuilt but not persisted");
            }
            Ok(Refresh::Rebuilt(index))
        })
        .await;

        match outcome {
            Ok(Refresh::Unchanged) => {
                self.set_state(collection, document_count, None);
                debug!(collection, documents = document_count, "persisted sparse index still valid");
            }
            Ok(Refresh::Loaded(index)) => {
                info!(collection, documents = index.len(), "sparse index loaded from disk");
                self.set_state(collection, document_count, Some(index));
                self.cache.clear_query_results();
            }
            Ok(Refresh::Rebuilt(index)) => {
                info!(collection, documents = index.len(), forced = force_rebuild, "sparse index rebuilt");
                self.set_state(collection, document_count, Some(index));
                self.cache.clear_query_results();
            }
            Err(e) => {
                self.set_state(collection, document_count, None);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Every document of `collection`, paging through the store until a short page.
    async fn load_documents(&self, collection: &str) -> Result<Vec<Document>> {
        let store = Arc::clone(&self.store);
        let name = collection.to_string();
        let page_size = self.settings.retrieval.page_size;
        let documents = run_blocking(move || {
            let mut documents = Vec::new();
            loop {
                let page = store
                    .list_documents(&name, page_size, documents.len())
                    .map_err(|e| Error::Transient(format!("listing '{name}' at offset {}: {e:#}", documents.len())))?;
                let last = page.len() < page_size;
                documents.extend(page);
                if last { break; }
            }
            Ok(documents)
        })
        .await?;
        debug!(collection, documents = documents.len(), "documents loaded from store");
        Ok(documents)
    }

    fn snapshot(&self, collection: &str) -> Option<Arc<SparseIndex>> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        collections.get(collection).and_then(|s| s.index.clone())
    }

    /// Record the live document count and, when given, swap in a new index.
    fn set_state(&self, collection: &str, document_count: usize, index: Option<SparseIndex>) {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let state = collections.entry(collection.to_string()).or_default();
        state.document_count = document_count;
        if let Some(index) = index {
            state.index = Some(Arc::new(index));
            state.generation += 1;
        }
    }

    fn generation(&self, collection: &str) -> u64 {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        collections.get(collection).map_or(0, |s| s.generation)
    }

    /// Cache `results` unless the collection's index was swapped after `generation`.
    ///
    /// The check and the put happen under the read lock. A swap takes the write
    /// lock before it clears the query cache, so a put that passes the check is
    /// always followed by that clear.
    fn cache_if_current(&self, collection: &str, generation: u64, key: String, results: &[RankedResult]) {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        if collections.get(collection).map_or(0, |s| s.generation) != generation {
            debug!(collection, "index swapped during search, result not cached");
            return;
        }
        self.cache.cache_query_result(key, results.to_vec());
    }

    pub fn index_stats(&self) -> BTreeMap<String, IndexStats> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        collections
            .iter()
            .map(|(name, state)| {
                (name.clone(), IndexStats { document_count: state.document_count, has_sparse_index: state.index.is_some() })
            })
            .collect()
    }

    /// Ranked retrieval over one collection.
    ///
    /// An empty query or `max_results == 0` yields no results. If one side
    /// fails the other side's candidates are returned alone; if both fail the
    /// result is empty. Only results computed from every requested side are
    /// cached.
    pub async fn search(&self, request: SearchRequest) -> Result<Vec<RankedResult>> {
        if request.query.trim().is_empty() || request.max_results == 0 {
            return Ok(Vec::new());
        }
        let weights = FusionWeights {
            dense: request.dense_weight.unwrap_or(self.settings.retrieval.dense_weight),
            sparse: request.sparse_weight.unwrap_or(self.settings.retrieval.sparse_weight),
        };
        validate_weights(weights.dense, weights.sparse)?;

        let key = fingerprint(
            &request.query,
            &CacheKeyParams {
                collection: &request.collection,
                max_results: request.max_results,
                filter: request.filter.as_ref(),
                use_hybrid: request.use_hybrid,
                dense_weight: weights.dense,
                sparse_weight: weights.sparse,
            },
        )?;
        if let Some(results) = self.cache.get_query_result(&key) {
            debug!(collection = %request.collection, results = results.len(), "query cache hit");
            return Ok(results);
        }
        let generation = self.generation(&request.collection);

        let (results, complete) = if request.use_hybrid {
            self.hybrid_search(&request, weights).await
        } else {
            match self.dense_candidates(&request, request.max_results).await {
                Ok(hits) => (fusion::dense_only(hits, request.max_results), true),
                Err(e) => {
                    warn!(collection = %request.collection, error = %e, "semantic search failed");
                    (Vec::new(), false)
                }
            }
        };

        if complete { self.cache_if_current(&request.collection, generation, key, &results); }
        debug!(collection = %request.collection, results = results.len(), hybrid = request.use_hybrid, "search complete");
        Ok(results)
    }

    async fn hybrid_search(&self, request: &SearchRequest, weights: FusionWeights) -> (Vec<RankedResult>, bool) {
        let fetch = request.max_results.saturating_mul(self.settings.retrieval.fetch_factor);
        let (dense, sparse) = tokio::join!(self.dense_candidates(request, fetch), self.sparse_candidates(request, fetch));
        let mut complete = true;
        let dense = dense.unwrap_or_else(|e| {
            warn!(collection = %request.collection, error = %e, "semantic side failed, continuing with keyword results");
            complete = false;
            Vec::new()
        });
        let sparse = sparse.unwrap_or_else(|e| {
            warn!(collection = %request.collection, error = %e, "keyword side failed, continuing with semantic results");
            complete = false;
            Vec::new()
        });
        (fusion::fuse(dense, sparse, weights, request.max_results), complete)
    }

    async fn dense_candidates(&self, request: &SearchRequest, k: usize) -> Result<Vec<SemanticHit>> {
        let store = Arc::clone(&self.store);
        let (collection, query, filter) = (request.collection.clone(), request.query.clone(), request.filter.clone());
        run_blocking(move || {
            store
                .semantic_search(&collection, &query, k, filter.as_ref())
                .map_err(|e| Error::Transient(format!("semantic search on '{collection}': {e:#}")))
        })
        .await
    }

    async fn sparse_candidates(&self, request: &SearchRequest, k: usize) -> Result<Vec<SparseCandidate>> {
        let index = self
            .snapshot(&request.collection)
            .ok_or_else(|| Error::NotFound(format!("no sparse index for collection '{}'", request.collection)))?;
        let tokenizer = self.tokenizer.clone();
        let (query, filter) = (request.query.clone(), request.filter.clone());
        run_blocking(move || {
            let tokens = tokenizer.tokenize(&query);
            Ok(index
                .top_k(&tokens, k, filter.as_ref())
                .into_iter()
                .filter_map(|hit| index.document(hit.index).map(|d| SparseCandidate { document: d.clone(), score: hit.score }))
                .collect())
        })
        .await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Operation(format!("blocking task failed: {e}")))?
}
