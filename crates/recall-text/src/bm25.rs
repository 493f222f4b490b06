//! In-memory BM25 index over one document collection.
//!
//! The index is immutable once built: documents, their tokens and the term
//! statistics are produced together and replaced together. Document slots are
//! positions in insertion order.
//!
//! Scoring per query token `t` and document `d`:
//!
//! ```text
//! idf(t)   = ln(1 + (N - df(t) + 0.5) / (df(t) + 0.5))
//! score   += idf(t) * tf * (k1 + 1) / (tf + k1 * (1 - b + b * |d| / avgdl))
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use recall_core::settings::Bm25Settings;
use recall_core::{Document, Error, MetadataFilter, Result};

use crate::tokenizer::Tokenizer;

/// Bumped whenever the persisted layout of [`Bm25Stats`] changes.
pub const INDEX_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub doc: u32,
    pub tf: u32,
}

/// Term statistics derived from a tokenized collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bm25Stats {
    pub schema_version: u32,
    pub k1: f32,
    pub b: f32,
    pub avg_doc_len: f32,
    pub doc_lengths: Vec<u32>,
    pub postings: BTreeMap<String, Vec<Posting>>,
}

impl Bm25Stats {
    pub fn compute(tokenized: &[Vec<String>], params: Bm25Settings) -> Self {
        let mut postings: BTreeMap<String, Vec<Posting>> = BTreeMap::new();
        let mut doc_lengths = Vec::with_capacity(tokenized.len());
        for (doc, tokens) in tokenized.iter().enumerate() {
            doc_lengths.push(tokens.len() as u32);
            let mut tf: BTreeMap<&str, u32> = BTreeMap::new();
            for t in tokens { *tf.entry(t.as_str()).or_default() += 1; }
            for (term, count) in tf {
                postings.entry(term.to_string()).or_default().push(Posting { doc: doc as u32, tf: count });
            }
        }
        let total: u64 = doc_lengths.iter().map(|&l| u64::from(l)).sum();
        let avg_doc_len = if doc_lengths.is_empty() { 0.0 } else { total as f32 / doc_lengths.len() as f32 };
        Self { schema_version: INDEX_SCHEMA_VERSION, k1: params.k1, b: params.b, avg_doc_len, doc_lengths, postings }
    }

    pub fn num_docs(&self) -> usize { self.doc_lengths.len() }

    pub fn idf(&self, term: &str) -> f32 {
        let n = self.num_docs() as f32;
        let df = self.postings.get(term).map_or(0, Vec::len) as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SparseHit {
    /// Slot of the document in insertion order.
    pub index: usize,
    pub score: f32,
}

pub struct SparseIndex {
    stats: Bm25Stats,
    documents: Vec<Document>,
    tokenized: Vec<Vec<String>>,
}

impl SparseIndex {
    pub fn build(documents: Vec<Document>, tokenizer: &Tokenizer, params: Bm25Settings) -> Self {
        if documents.is_empty() { warn!("building sparse index over an empty collection"); }
        let tokenized: Vec<Vec<String>> = documents.iter().map(|d| tokenizer.tokenize(&d.content)).collect();
        let stats = Bm25Stats::compute(&tokenized, params);
        debug!(documents = documents.len(), terms = stats.postings.len(), "sparse index built");
        Self { stats, documents, tokenized }
    }

    /// Reassemble an index from persisted parts, rejecting parts that do not
    /// describe the same collection.
    pub fn from_parts(stats: Bm25Stats, documents: Vec<Document>, tokenized: Vec<Vec<String>>) -> Result<Self> {
        if stats.schema_version != INDEX_SCHEMA_VERSION {
            return Err(Error::CorruptIndex(format!("unsupported index schema version {}", stats.schema_version)));
        }
        if stats.num_docs() != documents.len() || tokenized.len() != documents.len() {
            return Err(Error::CorruptIndex(format!(
                "part sizes disagree: stats={} documents={} tokenized={}",
                stats.num_docs(),
                documents.len(),
                tokenized.len()
            )));
        }
        let n = documents.len() as u32;
        if stats.postings.values().flatten().any(|p| p.doc >= n) {
            return Err(Error::CorruptIndex("posting references a missing document".into()));
        }
        Ok(Self { stats, documents, tokenized })
    }

    /// Score with `params` from now on. `k1` and `b` are not derived from the
    /// collection, so a loaded index takes them from the current settings.
    pub fn with_params(mut self, params: Bm25Settings) -> Self {
        self.stats.k1 = params.k1;
        self.stats.b = params.b;
        self
    }

    pub fn stats(&self) -> &Bm25Stats { &self.stats }
    pub fn documents(&self) -> &[Document] { &self.documents }
    pub fn tokenized(&self) -> &[Vec<String>] { &self.tokenized }
    pub fn document(&self, index: usize) -> Option<&Document> { self.documents.get(index) }
    pub fn len(&self) -> usize { self.documents.len() }
    pub fn is_empty(&self) -> bool { self.documents.is_empty() }

    /// One score per document in insertion order. Unknown, empty or
    /// all-stop-word queries score every document 0.0.
    pub fn score(&self, query_tokens: &[String]) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.len()];
        let Bm25Stats { k1, b, avg_doc_len, .. } = self.stats;
        for token in query_tokens {
            let Some(postings) = self.stats.postings.get(token) else { continue };
            let idf = self.stats.idf(token);
            for p in postings {
                let tf = p.tf as f32;
                let doc_len = self.stats.doc_lengths[p.doc as usize] as f32;
                let len_norm = 1.0 - b + b * doc_len / avg_doc_len.max(f32::EPSILON);
                scores[p.doc as usize] += idf * tf * (k1 + 1.0) / (tf + k1 * len_norm);
            }
        }
        scores
    }

    /// Best `k` documents with a positive score that pass `filter`, highest
    /// first. Equal scores keep insertion order.
    pub fn top_k(&self, query_tokens: &[String], k: usize, filter: Option<&MetadataFilter>) -> Vec<SparseHit> {
        if self.is_empty() {
            warn!("sparse search against an empty index");
            return Vec::new();
        }
        let mut hits: Vec<SparseHit> = self
            .score(query_tokens)
            .into_iter()
            .enumerate()
            .filter(|&(_, score)| score > 0.0)
            .filter(|&(i, _)| filter.map_or(true, |f| f.matches(&self.documents[i].metadata)))
            .map(|(index, score)| SparseHit { index, score })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        hits
    }
}
