//! Weighted score fusion of the dense and sparse candidate lists.
//!
//! `combined = dense * dense_weight + (sparse / max_sparse) * sparse_weight`
//!
//! Sparse scores are raw BM25 values, so they are divided by the largest raw
//! score in the candidate set to land in `[0, 1]` next to the dense
//! similarities. A document seen by only one side scores 0.0 on the other.

use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

use recall_core::{Document, RankedResult, SemanticHit};

/// A sparse-side candidate with its raw BM25 score.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseCandidate {
    pub document: Document,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub dense: f32,
    pub sparse: f32,
}

/// Union both candidate lists by document id and keep the best `max_results`.
///
/// Ordering is by descending `combined_score`; equal scores keep discovery
/// order, dense candidates first, then sparse-only ones.
pub fn fuse(dense: Vec<SemanticHit>, sparse: Vec<SparseCandidate>, weights: FusionWeights, max_results: usize) -> Vec<RankedResult> {
    debug!(dense = dense.len(), sparse = sparse.len(), "fusing candidates");
    let max_sparse = sparse.iter().map(|c| c.score).fold(0.0f32, f32::max);

    let mut fused: Vec<RankedResult> = Vec::with_capacity(dense.len() + sparse.len());
    let mut slots: HashMap<String, usize> = HashMap::new();

    for hit in dense {
        if slots.contains_key(&hit.document.id) { continue; }
        let dense_score = hit.dense_score();
        slots.insert(hit.document.id.clone(), fused.len());
        let mut result = RankedResult::from_document(hit.document);
        result.dense_score = dense_score;
        fused.push(result);
    }
    for candidate in sparse {
        match slots.get(&candidate.document.id) {
            Some(&slot) => {
                let result = &mut fused[slot];
                if candidate.score > result.sparse_score { result.sparse_score = candidate.score; }
            }
            None => {
                slots.insert(candidate.document.id.clone(), fused.len());
                let mut result = RankedResult::from_document(candidate.document);
                result.sparse_score = candidate.score;
                fused.push(result);
            }
        }
    }

    for result in &mut fused {
        let normalized = if max_sparse > 0.0 { result.sparse_score / max_sparse } else { 0.0 };
        result.combined_score = result.dense_score * weights.dense + normalized * weights.sparse;
    }
    fused.sort_by(|a, b| b.combined_score.partial_cmp(&a.combined_score).unwrap_or(Ordering::Equal));
    fused.truncate(max_results);
    fused
}

/// Semantic-only ranking: the combined score is the dense score.
pub fn dense_only(hits: Vec<SemanticHit>, max_results: usize) -> Vec<RankedResult> {
    let mut results: Vec<RankedResult> = hits
        .into_iter()
        .map(|hit| {
            let score = hit.dense_score();
            let mut result = RankedResult::from_document(hit.document);
            result.dense_score = score;
            result.combined_score = score;
            result
        })
        .collect();
    results.sort_by(|a, b| b.combined_score.partial_cmp(&a.combined_score).unwrap_or(Ordering::Equal));
    results.truncate(max_results);
    results
}
