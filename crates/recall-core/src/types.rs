//! Domain types shared by the cache, the sparse index and the retriever.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type DocumentId = String;
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A scalar metadata value attached to a document.
///
/// Untagged so that JSON documents can carry plain values
/// (`{"page": 3, "source": "rulebook"}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self { Self::Text(v.to_string()) }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self { Self::Text(v) }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self { Self::Integer(v) }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self { Self::Float(v) }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self { Self::Bool(v) }
}

/// A unit of retrievable text.
///
/// - `id`: stable identifier within a collection
/// - `content`: the text that is tokenized and embedded
/// - `metadata`: scalar attributes usable in equality filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { id: id.into(), content: content.into(), metadata: Metadata::new() }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Conjunction of exact-match clauses over document metadata.
///
/// An empty filter matches every document. A clause naming a field the
/// document does not carry never matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub clauses: Vec<(String, MetadataValue)>,
}

impl MetadataFilter {
    pub fn new() -> Self { Self::default() }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.clauses.push((field.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool { self.clauses.is_empty() }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.clauses.iter().all(|(field, expected)| metadata.get(field) == Some(expected))
    }
}

/// A nearest-neighbor hit returned by the document store.
///
/// `distance` is a cosine distance in `[0, 2]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticHit {
    pub document: Document,
    pub distance: f32,
}

impl SemanticHit {
    /// Similarity in `[0, 1]` derived as `1 - distance`.
    pub fn dense_score(&self) -> f32 {
        (1.0 - self.distance).clamp(0.0, 1.0)
    }
}

/// One fused retrieval result.
///
/// Both partial scores default to `0.0` when only one ranking side found the
/// document, so `combined_score` is always defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub document_id: DocumentId,
    pub content: String,
    pub metadata: Metadata,
    pub sparse_score: f32,
    pub dense_score: f32,
    pub combined_score: f32,
}

impl RankedResult {
    pub fn from_document(document: Document) -> Self {
        Self {
            document_id: document.id,
            content: document.content,
            metadata: document.metadata,
            sparse_score: 0.0,
            dense_score: 0.0,
            combined_score: 0.0,
        }
    }
}
