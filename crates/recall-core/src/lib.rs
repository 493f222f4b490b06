pub mod config;
pub mod embed;
pub mod error;
pub mod memory_store;
pub mod settings;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use types::{Document, Metadata, MetadataFilter, MetadataValue, RankedResult, SemanticHit};
