use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation failed: {0}")]
    Operation(String),

    /// A persisted index could not be read back or disagrees with itself.
    #[error("Corrupt persisted index: {0}")]
    CorruptIndex(String),

    /// A collaborator (document store, disk) failed in a way worth retrying.
    #[error("Transient retrieval failure: {0}")]
    Transient(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
