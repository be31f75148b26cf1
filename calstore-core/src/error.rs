//! Error types for calstore operations.

use thiserror::Error;

/// Errors that can occur in calstore operations.
#[derive(Error, Debug)]
pub enum CalError {
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Object ID already exists: {0}")]
    ObjectIdAlreadyExists(String),

    #[error("No such calendar: {0}")]
    NoSuchCalendar(String),

    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Malformed interval: end {end} is before start {start}")]
    MalformedInterval { start: i64, end: i64 },

    #[error("Failed to save calendar: {0}")]
    PersistenceFailure(String),

    #[error("Object '{0}' already has a master component")]
    DuplicateUid(String),

    #[error("Object '{uid}' already has a detached instance at {rid}")]
    DuplicateRecurrence { uid: String, rid: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CalError {
    fn from(e: serde_json::Error) -> Self {
        CalError::Serialization(e.to_string())
    }
}

/// Result type alias for calstore operations.
pub type CalResult<T> = Result<T, CalError>;
