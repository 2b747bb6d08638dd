use thiserror::Error;

/// Main error type for hookcache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Wrong type for key {key}: expected {expected}")]
    WrongType { key: String, expected: &'static str },

    #[error("Cannot use [{0}] as an id, it is a reserved keyword")]
    ReservedField(String),

    #[error("Duplicate id in request: {0}")]
    DuplicateId(String),
}

impl CacheError {
    /// Errors caused by the calling code rather than the backend.
    ///
    /// These are never converted into cache misses.
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Self::WrongType { .. } | Self::ReservedField(_) | Self::DuplicateId(_)
        )
    }
}

/// Result type alias for hookcache operations
pub type Result<T> = std::result::Result<T, CacheError>;
