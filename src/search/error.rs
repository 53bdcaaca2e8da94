//! Error types for search operations

use crate::error::AppError;

/// Result type for search operations
pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// Errors that can occur during search operations
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// A mandatory parameter was not supplied
    #[error("Missing argument: {0}")]
    MissingArgument(String),

    /// A parameter references an unknown or unusable field, or fails validation
    #[error("Bad argument: {0}")]
    BadArgument(String),

    /// A resource the caller explicitly pinned does not exist
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Any backend failure other than a self-healed missing index
    #[error("Database error: {0}")]
    Database(String),

    /// The caller cancelled the request
    #[error("Search cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl SearchError {
    pub fn bad_argument(msg: impl Into<String>) -> Self {
        SearchError::BadArgument(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        SearchError::Database(msg.into())
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        SearchError::Database(format!("invalid JSON from backend: {}", err))
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::MissingArgument(msg) => AppError::MissingArgument(msg),
            SearchError::BadArgument(msg) => AppError::BadArgument(msg),
            SearchError::ResourceNotFound(msg) => AppError::NotFound(msg),
            SearchError::Database(msg) => AppError::Database(msg),
            SearchError::Cancelled => AppError::Cancelled,
            SearchError::InvalidConfiguration(msg) => AppError::Configuration(msg),
        }
    }
}
