//! Error types for the indexer domain types.

use thiserror::Error;

/// Unified error type for domain and configuration operations.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unknown index type name
    #[error("Unknown index type: {0}")]
    UnknownIndexType(String),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexerError::Config("batch_size must be > 0".to_string());
        assert_eq!(err.to_string(), "Configuration error: batch_size must be > 0");

        let err = IndexerError::UnknownIndexType("widgets".to_string());
        assert_eq!(err.to_string(), "Unknown index type: widgets");
    }
}
