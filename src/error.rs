//! Error types for the swap bridge relayer

use thiserror::Error;

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Record store error: {0}")]
    Store(String),

    /// A conditional write found the row in a different state than expected
    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Chain connection error for {chain}: {message}")]
    ChainConnection { chain: String, message: String },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Signer error: {0}")]
    Signer(String),

    #[error("Broadcast error: {0}")]
    Broadcast(String),

    #[error("Replacement transaction underpriced: {0}")]
    ReplacementUnderpriced(String),

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Event parsing error: {0}")]
    EventParsing(String),

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Record hash mismatch on {table} row {id}")]
    IntegrityViolation { table: &'static str, id: i64 },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Unsupported token {0}: no swap pair")]
    UnsupportedToken(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Check if error is transient infrastructure trouble
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayerError::ChainConnection { .. }
                | RelayerError::Timeout { .. }
                | RelayerError::Database(_)
                | RelayerError::Store(_)
        )
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            RelayerError::IntegrityViolation { .. }
                | RelayerError::Database(_)
                | RelayerError::Store(_)
                | RelayerError::Signer(_)
        )
    }

    /// Known transient send error that re-queues instead of failing the swap
    pub fn is_replacement_underpriced(&self) -> bool {
        matches!(self, RelayerError::ReplacementUnderpriced(_))
    }

    /// Map a node's broadcast rejection onto the error taxonomy
    pub fn from_broadcast(message: String) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("replacement transaction underpriced")
            || lower.contains("transaction underpriced")
        {
            RelayerError::ReplacementUnderpriced(message)
        } else {
            RelayerError::Broadcast(message)
        }
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_underpriced_broadcast_is_distinguished() {
        let err = RelayerError::from_broadcast(
            "replacement transaction underpriced".to_string(),
        );
        assert!(err.is_replacement_underpriced());

        let err = RelayerError::from_broadcast("insufficient funds for gas".to_string());
        assert!(!err.is_replacement_underpriced());
        assert!(matches!(err, RelayerError::Broadcast(_)));
    }

    #[test]
    fn test_classification() {
        let timeout = RelayerError::Timeout {
            operation: "receipt".to_string(),
        };
        assert!(timeout.is_retryable());
        assert!(!timeout.should_alert());

        let tampered = RelayerError::IntegrityViolation { table: "swap", id: 7 };
        assert!(tampered.should_alert());
        assert!(!tampered.is_retryable());
    }
}
