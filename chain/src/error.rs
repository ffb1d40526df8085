//! Ledger client error types.

use propledger_common::EstateError;
use thiserror::Error;

/// Errors returned by a ledger submission.
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// Gateway unreachable or connection dropped.
    #[error("Network error: {0}")]
    Network(String),

    /// No response within the configured request timeout.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Contract-level business rule rejection.
    #[error("Rejected by ledger ({code}): {message}")]
    Rejected { code: String, message: String },

    /// The ledger already holds the record this call would create.
    #[error("Already exists on ledger: {message}")]
    AlreadyExists {
        message: String,
        /// Receipt of the earlier submission, when the gateway reports one.
        tx_id: Option<String>,
    },

    /// Gateway answered with a body we could not interpret.
    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),

    /// Client could not be constructed from its settings.
    #[error("Invalid client configuration: {0}")]
    Configuration(String),
}

impl ChainError {
    /// Stable error code for logs and reports.
    pub fn error_code(&self) -> &'static str {
        match self {
            ChainError::Network(_) => "CHAIN_NETWORK",
            ChainError::Timeout(_) => "CHAIN_TIMEOUT",
            ChainError::Rejected { .. } => "CHAIN_REJECTED",
            ChainError::AlreadyExists { .. } => "CHAIN_ALREADY_EXISTS",
            ChainError::InvalidResponse(_) => "CHAIN_INVALID_RESPONSE",
            ChainError::Configuration(_) => "CHAIN_CONFIGURATION",
        }
    }

    /// Whether an operator re-run could succeed without any data change.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Network(_) | ChainError::Timeout(_))
    }

    /// Whether this is the "already exists" rejection class.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ChainError::AlreadyExists { .. })
    }

    /// Lift into the settlement error taxonomy, naming the failed function.
    pub fn into_estate_error(self, function: &str) -> EstateError {
        EstateError::LedgerSubmissionFailed {
            function: function.to_string(),
            reason: self.to_string(),
        }
    }
}

/// Result type for ledger submissions.
pub type ChainResult<T> = Result<T, ChainError>;
