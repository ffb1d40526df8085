//! Error types for PropLedger operations.

use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

/// Kind of entity an error or audit record refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Property,
    Order,
    Certificate,
    User,
    Wallet,
}

impl EntityKind {
    /// Stable lowercase name used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Property => "property",
            EntityKind::Order => "order",
            EntityKind::Certificate => "certificate",
            EntityKind::User => "user",
            EntityKind::Wallet => "wallet",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "property" => Ok(EntityKind::Property),
            "order" => Ok(EntityKind::Order),
            "certificate" => Ok(EntityKind::Certificate),
            "user" => Ok(EntityKind::User),
            "wallet" => Ok(EntityKind::Wallet),
            other => Err(UnknownVariant::new("EntityKind", other)),
        }
    }
}

/// Main error type for settlement and reconciliation operations.
#[derive(Error, Debug)]
pub enum EstateError {
    /// Referenced property, order, user or certificate does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: EntityKind, id: String },

    /// Token request exceeds the property's remaining supply.
    #[error("Insufficient supply: requested {requested} tokens, {remaining} remaining")]
    InsufficientSupply { requested: i64, remaining: i64 },

    /// Withdrawal exceeds the wallet's cash balance.
    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        requested: Decimal,
        available: Decimal,
    },

    /// Non-positive or otherwise unusable input quantity.
    #[error("Invalid input for {field}: {message}")]
    InvalidInput { field: String, message: String },

    /// The distributed ledger refused or never received a submission.
    #[error("Ledger submission {function} failed: {reason}")]
    LedgerSubmissionFailed { function: String, reason: String },

    /// Ledger integration is switched off; reconciliation cannot run.
    #[error("Ledger integration is disabled")]
    LedgerDisabled,

    /// A uniqueness constraint was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Ledger Store failure.
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EstateError {
    /// Shorthand for a missing entity.
    pub fn not_found(entity: EntityKind, id: impl fmt::Display) -> Self {
        EstateError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Shorthand for a rejected input quantity.
    pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        EstateError::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable by re-invoking the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EstateError::LedgerSubmissionFailed { .. } | EstateError::Database(_)
        )
    }

    /// Get error code for API responses and batch summaries.
    pub fn error_code(&self) -> &'static str {
        match self {
            EstateError::NotFound { .. } => "NOT_FOUND",
            EstateError::InsufficientSupply { .. } => "INSUFFICIENT_SUPPLY",
            EstateError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            EstateError::InvalidInput { .. } => "INVALID_INPUT",
            EstateError::LedgerSubmissionFailed { .. } => "LEDGER_SUBMISSION_FAILED",
            EstateError::LedgerDisabled => "LEDGER_DISABLED",
            EstateError::Conflict(_) => "CONFLICT",
            EstateError::Database(_) => "DATABASE_ERROR",
            EstateError::Configuration(_) => "CONFIGURATION_ERROR",
            EstateError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the API layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            EstateError::NotFound { .. } => 404,
            EstateError::InsufficientSupply { .. } | EstateError::InsufficientFunds { .. } => 409,
            EstateError::Conflict(_) => 409,
            EstateError::InvalidInput { .. } => 400,
            EstateError::LedgerSubmissionFailed { .. } => 502,
            EstateError::LedgerDisabled => 503,
            EstateError::Database(_)
            | EstateError::Configuration(_)
            | EstateError::Internal(_) => 500,
        }
    }
}

/// Result type alias for PropLedger operations.
pub type Result<T> = std::result::Result<T, EstateError>;

/// A stored enum value that no variant matches.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown {type_name} value: {value}")]
pub struct UnknownVariant {
    pub type_name: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(type_name: &'static str, value: impl Into<String>) -> Self {
        Self {
            type_name,
            value: value.into(),
        }
    }
}

impl From<UnknownVariant> for EstateError {
    fn from(err: UnknownVariant) -> Self {
        EstateError::Database(err.to_string())
    }
}
