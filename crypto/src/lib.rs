//! PropLedger Cryptographic Helpers
//!
//! Content hashing for deeds submitted to the distributed ledger and
//! generation of human-readable certificate codes.

pub mod codes;
pub mod hash;

pub use codes::{certificate_code, is_certificate_code};
pub use hash::{content_hash, sha256, sha256_hex};

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
