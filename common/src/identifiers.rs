//! Identifier types for PropLedger entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new time-ordered identifier.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Create from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from string.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Get the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_identifier!(
    /// Unique identifier for a tokenized property.
    PropertyId
);

uuid_identifier!(
    /// Unique identifier for an investor or administrator account.
    UserId
);

uuid_identifier!(
    /// Unique identifier for a purchase order.
    OrderId
);

uuid_identifier!(
    /// Unique identifier for an ownership certificate.
    CertificateId
);

uuid_identifier!(
    /// Unique identifier for a cash/token movement row.
    TransactionId
);

/// Receipt identifier returned by the distributed ledger for one submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerTxId(String);

impl LedgerTxId {
    /// Prefix of identifiers synthesised when the ledger confirmed a record
    /// exists but reported no receipt for it.
    pub const RECOVERED_PREFIX: &'static str = "recovered:";

    /// Wrap a ledger-issued transaction id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Marker id for a record the ledger already holds without a known receipt.
    pub fn recovered(subject: impl fmt::Display) -> Self {
        Self(format!("{}{}", Self::RECOVERED_PREFIX, subject))
    }

    /// Whether this id was synthesised rather than issued by the ledger.
    pub fn is_recovered(&self) -> bool {
        self.0.starts_with(Self::RECOVERED_PREFIX)
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LedgerTxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for LedgerTxId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for LedgerTxId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
