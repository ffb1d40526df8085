//! Tokenized property definitions.

use crate::{EstateError, LedgerTxId, PropertyId, UnknownVariant};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Listing status of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyStatus {
    /// Listing is being prepared by its owner.
    Draft,
    /// Submitted for administrative review.
    Pending,
    /// Approved for sale; eligible for on-chain tokenization.
    Approved,
    /// Rejected by review.
    Rejected,
}

impl PropertyStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyStatus::Draft => "DRAFT",
            PropertyStatus::Pending => "PENDING",
            PropertyStatus::Approved => "APPROVED",
            PropertyStatus::Rejected => "REJECTED",
        }
    }
}

impl std::str::FromStr for PropertyStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(PropertyStatus::Draft),
            "PENDING" => Ok(PropertyStatus::Pending),
            "APPROVED" => Ok(PropertyStatus::Approved),
            "REJECTED" => Ok(PropertyStatus::Rejected),
            other => Err(UnknownVariant::new("PropertyStatus", other)),
        }
    }
}

/// A property whose ownership is sold as fungible tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: PropertyId,
    pub title: String,
    pub location: String,
    /// Fixed at creation.
    pub total_tokens: i64,
    /// Unsold supply, always within `0..=total_tokens`.
    pub remaining_tokens: i64,
    pub token_price: Decimal,
    pub status: PropertyStatus,
    /// Set once the property is tokenized on the distributed ledger.
    pub ledger_tx_id: Option<LedgerTxId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Property {
    /// Create a draft property with its full supply unsold.
    pub fn new(
        title: impl Into<String>,
        location: impl Into<String>,
        total_tokens: i64,
        token_price: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PropertyId::new(),
            title: title.into(),
            location: location.into(),
            total_tokens,
            remaining_tokens: total_tokens,
            token_price,
            status: PropertyStatus::Draft,
            ledger_tx_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder-style status override, used when seeding listings.
    pub fn with_status(mut self, status: PropertyStatus) -> Self {
        self.status = status;
        self
    }

    /// Tokens already transferred to holders.
    pub fn sold_tokens(&self) -> i64 {
        self.total_tokens - self.remaining_tokens
    }

    /// Whether `tokens` can still be issued from remaining supply.
    pub fn has_supply(&self, tokens: i64) -> bool {
        tokens <= self.remaining_tokens
    }

    /// Price of `tokens` at the current token price.
    pub fn price_of(&self, tokens: i64) -> Result<Decimal, EstateError> {
        checked_price(self.token_price, tokens)
    }

    /// Whether the property has been tokenized on-chain.
    pub fn is_tokenized(&self) -> bool {
        self.ledger_tx_id.is_some()
    }
}

/// `token_price * tokens`, rejecting amounts outside the decimal range.
pub fn checked_price(token_price: Decimal, tokens: i64) -> Result<Decimal, EstateError> {
    token_price.checked_mul(Decimal::from(tokens)).ok_or_else(|| {
        EstateError::invalid_input(
            "tokens",
            format!("{} tokens at {} overflows the order amount", tokens, token_price),
        )
    })
}
