//! Order types, the order state machine and ownership certificates.

use crate::{
    checked_price, CertificateId, EstateError, LedgerTxId, OrderId, PropertyId, UnknownVariant,
    UserId,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order status representing the purchase lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order created, awaiting payment.
    Pending,
    /// Payment received. Never persists past a settlement transaction.
    Paid,
    /// Tokens transferred and certificate generated.
    Issued,
}

impl OrderStatus {
    /// Check if this is a final state.
    pub fn is_final(&self) -> bool {
        matches!(self, OrderStatus::Issued)
    }

    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[OrderStatus] {
        match self {
            OrderStatus::Pending => &[OrderStatus::Paid, OrderStatus::Issued],
            OrderStatus::Paid => &[OrderStatus::Issued],
            OrderStatus::Issued => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Issued => "ISSUED",
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "PAID" => Ok(OrderStatus::Paid),
            "ISSUED" => Ok(OrderStatus::Issued),
            other => Err(UnknownVariant::new("OrderStatus", other)),
        }
    }
}

/// A request to buy tokens of one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub property_id: PropertyId,
    /// Requested token count, always positive.
    pub tokens: i64,
    /// `tokens * token_price` at creation time. Immutable.
    pub amount: Decimal,
    pub status: OrderStatus,
    /// Payment reference supplied by the payment flow.
    pub transaction_hash: Option<String>,
    /// Ledger receipt of the on-chain mint for this order.
    pub ledger_tx_id: Option<LedgerTxId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create a pending order priced at `token_price`.
    pub fn new(
        user_id: UserId,
        property_id: PropertyId,
        tokens: i64,
        token_price: Decimal,
    ) -> Result<Self, EstateError> {
        let amount = checked_price(token_price, tokens)?;
        let now = Utc::now();
        Ok(Self {
            id: OrderId::new(),
            user_id,
            property_id,
            tokens,
            amount,
            status: OrderStatus::Pending,
            transaction_hash: None,
            ledger_tx_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Transition to a new status.
    pub fn transition_to(&mut self, new_status: OrderStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(new_status) {
            return Err(InvalidTransition {
                from: self.status,
                to: new_status,
            });
        }

        self.status = new_status;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_issued(&self) -> bool {
        self.status == OrderStatus::Issued
    }
}

/// Error when attempting invalid state transition.
#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Invalid order transition from {:?} to {:?}",
            self.from, self.to
        )
    }
}

impl std::error::Error for InvalidTransition {}

impl From<InvalidTransition> for crate::EstateError {
    fn from(err: InvalidTransition) -> Self {
        crate::EstateError::Internal(err.to_string())
    }
}

/// Ownership certificate generated once per issued order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: CertificateId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub property_id: PropertyId,
    pub tokens: i64,
    /// Unique human-readable code printed on the certificate.
    pub code: String,
    /// Ledger receipt of the deed issued for this certificate.
    pub ledger_tx_id: Option<LedgerTxId>,
    pub issued_at: DateTime<Utc>,
}

impl Certificate {
    /// Create the certificate for an issued order.
    pub fn for_order(order: &Order, code: impl Into<String>) -> Self {
        Self {
            id: CertificateId::new(),
            order_id: order.id,
            user_id: order.user_id,
            property_id: order.property_id,
            tokens: order.tokens,
            code: code.into(),
            ledger_tx_id: None,
            issued_at: Utc::now(),
        }
    }
}
