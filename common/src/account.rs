//! Investor-side records: users, wallets, holdings and the movement journal.

use crate::{LedgerTxId, OrderId, PropertyId, TransactionId, UnknownVariant, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A platform user. Only the fields settlement and reconciliation read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: Option<String>) -> Self {
        Self {
            id: UserId::new(),
            email,
            created_at: Utc::now(),
        }
    }

    /// Identity passed to the ledger: the email, or the user id without one.
    pub fn ledger_identity(&self) -> String {
        self.email.clone().unwrap_or_else(|| self.id.to_string())
    }
}

/// Cash wallet, one per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: UserId,
    /// Never negative.
    pub cash_balance: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Create an empty wallet.
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            cash_balance: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    /// Check if the wallet can cover a withdrawal of `amount`.
    pub fn has_sufficient_funds(&self, amount: Decimal) -> bool {
        self.cash_balance >= amount
    }
}

/// A user's cumulative token balance in one property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub user_id: UserId,
    pub property_id: PropertyId,
    pub tokens: i64,
    pub updated_at: DateTime<Utc>,
}

impl Holding {
    pub fn new(user_id: UserId, property_id: PropertyId, tokens: i64) -> Self {
        Self {
            user_id,
            property_id,
            tokens,
            updated_at: Utc::now(),
        }
    }
}

/// Type of cash or token movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Cash credited to a wallet.
    Deposit,
    /// Cash debited from a wallet.
    Withdrawal,
    /// Tokens issued to a holder.
    TokenMint,
}

impl TransactionType {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Withdrawal => "WITHDRAWAL",
            TransactionType::TokenMint => "TOKEN_MINT",
        }
    }

    /// Prefix of generated references for this movement type.
    pub fn reference_prefix(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEP",
            TransactionType::Withdrawal => "WDR",
            TransactionType::TokenMint => "MINT",
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEPOSIT" => Ok(TransactionType::Deposit),
            "WITHDRAWAL" => Ok(TransactionType::Withdrawal),
            "TOKEN_MINT" => Ok(TransactionType::TokenMint),
            other => Err(UnknownVariant::new("TransactionType", other)),
        }
    }
}

/// Append-only journal row for every cash or token movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub tx_type: TransactionType,
    pub amount: Decimal,
    /// Unique generated reference.
    pub reference: String,
    /// Order this movement settles, if any.
    pub order_id: Option<OrderId>,
    pub ledger_tx_id: Option<LedgerTxId>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a journal row with a fresh unique reference.
    pub fn new(user_id: UserId, tx_type: TransactionType, amount: Decimal) -> Self {
        let id = TransactionId::new();
        Self {
            id,
            user_id,
            tx_type,
            amount,
            reference: format!("{}-{}", tx_type.reference_prefix(), id.as_uuid().simple()),
            order_id: None,
            ledger_tx_id: None,
            created_at: Utc::now(),
        }
    }

    /// Correlate the row with an order.
    pub fn with_order(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    /// Attach the ledger receipt this row marks as synced.
    pub fn with_ledger_tx(mut self, tx_id: LedgerTxId) -> Self {
        self.ledger_tx_id = Some(tx_id);
        self
    }

    /// Whether this row marks an order's mint as synced to the ledger.
    pub fn is_synced_mint_for(&self, order_id: OrderId) -> bool {
        self.tx_type == TransactionType::TokenMint
            && self.order_id == Some(order_id)
            && self.ledger_tx_id.is_some()
    }
}
