//! Ledger Store interfaces.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use propledger_common::{
    Certificate, CertificateId, EntityKind, Holding, LedgerTxId, OnChainEvent, Order, OrderId,
    OrderStatus, Property, PropertyId, Result, Transaction, User, UserId, Wallet,
};

/// Shared store handle passed to both engines.
pub type SharedLedgerStore = Arc<dyn LedgerStore>;

/// Relational store holding the off-chain settlement history.
///
/// Single-statement operations are exposed directly. Anything that mutates
/// more than one record must go through [`LedgerStore::begin`].
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Start an atomic unit of work.
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>>;

    /// Insert a user.
    async fn create_user(&self, user: &User) -> Result<()>;

    /// Insert a property listing.
    async fn create_property(&self, property: &Property) -> Result<()>;

    /// Insert a pending order.
    async fn create_order(&self, order: &Order) -> Result<()>;

    async fn find_property_by_id(&self, id: PropertyId) -> Result<Option<Property>>;

    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>>;

    async fn find_order_by_id(&self, id: OrderId) -> Result<Option<Order>>;

    async fn find_wallet(&self, user_id: UserId) -> Result<Option<Wallet>>;

    async fn find_holding(&self, user_id: UserId, property_id: PropertyId) -> Result<Option<Holding>>;

    /// All holdings in one property.
    async fn holdings_for_property(&self, property_id: PropertyId) -> Result<Vec<Holding>>;

    async fn find_certificate_by_order(&self, order_id: OrderId) -> Result<Option<Certificate>>;

    /// Journal rows for a user, oldest first.
    async fn transactions_for_user(&self, user_id: UserId) -> Result<Vec<Transaction>>;

    /// Append a journal row outside of a settlement transaction.
    async fn append_transaction(&self, transaction: &Transaction) -> Result<()>;

    /// Properties with `status = APPROVED AND ledger_tx_id IS NULL`.
    async fn list_approved_untokenized_properties(&self) -> Result<Vec<Property>>;

    /// Issued orders without a TOKEN_MINT journal row carrying a ledger receipt.
    async fn list_issued_orders_missing_ledger_tx(&self) -> Result<Vec<Order>>;

    /// Orders with a synced mint row whose own receipt, or one of whose
    /// certificates' receipts, is still unset. Paired with the mint receipt.
    async fn list_minted_orders_missing_stamp(&self) -> Result<Vec<(Order, LedgerTxId)>>;

    /// Certificates with `ledger_tx_id IS NULL`.
    async fn list_issued_certificates_missing_ledger_tx(&self) -> Result<Vec<Certificate>>;

    /// Append an audit event. Returns `false` if the `tx_id` was already recorded.
    async fn append_onchain_event(&self, event: &OnChainEvent) -> Result<bool>;

    /// Most recent event recording `function` for an entity.
    async fn find_onchain_event(
        &self,
        entity_kind: EntityKind,
        entity_id: &str,
        function: &str,
    ) -> Result<Option<OnChainEvent>>;

    /// Full audit log, oldest first.
    async fn list_onchain_events(&self) -> Result<Vec<OnChainEvent>>;

    async fn set_property_ledger_tx(&self, id: PropertyId, tx_id: &LedgerTxId) -> Result<()>;

    async fn set_order_ledger_tx(&self, id: OrderId, tx_id: &LedgerTxId) -> Result<()>;

    async fn set_certificate_ledger_tx(&self, id: CertificateId, tx_id: &LedgerTxId) -> Result<()>;

    /// Stamp every unsynced certificate of an order. Returns rows updated.
    async fn set_certificates_ledger_tx_for_order(
        &self,
        order_id: OrderId,
        tx_id: &LedgerTxId,
    ) -> Result<u64>;
}

/// An open atomic unit of work against the store.
///
/// Dropping without [`commit`](LedgerTransaction::commit) discards every
/// change made through it.
#[async_trait]
pub trait LedgerTransaction: Send {
    async fn find_property_by_id(&mut self, id: PropertyId) -> Result<Option<Property>>;

    /// Read an order and hold it against concurrent settlement until commit.
    async fn find_order_for_update(&mut self, id: OrderId) -> Result<Option<Order>>;

    /// Decrement remaining supply only if at least `tokens` remain.
    /// Returns `false` when supply is insufficient.
    async fn decrement_remaining_tokens(&mut self, id: PropertyId, tokens: i64) -> Result<bool>;

    /// Create the holding or add `tokens` to it.
    async fn upsert_holding(
        &mut self,
        user_id: UserId,
        property_id: PropertyId,
        tokens: i64,
    ) -> Result<Holding>;

    async fn update_order_status(&mut self, id: OrderId, status: OrderStatus) -> Result<()>;

    async fn create_certificate(&mut self, certificate: &Certificate) -> Result<()>;

    /// Create an empty wallet if absent and lock it until commit.
    async fn upsert_wallet(&mut self, user_id: UserId) -> Result<Wallet>;

    /// Add `delta` to the balance unless the result would be negative.
    /// Returns `None` when the update was refused.
    async fn update_wallet_balance(&mut self, user_id: UserId, delta: Decimal) -> Result<Option<Wallet>>;

    async fn append_transaction(&mut self, transaction: &Transaction) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
