//! In-process Ledger Store.
//!
//! Transactions take the store lock for their whole lifetime and work on a
//! private copy of the state, which replaces the shared state on commit.
//! This gives serializable isolation at the cost of running one
//! transaction at a time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use propledger_common::{
    Certificate, CertificateId, EntityKind, EstateError, Holding, LedgerTxId, OnChainEvent, Order,
    OrderId, OrderStatus, Property, PropertyId, PropertyStatus, Result, Transaction, User, UserId,
    Wallet,
};

use crate::store::{LedgerStore, LedgerTransaction};

#[derive(Debug, Clone, Default)]
struct LedgerState {
    users: HashMap<UserId, User>,
    properties: HashMap<PropertyId, Property>,
    orders: HashMap<OrderId, Order>,
    holdings: HashMap<(UserId, PropertyId), Holding>,
    certificates: HashMap<CertificateId, Certificate>,
    wallets: HashMap<UserId, Wallet>,
    transactions: Vec<Transaction>,
    onchain_events: Vec<OnChainEvent>,
}

impl LedgerState {
    fn append_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        if self
            .transactions
            .iter()
            .any(|t| t.reference == transaction.reference)
        {
            return Err(EstateError::Conflict(format!(
                "transaction reference {} already exists",
                transaction.reference
            )));
        }
        self.transactions.push(transaction.clone());
        Ok(())
    }

    fn create_certificate(&mut self, certificate: &Certificate) -> Result<()> {
        let duplicate = self.certificates.values().any(|c| {
            c.order_id == certificate.order_id || c.code == certificate.code
        });
        if duplicate {
            return Err(EstateError::Conflict(format!(
                "certificate for order {} already exists",
                certificate.order_id
            )));
        }
        self.certificates.insert(certificate.id, certificate.clone());
        Ok(())
    }
}

/// Ledger Store kept entirely in memory.
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedgerStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.users.contains_key(&user.id) {
            return Err(EstateError::Conflict(format!("user {} already exists", user.id)));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn create_property(&self, property: &Property) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.properties.contains_key(&property.id) {
            return Err(EstateError::Conflict(format!(
                "property {} already exists",
                property.id
            )));
        }
        state.properties.insert(property.id, property.clone());
        Ok(())
    }

    async fn create_order(&self, order: &Order) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.properties.contains_key(&order.property_id) {
            return Err(EstateError::not_found(EntityKind::Property, order.property_id));
        }
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find_property_by_id(&self, id: PropertyId) -> Result<Option<Property>> {
        Ok(self.state.lock().await.properties.get(&id).cloned())
    }

    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn find_order_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn find_wallet(&self, user_id: UserId) -> Result<Option<Wallet>> {
        Ok(self.state.lock().await.wallets.get(&user_id).cloned())
    }

    async fn find_holding(&self, user_id: UserId, property_id: PropertyId) -> Result<Option<Holding>> {
        Ok(self
            .state
            .lock()
            .await
            .holdings
            .get(&(user_id, property_id))
            .cloned())
    }

    async fn holdings_for_property(&self, property_id: PropertyId) -> Result<Vec<Holding>> {
        let state = self.state.lock().await;
        let mut holdings: Vec<Holding> = state
            .holdings
            .values()
            .filter(|h| h.property_id == property_id)
            .cloned()
            .collect();
        holdings.sort_by_key(|h| h.user_id);
        Ok(holdings)
    }

    async fn find_certificate_by_order(&self, order_id: OrderId) -> Result<Option<Certificate>> {
        Ok(self
            .state
            .lock()
            .await
            .certificates
            .values()
            .find(|c| c.order_id == order_id)
            .cloned())
    }

    async fn transactions_for_user(&self, user_id: UserId) -> Result<Vec<Transaction>> {
        Ok(self
            .state
            .lock()
            .await
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn append_transaction(&self, transaction: &Transaction) -> Result<()> {
        self.state.lock().await.append_transaction(transaction)
    }

    async fn list_approved_untokenized_properties(&self) -> Result<Vec<Property>> {
        let state = self.state.lock().await;
        let mut properties: Vec<Property> = state
            .properties
            .values()
            .filter(|p| p.status == PropertyStatus::Approved && p.ledger_tx_id.is_none())
            .cloned()
            .collect();
        properties.sort_by_key(|p| p.id);
        Ok(properties)
    }

    async fn list_issued_orders_missing_ledger_tx(&self) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Issued)
            .filter(|o| !state.transactions.iter().any(|t| t.is_synced_mint_for(o.id)))
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }

    async fn list_minted_orders_missing_stamp(&self) -> Result<Vec<(Order, LedgerTxId)>> {
        let state = self.state.lock().await;
        let mut minted: Vec<(Order, LedgerTxId)> = state
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Issued)
            .filter(|o| {
                o.ledger_tx_id.is_none()
                    || state
                        .certificates
                        .values()
                        .any(|c| c.order_id == o.id && c.ledger_tx_id.is_none())
            })
            .filter_map(|o| {
                state
                    .transactions
                    .iter()
                    .find(|t| t.is_synced_mint_for(o.id))
                    .and_then(|t| t.ledger_tx_id.clone())
                    .map(|tx_id| (o.clone(), tx_id))
            })
            .collect();
        minted.sort_by_key(|(o, _)| o.id);
        Ok(minted)
    }

    async fn list_issued_certificates_missing_ledger_tx(&self) -> Result<Vec<Certificate>> {
        let state = self.state.lock().await;
        let mut certificates: Vec<Certificate> = state
            .certificates
            .values()
            .filter(|c| c.ledger_tx_id.is_none())
            .cloned()
            .collect();
        certificates.sort_by_key(|c| c.id);
        Ok(certificates)
    }

    async fn append_onchain_event(&self, event: &OnChainEvent) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.onchain_events.iter().any(|e| e.tx_id == event.tx_id) {
            debug!(tx_id = %event.tx_id, "On-chain event already recorded");
            return Ok(false);
        }
        state.onchain_events.push(event.clone());
        Ok(true)
    }

    async fn find_onchain_event(
        &self,
        entity_kind: EntityKind,
        entity_id: &str,
        function: &str,
    ) -> Result<Option<OnChainEvent>> {
        Ok(self
            .state
            .lock()
            .await
            .onchain_events
            .iter()
            .rev()
            .find(|e| e.records(entity_kind, entity_id, function))
            .cloned())
    }

    async fn list_onchain_events(&self) -> Result<Vec<OnChainEvent>> {
        Ok(self.state.lock().await.onchain_events.clone())
    }

    async fn set_property_ledger_tx(&self, id: PropertyId, tx_id: &LedgerTxId) -> Result<()> {
        let mut state = self.state.lock().await;
        let property = state
            .properties
            .get_mut(&id)
            .ok_or_else(|| EstateError::not_found(EntityKind::Property, id))?;
        property.ledger_tx_id = Some(tx_id.clone());
        property.updated_at = Utc::now();
        Ok(())
    }

    async fn set_order_ledger_tx(&self, id: OrderId, tx_id: &LedgerTxId) -> Result<()> {
        let mut state = self.state.lock().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| EstateError::not_found(EntityKind::Order, id))?;
        order.ledger_tx_id = Some(tx_id.clone());
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn set_certificate_ledger_tx(&self, id: CertificateId, tx_id: &LedgerTxId) -> Result<()> {
        let mut state = self.state.lock().await;
        let certificate = state
            .certificates
            .get_mut(&id)
            .ok_or_else(|| EstateError::not_found(EntityKind::Certificate, id))?;
        certificate.ledger_tx_id = Some(tx_id.clone());
        Ok(())
    }

    async fn set_certificates_ledger_tx_for_order(
        &self,
        order_id: OrderId,
        tx_id: &LedgerTxId,
    ) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut updated = 0;
        for certificate in state.certificates.values_mut() {
            if certificate.order_id == order_id && certificate.ledger_tx_id.is_none() {
                certificate.ledger_tx_id = Some(tx_id.clone());
                updated += 1;
            }
        }
        Ok(updated)
    }
}

/// Open unit of work on a [`MemoryLedgerStore`].
struct MemoryTransaction {
    guard: OwnedMutexGuard<LedgerState>,
    working: LedgerState,
}

#[async_trait]
impl LedgerTransaction for MemoryTransaction {
    async fn find_property_by_id(&mut self, id: PropertyId) -> Result<Option<Property>> {
        Ok(self.working.properties.get(&id).cloned())
    }

    async fn find_order_for_update(&mut self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.working.orders.get(&id).cloned())
    }

    async fn decrement_remaining_tokens(&mut self, id: PropertyId, tokens: i64) -> Result<bool> {
        let property = self
            .working
            .properties
            .get_mut(&id)
            .ok_or_else(|| EstateError::not_found(EntityKind::Property, id))?;

        if property.remaining_tokens < tokens {
            return Ok(false);
        }
        property.remaining_tokens -= tokens;
        property.updated_at = Utc::now();
        Ok(true)
    }

    async fn upsert_holding(
        &mut self,
        user_id: UserId,
        property_id: PropertyId,
        tokens: i64,
    ) -> Result<Holding> {
        let holding = self
            .working
            .holdings
            .entry((user_id, property_id))
            .or_insert_with(|| Holding::new(user_id, property_id, 0));
        holding.tokens += tokens;
        holding.updated_at = Utc::now();
        Ok(holding.clone())
    }

    async fn update_order_status(&mut self, id: OrderId, status: OrderStatus) -> Result<()> {
        let order = self
            .working
            .orders
            .get_mut(&id)
            .ok_or_else(|| EstateError::not_found(EntityKind::Order, id))?;
        order.transition_to(status)?;
        Ok(())
    }

    async fn create_certificate(&mut self, certificate: &Certificate) -> Result<()> {
        self.working.create_certificate(certificate)
    }

    async fn upsert_wallet(&mut self, user_id: UserId) -> Result<Wallet> {
        Ok(self
            .working
            .wallets
            .entry(user_id)
            .or_insert_with(|| Wallet::empty(user_id))
            .clone())
    }

    async fn update_wallet_balance(&mut self, user_id: UserId, delta: Decimal) -> Result<Option<Wallet>> {
        let Some(wallet) = self.working.wallets.get_mut(&user_id) else {
            return Ok(None);
        };
        let balance = wallet
            .cash_balance
            .checked_add(delta)
            .ok_or_else(|| EstateError::invalid_input("amount", "wallet balance overflow"))?;
        if balance < Decimal::ZERO {
            return Ok(None);
        }
        wallet.cash_balance = balance;
        wallet.updated_at = Utc::now();
        Ok(Some(wallet.clone()))
    }

    async fn append_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        self.working.append_transaction(transaction)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use propledger_common::TransactionType;
    use rust_decimal_macros::dec;

    async fn seeded_store() -> (MemoryLedgerStore, Property) {
        let store = MemoryLedgerStore::new();
        let property = Property::new("Harbour Loft", "Lisbon", 100, dec!(1000))
            .with_status(PropertyStatus::Approved);
        store.create_property(&property).await.unwrap();
        (store, property)
    }

    #[tokio::test]
    async fn test_commit_applies_changes() {
        let (store, property) = seeded_store().await;
        let user = UserId::new();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.decrement_remaining_tokens(property.id, 30).await.unwrap());
        tx.upsert_holding(user, property.id, 30).await.unwrap();
        tx.commit().await.unwrap();

        let stored = store.find_property_by_id(property.id).await.unwrap().unwrap();
        assert_eq!(stored.remaining_tokens, 70);
        let holding = store.find_holding(user, property.id).await.unwrap().unwrap();
        assert_eq!(holding.tokens, 30);
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_changes() {
        let (store, property) = seeded_store().await;

        {
            let mut tx = store.begin().await.unwrap();
            tx.decrement_remaining_tokens(property.id, 30).await.unwrap();
            tx.upsert_holding(UserId::new(), property.id, 30).await.unwrap();
        }

        let stored = store.find_property_by_id(property.id).await.unwrap().unwrap();
        assert_eq!(stored.remaining_tokens, 100);
        assert!(store.holdings_for_property(property.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conditional_decrement() {
        let (store, property) = seeded_store().await;

        let mut tx = store.begin().await.unwrap();
        assert!(!tx.decrement_remaining_tokens(property.id, 101).await.unwrap());
        assert!(tx.decrement_remaining_tokens(property.id, 100).await.unwrap());
        assert!(!tx.decrement_remaining_tokens(property.id, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_wallet_balance_never_negative() {
        let store = MemoryLedgerStore::new();
        let user = UserId::new();

        let mut tx = store.begin().await.unwrap();
        tx.upsert_wallet(user).await.unwrap();
        let wallet = tx.update_wallet_balance(user, dec!(200)).await.unwrap().unwrap();
        assert_eq!(wallet.cash_balance, dec!(200));
        assert!(tx.update_wallet_balance(user, dec!(-500)).await.unwrap().is_none());
        tx.commit().await.unwrap();

        let wallet = store.find_wallet(user).await.unwrap().unwrap();
        assert_eq!(wallet.cash_balance, dec!(200));
    }

    #[tokio::test]
    async fn test_onchain_event_unique_on_tx_id() {
        let store = MemoryLedgerStore::new();
        let event = OnChainEvent::new(
            LedgerTxId::new("tx-1"),
            "PropertyRegistry",
            "RegisterProperty",
            EntityKind::Property,
            "p-1",
            serde_json::json!({}),
        );

        assert!(store.append_onchain_event(&event).await.unwrap());
        assert!(!store.append_onchain_event(&event).await.unwrap());
        assert_eq!(store.list_onchain_events().await.unwrap().len(), 1);

        let found = store
            .find_onchain_event(EntityKind::Property, "p-1", "RegisterProperty")
            .await
            .unwrap();
        assert_eq!(found.unwrap().tx_id, LedgerTxId::new("tx-1"));
    }

    #[tokio::test]
    async fn test_issued_orders_missing_ledger_tx() {
        let (store, property) = seeded_store().await;
        let user = UserId::new();

        let mut synced = Order::new(user, property.id, 5, property.token_price).unwrap();
        synced.status = OrderStatus::Issued;
        let mut unsynced = Order::new(user, property.id, 5, property.token_price).unwrap();
        unsynced.status = OrderStatus::Issued;
        let pending = Order::new(user, property.id, 5, property.token_price).unwrap();
        for order in [&synced, &unsynced, &pending] {
            store.create_order(order).await.unwrap();
        }

        let marker = Transaction::new(user, TransactionType::TokenMint, Decimal::ZERO)
            .with_order(synced.id)
            .with_ledger_tx(LedgerTxId::new("tx-9"));
        store.append_transaction(&marker).await.unwrap();

        let candidates = store.list_issued_orders_missing_ledger_tx().await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, unsynced.id);
    }

    #[tokio::test]
    async fn test_minted_orders_missing_stamp() {
        let (store, property) = seeded_store().await;
        let user = UserId::new();

        let mut stamped = Order::new(user, property.id, 5, property.token_price).unwrap();
        stamped.status = OrderStatus::Issued;
        stamped.ledger_tx_id = Some(LedgerTxId::new("tx-1"));
        let mut unstamped = Order::new(user, property.id, 5, property.token_price).unwrap();
        unstamped.status = OrderStatus::Issued;
        let mut unmarked = Order::new(user, property.id, 5, property.token_price).unwrap();
        unmarked.status = OrderStatus::Issued;
        for order in [&stamped, &unstamped, &unmarked] {
            store.create_order(order).await.unwrap();
        }

        for (order, tx_id) in [(&stamped, "tx-1"), (&unstamped, "tx-2")] {
            let marker = Transaction::new(user, TransactionType::TokenMint, Decimal::ZERO)
                .with_order(order.id)
                .with_ledger_tx(LedgerTxId::new(tx_id));
            store.append_transaction(&marker).await.unwrap();
        }

        let minted = store.list_minted_orders_missing_stamp().await.unwrap();
        assert_eq!(minted.len(), 1);
        assert_eq!(minted[0].0.id, unstamped.id);
        assert_eq!(minted[0].1, LedgerTxId::new("tx-2"));

        // A stamped order still qualifies while one of its certificates is unsynced.
        let mut tx = store.begin().await.unwrap();
        tx.create_certificate(&Certificate::for_order(&stamped, "CERT-S")).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.list_minted_orders_missing_stamp().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_one_certificate_per_order() {
        let (store, property) = seeded_store().await;
        let order = Order::new(UserId::new(), property.id, 5, property.token_price).unwrap();
        store.create_order(&order).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.create_certificate(&Certificate::for_order(&order, "CERT-A")).await.unwrap();
        let duplicate = tx.create_certificate(&Certificate::for_order(&order, "CERT-B")).await;
        assert!(matches!(duplicate, Err(EstateError::Conflict(_))));
    }
}
