//! Settlement Engine.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument, warn};

use propledger_common::{
    Certificate, EntityKind, EstateError, Holding, Order, OrderId, OrderStatus, PropertyId,
    Result, Transaction, TransactionType, UserId, Wallet,
};
use propledger_crypto::certificate_code;
use propledger_store::{LedgerStore, LedgerTransaction, SharedLedgerStore};

use crate::config::SettlementConfig;
use crate::metrics::{SettlementMetrics, SharedSettlementMetrics};

/// Result of confirming payment for an order.
#[derive(Debug, Clone, Serialize)]
pub struct OrderSettlement {
    pub order: Order,
    pub certificate: Option<Certificate>,
    /// `false` when the order was already ISSUED and nothing was executed.
    pub newly_issued: bool,
}

/// Result of an administrative mint.
#[derive(Debug, Clone, Serialize)]
pub struct MintReceipt {
    pub holding: Holding,
    pub transaction: Transaction,
    pub remaining_tokens: i64,
}

/// Result of a deposit or withdrawal.
#[derive(Debug, Clone, Serialize)]
pub struct WalletReceipt {
    pub wallet: Wallet,
    pub transaction: Transaction,
}

/// Supply accounting for one property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SupplySnapshot {
    pub property_id: PropertyId,
    pub total: i64,
    pub remaining: i64,
    /// Sum of all holdings in the property.
    pub held: i64,
}

impl SupplySnapshot {
    /// `remaining + held == total`.
    pub fn is_consistent(&self) -> bool {
        self.remaining + self.held == self.total
    }
}

/// Order lifecycle, token issuance and wallet movements.
pub struct SettlementEngine {
    store: SharedLedgerStore,
    config: SettlementConfig,
    metrics: SharedSettlementMetrics,
}

impl SettlementEngine {
    pub fn new(store: SharedLedgerStore, config: SettlementConfig) -> Self {
        Self {
            store,
            config,
            metrics: Arc::new(SettlementMetrics::new()),
        }
    }

    /// Report into an externally owned metrics instance.
    pub fn with_metrics(mut self, metrics: SharedSettlementMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    pub fn metrics(&self) -> &SettlementMetrics {
        &self.metrics
    }

    /// Create a PENDING order priced at the property's current token price.
    ///
    /// Supply is checked but not reserved; [`confirm_payment`](Self::confirm_payment)
    /// performs the authoritative check.
    #[instrument(skip(self), fields(user_id = %user_id, property_id = %property_id))]
    pub async fn create_order(&self, user_id: UserId, property_id: PropertyId, tokens: i64) -> Result<Order> {
        self.validate_tokens(tokens)?;

        let property = self
            .store
            .find_property_by_id(property_id)
            .await?
            .ok_or_else(|| EstateError::not_found(EntityKind::Property, property_id))?;

        if !property.has_supply(tokens) {
            self.metrics.supply_rejected();
            return Err(EstateError::InsufficientSupply {
                requested: tokens,
                remaining: property.remaining_tokens,
            });
        }

        let order = Order::new(user_id, property_id, tokens, property.token_price)?;
        self.store.create_order(&order).await?;
        self.metrics.order_created();

        info!(
            order_id = %order.id,
            tokens,
            amount = %order.amount,
            "Order created"
        );

        Ok(order)
    }

    /// Settle a paid order: move supply into the buyer's holding, issue the
    /// certificate and mark the order ISSUED, all in one transaction.
    ///
    /// Calling this on an ISSUED order is a no-op that returns success.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn confirm_payment(&self, order_id: OrderId) -> Result<OrderSettlement> {
        // Dropping `tx` on any early return discards its changes.
        let mut tx = self.store.begin().await?;

        let mut order = tx
            .find_order_for_update(order_id)
            .await?
            .ok_or_else(|| EstateError::not_found(EntityKind::Order, order_id))?;

        if order.is_issued() {
            tx.rollback().await?;
            let certificate = self.store.find_certificate_by_order(order_id).await?;
            info!("Order already issued, nothing to do");
            return Ok(OrderSettlement {
                order,
                certificate,
                newly_issued: false,
            });
        }

        let property = tx
            .find_property_by_id(order.property_id)
            .await?
            .ok_or_else(|| EstateError::not_found(EntityKind::Property, order.property_id))?;

        if !tx.decrement_remaining_tokens(order.property_id, order.tokens).await? {
            self.metrics.supply_rejected();
            warn!(
                requested = order.tokens,
                remaining = property.remaining_tokens,
                "Supply exhausted before payment confirmation"
            );
            return Err(EstateError::InsufficientSupply {
                requested: order.tokens,
                remaining: property.remaining_tokens,
            });
        }

        let holding = tx
            .upsert_holding(order.user_id, order.property_id, order.tokens)
            .await?;

        if order.status == OrderStatus::Pending {
            order.transition_to(OrderStatus::Paid)?;
        }
        order.transition_to(OrderStatus::Issued)?;
        tx.update_order_status(order.id, OrderStatus::Issued).await?;

        let certificate = self.issue_certificate(tx.as_mut(), &order).await?;

        tx.commit().await?;
        self.metrics.order_issued(order.tokens);

        info!(
            certificate = %certificate.code,
            holding_tokens = holding.tokens,
            remaining_tokens = property.remaining_tokens - order.tokens,
            "Order issued"
        );

        Ok(OrderSettlement {
            order,
            certificate: Some(certificate),
            newly_issued: true,
        })
    }

    async fn issue_certificate(&self, tx: &mut dyn LedgerTransaction, order: &Order) -> Result<Certificate> {
        let issued_at = Utc::now();
        let mut certificate =
            Certificate::for_order(order, certificate_code(&self.config.certificate_prefix, issued_at));
        certificate.issued_at = issued_at;
        tx.create_certificate(&certificate).await?;
        Ok(certificate)
    }

    /// Administrative issuance straight into a user's holding, bypassing orders.
    #[instrument(skip(self), fields(property_id = %property_id, user_id = %user_id))]
    pub async fn mint_tokens(&self, property_id: PropertyId, user_id: UserId, tokens: i64) -> Result<MintReceipt> {
        self.validate_tokens(tokens)?;

        let mut tx = self.store.begin().await?;

        let property = tx
            .find_property_by_id(property_id)
            .await?
            .ok_or_else(|| EstateError::not_found(EntityKind::Property, property_id))?;
        let amount = property.price_of(tokens)?;

        if !tx.decrement_remaining_tokens(property_id, tokens).await? {
            self.metrics.supply_rejected();
            return Err(EstateError::InsufficientSupply {
                requested: tokens,
                remaining: property.remaining_tokens,
            });
        }

        let holding = tx.upsert_holding(user_id, property_id, tokens).await?;
        let transaction = Transaction::new(user_id, TransactionType::TokenMint, amount);
        tx.append_transaction(&transaction).await?;

        tx.commit().await?;
        self.metrics.minted(tokens);

        let remaining_tokens = property.remaining_tokens - tokens;
        info!(tokens, remaining_tokens, reference = %transaction.reference, "Tokens minted");

        Ok(MintReceipt {
            holding,
            transaction,
            remaining_tokens,
        })
    }

    /// Credit a wallet, creating it if absent.
    #[instrument(skip(self), fields(user_id = %user_id, amount = %amount))]
    pub async fn deposit(&self, user_id: UserId, amount: Decimal) -> Result<WalletReceipt> {
        validate_amount(amount)?;

        let mut tx = self.store.begin().await?;
        tx.upsert_wallet(user_id).await?;

        let wallet = tx
            .update_wallet_balance(user_id, amount)
            .await?
            .ok_or_else(|| EstateError::Internal(format!("deposit refused for wallet {}", user_id)))?;

        let transaction = Transaction::new(user_id, TransactionType::Deposit, amount);
        tx.append_transaction(&transaction).await?;
        tx.commit().await?;
        self.metrics.deposited();

        info!(balance = %wallet.cash_balance, reference = %transaction.reference, "Deposit applied");
        Ok(WalletReceipt { wallet, transaction })
    }

    /// Debit a wallet. Fails with `InsufficientFunds` rather than going negative.
    #[instrument(skip(self), fields(user_id = %user_id, amount = %amount))]
    pub async fn withdraw(&self, user_id: UserId, amount: Decimal) -> Result<WalletReceipt> {
        validate_amount(amount)?;

        let mut tx = self.store.begin().await?;
        let current = tx.upsert_wallet(user_id).await?;

        let Some(wallet) = tx.update_wallet_balance(user_id, -amount).await? else {
            self.metrics.funds_rejected();
            warn!(available = %current.cash_balance, "Withdrawal exceeds balance");
            return Err(EstateError::InsufficientFunds {
                requested: amount,
                available: current.cash_balance,
            });
        };

        let transaction = Transaction::new(user_id, TransactionType::Withdrawal, amount);
        tx.append_transaction(&transaction).await?;
        tx.commit().await?;
        self.metrics.withdrew();

        info!(balance = %wallet.cash_balance, reference = %transaction.reference, "Withdrawal applied");
        Ok(WalletReceipt { wallet, transaction })
    }

    /// Current supply accounting for a property.
    pub async fn supply_snapshot(&self, property_id: PropertyId) -> Result<SupplySnapshot> {
        let property = self
            .store
            .find_property_by_id(property_id)
            .await?
            .ok_or_else(|| EstateError::not_found(EntityKind::Property, property_id))?;

        let held = self
            .store
            .holdings_for_property(property_id)
            .await?
            .iter()
            .map(|h| h.tokens)
            .sum();

        Ok(SupplySnapshot {
            property_id,
            total: property.total_tokens,
            remaining: property.remaining_tokens,
            held,
        })
    }

    fn validate_tokens(&self, tokens: i64) -> Result<()> {
        if tokens <= 0 {
            return Err(EstateError::invalid_input("tokens", "must be a positive integer"));
        }

        if let Some(max) = self.config.max_tokens_per_order {
            if tokens > max {
                return Err(EstateError::invalid_input(
                    "tokens",
                    format!("exceeds the per-order limit of {}", max),
                ));
            }
        }

        Ok(())
    }
}

/// Cash amounts are positive with at most two decimal places.
fn validate_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(EstateError::invalid_input("amount", "must be positive"));
    }

    if amount.normalize().scale() > 2 {
        return Err(EstateError::invalid_input("amount", "at most two decimal places"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use propledger_common::{Property, PropertyStatus};
    use propledger_crypto::is_certificate_code;
    use propledger_store::{LedgerStore, MemoryLedgerStore};
    use rust_decimal_macros::dec;

    async fn setup(total: i64, price: Decimal) -> (Arc<SettlementEngine>, MemoryLedgerStore, Property) {
        let store = MemoryLedgerStore::new();
        let property = Property::new("Harbour Lofts", "Lisbon", total, price).with_status(PropertyStatus::Approved);
        store.create_property(&property).await.unwrap();

        let engine = SettlementEngine::new(Arc::new(store.clone()), SettlementConfig::default());
        (Arc::new(engine), store, property)
    }

    #[tokio::test]
    async fn test_order_settles_into_holding_and_certificate() {
        let (engine, store, property) = setup(100, dec!(1000)).await;
        let user = UserId::new();

        let order = engine.create_order(user, property.id, 30).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.amount, dec!(30000));

        let settlement = engine.confirm_payment(order.id).await.unwrap();
        assert!(settlement.newly_issued);
        assert_eq!(settlement.order.status, OrderStatus::Issued);

        let certificate = settlement.certificate.unwrap();
        assert!(is_certificate_code(&certificate.code));
        assert!(certificate.code.starts_with("CERT-"));

        let stored = store.find_property_by_id(property.id).await.unwrap().unwrap();
        assert_eq!(stored.remaining_tokens, 70);

        let holding = store.find_holding(user, property.id).await.unwrap().unwrap();
        assert_eq!(holding.tokens, 30);

        let stored_order = store.find_order_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored_order.status, OrderStatus::Issued);
        assert!(store.find_certificate_by_order(order.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_confirm_fails_when_supply_exhausted() {
        let (engine, store, property) = setup(100, dec!(1000)).await;

        let first = engine.create_order(UserId::new(), property.id, 30).await.unwrap();
        engine.confirm_payment(first.id).await.unwrap();

        // Created against the 70 remaining, then supply is drained by a mint.
        let second = engine.create_order(UserId::new(), property.id, 70).await.unwrap();
        engine.mint_tokens(property.id, UserId::new(), 10).await.unwrap();

        let err = engine.confirm_payment(second.id).await.unwrap_err();
        assert!(matches!(
            err,
            EstateError::InsufficientSupply { requested: 70, remaining: 60 }
        ));

        let stored = store.find_property_by_id(property.id).await.unwrap().unwrap();
        assert_eq!(stored.remaining_tokens, 60);
        let stored_order = store.find_order_by_id(second.id).await.unwrap().unwrap();
        assert_eq!(stored_order.status, OrderStatus::Pending);
        assert!(store.find_certificate_by_order(second.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_order_rejects_oversized_request() {
        let (engine, _store, property) = setup(100, dec!(1000)).await;
        let order = engine.create_order(UserId::new(), property.id, 30).await.unwrap();
        engine.confirm_payment(order.id).await.unwrap();

        let err = engine.create_order(UserId::new(), property.id, 80).await.unwrap_err();
        assert_eq!(err.error_code(), "INSUFFICIENT_SUPPLY");
        assert_eq!(engine.metrics().snapshot().supply_rejections, 1);
    }

    #[tokio::test]
    async fn test_create_order_validation() {
        let (engine, _store, property) = setup(100, dec!(10)).await;

        let err = engine.create_order(UserId::new(), property.id, 0).await.unwrap_err();
        assert!(matches!(err, EstateError::InvalidInput { .. }));

        let err = engine.create_order(UserId::new(), PropertyId::new(), 1).await.unwrap_err();
        assert!(matches!(err, EstateError::NotFound { entity: EntityKind::Property, .. }));
    }

    #[tokio::test]
    async fn test_per_order_limit() {
        let store = MemoryLedgerStore::new();
        let property = Property::new("Canal House", "Amsterdam", 100, dec!(50));
        store.create_property(&property).await.unwrap();

        let config = SettlementConfig {
            max_tokens_per_order: Some(10),
            ..Default::default()
        };
        let engine = SettlementEngine::new(Arc::new(store), config);

        assert!(engine.create_order(UserId::new(), property.id, 10).await.is_ok());
        let err = engine.create_order(UserId::new(), property.id, 11).await.unwrap_err();
        assert!(matches!(err, EstateError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_confirm_payment_is_idempotent() {
        let (engine, store, property) = setup(100, dec!(1000)).await;
        let user = UserId::new();
        let order = engine.create_order(user, property.id, 30).await.unwrap();

        let first = engine.confirm_payment(order.id).await.unwrap();
        let second = engine.confirm_payment(order.id).await.unwrap();

        assert!(first.newly_issued);
        assert!(!second.newly_issued);
        assert_eq!(second.certificate, first.certificate);

        let holding = store.find_holding(user, property.id).await.unwrap().unwrap();
        assert_eq!(holding.tokens, 30);
        let stored = store.find_property_by_id(property.id).await.unwrap().unwrap();
        assert_eq!(stored.remaining_tokens, 70);
        assert_eq!(engine.metrics().snapshot().orders_issued, 1);
    }

    #[tokio::test]
    async fn test_confirm_unknown_order() {
        let (engine, _store, _property) = setup(100, dec!(1000)).await;
        let err = engine.confirm_payment(OrderId::new()).await.unwrap_err();
        assert!(matches!(err, EstateError::NotFound { entity: EntityKind::Order, .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_racing_confirmations_never_oversell() {
        let (engine, store, property) = setup(100, dec!(1000)).await;

        let a = engine.create_order(UserId::new(), property.id, 60).await.unwrap();
        let b = engine.create_order(UserId::new(), property.id, 60).await.unwrap();

        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.confirm_payment(a.id).await }
        });
        let second = tokio::spawn({
            let engine = engine.clone();
            async move { engine.confirm_payment(b.id).await }
        });

        let results = [first.await.unwrap(), second.await.unwrap()];
        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        let oversold = results
            .iter()
            .filter(|r| matches!(r, Err(EstateError::InsufficientSupply { .. })))
            .count();

        assert_eq!(succeeded, 1);
        assert_eq!(oversold, 1);

        let snapshot = engine.supply_snapshot(property.id).await.unwrap();
        assert_eq!(snapshot.remaining, 40);
        assert_eq!(snapshot.held, 60);
        assert!(snapshot.is_consistent());

        let stored = store.find_property_by_id(property.id).await.unwrap().unwrap();
        assert_eq!(stored.remaining_tokens, 40);
    }

    #[tokio::test]
    async fn test_mint_tokens() {
        let (engine, store, property) = setup(100, dec!(250)).await;
        let user = UserId::new();

        let receipt = engine.mint_tokens(property.id, user, 4).await.unwrap();
        assert_eq!(receipt.remaining_tokens, 96);
        assert_eq!(receipt.holding.tokens, 4);
        assert_eq!(receipt.transaction.tx_type, TransactionType::TokenMint);
        assert_eq!(receipt.transaction.amount, dec!(1000));

        let journal = store.transactions_for_user(user).await.unwrap();
        assert_eq!(journal.len(), 1);

        let err = engine.mint_tokens(property.id, user, 97).await.unwrap_err();
        assert!(matches!(err, EstateError::InsufficientSupply { requested: 97, remaining: 96 }));
        assert_eq!(store.transactions_for_user(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deposit_creates_wallet() {
        let (engine, store, _property) = setup(1, dec!(1)).await;
        let user = UserId::new();

        let receipt = engine.deposit(user, dec!(200)).await.unwrap();
        assert_eq!(receipt.wallet.cash_balance, dec!(200));
        assert_eq!(receipt.transaction.tx_type, TransactionType::Deposit);
        assert!(receipt.transaction.reference.starts_with("DEP-"));

        let wallet = store.find_wallet(user).await.unwrap().unwrap();
        assert_eq!(wallet.cash_balance, dec!(200));
    }

    #[tokio::test]
    async fn test_withdraw_insufficient_funds() {
        let (engine, store, _property) = setup(1, dec!(1)).await;
        let user = UserId::new();
        engine.deposit(user, dec!(200)).await.unwrap();

        let err = engine.withdraw(user, dec!(500)).await.unwrap_err();
        match err {
            EstateError::InsufficientFunds { requested, available } => {
                assert_eq!(requested, dec!(500));
                assert_eq!(available, dec!(200));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let wallet = store.find_wallet(user).await.unwrap().unwrap();
        assert_eq!(wallet.cash_balance, dec!(200));
        assert_eq!(store.transactions_for_user(user).await.unwrap().len(), 1);
        assert_eq!(engine.metrics().snapshot().funds_rejections, 1);
    }

    #[tokio::test]
    async fn test_withdraw_from_missing_wallet() {
        let (engine, store, _property) = setup(1, dec!(1)).await;
        let user = UserId::new();

        let err = engine.withdraw(user, dec!(1)).await.unwrap_err();
        assert!(matches!(err, EstateError::InsufficientFunds { .. }));
        // The wallet upsert is rolled back with the rest of the transaction.
        assert!(store.find_wallet(user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_withdraw_reduces_balance() {
        let (engine, _store, _property) = setup(1, dec!(1)).await;
        let user = UserId::new();
        engine.deposit(user, dec!(200)).await.unwrap();

        let receipt = engine.withdraw(user, dec!(75.50)).await.unwrap();
        assert_eq!(receipt.wallet.cash_balance, dec!(124.50));
        assert!(receipt.transaction.reference.starts_with("WDR-"));
    }

    #[tokio::test]
    async fn test_amount_validation() {
        let (engine, _store, _property) = setup(1, dec!(1)).await;
        let user = UserId::new();

        assert!(matches!(
            engine.deposit(user, dec!(0)).await.unwrap_err(),
            EstateError::InvalidInput { .. }
        ));
        assert!(matches!(
            engine.withdraw(user, dec!(-5)).await.unwrap_err(),
            EstateError::InvalidInput { .. }
        ));
        assert!(matches!(
            engine.deposit(user, dec!(1.005)).await.unwrap_err(),
            EstateError::InvalidInput { .. }
        ));
    }

    #[tokio::test]
    async fn test_order_amount_overflow_is_rejected() {
        let (engine, store, property) = setup(100, Decimal::MAX).await;
        let user = UserId::new();

        let err = engine.create_order(user, property.id, 2).await.unwrap_err();
        assert!(matches!(err, EstateError::InvalidInput { .. }));

        let err = engine.mint_tokens(property.id, user, 2).await.unwrap_err();
        assert!(matches!(err, EstateError::InvalidInput { .. }));

        let stored = store.find_property_by_id(property.id).await.unwrap().unwrap();
        assert_eq!(stored.remaining_tokens, 100);
        assert!(store.find_holding(user, property.id).await.unwrap().is_none());
        assert!(store.transactions_for_user(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deposit_overflow_leaves_balance() {
        let (engine, store, _property) = setup(1, dec!(1)).await;
        let user = UserId::new();
        engine.deposit(user, Decimal::MAX).await.unwrap();

        let err = engine.deposit(user, dec!(1)).await.unwrap_err();
        assert!(matches!(err, EstateError::InvalidInput { .. }));

        let wallet = store.find_wallet(user).await.unwrap().unwrap();
        assert_eq!(wallet.cash_balance, Decimal::MAX);
        assert_eq!(store.transactions_for_user(user).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_withdrawals_serialize() {
        let (engine, store, _property) = setup(1, dec!(1)).await;
        let user = UserId::new();
        engine.deposit(user, dec!(100)).await.unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.withdraw(user, dec!(40)).await })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 2);
        let wallet = store.find_wallet(user).await.unwrap().unwrap();
        assert_eq!(wallet.cash_balance, dec!(20));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Order { user: usize, tokens: i64 },
        Mint { user: usize, tokens: i64 },
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..3, 1i64..40).prop_map(|(user, tokens)| Op::Order { user, tokens }),
            (0usize..3, 1i64..40).prop_map(|(user, tokens)| Op::Mint { user, tokens }),
        ]
    }

    proptest! {
        #[test]
        fn prop_supply_invariant_holds(ops in prop::collection::vec(op_strategy(), 1..25)) {
            tokio_test::block_on(async {
                let (engine, _store, property) = setup(100, dec!(10)).await;
                let users = [UserId::new(), UserId::new(), UserId::new()];

                for op in ops {
                    match op {
                        Op::Order { user, tokens } => {
                            if let Ok(order) = engine.create_order(users[user], property.id, tokens).await {
                                let _ = engine.confirm_payment(order.id).await;
                            }
                        }
                        Op::Mint { user, tokens } => {
                            let _ = engine.mint_tokens(property.id, users[user], tokens).await;
                        }
                    }

                    let snapshot = engine.supply_snapshot(property.id).await.unwrap();
                    assert!(snapshot.is_consistent(), "inconsistent supply: {snapshot:?}");
                    assert!(snapshot.remaining >= 0);
                }
            });
        }
    }
}
