//! Reconciliation Engine.

use std::fmt;
use std::time::Instant;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use propledger_chain::{functions, ContractNames, SharedLedgerClient, SubmitOutcome};
use propledger_common::{
    Certificate, EntityKind, EstateError, LedgerTxId, OnChainEvent, Order, Property, Result,
    Transaction, TransactionType,
};
use propledger_crypto::content_hash;
use propledger_store::{LedgerStore, SharedLedgerStore};

use crate::config::ReconcilerConfig;
use crate::report::{RunOptions, RunReport, SyncCategory, SyncCounts};

/// Content hashed into a deed so the ledger can attest to the certificate.
#[derive(Serialize)]
struct DeedContent<'a> {
    code: &'a str,
    order_id: String,
    user_id: String,
    property_id: String,
    tokens: i64,
    issued_at: String,
}

impl<'a> DeedContent<'a> {
    fn of(certificate: &'a Certificate) -> Self {
        Self {
            code: &certificate.code,
            order_id: certificate.order_id.to_string(),
            user_id: certificate.user_id.to_string(),
            property_id: certificate.property_id.to_string(),
            tokens: certificate.tokens,
            issued_at: certificate.issued_at.to_rfc3339(),
        }
    }
}

/// Drives settled Ledger Store records onto the distributed ledger.
pub struct ReconciliationEngine {
    store: SharedLedgerStore,
    client: SharedLedgerClient,
    contracts: ContractNames,
}

impl ReconciliationEngine {
    /// Build an engine. Fails with [`EstateError::LedgerDisabled`] when
    /// ledger integration is switched off.
    pub fn new(store: SharedLedgerStore, client: SharedLedgerClient, config: &ReconcilerConfig) -> Result<Self> {
        if !config.ledger_enabled {
            return Err(EstateError::LedgerDisabled);
        }
        config.validate().map_err(EstateError::Configuration)?;

        Ok(Self {
            store,
            client,
            contracts: config.contracts.clone(),
        })
    }

    /// Run the selected categories in order: properties, payments, certificates.
    #[instrument(skip(self), fields(dry_run = options.dry_run))]
    pub async fn run(&self, options: &RunOptions) -> Result<RunReport> {
        let started = Instant::now();
        let mut report = RunReport {
            dry_run: options.dry_run,
            ..RunReport::default()
        };

        for category in SyncCategory::ALL {
            if !options.includes(category) {
                continue;
            }

            let counts = match category {
                SyncCategory::Properties => self.sync_properties(options.dry_run).await?,
                SyncCategory::Payments => self.sync_payments(options.dry_run).await?,
                SyncCategory::Certificates => self.sync_certificates(options.dry_run).await?,
            };

            info!(category = %category, %counts, "Category reconciled");
            report.set(category, counts);
        }

        report.set_elapsed(started.elapsed());
        info!(
            total = %report.total(),
            elapsed_ms = report.elapsed_ms,
            "Reconciliation run finished"
        );
        Ok(report)
    }

    /// Register, approve and tokenize every approved property not yet on the ledger.
    #[instrument(skip(self))]
    pub async fn sync_properties(&self, dry_run: bool) -> Result<SyncCounts> {
        let candidates = self.store.list_approved_untokenized_properties().await?;
        info!(candidates = candidates.len(), "Syncing properties");

        let mut counts = SyncCounts::default();
        for property in &candidates {
            match self.sync_property(property, dry_run).await {
                Ok(()) => counts.record_synced(),
                Err(e) => {
                    error!(property_id = %property.id, error = %e, "Property sync failed");
                    counts.record_failed();
                }
            }
        }
        Ok(counts)
    }

    async fn sync_property(&self, property: &Property, dry_run: bool) -> Result<()> {
        let id = property.id.to_string();
        let steps = [
            (
                functions::REGISTER_PROPERTY,
                vec![
                    id.clone(),
                    property.title.clone(),
                    property.location.clone(),
                    property.total_tokens.to_string(),
                ],
            ),
            (functions::APPROVE_PROPERTY, vec![id.clone()]),
            (functions::TOKENIZE_PROPERTY, vec![id.clone()]),
        ];

        let contract = &self.contracts.property_registry;
        let mut last_tx: Option<LedgerTxId> = None;

        for (function, args) in steps {
            if let Some(event) = self
                .store
                .find_onchain_event(EntityKind::Property, &id, function)
                .await?
            {
                debug!(property_id = %id, function, tx_id = %event.tx_id, "Step already on ledger, skipping");
                last_tx = Some(event.tx_id);
                continue;
            }

            if dry_run {
                info!(property_id = %id, contract = %contract, function, "Dry run: would submit");
                continue;
            }

            let outcome = self
                .client
                .submit_idempotent(contract, function, args.clone())
                .await
                .map_err(|e| e.into_estate_error(function))?;

            last_tx = Some(
                self.record_outcome(outcome, property.id, contract, function, EntityKind::Property, &id, &args)
                    .await?,
            );
        }

        if dry_run {
            return Ok(());
        }

        let tx_id = last_tx.ok_or_else(|| {
            EstateError::Internal(format!("property {} finished without a tokenize receipt", id))
        })?;
        self.store.set_property_ledger_tx(property.id, &tx_id).await?;
        info!(property_id = %id, tx_id = %tx_id, "Property tokenized on ledger");
        Ok(())
    }

    /// Mint tokens on the ledger for every issued order that has no sync marker,
    /// then finish orders whose mint is marked but whose receipts were never stamped.
    #[instrument(skip(self))]
    pub async fn sync_payments(&self, dry_run: bool) -> Result<SyncCounts> {
        let candidates = self.store.list_issued_orders_missing_ledger_tx().await?;
        let unstamped = self.store.list_minted_orders_missing_stamp().await?;
        info!(
            candidates = candidates.len(),
            unstamped = unstamped.len(),
            "Syncing payments"
        );

        let mut counts = SyncCounts::default();
        for order in &candidates {
            match self.sync_payment(order, dry_run).await {
                Ok(()) => counts.record_synced(),
                Err(e) => {
                    error!(order_id = %order.id, error = %e, "Payment sync failed");
                    counts.record_failed();
                }
            }
        }

        for (order, mint_tx) in &unstamped {
            match self.stamp_order(order, mint_tx, dry_run).await {
                Ok(()) => counts.record_synced(),
                Err(e) => {
                    error!(order_id = %order.id, error = %e, "Stamping minted order failed");
                    counts.record_failed();
                }
            }
        }
        Ok(counts)
    }

    async fn sync_payment(&self, order: &Order, dry_run: bool) -> Result<()> {
        let id = order.id.to_string();
        let contract = &self.contracts.property_token;
        let function = functions::MINT_TOKENS;

        let recorded = self
            .store
            .find_onchain_event(EntityKind::Order, &id, function)
            .await?;

        if dry_run {
            if recorded.is_none() {
                info!(order_id = %id, contract = %contract, function, "Dry run: would submit");
            }
            return Ok(());
        }

        let mint_tx = match recorded {
            Some(event) => {
                debug!(order_id = %id, tx_id = %event.tx_id, "Mint already on ledger, finishing sync");
                event.tx_id
            }
            None => {
                let args = vec![
                    order.property_id.to_string(),
                    order.user_id.to_string(),
                    order.tokens.to_string(),
                    id.clone(),
                ];
                let outcome = self
                    .client
                    .submit_idempotent(contract, function, args.clone())
                    .await
                    .map_err(|e| e.into_estate_error(function))?;

                self.record_outcome(outcome, order.id, contract, function, EntityKind::Order, &id, &args)
                    .await?
            }
        };

        self.stamp_order(order, &mint_tx, false).await?;
        self.invest(order).await;

        // Written last: the marker takes the order out of the candidate set.
        // Settled off-chain already, so the row carries no value.
        let marker = Transaction::new(order.user_id, TransactionType::TokenMint, Decimal::ZERO)
            .with_order(order.id)
            .with_ledger_tx(mint_tx.clone());
        self.store.append_transaction(&marker).await?;

        info!(order_id = %id, tx_id = %mint_tx, "Order minted on ledger");
        Ok(())
    }

    /// Copy the mint receipt onto the order and its unsynced certificates.
    async fn stamp_order(&self, order: &Order, mint_tx: &LedgerTxId, dry_run: bool) -> Result<()> {
        if dry_run {
            info!(order_id = %order.id, tx_id = %mint_tx, "Dry run: would stamp mint receipt");
            return Ok(());
        }

        self.store.set_order_ledger_tx(order.id, mint_tx).await?;
        let stamped = self
            .store
            .set_certificates_ledger_tx_for_order(order.id, mint_tx)
            .await?;

        debug!(order_id = %order.id, tx_id = %mint_tx, certificates = stamped, "Mint receipt stamped");
        Ok(())
    }

    /// Best-effort investor registration following a mint.
    async fn invest(&self, order: &Order) {
        let contract = &self.contracts.property_token;
        let function = functions::INVEST_PROPERTY;
        let id = order.id.to_string();

        match self.store.find_onchain_event(EntityKind::Order, &id, function).await {
            Ok(None) => {}
            Ok(Some(event)) => {
                debug!(order_id = %id, tx_id = %event.tx_id, "Investor already registered");
                return;
            }
            Err(e) => {
                warn!(order_id = %id, error = %e, "Audit lookup failed, skipping InvestProperty");
                return;
            }
        }

        let investor = match self.store.find_user_by_id(order.user_id).await {
            Ok(Some(user)) => user.ledger_identity(),
            Ok(None) => order.user_id.to_string(),
            Err(e) => {
                warn!(order_id = %id, error = %e, "User lookup failed, using user id");
                order.user_id.to_string()
            }
        };

        let args = vec![order.property_id.to_string(), investor, order.tokens.to_string()];
        let result = match self.client.submit_idempotent(contract, function, args.clone()).await {
            Ok(outcome) => self
                .record_outcome(outcome, order.id, contract, function, EntityKind::Order, &id, &args)
                .await
                .map(|_| ()),
            Err(e) => Err(e.into_estate_error(function)),
        };

        if let Err(e) = result {
            warn!(order_id = %id, error = %e, "InvestProperty failed, mint stays synced");
        }
    }

    /// Issue a deed for every certificate without a ledger receipt.
    #[instrument(skip(self))]
    pub async fn sync_certificates(&self, dry_run: bool) -> Result<SyncCounts> {
        let candidates = self.store.list_issued_certificates_missing_ledger_tx().await?;
        info!(candidates = candidates.len(), "Syncing certificates");

        let mut counts = SyncCounts::default();
        for certificate in &candidates {
            match self.sync_certificate(certificate, dry_run).await {
                Ok(()) => counts.record_synced(),
                Err(e) => {
                    error!(certificate = %certificate.code, error = %e, "Certificate sync failed");
                    counts.record_failed();
                }
            }
        }
        Ok(counts)
    }

    async fn sync_certificate(&self, certificate: &Certificate, dry_run: bool) -> Result<()> {
        let id = certificate.id.to_string();
        let contract = &self.contracts.deed_registry;
        let function = functions::ISSUE_DEED;

        let recorded = self
            .store
            .find_onchain_event(EntityKind::Certificate, &id, function)
            .await?;

        if dry_run {
            if recorded.is_none() {
                info!(certificate = %certificate.code, contract = %contract, function, "Dry run: would submit");
            }
            return Ok(());
        }

        let tx_id = match recorded {
            Some(event) => event.tx_id,
            None => {
                let hash = content_hash(&DeedContent::of(certificate))
                    .map_err(|e| EstateError::Internal(format!("deed hash: {}", e)))?;
                let args = vec![
                    certificate.code.clone(),
                    certificate.property_id.to_string(),
                    certificate.user_id.to_string(),
                    certificate.tokens.to_string(),
                    hash,
                ];

                let outcome = self
                    .client
                    .submit_idempotent(contract, function, args.clone())
                    .await
                    .map_err(|e| e.into_estate_error(function))?;

                if outcome.is_already_recorded() {
                    info!(certificate = %certificate.code, "Deed already on ledger, recording locally");
                }

                self.record_outcome(
                    outcome,
                    &certificate.code,
                    contract,
                    function,
                    EntityKind::Certificate,
                    &id,
                    &args,
                )
                .await?
            }
        };

        self.store.set_certificate_ledger_tx(certificate.id, &tx_id).await?;
        info!(certificate = %certificate.code, tx_id = %tx_id, "Deed issued on ledger");
        Ok(())
    }

    /// Append the audit event for a submission that reported a receipt and
    /// return the receipt to persist, or a recovery marker for `subject`.
    #[allow(clippy::too_many_arguments)]
    async fn record_outcome(
        &self,
        outcome: SubmitOutcome,
        subject: impl fmt::Display,
        contract: &str,
        function: &str,
        entity_kind: EntityKind,
        entity_id: &str,
        args: &[String],
    ) -> Result<LedgerTxId> {
        match outcome.tx_id() {
            Some(tx_id) => {
                let event = OnChainEvent::new(
                    tx_id.clone(),
                    contract,
                    function,
                    entity_kind,
                    entity_id,
                    json!({ "args": args }),
                );
                if !self.store.append_onchain_event(&event).await? {
                    debug!(tx_id = %tx_id, "Receipt already in audit log");
                }
            }
            None => {
                warn!(entity = %entity_kind, entity_id, function, "Ledger reported existing record without a receipt");
            }
        }
        Ok(outcome.into_tx_id_or_recovered(subject))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use propledger_chain::{MockLedgerClient, SubmittedCall};
    use propledger_common::{OrderStatus, PropertyStatus, User, UserId};
    use propledger_crypto::certificate_code;
    use propledger_store::{LedgerTransaction, MemoryLedgerStore};

    use super::*;

    fn enabled_config() -> ReconcilerConfig {
        ReconcilerConfig {
            ledger_enabled: true,
            ..ReconcilerConfig::default()
        }
    }

    fn engine(store: &MemoryLedgerStore, client: &Arc<MockLedgerClient>) -> ReconciliationEngine {
        ReconciliationEngine::new(Arc::new(store.clone()), client.clone(), &enabled_config()).unwrap()
    }

    async fn approved_property(store: &MemoryLedgerStore, title: &str) -> Property {
        let property = Property::new(title, "Porto", 100, Decimal::from(1000)).with_status(PropertyStatus::Approved);
        store.create_property(&property).await.unwrap();
        property
    }

    async fn issued_order(store: &MemoryLedgerStore, property: &Property, user: UserId, tokens: i64) -> (Order, Certificate) {
        let order = Order::new(user, property.id, tokens, property.token_price).unwrap();
        store.create_order(&order).await.unwrap();

        let certificate = Certificate::for_order(&order, certificate_code("CERT", Utc::now()));
        let mut tx = store.begin().await.unwrap();
        assert!(tx.decrement_remaining_tokens(property.id, tokens).await.unwrap());
        tx.upsert_holding(user, property.id, tokens).await.unwrap();
        tx.update_order_status(order.id, OrderStatus::Issued).await.unwrap();
        tx.create_certificate(&certificate).await.unwrap();
        tx.commit().await.unwrap();

        (order, certificate)
    }

    fn functions_called(calls: &[SubmittedCall]) -> Vec<&str> {
        calls.iter().map(|c| c.function.as_str()).collect()
    }

    #[tokio::test]
    async fn test_refuses_when_ledger_disabled() {
        let store = MemoryLedgerStore::new();
        let client: SharedLedgerClient = Arc::new(MockLedgerClient::new());

        let result = ReconciliationEngine::new(Arc::new(store), client, &ReconcilerConfig::default());
        assert!(matches!(result, Err(EstateError::LedgerDisabled)));
    }

    #[tokio::test]
    async fn test_property_sync_runs_three_steps() {
        let store = MemoryLedgerStore::new();
        let client = Arc::new(MockLedgerClient::new());
        let property = approved_property(&store, "Ribeira Flats").await;

        let counts = engine(&store, &client).sync_properties(false).await.unwrap();
        assert_eq!(counts, SyncCounts::new(1, 1, 0));

        let calls = client.calls();
        assert_eq!(
            functions_called(&calls),
            vec!["RegisterProperty", "ApproveProperty", "TokenizeProperty"]
        );
        assert_eq!(calls[0].contract, "PropertyRegistry");
        assert_eq!(
            calls[0].args,
            vec![property.id.to_string(), "Ribeira Flats".to_string(), "Porto".to_string(), "100".to_string()]
        );

        let events = store.list_onchain_events().await.unwrap();
        assert_eq!(events.len(), 3);

        let tokenize = store
            .find_onchain_event(EntityKind::Property, &property.id.to_string(), "TokenizeProperty")
            .await
            .unwrap()
            .unwrap();
        let stored = store.find_property_by_id(property.id).await.unwrap().unwrap();
        assert_eq!(stored.ledger_tx_id, Some(tokenize.tx_id));
    }

    #[tokio::test]
    async fn test_property_rerun_is_noop() {
        let store = MemoryLedgerStore::new();
        let client = Arc::new(MockLedgerClient::new());
        approved_property(&store, "Ribeira Flats").await;

        let engine = engine(&store, &client);
        engine.sync_properties(false).await.unwrap();
        let submitted = client.call_count();

        let counts = engine.sync_properties(false).await.unwrap();
        assert_eq!(counts, SyncCounts::new(0, 0, 0));
        assert_eq!(client.call_count(), submitted);
    }

    #[tokio::test]
    async fn test_property_dry_run_changes_nothing() {
        let store = MemoryLedgerStore::new();
        let client = Arc::new(MockLedgerClient::new());
        let property = approved_property(&store, "Ribeira Flats").await;

        let counts = engine(&store, &client).sync_properties(true).await.unwrap();
        assert_eq!(counts, SyncCounts::new(1, 1, 0));

        let stored = store.find_property_by_id(property.id).await.unwrap().unwrap();
        assert!(stored.ledger_tx_id.is_none());
        assert!(store.list_onchain_events().await.unwrap().is_empty());
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_property_sequence_resumes_after_failure() {
        let store = MemoryLedgerStore::new();
        let client = Arc::new(MockLedgerClient::new().with_duplicate_detection());
        let property = approved_property(&store, "Ribeira Flats").await;
        let engine = engine(&store, &client);

        client.fail_function("ApproveProperty", "endorsement timeout");
        let counts = engine.sync_properties(false).await.unwrap();
        assert_eq!(counts, SyncCounts::new(1, 0, 1));
        assert_eq!(store.list_onchain_events().await.unwrap().len(), 1);
        assert!(store
            .find_property_by_id(property.id)
            .await
            .unwrap()
            .unwrap()
            .ledger_tx_id
            .is_none());

        client.clear("ApproveProperty");
        let counts = engine.sync_properties(false).await.unwrap();
        assert_eq!(counts, SyncCounts::new(1, 1, 0));

        // Registration is not repeated on resume.
        assert_eq!(client.calls_for("RegisterProperty").len(), 1);
        assert_eq!(client.calls_for("ApproveProperty").len(), 2);
        assert_eq!(client.calls_for("TokenizeProperty").len(), 1);
        assert!(store
            .find_property_by_id(property.id)
            .await
            .unwrap()
            .unwrap()
            .ledger_tx_id
            .is_some());
    }

    #[tokio::test]
    async fn test_one_failing_property_does_not_stop_batch() {
        let store = MemoryLedgerStore::new();
        let client = Arc::new(MockLedgerClient::new());
        let broken = approved_property(&store, "Broken").await;
        let healthy = approved_property(&store, "Healthy").await;

        client.fail_for_arg("RegisterProperty", &broken.id.to_string(), "invalid location");
        let counts = engine(&store, &client).sync_properties(false).await.unwrap();
        assert_eq!(counts, SyncCounts::new(2, 1, 1));

        let healthy = store.find_property_by_id(healthy.id).await.unwrap().unwrap();
        assert!(healthy.ledger_tx_id.is_some());
        let broken = store.find_property_by_id(broken.id).await.unwrap().unwrap();
        assert!(broken.ledger_tx_id.is_none());
    }

    #[tokio::test]
    async fn test_tokenize_already_exists_without_receipt() {
        let store = MemoryLedgerStore::new();
        let client = Arc::new(MockLedgerClient::new());
        let property = approved_property(&store, "Ribeira Flats").await;

        client.already_exists("TokenizeProperty", None);
        let counts = engine(&store, &client).sync_properties(false).await.unwrap();
        assert_eq!(counts, SyncCounts::new(1, 1, 0));

        let stored = store.find_property_by_id(property.id).await.unwrap().unwrap();
        let tx_id = stored.ledger_tx_id.unwrap();
        assert!(tx_id.is_recovered());
        assert_eq!(tx_id, LedgerTxId::recovered(property.id));
    }

    #[tokio::test]
    async fn test_payment_sync_marks_order() {
        let store = MemoryLedgerStore::new();
        let client = Arc::new(MockLedgerClient::new());
        let property = approved_property(&store, "Ribeira Flats").await;
        let user = User::new(Some("investor@example.com".to_string()));
        store.create_user(&user).await.unwrap();
        let (order, certificate) = issued_order(&store, &property, user.id, 30).await;

        let counts = engine(&store, &client).sync_payments(false).await.unwrap();
        assert_eq!(counts, SyncCounts::new(1, 1, 0));

        let mint = &client.calls_for("MintTokens")[0];
        assert_eq!(mint.contract, "PropertyToken");
        assert_eq!(
            mint.args,
            vec![property.id.to_string(), user.id.to_string(), "30".to_string(), order.id.to_string()]
        );
        let invest = &client.calls_for("InvestProperty")[0];
        assert_eq!(invest.args[1], "investor@example.com");

        let journal = store.transactions_for_user(user.id).await.unwrap();
        let marker = journal.iter().find(|t| t.is_synced_mint_for(order.id)).unwrap();
        assert_eq!(marker.amount, Decimal::ZERO);
        let mint_tx = marker.ledger_tx_id.clone().unwrap();

        let stored_order = store.find_order_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored_order.ledger_tx_id.as_ref(), Some(&mint_tx));
        let stored_cert = store.find_certificate_by_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored_cert.id, certificate.id);
        assert_eq!(stored_cert.ledger_tx_id, Some(mint_tx));

        let counts = engine(&store, &client).sync_payments(false).await.unwrap();
        assert_eq!(counts, SyncCounts::new(0, 0, 0));
    }

    #[tokio::test]
    async fn test_marked_mint_finishes_unstamped_order() {
        let store = MemoryLedgerStore::new();
        let client = Arc::new(MockLedgerClient::new());
        let property = approved_property(&store, "Ribeira Flats").await;
        let (order, certificate) = issued_order(&store, &property, UserId::new(), 30).await;

        // Marker row present, receipts never copied onto the order or certificate.
        let marker = Transaction::new(order.user_id, TransactionType::TokenMint, Decimal::ZERO)
            .with_order(order.id)
            .with_ledger_tx(LedgerTxId::new("mint-tx-1"));
        store.append_transaction(&marker).await.unwrap();

        let options = RunOptions::only([SyncCategory::Payments, SyncCategory::Certificates]);
        let report = engine(&store, &client).run(&options).await.unwrap();

        assert_eq!(report.payments, Some(SyncCounts::new(1, 1, 0)));
        assert_eq!(report.certificates, Some(SyncCounts::new(0, 0, 0)));
        assert_eq!(client.call_count(), 0);

        let stored_order = store.find_order_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored_order.ledger_tx_id, Some(LedgerTxId::new("mint-tx-1")));
        let stored_cert = store.find_certificate_by_order(certificate.order_id).await.unwrap().unwrap();
        assert_eq!(stored_cert.ledger_tx_id, Some(LedgerTxId::new("mint-tx-1")));

        let report = engine(&store, &client).run(&options).await.unwrap();
        assert_eq!(report.total(), SyncCounts::new(0, 0, 0));
    }

    #[tokio::test]
    async fn test_marked_mint_dry_run_writes_nothing() {
        let store = MemoryLedgerStore::new();
        let client = Arc::new(MockLedgerClient::new());
        let property = approved_property(&store, "Ribeira Flats").await;
        let (order, _) = issued_order(&store, &property, UserId::new(), 30).await;

        let marker = Transaction::new(order.user_id, TransactionType::TokenMint, Decimal::ZERO)
            .with_order(order.id)
            .with_ledger_tx(LedgerTxId::new("mint-tx-1"));
        store.append_transaction(&marker).await.unwrap();

        let counts = engine(&store, &client).sync_payments(true).await.unwrap();
        assert_eq!(counts, SyncCounts::new(1, 1, 0));

        let stored_order = store.find_order_by_id(order.id).await.unwrap().unwrap();
        assert!(stored_order.ledger_tx_id.is_none());
        assert_eq!(store.list_minted_orders_missing_stamp().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recorded_mint_event_is_not_resubmitted() {
        let store = MemoryLedgerStore::new();
        let client = Arc::new(MockLedgerClient::new());
        let property = approved_property(&store, "Ribeira Flats").await;
        let (order, certificate) = issued_order(&store, &property, UserId::new(), 30).await;

        // Mint reached the ledger and the audit log, then the run stopped.
        let event = OnChainEvent::new(
            LedgerTxId::new("mint-tx-3"),
            "PropertyToken",
            "MintTokens",
            EntityKind::Order,
            order.id,
            json!({}),
        );
        store.append_onchain_event(&event).await.unwrap();

        let counts = engine(&store, &client).sync_payments(false).await.unwrap();
        assert_eq!(counts, SyncCounts::new(1, 1, 0));
        assert!(client.calls_for("MintTokens").is_empty());

        let journal = store.transactions_for_user(order.user_id).await.unwrap();
        let marker = journal.iter().find(|t| t.is_synced_mint_for(order.id)).unwrap();
        assert_eq!(marker.ledger_tx_id, Some(LedgerTxId::new("mint-tx-3")));

        let stored_cert = store.find_certificate_by_order(certificate.order_id).await.unwrap().unwrap();
        assert_eq!(stored_cert.ledger_tx_id, Some(LedgerTxId::new("mint-tx-3")));
    }

    #[tokio::test]
    async fn test_mint_already_exists_with_receipt() {
        let store = MemoryLedgerStore::new();
        let client = Arc::new(MockLedgerClient::new());
        let property = approved_property(&store, "Ribeira Flats").await;
        let (order, _) = issued_order(&store, &property, UserId::new(), 30).await;

        client.already_exists("MintTokens", Some("mint-tx-7"));
        let counts = engine(&store, &client).sync_payments(false).await.unwrap();
        assert_eq!(counts, SyncCounts::new(1, 1, 0));

        let journal = store.transactions_for_user(order.user_id).await.unwrap();
        let marker = journal.iter().find(|t| t.is_synced_mint_for(order.id)).unwrap();
        assert_eq!(marker.ledger_tx_id, Some(LedgerTxId::new("mint-tx-7")));

        let recorded = store
            .find_onchain_event(EntityKind::Order, &order.id.to_string(), "MintTokens")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(recorded.tx_id, LedgerTxId::new("mint-tx-7"));
    }

    #[tokio::test]
    async fn test_mint_already_exists_without_receipt() {
        let store = MemoryLedgerStore::new();
        let client = Arc::new(MockLedgerClient::new());
        let property = approved_property(&store, "Ribeira Flats").await;
        let (order, certificate) = issued_order(&store, &property, UserId::new(), 30).await;

        client.already_exists("MintTokens", None);
        let counts = engine(&store, &client).sync_payments(false).await.unwrap();
        assert_eq!(counts, SyncCounts::new(1, 1, 0));

        let recovered = LedgerTxId::recovered(order.id);
        let journal = store.transactions_for_user(order.user_id).await.unwrap();
        let marker = journal.iter().find(|t| t.is_synced_mint_for(order.id)).unwrap();
        assert_eq!(marker.ledger_tx_id.as_ref(), Some(&recovered));

        let stored_order = store.find_order_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored_order.ledger_tx_id.as_ref(), Some(&recovered));
        let stored_cert = store.find_certificate_by_order(certificate.order_id).await.unwrap().unwrap();
        assert_eq!(stored_cert.ledger_tx_id, Some(recovered));
        assert!(store
            .find_onchain_event(EntityKind::Order, &order.id.to_string(), "MintTokens")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_recorded_investor_is_not_resubmitted() {
        let store = MemoryLedgerStore::new();
        let client = Arc::new(MockLedgerClient::new());
        let property = approved_property(&store, "Ribeira Flats").await;
        let (order, _) = issued_order(&store, &property, UserId::new(), 30).await;

        for (tx_id, function) in [("mint-tx-4", "MintTokens"), ("invest-tx-4", "InvestProperty")] {
            let event = OnChainEvent::new(
                LedgerTxId::new(tx_id),
                "PropertyToken",
                function,
                EntityKind::Order,
                order.id,
                json!({}),
            );
            store.append_onchain_event(&event).await.unwrap();
        }

        let counts = engine(&store, &client).sync_payments(false).await.unwrap();
        assert_eq!(counts, SyncCounts::new(1, 1, 0));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_invest_failure_does_not_fail_order() {
        let store = MemoryLedgerStore::new();
        let client = Arc::new(MockLedgerClient::new());
        let property = approved_property(&store, "Ribeira Flats").await;
        let (order, _) = issued_order(&store, &property, UserId::new(), 5).await;

        client.fail_function("InvestProperty", "investor not whitelisted");
        let counts = engine(&store, &client).sync_payments(false).await.unwrap();
        assert_eq!(counts, SyncCounts::new(1, 1, 0));

        // Without a user record the investor falls back to the user id.
        let invest = &client.calls_for("InvestProperty")[0];
        assert_eq!(invest.args[1], order.user_id.to_string());
        assert!(store.list_issued_orders_missing_ledger_tx().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mint_failure_leaves_order_unsynced() {
        let store = MemoryLedgerStore::new();
        let client = Arc::new(MockLedgerClient::new());
        let property = approved_property(&store, "Ribeira Flats").await;
        let (order, _) = issued_order(&store, &property, UserId::new(), 5).await;

        client.fail_function("MintTokens", "contract paused");
        let counts = engine(&store, &client).sync_payments(false).await.unwrap();
        assert_eq!(counts, SyncCounts::new(1, 0, 1));

        assert!(client.calls_for("InvestProperty").is_empty());
        assert!(store.transactions_for_user(order.user_id).await.unwrap().is_empty());
        assert_eq!(store.list_issued_orders_missing_ledger_tx().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pending_orders_are_not_synced() {
        let store = MemoryLedgerStore::new();
        let client = Arc::new(MockLedgerClient::new());
        let property = approved_property(&store, "Ribeira Flats").await;
        let pending = Order::new(UserId::new(), property.id, 3, property.token_price).unwrap();
        store.create_order(&pending).await.unwrap();

        let counts = engine(&store, &client).sync_payments(false).await.unwrap();
        assert_eq!(counts, SyncCounts::new(0, 0, 0));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_certificate_sync_submits_deed_hash() {
        let store = MemoryLedgerStore::new();
        let client = Arc::new(MockLedgerClient::new());
        let property = approved_property(&store, "Ribeira Flats").await;
        let (_, certificate) = issued_order(&store, &property, UserId::new(), 10).await;

        let counts = engine(&store, &client).sync_certificates(false).await.unwrap();
        assert_eq!(counts, SyncCounts::new(1, 1, 0));

        let deed = &client.calls_for("IssueDeed")[0];
        assert_eq!(deed.contract, "DeedRegistry");
        assert_eq!(deed.args[0], certificate.code);
        assert_eq!(deed.args[4].len(), 64);

        let stored = store.find_certificate_by_order(certificate.order_id).await.unwrap().unwrap();
        assert!(stored.ledger_tx_id.is_some());
        assert!(store.list_issued_certificates_missing_ledger_tx().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deed_already_exists_counts_as_synced() {
        let store = MemoryLedgerStore::new();
        let client = Arc::new(MockLedgerClient::new());
        let property = approved_property(&store, "Ribeira Flats").await;
        let (_, certificate) = issued_order(&store, &property, UserId::new(), 10).await;

        client.already_exists("IssueDeed", None);
        let counts = engine(&store, &client).sync_certificates(false).await.unwrap();
        assert_eq!(counts, SyncCounts::new(1, 1, 0));

        let stored = store.find_certificate_by_order(certificate.order_id).await.unwrap().unwrap();
        assert_eq!(stored.ledger_tx_id, Some(LedgerTxId::recovered(&certificate.code)));
        assert!(store.list_onchain_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deed_rejection_is_counted() {
        let store = MemoryLedgerStore::new();
        let client = Arc::new(MockLedgerClient::new());
        let property = approved_property(&store, "Ribeira Flats").await;
        let (_, rejected) = issued_order(&store, &property, UserId::new(), 10).await;
        issued_order(&store, &property, UserId::new(), 10).await;

        client.fail_for_arg("IssueDeed", &rejected.code, "owner mismatch");
        let counts = engine(&store, &client).sync_certificates(false).await.unwrap();
        assert_eq!(counts, SyncCounts::new(2, 1, 1));

        let remaining = store.list_issued_certificates_missing_ledger_tx().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, rejected.id);
    }

    #[tokio::test]
    async fn test_full_run_does_not_reissue_stamped_certificates() {
        let store = MemoryLedgerStore::new();
        let client = Arc::new(MockLedgerClient::new());
        let property = approved_property(&store, "Ribeira Flats").await;
        issued_order(&store, &property, UserId::new(), 10).await;

        let report = engine(&store, &client).run(&RunOptions::default()).await.unwrap();

        assert_eq!(report.properties, Some(SyncCounts::new(1, 1, 0)));
        assert_eq!(report.payments, Some(SyncCounts::new(1, 1, 0)));
        assert_eq!(report.certificates, Some(SyncCounts::new(0, 0, 0)));
        assert!(!report.has_failures());
        assert!(client.calls_for("IssueDeed").is_empty());
    }

    #[tokio::test]
    async fn test_filtered_dry_run() {
        let store = MemoryLedgerStore::new();
        let client = Arc::new(MockLedgerClient::new());
        let property = approved_property(&store, "Ribeira Flats").await;
        issued_order(&store, &property, UserId::new(), 10).await;

        let options = RunOptions::only([SyncCategory::Payments, SyncCategory::Certificates]).dry_run();
        let report = engine(&store, &client).run(&options).await.unwrap();

        assert!(report.dry_run);
        assert_eq!(report.properties, None);
        assert_eq!(report.payments, Some(SyncCounts::new(1, 1, 0)));
        assert_eq!(report.certificates, Some(SyncCounts::new(1, 1, 0)));
        assert_eq!(client.call_count(), 0);
        assert!(store.list_onchain_events().await.unwrap().is_empty());
        assert_eq!(store.list_issued_orders_missing_ledger_tx().await.unwrap().len(), 1);
    }
}
