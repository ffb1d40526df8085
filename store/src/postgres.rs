//! PostgreSQL Ledger Store.
//!
//! Supply and balance guards are conditional `UPDATE`s, so a concurrent
//! settlement can never drive `remaining_tokens` or `cash_balance` below
//! zero regardless of isolation level. Orders and wallets are additionally
//! row-locked (`FOR UPDATE`) for the lifetime of a settlement transaction.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres};
use tracing::{debug, info};
use uuid::Uuid;

use propledger_common::{
    Certificate, CertificateId, EntityKind, EstateError, Holding, LedgerTxId, OnChainEvent, Order,
    OrderId, OrderStatus, Property, PropertyId, Result, Transaction, TransactionId, User, UserId,
    Wallet,
};

use crate::store::{LedgerStore, LedgerTransaction};

fn db_err(err: sqlx::Error) -> EstateError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return EstateError::Conflict(db.message().to_string());
        }
        // numeric_value_out_of_range
        if db.code().as_deref() == Some("22003") {
            return EstateError::invalid_input("amount", db.message());
        }
    }
    EstateError::Database(err.to_string())
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    email: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id.into(),
            email: row.email,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct PropertyRow {
    id: Uuid,
    title: String,
    location: String,
    total_tokens: i64,
    remaining_tokens: i64,
    token_price: Decimal,
    status: String,
    ledger_tx_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PropertyRow> for Property {
    type Error = EstateError;

    fn try_from(row: PropertyRow) -> Result<Self> {
        Ok(Property {
            id: row.id.into(),
            title: row.title,
            location: row.location,
            total_tokens: row.total_tokens,
            remaining_tokens: row.remaining_tokens,
            token_price: row.token_price,
            status: row.status.parse()?,
            ledger_tx_id: row.ledger_tx_id.map(LedgerTxId::new),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    property_id: Uuid,
    tokens: i64,
    amount: Decimal,
    status: String,
    transaction_hash: Option<String>,
    ledger_tx_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct MintedOrderRow {
    #[sqlx(flatten)]
    order: OrderRow,
    mint_tx_id: String,
}

impl TryFrom<OrderRow> for Order {
    type Error = EstateError;

    fn try_from(row: OrderRow) -> Result<Self> {
        Ok(Order {
            id: row.id.into(),
            user_id: row.user_id.into(),
            property_id: row.property_id.into(),
            tokens: row.tokens,
            amount: row.amount,
            status: row.status.parse()?,
            transaction_hash: row.transaction_hash,
            ledger_tx_id: row.ledger_tx_id.map(LedgerTxId::new),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct HoldingRow {
    user_id: Uuid,
    property_id: Uuid,
    tokens: i64,
    updated_at: DateTime<Utc>,
}

impl From<HoldingRow> for Holding {
    fn from(row: HoldingRow) -> Self {
        Holding {
            user_id: row.user_id.into(),
            property_id: row.property_id.into(),
            tokens: row.tokens,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct CertificateRow {
    id: Uuid,
    order_id: Uuid,
    user_id: Uuid,
    property_id: Uuid,
    tokens: i64,
    code: String,
    ledger_tx_id: Option<String>,
    issued_at: DateTime<Utc>,
}

impl From<CertificateRow> for Certificate {
    fn from(row: CertificateRow) -> Self {
        Certificate {
            id: row.id.into(),
            order_id: row.order_id.into(),
            user_id: row.user_id.into(),
            property_id: row.property_id.into(),
            tokens: row.tokens,
            code: row.code,
            ledger_tx_id: row.ledger_tx_id.map(LedgerTxId::new),
            issued_at: row.issued_at,
        }
    }
}

#[derive(FromRow)]
struct WalletRow {
    user_id: Uuid,
    cash_balance: Decimal,
    updated_at: DateTime<Utc>,
}

impl From<WalletRow> for Wallet {
    fn from(row: WalletRow) -> Self {
        Wallet {
            user_id: row.user_id.into(),
            cash_balance: row.cash_balance,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct TransactionRow {
    id: Uuid,
    user_id: Uuid,
    tx_type: String,
    amount: Decimal,
    reference: String,
    order_id: Option<Uuid>,
    ledger_tx_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = EstateError;

    fn try_from(row: TransactionRow) -> Result<Self> {
        Ok(Transaction {
            id: TransactionId::from_uuid(row.id),
            user_id: row.user_id.into(),
            tx_type: row.tx_type.parse()?,
            amount: row.amount,
            reference: row.reference,
            order_id: row.order_id.map(OrderId::from_uuid),
            ledger_tx_id: row.ledger_tx_id.map(LedgerTxId::new),
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct OnChainEventRow {
    id: Uuid,
    tx_id: String,
    contract: String,
    function: String,
    entity_kind: String,
    entity_id: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<OnChainEventRow> for OnChainEvent {
    type Error = EstateError;

    fn try_from(row: OnChainEventRow) -> Result<Self> {
        Ok(OnChainEvent {
            id: row.id,
            tx_id: LedgerTxId::new(row.tx_id),
            contract: row.contract,
            function: row.function,
            entity_kind: row.entity_kind.parse()?,
            entity_id: row.entity_id,
            payload: row.payload,
            created_at: row.created_at,
        })
    }
}

fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = EstateError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Ledger Store backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(db_err)?;

        info!(max_connections, "Connected to ledger store");
        Ok(Self { pool })
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| EstateError::Database(format!("migration failed: {}", e)))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(PgLedgerTransaction { tx }))
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        sqlx::query("INSERT INTO users (id, email, created_at) VALUES ($1, $2, $3)")
            .bind(*user.id.as_uuid())
            .bind(&user.email)
            .bind(user.created_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn create_property(&self, property: &Property) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO properties (
                id, title, location, total_tokens, remaining_tokens, token_price,
                status, ledger_tx_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(*property.id.as_uuid())
        .bind(&property.title)
        .bind(&property.location)
        .bind(property.total_tokens)
        .bind(property.remaining_tokens)
        .bind(property.token_price)
        .bind(property.status.as_str())
        .bind(property.ledger_tx_id.as_ref().map(LedgerTxId::as_str))
        .bind(property.created_at)
        .bind(property.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn create_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, user_id, property_id, tokens, amount, status,
                transaction_hash, ledger_tx_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(*order.id.as_uuid())
        .bind(*order.user_id.as_uuid())
        .bind(*order.property_id.as_uuid())
        .bind(order.tokens)
        .bind(order.amount)
        .bind(order.status.as_str())
        .bind(&order.transaction_hash)
        .bind(order.ledger_tx_id.as_ref().map(LedgerTxId::as_str))
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_property_by_id(&self, id: PropertyId) -> Result<Option<Property>> {
        sqlx::query_as::<_, PropertyRow>(
            r#"
            SELECT id, title, location, total_tokens, remaining_tokens, token_price,
                   status, ledger_tx_id, created_at, updated_at
            FROM properties
            WHERE id = $1
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(Property::try_from)
        .transpose()
    }

    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, created_at FROM users WHERE id = $1",
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(User::from))
    }

    async fn find_order_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT id, user_id, property_id, tokens, amount, status,
                   transaction_hash, ledger_tx_id, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(Order::try_from)
        .transpose()
    }

    async fn find_wallet(&self, user_id: UserId) -> Result<Option<Wallet>> {
        let row = sqlx::query_as::<_, WalletRow>(
            "SELECT user_id, cash_balance, updated_at FROM wallets WHERE user_id = $1",
        )
        .bind(*user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(Wallet::from))
    }

    async fn find_holding(&self, user_id: UserId, property_id: PropertyId) -> Result<Option<Holding>> {
        let row = sqlx::query_as::<_, HoldingRow>(
            r#"
            SELECT user_id, property_id, tokens, updated_at
            FROM holdings
            WHERE user_id = $1 AND property_id = $2
            "#,
        )
        .bind(*user_id.as_uuid())
        .bind(*property_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(Holding::from))
    }

    async fn holdings_for_property(&self, property_id: PropertyId) -> Result<Vec<Holding>> {
        let rows = sqlx::query_as::<_, HoldingRow>(
            r#"
            SELECT user_id, property_id, tokens, updated_at
            FROM holdings
            WHERE property_id = $1
            ORDER BY user_id
            "#,
        )
        .bind(*property_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(Holding::from).collect())
    }

    async fn find_certificate_by_order(&self, order_id: OrderId) -> Result<Option<Certificate>> {
        let row = sqlx::query_as::<_, CertificateRow>(
            r#"
            SELECT id, order_id, user_id, property_id, tokens, code, ledger_tx_id, issued_at
            FROM certificates
            WHERE order_id = $1
            "#,
        )
        .bind(*order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(Certificate::from))
    }

    async fn transactions_for_user(&self, user_id: UserId) -> Result<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, user_id, type AS tx_type, amount, reference, order_id,
                   ledger_tx_id, created_at
            FROM transactions
            WHERE user_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(*user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        collect(rows)
    }

    async fn append_transaction(&self, transaction: &Transaction) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        insert_transaction(&mut *conn, transaction).await
    }

    async fn list_approved_untokenized_properties(&self) -> Result<Vec<Property>> {
        let rows = sqlx::query_as::<_, PropertyRow>(
            r#"
            SELECT id, title, location, total_tokens, remaining_tokens, token_price,
                   status, ledger_tx_id, created_at, updated_at
            FROM properties
            WHERE status = 'APPROVED' AND ledger_tx_id IS NULL
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        collect(rows)
    }

    async fn list_issued_orders_missing_ledger_tx(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT o.id, o.user_id, o.property_id, o.tokens, o.amount, o.status,
                   o.transaction_hash, o.ledger_tx_id, o.created_at, o.updated_at
            FROM orders o
            WHERE o.status = 'ISSUED'
              AND NOT EXISTS (
                  SELECT 1 FROM transactions t
                  WHERE t.order_id = o.id
                    AND t.type = 'TOKEN_MINT'
                    AND t.ledger_tx_id IS NOT NULL
              )
            ORDER BY o.created_at, o.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        collect(rows)
    }

    async fn list_minted_orders_missing_stamp(&self) -> Result<Vec<(Order, LedgerTxId)>> {
        let rows = sqlx::query_as::<_, MintedOrderRow>(
            r#"
            SELECT DISTINCT ON (o.created_at, o.id)
                   o.id, o.user_id, o.property_id, o.tokens, o.amount, o.status,
                   o.transaction_hash, o.ledger_tx_id, o.created_at, o.updated_at,
                   t.ledger_tx_id AS mint_tx_id
            FROM orders o
            JOIN transactions t
              ON t.order_id = o.id
             AND t.type = 'TOKEN_MINT'
             AND t.ledger_tx_id IS NOT NULL
            WHERE o.status = 'ISSUED'
              AND (
                  o.ledger_tx_id IS NULL
                  OR EXISTS (
                      SELECT 1 FROM certificates c
                      WHERE c.order_id = o.id AND c.ledger_tx_id IS NULL
                  )
              )
            ORDER BY o.created_at, o.id, t.created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|row| Ok((Order::try_from(row.order)?, LedgerTxId::new(row.mint_tx_id))))
            .collect()
    }

    async fn list_issued_certificates_missing_ledger_tx(&self) -> Result<Vec<Certificate>> {
        let rows = sqlx::query_as::<_, CertificateRow>(
            r#"
            SELECT id, order_id, user_id, property_id, tokens, code, ledger_tx_id, issued_at
            FROM certificates
            WHERE ledger_tx_id IS NULL
            ORDER BY issued_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(Certificate::from).collect())
    }

    async fn append_onchain_event(&self, event: &OnChainEvent) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO onchain_events (
                id, tx_id, contract, function, entity_kind, entity_id, payload, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (tx_id) DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(event.tx_id.as_str())
        .bind(&event.contract)
        .bind(&event.function)
        .bind(event.entity_kind.as_str())
        .bind(&event.entity_id)
        .bind(&event.payload)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            debug!(tx_id = %event.tx_id, "On-chain event already recorded");
            return Ok(false);
        }
        Ok(true)
    }

    async fn find_onchain_event(
        &self,
        entity_kind: EntityKind,
        entity_id: &str,
        function: &str,
    ) -> Result<Option<OnChainEvent>> {
        sqlx::query_as::<_, OnChainEventRow>(
            r#"
            SELECT id, tx_id, contract, function, entity_kind, entity_id, payload, created_at
            FROM onchain_events
            WHERE entity_kind = $1 AND entity_id = $2 AND function = $3
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(entity_kind.as_str())
        .bind(entity_id)
        .bind(function)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(OnChainEvent::try_from)
        .transpose()
    }

    async fn list_onchain_events(&self) -> Result<Vec<OnChainEvent>> {
        let rows = sqlx::query_as::<_, OnChainEventRow>(
            r#"
            SELECT id, tx_id, contract, function, entity_kind, entity_id, payload, created_at
            FROM onchain_events
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        collect(rows)
    }

    async fn set_property_ledger_tx(&self, id: PropertyId, tx_id: &LedgerTxId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE properties SET ledger_tx_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(*id.as_uuid())
        .bind(tx_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(EstateError::not_found(EntityKind::Property, id));
        }
        Ok(())
    }

    async fn set_order_ledger_tx(&self, id: OrderId, tx_id: &LedgerTxId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE orders SET ledger_tx_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(*id.as_uuid())
        .bind(tx_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(EstateError::not_found(EntityKind::Order, id));
        }
        Ok(())
    }

    async fn set_certificate_ledger_tx(&self, id: CertificateId, tx_id: &LedgerTxId) -> Result<()> {
        let result = sqlx::query("UPDATE certificates SET ledger_tx_id = $2 WHERE id = $1")
            .bind(*id.as_uuid())
            .bind(tx_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(EstateError::not_found(EntityKind::Certificate, id));
        }
        Ok(())
    }

    async fn set_certificates_ledger_tx_for_order(
        &self,
        order_id: OrderId,
        tx_id: &LedgerTxId,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE certificates SET ledger_tx_id = $2 WHERE order_id = $1 AND ledger_tx_id IS NULL",
        )
        .bind(*order_id.as_uuid())
        .bind(tx_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}

async fn insert_transaction(
    conn: &mut sqlx::PgConnection,
    transaction: &Transaction,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO transactions (
            id, user_id, type, amount, reference, order_id, ledger_tx_id, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(*transaction.id.as_uuid())
    .bind(*transaction.user_id.as_uuid())
    .bind(transaction.tx_type.as_str())
    .bind(transaction.amount)
    .bind(&transaction.reference)
    .bind(transaction.order_id.map(|id| *id.as_uuid()))
    .bind(transaction.ledger_tx_id.as_ref().map(LedgerTxId::as_str))
    .bind(transaction.created_at)
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Open unit of work on a [`PgLedgerStore`].
struct PgLedgerTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PgLedgerTransaction {
    async fn find_property_by_id(&mut self, id: PropertyId) -> Result<Option<Property>> {
        sqlx::query_as::<_, PropertyRow>(
            r#"
            SELECT id, title, location, total_tokens, remaining_tokens, token_price,
                   status, ledger_tx_id, created_at, updated_at
            FROM properties
            WHERE id = $1
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?
        .map(Property::try_from)
        .transpose()
    }

    async fn find_order_for_update(&mut self, id: OrderId) -> Result<Option<Order>> {
        sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT id, user_id, property_id, tokens, amount, status,
                   transaction_hash, ledger_tx_id, created_at, updated_at
            FROM orders
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?
        .map(Order::try_from)
        .transpose()
    }

    async fn decrement_remaining_tokens(&mut self, id: PropertyId, tokens: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE properties
            SET remaining_tokens = remaining_tokens - $2, updated_at = NOW()
            WHERE id = $1 AND remaining_tokens >= $2
            "#,
        )
        .bind(*id.as_uuid())
        .bind(tokens)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn upsert_holding(
        &mut self,
        user_id: UserId,
        property_id: PropertyId,
        tokens: i64,
    ) -> Result<Holding> {
        let row = sqlx::query_as::<_, HoldingRow>(
            r#"
            INSERT INTO holdings (user_id, property_id, tokens, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id, property_id)
            DO UPDATE SET tokens = holdings.tokens + EXCLUDED.tokens, updated_at = NOW()
            RETURNING user_id, property_id, tokens, updated_at
            "#,
        )
        .bind(*user_id.as_uuid())
        .bind(*property_id.as_uuid())
        .bind(tokens)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(row.into())
    }

    async fn update_order_status(&mut self, id: OrderId, status: OrderStatus) -> Result<()> {
        let result = sqlx::query("UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(*id.as_uuid())
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(EstateError::not_found(EntityKind::Order, id));
        }
        Ok(())
    }

    async fn create_certificate(&mut self, certificate: &Certificate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO certificates (
                id, order_id, user_id, property_id, tokens, code, ledger_tx_id, issued_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(*certificate.id.as_uuid())
        .bind(*certificate.order_id.as_uuid())
        .bind(*certificate.user_id.as_uuid())
        .bind(*certificate.property_id.as_uuid())
        .bind(certificate.tokens)
        .bind(&certificate.code)
        .bind(certificate.ledger_tx_id.as_ref().map(LedgerTxId::as_str))
        .bind(certificate.issued_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn upsert_wallet(&mut self, user_id: UserId) -> Result<Wallet> {
        sqlx::query(
            r#"
            INSERT INTO wallets (user_id, cash_balance, updated_at)
            VALUES ($1, 0, NOW())
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(*user_id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        let row = sqlx::query_as::<_, WalletRow>(
            "SELECT user_id, cash_balance, updated_at FROM wallets WHERE user_id = $1 FOR UPDATE",
        )
        .bind(*user_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(row.into())
    }

    async fn update_wallet_balance(&mut self, user_id: UserId, delta: Decimal) -> Result<Option<Wallet>> {
        let row = sqlx::query_as::<_, WalletRow>(
            r#"
            UPDATE wallets
            SET cash_balance = cash_balance + $2, updated_at = NOW()
            WHERE user_id = $1 AND cash_balance + $2 >= 0
            RETURNING user_id, cash_balance, updated_at
            "#,
        )
        .bind(*user_id.as_uuid())
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(row.map(Wallet::from))
    }

    async fn append_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        insert_transaction(&mut *self.tx, transaction).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.tx.commit().await.map_err(db_err)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.tx.rollback().await.map_err(db_err)
    }
}
