//! Settlement counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Settlement Engine counters.
pub struct SettlementMetrics {
    /// Orders accepted by create_order.
    pub orders_created: AtomicU64,
    /// Orders moved to ISSUED.
    pub orders_issued: AtomicU64,
    /// Tokens transferred to holdings, by settlement or mint.
    pub tokens_issued: AtomicU64,
    /// Requests refused for lack of supply.
    pub supply_rejections: AtomicU64,
    /// Withdrawals refused for lack of funds.
    pub funds_rejections: AtomicU64,
    /// Administrative mints.
    pub mints: AtomicU64,
    pub deposits: AtomicU64,
    pub withdrawals: AtomicU64,
}

impl SettlementMetrics {
    pub fn new() -> Self {
        Self {
            orders_created: AtomicU64::new(0),
            orders_issued: AtomicU64::new(0),
            tokens_issued: AtomicU64::new(0),
            supply_rejections: AtomicU64::new(0),
            funds_rejections: AtomicU64::new(0),
            mints: AtomicU64::new(0),
            deposits: AtomicU64::new(0),
            withdrawals: AtomicU64::new(0),
        }
    }

    pub fn order_created(&self) {
        self.orders_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn order_issued(&self, tokens: i64) {
        self.orders_issued.fetch_add(1, Ordering::Relaxed);
        self.add_tokens(tokens);
    }

    pub fn minted(&self, tokens: i64) {
        self.mints.fetch_add(1, Ordering::Relaxed);
        self.add_tokens(tokens);
    }

    pub fn supply_rejected(&self) {
        self.supply_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn funds_rejected(&self) {
        self.funds_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn deposited(&self) {
        self.deposits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn withdrew(&self) {
        self.withdrawals.fetch_add(1, Ordering::Relaxed);
    }

    fn add_tokens(&self, tokens: i64) {
        self.tokens_issued
            .fetch_add(u64::try_from(tokens).unwrap_or(0), Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> SettlementMetricsSnapshot {
        SettlementMetricsSnapshot {
            orders_created: self.orders_created.load(Ordering::Relaxed),
            orders_issued: self.orders_issued.load(Ordering::Relaxed),
            tokens_issued: self.tokens_issued.load(Ordering::Relaxed),
            supply_rejections: self.supply_rejections.load(Ordering::Relaxed),
            funds_rejections: self.funds_rejections.load(Ordering::Relaxed),
            mints: self.mints.load(Ordering::Relaxed),
            deposits: self.deposits.load(Ordering::Relaxed),
            withdrawals: self.withdrawals.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let counters = [
            ("orders_created", "Orders created", snapshot.orders_created),
            ("orders_issued", "Orders settled to ISSUED", snapshot.orders_issued),
            ("tokens_issued", "Tokens moved into holdings", snapshot.tokens_issued),
            ("supply_rejections", "Requests refused for insufficient supply", snapshot.supply_rejections),
            ("funds_rejections", "Withdrawals refused for insufficient funds", snapshot.funds_rejections),
            ("mints", "Administrative token mints", snapshot.mints),
            ("deposits", "Wallet deposits", snapshot.deposits),
            ("withdrawals", "Wallet withdrawals", snapshot.withdrawals),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP propledger_settlement_{name} {help}\n\
                 # TYPE propledger_settlement_{name} counter\n\
                 propledger_settlement_{name} {value}\n\n"
            ));
        }
        out
    }
}

impl Default for SettlementMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementMetricsSnapshot {
    pub orders_created: u64,
    pub orders_issued: u64,
    pub tokens_issued: u64,
    pub supply_rejections: u64,
    pub funds_rejections: u64,
    pub mints: u64,
    pub deposits: u64,
    pub withdrawals: u64,
}

/// Shared metrics instance.
pub type SharedSettlementMetrics = Arc<SettlementMetrics>;
