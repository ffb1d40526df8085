//! PropLedger Settlement Engine
//!
//! Owns every invariant over token supply and cash balance. Each operation
//! that touches more than one record runs inside a single Ledger Store
//! transaction and either commits all of its effects or none.

pub mod config;
pub mod engine;
pub mod metrics;

pub use config::SettlementConfig;
pub use engine::{MintReceipt, OrderSettlement, SettlementEngine, SupplySnapshot, WalletReceipt};
pub use metrics::{SettlementMetrics, SettlementMetricsSnapshot, SharedSettlementMetrics};
