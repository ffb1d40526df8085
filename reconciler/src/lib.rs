//! PropLedger Reconciliation Engine
//!
//! Batch process that mirrors settled off-chain records onto the
//! distributed ledger. Each run recomputes its candidate set from the
//! Ledger Store, so re-invoking it is the retry mechanism. The OnChainEvent
//! log lets an interrupted multi-step submission resume where it stopped.

pub mod config;
pub mod engine;
pub mod report;

pub use config::ReconcilerConfig;
pub use engine::ReconciliationEngine;
pub use report::{RunOptions, RunReport, SyncCategory, SyncCounts};
