//! PropLedger Ledger Store
//!
//! Relational persistence for properties, orders, holdings, certificates,
//! wallets, the movement journal and the on-chain audit log. Settlement
//! operations run inside a [`LedgerTransaction`] so that every multi-record
//! mutation commits together or not at all.

pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;
pub use store::{LedgerStore, LedgerTransaction, SharedLedgerStore};
