//! PropLedger Distributed Ledger Client
//!
//! Thin submission interface to the permissioned ledger gateway:
//! `submit(contract, function, args) -> txId`. Failures are typed so the
//! reconciler can tell transport problems from business rejections, and
//! the "already exists" rejection class from both.

pub mod client;
pub mod contracts;
pub mod error;
pub mod gateway;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use client::{LedgerClient, SharedLedgerClient, SubmitOutcome, TxReceipt};
pub use contracts::{functions, ContractNames};
pub use error::{ChainError, ChainResult};
pub use gateway::{GatewayConfig, GatewayLedgerClient};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockLedgerClient, SubmittedCall};
