//! PropLedger Common Types
//!
//! Shared types for the settlement ledger and the reconciliation engine:
//! identifiers, the entities persisted in the Ledger Store, order and
//! property status state machines, and the error taxonomy.

pub mod identifiers;
pub mod property;
pub mod order;
pub mod account;
pub mod onchain;
pub mod error;

pub use identifiers::*;
pub use property::*;
pub use order::*;
pub use account::*;
pub use onchain::*;
pub use error::*;
