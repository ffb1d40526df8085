//! Ledger client trait and submission outcomes.

use std::sync::Arc;

use async_trait::async_trait;
use propledger_common::LedgerTxId;
use serde::{Deserialize, Serialize};

use crate::error::{ChainError, ChainResult};

/// Receipt for one accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_id: LedgerTxId,
    pub contract: String,
    pub function: String,
}

/// Shared client handle.
pub type SharedLedgerClient = Arc<dyn LedgerClient>;

/// Submission interface to the distributed ledger.
///
/// Submissions are not idempotent on the ledger side: resubmitting a call
/// that already succeeded is rejected with [`ChainError::AlreadyExists`].
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit one contract call and wait for its receipt.
    async fn submit(&self, contract: &str, function: &str, args: Vec<String>) -> ChainResult<TxReceipt>;

    /// Submit, folding the "already exists" rejection into a success outcome.
    async fn submit_idempotent(
        &self,
        contract: &str,
        function: &str,
        args: Vec<String>,
    ) -> ChainResult<SubmitOutcome> {
        SubmitOutcome::from_result(self.submit(contract, function, args).await)
    }
}

/// Successful result of an idempotent submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The ledger accepted the call now.
    Submitted(LedgerTxId),
    /// A prior submission already recorded this call.
    AlreadyRecorded(Option<LedgerTxId>),
}

impl SubmitOutcome {
    pub fn from_result(result: ChainResult<TxReceipt>) -> ChainResult<Self> {
        match result {
            Ok(receipt) => Ok(SubmitOutcome::Submitted(receipt.tx_id)),
            Err(ChainError::AlreadyExists { tx_id, .. }) => {
                Ok(SubmitOutcome::AlreadyRecorded(tx_id.map(LedgerTxId::new)))
            }
            Err(e) => Err(e),
        }
    }

    pub fn tx_id(&self) -> Option<&LedgerTxId> {
        match self {
            SubmitOutcome::Submitted(tx_id) => Some(tx_id),
            SubmitOutcome::AlreadyRecorded(tx_id) => tx_id.as_ref(),
        }
    }

    pub fn is_already_recorded(&self) -> bool {
        matches!(self, SubmitOutcome::AlreadyRecorded(_))
    }

    /// Receipt to persist locally; falls back to a recovery marker for `subject`.
    pub fn into_tx_id_or_recovered(self, subject: impl std::fmt::Display) -> LedgerTxId {
        match self {
            SubmitOutcome::Submitted(tx_id) | SubmitOutcome::AlreadyRecorded(Some(tx_id)) => tx_id,
            SubmitOutcome::AlreadyRecorded(None) => LedgerTxId::recovered(subject),
        }
    }
}
