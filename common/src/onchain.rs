//! Audit mirror of successful distributed-ledger submissions.

use crate::{EntityKind, LedgerTxId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One successful ledger submission. Unique on `tx_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnChainEvent {
    pub id: Uuid,
    pub tx_id: LedgerTxId,
    pub contract: String,
    pub function: String,
    /// Kind of the Ledger Store record the submission mirrors.
    pub entity_kind: EntityKind,
    pub entity_id: String,
    /// Arguments as submitted.
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl OnChainEvent {
    pub fn new(
        tx_id: LedgerTxId,
        contract: impl Into<String>,
        function: impl Into<String>,
        entity_kind: EntityKind,
        entity_id: impl ToString,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx_id,
            contract: contract.into(),
            function: function.into(),
            entity_kind,
            entity_id: entity_id.to_string(),
            payload,
            created_at: Utc::now(),
        }
    }

    /// Whether this event records `function` for the given entity.
    pub fn records(&self, entity_kind: EntityKind, entity_id: &str, function: &str) -> bool {
        self.entity_kind == entity_kind && self.entity_id == entity_id && self.function == function
    }
}
