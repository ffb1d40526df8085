//! Scripted in-process ledger for tests.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use propledger_common::LedgerTxId;

use crate::client::{LedgerClient, TxReceipt};
use crate::error::{ChainError, ChainResult};

/// One call received by [`MockLedgerClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedCall {
    pub contract: String,
    pub function: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
enum Scripted {
    Reject(String),
    AlreadyExists(Option<String>),
}

#[derive(Debug, Clone)]
struct Rule {
    /// Only calls carrying this argument match; `None` matches every call.
    arg: Option<String>,
    response: Scripted,
}

/// Mock ledger client.
///
/// Accepts every call by default and hands out sequential txIds. Responses
/// can be scripted per function, optionally narrowed to calls carrying a
/// given argument. With duplicate detection on, resubmitting a
/// `(function, first arg)` pair that was already accepted is rejected as
/// "already exists", like the real contracts do.
pub struct MockLedgerClient {
    calls: Mutex<Vec<SubmittedCall>>,
    rules: DashMap<String, Vec<Rule>>,
    accepted: DashMap<(String, String), String>,
    detect_duplicates: bool,
    next_tx: AtomicU64,
}

impl Default for MockLedgerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedgerClient {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            rules: DashMap::new(),
            accepted: DashMap::new(),
            detect_duplicates: false,
            next_tx: AtomicU64::new(1),
        }
    }

    /// Reject resubmissions of already accepted calls.
    pub fn with_duplicate_detection(mut self) -> Self {
        self.detect_duplicates = true;
        self
    }

    /// Reject every call to `function`.
    pub fn fail_function(&self, function: &str, message: &str) {
        self.push_rule(function, None, Scripted::Reject(message.to_string()));
    }

    /// Reject calls to `function` that carry `arg`.
    pub fn fail_for_arg(&self, function: &str, arg: &str, message: &str) {
        self.push_rule(function, Some(arg), Scripted::Reject(message.to_string()));
    }

    /// Answer every call to `function` with "already exists".
    pub fn already_exists(&self, function: &str, tx_id: Option<&str>) {
        self.push_rule(function, None, Scripted::AlreadyExists(tx_id.map(str::to_string)));
    }

    /// Drop every scripted response for `function`.
    pub fn clear(&self, function: &str) {
        self.rules.remove(function);
    }

    pub fn calls(&self) -> Vec<SubmittedCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, function: &str) -> Vec<SubmittedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.function == function)
            .cloned()
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn push_rule(&self, function: &str, arg: Option<&str>, response: Scripted) {
        self.rules.entry(function.to_string()).or_default().push(Rule {
            arg: arg.map(str::to_string),
            response,
        });
    }

    fn scripted_response(&self, function: &str, args: &[String]) -> Option<Scripted> {
        let rules = self.rules.get(function)?;
        rules
            .iter()
            .find(|rule| match &rule.arg {
                Some(arg) => args.iter().any(|a| a == arg),
                None => true,
            })
            .map(|rule| rule.response.clone())
    }
}

#[async_trait]
impl LedgerClient for MockLedgerClient {
    async fn submit(&self, contract: &str, function: &str, args: Vec<String>) -> ChainResult<TxReceipt> {
        self.calls.lock().push(SubmittedCall {
            contract: contract.to_string(),
            function: function.to_string(),
            args: args.clone(),
        });

        match self.scripted_response(function, &args) {
            Some(Scripted::Reject(message)) => {
                return Err(ChainError::Rejected {
                    code: "MOCK_REJECTED".to_string(),
                    message,
                });
            }
            Some(Scripted::AlreadyExists(tx_id)) => {
                return Err(ChainError::AlreadyExists {
                    message: format!("{} already exists", function),
                    tx_id,
                });
            }
            None => {}
        }

        let key = (function.to_string(), args.first().cloned().unwrap_or_default());
        if self.detect_duplicates {
            if let Some(previous) = self.accepted.get(&key) {
                return Err(ChainError::AlreadyExists {
                    message: format!("{} already exists", function),
                    tx_id: Some(previous.clone()),
                });
            }
        }

        let tx_id = format!("mocktx-{:06}", self.next_tx.fetch_add(1, Ordering::SeqCst));
        self.accepted.insert(key, tx_id.clone());

        Ok(TxReceipt {
            tx_id: LedgerTxId::new(tx_id),
            contract: contract.to_string(),
            function: function.to_string(),
        })
    }
}
