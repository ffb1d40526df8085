//! HTTP client for the ledger gateway.
//!
//! The gateway exposes one endpoint, `POST {base}/api/v1/transactions`,
//! taking `{contract, function, args}` and answering `{txId}` once the
//! transaction is committed on the ledger.

use std::time::Duration;

use async_trait::async_trait;
use propledger_common::LedgerTxId;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::client::{LedgerClient, TxReceipt};
use crate::error::{ChainError, ChainResult};

/// Gateway connection settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the gateway.
    pub gateway_url: String,
    /// Per-submission timeout.
    pub request_timeout: Duration,
    /// Bearer token, if the gateway requires one.
    pub api_key: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway_url: "http://localhost:8801".to_string(),
            request_timeout: Duration::from_secs(30),
            api_key: None,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("LEDGER_GATEWAY_URL") {
            config.gateway_url = url;
        }

        if let Ok(secs) = std::env::var("LEDGER_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                config.request_timeout = Duration::from_secs(secs);
            }
        }

        if let Ok(key) = std::env::var("LEDGER_API_KEY") {
            config.api_key = Some(key);
        }

        config
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.gateway_url.is_empty() {
            return Err("Ledger gateway URL cannot be empty".to_string());
        }

        if !self.gateway_url.starts_with("http://") && !self.gateway_url.starts_with("https://") {
            return Err(format!("Ledger gateway URL must be http(s): {}", self.gateway_url));
        }

        if self.request_timeout.is_zero() {
            return Err("Ledger request timeout cannot be zero".to_string());
        }

        Ok(())
    }

    fn transactions_url(&self) -> String {
        format!("{}/api/v1/transactions", self.gateway_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    contract: &'a str,
    function: &'a str,
    args: &'a [String],
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(rename = "txId", alias = "tx_id")]
    tx_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GatewayErrorBody {
    code: Option<String>,
    #[serde(alias = "error")]
    message: Option<String>,
    #[serde(rename = "txId", alias = "tx_id")]
    tx_id: Option<String>,
}

/// [`LedgerClient`] that talks to the gateway over HTTP.
pub struct GatewayLedgerClient {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl GatewayLedgerClient {
    pub fn new(config: GatewayConfig) -> ChainResult<Self> {
        config.validate().map_err(ChainError::Configuration)?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ChainError::Configuration(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

#[async_trait]
impl LedgerClient for GatewayLedgerClient {
    #[instrument(skip(self, args), fields(arg_count = args.len()))]
    async fn submit(&self, contract: &str, function: &str, args: Vec<String>) -> ChainResult<TxReceipt> {
        let body = SubmitRequest {
            contract,
            function,
            args: &args,
        };

        let mut request = self.client.post(self.config.transactions_url()).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();

        if status.is_success() {
            let parsed: SubmitResponse = response
                .json()
                .await
                .map_err(|e| ChainError::InvalidResponse(e.to_string()))?;

            debug!(tx_id = %parsed.tx_id, "Ledger accepted submission");
            return Ok(TxReceipt {
                tx_id: LedgerTxId::new(parsed.tx_id),
                contract: contract.to_string(),
                function: function.to_string(),
            });
        }

        let text = response.text().await.map_err(transport_error)?;
        let error = classify_rejection(status, &text);
        warn!(status = status.as_u16(), error = %error, "Ledger rejected submission");
        Err(error)
    }
}

fn transport_error(err: reqwest::Error) -> ChainError {
    if err.is_timeout() {
        ChainError::Timeout(err.to_string())
    } else {
        ChainError::Network(err.to_string())
    }
}

/// Map a non-success gateway response onto the error taxonomy.
fn classify_rejection(status: StatusCode, text: &str) -> ChainError {
    let body: GatewayErrorBody = serde_json::from_str(text).unwrap_or_default();
    let code = body
        .code
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("UNKNOWN").to_string());
    let message = body.message.unwrap_or_else(|| text.to_string());

    if status == StatusCode::CONFLICT || mentions_already_exists(&code) || mentions_already_exists(&message) {
        return ChainError::AlreadyExists {
            message: format!("{}: {}", code, message),
            tx_id: body.tx_id,
        };
    }

    if status.is_server_error() && status != StatusCode::INTERNAL_SERVER_ERROR {
        return ChainError::Network(format!("gateway returned {}: {}", status.as_u16(), message));
    }

    ChainError::Rejected { code, message }
}

fn mentions_already_exists(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("already exists") || lower.contains("already_exists")
}
