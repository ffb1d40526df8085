//! Settlement Engine configuration.

/// Settlement Engine configuration.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Prefix of generated certificate codes.
    pub certificate_prefix: String,
    /// Upper bound on tokens in a single order. `None` means unlimited.
    pub max_tokens_per_order: Option<i64>,
    /// Ledger Store connection string.
    pub database_url: String,
    /// Ledger Store pool size.
    pub max_connections: u32,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            certificate_prefix: "CERT".to_string(),
            max_tokens_per_order: None,
            database_url: "postgres://localhost/propledger".to_string(),
            max_connections: 10,
        }
    }
}

impl SettlementConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(prefix) = std::env::var("CERTIFICATE_PREFIX") {
            config.certificate_prefix = prefix;
        }

        if let Ok(max) = std::env::var("MAX_TOKENS_PER_ORDER") {
            if let Ok(max) = max.parse() {
                config.max_tokens_per_order = Some(max);
            }
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        if let Ok(size) = std::env::var("DATABASE_MAX_CONNECTIONS") {
            if let Ok(size) = size.parse() {
                config.max_connections = size;
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.certificate_prefix.is_empty() {
            return Err("Certificate prefix cannot be empty".to_string());
        }

        if !self
            .certificate_prefix
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            return Err(format!(
                "Certificate prefix must be uppercase alphanumeric: {}",
                self.certificate_prefix
            ));
        }

        if let Some(max) = self.max_tokens_per_order {
            if max <= 0 {
                return Err("Max tokens per order must be positive".to_string());
            }
        }

        if self.database_url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }

        if self.max_connections == 0 {
            return Err("Database pool size cannot be 0".to_string());
        }

        Ok(())
    }
}
