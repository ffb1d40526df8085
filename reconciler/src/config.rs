//! Reconciler configuration.

use propledger_chain::{ContractNames, GatewayConfig};

/// Reconciliation Engine configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Master switch for ledger integration. The engine refuses to start when off.
    pub ledger_enabled: bool,
    /// Ledger gateway connection.
    pub gateway: GatewayConfig,
    /// Deployed contract names.
    pub contracts: ContractNames,
    /// Ledger Store connection string.
    pub database_url: String,
    /// Ledger Store pool size.
    pub max_connections: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            ledger_enabled: false,
            gateway: GatewayConfig::default(),
            contracts: ContractNames::default(),
            database_url: "postgres://localhost/propledger".to_string(),
            max_connections: 5,
        }
    }
}

impl ReconcilerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self {
            gateway: GatewayConfig::from_env(),
            contracts: ContractNames::from_env(),
            ..Self::default()
        };

        if let Ok(flag) = std::env::var("LEDGER_ENABLED") {
            config.ledger_enabled = parse_flag(&flag);
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
        if self.database_url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }

        if self.max_connections == 0 {
            return Err("Database pool size cannot be 0".to_string());
        }

        if self.ledger_enabled {
            self.gateway.validate()?;
            self.contracts.validate()?;
        }

        Ok(())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
