//! Contract and function names on the ledger.

use serde::{Deserialize, Serialize};

/// Function names exposed by the deployed contracts.
pub mod functions {
    pub const REGISTER_PROPERTY: &str = "RegisterProperty";
    pub const APPROVE_PROPERTY: &str = "ApproveProperty";
    pub const TOKENIZE_PROPERTY: &str = "TokenizeProperty";
    pub const MINT_TOKENS: &str = "MintTokens";
    pub const INVEST_PROPERTY: &str = "InvestProperty";
    pub const ISSUE_DEED: &str = "IssueDeed";
}

/// Deployed contract identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractNames {
    /// Hosts RegisterProperty, ApproveProperty and TokenizeProperty.
    pub property_registry: String,
    /// Hosts MintTokens and InvestProperty.
    pub property_token: String,
    /// Hosts IssueDeed.
    pub deed_registry: String,
}

impl Default for ContractNames {
    fn default() -> Self {
        Self {
            property_registry: "PropertyRegistry".to_string(),
            property_token: "PropertyToken".to_string(),
            deed_registry: "DeedRegistry".to_string(),
        }
    }
}

impl ContractNames {
    /// Load overrides from `PROPERTY_CONTRACT`, `TOKEN_CONTRACT` and `DEED_CONTRACT`.
    pub fn from_env() -> Self {
        let mut names = Self::default();

        if let Ok(name) = std::env::var("PROPERTY_CONTRACT") {
            names.property_registry = name;
        }

        if let Ok(name) = std::env::var("TOKEN_CONTRACT") {
            names.property_token = name;
        }

        if let Ok(name) = std::env::var("DEED_CONTRACT") {
            names.deed_registry = name;
        }

        names
    }

    pub fn validate(&self) -> Result<(), String> {
        for (label, name) in [
            ("property registry", &self.property_registry),
            ("property token", &self.property_token),
            ("deed registry", &self.deed_registry),
        ] {
            if name.trim().is_empty() {
                return Err(format!("{} contract name cannot be empty", label));
            }
        }
        Ok(())
    }
}
