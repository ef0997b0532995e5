//! Engine configuration.
//!
//! Loaded from TOML; every field has a default so an empty document is a
//! valid configuration.
//!
//! ```toml
//! agent_id = "ops-bot"
//! max_retries = 3
//! recursion_limit = 50
//! enable_reporting = true
//! auto_execution = false
//! diagnosis_confidence_threshold = 0.7
//! router_confidence_floor = 0.2
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use opsflow_contracts::error::{OpsflowError, OpsflowResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Named in reports and the closing narrative.
    pub agent_id: String,
    /// Retries the error node grants before giving up.
    pub max_retries: u32,
    /// Ceiling on transitions per engine invocation.
    pub recursion_limit: u64,
    pub enable_reporting: bool,
    /// When false, plans that need no approval are recorded as
    /// `manual_approval_required` instead of being run.
    pub auto_execution: bool,
    pub diagnosis_confidence_threshold: f64,
    /// Extractor routing suggestions at or below this are ignored.
    pub router_confidence_floor: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agent_id: "opsflow-agent".to_string(),
            max_retries: 3,
            recursion_limit: 50,
            enable_reporting: true,
            auto_execution: true,
            diagnosis_confidence_threshold: 0.7,
            router_confidence_floor: 0.2,
        }
    }
}

impl EngineConfig {
    /// Returns `OpsflowError::ConfigError` on malformed TOML or out-of-range
    /// values.
    pub fn from_toml_str(s: &str) -> OpsflowResult<Self> {
        let config: EngineConfig = toml::from_str(s).map_err(|e| OpsflowError::ConfigError {
            reason: format!("failed to parse engine TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> OpsflowResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| OpsflowError::ConfigError {
            reason: format!("failed to read engine config '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> OpsflowResult<()> {
        for (name, value) in [
            ("diagnosis_confidence_threshold", self.diagnosis_confidence_threshold),
            ("router_confidence_floor", self.router_confidence_floor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(OpsflowError::ConfigError {
                    reason: format!("{} must be within [0, 1], got {}", name, value),
                });
            }
        }
        if self.recursion_limit == 0 {
            return Err(OpsflowError::ConfigError {
                reason: "recursion_limit must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
