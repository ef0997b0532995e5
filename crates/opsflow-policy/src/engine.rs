//! TOML-driven approval policy.
//!
//! `TomlApprovalPolicy` implements the core `ApprovalPolicy` trait.
//!
//! Assessment collects every reason a plan needs approval:
//!
//! 1. the plan sets `approval_required`;
//! 2. the plan's `risk_assessment` is a high-risk level;
//! 3. any step's `risk_level` is a high-risk level;
//! 4. any step's action type, description or command contains a
//!    denylisted verb.
//!
//! Interpretation reads the operator's reply against the vocabulary. A reply
//! that matches nothing is rejected.

use std::path::Path;

use tracing::{debug, warn};

use opsflow_contracts::{
    error::{OpsflowError, OpsflowResult},
    incident::{ActionPlan, ActionStep},
    policy::{ApprovalDecision, RiskVerdict},
};
use opsflow_core::traits::ApprovalPolicy;

use crate::rule::ApprovalConfig;

/// The policy shipped with the crate.
pub const DEFAULT_POLICY: &str = include_str!("../policies/default.toml");

#[derive(Debug)]
pub struct TomlApprovalPolicy {
    config: ApprovalConfig,
}

impl TomlApprovalPolicy {
    /// Returns `OpsflowError::ConfigError` if the TOML is malformed or does
    /// not match `ApprovalConfig`.
    pub fn from_toml_str(s: &str) -> OpsflowResult<Self> {
        let config: ApprovalConfig = toml::from_str(s).map_err(|e| OpsflowError::ConfigError {
            reason: format!("failed to parse policy TOML: {}", e),
        })?;
        Ok(Self { config })
    }

    pub fn from_file(path: &Path) -> OpsflowResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| OpsflowError::ConfigError {
            reason: format!("failed to read policy file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// The embedded default policy.
    pub fn default_policy() -> OpsflowResult<Self> {
        Self::from_toml_str(DEFAULT_POLICY)
    }

    pub fn config(&self) -> &ApprovalConfig {
        &self.config
    }

    fn denylisted_verb(&self, step: &ActionStep) -> Option<&str> {
        let fields = [
            step.action_type.to_lowercase(),
            step.description.to_lowercase(),
            step.command.to_lowercase(),
        ];
        self.config
            .denylist_verbs
            .iter()
            .map(String::as_str)
            .find(|verb| {
                let verb = verb.to_lowercase();
                !verb.is_empty() && fields.iter().any(|f| f.contains(&verb))
            })
    }
}

impl ApprovalPolicy for TomlApprovalPolicy {
    fn assess(&self, plan: &ActionPlan) -> RiskVerdict {
        let high = &self.config.high_risk_levels;
        let mut reasons = vec![];

        if plan.approval_required {
            reasons.push("plan requests approval".to_string());
        }
        if high.contains(&plan.risk_assessment) {
            reasons.push(format!("plan risk is {}", plan.risk_assessment));
        }
        for step in &plan.steps {
            if high.contains(&step.risk_level) {
                reasons.push(format!("step {} risk is {}", step.step_id, step.risk_level));
            }
            if let Some(verb) = self.denylisted_verb(step) {
                reasons.push(format!("step {} uses '{}'", step.step_id, verb));
            }
        }

        debug!(
            plan_id = %plan.plan_id,
            reasons = reasons.len(),
            "plan assessed"
        );

        if reasons.is_empty() {
            RiskVerdict::cleared()
        } else {
            RiskVerdict {
                approval_required: true,
                reasons,
            }
        }
    }

    fn interpret(&self, reply: &str) -> ApprovalDecision {
        match self.config.vocabulary.classify(reply) {
            Some((decision, word)) => {
                debug!(decision = ?decision, matched = %word, "operator reply interpreted");
                decision
            }
            None => {
                warn!(reply = %reply, "unrecognised operator reply; treating as rejected");
                ApprovalDecision::Rejected
            }
        }
    }
}
