//! Approval policy schema.
//!
//! An `ApprovalConfig` is deserialized from TOML. It names the risk levels
//! that always need sign-off, the action verbs that do, and the vocabulary
//! used to read an operator's reply.

use serde::{Deserialize, Serialize};

use opsflow_contracts::{incident::RiskLevel, policy::ApprovalDecision};

/// The top-level structure deserialized from a TOML policy file.
///
/// ```toml
/// high_risk_levels = ["high", "critical"]
/// denylist_verbs = ["restart", "delete"]
///
/// [vocabulary]
/// rejected = ["no", "cancel"]
/// modification = ["change"]
/// approved = ["yes"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Plan or step risk levels that require approval.
    #[serde(default)]
    pub high_risk_levels: Vec<RiskLevel>,

    /// Substrings that, found in a step's action type, description or
    /// command (case-insensitive), require approval.
    #[serde(default)]
    pub denylist_verbs: Vec<String>,

    pub vocabulary: Vocabulary,
}

/// Words that map an operator reply to a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vocabulary {
    #[serde(default)]
    pub rejected: Vec<String>,
    #[serde(default)]
    pub modification: Vec<String>,
    #[serde(default)]
    pub approved: Vec<String>,
}

impl Vocabulary {
    /// Classify `reply` by case-insensitive substring match. Lists are tried
    /// rejected → modification → approved; `None` when no entry matches.
    pub fn classify(&self, reply: &str) -> Option<(ApprovalDecision, &str)> {
        let reply = reply.to_lowercase();

        [
            (ApprovalDecision::Rejected, &self.rejected),
            (ApprovalDecision::ModificationRequested, &self.modification),
            (ApprovalDecision::Approved, &self.approved),
        ]
        .into_iter()
        .find_map(|(decision, list)| {
            list.iter()
                .find(|entry| {
                    let entry = entry.trim().to_lowercase();
                    !entry.is_empty() && reply.contains(&entry)
                })
                .map(|entry| (decision, entry.as_str()))
        })
    }
}
