//! Risk and approval policy types.
//!
//! The approval policy is consulted by the execute-actions stage twice: once
//! to decide whether a plan needs an operator's go-ahead, and once to map the
//! operator's free-text reply to a decision.

use serde::{Deserialize, Serialize};

/// Whether a plan may run without an operator's explicit approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub approval_required: bool,
    /// Every condition that triggered the requirement. Empty when
    /// `approval_required` is false.
    pub reasons: Vec<String>,
}

impl RiskVerdict {
    pub fn cleared() -> Self {
        Self {
            approval_required: false,
            reasons: vec![],
        }
    }
}

/// The operator's reply, classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
    ModificationRequested,
}
