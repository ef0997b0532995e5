//! Human-interaction request and answer types.
//!
//! A stage that needs an operator's input returns a [`Suspension`] instead
//! of an outcome. The engine parks the request in
//! [`InteractionState::pending`] and checkpoints. On resume the normalized
//! reply is moved to [`InteractionState::answered`], and the same node runs
//! again and picks it up.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stage::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Free-form information the workflow cannot proceed without.
    OperatorInput,
    /// Go/no-go on a risky remediation plan.
    ExecutionApproval,
    /// Supplementary detail for a low-confidence diagnosis.
    Clarification,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::OperatorInput => "operator_input",
            RequestKind::ExecutionApproval => "execution_approval",
            RequestKind::Clarification => "clarification",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The payload handed to the operator at the engine boundary.
///
/// Serializes as `{id, type, prompt, context, timestamp, node}`; `query` is
/// accepted as an alias for `prompt` on the way in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RequestKind,
    #[serde(alias = "query")]
    pub prompt: String,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    pub timestamp: DateTime<Utc>,
    /// The node awaiting the answer.
    pub node: Node,
}

impl HumanRequest {
    pub fn new(kind: RequestKind, node: Node, prompt: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            prompt: prompt.into(),
            context: BTreeMap::new(),
            timestamp: Utc::now(),
            node,
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

/// An outstanding request plus whatever the requesting stage needs to pick
/// up where it left off without redoing committed work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingInteraction {
    pub request: HumanRequest,
    #[serde(default)]
    pub memo: Value,
}

/// A normalized operator reply waiting to be consumed by `node`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub request_id: String,
    pub kind: RequestKind,
    pub node: Node,
    pub text: String,
    #[serde(default)]
    pub memo: Value,
}

/// The durable awaiting-input marker carried in Shared State.
///
/// At most one of `pending` / `answered` is populated at any time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionState {
    #[serde(default)]
    pub pending: Option<PendingInteraction>,
    #[serde(default)]
    pub answered: Option<Answer>,
}

impl InteractionState {
    pub fn is_suspended(&self) -> bool {
        self.pending.is_some()
    }
}

/// Control-transfer signal: the workflow must pause for a human.
///
/// Deliberately not an error type. Stage handlers return
/// `Result<StageOutcome, Suspension>` and the engine is the only place that
/// turns it into a parked run.
#[derive(Debug, Clone, PartialEq)]
pub struct Suspension {
    pub request: HumanRequest,
    /// Stage-private progress handed back with the answer.
    pub memo: Value,
}
