//! Run-level records: entry input, outcomes, transitions, checkpoints and
//! streaming deltas.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OpsflowError, OpsflowResult};
use crate::incident::Alert;
use crate::interaction::HumanRequest;
use crate::stage::Node;
use crate::state::{IncidentState, Message, Slot};

/// What a caller hands the engine to open an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum WorkflowInput {
    Alert(Alert),
    Text(String),
    Symptoms(Vec<String>),
    /// A state produced by an earlier run, adopted as-is.
    Partial(Box<IncidentState>),
}

/// How a run ended at the terminal node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    CompletedWithErrors,
    /// Retry budget exhausted.
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::CompletedWithErrors => "completed_with_errors",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of driving an instance until it stops.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed {
        state: IncidentState,
        status: RunStatus,
    },
    Suspended {
        instance_id: String,
        request: HumanRequest,
        state: IncidentState,
    },
}

impl RunOutcome {
    pub fn state(&self) -> &IncidentState {
        match self {
            RunOutcome::Completed { state, .. } | RunOutcome::Suspended { state, .. } => state,
        }
    }
}

/// One audited hop of the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub instance_id: String,
    /// Transition number within the instance, starting at 1.
    pub step: u64,
    pub from: Node,
    pub to: Node,
    pub reason: String,
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
}

/// Where a checkpointed instance stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "outcome", rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// Being driven by an engine right now.
    Running,
    /// Parked on a human request.
    Suspended,
    Finished(RunStatus),
}

/// Durable snapshot sufficient to continue an instance at `node`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub instance_id: String,
    /// The node that runs next (or, when suspended, the node awaiting the
    /// answer).
    pub node: Node,
    pub status: CheckpointStatus,
    /// Transitions taken so far across all invocations.
    pub transitions: u64,
    pub state: IncidentState,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn pending_request(&self) -> Option<&HumanRequest> {
        self.state.interaction.pending.as_ref().map(|p| &p.request)
    }

    /// Whether a resume naming `request_id` may take this instance.
    pub fn check_claim(&self, request_id: &str) -> OpsflowResult<()> {
        let pending = match (&self.status, self.pending_request()) {
            (CheckpointStatus::Suspended, Some(pending)) => pending,
            _ => {
                return Err(OpsflowError::NotSuspended {
                    instance_id: self.instance_id.clone(),
                })
            }
        };
        if pending.id != request_id {
            return Err(OpsflowError::ResumeMismatch {
                instance_id: self.instance_id.clone(),
                expected: pending.id.clone(),
                received: request_id.to_string(),
            });
        }
        Ok(())
    }
}

/// What one node execution changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    pub step: u64,
    pub from: Node,
    pub to: Node,
    pub new_messages: Vec<Message>,
    pub slots_filled: Vec<Slot>,
    pub slots_cleared: Vec<Slot>,
    pub new_errors: Vec<String>,
}

impl StateDelta {
    /// Diff two snapshots of the same instance. Relies on the message log
    /// and error list being append-only.
    pub fn between(
        step: u64,
        from: Node,
        to: Node,
        before: &IncidentState,
        after: &IncidentState,
    ) -> Self {
        let mut slots_filled = vec![];
        let mut slots_cleared = vec![];
        for slot in Slot::ALL {
            match (before.has(slot), after.has(slot)) {
                (false, true) => slots_filled.push(slot),
                (true, false) => slots_cleared.push(slot),
                _ => {}
            }
        }
        Self {
            step,
            from,
            to,
            new_messages: after
                .messages()
                .get(before.messages().len()..)
                .unwrap_or_default()
                .to_vec(),
            slots_filled,
            slots_cleared,
            new_errors: after
                .errors()
                .get(before.errors().len()..)
                .unwrap_or_default()
                .to_vec(),
        }
    }
}

/// Items yielded by the streaming execution mode.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Transition(StateDelta),
    Suspended {
        instance_id: String,
        request: HumanRequest,
    },
    Finished {
        status: RunStatus,
        state: Box<IncidentState>,
    },
}
