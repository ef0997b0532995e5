//! The Human-Interaction Gate.
//!
//! Suspension is explicit state, not a coroutine: a node that needs an
//! operator builds a [`Suspension`] and returns it. The engine calls
//! [`park`] to record the request in Shared State and checkpoint. On resume
//! [`deliver`] normalizes the external payload into an [`Answer`], and when
//! the same node runs again it collects the answer with [`take_answer`].

use serde_json::{Map, Value};
use tracing::info;

use opsflow_contracts::{
    error::{OpsflowError, OpsflowResult},
    interaction::{Answer, HumanRequest, PendingInteraction, Suspension},
    stage::Node,
    state::{IncidentState, MessageTag, Role},
};

/// Keys tried, in order, when a resume payload is an object.
const REPLY_KEYS: [&str; 6] = [
    "response",
    "input",
    "value",
    "content",
    "decision",
    "clarification",
];

/// Package `request` for suspension. `memo` comes back verbatim in the
/// [`Answer`].
pub fn suspend(request: HumanRequest, memo: Value) -> Suspension {
    Suspension { request, memo }
}

/// Reduce an arbitrarily shaped resume payload to the operator's text.
///
/// Strings pass through trimmed. Objects are searched for a known key, then
/// one level of nested objects is searched the same way, and failing both
/// the object's JSON form is used.
pub fn normalize_reply(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        Value::Object(map) => {
            if let Some(text) = known_key(map) {
                return text;
            }
            map.values()
                .filter_map(Value::as_object)
                .find_map(known_key)
                .unwrap_or_else(|| payload.to_string())
        }
        other => other.to_string(),
    }
}

fn known_key(map: &Map<String, Value>) -> Option<String> {
    REPLY_KEYS.iter().find_map(|key| match map.get(*key)? {
        Value::String(s) => Some(s.trim().to_string()),
        v @ (Value::Bool(_) | Value::Number(_)) => Some(v.to_string()),
        _ => None,
    })
}

/// Record `suspension` as the instance's single outstanding request.
pub fn park(state: &mut IncidentState, suspension: Suspension) -> OpsflowResult<HumanRequest> {
    if let Some(existing) = &state.interaction.pending {
        return Err(OpsflowError::StateMachineError {
            reason: format!(
                "request {} is already outstanding; cannot open {}",
                existing.request.id, suspension.request.id
            ),
        });
    }
    let Suspension { request, memo } = suspension;

    info!(
        incident_id = %state.incident_id(),
        request_id = %request.id,
        kind = %request.kind,
        node = %request.node,
        "workflow suspended for human input"
    );

    state.append_tagged(
        Role::Agent,
        format!("[{}] {}", request.kind, request.prompt),
        MessageTag::Gate { request_id: request.id.clone() },
    );
    state.interaction.answered = None;
    state.interaction.pending = Some(PendingInteraction {
        request: request.clone(),
        memo,
    });
    Ok(request)
}

/// Inject the operator's reply. Returns the node that is waiting for it.
pub fn deliver(
    state: &mut IncidentState,
    instance_id: &str,
    request_id: &str,
    payload: &Value,
) -> OpsflowResult<Node> {
    let pending = match &state.interaction.pending {
        Some(p) => p,
        None => {
            return Err(OpsflowError::NotSuspended {
                instance_id: instance_id.to_string(),
            })
        }
    };
    if pending.request.id != request_id {
        return Err(OpsflowError::ResumeMismatch {
            instance_id: instance_id.to_string(),
            expected: pending.request.id.clone(),
            received: request_id.to_string(),
        });
    }

    let text = normalize_reply(payload);
    let PendingInteraction { request, memo } = match state.interaction.pending.take() {
        Some(p) => p,
        None => {
            return Err(OpsflowError::NotSuspended {
                instance_id: instance_id.to_string(),
            })
        }
    };

    info!(
        incident_id = %state.incident_id(),
        request_id = %request.id,
        node = %request.node,
        "human input received"
    );

    state.append_tagged(
        Role::Human,
        text.clone(),
        MessageTag::Gate { request_id: request.id.clone() },
    );
    state.interaction.answered = Some(Answer {
        request_id: request.id,
        kind: request.kind,
        node: request.node,
        text,
        memo,
    });
    Ok(request.node)
}

/// Hand the waiting answer to `node`, if it is the one that asked.
pub fn take_answer(state: &mut IncidentState, node: Node) -> Option<Answer> {
    match &state.interaction.answered {
        Some(answer) if answer.node == node => state.interaction.answered.take(),
        _ => None,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
