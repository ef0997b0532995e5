//! Audit event and log types.
//!
//! `AuditEvent` wraps one engine `TransitionRecord` with its position in the
//! instance's chain and the hashes that make tampering detectable.
//! `AuditLog` is the exported view of one instance's chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use opsflow_contracts::run::TransitionRecord;

/// One entry in an instance's hash chain.
///
/// Changing any field, including those of the embedded `record`,
/// invalidates `this_hash` and every later `prev_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Position in the chain, starting at 0.
    pub sequence: u64,
    pub instance_id: String,
    pub record: TransitionRecord,
    /// `this_hash` of the previous event, or `GENESIS_HASH`.
    pub prev_hash: String,
    pub this_hash: String,
}

impl AuditEvent {
    /// The `prev_hash` of the first event in every chain.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";
}

/// An exported chain for a single instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub instance_id: String,
    pub events: Vec<AuditEvent>,
    /// Whether the engine reached the terminal node for this instance.
    pub finalized: bool,
    pub exported_at: DateTime<Utc>,
    /// `this_hash` of the last event; empty when there are none.
    pub terminal_hash: String,
}
