//! Hash-chain primitives: hashing and chain integrity verification.
//!
//! Hash input layout (bytes, in order):
//!   1. instance_id as UTF-8 bytes
//!   2. sequence as 8-byte little-endian
//!   3. prev_hash as UTF-8 bytes (64 ASCII hex chars)
//!   4. compact JSON of the transition record

use sha2::{Digest, Sha256};

use opsflow_contracts::{
    error::{OpsflowError, OpsflowResult},
    run::TransitionRecord,
};

use crate::event::AuditEvent;

/// Compute the lowercase hex SHA-256 of one event.
pub fn hash_event(
    instance_id: &str,
    sequence: u64,
    record: &TransitionRecord,
    prev_hash: &str,
) -> OpsflowResult<String> {
    let record_json = serde_json::to_vec(record).map_err(|e| OpsflowError::AuditWriteFailed {
        reason: format!("transition record is not serializable: {}", e),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(instance_id.as_bytes());
    hasher.update(sequence.to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(&record_json);

    Ok(hex::encode(hasher.finalize()))
}

/// Verify one instance's chain.
///
/// Valid when sequences run 0, 1, 2, …, each `prev_hash` links to the
/// preceding `this_hash` (`GENESIS_HASH` first), every event names the same
/// instance, and every `this_hash` recomputes. An empty chain is valid.
pub fn verify_chain(events: &[AuditEvent]) -> bool {
    let mut expected_prev = AuditEvent::GENESIS_HASH.to_string();
    let instance_id = match events.first() {
        Some(first) => first.instance_id.as_str(),
        None => return true,
    };

    for (position, event) in events.iter().enumerate() {
        if event.sequence != position as u64
            || event.instance_id != instance_id
            || event.prev_hash != expected_prev
        {
            return false;
        }

        match hash_event(&event.instance_id, event.sequence, &event.record, &event.prev_hash) {
            Ok(recomputed) if recomputed == event.this_hash => {}
            _ => return false,
        }

        expected_prev = event.this_hash.clone();
    }

    true
}

/// Build the event that follows `prev_hash` at `sequence`.
pub(crate) fn link(
    instance_id: &str,
    sequence: u64,
    record: &TransitionRecord,
    prev_hash: String,
) -> OpsflowResult<AuditEvent> {
    let this_hash = hash_event(instance_id, sequence, record, &prev_hash)?;
    Ok(AuditEvent {
        sequence,
        instance_id: instance_id.to_string(),
        record: record.clone(),
        prev_hash,
        this_hash,
    })
}
