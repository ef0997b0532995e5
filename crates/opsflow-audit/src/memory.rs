//! In-memory implementation of `AuditWriter`.
//!
//! One engine serves many instances, so the writer keeps a separate chain
//! per instance id. Clones share the same chains, which lets a caller keep a
//! handle for `export_log` while the engine owns another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::info;

use opsflow_contracts::{
    error::{OpsflowError, OpsflowResult},
    run::TransitionRecord,
};
use opsflow_core::traits::AuditWriter;

use crate::{
    chain::{link, verify_chain},
    event::{AuditEvent, AuditLog},
};

// ── Internal mutable state ────────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) struct Chain {
    pub(crate) events: Vec<AuditEvent>,
    pub(crate) last_hash: String,
    pub(crate) finalized: bool,
}

impl Chain {
    pub(crate) fn new() -> Self {
        Self {
            events: Vec::new(),
            last_hash: AuditEvent::GENESIS_HASH.to_string(),
            finalized: false,
        }
    }

    /// The event `record` would become, without appending it.
    pub(crate) fn next_event(&self, record: &TransitionRecord) -> OpsflowResult<AuditEvent> {
        if self.finalized {
            return Err(OpsflowError::AuditWriteFailed {
                reason: format!("chain for '{}' is already finalized", record.instance_id),
            });
        }
        link(
            &record.instance_id,
            self.events.len() as u64,
            record,
            self.last_hash.clone(),
        )
    }

    pub(crate) fn push(&mut self, event: AuditEvent) {
        self.last_hash = event.this_hash.clone();
        self.events.push(event);
    }

    pub(crate) fn export(&self, instance_id: &str) -> AuditLog {
        AuditLog {
            instance_id: instance_id.to_string(),
            events: self.events.clone(),
            finalized: self.finalized,
            exported_at: Utc::now(),
            terminal_hash: self
                .events
                .last()
                .map(|e| e.this_hash.clone())
                .unwrap_or_default(),
        }
    }
}

// ── Public writer ─────────────────────────────────────────────────────────────

/// An in-memory, append-only audit writer backed by per-instance SHA-256
/// hash chains.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAuditWriter {
    pub(crate) chains: Arc<Mutex<HashMap<String, Chain>>>,
}

impl InMemoryAuditWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> OpsflowResult<MutexGuard<'_, HashMap<String, Chain>>> {
        self.chains.lock().map_err(|e| OpsflowError::AuditWriteFailed {
            reason: format!("audit state lock poisoned: {}", e),
        })
    }

    /// Export the chain for `instance_id`, if any transition was recorded.
    pub fn export_log(&self, instance_id: &str) -> Option<AuditLog> {
        let chains = self.lock().ok()?;
        chains.get(instance_id).map(|c| c.export(instance_id))
    }

    /// Whether the chain for `instance_id` is intact. Unknown instances have
    /// an empty, and therefore valid, chain.
    pub fn verify_integrity(&self, instance_id: &str) -> bool {
        match self.lock() {
            Ok(chains) => chains
                .get(instance_id)
                .map_or(true, |c| verify_chain(&c.events)),
            Err(_) => false,
        }
    }

    /// Instance ids with at least one recorded transition, sorted.
    pub fn instances(&self) -> Vec<String> {
        let mut ids: Vec<String> = match self.lock() {
            Ok(chains) => chains.keys().cloned().collect(),
            Err(_) => vec![],
        };
        ids.sort();
        ids
    }
}

// ── AuditWriter impl ──────────────────────────────────────────────────────────

impl AuditWriter for InMemoryAuditWriter {
    fn write(&self, record: &TransitionRecord) -> OpsflowResult<()> {
        let mut chains = self.lock()?;
        let chain = chains
            .entry(record.instance_id.clone())
            .or_insert_with(Chain::new);
        let event = chain.next_event(record)?;
        chain.push(event);
        Ok(())
    }

    fn finalize(&self, instance_id: &str) -> OpsflowResult<()> {
        let mut chains = self.lock()?;
        let chain = chains
            .entry(instance_id.to_string())
            .or_insert_with(Chain::new);
        chain.finalized = true;

        info!(
            instance_id = %instance_id,
            event_count = chain.events.len(),
            terminal_hash = %chain.last_hash,
            "audit log finalized"
        );
        Ok(())
    }
}
