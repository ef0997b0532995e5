//! Incident-response demo scenarios.
//!
//! Each scenario is a self-contained module that wires the real opsflow
//! collaborators (approval policy, audit writer, output verifier, engine)
//! to the scripted oracles and mock monitoring data, and demonstrates one
//! distinct workflow pattern.

pub mod cpu_incident;
pub mod free_text;
pub mod low_confidence;
pub mod retry_exhaustion;
pub mod risky_restart;

use opsflow_audit::InMemoryAuditWriter;
use opsflow_contracts::{
    run::RunStatus,
    state::{IncidentState, Role},
};

/// What a scenario run leaves behind, for the caller to inspect.
#[derive(Debug)]
pub struct ScenarioReport {
    pub status: RunStatus,
    pub state: IncidentState,
    pub audit_verified: bool,
    pub audit_events: usize,
    pub executed_commands: Vec<String>,
    pub diagnoser_calls: usize,
}

/// Print the conversation log, one line per message.
pub(crate) fn print_transcript(state: &IncidentState) {
    println!("  Transcript:");
    for message in state.messages() {
        let who = match message.role {
            Role::Human => "operator",
            Role::Agent => "agent",
        };
        println!("    {:>8}: {}", who, message.content);
    }
    println!();
}

/// Verify and print the audit chain of the only instance the writer has
/// seen. Returns `(verified, event count)`.
pub(crate) fn print_audit(audit: &InMemoryAuditWriter) -> (bool, usize) {
    let Some(instance_id) = audit.instances().into_iter().next() else {
        println!("  Audit chain:            EMPTY");
        return (false, 0);
    };
    let verified = audit.verify_integrity(&instance_id);
    let events = audit
        .export_log(&instance_id)
        .map_or(0, |log| log.events.len());
    println!(
        "  Audit chain integrity:  {} ({} event(s) in chain)",
        if verified { "VERIFIED" } else { "FAILED" },
        events
    );
    (verified, events)
}
