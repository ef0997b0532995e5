//! Scenario 4: Free-Text Report
//!
//! An operator opens the incident with a vague sentence. The extractor finds
//! nothing to act on, so the Router sends the workflow to information
//! collection, which asks the operator for details. The second message
//! carries enough for the extractor to build an alert, and the run finishes
//! from there.
//!
//! Pipeline walk-through for the demo run:
//!   1. Text entry becomes a human message; no alert, no symptoms
//!   2. Router runs the extractor: confidence 0.10, nothing extracted
//!   3. Data inference finds no signal; information collection suspends
//!   4. Operator: "Checkout is slow and timing out, CPU at 92% on api-2,
//!      this is critical"
//!   5. Extractor builds a critical alert (cpu_usage 0.92), two symptoms and
//!      host context, and suggests ingest-alert with confidence 0.80
//!   6. Remaining stages run; report names the operator as the alert source

use std::sync::Arc;

use serde_json::json;

use opsflow_audit::InMemoryAuditWriter;
use opsflow_contracts::{
    error::{OpsflowError, OpsflowResult},
    interaction::RequestKind,
    run::{RunOutcome, WorkflowInput},
};
use opsflow_core::EngineConfig;

use crate::scenarios::{print_audit, print_transcript, ScenarioReport};
use crate::wiring::ReferenceWiring;

const INSTANCE_ID: &str = "inc-free-text";

pub const OPENING: &str = "something feels off with checkout";

pub const DETAILS: &str = "Checkout is slow and timing out, CPU at 92% on api-2, this is critical";

/// Run Scenario 4: Free-Text Report.
pub async fn run_scenario() -> OpsflowResult<ScenarioReport> {
    println!("=== Scenario 4: Free-Text Report ===");
    println!();

    let audit = InMemoryAuditWriter::new();
    let runtime = ReferenceWiring::new(EngineConfig::default())
        .with_extractor()
        .audit(Arc::new(audit.clone()))
        .build()?;
    let engine = &runtime.engine;

    println!("  Operator opens with:    {}", OPENING);
    let outcome = engine
        .start_checkpointed(INSTANCE_ID, WorkflowInput::Text(OPENING.to_string()))
        .await?;
    let request = match outcome {
        RunOutcome::Suspended { request, .. } if request.kind == RequestKind::OperatorInput => {
            request
        }
        other => {
            return Err(OpsflowError::StateMachineError {
                reason: format!("expected an operator input request, got {:?}", other),
            })
        }
    };
    println!("  Agent asks:             {}", request.prompt);
    println!("  Operator replies:       {}", DETAILS);
    println!();

    let resumed = engine
        .resume(INSTANCE_ID, &request.id, json!(DETAILS))
        .await?;
    let (state, status) = match resumed {
        RunOutcome::Completed { state, status } => (state, status),
        RunOutcome::Suspended { request, .. } => {
            return Err(OpsflowError::StateMachineError {
                reason: format!("run suspended again on {}", request.kind),
            })
        }
    };

    if let Some(alert) = state.alert() {
        println!(
            "  Extracted alert:        [{}] from {} with {:?}",
            alert.severity, alert.source, alert.metrics
        );
    }
    if let Some(symptoms) = state.symptoms() {
        println!("  Extracted symptoms:     {:?}", symptoms);
    }
    println!("  Run status:             {}", status);
    println!();

    print_transcript(&state);
    let (audit_verified, audit_events) = print_audit(&audit);
    println!();
    println!("  Scenario 4 complete.");
    println!();

    Ok(ScenarioReport {
        status,
        audit_verified,
        audit_events,
        executed_commands: runtime.runner.executed(),
        diagnoser_calls: runtime.diagnoser.calls(),
        state,
    })
}
