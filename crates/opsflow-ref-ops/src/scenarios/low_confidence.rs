//! Scenario 2: Low-Confidence Diagnosis
//!
//! The diagnoser is unsure of its first answer. The workflow suspends once
//! to ask the operator for supplementary detail, then resumes and calls the
//! diagnoser exactly one more time.
//!
//! Pipeline walk-through for the demo run:
//!   1. Checkpointed start; alert is classified
//!   2. Diagnoser answers 0.40, below the 0.7 threshold
//!   3. Gate parks a clarification request; instance is listed as suspended
//!   4. Operator supplies a deploy timestamp; resume re-enters diagnose with
//!      the answer and the memo of the first diagnosis
//!   5. Second diagnosis (0.82) is committed; run completes
//!   6. A repeated resume with the same request id is refused

use std::sync::Arc;

use serde_json::json;

use opsflow_audit::InMemoryAuditWriter;
use opsflow_contracts::{
    error::{OpsflowError, OpsflowResult},
    interaction::RequestKind,
    run::{RunOutcome, WorkflowInput},
};
use opsflow_core::EngineConfig;

use crate::mock_data::cpu_alert;
use crate::oracles::ScriptedDiagnoser;
use crate::scenarios::{print_audit, print_transcript, ScenarioReport};
use crate::wiring::ReferenceWiring;

const INSTANCE_ID: &str = "inc-low-confidence";

/// What the operator types in answer to the clarification request.
pub const CLARIFICATION: &str =
    "release 2.3.0 of the api went out at 14:05, right before the spike";

/// Run Scenario 2: Low-Confidence Diagnosis.
pub async fn run_scenario() -> OpsflowResult<ScenarioReport> {
    println!("=== Scenario 2: Low-Confidence Diagnosis ===");
    println!();

    let audit = InMemoryAuditWriter::new();
    let runtime = ReferenceWiring::new(EngineConfig::default())
        .diagnoser(ScriptedDiagnoser::scripted(vec![0.4], 0.82))
        .audit(Arc::new(audit.clone()))
        .build()?;
    let engine = &runtime.engine;

    let outcome = engine
        .start_checkpointed(INSTANCE_ID, WorkflowInput::Alert(cpu_alert()))
        .await?;
    let request = match outcome {
        RunOutcome::Suspended { request, .. } if request.kind == RequestKind::Clarification => {
            request
        }
        other => {
            return Err(OpsflowError::StateMachineError {
                reason: format!("expected a clarification request, got {:?}", other),
            })
        }
    };

    println!("  Diagnoser confidence:   0.40 (threshold {:.2})", engine.config().diagnosis_confidence_threshold);
    println!("  Suspended on:           {} ({})", request.node, request.kind);
    println!("  Prompt:                 {}", request.prompt);
    println!("  Suspended instances:    {}", engine.suspended().await?.len());
    println!("  Operator replies:       {}", CLARIFICATION);
    println!();

    let resumed = engine
        .resume(INSTANCE_ID, &request.id, json!({ "response": CLARIFICATION }))
        .await?;
    let (state, status) = match resumed {
        RunOutcome::Completed { state, status } => (state, status),
        RunOutcome::Suspended { request, .. } => {
            return Err(OpsflowError::StateMachineError {
                reason: format!("run suspended again on {}", request.kind),
            })
        }
    };

    if let Some(diagnosis) = state.diagnostic_result() {
        println!(
            "  Final diagnosis:        {} (confidence {:.2})",
            diagnosis.root_cause, diagnosis.confidence_score
        );
    }
    println!("  Diagnoser calls:        {}", runtime.diagnoser.calls());
    println!("  Run status:             {}", status);

    match engine.resume(INSTANCE_ID, &request.id, json!(CLARIFICATION)).await {
        Err(OpsflowError::NotSuspended { .. }) => {
            println!("  Repeated resume:        refused (instance no longer suspended)")
        }
        other => println!("  Repeated resume:        unexpected {:?}", other.map(|_| ())),
    }
    println!();

    print_transcript(&state);
    let (audit_verified, audit_events) = print_audit(&audit);
    println!();
    println!("  Scenario 2 complete.");
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
