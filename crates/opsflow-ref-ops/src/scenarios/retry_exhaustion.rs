//! Scenario 5: Retry Exhaustion
//!
//! The diagnoser's model endpoint is down. Every failure is recorded in the
//! incident's error list and sent through the error node, which retries the
//! failing stage until the retry budget (2, from the scenario's engine
//! config) is spent and then ends the run as failed.
//!
//! Pipeline walk-through for the demo run:
//!   1. Engine config is loaded from TOML: `max_retries = 2`
//!   2. Alert is classified; diagnose fails ("model endpoint timed out")
//!   3. Error node: retry 1/2, target diagnose; fails again
//!   4. Error node: retry 2/2, target diagnose; fails again
//!   5. Retry budget exhausted; terminal node closes with status failed
//!
//! [`run_with_diagnoser`] runs the same incident against any diagnoser; with
//! a diagnoser that recovers after one failure the run completes with
//! errors instead.

use std::sync::Arc;

use opsflow_audit::InMemoryAuditWriter;
use opsflow_contracts::{
    error::{OpsflowError, OpsflowResult},
    run::{RunOutcome, WorkflowInput},
};
use opsflow_core::EngineConfig;

use crate::mock_data::cpu_alert;
use crate::oracles::ScriptedDiagnoser;
use crate::scenarios::{print_audit, ScenarioReport};
use crate::wiring::ReferenceWiring;

/// Engine settings for this scenario.
pub const ENGINE_CONFIG: &str = r#"
agent_id = "opsflow-ref-ops"
max_retries = 2
recursion_limit = 40
"#;

/// Run Scenario 5: Retry Exhaustion.
pub async fn run_scenario() -> OpsflowResult<ScenarioReport> {
    println!("=== Scenario 5: Retry Exhaustion ===");
    println!();
    let report = run_with_diagnoser(ScriptedDiagnoser::failing("model endpoint timed out")).await?;
    println!("  Scenario 5 complete.");
    println!();
    Ok(report)
}

pub async fn run_with_diagnoser(diagnoser: ScriptedDiagnoser) -> OpsflowResult<ScenarioReport> {
    let config = EngineConfig::from_toml_str(ENGINE_CONFIG)?;
    println!(
        "  Engine config:          agent {}, max_retries {}",
        config.agent_id, config.max_retries
    );

    let audit = InMemoryAuditWriter::new();
    let runtime = ReferenceWiring::new(config)
        .diagnoser(diagnoser)
        .audit(Arc::new(audit.clone()))
        .build()?;

    let (state, status) = match runtime.engine.start(WorkflowInput::Alert(cpu_alert())).await? {
        RunOutcome::Completed { state, status } => (state, status),
        RunOutcome::Suspended { request, .. } => {
            return Err(OpsflowError::StateMachineError {
                reason: format!("unexpected {} request", request.kind),
            })
        }
    };

    println!("  Diagnoser calls:        {}", runtime.diagnoser.calls());
    println!("  Recorded errors:");
    for error in state.errors() {
        println!("    - {}", error);
    }
    println!("  Retries used:           {}", state.retry_count);
    println!("  Run status:             {}", status);
    let (audit_verified, audit_events) = print_audit(&audit);
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
