//! Scenario 1: CPU Incident, End to End
//!
//! A critical CPU alert on `api-2` runs through every stage without operator
//! involvement, observed through the streaming execution mode.
//!
//! Pipeline walk-through for the demo run:
//!   1. Entry sets the alert and hints ingest-alert
//!   2. Router takes the hint; the classifier files the alert as performance
//!   3. Diagnoser answers with confidence 0.85, above the 0.7 threshold
//!   4. Planner proposes a diagnostics capture and a scale-out; both are low
//!      risk, so the ops policy clears the plan without approval
//!   5. Dry-run runner executes both steps; report is generated
//!   6. Terminal node closes with status success; audit chain is verified

use std::sync::Arc;

use futures::StreamExt;

use opsflow_audit::InMemoryAuditWriter;
use opsflow_contracts::{
    error::{OpsflowError, OpsflowResult},
    run::{StreamEvent, WorkflowInput},
};
use opsflow_core::EngineConfig;

use crate::mock_data::cpu_alert;
use crate::oracles::ScriptedDiagnoser;
use crate::scenarios::{print_audit, ScenarioReport};
use crate::wiring::ReferenceWiring;

/// Run Scenario 1: CPU Incident, End to End.
pub async fn run_scenario() -> OpsflowResult<ScenarioReport> {
    println!("=== Scenario 1: CPU Incident, End to End ===");
    println!();

    let audit = InMemoryAuditWriter::new();
    let runtime = ReferenceWiring::new(EngineConfig::default())
        .diagnoser(ScriptedDiagnoser::confident(0.85))
        .audit(Arc::new(audit.clone()))
        .build()?;

    let alert = cpu_alert();
    println!(
        "  Alert: [{}] {} (source: {})",
        alert.severity, alert.message, alert.source
    );
    println!();

    let mut events = Box::pin(runtime.engine.stream(WorkflowInput::Alert(alert)));
    let mut finished = None;

    while let Some(event) = events.next().await {
        match event? {
            StreamEvent::Transition(delta) => {
                println!("  step {:>2}: {} -> {}", delta.step, delta.from, delta.to);
                for message in &delta.new_messages {
                    println!("           {}", message.content);
                }
            }
            StreamEvent::Suspended { request, .. } => {
                return Err(OpsflowError::StateMachineError {
                    reason: format!("unexpected {} request: {}", request.kind, request.prompt),
                });
            }
            StreamEvent::Finished { status, state } => finished = Some((status, *state)),
        }
    }

    let Some((status, state)) = finished else {
        return Err(OpsflowError::StateMachineError {
            reason: "stream ended before the run finished".to_string(),
        });
    };

    println!();
    println!("  Run status:             {}", status);
    if let Some(execution) = state.execution_result() {
        println!("  Execution status:       {}", execution.status);
    }
    let (audit_verified, audit_events) = print_audit(&audit);
    println!();
    println!("  Scenario 1 complete.");
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

#[cfg(test)]
mod tests {
    use opsflow_contracts::{
        incident::ExecutionStatus,
        run::RunStatus,
        stage::{Node, Stage},
        state::MessageTag,
    };

    use super::*;

    #[tokio::test]
    async fn cpu_alert_runs_every_stage_to_success() {
        let report = run_scenario().await.unwrap();

        assert_eq!(report.status, RunStatus::Success);
        assert!(report.state.errors().is_empty());
        assert_eq!(report.diagnoser_calls, 1);
        assert_eq!(report.executed_commands.len(), 2);
        assert_eq!(
            report.state.execution_result().map(|e| e.status),
            Some(ExecutionStatus::Success)
        );
        assert!(report.state.report().is_some());
    }

    #[tokio::test]
    async fn one_summary_per_stage_each_preceded_by_its_hop() {
        let report = run_scenario().await.unwrap();
        let messages = report.state.messages();

        let summaries: Vec<(usize, Stage)> = messages
            .iter()
            .enumerate()
            .filter_map(|(i, m)| match &m.tag {
                Some(MessageTag::StageSummary { stage }) => Some((i, *stage)),
                _ => None,
            })
            .collect();
        assert_eq!(
            summaries.iter().map(|(_, s)| *s).collect::<Vec<_>>(),
            Stage::ALL.to_vec()
        );

        for (index, stage) in summaries {
            let hop = messages[..index].iter().rev().find_map(|m| match &m.tag {
                Some(MessageTag::Route { target }) => Some(*target),
                Some(MessageTag::Transition { to, .. }) => Some(*to),
                _ => None,
            });
            assert_eq!(hop, Some(Node::from(stage)), "no hop recorded before {}", stage);
        }
    }

    #[tokio::test]
    async fn audit_chain_verifies() {
        let report = run_scenario().await.unwrap();
        assert!(report.audit_verified);
        assert!(report.audit_events >= 7, "events: {}", report.audit_events);
    }
}
