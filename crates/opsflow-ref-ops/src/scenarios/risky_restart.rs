//! Scenario 3: Risky Restart Approval
//!
//! A memory leak on `api-2` leads the planner to propose restarting the api
//! worker. `restart` is a denylisted verb in the ops policy, so execution
//! stops for an operator's go/no-go before any step runs.
//!
//! Pipeline walk-through for the demo run:
//!   1. Memory alert is classified as a resource incident
//!   2. Diagnosis: memory leak in api worker processes
//!   3. Plan: capture a heap dump, then `systemctl restart api-worker`
//!   4. Policy assessment: approval required ("step s2 uses 'restart'")
//!   5. Gate parks an execution-approval request with the step list
//!   6. Operator replies "rejected": no step runs, execution status is
//!      `rejected_by_operator`, and the report still records the incident
//!
//! [`run_with_reply`] replays the same incident with any reply, which is how
//! the approve and modify paths are exercised.

use std::sync::Arc;

use serde_json::json;

use opsflow_audit::InMemoryAuditWriter;
use opsflow_contracts::{
    error::{OpsflowError, OpsflowResult},
    interaction::RequestKind,
    run::{RunOutcome, WorkflowInput},
};
use opsflow_core::EngineConfig;

use crate::mock_data::memory_alert;
use crate::scenarios::{print_audit, ScenarioReport};
use crate::wiring::ReferenceWiring;

const INSTANCE_ID: &str = "inc-risky-restart";

/// Run Scenario 3: Risky Restart Approval, with the operator rejecting.
pub async fn run_scenario() -> OpsflowResult<ScenarioReport> {
    println!("=== Scenario 3: Risky Restart Approval ===");
    println!();
    let report = run_with_reply("rejected").await?;
    println!("  Scenario 3 complete.");
    println!();
    Ok(report)
}

/// Drive the memory-leak incident to the approval request and answer it
/// with `reply`.
pub async fn run_with_reply(reply: &str) -> OpsflowResult<ScenarioReport> {
    let audit = InMemoryAuditWriter::new();
    let runtime = ReferenceWiring::new(EngineConfig::default())
        .audit(Arc::new(audit.clone()))
        .build()?;
    let engine = &runtime.engine;

    let outcome = engine
        .start_checkpointed(INSTANCE_ID, WorkflowInput::Alert(memory_alert()))
        .await?;
    let (request, state) = match outcome {
        RunOutcome::Suspended { request, state, .. }
            if request.kind == RequestKind::ExecutionApproval =>
        {
            (request, state)
        }
        other => {
            return Err(OpsflowError::StateMachineError {
                reason: format!("expected an execution approval request, got {:?}", other),
            })
        }
    };

    if let Some(plan) = state.action_plan() {
        println!("  Proposed plan {} ({} risk):", plan.plan_id, plan.risk_assessment);
        for step in &plan.steps {
            println!("    {} [{}] {}", step.step_id, step.risk_level, step.command);
        }
    }
    println!("  Approval prompt:        {}", request.prompt);
    println!("  Steps run before reply: {}", runtime.runner.executed().len());
    println!("  Operator replies:       {}", reply);
    println!();

    let resumed = engine
        .resume(INSTANCE_ID, &request.id, json!({ "decision": reply }))
        .await?;
    let (state, status) = match resumed {
        RunOutcome::Completed { state, status } => (state, status),
        RunOutcome::Suspended { request, .. } => {
            return Err(OpsflowError::StateMachineError {
                reason: format!("run suspended again on {}", request.kind),
            })
        }
    };

    if let Some(execution) = state.execution_result() {
        println!("  Execution status:       {}", execution.status);
        println!("  Executed steps:         {:?}", execution.executed_steps);
        println!("  Approval received:      {}", execution.approval_received);
    }
    println!("  Commands run:           {:?}", runtime.runner.executed());
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

#[cfg(test)]
mod tests {
    use opsflow_contracts::{incident::ExecutionStatus, run::RunStatus};

    use super::*;

    #[tokio::test]
    async fn rejection_runs_no_steps() {
        let report = run_scenario().await.unwrap();
        let execution = report.state.execution_result().unwrap();

        assert_eq!(execution.status, ExecutionStatus::RejectedByOperator);
        assert!(execution.executed_steps.is_empty());
        assert!(!execution.approval_received);
        assert_eq!(execution.reason.as_deref(), Some("rejected"));
        assert!(report.executed_commands.is_empty());
        assert_eq!(report.status, RunStatus::Success);
        assert!(report.state.report().is_some());
    }

    #[tokio::test]
    async fn approval_runs_the_restart() {
        let report = run_with_reply("yes, proceed").await.unwrap();
        let execution = report.state.execution_result().unwrap();

        assert_eq!(execution.status, ExecutionStatus::Success);
        assert!(execution.approval_received);
        assert_eq!(report.executed_commands.len(), 2);
        assert!(report.executed_commands[1].contains("systemctl restart api-worker"));
    }

    #[tokio::test]
    async fn modification_replans_without_the_restart() {
        let report = run_with_reply("scale out instead of restarting").await.unwrap();
        let execution = report.state.execution_result().unwrap();

        assert_eq!(execution.status, ExecutionStatus::Success);
        assert!(report
            .executed_commands
            .iter()
            .all(|c| !c.contains("restart")));
        assert_eq!(
            report.state.context().unwrap()["operator_feedback"],
            json!("scale out instead of restarting")
        );
        let plan = report.state.action_plan().unwrap();
        assert_eq!(plan.plan_id, execution.plan_id);
    }

    #[tokio::test]
    async fn unreadable_reply_is_a_rejection() {
        let report = run_with_reply("hmm, let me think").await.unwrap();
        assert_eq!(
            report.state.execution_result().unwrap().status,
            ExecutionStatus::RejectedByOperator
        );
        assert!(report.executed_commands.is_empty());
    }
}
