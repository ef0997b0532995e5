//! # opsflow-contracts
//!
//! Shared types and contracts for the opsflow incident workflow.
//!
//! All crates in the workspace import from here. No workflow logic lives in
//! this crate, only data definitions, the Shared State record and its
//! primitives, and the error type.

pub mod error;
pub mod incident;
pub mod interaction;
pub mod oracle;
pub mod policy;
pub mod run;
pub mod stage;
pub mod state;
pub mod verify;

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use error::OpsflowError;
    use incident::{
        ActionPlan, Alert, AnalysisResult, DiagnosticResult, ExecutionResult, ExecutionStatus,
        RiskLevel, Severity,
    };
    use interaction::{HumanRequest, PendingInteraction, RequestKind};
    use run::{Checkpoint, CheckpointStatus, StateDelta};
    use stage::{Node, Stage};
    use state::{IncidentState, MessageTag, Role, Slot, SlotWrite};

    fn diagnosis(confidence: f64) -> DiagnosticResult {
        DiagnosticResult {
            root_cause: "connection pool exhaustion".to_string(),
            confidence_score: confidence,
            impact_assessment: "api latency".to_string(),
            affected_components: vec!["api".to_string()],
            business_impact: "checkout slow".to_string(),
            recovery_time_estimate: "15m".to_string(),
            evidence: vec![],
        }
    }

    fn plan() -> ActionPlan {
        ActionPlan {
            plan_id: "plan-1".to_string(),
            priority: "high".to_string(),
            estimated_duration: 10,
            risk_assessment: RiskLevel::Low,
            approval_required: false,
            steps: vec![],
            rollback_plan: vec![],
        }
    }

    // ── Symptoms and context ─────────────────────────────────────────────────

    #[test]
    fn union_symptoms_deduplicates_across_calls() {
        let mut state = IncidentState::new();
        state.union_symptoms(["a", "b"]);
        state.union_symptoms(["b", "c"]);

        let expected: BTreeSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(state.symptoms(), Some(&expected));
    }

    #[test]
    fn union_symptoms_is_order_independent() {
        let mut left = IncidentState::new();
        left.union_symptoms(["b", "c"]);
        left.union_symptoms(["a", "b"]);

        let mut right = IncidentState::new();
        right.union_symptoms(["a", "b"]);
        right.union_symptoms(["b", "c"]);

        assert_eq!(left.symptoms(), right.symptoms());
    }

    #[test]
    fn union_symptoms_skips_blank_entries() {
        let mut state = IncidentState::new();
        let added = state.union_symptoms(["  ", "", "disk full "]);
        assert_eq!(added, 1);
        assert!(state.symptoms().unwrap().contains("disk full"));
    }

    #[test]
    fn merge_context_overwrites_same_keys_and_keeps_others() {
        let mut state = IncidentState::new();
        let mut first = BTreeMap::new();
        first.insert("environment".to_string(), json!("staging"));
        first.insert("region".to_string(), json!("us-east-1"));
        state.merge_context(first);

        let mut second = BTreeMap::new();
        second.insert("environment".to_string(), json!("production"));
        state.merge_context(second);

        let ctx = state.context().unwrap();
        assert_eq!(ctx["environment"], json!("production"));
        assert_eq!(ctx["region"], json!("us-east-1"));
    }

    #[test]
    fn empty_context_merge_is_not_a_signal() {
        let mut state = IncidentState::new();
        state.merge_context(BTreeMap::new());
        assert!(state.context().is_none());
        assert!(!state.has_signal());
    }

    // ── Write-once slots ─────────────────────────────────────────────────────

    #[test]
    fn set_once_refuses_populated_slot() {
        let mut state = IncidentState::new();
        state.union_symptoms(["cpu high"]);

        assert_eq!(state.set_once(diagnosis(0.9)), SlotWrite::Written);
        assert_eq!(state.set_once(diagnosis(0.1)), SlotWrite::AlreadySet);
        assert_eq!(state.diagnostic_result().unwrap().confidence_score, 0.9);
    }

    #[test]
    fn set_once_refuses_plan_without_diagnosis() {
        let mut state = IncidentState::new();
        assert_eq!(state.set_once(plan()), SlotWrite::PreconditionMissing);
        assert!(state.action_plan().is_none());
    }

    #[test]
    fn overwrite_replaces_alert_wholesale() {
        let mut state = IncidentState::new();
        state.set_once(Alert::new(Severity::High, "first").with_metric("cpu", 0.9));
        state.overwrite(Alert::new(Severity::Low, "second"));

        let alert = state.alert().unwrap();
        assert_eq!(alert.message, "second");
        assert!(alert.metrics.is_empty(), "fields must not be merged");
    }

    #[test]
    fn clear_refuses_when_dependent_slot_is_populated() {
        let mut state = IncidentState::new();
        state.union_symptoms(["x"]);
        state.set_once(diagnosis(0.9));
        state.set_once(plan());

        assert!(!state.clear(Slot::DiagnosticResult));
        assert!(state.clear(Slot::ActionPlan));
        assert!(state.clear(Slot::DiagnosticResult));
    }

    #[test]
    fn stage_ready_tracks_prerequisites() {
        let mut state = IncidentState::new();
        assert!(!state.stage_ready(Stage::Diagnose));
        assert!(!state.stage_ready(Stage::IngestAlert));

        state.set_once(Alert::new(Severity::Critical, "CPU 95%"));
        assert!(state.stage_ready(Stage::IngestAlert));
        assert!(state.stage_ready(Stage::Diagnose));
        assert!(!state.stage_ready(Stage::PlanActions));
    }

    // ── Message log ──────────────────────────────────────────────────────────

    #[test]
    fn last_route_target_ignores_other_tags() {
        let mut state = IncidentState::new();
        state.append_tagged(
            Role::Agent,
            "routing to diagnose",
            MessageTag::Route { target: Node::Diagnose },
        );
        state.append_tagged(
            Role::Agent,
            "diagnose -> plan-actions",
            MessageTag::Transition { from: Node::Diagnose, to: Node::PlanActions },
        );
        state.append_message(Role::Human, "plan-actions please");

        assert_eq!(state.last_route_target(), Some(Node::Diagnose));
    }

    #[test]
    fn unread_human_input_respects_read_marker() {
        let mut state = IncidentState::new();
        state.append_message(Role::Human, "api is down");
        state.append_message(Role::Agent, "ack");
        assert_eq!(state.unread_human_input(), vec!["api is down".to_string()]);

        state.mark_input_read();
        assert!(state.unread_human_input().is_empty());

        state.append_message(Role::Human, "also disk full");
        assert_eq!(state.unread_human_input(), vec!["also disk full".to_string()]);
    }

    // ── Checkpoint serde ─────────────────────────────────────────────────────

    #[test]
    fn checkpoint_round_trips_every_slot() {
        let mut state = IncidentState::new();
        state.append_message(Role::Human, "CPU 95% on web-1");
        state.set_once(
            Alert::new(Severity::Critical, "CPU 95%")
                .with_metric("cpu", 0.95)
                .with_tag("prod"),
        );
        state.union_symptoms(["cpu saturation"]);
        let mut ctx = BTreeMap::new();
        ctx.insert("environment".to_string(), json!("production"));
        state.merge_context(ctx);
        state.set_once(AnalysisResult {
            category: "performance".to_string(),
            priority: "p1".to_string(),
            urgency_score: 0.9,
            root_cause_hints: vec!["runaway process".to_string()],
            recommended_actions: vec![],
        });
        state.set_once(diagnosis(0.85));
        state.set_once(plan());
        state.set_once(ExecutionResult {
            plan_id: "plan-1".to_string(),
            status: ExecutionStatus::Success,
            executed_steps: vec!["s1".to_string()],
            failed_steps: vec![],
            approval_received: false,
            reason: None,
            finished_at: Utc::now(),
        });
        state.push_error("transient");
        state.target_stage = Some(Node::GenerateReport);
        state.interaction.pending = Some(PendingInteraction {
            request: HumanRequest::new(RequestKind::OperatorInput, Node::CollectInfo, "more?"),
            memo: json!({ "k": 1 }),
        });

        let checkpoint = Checkpoint {
            instance_id: "i-1".to_string(),
            node: Node::CollectInfo,
            status: CheckpointStatus::Suspended,
            transitions: 7,
            state,
            updated_at: Utc::now(),
        };

        let json = serde_json::to_string(&checkpoint).unwrap();
        let decoded: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, checkpoint);
        assert!(decoded.pending_request().is_some());
    }

    #[test]
    fn human_request_serializes_with_type_key_and_accepts_query_alias() {
        let request = HumanRequest::new(RequestKind::ExecutionApproval, Node::ExecuteActions, "ok?");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], json!("execution_approval"));
        assert_eq!(value["prompt"], json!("ok?"));

        let mut aliased = value.clone();
        let obj = aliased.as_object_mut().unwrap();
        let prompt = obj.remove("prompt").unwrap();
        obj.insert("query".to_string(), prompt);
        let decoded: HumanRequest = serde_json::from_value(aliased).unwrap();
        assert_eq!(decoded.prompt, "ok?");
    }

    // ── StateDelta ───────────────────────────────────────────────────────────

    #[test]
    fn state_delta_reports_new_messages_and_slots() {
        let mut before = IncidentState::new();
        before.union_symptoms(["x"]);
        before.set_once(diagnosis(0.9));
        before.set_once(plan());

        let mut after = before.clone();
        after.append_message(Role::Agent, "plan rejected");
        after.clear(Slot::ActionPlan);
        after.push_error("boom");

        let delta = StateDelta::between(3, Node::ExecuteActions, Node::Router, &before, &after);
        assert_eq!(delta.new_messages.len(), 1);
        assert_eq!(delta.slots_cleared, vec![Slot::ActionPlan]);
        assert!(delta.slots_filled.is_empty());
        assert_eq!(delta.new_errors, vec!["boom".to_string()]);
    }

    // ── Stage and node names ─────────────────────────────────────────────────

    #[test]
    fn stage_parse_accepts_common_spellings() {
        assert_eq!(Stage::parse("ingest-alert"), Some(Stage::IngestAlert));
        assert_eq!(Stage::parse("process_alert"), Some(Stage::IngestAlert));
        assert_eq!(Stage::parse("Diagnose_Issue"), Some(Stage::Diagnose));
        assert_eq!(Stage::parse("teleport"), None);
        assert_eq!(Node::parse_target("collect_info"), Some(Node::CollectInfo));
        assert_eq!(Node::parse_target("plan-actions"), Some(Node::PlanActions));
    }

    // ── OpsflowError display messages ────────────────────────────────────────

    #[test]
    fn error_oracle_display() {
        let err = OpsflowError::oracle("diagnoser", "timeout");
        let msg = err.to_string();
        assert!(msg.contains("diagnoser"));
        assert!(msg.contains("timeout"));
    }

    #[test]
    fn error_step_limit_display() {
        let err = OpsflowError::StepLimitExceeded { limit: 50, node: "router".to_string() };
        let msg = err.to_string();
        assert!(msg.contains("50"));
        assert!(msg.contains("router"));
    }

    #[test]
    fn error_resume_mismatch_display() {
        let err = OpsflowError::ResumeMismatch {
            instance_id: "i-1".to_string(),
            expected: "req-a".to_string(),
            received: "req-b".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("req-a"));
        assert!(msg.contains("req-b"));
    }

    #[test]
    fn error_config_error_display() {
        let err = OpsflowError::ConfigError { reason: "bad toml".to_string() };
        let msg = err.to_string();
        assert!(msg.contains("configuration error"));
        assert!(msg.contains("bad toml"));
    }
}
