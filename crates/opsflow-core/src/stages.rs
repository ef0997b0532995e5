//! Stage handlers.
//!
//! Every handler follows the same contract:
//!
//!   Precondition → Oracle (off-thread) → Verify → [Gate] → Commit + summary
//!
//! Oracle failures and malformed outputs are caught here, appended to
//! `errors`, and reported as [`StageOutcome::Failed`]. A [`Suspension`] is
//! returned on the `Err` side and is never converted into anything else.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use opsflow_contracts::{
    error::{OpsflowError, OpsflowResult},
    incident::{
        ActionPlan, DiagnosticResult, ExecutionResult, ExecutionStatus, FailedStep,
        IncidentReport, ReportStatus,
    },
    interaction::{HumanRequest, RequestKind, Suspension},
    oracle::{ClassifierInput, DiagnoserInput, DiagnosisBasis, OracleKind, PlannerInput, ReportInput},
    policy::ApprovalDecision,
    stage::{Node, Stage},
    state::{IncidentState, MessageTag, Role, Slot, SlotValue, SlotWrite},
};

use crate::config::EngineConfig;
use crate::gate;
use crate::traits::{
    ActionPlanner, ActionRunner, AlertClassifier, ApprovalPolicy, Diagnoser, Extractor,
    OutputVerifier, ReportWriter,
};

/// What a stage asks the engine to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Output committed; continue to the stage's normal successor.
    Completed,
    /// Preconditions missing; go to information-collection.
    NeedsInfo { reason: String },
    /// Error recorded in `errors`; go to the error node.
    Failed { error: String },
    /// Hand control back to the Router.
    Reroute { reason: String },
}

pub type StageResult = Result<StageOutcome, Suspension>;

/// Result of a handler that may suspend: the outer `Result` carries the
/// suspension, the inner one an oracle-layer failure.
type GatedResult = Result<OpsflowResult<StageOutcome>, Suspension>;

/// The reasoning collaborators. The extractor is optional: without one,
/// unread free text is recorded verbatim as symptoms.
#[derive(Clone)]
pub struct Oracles {
    pub classifier: Arc<dyn AlertClassifier>,
    pub diagnoser: Arc<dyn Diagnoser>,
    pub planner: Arc<dyn ActionPlanner>,
    pub reporter: Arc<dyn ReportWriter>,
    pub extractor: Option<Arc<dyn Extractor>>,
}

/// Run a blocking collaborator call on the blocking pool and await it.
pub(crate) async fn off_thread<T, F>(label: &str, call: F) -> OpsflowResult<T>
where
    F: FnOnce() -> OpsflowResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| OpsflowError::oracle(label, format!("worker task failed: {}", e)))?
}

pub struct StageHandlers {
    oracles: Oracles,
    runner: Arc<dyn ActionRunner>,
    policy: Arc<dyn ApprovalPolicy>,
    verifier: Option<Arc<dyn OutputVerifier>>,
    config: EngineConfig,
}

impl StageHandlers {
    pub fn new(
        oracles: Oracles,
        runner: Arc<dyn ActionRunner>,
        policy: Arc<dyn ApprovalPolicy>,
        verifier: Option<Arc<dyn OutputVerifier>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            oracles,
            runner,
            policy,
            verifier,
            config,
        }
    }

    pub(crate) fn extractor(&self) -> Option<Arc<dyn Extractor>> {
        self.oracles.extractor.clone()
    }

    /// Run one stage against `state`.
    pub async fn run(&self, stage: Stage, state: &mut IncidentState) -> StageResult {
        // A stage reached again after committing (e.g. through an extractor
        // hint) does nothing and lets the Router pick again.
        if state.stage_done(stage) {
            debug!(stage = %stage, "stage already complete for this pass");
            return Ok(StageOutcome::Reroute {
                reason: format!("{} already complete", stage),
            });
        }

        let outcome = match stage {
            Stage::IngestAlert => self.ingest_alert(state).await,
            Stage::Diagnose => self.diagnose(state).await?,
            Stage::PlanActions => self.plan_actions(state).await,
            Stage::ExecuteActions => self.execute_actions(state).await?,
            Stage::GenerateReport => self.generate_report(state).await,
        };

        // ── Failure boundary ─────────────────────────────────────────────────
        match outcome {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let error = format!("{}: {}", stage, e);
                warn!(
                    incident_id = %state.incident_id(),
                    stage = %stage,
                    error = %e,
                    "stage failed"
                );
                state.push_error(error.clone());
                state.failed_stage = Some(stage);
                Ok(StageOutcome::Failed { error })
            }
        }
    }

    /// Information-collection: ask the operator for whatever the last
    /// redirect said was missing. Completes once an answer has arrived.
    pub fn collect_info(&self, state: &mut IncidentState) -> Result<(), Suspension> {
        if gate::take_answer(state, Node::CollectInfo).is_some() {
            // Left unread so the Router extracts from it.
            return Ok(());
        }
        let prompt = state
            .messages()
            .iter()
            .rev()
            .find(|m| matches!(m.tag, Some(MessageTag::InfoRequest)))
            .map(|m| format!("{} Please provide the missing details.", m.content))
            .unwrap_or_else(|| {
                "Describe the incident: affected service, symptoms, and any alert details."
                    .to_string()
            });
        let request = HumanRequest::new(RequestKind::OperatorInput, Node::CollectInfo, prompt)
            .with_context("has_alert", json!(state.alert().is_some()))
            .with_context(
                "symptom_count",
                json!(state.symptoms().map_or(0, |s| s.len())),
            );
        Err(gate::suspend(request, Value::Null))
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    pub(crate) fn verify<T: Serialize>(&self, oracle: OracleKind, output: &T) -> OpsflowResult<()> {
        let Some(verifier) = &self.verifier else {
            return Ok(());
        };
        let value = serde_json::to_value(output).map_err(|e| OpsflowError::MalformedResult {
            oracle: oracle.to_string(),
            reason: format!("output is not serializable: {}", e),
        })?;
        let report = verifier.verify(oracle, &value)?;
        if !report.passed {
            return Err(OpsflowError::MalformedResult {
                oracle: oracle.to_string(),
                reason: report.summary(),
            });
        }
        Ok(())
    }

    fn commit(
        &self,
        state: &mut IncidentState,
        stage: Stage,
        value: impl Into<SlotValue>,
        summary: String,
    ) -> OpsflowResult<StageOutcome> {
        match state.set_once(value) {
            SlotWrite::Written => {
                info!(
                    incident_id = %state.incident_id(),
                    stage = %stage,
                    "stage committed"
                );
                state.append_tagged(Role::Agent, summary, MessageTag::StageSummary { stage });
                Ok(StageOutcome::Completed)
            }
            SlotWrite::AlreadySet => Ok(StageOutcome::Reroute {
                reason: format!("{} output already present", stage),
            }),
            SlotWrite::PreconditionMissing => Err(OpsflowError::PreconditionMissing {
                stage: stage.to_string(),
                reason: "prerequisite slot vanished before commit".to_string(),
            }),
        }
    }

    fn needs_info(state: &IncidentState, stage: Stage, reason: &str) -> StageOutcome {
        warn!(
            incident_id = %state.incident_id(),
            stage = %stage,
            reason = %reason,
            "precondition missing, redirecting to information collection"
        );
        StageOutcome::NeedsInfo {
            reason: reason.to_string(),
        }
    }

    // ── ingest-alert ─────────────────────────────────────────────────────────

    async fn ingest_alert(&self, state: &mut IncidentState) -> OpsflowResult<StageOutcome> {
        let Some(alert) = state.alert() else {
            return Ok(Self::needs_info(
                state,
                Stage::IngestAlert,
                "Alert classification needs a structured alert.",
            ));
        };
        let input = ClassifierInput::from(alert);

        let classifier = self.oracles.classifier.clone();
        let analysis =
            off_thread(OracleKind::AlertClassifier.as_str(), move || classifier.classify(&input)).await?;
        self.verify(OracleKind::AlertClassifier, &analysis)?;

        let summary = format!(
            "Alert classified as {} (priority {}, urgency {:.2}).",
            analysis.category, analysis.priority, analysis.urgency_score
        );
        self.commit(state, Stage::IngestAlert, analysis, summary)
    }

    // ── diagnose ─────────────────────────────────────────────────────────────

    fn diagnoser_input(state: &IncidentState, supplementary: Option<String>) -> DiagnoserInput {
        let basis = match state.analysis_result() {
            Some(analysis) => DiagnosisBasis::Analysis {
                analysis: analysis.clone(),
            },
            None => DiagnosisBasis::Signals {
                alert: state.alert().cloned(),
                symptoms: state.symptoms().cloned().unwrap_or_default(),
            },
        };
        let system_metrics = state.alert().map(|a| a.metrics.clone()).unwrap_or_default();
        let context = state.context().cloned().unwrap_or_default();
        let log_entries = context
            .get("log_entries")
            .and_then(Value::as_array)
            .map(|lines| {
                lines
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        DiagnoserInput {
            basis,
            system_metrics,
            log_entries,
            topology_info: context,
            supplementary,
        }
    }

    async fn call_diagnoser(&self, input: DiagnoserInput) -> OpsflowResult<DiagnosticResult> {
        let diagnoser = self.oracles.diagnoser.clone();
        let result = off_thread(OracleKind::Diagnoser.as_str(), move || diagnoser.diagnose(&input)).await?;
        self.verify(OracleKind::Diagnoser, &result)?;
        Ok(result)
    }

    fn diagnosis_summary(result: &DiagnosticResult, note: &str) -> String {
        format!(
            "Diagnosis{}: {} (confidence {:.2}); affected: {}.",
            note,
            result.root_cause,
            result.confidence_score,
            if result.affected_components.is_empty() {
                "unknown".to_string()
            } else {
                result.affected_components.join(", ")
            }
        )
    }

    async fn diagnose(&self, state: &mut IncidentState) -> GatedResult {
        // ── Resumed after a clarification request ────────────────────────────
        if let Some(answer) = gate::take_answer(state, Node::Diagnose) {
            state.mark_input_read();
            let preliminary: DiagnosticResult =
                match serde_json::from_value(answer.memo["preliminary"].clone()) {
                    Ok(result) => result,
                    Err(e) => {
                        return Ok(Err(OpsflowError::StateMachineError {
                            reason: format!("clarification memo unreadable: {}", e),
                        }))
                    }
                };

            if answer.text.is_empty() {
                info!(
                    incident_id = %state.incident_id(),
                    "no supplementary information; accepting preliminary diagnosis"
                );
                let summary = Self::diagnosis_summary(&preliminary, " (preliminary, accepted)");
                return Ok(self.commit(state, Stage::Diagnose, preliminary, summary));
            }

            // Exactly one re-attempt with the enriched input.
            let input = Self::diagnoser_input(state, Some(answer.text));
            let result = match self.call_diagnoser(input).await {
                Ok(result) => result,
                Err(e) => return Ok(Err(e)),
            };
            let summary = Self::diagnosis_summary(&result, " (after clarification)");
            return Ok(self.commit(state, Stage::Diagnose, result, summary));
        }

        // ── First attempt ────────────────────────────────────────────────────
        if !state.stage_ready(Stage::Diagnose) {
            return Ok(Ok(Self::needs_info(
                state,
                Stage::Diagnose,
                "Diagnosis needs an alert, symptoms, or operational context.",
            )));
        }

        let input = Self::diagnoser_input(state, None);
        let result = match self.call_diagnoser(input).await {
            Ok(result) => result,
            Err(e) => return Ok(Err(e)),
        };

        let threshold = self.config.diagnosis_confidence_threshold;
        if result.confidence_score < threshold {
            warn!(
                incident_id = %state.incident_id(),
                confidence = result.confidence_score,
                threshold,
                "low diagnosis confidence, requesting supplementary information"
            );
            let prompt = format!(
                "Diagnosis confidence {:.2} is below {:.2}. Preliminary root cause: {}. \
                 Share any extra metrics, logs or recent changes, or reply empty to accept.",
                result.confidence_score, threshold, result.root_cause
            );
            let request = HumanRequest::new(RequestKind::Clarification, Node::Diagnose, prompt)
                .with_context("confidence", json!(result.confidence_score))
                .with_context("root_cause", json!(result.root_cause));
            let memo = match serde_json::to_value(&result) {
                Ok(value) => json!({ "preliminary": value }),
                Err(e) => {
                    return Ok(Err(OpsflowError::MalformedResult {
                        oracle: OracleKind::Diagnoser.to_string(),
                        reason: e.to_string(),
                    }))
                }
            };
            return Err(gate::suspend(request, memo));
        }

        let summary = Self::diagnosis_summary(&result, "");
        Ok(self.commit(state, Stage::Diagnose, result, summary))
    }

    // ── plan-actions ─────────────────────────────────────────────────────────

    async fn plan_actions(&self, state: &mut IncidentState) -> OpsflowResult<StageOutcome> {
        let Some(diagnosis) = state.diagnostic_result() else {
            return Ok(Self::needs_info(
                state,
                Stage::PlanActions,
                "Action planning needs a diagnosis.",
            ));
        };
        let input = PlannerInput {
            diagnosis: diagnosis.clone(),
            system_context: state.context().cloned().unwrap_or_default(),
        };

        let planner = self.oracles.planner.clone();
        let plan = off_thread(OracleKind::ActionPlanner.as_str(), move || planner.plan(&input)).await?;
        self.verify(OracleKind::ActionPlanner, &plan)?;

        let summary = format!(
            "Action plan {}: {} step(s), risk {}, ~{} min.",
            plan.plan_id,
            plan.steps.len(),
            plan.risk_assessment,
            plan.estimated_duration
        );
        self.commit(state, Stage::PlanActions, plan, summary)
    }

    // ── execute-actions ──────────────────────────────────────────────────────

    async fn execute_actions(&self, state: &mut IncidentState) -> GatedResult {
        // ── Resumed after an approval request ────────────────────────────────
        if let Some(answer) = gate::take_answer(state, Node::ExecuteActions) {
            state.mark_input_read();
            let Some(plan) = state.action_plan().cloned() else {
                return Ok(Err(OpsflowError::PreconditionMissing {
                    stage: Stage::ExecuteActions.to_string(),
                    reason: "action plan disappeared while awaiting approval".to_string(),
                }));
            };
            let decision = self.policy.interpret(&answer.text);
            info!(
                incident_id = %state.incident_id(),
                plan_id = %plan.plan_id,
                decision = ?decision,
                "operator decision received"
            );
            return Ok(match decision {
                ApprovalDecision::Rejected => {
                    let result = ExecutionResult {
                        plan_id: plan.plan_id.clone(),
                        status: ExecutionStatus::RejectedByOperator,
                        executed_steps: vec![],
                        failed_steps: vec![],
                        approval_received: false,
                        reason: Some(answer.text.clone()),
                        finished_at: Utc::now(),
                    };
                    let summary = format!(
                        "Plan {} rejected by operator; no steps executed.",
                        plan.plan_id
                    );
                    self.commit(state, Stage::ExecuteActions, result, summary)
                }
                ApprovalDecision::ModificationRequested => {
                    Ok(Self::request_modification(state, &plan, answer.text))
                }
                ApprovalDecision::Approved => self.run_plan(state, plan, true).await,
            });
        }

        // ── First attempt ────────────────────────────────────────────────────
        let Some(plan) = state.action_plan().cloned() else {
            return Ok(Ok(Self::needs_info(
                state,
                Stage::ExecuteActions,
                "Execution needs an action plan.",
            )));
        };

        let verdict = self.policy.assess(&plan);
        if verdict.approval_required {
            let steps: Vec<Value> = plan
                .steps
                .iter()
                .map(|s| {
                    json!({
                        "step_id": s.step_id,
                        "action_type": s.action_type,
                        "command": s.command,
                        "risk_level": s.risk_level,
                    })
                })
                .collect();
            let prompt = format!(
                "Plan {} needs approval before execution ({}). Reply approved, rejected, or \
                 describe the changes you want.",
                plan.plan_id,
                verdict.reasons.join("; ")
            );
            let request =
                HumanRequest::new(RequestKind::ExecutionApproval, Node::ExecuteActions, prompt)
                    .with_context("plan_id", json!(plan.plan_id))
                    .with_context("reasons", json!(verdict.reasons))
                    .with_context("steps", Value::Array(steps));
            return Err(gate::suspend(request, Value::Null));
        }

        if !self.config.auto_execution {
            let result = ExecutionResult {
                plan_id: plan.plan_id.clone(),
                status: ExecutionStatus::ManualApprovalRequired,
                executed_steps: vec![],
                failed_steps: vec![],
                approval_received: false,
                reason: Some("automatic execution is disabled".to_string()),
                finished_at: Utc::now(),
            };
            let summary = format!(
                "Plan {} recorded for manual execution; automatic execution is disabled.",
                plan.plan_id
            );
            return Ok(self.commit(state, Stage::ExecuteActions, result, summary));
        }

        Ok(self.run_plan(state, plan, false).await)
    }

    fn request_modification(state: &mut IncidentState, plan: &ActionPlan, text: String) -> StageOutcome {
        state.clear(Slot::ActionPlan);
        let mut feedback = BTreeMap::new();
        feedback.insert("operator_feedback".to_string(), Value::String(text.clone()));
        state.merge_context(feedback);
        state.target_stage = Some(Node::PlanActions);
        state.append_message(
            Role::Agent,
            format!("Operator asked to revise plan {}: {}", plan.plan_id, text),
        );
        StageOutcome::Reroute {
            reason: "operator requested plan modification".to_string(),
        }
    }

    async fn run_plan(
        &self,
        state: &mut IncidentState,
        plan: ActionPlan,
        approval_received: bool,
    ) -> OpsflowResult<StageOutcome> {
        let mut executed_steps = vec![];
        let mut failed_steps = vec![];

        for step in &plan.steps {
            let runner = self.runner.clone();
            let owned = step.clone();
            match off_thread("action-runner", move || runner.run_step(&owned)).await {
                Ok(note) => {
                    debug!(step_id = %step.step_id, note = %note, "step executed");
                    executed_steps.push(step.step_id.clone());
                }
                Err(e) => {
                    warn!(step_id = %step.step_id, error = %e, "step failed");
                    failed_steps.push(FailedStep {
                        step_id: step.step_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let status = match (executed_steps.is_empty(), failed_steps.is_empty()) {
            (_, true) => ExecutionStatus::Success,
            (true, false) => ExecutionStatus::Failed,
            (false, false) => ExecutionStatus::Partial,
        };
        let summary = format!(
            "Executed plan {}: {} ({} ok, {} failed).",
            plan.plan_id,
            status,
            executed_steps.len(),
            failed_steps.len()
        );
        let result = ExecutionResult {
            plan_id: plan.plan_id,
            status,
            executed_steps,
            failed_steps,
            approval_received,
            reason: None,
            finished_at: Utc::now(),
        };
        self.commit(state, Stage::ExecuteActions, result, summary)
    }

    // ── generate-report ──────────────────────────────────────────────────────

    async fn generate_report(&self, state: &mut IncidentState) -> OpsflowResult<StageOutcome> {
        if state.execution_result().is_none() {
            return Ok(Self::needs_info(
                state,
                Stage::GenerateReport,
                "Reporting needs an execution result.",
            ));
        }
        let title = format!(
            "{} incident report: {}",
            self.config.agent_id,
            state
                .alert()
                .map(|a| a.message.clone())
                .or_else(|| state.diagnostic_result().map(|d| d.root_cause.clone()))
                .unwrap_or_else(|| state.incident_id().to_string())
        );

        if !self.config.enable_reporting {
            let report = IncidentReport {
                incident_id: state.incident_id().to_string(),
                title,
                summary: "reporting disabled".to_string(),
                key_findings: vec![],
                recommendations: vec![],
                status: ReportStatus::Disabled,
                generated_at: Utc::now(),
            };
            return self.commit(
                state,
                Stage::GenerateReport,
                report,
                "Reporting is disabled; no report generated.".to_string(),
            );
        }

        let input = ReportInput::render(
            state.alert(),
            state.diagnostic_result(),
            state.action_plan(),
            state.execution_result(),
        );
        let reporter = self.oracles.reporter.clone();
        let draft = off_thread(OracleKind::ReportWriter.as_str(), move || reporter.write_report(&input)).await?;
        self.verify(OracleKind::ReportWriter, &draft)?;

        let summary = format!(
            "Report generated: {} finding(s), {} recommendation(s).",
            draft.key_findings.len(),
            draft.recommendations.len()
        );
        let report = IncidentReport {
            incident_id: state.incident_id().to_string(),
            title,
            summary: draft.report_summary,
            key_findings: draft.key_findings,
            recommendations: draft.recommendations,
            status: ReportStatus::Generated,
            generated_at: Utc::now(),
        };
        self.commit(state, Stage::GenerateReport, report, summary)
    }
}


// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use opsflow_contracts::{
        incident::{ActionStep, Alert, AnalysisResult, RiskLevel, Severity},
        oracle::ReportDraft,
        policy::RiskVerdict,
    };

    use super::*;

    /// How many times each oracle was called.
    #[derive(Default)]
    struct Counts {
        classify: AtomicU32,
        diagnose: AtomicU32,
        plan: AtomicU32,
        executed: Mutex<Vec<String>>,
    }

    struct Classifier(Arc<Counts>, bool);

    impl AlertClassifier for Classifier {
        fn classify(&self, _input: &ClassifierInput) -> OpsflowResult<AnalysisResult> {
            self.0.classify.fetch_add(1, Ordering::SeqCst);
            if self.1 {
                return Err(OpsflowError::oracle("alert-classifier", "model unavailable"));
            }
            Ok(AnalysisResult {
                category: "performance".to_string(),
                priority: "p1".to_string(),
                urgency_score: 0.9,
                root_cause_hints: vec![],
                recommended_actions: vec![],
            })
        }
    }

    struct FixedDiagnoser(Arc<Counts>, f64);

    impl Diagnoser for FixedDiagnoser {
        fn diagnose(&self, _input: &DiagnoserInput) -> OpsflowResult<DiagnosticResult> {
            self.0.diagnose.fetch_add(1, Ordering::SeqCst);
            Ok(diagnosis(self.1))
        }
    }

    struct Planner(Arc<Counts>);

    impl ActionPlanner for Planner {
        fn plan(&self, _input: &PlannerInput) -> OpsflowResult<ActionPlan> {
            self.0.plan.fetch_add(1, Ordering::SeqCst);
            Ok(plan(RiskLevel::Low))
        }
    }

    struct Reporter;

    impl ReportWriter for Reporter {
        fn write_report(&self, input: &ReportInput) -> OpsflowResult<ReportDraft> {
            Ok(ReportDraft {
                report_summary: input.incident_summary.clone(),
                key_findings: vec![],
                recommendations: vec![],
            })
        }
    }

    /// Fails any step whose id equals the configured one.
    struct Runner(Arc<Counts>, Option<&'static str>);

    impl ActionRunner for Runner {
        fn run_step(&self, step: &ActionStep) -> OpsflowResult<String> {
            if self.1 == Some(step.step_id.as_str()) {
                return Err(OpsflowError::oracle("action-runner", "connection refused"));
            }
            self.0.executed.lock().unwrap().push(step.step_id.clone());
            Ok("ok".to_string())
        }
    }

    /// Critical steps need approval; "yes" approves, anything else rejects.
    struct Policy;

    impl ApprovalPolicy for Policy {
        fn assess(&self, plan: &ActionPlan) -> RiskVerdict {
            if plan.steps.iter().any(|s| s.risk_level == RiskLevel::Critical) {
                RiskVerdict {
                    approval_required: true,
                    reasons: vec!["critical step".to_string()],
                }
            } else {
                RiskVerdict::cleared()
            }
        }

        fn interpret(&self, reply: &str) -> ApprovalDecision {
            if reply == "yes" {
                ApprovalDecision::Approved
            } else {
                ApprovalDecision::Rejected
            }
        }
    }

    fn diagnosis(confidence: f64) -> DiagnosticResult {
        DiagnosticResult {
            root_cause: "connection pool exhausted".to_string(),
            confidence_score: confidence,
            impact_assessment: "checkout errors".to_string(),
            affected_components: vec!["api-1".to_string()],
            business_impact: "orders failing".to_string(),
            recovery_time_estimate: "20m".to_string(),
            evidence: vec![],
        }
    }

    fn plan(risk: RiskLevel) -> ActionPlan {
        let step = |id: &str, risk| ActionStep {
            step_id: id.to_string(),
            action_type: "scale_resources".to_string(),
            description: format!("step {}", id),
            command: format!("kubectl scale {}", id),
            risk_level: risk,
        };
        ActionPlan {
            plan_id: "plan-t".to_string(),
            priority: "high".to_string(),
            estimated_duration: 5,
            risk_assessment: risk,
            approval_required: false,
            steps: vec![step("s1", RiskLevel::Low), step("s2", risk)],
            rollback_plan: vec![],
        }
    }

    struct Fixture {
        failing_classifier: bool,
        confidence: f64,
        failing_step: Option<&'static str>,
    }

    impl Default for Fixture {
        fn default() -> Self {
            Self {
                failing_classifier: false,
                confidence: 0.9,
                failing_step: None,
            }
        }
    }

    fn handlers(fixture: Fixture) -> (StageHandlers, Arc<Counts>) {
        let counts = Arc::new(Counts::default());
        let oracles = Oracles {
            classifier: Arc::new(Classifier(counts.clone(), fixture.failing_classifier)),
            diagnoser: Arc::new(FixedDiagnoser(counts.clone(), fixture.confidence)),
            planner: Arc::new(Planner(counts.clone())),
            reporter: Arc::new(Reporter),
            extractor: None,
        };
        let handlers = StageHandlers::new(
            oracles,
            Arc::new(Runner(counts.clone(), fixture.failing_step)),
            Arc::new(Policy),
            None,
            EngineConfig::default(),
        );
        (handlers, counts)
    }

    /// Alert, diagnosis and a plan of the given risk.
    fn planned_state(risk: RiskLevel) -> IncidentState {
        let mut state = IncidentState::new();
        state.set_once(Alert::new(Severity::Critical, "5xx rate 40% on checkout"));
        state.set_once(diagnosis(0.9));
        state.set_once(plan(risk));
        state
    }

    // ── Preconditions ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn every_stage_redirects_on_an_empty_state() {
        let (handlers, counts) = handlers(Fixture::default());
        for stage in Stage::ALL {
            let mut state = IncidentState::new();
            match handlers.run(stage, &mut state).await {
                Ok(StageOutcome::NeedsInfo { reason }) => assert!(!reason.is_empty()),
                other => panic!("expected NeedsInfo for {}, got {:?}", stage, other),
            }
            assert!(state.errors().is_empty());
        }
        assert_eq!(counts.classify.load(Ordering::SeqCst), 0);
        assert_eq!(counts.diagnose.load(Ordering::SeqCst), 0);
        assert_eq!(counts.plan.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn committed_stage_reroutes_without_calling_its_oracle() {
        let (handlers, counts) = handlers(Fixture::default());
        let mut state = IncidentState::new();
        state.set_once(Alert::new(Severity::High, "CPU 95% on api-2"));
        assert_eq!(
            handlers.run(Stage::IngestAlert, &mut state).await,
            Ok(StageOutcome::Completed)
        );

        match handlers.run(Stage::IngestAlert, &mut state).await {
            Ok(StageOutcome::Reroute { reason }) => assert!(reason.contains("already complete")),
            other => panic!("expected Reroute, got {:?}", other),
        }
        assert_eq!(counts.classify.load(Ordering::SeqCst), 1);
    }

    // ── Failure boundary ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn oracle_failure_is_recorded_against_the_stage() {
        let (handlers, _) = handlers(Fixture {
            failing_classifier: true,
            ..Fixture::default()
        });
        let mut state = IncidentState::new();
        state.set_once(Alert::new(Severity::High, "CPU 95% on api-2"));

        match handlers.run(Stage::IngestAlert, &mut state).await {
            Ok(StageOutcome::Failed { error }) => assert!(error.contains("model unavailable")),
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(state.errors().len(), 1);
        assert_eq!(state.failed_stage, Some(Stage::IngestAlert));
        assert!(state.analysis_result().is_none());
    }

    // ── Diagnose ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn low_confidence_suspends_with_the_preliminary_result() {
        let (handlers, counts) = handlers(Fixture {
            confidence: 0.4,
            ..Fixture::default()
        });
        let mut state = IncidentState::new();
        state.union_symptoms(["checkout timing out"]);

        match handlers.run(Stage::Diagnose, &mut state).await {
            Err(suspension) => {
                assert_eq!(suspension.request.kind, RequestKind::Clarification);
                assert_eq!(suspension.request.node, Node::Diagnose);
                assert_eq!(suspension.memo["preliminary"]["confidence_score"], json!(0.4));
            }
            other => panic!("expected a suspension, got {:?}", other),
        }
        assert!(state.diagnostic_result().is_none());
        assert_eq!(counts.diagnose.load(Ordering::SeqCst), 1);
    }

    // ── Execute ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn risky_plan_suspends_before_any_step_runs() {
        let (handlers, counts) = handlers(Fixture::default());
        let mut state = planned_state(RiskLevel::Critical);

        match handlers.run(Stage::ExecuteActions, &mut state).await {
            Err(suspension) => {
                assert_eq!(suspension.request.kind, RequestKind::ExecutionApproval);
                assert_eq!(suspension.request.context["plan_id"], json!("plan-t"));
            }
            other => panic!("expected a suspension, got {:?}", other),
        }
        assert!(counts.executed.lock().unwrap().is_empty());
        assert!(state.execution_result().is_none());
    }

    #[tokio::test]
    async fn approval_answer_runs_the_plan() {
        let (handlers, counts) = handlers(Fixture::default());
        let mut state = planned_state(RiskLevel::Critical);
        let suspension = match handlers.run(Stage::ExecuteActions, &mut state).await {
            Err(suspension) => suspension,
            other => panic!("expected a suspension, got {:?}", other),
        };
        let request = gate::park(&mut state, suspension).unwrap();
        gate::deliver(&mut state, "inc-t", &request.id, &json!("yes")).unwrap();

        assert_eq!(
            handlers.run(Stage::ExecuteActions, &mut state).await,
            Ok(StageOutcome::Completed)
        );
        let execution = state.execution_result().unwrap();
        assert!(execution.approval_received);
        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(*counts.executed.lock().unwrap(), vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn failing_step_gives_partial_execution() {
        let (handlers, counts) = handlers(Fixture {
            failing_step: Some("s2"),
            ..Fixture::default()
        });
        let mut state = planned_state(RiskLevel::Low);

        assert_eq!(
            handlers.run(Stage::ExecuteActions, &mut state).await,
            Ok(StageOutcome::Completed)
        );
        let execution = state.execution_result().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Partial);
        assert_eq!(execution.executed_steps, vec!["s1".to_string()]);
        assert_eq!(execution.failed_steps[0].step_id, "s2");
        assert!(execution.failed_steps[0].error.contains("connection refused"));
        assert_eq!(*counts.executed.lock().unwrap(), vec!["s1"]);
    }

    #[test]
    fn modification_clears_the_plan_and_targets_the_planner() {
        let mut state = planned_state(RiskLevel::Critical);
        let plan = state.action_plan().cloned().unwrap();

        let outcome =
            StageHandlers::request_modification(&mut state, &plan, "drain api-1 first".to_string());

        assert!(matches!(outcome, StageOutcome::Reroute { .. }));
        assert!(state.action_plan().is_none());
        assert!(state.diagnostic_result().is_some());
        assert_eq!(state.target_stage, Some(Node::PlanActions));
        assert_eq!(
            state.context().unwrap()["operator_feedback"],
            json!("drain api-1 first")
        );
        let last = state.messages().last().unwrap();
        assert!(last.content.contains("plan-t"));
    }

    // ── Information collection ───────────────────────────────────────────────

    #[test]
    fn collect_info_prompt_comes_from_the_latest_redirect() {
        let (handlers, _) = handlers(Fixture::default());
        let mut state = IncidentState::new();
        state.append_tagged(Role::Agent, "Diagnosis needs an alert.", MessageTag::InfoRequest);
        state.append_tagged(Role::Agent, "Execution needs an action plan.", MessageTag::InfoRequest);
        state.append_message(Role::Agent, "unrelated narration");

        let suspension = match handlers.collect_info(&mut state) {
            Err(suspension) => suspension,
            other => panic!("expected a suspension, got {:?}", other),
        };
        assert_eq!(suspension.request.kind, RequestKind::OperatorInput);
        assert_eq!(suspension.request.node, Node::CollectInfo);
        assert!(suspension
            .request
            .prompt
            .starts_with("Execution needs an action plan."));
        assert_eq!(suspension.request.context["has_alert"], json!(false));
    }

    #[test]
    fn collect_info_without_a_redirect_asks_generically() {
        let (handlers, _) = handlers(Fixture::default());
        let mut state = IncidentState::new();
        match handlers.collect_info(&mut state) {
            Err(suspension) => assert!(suspension.request.prompt.starts_with("Describe the incident")),
            other => panic!("expected a suspension, got {:?}", other),
        }
    }

    #[test]
    fn collect_info_completes_once_answered_and_leaves_the_reply_unread() {
        let (handlers, _) = handlers(Fixture::default());
        let mut state = IncidentState::new();
        let suspension = match handlers.collect_info(&mut state) {
            Err(suspension) => suspension,
            other => panic!("expected a suspension, got {:?}", other),
        };
        let request = gate::park(&mut state, suspension).unwrap();
        gate::deliver(&mut state, "inc-t", &request.id, &json!({ "input": "api-1 is down" })).unwrap();

        assert!(handlers.collect_info(&mut state).is_ok());
        assert_eq!(state.unread_human_input(), vec!["api-1 is down".to_string()]);
    }
}
