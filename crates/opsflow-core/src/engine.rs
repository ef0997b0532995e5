//! The workflow engine: a resumable graph driver.
//!
//! Graph:
//!
//! ```text
//!   Entry → Router ─┬→ <stage> ─┬→ normal successor
//!                   │           ├→ CollectInfo → Router
//!                   │           ├→ ErrorHandler ─┬→ Router   (retry)
//!                   │           │                └→ Terminal (give up)
//!                   │           └→ Router        (reroute)
//!                   ├→ CollectInfo
//!                   └→ Terminal
//! ```
//!
//! Every hop is counted against `recursion_limit`, written to the audit
//! log, and narrated in the message log. A node that needs a human returns a
//! suspension; the engine parks it, saves a checkpoint, and returns
//! [`RunOutcome::Suspended`]. [`WorkflowEngine::resume`] reloads the
//! checkpoint and re-enters the same node with the answer.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, Stream};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use opsflow_contracts::{
    error::{OpsflowError, OpsflowResult},
    interaction::{HumanRequest, Suspension},
    oracle::{ExtractorInput, OracleKind},
    run::{
        Checkpoint, CheckpointStatus, RunOutcome, RunStatus, StateDelta, StreamEvent,
        TransitionRecord, WorkflowInput,
    },
    stage::{Node, Stage},
    state::{IncidentState, MessageTag, Role},
};

use crate::checkpoint::InMemoryCheckpointStore;
use crate::config::EngineConfig;
use crate::gate;
use crate::router::{apply_extraction, Router};
use crate::stages::{off_thread, Oracles, StageHandlers, StageOutcome};
use crate::traits::{
    ActionPlanner, ActionRunner, AlertClassifier, ApprovalPolicy, AuditWriter, CheckpointStore,
    Diagnoser, Extractor, OutputVerifier, ReportWriter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Persistence {
    /// Save only when the run suspends.
    OnSuspend,
    /// Save after every transition and at the end.
    EveryTransition,
}

/// One invocation's view of an instance.
struct Run {
    instance_id: String,
    state: IncidentState,
    /// Node to execute next.
    node: Node,
    /// Node the last transition came from.
    prev: Node,
    /// Transitions across all invocations of this instance.
    transitions: u64,
    /// Transitions in this invocation; bounded by `recursion_limit`.
    budget_used: u64,
    persistence: Persistence,
}

impl Run {
    fn new(instance_id: String, state: IncidentState, persistence: Persistence) -> Self {
        Self {
            instance_id,
            state,
            node: Node::Entry,
            prev: Node::Entry,
            transitions: 0,
            budget_used: 0,
            persistence,
        }
    }
}

enum Advance {
    Moved,
    Suspended(HumanRequest),
    Finished(RunStatus),
}

pub struct WorkflowEngine {
    config: EngineConfig,
    router: Router,
    stages: StageHandlers,
    audit: Option<Arc<dyn AuditWriter>>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl WorkflowEngine {
    pub fn builder(config: EngineConfig) -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Execution modes ──────────────────────────────────────────────────────

    /// Run to completion or first suspension. The instance is checkpointed
    /// only if it suspends.
    pub async fn start(&self, input: WorkflowInput) -> OpsflowResult<RunOutcome> {
        let state = normalize_input(input)?;
        let run = Run::new(uuid::Uuid::new_v4().to_string(), state, Persistence::OnSuspend);
        self.drive(run).await
    }

    /// Like [`start`](Self::start) under a caller-chosen id, checkpointing
    /// after every transition.
    pub async fn start_checkpointed(
        &self,
        instance_id: &str,
        input: WorkflowInput,
    ) -> OpsflowResult<RunOutcome> {
        if self.checkpoints.load(instance_id).await?.is_some() {
            return Err(OpsflowError::StateMachineError {
                reason: format!("instance '{}' already exists", instance_id),
            });
        }
        let state = normalize_input(input)?;
        let run = Run::new(instance_id.to_string(), state, Persistence::EveryTransition);
        self.save(&run, CheckpointStatus::Running).await?;
        self.drive(run).await
    }

    /// Deliver an operator's reply to a suspended instance and continue it.
    ///
    /// The instance is claimed from the checkpoint store before anything
    /// else runs: the claim checks the request id and flips the checkpoint
    /// to `Running` in one step, so a duplicate or concurrent resume gets
    /// `NotSuspended` and changes nothing.
    pub async fn resume(
        &self,
        instance_id: &str,
        request_id: &str,
        payload: Value,
    ) -> OpsflowResult<RunOutcome> {
        let checkpoint = self.checkpoints.claim(instance_id, request_id).await?;

        let mut state = checkpoint.state.clone();
        let node = match gate::deliver(&mut state, instance_id, request_id, &payload) {
            Ok(node) => node,
            Err(e) => {
                self.checkpoints
                    .save(&Checkpoint {
                        status: CheckpointStatus::Suspended,
                        ..checkpoint
                    })
                    .await?;
                return Err(e);
            }
        };

        info!(
            instance_id = %instance_id,
            request_id = %request_id,
            node = %node,
            "resuming workflow"
        );

        let run = Run {
            instance_id: instance_id.to_string(),
            state,
            node,
            prev: node,
            transitions: checkpoint.transitions,
            budget_used: 0,
            persistence: Persistence::EveryTransition,
        };
        self.save(&run, CheckpointStatus::Running).await?;
        self.drive(run).await
    }

    /// Drop the checkpoints of every finished instance. Suspended and
    /// running instances are kept.
    pub async fn prune_finished(&self) -> OpsflowResult<usize> {
        let removed = self.checkpoints.prune_finished().await?;
        debug!(removed, "finished checkpoints pruned");
        Ok(removed)
    }

    /// Discard an instance and its checkpoint.
    pub async fn cancel(&self, instance_id: &str) -> OpsflowResult<()> {
        if !self.checkpoints.delete(instance_id).await? {
            return Err(OpsflowError::InstanceNotFound {
                instance_id: instance_id.to_string(),
            });
        }
        info!(instance_id = %instance_id, "workflow instance cancelled");
        Ok(())
    }

    /// Checkpoints of every instance waiting on a human.
    pub async fn suspended(&self) -> OpsflowResult<Vec<Checkpoint>> {
        let mut out = vec![];
        for id in self.checkpoints.list_suspended().await? {
            if let Some(checkpoint) = self.checkpoints.load(&id).await? {
                out.push(checkpoint);
            }
        }
        Ok(out)
    }

    pub async fn checkpoint(&self, instance_id: &str) -> OpsflowResult<Option<Checkpoint>> {
        self.checkpoints.load(instance_id).await
    }

    /// Yield one event per transition, then a final `Suspended` or
    /// `Finished` event. Errors end the stream.
    pub fn stream(
        &self,
        input: WorkflowInput,
    ) -> impl Stream<Item = OpsflowResult<StreamEvent>> + '_ {
        let first = normalize_input(input).map(|state| {
            Run::new(uuid::Uuid::new_v4().to_string(), state, Persistence::OnSuspend)
        });

        stream::unfold(Some(first), move |cursor| async move {
            let mut run = match cursor? {
                Ok(run) => run,
                Err(e) => return Some((Err(e), None)),
            };
            let before = run.state.clone();
            let from = run.node;
            match self.advance(&mut run).await {
                Ok(Advance::Moved) => {
                    let delta =
                        StateDelta::between(run.transitions, from, run.node, &before, &run.state);
                    Some((Ok(StreamEvent::Transition(delta)), Some(Ok(run))))
                }
                Ok(Advance::Suspended(request)) => Some((
                    Ok(StreamEvent::Suspended {
                        instance_id: run.instance_id,
                        request,
                    }),
                    None,
                )),
                Ok(Advance::Finished(status)) => Some((
                    Ok(StreamEvent::Finished {
                        status,
                        state: Box::new(run.state),
                    }),
                    None,
                )),
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    // ── Driver ───────────────────────────────────────────────────────────────

    async fn drive(&self, mut run: Run) -> OpsflowResult<RunOutcome> {
        loop {
            let step = match self.advance(&mut run).await {
                Ok(step) => step,
                Err(e) => return Err(self.abort(run, e).await),
            };
            match step {
                Advance::Moved => continue,
                Advance::Suspended(request) => {
                    return Ok(RunOutcome::Suspended {
                        instance_id: run.instance_id,
                        request,
                        state: run.state,
                    })
                }
                Advance::Finished(status) => {
                    return Ok(RunOutcome::Completed {
                        state: run.state,
                        status,
                    })
                }
            }
        }
    }

    /// Record a fatal engine error on a checkpointed instance so it is not
    /// left looking resumable.
    async fn abort(&self, mut run: Run, e: OpsflowError) -> OpsflowError {
        error!(
            instance_id = %run.instance_id,
            node = %run.node,
            error = %e,
            "workflow aborted"
        );
        if run.persistence == Persistence::EveryTransition {
            run.state.push_error(format!("engine: {}", e));
            if let Err(save_err) = self
                .save(&run, CheckpointStatus::Finished(RunStatus::Failed))
                .await
            {
                warn!(instance_id = %run.instance_id, error = %save_err, "could not record abort");
            }
        }
        e
    }

    async fn advance(&self, run: &mut Run) -> OpsflowResult<Advance> {
        match run.node {
            Node::Entry => {
                let note = format!("Workflow started for incident {}.", run.state.incident_id());
                self.narrate(run, Node::Router, note);
                self.transition(run, Node::Router, "workflow entry").await
            }
            Node::Router => self.route(run).await,
            Node::CollectInfo => match self.stages.collect_info(&mut run.state) {
                Ok(()) => self.transition(run, Node::Router, "operator input received").await,
                Err(suspension) => self.suspend(run, suspension).await,
            },
            Node::ErrorHandler => self.handle_error(run).await,
            Node::Terminal => self.finish(run).await,
            node => {
                let stage = node.stage().ok_or_else(|| OpsflowError::StateMachineError {
                    reason: format!("node '{}' has no handler", node),
                })?;
                self.run_stage(run, stage).await
            }
        }
    }

    // ── Transitions ──────────────────────────────────────────────────────────

    async fn transition(&self, run: &mut Run, to: Node, reason: &str) -> OpsflowResult<Advance> {
        run.budget_used += 1;
        if run.budget_used > self.config.recursion_limit {
            return Err(OpsflowError::StepLimitExceeded {
                limit: self.config.recursion_limit,
                node: run.node.to_string(),
            });
        }
        run.transitions += 1;

        let record = TransitionRecord {
            instance_id: run.instance_id.clone(),
            step: run.transitions,
            from: run.node,
            to,
            reason: reason.to_string(),
            retry_count: run.state.retry_count,
            timestamp: Utc::now(),
        };
        if let Some(audit) = &self.audit {
            audit.write(&record)?;
        }

        debug!(
            instance_id = %run.instance_id,
            step = run.transitions,
            from = %run.node,
            to = %to,
            reason = %reason,
            "transition"
        );

        run.prev = run.node;
        run.node = to;
        if run.persistence == Persistence::EveryTransition {
            self.save(run, CheckpointStatus::Running).await?;
        }
        Ok(Advance::Moved)
    }

    /// Append an engine-authored hop message.
    fn narrate(&self, run: &mut Run, to: Node, text: String) {
        let from = run.node;
        run.state
            .append_tagged(Role::Agent, text, MessageTag::Transition { from, to });
    }

    async fn suspend(&self, run: &mut Run, suspension: Suspension) -> OpsflowResult<Advance> {
        let request = gate::park(&mut run.state, suspension)?;
        self.save(run, CheckpointStatus::Suspended).await?;
        Ok(Advance::Suspended(request))
    }

    async fn save(&self, run: &Run, status: CheckpointStatus) -> OpsflowResult<()> {
        let checkpoint = Checkpoint {
            instance_id: run.instance_id.clone(),
            node: run.node,
            status,
            transitions: run.transitions,
            state: run.state.clone(),
            updated_at: Utc::now(),
        };
        self.checkpoints.save(&checkpoint).await
    }

    // ── Router node ──────────────────────────────────────────────────────────

    async fn route(&self, run: &mut Run) -> OpsflowResult<Advance> {
        if let Err(e) = self.extract(&mut run.state).await {
            let error = format!("router: {}", e);
            warn!(instance_id = %run.instance_id, error = %e, "extraction failed");
            run.state.push_error(error.clone());
            run.state.failed_stage = None;
            self.narrate(run, Node::ErrorHandler, format!("Extraction failed: {}", e));
            return self.transition(run, Node::ErrorHandler, &error).await;
        }

        let decision = self.router.decide(&run.state);
        run.state.target_stage = None;

        debug!(
            instance_id = %run.instance_id,
            next = %decision.next,
            source = %decision.source,
            justification = %decision.justification,
            "router decision"
        );

        run.state.append_tagged(
            Role::Agent,
            format!(
                "Routing to {} ({}): {}.",
                decision.next, decision.source, decision.justification
            ),
            MessageTag::Route {
                target: decision.next,
            },
        );
        self.transition(run, decision.next, &decision.justification)
            .await
    }

    /// Offer unread human text to the extractor, or record it as symptoms
    /// when no extractor is configured.
    async fn extract(&self, state: &mut IncidentState) -> OpsflowResult<()> {
        let unread = state.unread_human_input();
        if unread.is_empty() {
            return Ok(());
        }

        let Some(extractor) = self.stages.extractor() else {
            let added = state.union_symptoms(unread);
            state.mark_input_read();
            debug!(incident_id = %state.incident_id(), added, "free text recorded as symptoms");
            return Ok(());
        };

        for text in unread {
            let input = ExtractorInput {
                text,
                has_alert: state.alert().is_some(),
                known_symptoms: state.symptoms().cloned().unwrap_or_default(),
            };
            let oracle = extractor.clone();
            let extraction =
                off_thread(OracleKind::Extractor.as_str(), move || oracle.extract(&input)).await?;
            self.stages.verify(OracleKind::Extractor, &extraction)?;
            let summary =
                apply_extraction(state, extraction, self.config.router_confidence_floor);
            state.append_message(Role::Agent, summary);
        }
        state.mark_input_read();
        Ok(())
    }

    // ── Stage nodes ──────────────────────────────────────────────────────────

    async fn run_stage(&self, run: &mut Run, stage: Stage) -> OpsflowResult<Advance> {
        let outcome = match self.stages.run(stage, &mut run.state).await {
            Ok(outcome) => outcome,
            Err(suspension) => return self.suspend(run, suspension).await,
        };

        match outcome {
            StageOutcome::Completed => {
                let next = self.successor(stage, &run.state);
                let note = if next == Node::Router {
                    format!("{} complete; next stage already done, returning to router.", stage)
                } else {
                    format!("{} complete; continuing to {}.", stage, next)
                };
                self.narrate(run, next, note);
                self.transition(run, next, "stage completed").await
            }
            StageOutcome::NeedsInfo { reason } => {
                run.state
                    .append_tagged(Role::Agent, reason.clone(), MessageTag::InfoRequest);
                self.transition(run, Node::CollectInfo, &reason).await
            }
            StageOutcome::Failed { error } => {
                self.narrate(run, Node::ErrorHandler, format!("{} failed: {}", stage, error));
                self.transition(run, Node::ErrorHandler, &error).await
            }
            StageOutcome::Reroute { reason } => {
                self.narrate(run, Node::Router, format!("{}: {}; returning to router.", stage, reason));
                self.transition(run, Node::Router, &reason).await
            }
        }
    }

    /// The stage's single forward-success target. A successor that has
    /// already committed sends control back to the Router instead.
    fn successor(&self, stage: Stage, state: &IncidentState) -> Node {
        let next = match stage {
            Stage::IngestAlert => Node::Diagnose,
            Stage::Diagnose => Node::PlanActions,
            Stage::PlanActions => Node::ExecuteActions,
            Stage::ExecuteActions if self.config.enable_reporting => Node::GenerateReport,
            Stage::ExecuteActions => Node::Terminal,
            Stage::GenerateReport => Node::Terminal,
        };
        match next.stage() {
            Some(s) if state.stage_done(s) => Node::Router,
            _ => next,
        }
    }

    // ── Error node ───────────────────────────────────────────────────────────

    async fn handle_error(&self, run: &mut Run) -> OpsflowResult<Advance> {
        let last = run.state.errors().last().cloned().unwrap_or_default();
        let max = self.config.max_retries;

        if run.state.retry_count < max {
            run.state.retry_count += 1;
            let failed = run.state.failed_stage.take();
            run.state.target_stage = failed.map(Node::from);
            warn!(
                instance_id = %run.instance_id,
                retry = run.state.retry_count,
                max_retries = max,
                stage = ?failed,
                "retrying after error"
            );
            let target = failed.map_or_else(|| "routing".to_string(), |s| s.to_string());
            let note = format!(
                "Retry {}/{} of {} after error: {}",
                run.state.retry_count, max, target, last
            );
            self.narrate(run, Node::Router, note);
            self.transition(run, Node::Router, "retry").await
        } else {
            warn!(
                instance_id = %run.instance_id,
                max_retries = max,
                "retry budget exhausted"
            );
            self.narrate(
                run,
                Node::Terminal,
                format!("Retry budget of {} exhausted; giving up. Last error: {}", max, last),
            );
            self.transition(run, Node::Terminal, "retry budget exhausted")
                .await
        }
    }

    // ── Terminal node ────────────────────────────────────────────────────────

    async fn finish(&self, run: &mut Run) -> OpsflowResult<Advance> {
        let state = &run.state;
        let status = if run.prev == Node::ErrorHandler {
            RunStatus::Failed
        } else if !state.errors().is_empty() {
            RunStatus::CompletedWithErrors
        } else {
            RunStatus::Success
        };

        let narrative = format!(
            "Incident {} finished: {}. Alert: {}. Root cause: {}. Plan steps: {}. Errors: {}.",
            state.incident_id(),
            status,
            state.alert().map_or("none", |a| a.message.as_str()),
            state
                .diagnostic_result()
                .map_or("undetermined", |d| d.root_cause.as_str()),
            state.action_plan().map_or(0, |p| p.steps.len()),
            state.errors().len()
        );
        run.state
            .append_tagged(Role::Agent, narrative, MessageTag::Final);

        if let Some(audit) = &self.audit {
            audit.finalize(&run.instance_id)?;
        }
        if run.persistence == Persistence::EveryTransition {
            self.save(run, CheckpointStatus::Finished(status)).await?;
        }

        info!(
            instance_id = %run.instance_id,
            status = %status,
            transitions = run.transitions,
            "workflow finished"
        );
        Ok(Advance::Finished(status))
    }
}

/// Turn entry input into the initial Shared State.
fn normalize_input(input: WorkflowInput) -> OpsflowResult<IncidentState> {
    let mut state = IncidentState::new();
    match input {
        WorkflowInput::Alert(alert) => {
            state.append_message(
                Role::Human,
                format!("Alert [{}] from {}: {}", alert.severity, alert.source, alert.message),
            );
            state.mark_input_read();
            state.set_once(alert);
            state.target_stage = Some(Node::IngestAlert);
        }
        WorkflowInput::Text(text) => {
            state.append_message(Role::Human, text);
        }
        WorkflowInput::Symptoms(symptoms) => {
            state.append_message(
                Role::Human,
                format!("Reported symptoms: {}", symptoms.join("; ")),
            );
            state.mark_input_read();
            state.union_symptoms(symptoms);
        }
        WorkflowInput::Partial(partial) => {
            if partial.interaction.pending.is_some() {
                return Err(OpsflowError::StateMachineError {
                    reason: "partial state has an outstanding human request; resume it instead"
                        .to_string(),
                });
            }
            state = *partial;
        }
    }
    Ok(state)
}

// ── Builder ──────────────────────────────────────────────────────────────────

/// Assembles a [`WorkflowEngine`] from explicit collaborators.
pub struct WorkflowEngineBuilder {
    config: EngineConfig,
    classifier: Option<Arc<dyn AlertClassifier>>,
    diagnoser: Option<Arc<dyn Diagnoser>>,
    planner: Option<Arc<dyn ActionPlanner>>,
    reporter: Option<Arc<dyn ReportWriter>>,
    extractor: Option<Arc<dyn Extractor>>,
    runner: Option<Arc<dyn ActionRunner>>,
    policy: Option<Arc<dyn ApprovalPolicy>>,
    verifier: Option<Arc<dyn OutputVerifier>>,
    audit: Option<Arc<dyn AuditWriter>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
}

impl WorkflowEngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            classifier: None,
            diagnoser: None,
            planner: None,
            reporter: None,
            extractor: None,
            runner: None,
            policy: None,
            verifier: None,
            audit: None,
            checkpoints: None,
        }
    }

    pub fn classifier(mut self, classifier: Arc<dyn AlertClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn diagnoser(mut self, diagnoser: Arc<dyn Diagnoser>) -> Self {
        self.diagnoser = Some(diagnoser);
        self
    }

    pub fn planner(mut self, planner: Arc<dyn ActionPlanner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn ReportWriter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn runner(mut self, runner: Arc<dyn ActionRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn policy(mut self, policy: Arc<dyn ApprovalPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn verifier(mut self, verifier: Arc<dyn OutputVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditWriter>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Defaults to an [`InMemoryCheckpointStore`].
    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn build(self) -> OpsflowResult<WorkflowEngine> {
        self.config.validate()?;

        fn required<T: ?Sized>(slot: Option<Arc<T>>, name: &str) -> OpsflowResult<Arc<T>> {
            slot.ok_or_else(|| OpsflowError::ConfigError {
                reason: format!("workflow engine needs a {}", name),
            })
        }

        let oracles = Oracles {
            classifier: required(self.classifier, "alert classifier")?,
            diagnoser: required(self.diagnoser, "diagnoser")?,
            planner: required(self.planner, "action planner")?,
            reporter: required(self.reporter, "report writer")?,
            extractor: self.extractor,
        };
        let stages = StageHandlers::new(
            oracles,
            required(self.runner, "action runner")?,
            required(self.policy, "approval policy")?,
            self.verifier,
            self.config.clone(),
        );

        Ok(WorkflowEngine {
            router: Router::new(self.config.enable_reporting),
            stages,
            audit: self.audit,
            checkpoints: self
                .checkpoints
                .unwrap_or_else(|| Arc::new(InMemoryCheckpointStore::new())),
            config: self.config,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet, VecDeque};
    use std::sync::Mutex;

    use futures::StreamExt;
    use serde_json::json;

    use opsflow_contracts::{
        incident::{
            ActionPlan, ActionStep, Alert, AnalysisResult, DiagnosticResult, ExecutionStatus,
            RiskLevel, Severity,
        },
        interaction::RequestKind,
        oracle::{
            ClassifierInput, DiagnoserInput, ExtractedAlert, Extraction, PlannerInput,
            ReportDraft, ReportInput,
        },
        policy::{ApprovalDecision, RiskVerdict},
    };

    use super::*;

    // ── Mock helpers ─────────────────────────────────────────────────────────

    /// Shared record of everything the mocks were asked to do.
    #[derive(Default)]
    struct Recorder {
        /// One entry per diagnoser call: the supplementary text it saw.
        diagnoses: Mutex<Vec<Option<String>>>,
        plans: Mutex<u32>,
        executed: Mutex<Vec<String>>,
        audit: Mutex<Vec<TransitionRecord>>,
        finalized: Mutex<Vec<String>>,
    }

    struct MockClassifier;

    impl AlertClassifier for MockClassifier {
        fn classify(&self, input: &ClassifierInput) -> OpsflowResult<AnalysisResult> {
            Ok(AnalysisResult {
                category: "performance".to_string(),
                priority: "p1".to_string(),
                urgency_score: 0.8,
                root_cause_hints: vec![input.message.clone()],
                recommended_actions: vec![],
            })
        }
    }

    /// Returns scripted confidences in order, then 0.9 forever. `Err`
    /// entries make that call fail.
    struct MockDiagnoser {
        script: Mutex<VecDeque<Result<f64, &'static str>>>,
        recorder: Arc<Recorder>,
    }

    impl Diagnoser for MockDiagnoser {
        fn diagnose(&self, input: &DiagnoserInput) -> OpsflowResult<DiagnosticResult> {
            self.recorder
                .diagnoses
                .lock()
                .unwrap()
                .push(input.supplementary.clone());
            let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(0.9));
            let confidence = next.map_err(|e| OpsflowError::oracle("diagnoser", e))?;
            Ok(DiagnosticResult {
                root_cause: "runaway worker process".to_string(),
                confidence_score: confidence,
                impact_assessment: "elevated latency".to_string(),
                affected_components: vec!["web-1".to_string()],
                business_impact: "checkout slow".to_string(),
                recovery_time_estimate: "15m".to_string(),
                evidence: vec![],
            })
        }
    }

    struct MockPlanner {
        risk: RiskLevel,
        recorder: Arc<Recorder>,
    }

    impl ActionPlanner for MockPlanner {
        fn plan(&self, _input: &PlannerInput) -> OpsflowResult<ActionPlan> {
            let mut count = self.recorder.plans.lock().unwrap();
            *count += 1;
            let step = |id: &str, risk| ActionStep {
                step_id: id.to_string(),
                action_type: "restart_service".to_string(),
                description: format!("step {}", id),
                command: format!("systemctl restart {}", id),
                risk_level: risk,
            };
            Ok(ActionPlan {
                plan_id: format!("plan-{}", *count),
                priority: "high".to_string(),
                estimated_duration: 10,
                risk_assessment: self.risk,
                approval_required: false,
                steps: vec![step("s1", RiskLevel::Low), step("s2", self.risk)],
                rollback_plan: vec![],
            })
        }
    }

    struct MockReporter;

    impl ReportWriter for MockReporter {
        fn write_report(&self, input: &ReportInput) -> OpsflowResult<ReportDraft> {
            Ok(ReportDraft {
                report_summary: input.incident_summary.clone(),
                key_findings: vec!["worker leak".to_string()],
                recommendations: vec!["add memory limits".to_string()],
            })
        }
    }

    /// Turns any text into an alert and a symptom, pointing at ingest.
    struct MockExtractor;

    impl Extractor for MockExtractor {
        fn extract(&self, input: &ExtractorInput) -> OpsflowResult<Extraction> {
            Ok(Extraction {
                alert: Some(ExtractedAlert {
                    severity: Severity::High,
                    message: input.text.clone(),
                    source: None,
                    metrics: BTreeMap::new(),
                }),
                symptoms: BTreeSet::from([input.text.clone()]),
                context: BTreeMap::new(),
                next_stage: Some(Node::IngestAlert),
                confidence: 0.9,
                reasoning: "text mentions an outage".to_string(),
            })
        }
    }

    struct MockRunner {
        failing: Option<&'static str>,
        recorder: Arc<Recorder>,
    }

    impl ActionRunner for MockRunner {
        fn run_step(&self, step: &ActionStep) -> OpsflowResult<String> {
            if self.failing == Some(step.step_id.as_str()) {
                return Err(OpsflowError::oracle("action-runner", "host unreachable"));
            }
            self.recorder.executed.lock().unwrap().push(step.step_id.clone());
            Ok(format!("ran {}", step.command))
        }
    }

    /// High or critical steps need approval.
    struct MockPolicy;

    impl ApprovalPolicy for MockPolicy {
        fn assess(&self, plan: &ActionPlan) -> RiskVerdict {
            let reasons: Vec<String> = plan
                .steps
                .iter()
                .filter(|s| s.risk_level >= RiskLevel::High)
                .map(|s| format!("step {} is {}", s.step_id, s.risk_level))
                .collect();
            if reasons.is_empty() {
                RiskVerdict::cleared()
            } else {
                RiskVerdict {
                    approval_required: true,
                    reasons,
                }
            }
        }

        fn interpret(&self, reply: &str) -> ApprovalDecision {
            let reply = reply.to_lowercase();
            if reply.contains("modify") {
                ApprovalDecision::ModificationRequested
            } else if reply == "approved" || reply == "yes" {
                ApprovalDecision::Approved
            } else {
                ApprovalDecision::Rejected
            }
        }
    }

    struct MockAudit {
        recorder: Arc<Recorder>,
    }

    impl AuditWriter for MockAudit {
        fn write(&self, record: &TransitionRecord) -> OpsflowResult<()> {
            self.recorder.audit.lock().unwrap().push(record.clone());
            Ok(())
        }

        fn finalize(&self, instance_id: &str) -> OpsflowResult<()> {
            self.recorder.finalized.lock().unwrap().push(instance_id.to_string());
            Ok(())
        }
    }

    struct Setup {
        config: EngineConfig,
        diagnoses: Vec<Result<f64, &'static str>>,
        risk: RiskLevel,
        failing_step: Option<&'static str>,
        extractor: bool,
        store: Option<Arc<dyn CheckpointStore>>,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                config: EngineConfig::default(),
                diagnoses: vec![],
                risk: RiskLevel::Low,
                failing_step: None,
                extractor: false,
                store: None,
            }
        }
    }

    fn build(setup: Setup) -> (WorkflowEngine, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let mut builder = WorkflowEngine::builder(setup.config)
            .classifier(Arc::new(MockClassifier))
            .diagnoser(Arc::new(MockDiagnoser {
                script: Mutex::new(setup.diagnoses.into()),
                recorder: recorder.clone(),
            }))
            .planner(Arc::new(MockPlanner {
                risk: setup.risk,
                recorder: recorder.clone(),
            }))
            .reporter(Arc::new(MockReporter))
            .runner(Arc::new(MockRunner {
                failing: setup.failing_step,
                recorder: recorder.clone(),
            }))
            .policy(Arc::new(MockPolicy))
            .audit(Arc::new(MockAudit {
                recorder: recorder.clone(),
            }));
        if setup.extractor {
            builder = builder.extractor(Arc::new(MockExtractor));
        }
        if let Some(store) = setup.store {
            builder = builder.checkpoint_store(store);
        }
        (builder.build().unwrap(), recorder)
    }

    fn cpu_alert() -> WorkflowInput {
        WorkflowInput::Alert(
            Alert::new(Severity::Critical, "CPU usage above 95% on web-1")
                .with_source("prometheus")
                .with_metric("cpu_usage", 0.97),
        )
    }

    fn expect_completed(outcome: RunOutcome) -> (IncidentState, RunStatus) {
        match outcome {
            RunOutcome::Completed { state, status } => (state, status),
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    fn expect_suspended(outcome: RunOutcome) -> (String, HumanRequest) {
        match outcome {
            RunOutcome::Suspended {
                instance_id,
                request,
                ..
            } => (instance_id, request),
            other => panic!("expected Suspended, got {:?}", other),
        }
    }

    fn summaries(state: &IncidentState) -> Vec<Stage> {
        state
            .messages()
            .iter()
            .filter_map(|m| match m.tag {
                Some(MessageTag::StageSummary { stage }) => Some(stage),
                _ => None,
            })
            .collect()
    }

    // ── Happy path ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn alert_runs_every_stage_in_order() {
        let (engine, recorder) = build(Setup::default());
        let (state, status) = expect_completed(engine.start(cpu_alert()).await.unwrap());

        assert_eq!(status, RunStatus::Success);
        assert_eq!(summaries(&state), Stage::ALL.to_vec());
        assert!(state.report().is_some());
        assert_eq!(state.execution_result().unwrap().status, ExecutionStatus::Success);
        assert_eq!(*recorder.executed.lock().unwrap(), vec!["s1", "s2"]);
        assert!(state.errors().is_empty());

        // Every stage summary is preceded by a routing or hop message.
        let messages = state.messages();
        for (i, m) in messages.iter().enumerate() {
            if matches!(m.tag, Some(MessageTag::StageSummary { .. })) {
                assert!(matches!(
                    messages[i - 1].tag,
                    Some(MessageTag::Route { .. }) | Some(MessageTag::Transition { .. })
                ));
            }
        }
        assert!(matches!(messages.last().unwrap().tag, Some(MessageTag::Final)));
    }

    #[tokio::test]
    async fn every_transition_is_audited_in_order() {
        let (engine, recorder) = build(Setup::default());
        expect_completed(engine.start(cpu_alert()).await.unwrap());

        let records = recorder.audit.lock().unwrap();
        assert_eq!(records.first().unwrap().from, Node::Entry);
        assert_eq!(records.last().unwrap().to, Node::Terminal);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.step, i as u64 + 1);
        }
        assert_eq!(recorder.finalized.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disabled_reporting_ends_after_execution() {
        let (engine, _) = build(Setup {
            config: EngineConfig {
                enable_reporting: false,
                ..EngineConfig::default()
            },
            ..Setup::default()
        });
        let (state, status) = expect_completed(engine.start(cpu_alert()).await.unwrap());
        assert_eq!(status, RunStatus::Success);
        assert!(state.execution_result().is_some());
        assert!(state.report().is_none());
    }

    #[tokio::test]
    async fn manual_execution_mode_runs_nothing() {
        let (engine, recorder) = build(Setup {
            config: EngineConfig {
                auto_execution: false,
                ..EngineConfig::default()
            },
            ..Setup::default()
        });
        let (state, _) = expect_completed(engine.start(cpu_alert()).await.unwrap());
        assert_eq!(
            state.execution_result().unwrap().status,
            ExecutionStatus::ManualApprovalRequired
        );
        assert!(recorder.executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_step_gives_partial_execution() {
        let (engine, _) = build(Setup {
            failing_step: Some("s2"),
            ..Setup::default()
        });
        let (state, status) = expect_completed(engine.start(cpu_alert()).await.unwrap());
        let execution = state.execution_result().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Partial);
        assert_eq!(execution.failed_steps[0].step_id, "s2");
        assert_eq!(status, RunStatus::Success);
    }

    // ── Inputs ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn free_text_without_extractor_becomes_symptoms() {
        let (engine, _) = build(Setup::default());
        let input = WorkflowInput::Text("disk full on db-1".to_string());
        let (state, status) = expect_completed(engine.start(input).await.unwrap());

        assert_eq!(status, RunStatus::Success);
        assert!(state.symptoms().unwrap().contains("disk full on db-1"));
        assert!(state.alert().is_none());
        assert!(state.analysis_result().is_none());
        assert!(state.report().is_some());
    }

    #[tokio::test]
    async fn extractor_turns_text_into_an_alert() {
        let (engine, _) = build(Setup {
            extractor: true,
            ..Setup::default()
        });
        let input = WorkflowInput::Text("api returning 500s".to_string());
        let (state, _) = expect_completed(engine.start(input).await.unwrap());

        assert_eq!(state.alert().unwrap().message, "api returning 500s");
        assert!(state.analysis_result().is_some());
        assert_eq!(summaries(&state).first(), Some(&Stage::IngestAlert));
    }

    #[tokio::test]
    async fn empty_text_asks_the_operator_then_continues() {
        let (engine, _) = build(Setup::default());
        let outcome = engine.start(WorkflowInput::Text(String::new())).await.unwrap();
        let (instance_id, request) = expect_suspended(outcome);
        assert_eq!(request.kind, RequestKind::OperatorInput);
        assert_eq!(request.node, Node::CollectInfo);

        let reply = json!({ "response": "api latency high on web-1" });
        let outcome = engine.resume(&instance_id, &request.id, reply).await.unwrap();
        let (state, status) = expect_completed(outcome);
        assert_eq!(status, RunStatus::Success);
        assert!(state.symptoms().unwrap().contains("api latency high on web-1"));
    }

    #[tokio::test]
    async fn partial_state_with_open_request_is_refused() {
        let (engine, _) = build(Setup {
            diagnoses: vec![Ok(0.3)],
            ..Setup::default()
        });
        let outcome = engine.start(cpu_alert()).await.unwrap();
        let state = outcome.state().clone();

        match engine.start(WorkflowInput::Partial(Box::new(state))).await {
            Err(OpsflowError::StateMachineError { reason }) => {
                assert!(reason.contains("outstanding"));
            }
            other => panic!("expected StateMachineError, got {:?}", other),
        }
    }

    // ── Confidence gate ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn low_confidence_suspends_once_and_recalls_once() {
        let (engine, recorder) = build(Setup {
            diagnoses: vec![Ok(0.4), Ok(0.9)],
            ..Setup::default()
        });
        let (instance_id, request) = expect_suspended(engine.start(cpu_alert()).await.unwrap());
        assert_eq!(request.kind, RequestKind::Clarification);
        assert_eq!(request.node, Node::Diagnose);
        assert_eq!(recorder.diagnoses.lock().unwrap().len(), 1);

        let reply = json!({ "clarification": "load average 40 on web-1" });
        let outcome = engine.resume(&instance_id, &request.id, reply).await.unwrap();
        let (state, status) = expect_completed(outcome);

        assert_eq!(status, RunStatus::Success);
        let calls = recorder.diagnoses.lock().unwrap().clone();
        assert_eq!(calls, vec![None, Some("load average 40 on web-1".to_string())]);
        assert!((state.diagnostic_result().unwrap().confidence_score - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_clarification_accepts_preliminary_diagnosis() {
        let (engine, recorder) = build(Setup {
            diagnoses: vec![Ok(0.4)],
            ..Setup::default()
        });
        let (instance_id, request) = expect_suspended(engine.start(cpu_alert()).await.unwrap());

        let outcome = engine.resume(&instance_id, &request.id, json!("")).await.unwrap();
        let (state, _) = expect_completed(outcome);
        assert_eq!(recorder.diagnoses.lock().unwrap().len(), 1);
        assert!((state.diagnostic_result().unwrap().confidence_score - 0.4).abs() < 1e-9);
    }

    // ── Approval gate ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn rejected_risky_plan_executes_nothing() {
        let (engine, recorder) = build(Setup {
            risk: RiskLevel::High,
            ..Setup::default()
        });
        let (instance_id, request) = expect_suspended(engine.start(cpu_alert()).await.unwrap());
        assert_eq!(request.kind, RequestKind::ExecutionApproval);
        assert_eq!(request.context["plan_id"], json!("plan-1"));

        let outcome = engine
            .resume(&instance_id, &request.id, json!({ "decision": "rejected" }))
            .await
            .unwrap();
        let (state, status) = expect_completed(outcome);

        let execution = state.execution_result().unwrap();
        assert_eq!(execution.status, ExecutionStatus::RejectedByOperator);
        assert!(execution.executed_steps.is_empty());
        assert!(!execution.approval_received);
        assert!(recorder.executed.lock().unwrap().is_empty());
        assert_eq!(status, RunStatus::Success);
    }

    #[tokio::test]
    async fn approved_risky_plan_runs_every_step() {
        let (engine, recorder) = build(Setup {
            risk: RiskLevel::Critical,
            ..Setup::default()
        });
        let (instance_id, request) = expect_suspended(engine.start(cpu_alert()).await.unwrap());

        let outcome = engine
            .resume(&instance_id, &request.id, json!("approved"))
            .await
            .unwrap();
        let (state, _) = expect_completed(outcome);
        assert!(state.execution_result().unwrap().approval_received);
        assert_eq!(recorder.executed.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn modification_request_replans_and_asks_again() {
        let (engine, recorder) = build(Setup {
            risk: RiskLevel::High,
            ..Setup::default()
        });
        let (instance_id, first) = expect_suspended(engine.start(cpu_alert()).await.unwrap());

        let outcome = engine
            .resume(&instance_id, &first.id, json!("please modify s2 to drain first"))
            .await
            .unwrap();
        let (_, second) = expect_suspended(outcome);
        assert_ne!(second.id, first.id);
        assert_eq!(second.context["plan_id"], json!("plan-2"));
        assert_eq!(*recorder.plans.lock().unwrap(), 2);

        let checkpoint = engine.checkpoint(&instance_id).await.unwrap().unwrap();
        let context = checkpoint.state.context().unwrap();
        assert_eq!(context["operator_feedback"], json!("please modify s2 to drain first"));

        let outcome = engine.resume(&instance_id, &second.id, json!("no")).await.unwrap();
        let (state, _) = expect_completed(outcome);
        assert_eq!(
            state.execution_result().unwrap().status,
            ExecutionStatus::RejectedByOperator
        );
    }

    // ── Resume semantics ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn duplicate_resume_is_not_suspended_and_changes_nothing() {
        let (engine, recorder) = build(Setup {
            diagnoses: vec![Ok(0.4)],
            ..Setup::default()
        });
        let (instance_id, request) = expect_suspended(engine.start(cpu_alert()).await.unwrap());
        expect_completed(engine.resume(&instance_id, &request.id, json!("")).await.unwrap());

        let before = engine.checkpoint(&instance_id).await.unwrap().unwrap();
        match engine.resume(&instance_id, &request.id, json!("")).await {
            Err(OpsflowError::NotSuspended { .. }) => {}
            other => panic!("expected NotSuspended, got {:?}", other),
        }
        let after = engine.checkpoint(&instance_id).await.unwrap().unwrap();
        assert_eq!(before.state.messages().len(), after.state.messages().len());
        assert_eq!(after.status, CheckpointStatus::Finished(RunStatus::Success));
        assert_eq!(recorder.diagnoses.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mismatched_request_id_leaves_instance_suspended() {
        let (engine, _) = build(Setup {
            diagnoses: vec![Ok(0.4)],
            ..Setup::default()
        });
        let (instance_id, request) = expect_suspended(engine.start(cpu_alert()).await.unwrap());

        match engine.resume(&instance_id, "stale-request", json!("x")).await {
            Err(OpsflowError::ResumeMismatch { expected, .. }) => assert_eq!(expected, request.id),
            other => panic!("expected ResumeMismatch, got {:?}", other),
        }
        let outcome = engine.resume(&instance_id, &request.id, json!("")).await.unwrap();
        expect_completed(outcome);
    }

    async fn race_two_approvals(store: Arc<dyn CheckpointStore>) {
        let (engine, recorder) = build(Setup {
            risk: RiskLevel::High,
            store: Some(store),
            ..Setup::default()
        });
        let (instance_id, request) =
            expect_suspended(engine.start_checkpointed("inc-race", cpu_alert()).await.unwrap());

        let (a, b) = tokio::join!(
            engine.resume(&instance_id, &request.id, json!("approved")),
            engine.resume(&instance_id, &request.id, json!("approved")),
        );
        let (done, refused) = match (a, b) {
            (Ok(done), Err(refused)) | (Err(refused), Ok(done)) => (done, refused),
            other => panic!("expected exactly one resume to win, got {:?}", other),
        };
        expect_completed(done);
        assert!(matches!(refused, OpsflowError::NotSuspended { .. }));
        assert_eq!(*recorder.executed.lock().unwrap(), vec!["s1", "s2"]);

        let checkpoint = engine.checkpoint(&instance_id).await.unwrap().unwrap();
        let approvals = checkpoint
            .state
            .messages()
            .iter()
            .filter(|m| m.role == Role::Human && matches!(m.tag, Some(MessageTag::Gate { .. })))
            .count();
        assert_eq!(approvals, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resumes_execute_the_plan_once() {
        race_two_approvals(Arc::new(InMemoryCheckpointStore::new())).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resumes_on_file_store_execute_the_plan_once() {
        let dir = std::env::temp_dir().join(format!("opsflow-race-{}", uuid::Uuid::new_v4()));
        let store = crate::checkpoint::FileCheckpointStore::new(&dir).unwrap();
        race_two_approvals(Arc::new(store)).await;
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn prune_drops_finished_instances_only() {
        let (engine, _) = build(Setup {
            diagnoses: vec![Ok(0.4)],
            ..Setup::default()
        });
        let (waiting, _) = expect_suspended(engine.start(cpu_alert()).await.unwrap());
        expect_completed(engine.start_checkpointed("inc-done", cpu_alert()).await.unwrap());

        assert_eq!(engine.prune_finished().await.unwrap(), 1);
        assert!(engine.checkpoint("inc-done").await.unwrap().is_none());
        assert!(engine.checkpoint(&waiting).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unknown_instance_is_not_found() {
        let (engine, _) = build(Setup::default());
        match engine.resume("nope", "r", json!("x")).await {
            Err(OpsflowError::InstanceNotFound { instance_id }) => assert_eq!(instance_id, "nope"),
            other => panic!("expected InstanceNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancel_discards_a_suspended_instance() {
        let (engine, _) = build(Setup {
            diagnoses: vec![Ok(0.4)],
            ..Setup::default()
        });
        let (instance_id, request) = expect_suspended(engine.start(cpu_alert()).await.unwrap());
        assert_eq!(engine.suspended().await.unwrap().len(), 1);

        engine.cancel(&instance_id).await.unwrap();
        assert!(engine.suspended().await.unwrap().is_empty());
        assert!(matches!(
            engine.resume(&instance_id, &request.id, json!("")).await,
            Err(OpsflowError::InstanceNotFound { .. })
        ));
        assert!(matches!(
            engine.cancel(&instance_id).await,
            Err(OpsflowError::InstanceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn checkpointed_run_records_final_status() {
        let (engine, _) = build(Setup::default());
        expect_completed(engine.start_checkpointed("inc-42", cpu_alert()).await.unwrap());

        let checkpoint = engine.checkpoint("inc-42").await.unwrap().unwrap();
        assert_eq!(checkpoint.status, CheckpointStatus::Finished(RunStatus::Success));
        assert_eq!(checkpoint.node, Node::Terminal);

        match engine.start_checkpointed("inc-42", cpu_alert()).await {
            Err(OpsflowError::StateMachineError { reason }) => {
                assert!(reason.contains("already exists"));
            }
            other => panic!("expected StateMachineError, got {:?}", other),
        }
    }

    // ── Errors and limits ────────────────────────────────────────────────────

    #[tokio::test]
    async fn persistent_oracle_failure_exhausts_retries() {
        let (engine, recorder) = build(Setup {
            config: EngineConfig {
                max_retries: 2,
                ..EngineConfig::default()
            },
            diagnoses: vec![Err("model timeout"); 10],
            ..Setup::default()
        });
        let (state, status) = expect_completed(engine.start(cpu_alert()).await.unwrap());

        assert_eq!(status, RunStatus::Failed);
        assert_eq!(recorder.diagnoses.lock().unwrap().len(), 3);
        assert_eq!(state.errors().len(), 3);
        assert_eq!(state.retry_count, 2);
        assert!(state.diagnostic_result().is_none());
        let records = recorder.audit.lock().unwrap();
        let last = records.last().unwrap();
        assert_eq!((last.from, last.to), (Node::ErrorHandler, Node::Terminal));
    }

    #[tokio::test]
    async fn transient_failure_recovers_with_errors_recorded() {
        let (engine, recorder) = build(Setup {
            diagnoses: vec![Err("rate limited")],
            ..Setup::default()
        });
        let (state, status) = expect_completed(engine.start(cpu_alert()).await.unwrap());

        assert_eq!(status, RunStatus::CompletedWithErrors);
        assert_eq!(state.retry_count, 1);
        assert_eq!(state.errors().len(), 1);
        assert!(state.errors()[0].starts_with("diagnose:"));
        assert_eq!(recorder.diagnoses.lock().unwrap().len(), 2);
        assert!(state.report().is_some());
    }

    #[tokio::test]
    async fn step_ceiling_aborts_the_run() {
        let (engine, _) = build(Setup {
            config: EngineConfig {
                recursion_limit: 3,
                ..EngineConfig::default()
            },
            ..Setup::default()
        });
        match engine.start(cpu_alert()).await {
            Err(OpsflowError::StepLimitExceeded { limit, .. }) => assert_eq!(limit, 3),
            other => panic!("expected StepLimitExceeded, got {:?}", other),
        }
    }

    #[test]
    fn builder_requires_every_oracle() {
        let result = WorkflowEngine::builder(EngineConfig::default())
            .classifier(Arc::new(MockClassifier))
            .build();
        match result {
            Err(OpsflowError::ConfigError { reason }) => assert!(reason.contains("diagnoser")),
            Err(other) => panic!("expected ConfigError, got {:?}", other),
            Ok(_) => panic!("expected ConfigError, got an engine"),
        }
    }

    // ── Streaming ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn stream_yields_each_transition_then_finishes() {
        let (engine, recorder) = build(Setup::default());
        let events: Vec<StreamEvent> = engine
            .stream(cpu_alert())
            .map(|e| e.unwrap())
            .collect()
            .await;

        let transitions: Vec<&StateDelta> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Transition(delta) => Some(delta),
                _ => None,
            })
            .collect();
        assert_eq!(transitions.len(), recorder.audit.lock().unwrap().len());
        assert_eq!((transitions[0].from, transitions[0].to), (Node::Entry, Node::Router));
        assert!(transitions
            .iter()
            .any(|d| d.slots_filled.contains(&opsflow_contracts::state::Slot::DiagnosticResult)));

        match events.last() {
            Some(StreamEvent::Finished { status, state }) => {
                assert_eq!(*status, RunStatus::Success);
                assert!(state.report().is_some());
            }
            other => panic!("expected Finished, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stream_ends_at_suspension_and_can_be_resumed() {
        let (engine, _) = build(Setup {
            diagnoses: vec![Ok(0.4)],
            ..Setup::default()
        });
        let events: Vec<_> = engine.stream(cpu_alert()).collect().await;
        let (instance_id, request) = match events.last() {
            Some(Ok(StreamEvent::Suspended {
                instance_id,
                request,
            })) => (instance_id.clone(), request.clone()),
            other => panic!("expected Suspended, got {:?}", other),
        };

        let outcome = engine.resume(&instance_id, &request.id, json!("")).await.unwrap();
        expect_completed(outcome);
    }
}
