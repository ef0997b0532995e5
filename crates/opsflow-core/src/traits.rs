//! Trait definitions for every seam of the workflow.
//!
//! - Oracles (`AlertClassifier`, `Diagnoser`, `ActionPlanner`,
//!   `ReportWriter`, `Extractor`) are **untrusted** reasoning calls. They are
//!   synchronous and may block; the engine always dispatches them with
//!   `spawn_blocking`.
//! - `ActionRunner` performs remediation steps. Also blocking.
//! - `ApprovalPolicy`, `OutputVerifier` and `AuditWriter` are **trusted**,
//!   deterministic collaborators.
//! - `CheckpointStore` persists suspended instances and is async.

use async_trait::async_trait;
use serde_json::Value;

use opsflow_contracts::{
    error::OpsflowResult,
    incident::{ActionPlan, ActionStep, AnalysisResult, DiagnosticResult},
    oracle::{
        ClassifierInput, DiagnoserInput, Extraction, ExtractorInput, OracleKind, PlannerInput,
        ReportDraft, ReportInput,
    },
    policy::{ApprovalDecision, RiskVerdict},
    run::{Checkpoint, TransitionRecord},
    verify::VerificationReport,
};

/// Classifies a structured alert.
pub trait AlertClassifier: Send + Sync {
    fn classify(&self, input: &ClassifierInput) -> OpsflowResult<AnalysisResult>;
}

/// Infers a root cause with a confidence score.
pub trait Diagnoser: Send + Sync {
    fn diagnose(&self, input: &DiagnoserInput) -> OpsflowResult<DiagnosticResult>;
}

/// Drafts a remediation plan from a diagnosis.
pub trait ActionPlanner: Send + Sync {
    fn plan(&self, input: &PlannerInput) -> OpsflowResult<ActionPlan>;
}

/// Writes the incident report prose.
pub trait ReportWriter: Send + Sync {
    fn write_report(&self, input: &ReportInput) -> OpsflowResult<ReportDraft>;
}

/// Pulls alert fields, symptoms, context and a routing suggestion out of
/// free text.
pub trait Extractor: Send + Sync {
    fn extract(&self, input: &ExtractorInput) -> OpsflowResult<Extraction>;
}

/// Executes one remediation step against real infrastructure.
///
/// Returns a short description of what happened. An `Err` marks the step
/// failed; the remaining steps still run.
pub trait ActionRunner: Send + Sync {
    fn run_step(&self, step: &ActionStep) -> OpsflowResult<String>;
}

/// Decides which plans need an operator's approval and reads the reply.
pub trait ApprovalPolicy: Send + Sync {
    fn assess(&self, plan: &ActionPlan) -> RiskVerdict;

    /// Classify a free-text operator reply. Anything unrecognised must map
    /// to `Rejected`.
    fn interpret(&self, reply: &str) -> ApprovalDecision;
}

/// Checks an oracle output before it is committed.
///
/// The output arrives serialized to JSON so the verifier stays independent
/// of the payload types. A failing report becomes a malformed-result error.
pub trait OutputVerifier: Send + Sync {
    fn verify(&self, oracle: OracleKind, output: &Value) -> OpsflowResult<VerificationReport>;
}

/// The immutable transition log.
///
/// Every engine hop produces exactly one record. A failed write is fatal to
/// the run.
pub trait AuditWriter: Send + Sync {
    fn write(&self, record: &TransitionRecord) -> OpsflowResult<()>;

    /// Called when an instance reaches the terminal node.
    fn finalize(&self, instance_id: &str) -> OpsflowResult<()>;
}

/// Durable storage for workflow checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> OpsflowResult<()>;

    async fn load(&self, instance_id: &str) -> OpsflowResult<Option<Checkpoint>>;

    /// Remove the instance. Returns whether anything was deleted.
    async fn delete(&self, instance_id: &str) -> OpsflowResult<bool>;

    /// Ids of instances parked on a human request.
    async fn list_suspended(&self) -> OpsflowResult<Vec<String>>;

    /// Take a suspended instance for a resume naming `request_id`: check it
    /// with [`Checkpoint::check_claim`], flip it to `Running` and return the
    /// snapshot. Check and flip are one atomic step, so of two concurrent
    /// claims exactly one succeeds and the other gets `NotSuspended`.
    async fn claim(&self, instance_id: &str, request_id: &str) -> OpsflowResult<Checkpoint>;

    /// Drop every finished instance. Returns how many were removed.
    async fn prune_finished(&self) -> OpsflowResult<usize>;
}
