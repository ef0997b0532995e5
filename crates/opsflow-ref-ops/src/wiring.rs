//! Assembles a `WorkflowEngine` from the reference oracles and the trusted
//! collaborators (ops approval policy, default output schemas).
//!
//! The engine takes its collaborators as trait objects, so the wiring keeps
//! concrete `Arc` handles to the diagnoser and the runner for inspection
//! after a run.

use std::sync::Arc;

use tracing::debug;

use opsflow_contracts::error::OpsflowResult;
use opsflow_core::{
    traits::{AuditWriter, CheckpointStore},
    EngineConfig, WorkflowEngine,
};
use opsflow_policy::TomlApprovalPolicy;
use opsflow_verify::SchemaVerifier;

use crate::oracles::{
    DryRunRunner, KeywordClassifier, KeywordExtractor, RunbookPlanner, ScriptedDiagnoser,
    TemplateReporter,
};

/// Approval policy for the operations runtime.
pub const OPS_POLICY: &str = include_str!("../policies/ops.toml");

/// A built engine plus the handles a scenario inspects afterwards.
pub struct ReferenceRuntime {
    pub engine: WorkflowEngine,
    pub diagnoser: Arc<ScriptedDiagnoser>,
    pub runner: Arc<DryRunRunner>,
}

pub struct ReferenceWiring {
    config: EngineConfig,
    diagnoser: ScriptedDiagnoser,
    runner: DryRunRunner,
    extractor: bool,
    audit: Option<Arc<dyn AuditWriter>>,
    store: Option<Arc<dyn CheckpointStore>>,
}

impl ReferenceWiring {
    /// Defaults: a diagnoser that always answers 0.85, a runner that never
    /// fails, no extractor, no audit, in-memory checkpoints.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            diagnoser: ScriptedDiagnoser::confident(0.85),
            runner: DryRunRunner::new(),
            extractor: false,
            audit: None,
            store: None,
        }
    }

    pub fn diagnoser(mut self, diagnoser: ScriptedDiagnoser) -> Self {
        self.diagnoser = diagnoser;
        self
    }

    pub fn runner(mut self, runner: DryRunRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_extractor(mut self) -> Self {
        self.extractor = true;
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditWriter>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> OpsflowResult<ReferenceRuntime> {
        let diagnoser = Arc::new(self.diagnoser);
        let runner = Arc::new(self.runner);
        let has_audit = self.audit.is_some();

        let mut builder = WorkflowEngine::builder(self.config)
            .classifier(Arc::new(KeywordClassifier))
            .diagnoser(diagnoser.clone())
            .planner(Arc::new(RunbookPlanner))
            .reporter(Arc::new(TemplateReporter))
            .runner(runner.clone())
            .policy(Arc::new(TomlApprovalPolicy::from_toml_str(OPS_POLICY)?))
            .verifier(Arc::new(SchemaVerifier::with_default_schemas()));
        if self.extractor {
            builder = builder.extractor(Arc::new(KeywordExtractor));
        }
        if let Some(audit) = self.audit {
            builder = builder.audit(audit);
        }
        if let Some(store) = self.store {
            builder = builder.checkpoint_store(store);
        }
        debug!(
            extractor = self.extractor,
            audited = has_audit,
            "reference runtime wired"
        );

        Ok(ReferenceRuntime {
            engine: builder.build()?,
            diagnoser,
            runner,
        })
    }
}
