//! Input/output contracts for the five reasoning oracles.
//!
//! Oracles are opaque: the engine builds one of these narrow inputs from
//! Shared State, hands it over, and receives a structured judgment back.
//! Outputs that are already slot payloads (`AnalysisResult`,
//! `DiagnosticResult`, `ActionPlan`) live in [`crate::incident`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::incident::{
    ActionPlan, Alert, AnalysisResult, DiagnosticResult, ExecutionResult, Severity,
};
use crate::stage::Node;

/// Which oracle produced an output. Used to pick a verification schema and
/// to label errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleKind {
    AlertClassifier,
    Diagnoser,
    ActionPlanner,
    ReportWriter,
    Extractor,
}

impl OracleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OracleKind::AlertClassifier => "alert-classifier",
            OracleKind::Diagnoser => "diagnoser",
            OracleKind::ActionPlanner => "action-planner",
            OracleKind::ReportWriter => "report-writer",
            OracleKind::Extractor => "extractor",
        }
    }
}

impl fmt::Display for OracleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert-classifier input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierInput {
    pub message: String,
    pub severity: Severity,
    pub source: String,
}

impl From<&Alert> for ClassifierInput {
    fn from(alert: &Alert) -> Self {
        Self {
            message: alert.message.clone(),
            severity: alert.severity,
            source: alert.source.clone(),
        }
    }
}

/// What the diagnoser reasons from: a prior classification when one exists,
/// otherwise the raw signals gathered so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "basis", rename_all = "snake_case")]
pub enum DiagnosisBasis {
    Analysis { analysis: AnalysisResult },
    Signals {
        alert: Option<Alert>,
        symptoms: BTreeSet<String>,
    },
}

/// Diagnoser input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnoserInput {
    pub basis: DiagnosisBasis,
    #[serde(default)]
    pub system_metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub log_entries: Vec<String>,
    #[serde(default)]
    pub topology_info: BTreeMap<String, Value>,
    /// Operator-supplied text from a low-confidence clarification round.
    #[serde(default)]
    pub supplementary: Option<String>,
}

/// Action-planner input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerInput {
    pub diagnosis: DiagnosticResult,
    #[serde(default)]
    pub system_context: BTreeMap<String, Value>,
}

/// Report-writer input: each section pre-rendered as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportInput {
    pub incident_summary: String,
    pub diagnostic_summary: String,
    pub plan_summary: String,
    pub execution_summary: String,
}

impl ReportInput {
    /// Render the report-writer input from whatever slots are present.
    pub fn render(
        alert: Option<&Alert>,
        diagnosis: Option<&DiagnosticResult>,
        plan: Option<&ActionPlan>,
        execution: Option<&ExecutionResult>,
    ) -> Self {
        let incident_summary = match alert {
            Some(a) => format!("[{}] {} (source: {})", a.severity, a.message, a.source),
            None => "no structured alert".to_string(),
        };
        let diagnostic_summary = match diagnosis {
            Some(d) => format!(
                "root cause: {} (confidence {:.2}); impact: {}",
                d.root_cause, d.confidence_score, d.impact_assessment
            ),
            None => "no diagnosis".to_string(),
        };
        let plan_summary = match plan {
            Some(p) => format!(
                "plan {} with {} step(s), risk {}, ~{} min",
                p.plan_id,
                p.steps.len(),
                p.risk_assessment,
                p.estimated_duration
            ),
            None => "no plan".to_string(),
        };
        let execution_summary = match execution {
            Some(e) => format!(
                "status {}; {} executed, {} failed",
                e.status,
                e.executed_steps.len(),
                e.failed_steps.len()
            ),
            None => "not executed".to_string(),
        };
        Self {
            incident_summary,
            diagnostic_summary,
            plan_summary,
            execution_summary,
        }
    }
}

/// Report-writer output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDraft {
    pub report_summary: String,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Intent/entity-extractor input: one unread human message plus what the
/// state already knows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorInput {
    pub text: String,
    pub has_alert: bool,
    #[serde(default)]
    pub known_symptoms: BTreeSet<String>,
}

/// Alert fields an extractor may pull from free text. Missing fields are
/// filled with defaults when the alert is materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedAlert {
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl ExtractedAlert {
    pub fn into_alert(self) -> Alert {
        let mut alert = Alert::new(self.severity, self.message)
            .with_source(self.source.unwrap_or_else(|| "extracted".to_string()));
        alert.metrics = self.metrics;
        alert
    }
}

/// Intent/entity-extractor output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub alert: Option<ExtractedAlert>,
    #[serde(default)]
    pub symptoms: BTreeSet<String>,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    /// Suggested next node; trusted only above the router confidence floor.
    #[serde(default)]
    pub next_stage: Option<Node>,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}
