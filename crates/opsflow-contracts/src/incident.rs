//! Incident payload types: the values held in Shared State slots.
//!
//! Each stage writes exactly one of these per pass. They are plain data with
//! serde derives so checkpoints round-trip losslessly.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert severity as reported by the monitoring source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Severity> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single monitoring alert.
///
/// Once placed in Shared State an alert is replaced wholesale by explicit
/// re-extraction, never merged field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub source: String,
    pub message: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Alert {
    /// Build an alert stamped now with a generated id and an unknown source.
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            id: format!("alert-{}", uuid::Uuid::new_v4().simple()),
            timestamp: Utc::now(),
            severity,
            source: "unknown".to_string(),
            message: message.into(),
            metrics: BTreeMap::new(),
            tags: BTreeSet::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

/// Output of the alert classifier; stored in the `analysis_result` slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub category: String,
    pub priority: String,
    /// Urgency in [0, 1].
    pub urgency_score: f64,
    #[serde(default)]
    pub root_cause_hints: Vec<String>,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
}

/// Output of the diagnoser; stored in the `diagnostic_result` slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticResult {
    pub root_cause: String,
    /// Confidence in [0, 1]; below the configured threshold triggers one
    /// supplementary-information round trip.
    pub confidence_score: f64,
    pub impact_assessment: String,
    #[serde(default)]
    pub affected_components: Vec<String>,
    pub business_impact: String,
    pub recovery_time_estimate: String,
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// Risk level of a plan or a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a remediation plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStep {
    pub step_id: String,
    /// Free-form verb such as `restart_service` or `scale_resources`.
    pub action_type: String,
    pub description: String,
    pub command: String,
    pub risk_level: RiskLevel,
}

/// Output of the action planner; stored in the `action_plan` slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub plan_id: String,
    pub priority: String,
    /// Minutes.
    pub estimated_duration: u32,
    pub risk_assessment: RiskLevel,
    #[serde(default)]
    pub approval_required: bool,
    #[serde(default)]
    pub steps: Vec<ActionStep>,
    #[serde(default)]
    pub rollback_plan: Vec<ActionStep>,
}

/// Terminal outcome of the execute-actions stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Partial,
    Failed,
    RejectedByOperator,
    ManualApprovalRequired,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Partial => "partial",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::RejectedByOperator => "rejected_by_operator",
            ExecutionStatus::ManualApprovalRequired => "manual_approval_required",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedStep {
    pub step_id: String,
    pub error: String,
}

/// Stored in the `execution_result` slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub plan_id: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub executed_steps: Vec<String>,
    #[serde(default)]
    pub failed_steps: Vec<FailedStep>,
    pub approval_received: bool,
    /// Operator reply or policy note explaining a non-run outcome.
    #[serde(default)]
    pub reason: Option<String>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Generated,
    Disabled,
}

/// Stored in the `report` slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentReport {
    pub incident_id: String,
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub status: ReportStatus,
    pub generated_at: DateTime<Utc>,
}
