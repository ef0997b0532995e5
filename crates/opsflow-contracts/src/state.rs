//! Shared State: the single record threaded through every node of one
//! workflow instance.
//!
//! The message log and the error list are append-only and therefore private
//! behind accessors. Stage output slots are written through [`IncidentState::set_once`],
//! which refuses (softly, with a warning) to overwrite a populated slot or to
//! fill a slot whose prerequisite is missing.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::incident::{
    ActionPlan, Alert, AnalysisResult, DiagnosticResult, ExecutionResult, IncidentReport,
};
use crate::interaction::InteractionState;
use crate::stage::{Node, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Agent,
}

/// What a message records, for readers that need more than the prose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageTag {
    /// Router decision naming the chosen node.
    Route { target: Node },
    /// Engine hop that did not go through the Router.
    Transition { from: Node, to: Node },
    StageSummary { stage: Stage },
    /// Why a stage could not run; doubles as the collection prompt.
    InfoRequest,
    /// A human request or the answer to one.
    Gate { request_id: String },
    /// Closing narrative written by the terminal node.
    Final,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tag: Option<MessageTag>,
}

/// A write-once stage output slot (plus the alert, which is replaced only
/// by explicit re-extraction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Alert,
    AnalysisResult,
    DiagnosticResult,
    ActionPlan,
    ExecutionResult,
    Report,
}

impl Slot {
    pub const ALL: [Slot; 6] = [
        Slot::Alert,
        Slot::AnalysisResult,
        Slot::DiagnosticResult,
        Slot::ActionPlan,
        Slot::ExecutionResult,
        Slot::Report,
    ];

    /// The slot a stage fills on success.
    pub fn output_of(stage: Stage) -> Slot {
        match stage {
            Stage::IngestAlert => Slot::AnalysisResult,
            Stage::Diagnose => Slot::DiagnosticResult,
            Stage::PlanActions => Slot::ActionPlan,
            Stage::ExecuteActions => Slot::ExecutionResult,
            Stage::GenerateReport => Slot::Report,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Alert => "alert",
            Slot::AnalysisResult => "analysis_result",
            Slot::DiagnosticResult => "diagnostic_result",
            Slot::ActionPlan => "action_plan",
            Slot::ExecutionResult => "execution_result",
            Slot::Report => "report",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value destined for one [`Slot`].
#[derive(Debug, Clone, PartialEq)]
pub enum SlotValue {
    Alert(Alert),
    AnalysisResult(AnalysisResult),
    DiagnosticResult(DiagnosticResult),
    ActionPlan(ActionPlan),
    ExecutionResult(ExecutionResult),
    Report(IncidentReport),
}

impl SlotValue {
    pub fn slot(&self) -> Slot {
        match self {
            SlotValue::Alert(_) => Slot::Alert,
            SlotValue::AnalysisResult(_) => Slot::AnalysisResult,
            SlotValue::DiagnosticResult(_) => Slot::DiagnosticResult,
            SlotValue::ActionPlan(_) => Slot::ActionPlan,
            SlotValue::ExecutionResult(_) => Slot::ExecutionResult,
            SlotValue::Report(_) => Slot::Report,
        }
    }
}

impl From<Alert> for SlotValue {
    fn from(v: Alert) -> Self {
        SlotValue::Alert(v)
    }
}

impl From<AnalysisResult> for SlotValue {
    fn from(v: AnalysisResult) -> Self {
        SlotValue::AnalysisResult(v)
    }
}

impl From<DiagnosticResult> for SlotValue {
    fn from(v: DiagnosticResult) -> Self {
        SlotValue::DiagnosticResult(v)
    }
}

impl From<ActionPlan> for SlotValue {
    fn from(v: ActionPlan) -> Self {
        SlotValue::ActionPlan(v)
    }
}

impl From<ExecutionResult> for SlotValue {
    fn from(v: ExecutionResult) -> Self {
        SlotValue::ExecutionResult(v)
    }
}

impl From<IncidentReport> for SlotValue {
    fn from(v: IncidentReport) -> Self {
        SlotValue::Report(v)
    }
}

/// Result of a slot write. Only `Written` changed the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotWrite {
    Written,
    AlreadySet,
    PreconditionMissing,
}

/// Shared State for one incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentState {
    incident_id: String,
    created_at: DateTime<Utc>,
    messages: Vec<Message>,
    alert: Option<Alert>,
    symptoms: Option<BTreeSet<String>>,
    context: Option<BTreeMap<String, Value>>,
    analysis_result: Option<AnalysisResult>,
    diagnostic_result: Option<DiagnosticResult>,
    action_plan: Option<ActionPlan>,
    execution_result: Option<ExecutionResult>,
    report: Option<IncidentReport>,
    errors: Vec<String>,

    /// One-shot routing hint, cleared by the Router when it decides.
    #[serde(default)]
    pub target_stage: Option<Node>,
    /// Retries consumed by the error node.
    #[serde(default)]
    pub retry_count: u32,
    /// The stage whose failure sent the run to the error node.
    #[serde(default)]
    pub failed_stage: Option<Stage>,
    #[serde(default)]
    pub interaction: InteractionState,
    /// Number of leading messages already offered to the extractor.
    #[serde(default)]
    extracted_through: usize,
}

impl Default for IncidentState {
    fn default() -> Self {
        Self::new()
    }
}

impl IncidentState {
    pub fn new() -> Self {
        Self {
            incident_id: format!("inc-{}", uuid::Uuid::new_v4().simple()),
            created_at: Utc::now(),
            messages: vec![],
            alert: None,
            symptoms: None,
            context: None,
            analysis_result: None,
            diagnostic_result: None,
            action_plan: None,
            execution_result: None,
            report: None,
            errors: vec![],
            target_stage: None,
            retry_count: 0,
            failed_stage: None,
            interaction: InteractionState::default(),
            extracted_through: 0,
        }
    }

    pub fn incident_id(&self) -> &str {
        &self.incident_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    // ── Message log ──────────────────────────────────────────────────────────

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn append_message(&mut self, role: Role, content: impl Into<String>) {
        self.push_message(role, content.into(), None);
    }

    pub fn append_tagged(&mut self, role: Role, content: impl Into<String>, tag: MessageTag) {
        self.push_message(role, content.into(), Some(tag));
    }

    fn push_message(&mut self, role: Role, content: String, tag: Option<MessageTag>) {
        self.messages.push(Message {
            role,
            content,
            timestamp: Utc::now(),
            tag,
        });
    }

    /// Target of the most recent Router decision recorded in the log.
    pub fn last_route_target(&self) -> Option<Node> {
        self.messages.iter().rev().find_map(|m| match &m.tag {
            Some(MessageTag::Route { target }) => Some(*target),
            _ => None,
        })
    }

    /// Human messages not yet offered to the extractor.
    pub fn unread_human_input(&self) -> Vec<String> {
        self.messages
            .iter()
            .skip(self.extracted_through)
            .filter(|m| m.role == Role::Human)
            .map(|m| m.content.clone())
            .collect()
    }

    /// Mark every message so far as read. Stages that consume an operator
    /// reply themselves call this so the reply is not re-extracted.
    pub fn mark_input_read(&mut self) {
        self.extracted_through = self.messages.len();
    }

    // ── Additive slots ───────────────────────────────────────────────────────

    pub fn symptoms(&self) -> Option<&BTreeSet<String>> {
        self.symptoms.as_ref()
    }

    /// Union `new` into the symptom set. Blank entries are ignored; returns
    /// how many symptoms were actually added.
    pub fn union_symptoms<I, S>(&mut self, new: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = 0;
        for symptom in new {
            let symptom = symptom.into().trim().to_string();
            if symptom.is_empty() {
                continue;
            }
            if self.symptoms.get_or_insert_with(BTreeSet::new).insert(symptom) {
                added += 1;
            }
        }
        added
    }

    pub fn context(&self) -> Option<&BTreeMap<String, Value>> {
        self.context.as_ref()
    }

    /// Merge `delta` into the context map; same-named keys take the new value.
    pub fn merge_context(&mut self, delta: BTreeMap<String, Value>) {
        if delta.is_empty() {
            return;
        }
        self.context.get_or_insert_with(BTreeMap::new).extend(delta);
    }

    /// True when any of alert, symptoms or context carries information.
    pub fn has_signal(&self) -> bool {
        self.alert.is_some()
            || self.symptoms.as_ref().is_some_and(|s| !s.is_empty())
            || self.context.as_ref().is_some_and(|c| !c.is_empty())
    }

    // ── Write-once slots ─────────────────────────────────────────────────────

    pub fn alert(&self) -> Option<&Alert> {
        self.alert.as_ref()
    }

    pub fn analysis_result(&self) -> Option<&AnalysisResult> {
        self.analysis_result.as_ref()
    }

    pub fn diagnostic_result(&self) -> Option<&DiagnosticResult> {
        self.diagnostic_result.as_ref()
    }

    pub fn action_plan(&self) -> Option<&ActionPlan> {
        self.action_plan.as_ref()
    }

    pub fn execution_result(&self) -> Option<&ExecutionResult> {
        self.execution_result.as_ref()
    }

    pub fn report(&self) -> Option<&IncidentReport> {
        self.report.as_ref()
    }

    pub fn has(&self, slot: Slot) -> bool {
        match slot {
            Slot::Alert => self.alert.is_some(),
            Slot::AnalysisResult => self.analysis_result.is_some(),
            Slot::DiagnosticResult => self.diagnostic_result.is_some(),
            Slot::ActionPlan => self.action_plan.is_some(),
            Slot::ExecutionResult => self.execution_result.is_some(),
            Slot::Report => self.report.is_some(),
        }
    }

    /// Whether the inputs `slot` is derived from are present.
    pub fn precondition_met(&self, slot: Slot) -> bool {
        match slot {
            Slot::Alert => true,
            Slot::AnalysisResult => self.alert.is_some(),
            Slot::DiagnosticResult => self.has_signal(),
            Slot::ActionPlan => self.diagnostic_result.is_some(),
            Slot::ExecutionResult => self.action_plan.is_some(),
            Slot::Report => self.execution_result.is_some(),
        }
    }

    /// Whether `stage` has what it needs to run.
    pub fn stage_ready(&self, stage: Stage) -> bool {
        self.precondition_met(Slot::output_of(stage))
    }

    /// Whether `stage` has already committed its output for this pass.
    pub fn stage_done(&self, stage: Stage) -> bool {
        self.has(Slot::output_of(stage))
    }

    /// Write a slot that is currently empty.
    ///
    /// A populated slot is left untouched (`AlreadySet`) and a slot whose
    /// prerequisite is absent is refused (`PreconditionMissing`); both log a
    /// warning and leave the state unchanged.
    pub fn set_once(&mut self, value: impl Into<SlotValue>) -> SlotWrite {
        let value = value.into();
        let slot = value.slot();
        if self.has(slot) {
            warn!(
                incident_id = %self.incident_id,
                slot = %slot,
                "set_once on populated slot ignored"
            );
            return SlotWrite::AlreadySet;
        }
        self.write_slot(value)
    }

    /// Replace a slot's value, populated or not. The prerequisite is still
    /// enforced.
    pub fn overwrite(&mut self, value: impl Into<SlotValue>) -> SlotWrite {
        self.write_slot(value.into())
    }

    fn write_slot(&mut self, value: SlotValue) -> SlotWrite {
        let slot = value.slot();
        if !self.precondition_met(slot) {
            warn!(
                incident_id = %self.incident_id,
                slot = %slot,
                "slot write refused: prerequisite missing"
            );
            return SlotWrite::PreconditionMissing;
        }
        match value {
            SlotValue::Alert(v) => self.alert = Some(v),
            SlotValue::AnalysisResult(v) => self.analysis_result = Some(v),
            SlotValue::DiagnosticResult(v) => self.diagnostic_result = Some(v),
            SlotValue::ActionPlan(v) => self.action_plan = Some(v),
            SlotValue::ExecutionResult(v) => self.execution_result = Some(v),
            SlotValue::Report(v) => self.report = Some(v),
        }
        SlotWrite::Written
    }

    /// Empty a slot so its stage can run a new pass. Refused when a later
    /// slot derived from it is still populated.
    pub fn clear(&mut self, slot: Slot) -> bool {
        let dependent = match slot {
            Slot::Alert => Some(Slot::AnalysisResult),
            Slot::AnalysisResult => None,
            Slot::DiagnosticResult => Some(Slot::ActionPlan),
            Slot::ActionPlan => Some(Slot::ExecutionResult),
            Slot::ExecutionResult => Some(Slot::Report),
            Slot::Report => None,
        };
        if let Some(dep) = dependent {
            if self.has(dep) {
                warn!(
                    incident_id = %self.incident_id,
                    slot = %slot,
                    dependent = %dep,
                    "clear refused: dependent slot populated"
                );
                return false;
            }
        }
        match slot {
            Slot::Alert => self.alert = None,
            Slot::AnalysisResult => self.analysis_result = None,
            Slot::DiagnosticResult => self.diagnostic_result = None,
            Slot::ActionPlan => self.action_plan = None,
            Slot::ExecutionResult => self.execution_result = None,
            Slot::Report => self.report = None,
        }
        true
    }

    // ── Errors ───────────────────────────────────────────────────────────────

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn push_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }
}
