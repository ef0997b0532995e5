//! The Router: the only component that chooses the next stage.
//!
//! [`Router::decide`] is pure. It is evaluated at workflow entry, after the
//! information-collection node, after a retry, and whenever a stage's
//! normal successor is not applicable.
//!
//! Decision priority (first match wins):
//!
//! 1. `target_stage` hint: taken if its stage's precondition holds, else
//!    information-collection.
//! 2. The most recent `route` message naming a stage that is still ready
//!    and not yet done.
//! 3. Data-driven inference over the slots.

use std::fmt;

use tracing::debug;

use opsflow_contracts::{
    oracle::Extraction,
    stage::{Node, Stage},
    state::{IncidentState, SlotWrite},
};

/// Which priority tier produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    TargetHint,
    MessageHistory,
    DataInference,
}

impl fmt::Display for RouteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RouteSource::TargetHint => "target hint",
            RouteSource::MessageHistory => "message history",
            RouteSource::DataInference => "data inference",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub next: Node,
    pub source: RouteSource,
    pub justification: String,
}

impl RouteDecision {
    fn new(next: Node, source: RouteSource, justification: impl Into<String>) -> Self {
        Self {
            next,
            source,
            justification: justification.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Router {
    enable_reporting: bool,
}

impl Router {
    pub fn new(enable_reporting: bool) -> Self {
        Self { enable_reporting }
    }

    pub fn decide(&self, state: &IncidentState) -> RouteDecision {
        if let Some(decision) = self.from_hint(state) {
            return decision;
        }
        if let Some(decision) = self.from_history(state) {
            return decision;
        }
        self.infer(state)
    }

    // ── Priority 1 ───────────────────────────────────────────────────────────

    fn from_hint(&self, state: &IncidentState) -> Option<RouteDecision> {
        let hint = state.target_stage?;
        if hint == Node::CollectInfo {
            return Some(RouteDecision::new(
                Node::CollectInfo,
                RouteSource::TargetHint,
                "hint requests more information",
            ));
        }
        let Some(stage) = hint.stage() else {
            debug!(hint = %hint, "ignoring non-stage routing hint");
            return None;
        };
        if state.stage_ready(stage) {
            Some(RouteDecision::new(
                hint,
                RouteSource::TargetHint,
                format!("hinted stage {} has its inputs", stage),
            ))
        } else {
            Some(RouteDecision::new(
                Node::CollectInfo,
                RouteSource::TargetHint,
                format!("hinted stage {} is missing its inputs", stage),
            ))
        }
    }

    // ── Priority 2 ───────────────────────────────────────────────────────────

    fn from_history(&self, state: &IncidentState) -> Option<RouteDecision> {
        let target = state.last_route_target()?;
        let stage = target.stage()?;
        if state.stage_ready(stage) && !state.stage_done(stage) {
            Some(RouteDecision::new(
                target,
                RouteSource::MessageHistory,
                format!("resuming previously routed stage {}", stage),
            ))
        } else {
            None
        }
    }

    // ── Priority 3 ───────────────────────────────────────────────────────────

    fn infer(&self, state: &IncidentState) -> RouteDecision {
        let has_alert = state.alert().is_some();
        let has_symptoms = state.symptoms().is_some_and(|s| !s.is_empty());
        let has_analysis = state.analysis_result().is_some();
        let has_diagnosis = state.diagnostic_result().is_some();
        let has_plan = state.action_plan().is_some();
        let has_execution = state.execution_result().is_some();
        let has_report = state.report().is_some();

        let infer = |stage: Stage, why: &str| {
            RouteDecision::new(stage.into(), RouteSource::DataInference, why)
        };

        if has_plan && !has_execution {
            return infer(Stage::ExecuteActions, "action plan ready, not yet executed");
        }
        if has_diagnosis && !has_plan {
            return infer(Stage::PlanActions, "diagnosis available, no action plan");
        }
        if (has_symptoms || has_alert) && !has_diagnosis {
            return infer(Stage::Diagnose, "incident signals present, no diagnosis");
        }
        if has_alert && !has_analysis {
            return infer(Stage::IngestAlert, "alert present, not yet classified");
        }
        if has_execution && !has_report && self.enable_reporting {
            return infer(Stage::GenerateReport, "execution finished, report pending");
        }
        if has_execution {
            return RouteDecision::new(
                Node::Terminal,
                RouteSource::DataInference,
                "all work complete",
            );
        }
        RouteDecision::new(
            Node::CollectInfo,
            RouteSource::DataInference,
            "not enough information to pick a stage",
        )
    }
}

/// Fold an extractor result into Shared State.
///
/// The alert is applied only when none is present; symptoms are unioned and
/// context merged. A suggested next node becomes `target_stage` only when
/// `confidence` exceeds `floor`. Returns a one-line summary of what changed.
pub fn apply_extraction(state: &mut IncidentState, extraction: Extraction, floor: f64) -> String {
    let mut changes = vec![];

    if let Some(extracted) = extraction.alert {
        if state.alert().is_none() {
            if state.set_once(extracted.into_alert()) == SlotWrite::Written {
                changes.push("alert".to_string());
            }
        } else {
            debug!(incident_id = %state.incident_id(), "extracted alert ignored; alert already set");
        }
    }

    let added = state.union_symptoms(extraction.symptoms);
    if added > 0 {
        changes.push(format!("{} symptom(s)", added));
    }

    if !extraction.context.is_empty() {
        changes.push(format!("{} context key(s)", extraction.context.len()));
        state.merge_context(extraction.context);
    }

    match extraction.next_stage {
        Some(next) if extraction.confidence > floor => {
            state.target_stage = Some(next);
            changes.push(format!(
                "suggested {} ({:.2})",
                next, extraction.confidence
            ));
        }
        Some(next) => {
            debug!(
                suggested = %next,
                confidence = extraction.confidence,
                floor,
                "extractor suggestion below confidence floor; ignored"
            );
        }
        None => {}
    }

    if changes.is_empty() {
        "extraction found nothing new".to_string()
    } else {
        format!("extracted {}", changes.join(", "))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
