//! Deterministic stand-ins for the reasoning oracles and the action runner.
//!
//! In a production deployment these would call a language model and real
//! infrastructure. Here every judgment is a keyword lookup over the input
//! plus the mock monitoring data, so scenario runs are reproducible.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, PoisonError};

use serde_json::{json, Value};

use opsflow_contracts::{
    error::{OpsflowError, OpsflowResult},
    incident::{ActionPlan, ActionStep, AnalysisResult, DiagnosticResult, RiskLevel, Severity},
    oracle::{
        ClassifierInput, DiagnoserInput, DiagnosisBasis, ExtractedAlert, Extraction,
        ExtractorInput, PlannerInput, ReportDraft, ReportInput,
    },
    stage::Node,
};
use opsflow_core::traits::{
    ActionPlanner, ActionRunner, AlertClassifier, Diagnoser, Extractor, ReportWriter,
};

use crate::mock_data::{host_metrics, recent_logs, service_of};

// ── Keyword helpers ───────────────────────────────────────────────────────────

/// Bucket free text into an incident category.
pub fn categorize(text: &str) -> &'static str {
    let text = text.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| text.contains(w));
    if has(&["oom", "memory", "heap"]) {
        "resource"
    } else if has(&["cpu", "latency", "slow", "timeout", "timing out"]) {
        "performance"
    } else if has(&["disk", "no space", "volume"]) {
        "storage"
    } else if has(&["500", "5xx", "error", "exception"]) {
        "application"
    } else {
        "general"
    }
}

/// The first `api-N`, `web-N` or `db-*` token in `text`.
pub fn find_host(text: &str) -> Option<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .map(str::to_lowercase)
        .find(|token| {
            let (prefix, rest) = match token.split_once('-') {
                Some(parts) => parts,
                None => return false,
            };
            matches!(prefix, "api" | "web" | "db") && !rest.is_empty()
        })
}

fn root_cause_for(category: &str) -> &'static str {
    match category {
        "performance" => "runaway request handler saturating api worker threads",
        "resource" => "memory leak in api worker processes",
        "storage" => "unrotated application logs filling the database volume",
        "application" => "regression in release 2.3.0 raising server errors",
        _ => "undetermined service degradation",
    }
}

// ── Alert classifier ──────────────────────────────────────────────────────────

pub struct KeywordClassifier;

impl AlertClassifier for KeywordClassifier {
    fn classify(&self, input: &ClassifierInput) -> OpsflowResult<AnalysisResult> {
        let category = categorize(&input.message);
        let (priority, urgency_score) = match input.severity {
            Severity::Critical => ("p1", 0.95),
            Severity::High => ("p2", 0.8),
            Severity::Medium => ("p3", 0.5),
            Severity::Low => ("p4", 0.2),
        };
        let recommended_actions = match category {
            "performance" => vec!["scale out the api tier".to_string()],
            "resource" => vec!["recycle leaking workers".to_string()],
            "storage" => vec!["rotate and compress logs".to_string()],
            "application" => vec!["roll back the latest release".to_string()],
            _ => vec!["gather more telemetry".to_string()],
        };
        Ok(AnalysisResult {
            category: category.to_string(),
            priority: priority.to_string(),
            urgency_score,
            root_cause_hints: vec![root_cause_for(category).to_string()],
            recommended_actions,
        })
    }
}

// ── Diagnoser ─────────────────────────────────────────────────────────────────

/// Keyword diagnoser whose confidence scores follow a script.
///
/// Each call pops the next scripted entry; once the script is empty every
/// call returns `fallback`. An `Err` entry makes that call fail.
pub struct ScriptedDiagnoser {
    script: Mutex<VecDeque<Result<f64, String>>>,
    fallback: Result<f64, String>,
    supplements: Mutex<Vec<Option<String>>>,
}

impl ScriptedDiagnoser {
    pub fn confident(confidence: f64) -> Self {
        Self::scripted(vec![], confidence)
    }

    pub fn scripted(script: Vec<f64>, fallback: f64) -> Self {
        Self {
            script: Mutex::new(script.into_iter().map(Ok).collect()),
            fallback: Ok(fallback),
            supplements: Mutex::new(vec![]),
        }
    }

    /// Fails on the first `failures` calls, then answers with `confidence`.
    pub fn flaky(failures: usize, reason: &str, confidence: f64) -> Self {
        Self {
            script: Mutex::new((0..failures).map(|_| Err(reason.to_string())).collect()),
            fallback: Ok(confidence),
            supplements: Mutex::new(vec![]),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Err(reason.to_string()),
            supplements: Mutex::new(vec![]),
        }
    }

    /// How many times the diagnoser has been called.
    pub fn calls(&self) -> usize {
        self.supplements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// The supplementary text seen by each call, in order.
    pub fn supplements(&self) -> Vec<Option<String>> {
        self.supplements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Diagnoser for ScriptedDiagnoser {
    fn diagnose(&self, input: &DiagnoserInput) -> OpsflowResult<DiagnosticResult> {
        self.supplements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(input.supplementary.clone());

        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        let confidence_score = next.map_err(|reason| OpsflowError::oracle("diagnoser", reason))?;

        let (category, signal_text) = match &input.basis {
            DiagnosisBasis::Analysis { analysis } => {
                (analysis.category.clone(), analysis.root_cause_hints.join(" "))
            }
            DiagnosisBasis::Signals { alert, symptoms } => {
                let mut text = symptoms.iter().cloned().collect::<Vec<_>>().join(" ");
                if let Some(alert) = alert {
                    text = format!("{} {}", alert.message, text);
                }
                (categorize(&text).to_string(), text)
            }
        };

        let host = find_host(&signal_text).unwrap_or_else(|| "api-2".to_string());
        let mut evidence: Vec<String> = recent_logs(&category).into_iter().take(2).collect();
        evidence.extend(
            input
                .system_metrics
                .iter()
                .chain(host_metrics(&host).iter())
                .filter(|(_, v)| **v >= 0.9)
                .map(|(k, v)| format!("{} {} at {:.0}%", host, k, v * 100.0)),
        );
        evidence.extend(input.log_entries.iter().cloned());
        if let Some(extra) = &input.supplementary {
            evidence.push(format!("operator: {}", extra));
        }
        evidence.dedup();

        let service = service_of(&host);
        Ok(DiagnosticResult {
            root_cause: root_cause_for(&category).to_string(),
            confidence_score,
            impact_assessment: format!("{} tier degraded on {}", service, host),
            affected_components: vec![service.to_string(), host],
            business_impact: "checkout latency and failed orders".to_string(),
            recovery_time_estimate: "30m".to_string(),
            evidence,
        })
    }
}

// ── Action planner ────────────────────────────────────────────────────────────

/// Picks a runbook for the diagnosed root cause.
///
/// Leaks are fixed by restarting workers unless the operator has asked for
/// something else, in which case the planner falls back to scaling out.
pub struct RunbookPlanner;

impl RunbookPlanner {
    fn step(id: usize, action_type: &str, description: &str, command: &str, risk: RiskLevel) -> ActionStep {
        ActionStep {
            step_id: format!("s{}", id),
            action_type: action_type.to_string(),
            description: description.to_string(),
            command: command.to_string(),
            risk_level: risk,
        }
    }
}

impl ActionPlanner for RunbookPlanner {
    fn plan(&self, input: &PlannerInput) -> OpsflowResult<ActionPlan> {
        let diagnosis = &input.diagnosis;
        let host = diagnosis
            .affected_components
            .iter()
            .find(|c| c.contains('-'))
            .cloned()
            .unwrap_or_else(|| "api-2".to_string());
        let revised = input.system_context.contains_key("operator_feedback");
        let cause = diagnosis.root_cause.to_lowercase();

        let capture = Self::step(
            1,
            "collect_diagnostics",
            &format!("Capture a thread and heap dump on {}", host),
            &format!("opsctl dump --host {} --threads --heap", host),
            RiskLevel::Low,
        );
        let scale = |id| {
            Self::step(
                id,
                "scale_resources",
                "Add api capacity to absorb load",
                "kubectl scale deployment/api --replicas=6",
                RiskLevel::Low,
            )
        };

        let mut steps = vec![capture];
        if cause.contains("leak") && !revised {
            steps.push(Self::step(
                2,
                "restart_service",
                &format!("Restart the api worker on {}", host),
                &format!("ssh {} systemctl restart api-worker", host),
                RiskLevel::Medium,
            ));
        } else if cause.contains("logs") {
            steps.push(Self::step(
                2,
                "rotate_logs",
                "Force log rotation on the database host",
                "ssh db-primary logrotate -f /etc/logrotate.d/app",
                RiskLevel::Low,
            ));
        } else {
            steps.push(scale(2));
        }

        let risk_assessment = steps
            .iter()
            .map(|s| s.risk_level)
            .max()
            .unwrap_or(RiskLevel::Low);
        let rollback_plan = vec![Self::step(
            1,
            "scale_resources",
            "Return api to its baseline replica count",
            "kubectl scale deployment/api --replicas=3",
            RiskLevel::Low,
        )];

        Ok(ActionPlan {
            plan_id: format!("plan-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            priority: (if diagnosis.confidence_score >= 0.8 { "high" } else { "medium" }).to_string(),
            estimated_duration: 5 * steps.len() as u32,
            risk_assessment,
            approval_required: false,
            steps,
            rollback_plan,
        })
    }
}

// ── Report writer ─────────────────────────────────────────────────────────────

pub struct TemplateReporter;

impl ReportWriter for TemplateReporter {
    fn write_report(&self, input: &ReportInput) -> OpsflowResult<ReportDraft> {
        Ok(ReportDraft {
            report_summary: format!(
                "Incident {}. Diagnosis: {}. Remediation: {}. Outcome: {}.",
                input.incident_summary,
                input.diagnostic_summary,
                input.plan_summary,
                input.execution_summary
            ),
            key_findings: vec![
                input.diagnostic_summary.clone(),
                input.execution_summary.clone(),
            ],
            recommendations: vec![
                "add a saturation alert on api worker threads".to_string(),
                "review capacity headroom before the next release".to_string(),
            ],
        })
    }
}

// ── Extractor ─────────────────────────────────────────────────────────────────

/// Pulls severity, a CPU or memory percentage, symptoms and the affected host
/// out of an operator's free text.
pub struct KeywordExtractor;

const SYMPTOM_WORDS: &[(&str, &str)] = &[
    ("slow", "slow responses"),
    ("latency", "slow responses"),
    ("timeout", "request timeouts"),
    ("timing out", "request timeouts"),
    ("500", "http 5xx errors"),
    ("5xx", "http 5xx errors"),
    ("oom", "out-of-memory kills"),
    ("disk full", "disk full"),
];

impl KeywordExtractor {
    fn severity(text: &str) -> Option<Severity> {
        text.split(|c: char| !c.is_alphanumeric())
            .find_map(|word| match word {
                "sev1" | "p1" => Some(Severity::Critical),
                "sev2" | "p2" => Some(Severity::High),
                other => Severity::parse(other),
            })
    }

    /// `cpu 95%`, `CPU at 92%`, `memory 88%`: the first percentage after a
    /// metric name, as a fraction.
    fn metrics(text: &str) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        for (word, metric) in [("cpu", "cpu_usage"), ("memory", "memory_usage")] {
            let Some(at) = text.find(word) else { continue };
            let value = text[at..]
                .split_whitespace()
                .take(4)
                .find_map(|token| {
                    let digits = token.trim_end_matches(|c: char| !c.is_ascii_digit() && c != '%');
                    digits.strip_suffix('%')?.parse::<f64>().ok()
                });
            if let Some(percent) = value {
                metrics.insert(metric.to_string(), percent / 100.0);
            }
        }
        metrics
    }
}

impl Extractor for KeywordExtractor {
    fn extract(&self, input: &ExtractorInput) -> OpsflowResult<Extraction> {
        let text = input.text.to_lowercase();
        let symptoms: BTreeSet<String> = SYMPTOM_WORDS
            .iter()
            .filter(|(word, _)| text.contains(word))
            .map(|(_, symptom)| symptom.to_string())
            .filter(|s| !input.known_symptoms.contains(s))
            .collect();

        let mut context = BTreeMap::new();
        let host = find_host(&text);
        if let Some(host) = &host {
            context.insert("host".to_string(), json!(host));
            context.insert("service".to_string(), json!(service_of(host)));
            context.insert(
                "log_entries".to_string(),
                Value::from(recent_logs(categorize(&text))),
            );
        }

        let metrics = Self::metrics(&text);
        let severity = Self::severity(&text);
        let alert = match (input.has_alert, severity) {
            (false, Some(severity)) if host.is_some() || !metrics.is_empty() => Some(ExtractedAlert {
                severity,
                message: input.text.trim().to_string(),
                source: Some("operator".to_string()),
                metrics,
            }),
            _ => None,
        };

        let (next_stage, confidence, reasoning) = if alert.is_some() {
            (
                Some(Node::IngestAlert),
                0.8,
                "text describes an alert with a severity".to_string(),
            )
        } else if !symptoms.is_empty() {
            (None, 0.6, format!("found {} symptom(s)", symptoms.len()))
        } else {
            (None, 0.1, "no incident details recognised".to_string())
        };

        Ok(Extraction {
            alert,
            symptoms,
            context,
            next_stage,
            confidence,
            reasoning,
        })
    }
}

// ── Action runner ─────────────────────────────────────────────────────────────

/// Records each command instead of running it.
///
/// Commands containing `fail_marker` fail, so partial executions can be
/// shown.
#[derive(Default)]
pub struct DryRunRunner {
    fail_marker: Option<String>,
    executed: Mutex<Vec<String>>,
}

impl DryRunRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            executed: Mutex::new(vec![]),
        }
    }

    /// Commands run so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ActionRunner for DryRunRunner {
    fn run_step(&self, step: &ActionStep) -> OpsflowResult<String> {
        if let Some(marker) = &self.fail_marker {
            if step.command.contains(marker.as_str()) {
                return Err(OpsflowError::oracle(
                    "action-runner",
                    format!("'{}' exited with status 1", step.command),
                ));
            }
        }
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(step.command.clone());
        Ok(format!("dry-run: {}", step.command))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
