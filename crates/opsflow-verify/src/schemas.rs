//! Default output schemas, one per oracle.

use serde_json::{json, Value};

use opsflow_contracts::{
    oracle::OracleKind,
    verify::{OutputSchema, VerificationRule, VerificationRuleType},
};

fn rule(id: &str, description: &str, rule_type: VerificationRuleType) -> VerificationRule {
    VerificationRule {
        rule_id: id.to_string(),
        description: description.to_string(),
        rule_type,
    }
}

fn unit_range(id: &str, field: &str) -> VerificationRule {
    rule(
        id,
        &format!("{} must lie in [0, 1]", field),
        VerificationRuleType::NumberRange {
            field_path: field.to_string(),
            min: 0.0,
            max: 1.0,
        },
    )
}

fn non_empty(id: &str, field: &str) -> VerificationRule {
    rule(
        id,
        &format!("{} must not be empty", field),
        VerificationRuleType::NonEmpty {
            field_path: field.to_string(),
        },
    )
}

fn object_requiring(fields: &[&str]) -> Value {
    json!({ "type": "object", "required": fields })
}

/// Schemas for every oracle kind.
pub fn default_schemas() -> Vec<OutputSchema> {
    vec![
        OutputSchema {
            schema_id: "alert-classifier-v1".to_string(),
            oracle: OracleKind::AlertClassifier,
            json_schema: object_requiring(&["category", "priority", "urgency_score"]),
            rules: vec![
                unit_range("urgency-range", "urgency_score"),
                non_empty("category-present", "category"),
            ],
        },
        OutputSchema {
            schema_id: "diagnoser-v1".to_string(),
            oracle: OracleKind::Diagnoser,
            json_schema: object_requiring(&["root_cause", "confidence_score"]),
            rules: vec![
                unit_range("confidence-range", "confidence_score"),
                non_empty("root-cause-present", "root_cause"),
            ],
        },
        OutputSchema {
            schema_id: "action-planner-v1".to_string(),
            oracle: OracleKind::ActionPlanner,
            json_schema: json!({
                "type": "object",
                "required": ["plan_id", "risk_assessment", "steps"],
                "properties": {
                    "steps": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["step_id", "action_type", "command", "risk_level"]
                        }
                    }
                }
            }),
            rules: vec![
                non_empty("plan-id-present", "plan_id"),
                rule(
                    "unique-step-ids",
                    "step ids must be unique within a plan",
                    VerificationRuleType::UniqueBy {
                        array_path: "steps".to_string(),
                        key: "step_id".to_string(),
                    },
                ),
                rule(
                    "no-root-wipe",
                    "no step may wipe the root filesystem",
                    VerificationRuleType::ForbiddenPattern {
                        field_path: "steps".to_string(),
                        pattern: "rm -rf /".to_string(),
                    },
                ),
            ],
        },
        OutputSchema {
            schema_id: "report-writer-v1".to_string(),
            oracle: OracleKind::ReportWriter,
            json_schema: object_requiring(&["report_summary"]),
            rules: vec![non_empty("summary-present", "report_summary")],
        },
        OutputSchema {
            schema_id: "extractor-v1".to_string(),
            oracle: OracleKind::Extractor,
            json_schema: object_requiring(&["confidence"]),
            rules: vec![unit_range("confidence-range", "confidence")],
        },
    ]
}

// ── Tests ─────────────────────────────────────────────────────────────────────
