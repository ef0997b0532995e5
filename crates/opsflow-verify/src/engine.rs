//! Schema-based oracle output verifier.
//!
//! Verification runs in two phases:
//!
//! 1. **Structural**: the output is validated against
//!    `OutputSchema::json_schema` using the `jsonschema` crate.
//! 2. **Semantic**: each `VerificationRule` is evaluated in order. All
//!    failures are collected before returning.
//!
//! Custom rules delegate to named functions registered via `register_rule`.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, warn};

use opsflow_contracts::{
    error::OpsflowResult,
    oracle::OracleKind,
    verify::{OutputSchema, VerificationFailure, VerificationReport, VerificationRuleType},
};
use opsflow_core::traits::OutputVerifier;

use crate::schemas::default_schemas;

/// A caller-supplied check over the whole output. Returns `Some(message)`
/// on failure.
pub type CustomVerifierFn = Box<dyn Fn(&Value) -> Option<String> + Send + Sync>;

pub struct SchemaVerifier {
    schemas: HashMap<OracleKind, OutputSchema>,
    custom_rules: HashMap<String, CustomVerifierFn>,
}

impl SchemaVerifier {
    /// A verifier with no schemas: every output passes.
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
            custom_rules: HashMap::new(),
        }
    }

    /// A verifier loaded with [`default_schemas`].
    pub fn with_default_schemas() -> Self {
        let mut verifier = Self::new();
        for schema in default_schemas() {
            verifier.register_schema(schema);
        }
        verifier
    }

    /// Install `schema` for its oracle, replacing any previous one.
    pub fn register_schema(&mut self, schema: OutputSchema) {
        self.schemas.insert(schema.oracle, schema);
    }

    pub fn schema(&self, oracle: OracleKind) -> Option<&OutputSchema> {
        self.schemas.get(&oracle)
    }

    /// Register a custom verification function under `name`. Registering
    /// the same name twice replaces the previous function.
    pub fn register_rule(&mut self, name: impl Into<String>, f: CustomVerifierFn) {
        self.custom_rules.insert(name.into(), f);
    }

    /// Run `schema` against `payload`.
    pub fn check(&self, payload: &Value, schema: &OutputSchema) -> VerificationReport {
        let mut failures: Vec<VerificationFailure> = Vec::new();

        // ── Phase 1: JSON Schema structural validation ────────────────────────
        if !schema.json_schema.is_null() {
            match jsonschema::validator_for(&schema.json_schema) {
                Ok(validator) => {
                    for error in validator.iter_errors(payload) {
                        let message = format!(
                            "JSON Schema violation at {}: {}",
                            error.instance_path, error
                        );
                        warn!(schema_id = %schema.schema_id, %message, "structural validation failure");
                        failures.push(VerificationFailure {
                            rule_id: "json-schema".to_string(),
                            message,
                        });
                    }
                }
                Err(e) => {
                    let message = format!("invalid JSON Schema document: {e}");
                    warn!(schema_id = %schema.schema_id, %message, "schema compilation failure");
                    failures.push(VerificationFailure {
                        rule_id: "json-schema".to_string(),
                        message,
                    });
                }
            }
        }

        // ── Phase 2: Semantic rule evaluation ────────────────────────────────
        for rule in &schema.rules {
            debug!(
                rule_id = %rule.rule_id,
                description = %rule.description,
                "evaluating verification rule"
            );

            if let Some(message) = self.evaluate(payload, &rule.rule_type) {
                warn!(rule_id = %rule.rule_id, %message, "semantic rule failed");
                failures.push(VerificationFailure {
                    rule_id: rule.rule_id.clone(),
                    message,
                });
            }
        }

        let passed = failures.is_empty();
        debug!(
            schema_id = %schema.schema_id,
            passed,
            failure_count = failures.len(),
            "verification complete"
        );
        VerificationReport { passed, failures }
    }

    fn evaluate(&self, payload: &Value, rule: &VerificationRuleType) -> Option<String> {
        match rule {
            VerificationRuleType::RequiredField { field_path } => {
                match resolve_path(payload, field_path) {
                    Some(_) => None,
                    None => Some(format!("required field '{field_path}' is missing or null")),
                }
            }

            VerificationRuleType::AllowedValues { field_path, allowed } => {
                match resolve_path(payload, field_path) {
                    None => Some(format!(
                        "field '{field_path}' is missing; cannot check allowed values"
                    )),
                    Some(actual) if allowed.contains(actual) => None,
                    Some(actual) => Some(format!(
                        "field '{field_path}' has value {actual} which is not in the allowed set"
                    )),
                }
            }

            VerificationRuleType::NumberRange {
                field_path,
                min,
                max,
            } => match resolve_path(payload, field_path).and_then(Value::as_f64) {
                None => Some(format!("field '{field_path}' is missing or not a number")),
                Some(n) if n >= *min && n <= *max => None,
                Some(n) => Some(format!(
                    "field '{field_path}' is {n}, outside [{min}, {max}]"
                )),
            },

            VerificationRuleType::NonEmpty { field_path } => {
                let empty = match resolve_path(payload, field_path) {
                    Some(Value::String(s)) => s.trim().is_empty(),
                    Some(Value::Array(items)) => items.is_empty(),
                    Some(_) => false,
                    None => true,
                };
                empty.then(|| format!("field '{field_path}' is empty"))
            }

            VerificationRuleType::UniqueBy { array_path, key } => {
                let items = resolve_path(payload, array_path)
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let mut seen = HashSet::new();
                items
                    .iter()
                    .filter_map(|item| item.get(key))
                    .find(|value| !seen.insert(value.to_string()))
                    .map(|dup| format!("'{array_path}' repeats {key} {dup}"))
            }

            VerificationRuleType::ForbiddenPattern {
                field_path,
                pattern,
            } => {
                let needle = pattern.to_lowercase();
                let value = resolve_path(payload, field_path)?;
                let mut strings = vec![];
                collect_strings(value, &mut strings);
                strings
                    .into_iter()
                    .any(|s| s.to_lowercase().contains(&needle))
                    .then(|| format!("field '{field_path}' contains forbidden pattern '{pattern}'"))
            }

            VerificationRuleType::Custom { function_name } => {
                match self.custom_rules.get(function_name.as_str()) {
                    Some(f) => f(payload),
                    None => Some(format!(
                        "no custom rule registered for function name '{function_name}'"
                    )),
                }
            }
        }
    }
}

impl Default for SchemaVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputVerifier for SchemaVerifier {
    fn verify(&self, oracle: OracleKind, output: &Value) -> OpsflowResult<VerificationReport> {
        match self.schemas.get(&oracle) {
            Some(schema) => Ok(self.check(output, schema)),
            None => {
                debug!(oracle = %oracle, "no schema registered; output accepted");
                Ok(VerificationReport {
                    passed: true,
                    failures: vec![],
                })
            }
        }
    }
}

/// Resolve a dotted path. `None` when a segment is missing or the value is
/// `null`.
fn resolve_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = value;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(v) if !v.is_null() => current = v,
            _ => return None,
        }
    }
    Some(current)
}

fn collect_strings<'v>(value: &'v Value, out: &mut Vec<&'v str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
