//! Output verification schema and report types.
//!
//! Before an oracle output is committed to Shared State, the verifier runs
//! its JSON form against the `OutputSchema` registered for that oracle. A
//! failing report is a malformed-result condition.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::oracle::OracleKind;

/// Structural and semantic checks for one oracle's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSchema {
    /// e.g. "diagnoser-v1".
    pub schema_id: String,
    pub oracle: OracleKind,
    /// JSON Schema document; `Value::Null` skips structural validation.
    #[serde(default)]
    pub json_schema: Value,
    #[serde(default)]
    pub rules: Vec<VerificationRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRule {
    /// Referenced in failure reports.
    pub rule_id: String,
    pub description: String,
    pub rule_type: VerificationRuleType,
}

/// Field paths are dotted (`plan.steps`); array elements are not addressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VerificationRuleType {
    /// Present and non-null.
    RequiredField { field_path: String },

    /// Equal to one of `allowed`.
    AllowedValues {
        field_path: String,
        allowed: Vec<Value>,
    },

    /// A number within `[min, max]`.
    NumberRange {
        field_path: String,
        min: f64,
        max: f64,
    },

    /// A string with non-whitespace content, or a non-empty array.
    NonEmpty { field_path: String },

    /// Every object in the array at `array_path` has a distinct `key`.
    UniqueBy { array_path: String, key: String },

    /// The string (or any string in the array of objects, at any depth)
    /// does not contain `pattern`, case-insensitively.
    ForbiddenPattern { field_path: String, pattern: String },

    /// A function registered with the verifier by name.
    Custom { function_name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub passed: bool,
    pub failures: Vec<VerificationFailure>,
}

impl VerificationReport {
    pub fn summary(&self) -> String {
        self.failures
            .iter()
            .map(|f| format!("[{}] {}", f.rule_id, f.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationFailure {
    pub rule_id: String,
    pub message: String,
}
