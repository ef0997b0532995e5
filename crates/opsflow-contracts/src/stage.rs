//! Stage and graph-node identities.
//!
//! A `Stage` is a unit of incident-response work with a handler. A `Node` is
//! any vertex of the workflow graph: the five stages plus the entry, router,
//! information-collection, error and terminal nodes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One kind of incident-response work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    IngestAlert,
    Diagnose,
    PlanActions,
    ExecuteActions,
    GenerateReport,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 5] = [
        Stage::IngestAlert,
        Stage::Diagnose,
        Stage::PlanActions,
        Stage::ExecuteActions,
        Stage::GenerateReport,
    ];

    /// Stable kebab-case name used in messages and audit records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::IngestAlert => "ingest-alert",
            Stage::Diagnose => "diagnose",
            Stage::PlanActions => "plan-actions",
            Stage::ExecuteActions => "execute-actions",
            Stage::GenerateReport => "generate-report",
        }
    }

    /// Parse a stage name, accepting kebab-case, snake_case, and the task
    /// names reasoning oracles tend to emit (`process_alert`, `diagnose_issue`).
    pub fn parse(name: &str) -> Option<Stage> {
        let normalized = name.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "ingest_alert" | "process_alert" => Some(Stage::IngestAlert),
            "diagnose" | "diagnose_issue" => Some(Stage::Diagnose),
            "plan_actions" => Some(Stage::PlanActions),
            "execute_actions" => Some(Stage::ExecuteActions),
            "generate_report" => Some(Stage::GenerateReport),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A vertex of the workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Entry,
    Router,
    IngestAlert,
    Diagnose,
    PlanActions,
    ExecuteActions,
    GenerateReport,
    CollectInfo,
    ErrorHandler,
    Terminal,
}

impl Node {
    /// The stage this node runs, if it is a stage node.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Node::IngestAlert => Some(Stage::IngestAlert),
            Node::Diagnose => Some(Stage::Diagnose),
            Node::PlanActions => Some(Stage::PlanActions),
            Node::ExecuteActions => Some(Stage::ExecuteActions),
            Node::GenerateReport => Some(Stage::GenerateReport),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Node::Entry => "entry",
            Node::Router => "router",
            Node::IngestAlert => Stage::IngestAlert.as_str(),
            Node::Diagnose => Stage::Diagnose.as_str(),
            Node::PlanActions => Stage::PlanActions.as_str(),
            Node::ExecuteActions => Stage::ExecuteActions.as_str(),
            Node::GenerateReport => Stage::GenerateReport.as_str(),
            Node::CollectInfo => "information-collection",
            Node::ErrorHandler => "error",
            Node::Terminal => "terminal",
        }
    }

    /// Parse a routing target named by an oracle: any stage name, or one of
    /// the information-collection spellings.
    pub fn parse_target(name: &str) -> Option<Node> {
        if let Some(stage) = Stage::parse(name) {
            return Some(stage.into());
        }
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "collect_info" | "information_collection" => Some(Node::CollectInfo),
            _ => None,
        }
    }
}

impl From<Stage> for Node {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::IngestAlert => Node::IngestAlert,
            Stage::Diagnose => Node::Diagnose,
            Stage::PlanActions => Node::PlanActions,
            Stage::ExecuteActions => Node::ExecuteActions,
            Stage::GenerateReport => Node::GenerateReport,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
