//! # opsflow-policy
//!
//! A TOML-driven execution-approval policy for the opsflow runtime.
//!
//! ## Overview
//!
//! [`TomlApprovalPolicy`] implements the
//! [`ApprovalPolicy`](opsflow_core::traits::ApprovalPolicy) trait. It decides
//! whether an action plan needs operator sign-off and maps the operator's
//! free-text reply to approved, rejected or modification-requested. Replies
//! it cannot read are rejected.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use opsflow_policy::TomlApprovalPolicy;
//!
//! let policy = TomlApprovalPolicy::default_policy()?;
//! // Pass `Arc::new(policy)` to `WorkflowEngine::builder(..).policy(..)`.
//! ```

pub mod engine;
pub mod rule;

pub use engine::{TomlApprovalPolicy, DEFAULT_POLICY};
pub use rule::{ApprovalConfig, Vocabulary};

// ── Tests ─────────────────────────────────────────────────────────────────────
