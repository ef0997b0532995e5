//! # opsflow-audit
//!
//! Append-only, SHA-256 hash-chained transition log for the opsflow
//! runtime.
//!
//! ## Overview
//!
//! Every hop the engine takes is a `TransitionRecord`. The writers here wrap
//! each record in an `AuditEvent` linked to the previous event of the same
//! instance by its hash. Changing any byte of any event breaks the chain and
//! is caught by `verify_chain`.
//!
//! - [`InMemoryAuditWriter`] keeps chains for the life of the process.
//! - [`FileAuditWriter`] appends to one JSON-lines file per instance, so a
//!   chain continues across a suspend/resume that spans processes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use opsflow_audit::InMemoryAuditWriter;
//!
//! let audit = InMemoryAuditWriter::new();
//! let engine = WorkflowEngine::builder(config).audit(Arc::new(audit.clone()))/* … */.build()?;
//! // after a run:
//! assert!(audit.verify_integrity(&instance_id));
//! let log = audit.export_log(&instance_id);
//! ```

pub mod chain;
pub mod event;
pub mod file;
pub mod memory;

pub use chain::{hash_event, verify_chain};
pub use event::{AuditEvent, AuditLog};
pub use file::FileAuditWriter;
pub use memory::InMemoryAuditWriter;

// ── Tests ─────────────────────────────────────────────────────────────────────
