//! # opsflow-verify
//!
//! Oracle output verification for the opsflow runtime.
//!
//! [`SchemaVerifier`] implements the core
//! [`OutputVerifier`](opsflow_core::traits::OutputVerifier) trait. Each oracle
//! kind maps to one [`OutputSchema`](opsflow_contracts::verify::OutputSchema):
//! a JSON Schema document for shape plus semantic rules for meaning. A
//! failing report makes the stage treat the output as malformed.
//!
//! ```rust,ignore
//! use opsflow_verify::SchemaVerifier;
//!
//! let verifier = SchemaVerifier::with_default_schemas();
//! // Pass `Arc::new(verifier)` to `WorkflowEngine::builder(..).verifier(..)`.
//! ```

pub mod engine;
pub mod schemas;

pub use engine::{CustomVerifierFn, SchemaVerifier};
pub use schemas::default_schemas;
