//! # opsflow-core
//!
//! The resumable incident-response workflow runtime.
//!
//! This crate provides:
//! - The collaborator traits (oracles, action runner, approval policy,
//!   output verifier, audit writer, checkpoint store)
//! - The `Router` and the five stage handlers
//! - The Human-Interaction Gate (`gate`)
//! - The `WorkflowEngine` that drives an instance through the graph,
//!   suspending and resuming across operator interactions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use opsflow_core::{EngineConfig, WorkflowEngine};
//!
//! let engine = WorkflowEngine::builder(EngineConfig::default())
//!     .classifier(classifier)
//!     .diagnoser(diagnoser)
//!     .planner(planner)
//!     .reporter(reporter)
//!     .runner(runner)
//!     .policy(policy)
//!     .build()?;
//! let outcome = engine.start(WorkflowInput::Alert(alert)).await?;
//! ```

pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod gate;
pub mod router;
pub mod stages;
pub mod traits;

pub use checkpoint::{FileCheckpointStore, InMemoryCheckpointStore};
pub use config::EngineConfig;
pub use engine::{WorkflowEngine, WorkflowEngineBuilder};
pub use router::{RouteDecision, RouteSource, Router};
