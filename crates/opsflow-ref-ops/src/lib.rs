//! # opsflow-ref-ops
//!
//! Operations reference runtime for the opsflow incident-response workflow.
//!
//! Demonstrates five incident scenarios using mock monitoring data and
//! deterministic stand-in oracles:
//!
//! 1. **CPU Incident, End to End** — every stage in order, observed through
//!    the streaming execution mode.
//! 2. **Low-Confidence Diagnosis** — one clarification round trip and
//!    exactly one extra diagnoser call.
//! 3. **Risky Restart Approval** — a denylisted verb stops execution for an
//!    operator's go/no-go; rejection runs nothing.
//! 4. **Free-Text Report** — extraction from operator prose, with an
//!    information-collection round trip.
//! 5. **Retry Exhaustion** — a failing oracle spends the retry budget and
//!    the run ends as failed.
//!
//! All data is hardcoded and fictional. No external API calls are made and
//! no command is really executed.

pub mod mock_data;
pub mod oracles;
pub mod scenarios;
pub mod wiring;

pub use wiring::{ReferenceRuntime, ReferenceWiring, OPS_POLICY};
