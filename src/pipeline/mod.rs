//! The guard pipeline: context, outcome types, hooks, and the orchestrator.
//!
//! ```text
//! CheckContext ──► Guardrails::check_input
//!                    │
//!                    ├─► OnBeforeCheck hook
//!                    ├─► TextNormalizer (once, before any detector)
//!                    ├─► detectors in order (cancellation-aware, timed)
//!                    ├─► aggregator ──► Pass | Flag | Escalate | Block
//!                    ├─► RemoteJudge (Escalate only, hook-gated)
//!                    └─► decision hooks, stats, latency
//! ```
//!
//! [`Guardrails::check_output`] is the same shape for model output, minus
//! the normalization step.

pub mod context;
pub mod hooks;
pub mod orchestrator;
pub mod outcome;

pub use context::{CheckContext, CheckContextBuilder, HistoryMessage};
pub use hooks::{ErrorAction, GuardHooks, HookDecision};
pub use orchestrator::{Guardrails, GuardrailsBuilder};
pub use outcome::{Decision, GuardError, GuardResult, Severity, TriggeredDetector};
