//! Named, categorized regex rules and the engine that evaluates them.
//!
//! The [`registry`](crate::patterns::registry) holds [`PatternDefinition`]s
//! keyed by [`PatternCategory`]; the [`engine`](crate::patterns::engine)
//! evaluates a category's enabled patterns with a combined `RegexSet` first
//! pass, per-pattern span extraction, and a per-pattern match budget.
//! [`builtin`](crate::patterns::builtin) ships the stock banks the L1
//! detectors run on.

pub mod builtin;
pub mod engine;
pub mod registry;

pub use engine::{PatternEngine, PatternMatch};
pub use registry::{PatternCategory, PatternDefinition, PatternError, PatternRegistry};
