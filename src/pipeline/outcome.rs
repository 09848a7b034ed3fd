//! Decision and result types produced by the guard pipeline.
//!
//! Every detector reports a [`DetectorVerdict`](crate::detectors::DetectorVerdict);
//! the orchestrator folds those into a single [`GuardResult`] whose
//! [`Decision`] tells the caller what to do with the request.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detectors::Layer;

// ── Severity ───────────────────────────────────────────────────────────

/// Severity level attached to pattern matches, verdicts, and results.
///
/// Ordered from lowest to highest — `Ord` is derived so that comparisons
/// like `severity >= Severity::High` work naturally.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// No threat signal at all.
    #[default]
    None,
    /// Informational — no action required.
    Info,
    /// Low risk — may warrant logging.
    Low,
    /// Medium risk — warrants investigation.
    Medium,
    /// High risk — should block in most policies.
    High,
    /// Critical — immediate block.
    Critical,
}

impl Severity {
    /// Lenient, case-insensitive parse used for remote judge responses.
    ///
    /// Unrecognised strings map to [`Severity::None`] so a malformed
    /// verdict never escalates on its own.
    #[must_use]
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Self::Info,
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            "critical" => Self::Critical,
            _ => Self::None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Info => write!(f, "info"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

// ── Decision ───────────────────────────────────────────────────────────

/// The final call the pipeline makes on a request or response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Safe to forward unchanged.
    Pass,
    /// Forward, but surface for review.
    Flag,
    /// Local analysis is uncertain — invoke (or defer to) the remote judge.
    Escalate,
    /// Must not reach the model or the user.
    Block,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Flag => write!(f, "flag"),
            Self::Escalate => write!(f, "escalate"),
            Self::Block => write!(f, "block"),
        }
    }
}

// ── TriggeredDetector ──────────────────────────────────────────────────

/// Projection of a detector verdict kept in the final [`GuardResult`].
///
/// Carries everything a caller needs for audit — but no internal reasoning
/// prompts and no unmasked matched text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggeredDetector {
    /// Detector name (e.g. `"L1PromptInjection"`).
    pub name: String,
    /// Latency/cost tier of the detector.
    pub layer: Layer,
    /// Score in \[0.0, 1.0\] the detector assigned.
    pub score: f32,
    /// Severity the detector assigned.
    pub severity: Severity,
    /// Name of the pattern that fired, when pattern-based.
    pub pattern: Option<String>,
    /// Masked excerpt of the matched text.
    pub matched_text: Option<String>,
    /// Free-form detail string.
    pub details: Option<String>,
}

// ── GuardResult ────────────────────────────────────────────────────────

/// The outcome of a full pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardResult {
    /// Request id this result belongs to.
    pub request_id: String,
    /// Final decision.
    pub decision: Decision,
    /// Aggregate score — the maximum across all triggered detectors.
    pub score: f32,
    /// Maximum severity observed across all verdicts.
    pub max_severity: Severity,
    /// Detectors that triggered (failed or scored), in invocation order.
    pub triggered: Vec<TriggeredDetector>,
    /// Human-readable reason, set iff `decision` is [`Decision::Block`].
    pub block_reason: Option<String>,
    /// Total wall-clock time for the pipeline run, in milliseconds.
    pub latency_ms: f64,
}

impl GuardResult {
    /// A clean pass with no triggered detectors.
    #[must_use]
    pub fn pass(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            decision: Decision::Pass,
            score: 0.0,
            max_severity: Severity::None,
            triggered: Vec::new(),
            block_reason: None,
            latency_ms: 0.0,
        }
    }

    /// Convenience: true when the decision is [`Decision::Block`].
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.decision == Decision::Block
    }

    /// Convenience: true when the decision is [`Decision::Pass`].
    #[must_use]
    pub fn is_passed(&self) -> bool {
        self.decision == Decision::Pass
    }
}

// ── GuardError ─────────────────────────────────────────────────────────

/// The only failure the public pipeline API surfaces.
///
/// Everything else — detector bugs, unreachable backends, malformed judge
/// responses — is folded into a [`GuardResult`] per the fail-mode policy.
#[derive(Debug, Error)]
pub enum GuardError {
    /// The caller's cancellation signal fired mid-pipeline.
    #[error("check cancelled for request {request_id}")]
    Cancelled {
        /// Request the cancellation interrupted.
        request_id: String,
    },
}

// ── Tests ──────────────────────────────────────────────────────────────
