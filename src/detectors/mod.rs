//! Detector capability traits and the concrete detector set.
//!
//! Detectors come in two capability variants — [`InputDetector`] inspects the
//! prompt before it reaches the model, [`OutputDetector`] inspects what the
//! model produced.  (Streaming validation is a third capability, defined in
//! [`crate::streaming`].)  There is no deeper hierarchy: a detector is its
//! name, layer tag, order, and a `check` method that yields a
//! [`DetectorVerdict`].
//!
//! Within one request detectors run sequentially in ascending `order` (ties
//! broken by name) so that early-exit on a high-severity block is observable
//! and deterministic.

pub mod classify;
pub mod encoding;
pub mod groundedness;
pub mod injection;
pub mod jailbreak;
pub mod pii;
pub mod rag;
pub mod refusal;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::patterns::PatternMatch;
use crate::pipeline::context::CheckContext;
use crate::pipeline::outcome::Severity;

// ── Layer ──────────────────────────────────────────────────────────────

/// Latency/cost tier of a detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layer {
    /// Rule/regex checks — sub-millisecond.
    L1,
    /// Local classifier inference — single-digit to tens of milliseconds.
    L2,
    /// Remote LLM judge — tens to hundreds of milliseconds.
    L3,
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::L1 => write!(f, "L1"),
            Self::L2 => write!(f, "L2"),
            Self::L3 => write!(f, "L3"),
        }
    }
}

// ── DetectorVerdict ────────────────────────────────────────────────────

/// What a single detector concluded about one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorVerdict {
    /// Detector name (e.g. `"L1PromptInjection"`).
    pub detector: String,
    /// Latency/cost tier.
    pub layer: Layer,
    /// `false` means the detector found a threat it considers disqualifying.
    pub passed: bool,
    /// Threat score in \[0.0, 1.0\].
    pub score: f32,
    /// Severity of the strongest signal.
    pub severity: Severity,
    /// Name of the pattern that fired, when pattern-based.
    pub pattern: Option<String>,
    /// Excerpt of the matched text — masked where sensitive.
    pub matched_text: Option<String>,
    /// Free-form detail string for audit.
    pub details: Option<String>,
    /// The detector wants the remote judge to take a second look.
    pub needs_escalation: bool,
    /// Wall-clock check time in milliseconds (filled by the orchestrator).
    pub latency_ms: f64,
}

impl DetectorVerdict {
    /// A clean pass.
    #[must_use]
    pub fn pass(detector: impl Into<String>, layer: Layer) -> Self {
        Self {
            detector: detector.into(),
            layer,
            passed: true,
            score: 0.0,
            severity: Severity::None,
            pattern: None,
            matched_text: None,
            details: None,
            needs_escalation: false,
            latency_ms: 0.0,
        }
    }

    /// Set the score and severity.
    #[must_use]
    pub fn with_signal(mut self, score: f32, severity: Severity) -> Self {
        self.score = score;
        self.severity = severity;
        self
    }

    /// Mark the verdict failed (threat found).
    #[must_use]
    pub fn failed(mut self) -> Self {
        self.passed = false;
        self
    }

    /// Attach the pattern name that fired.
    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Attach a (pre-masked) matched-text excerpt.
    #[must_use]
    pub fn with_matched_text(mut self, text: impl Into<String>) -> Self {
        self.matched_text = Some(text.into());
        self
    }

    /// Attach a detail string.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Request escalation to the remote judge.
    #[must_use]
    pub fn escalate(mut self) -> Self {
        self.needs_escalation = true;
        self
    }

    /// Whether this verdict should appear in the triggered list.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        !self.passed || self.score > 0.0
    }
}

// ── DetectorError ──────────────────────────────────────────────────────

/// An error encountered while a detector ran.
///
/// Distinct from a failed verdict — it means the detector *could not
/// complete its analysis*.  The orchestrator routes it through the
/// `OnGuardError` hook and the fail-mode policy.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// The detector's backing model or service is unavailable.
    #[error("backend unavailable for detector '{detector}': {reason}")]
    Backend {
        /// Detector name.
        detector: String,
        /// Human-readable reason.
        reason: String,
    },

    /// The detector exceeded its per-check time budget.
    #[error("detector '{detector}' timed out")]
    Timeout {
        /// Detector name.
        detector: String,
    },

    /// Catch-all for unexpected failures.
    #[error("internal error in detector '{detector}': {reason}")]
    Internal {
        /// Detector name.
        detector: String,
        /// What went wrong.
        reason: String,
    },
}

// ── Capability traits ──────────────────────────────────────────────────

/// A detector that inspects user input before it reaches the model.
#[async_trait]
pub trait InputDetector: Send + Sync {
    /// Detector name, used in verdicts, metrics labels, and block reasons.
    fn name(&self) -> &str;

    /// Latency/cost tier.
    fn layer(&self) -> Layer;

    /// Execution order — lower runs first, ties broken by name.
    fn order(&self) -> u32 {
        100
    }

    /// Whether the detector participates in pipeline runs.
    fn enabled(&self) -> bool {
        true
    }

    /// Inspect the context and produce a verdict.
    ///
    /// # Errors
    ///
    /// Returns [`DetectorError`] if the analysis could not complete.
    async fn check(&self, ctx: &CheckContext) -> Result<DetectorVerdict, DetectorError>;
}

/// A detector that inspects model output before it reaches the user.
#[async_trait]
pub trait OutputDetector: Send + Sync {
    /// Detector name, used in verdicts, metrics labels, and block reasons.
    fn name(&self) -> &str;

    /// Latency/cost tier.
    fn layer(&self) -> Layer;

    /// Execution order — lower runs first, ties broken by name.
    fn order(&self) -> u32 {
        100
    }

    /// Whether the detector participates in pipeline runs.
    fn enabled(&self) -> bool {
        true
    }

    /// Inspect the output (with its request context) and produce a verdict.
    ///
    /// # Errors
    ///
    /// Returns [`DetectorError`] if the analysis could not complete.
    async fn check(
        &self,
        ctx: &CheckContext,
        output: &str,
    ) -> Result<DetectorVerdict, DetectorError>;
}

// ── Masking ────────────────────────────────────────────────────────────

/// Mask sensitive matched text for reporting: first two characters, one
/// asterisk per hidden character, last two characters.  Anything shorter
/// than four characters becomes `"****"`.
#[must_use]
pub fn mask(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() < 4 {
        return "****".to_string();
    }
    let mut out = String::with_capacity(chars.len());
    out.extend(&chars[..2]);
    out.extend(std::iter::repeat_n('*', chars.len() - 4));
    out.extend(&chars[chars.len() - 2..]);
    out
}

/// Truncate non-sensitive matched text to a short audit excerpt.
#[must_use]
pub(crate) fn excerpt(text: &str) -> String {
    text.chars().take(50).collect()
}

// ── Shared severity/confidence policy ──────────────────────────────────

/// Fold a set of pattern matches into a verdict using the shared L1 policy:
/// Critical severity blocks; High severity blocks at confidence ≥ 0.9;
/// anything at or above the escalation threshold requests a second look.
pub(crate) fn verdict_from_matches(
    name: &str,
    layer: Layer,
    matches: &[PatternMatch],
    escalation_threshold: f32,
) -> DetectorVerdict {
    let Some(top) = matches
        .iter()
        .max_by(|a, b| {
            (a.severity, a.confidence)
                .partial_cmp(&(b.severity, b.confidence))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    else {
        return DetectorVerdict::pass(name, layer);
    };

    let max_severity = top.severity;
    let max_confidence = matches.iter().map(|m| m.confidence).fold(0.0_f32, f32::max);

    let mut verdict = DetectorVerdict::pass(name, layer)
        .with_signal(max_confidence, max_severity)
        .with_pattern(top.pattern_name.clone())
        .with_matched_text(excerpt(&top.matched_text))
        .with_details(format!(
            "{} pattern(s) matched, strongest: {}",
            matches.len(),
            top.pattern_name,
        ));

    if max_severity >= Severity::Critical
        || (max_severity >= Severity::High && max_confidence >= 0.9)
    {
        verdict = verdict.failed();
    } else if max_confidence >= escalation_threshold {
        verdict = verdict.escalate();
    }

    verdict
}

// ── Tests ──────────────────────────────────────────────────────────────
