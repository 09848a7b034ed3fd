//! L1 refusal detector (output side).
//!
//! Spots common refusal phrasing in model output.  Purely informational:
//! the verdict is always `passed = true` with a small score, so refusals
//! show up in the triggered list and the stats without ever flagging or
//! blocking a response.

use std::sync::Arc;

use async_trait::async_trait;

use crate::patterns::{PatternCategory, PatternEngine};
use crate::pipeline::context::CheckContext;
use crate::pipeline::outcome::Severity;

use super::{DetectorError, DetectorVerdict, Layer, OutputDetector, excerpt};

/// Score assigned to a detected refusal.  Stays below every aggregation
/// threshold.
const REFUSAL_SCORE: f32 = 0.3;

/// Informational refusal-phrasing detector.
#[derive(Debug, Clone)]
pub struct RefusalDetector {
    engine: Arc<PatternEngine>,
}

impl RefusalDetector {
    /// Create a detector over the shared pattern engine.
    #[must_use]
    pub fn new(engine: Arc<PatternEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl OutputDetector for RefusalDetector {
    fn name(&self) -> &'static str {
        "L1Refusal"
    }

    fn layer(&self) -> Layer {
        Layer::L1
    }

    fn order(&self) -> u32 {
        110
    }

    async fn check(
        &self,
        _ctx: &CheckContext,
        output: &str,
    ) -> Result<DetectorVerdict, DetectorError> {
        let Some(hit) = self.engine.first_match(output, PatternCategory::Refusal) else {
            return Ok(DetectorVerdict::pass(self.name(), self.layer()));
        };

        Ok(DetectorVerdict::pass(self.name(), self.layer())
            .with_signal(REFUSAL_SCORE, Severity::Info)
            .with_pattern(hit.pattern_name.clone())
            .with_matched_text(excerpt(&hit.matched_text))
            .with_details("model output contains refusal phrasing"))
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
