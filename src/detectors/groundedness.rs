//! Groundedness / hallucination detector (output side).
//!
//! Runs only when the context carries a grounding context under
//! [`META_GROUNDING_CONTEXT`].  The (grounding, output) pair is submitted to
//! the remote judge with the groundedness template; the returned
//! hallucination score maps onto severity bands.

use std::sync::Arc;

use async_trait::async_trait;

use crate::judge::RemoteJudge;
use crate::pipeline::context::{CheckContext, META_GROUNDING_CONTEXT};
use crate::pipeline::outcome::Severity;

use super::{DetectorError, DetectorVerdict, Layer, OutputDetector};

/// Judge-backed groundedness detector.
pub struct GroundednessDetector {
    judge: Arc<RemoteJudge>,
}

impl GroundednessDetector {
    /// Create a detector delegating to the given judge.
    #[must_use]
    pub fn new(judge: Arc<RemoteJudge>) -> Self {
        Self { judge }
    }

    /// Map a hallucination score to its severity band.
    fn severity_band(score: f32) -> Severity {
        if score >= 0.9 {
            Severity::Critical
        } else if score >= 0.7 {
            Severity::High
        } else if score >= 0.5 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[async_trait]
impl OutputDetector for GroundednessDetector {
    fn name(&self) -> &'static str {
        "L3Groundedness"
    }

    fn layer(&self) -> Layer {
        Layer::L3
    }

    fn order(&self) -> u32 {
        300
    }

    async fn check(
        &self,
        ctx: &CheckContext,
        output: &str,
    ) -> Result<DetectorVerdict, DetectorError> {
        let Some(grounding) = ctx
            .get_metadata(META_GROUNDING_CONTEXT)
            .and_then(|v| v.as_str())
        else {
            return Ok(DetectorVerdict::pass(self.name(), self.layer())
                .with_details("no grounding context attached"));
        };

        let judgment = self.judge.check_groundedness(ctx, grounding, output).await;
        if judgment.is_degraded() {
            return Ok(DetectorVerdict::pass(self.name(), self.layer())
                .with_details(judgment.reasoning));
        }

        let score = judgment.score;
        let severity = Self::severity_band(score);
        let mut verdict = DetectorVerdict::pass(self.name(), self.layer())
            .with_signal(score, severity)
            .with_details(judgment.reasoning);

        if score >= 0.7 {
            verdict = verdict.failed();
        }
        Ok(verdict)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::judge::{
        CompletionError, CompletionRequest, CompletionResponse, CompletionService, JudgeConfig,
    };

    struct FixedService(String);

    #[async_trait]
    impl CompletionService for FixedService {
        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, CompletionError> {
            Ok(CompletionResponse {
                content: self.0.clone(),
                model: "judge-test".into(),
                prompt_tokens: 1,
                completion_tokens: 1,
                latency_ms: 1.0,
            })
        }
    }

    fn detector_with(body: &str) -> GroundednessDetector {
        let judge = RemoteJudge::new(
            Arc::new(FixedService(body.to_string())),
            CacheConfig::default(),
            JudgeConfig::default(),
        );
        GroundednessDetector::new(Arc::new(judge))
    }

    fn grounded_ctx() -> CheckContext {
        CheckContext::builder()
            .input("how tall is the tower?")
            .grounding_context("The Eiffel Tower is 330 metres tall.")
            .build()
    }

    #[tokio::test]
    async fn skips_without_grounding() {
        let d = detector_with(r#"{"is_grounded": false, "hallucination_score": 0.95}"#);
        let ctx = CheckContext::new("q");
        let v = d.check(&ctx, "any output").await.unwrap();
        assert!(v.passed);
        assert!(!v.is_triggered());
    }

    #[tokio::test]
    async fn high_hallucination_fails_with_critical_band() {
        let body = r#"{"is_grounded": false, "hallucination_score": 0.95,
            "reasoning": "claims 500 metres, context says 330"}"#;
        let d = detector_with(body);
        let v = d
            .check(&grounded_ctx(), "The tower is 500 metres tall.")
            .await
            .unwrap();
        assert!(!v.passed);
        assert_eq!(v.severity, Severity::Critical);
        assert!((v.score - 0.95).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn medium_score_passes_but_scores() {
        let body = r#"{"is_grounded": true, "hallucination_score": 0.55,
            "reasoning": "mostly supported"}"#;
        let d = detector_with(body);
        let v = d
            .check(&grounded_ctx(), "It is about 330 metres, maybe taller.")
            .await
            .unwrap();
        assert!(v.passed, "passed iff score < 0.7");
        assert_eq!(v.severity, Severity::Medium);
        assert!(v.is_triggered());
    }

    #[tokio::test]
    async fn degraded_judge_fails_open() {
        struct Failing;

        #[async_trait]
        impl CompletionService for Failing {
            async fn complete(
                &self,
                _request: CompletionRequest,
            ) -> Result<CompletionResponse, CompletionError> {
                Err(CompletionError::Transport("down".into()))
            }
        }

        let judge = RemoteJudge::new(
            Arc::new(Failing),
            CacheConfig::default(),
            JudgeConfig {
                max_retries: 0,
                ..JudgeConfig::default()
            },
        );
        let d = GroundednessDetector::new(Arc::new(judge));
        let v = d.check(&grounded_ctx(), "whatever").await.unwrap();
        assert!(v.passed);
        assert_eq!(v.details.as_deref(), Some("unavailable"));
    }
}
