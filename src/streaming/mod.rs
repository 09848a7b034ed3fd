//! Streaming output validation.
//!
//! [`StreamGuard`] is a lazy sequence transformer: it consumes a (possibly
//! infinite) stream of text chunks and yields a [`StreamChunkResult`] per
//! chunk, with three possible per-chunk fates — pass through, suppress
//! (replace with a redaction placeholder, stream stays alive), or terminate
//! (end the stream immediately).  When the upstream ends, one final
//! validation pass runs over the complete accumulated output.
//!
//! Detectors that error are treated as Pass (fail-open) and the next
//! detector is tried.  Cancellation ends the stream without emitting
//! further chunks.

pub mod buffer;

use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt, pin_mut};
use serde::{Deserialize, Serialize};

use crate::detectors::DetectorError;
use crate::patterns::{PatternCategory, PatternEngine};
use crate::pipeline::context::CheckContext;

pub use buffer::ChunkBuffer;

/// Replacement text used when a chunk is suppressed without an explicit
/// override.
pub const REDACTION_PLACEHOLDER: &str = "[REDACTED]";

// ── ChunkAction / StreamChunkResult ────────────────────────────────────

/// What a streaming detector wants done with the current chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkAction {
    /// Emit the chunk unchanged.
    Pass,
    /// Replace the chunk's content (`None` means drop it entirely).
    Suppress(Option<String>),
    /// End the stream immediately.
    Terminate(String),
}

/// One emitted element of the guarded stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunkResult {
    /// The original chunk as received from upstream.
    pub chunk: String,
    /// What should reach the user — `None` when suppressed without
    /// replacement or when the stream terminated.
    pub output: Option<String>,
    /// Whether the chunk content was suppressed or replaced.
    pub suppressed: bool,
    /// Whether this result ends the stream.
    pub terminated: bool,
    /// Whether this is the post-stream final validation result.
    pub is_final: bool,
    /// The detector responsible for a suppression or termination.
    pub detector: Option<String>,
    /// Human-readable reason for a termination.
    pub reason: Option<String>,
}

impl StreamChunkResult {
    fn passed(chunk: String) -> Self {
        Self {
            output: Some(chunk.clone()),
            chunk,
            suppressed: false,
            terminated: false,
            is_final: false,
            detector: None,
            reason: None,
        }
    }

    fn suppressed(chunk: String, replacement: Option<String>, detector: &str) -> Self {
        Self {
            chunk,
            output: replacement,
            suppressed: true,
            terminated: false,
            is_final: false,
            detector: Some(detector.to_string()),
            reason: None,
        }
    }

    fn terminated(chunk: String, detector: &str, reason: String, is_final: bool) -> Self {
        Self {
            chunk,
            output: None,
            suppressed: false,
            terminated: true,
            is_final,
            detector: Some(detector.to_string()),
            reason: Some(reason),
        }
    }
}

// ── StreamingDetector ──────────────────────────────────────────────────

/// The third detector capability: token-chunk validation.
#[async_trait]
pub trait StreamingDetector: Send + Sync {
    /// Detector name for audit and result attribution.
    fn name(&self) -> &str;

    /// Whether the detector participates in streams.
    fn enabled(&self) -> bool {
        true
    }

    /// Validate one incoming chunk, given everything accumulated so far.
    ///
    /// # Errors
    ///
    /// Returns [`DetectorError`] when validation cannot complete; the
    /// stream treats that as a Pass and tries the next detector.
    async fn validate_chunk(
        &self,
        ctx: &CheckContext,
        chunk: &str,
        accumulated: &str,
    ) -> Result<ChunkAction, DetectorError>;

    /// Validate a completed sentence, or the full output at end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`DetectorError`] when validation cannot complete; treated
    /// as a Pass.
    async fn validate_final(
        &self,
        ctx: &CheckContext,
        complete: &str,
    ) -> Result<ChunkAction, DetectorError>;
}

// ── StreamGuardConfig / StreamGuard ────────────────────────────────────

/// Tuning knobs for [`StreamGuard`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StreamGuardConfig {
    /// Run sentence-level validation when the buffer tail looks sensitive.
    pub sentence_validation: bool,
    /// Force-extract cap for the chunk buffer.
    pub max_unprocessed: usize,
}

impl Default for StreamGuardConfig {
    fn default() -> Self {
        Self {
            sentence_validation: true,
            max_unprocessed: buffer::DEFAULT_MAX_UNPROCESSED,
        }
    }
}

/// Streaming variant of the guard pipeline.
pub struct StreamGuard {
    detectors: Vec<Arc<dyn StreamingDetector>>,
    config: StreamGuardConfig,
}

impl StreamGuard {
    /// Create a stream guard over the given detectors.
    #[must_use]
    pub fn new(detectors: Vec<Arc<dyn StreamingDetector>>) -> Self {
        Self {
            detectors,
            config: StreamGuardConfig::default(),
        }
    }

    /// Override the configuration.
    #[must_use]
    pub fn with_config(mut self, config: StreamGuardConfig) -> Self {
        self.config = config;
        self
    }

    /// Ask every enabled detector about a chunk.  Terminate wins over
    /// Suppress; the first suppression's replacement is kept.
    async fn consult_chunk(
        &self,
        ctx: &CheckContext,
        chunk: &str,
        accumulated: &str,
    ) -> (ChunkAction, Option<String>) {
        let mut action = ChunkAction::Pass;
        let mut by = None;

        for detector in self.detectors.iter().filter(|d| d.enabled()) {
            match detector.validate_chunk(ctx, chunk, accumulated).await {
                Ok(ChunkAction::Terminate(reason)) => {
                    return (ChunkAction::Terminate(reason), Some(detector.name().to_string()));
                }
                Ok(ChunkAction::Suppress(replacement)) => {
                    if action == ChunkAction::Pass {
                        action = ChunkAction::Suppress(replacement);
                        by = Some(detector.name().to_string());
                    }
                }
                Ok(ChunkAction::Pass) => {}
                Err(error) => {
                    tracing::warn!(
                        detector = detector.name(),
                        error = %error,
                        "streaming detector failed, passing (fail-open)",
                    );
                }
            }
        }
        (action, by)
    }

    /// Run `validate_final` over a completed span.  Only Terminate matters.
    async fn consult_final(
        &self,
        ctx: &CheckContext,
        complete: &str,
    ) -> Option<(ChunkAction, String)> {
        for detector in self.detectors.iter().filter(|d| d.enabled()) {
            match detector.validate_final(ctx, complete).await {
                Ok(ChunkAction::Pass) => {}
                Ok(action) => return Some((action, detector.name().to_string())),
                Err(error) => {
                    tracing::warn!(
                        detector = detector.name(),
                        error = %error,
                        "streaming final validation failed, passing (fail-open)",
                    );
                }
            }
        }
        None
    }

    /// Transform an upstream chunk sequence into validated results.
    ///
    /// The returned stream is lazy: nothing is consumed from `chunks` until
    /// the caller polls.
    pub fn guard<'a, S>(
        &'a self,
        ctx: &'a CheckContext,
        chunks: S,
    ) -> impl Stream<Item = StreamChunkResult> + 'a
    where
        S: Stream<Item = String> + 'a,
    {
        stream! {
            let mut buffer = ChunkBuffer::with_max_unprocessed(self.config.max_unprocessed);
            pin_mut!(chunks);

            while let Some(chunk) = chunks.next().await {
                if ctx.is_cancelled() {
                    return;
                }

                buffer.push(&chunk);
                let (action, by) = self
                    .consult_chunk(ctx, &chunk, buffer.accumulated())
                    .await;

                match action {
                    ChunkAction::Terminate(reason) => {
                        yield StreamChunkResult::terminated(
                            chunk,
                            by.as_deref().unwrap_or_default(),
                            reason,
                            true,
                        );
                        return;
                    }
                    ChunkAction::Suppress(replacement) => {
                        yield StreamChunkResult::suppressed(
                            chunk,
                            replacement,
                            by.as_deref().unwrap_or_default(),
                        );
                    }
                    ChunkAction::Pass => {
                        yield StreamChunkResult::passed(chunk);
                    }
                }

                // Sentence-level validation when more PII may be forming.
                if self.config.sentence_validation && buffer.may_contain_incomplete_sensitive() {
                    while let Some(sentence) = buffer.try_extract_sentence() {
                        if let Some((ChunkAction::Terminate(reason), detector)) =
                            self.consult_final(ctx, &sentence).await
                        {
                            yield StreamChunkResult::terminated(
                                String::new(),
                                &detector,
                                reason,
                                true,
                            );
                            return;
                        }
                    }
                }
            }

            if ctx.is_cancelled() {
                return;
            }

            // Upstream finished: flush and validate the complete output.
            let _ = buffer.flush();
            let complete = buffer.accumulated().to_string();
            match self.consult_final(ctx, &complete).await {
                Some((ChunkAction::Terminate(reason), detector)) => {
                    yield StreamChunkResult::terminated(String::new(), &detector, reason, true);
                }
                Some((ChunkAction::Suppress(replacement), detector)) => {
                    let mut result =
                        StreamChunkResult::suppressed(String::new(), replacement, &detector);
                    result.is_final = true;
                    yield result;
                }
                _ => {
                    let mut result = StreamChunkResult::passed(String::new());
                    result.output = None;
                    result.is_final = true;
                    yield result;
                }
            }
        }
    }
}

// ── StreamingPiiDetector ───────────────────────────────────────────────

/// How the streaming PII detector reacts to a confirmed match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiStreamMode {
    /// Replace the offending chunk with [`REDACTION_PLACEHOLDER`].
    Suppress,
    /// End the stream.
    Terminate,
}

/// Streaming PII detector over the shared pattern banks.
///
/// Suppresses (or terminates on) chunks once the accumulated tail contains
/// a confirmed PII match — and also suppresses chunks whose tail looks like
/// PII still being assembled, so the fragments of an e-mail or card number
/// never reach the user individually.
pub struct StreamingPiiDetector {
    engine: Arc<PatternEngine>,
    categories: Vec<PatternCategory>,
    mode: PiiStreamMode,
}

/// How much accumulated tail the detector re-scans per chunk.
const SCAN_WINDOW_BYTES: usize = 512;

fn tail_window(text: &str) -> &str {
    if text.len() <= SCAN_WINDOW_BYTES {
        return text;
    }
    let mut start = text.len() - SCAN_WINDOW_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

impl StreamingPiiDetector {
    /// Create a detector in the given mode, scanning the banks for the
    /// given locale tags.
    #[must_use]
    pub fn new(engine: Arc<PatternEngine>, languages: &[String], mode: PiiStreamMode) -> Self {
        Self {
            engine,
            categories: crate::detectors::pii::pii_categories(languages),
            mode,
        }
    }

    fn matched(&self, text: &str) -> bool {
        self.categories
            .iter()
            .any(|category| self.engine.is_match(text, *category))
    }

    fn confirmed_action(&self) -> ChunkAction {
        match self.mode {
            PiiStreamMode::Suppress => {
                ChunkAction::Suppress(Some(REDACTION_PLACEHOLDER.to_string()))
            }
            PiiStreamMode::Terminate => {
                ChunkAction::Terminate("PII detected in streamed output".into())
            }
        }
    }
}

#[async_trait]
impl StreamingDetector for StreamingPiiDetector {
    fn name(&self) -> &'static str {
        "StreamingPII"
    }

    async fn validate_chunk(
        &self,
        _ctx: &CheckContext,
        _chunk: &str,
        accumulated: &str,
    ) -> Result<ChunkAction, DetectorError> {
        let window = tail_window(accumulated);
        if self.matched(window) {
            return Ok(self.confirmed_action());
        }
        // The tail may be PII mid-assembly; hold the fragment back.
        if buffer::looks_incomplete_sensitive(window) {
            return Ok(ChunkAction::Suppress(Some(
                REDACTION_PLACEHOLDER.to_string(),
            )));
        }
        Ok(ChunkAction::Pass)
    }

    async fn validate_final(
        &self,
        _ctx: &CheckContext,
        complete: &str,
    ) -> Result<ChunkAction, DetectorError> {
        if self.matched(complete) {
            return Ok(self.confirmed_action());
        }
        Ok(ChunkAction::Pass)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::PatternRegistry;
    use futures_util::stream;

    fn pii_guard(mode: PiiStreamMode) -> StreamGuard {
        let registry = Arc::new(PatternRegistry::with_builtins(&[]));
        let engine = Arc::new(PatternEngine::new(registry));
        StreamGuard::new(vec![Arc::new(StreamingPiiDetector::new(engine, &[], mode))])
    }

    fn chunks(parts: &[&str]) -> impl Stream<Item = String> {
        stream::iter(parts.iter().map(|s| (*s).to_string()).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn clean_stream_passes_through() {
        let guard = pii_guard(PiiStreamMode::Suppress);
        let ctx = CheckContext::new("q");
        let upstream = chunks(&["Hello ", "world. ", "All fine here."]);
        let results: Vec<_> = guard.guard(&ctx, upstream).collect().await;

        // 3 chunks + final marker.
        assert_eq!(results.len(), 4);
        assert!(results[..3].iter().all(|r| !r.suppressed && !r.terminated));
        assert!(results[3].is_final);
        let emitted: String = results
            .iter()
            .filter_map(|r| r.output.clone())
            .collect();
        assert_eq!(emitted, "Hello world. All fine here.");
    }

    #[tokio::test]
    async fn email_fragments_never_reach_output() {
        let guard = pii_guard(PiiStreamMode::Suppress);
        let ctx = CheckContext::new("q");
        let upstream = chunks(&["Contact me ", "at user@", "example.com."]);
        let results: Vec<_> = guard.guard(&ctx, upstream).collect().await;

        assert_eq!(results[0].output.as_deref(), Some("Contact me "));
        assert_eq!(results[1].output.as_deref(), Some(REDACTION_PLACEHOLDER));
        assert!(results[1].suppressed);
        // Third chunk: the full address is now a confirmed match.
        assert!(results[2].suppressed || results[2].terminated);

        let emitted: String = results
            .iter()
            .filter_map(|r| r.output.clone())
            .collect();
        assert!(!emitted.contains("user@example.com"));
    }

    #[tokio::test]
    async fn terminate_mode_ends_stream() {
        let guard = pii_guard(PiiStreamMode::Terminate);
        let ctx = CheckContext::new("q");
        let upstream = chunks(&[
            "the card 4111111111111111 ",
            "should never ",
            "be emitted",
        ]);
        let results: Vec<_> = guard.guard(&ctx, upstream).collect().await;

        assert_eq!(results.len(), 1, "stream ends at the terminating chunk");
        assert!(results[0].terminated);
        assert!(results[0].output.is_none());
        assert_eq!(results[0].detector.as_deref(), Some("StreamingPII"));
    }

    #[tokio::test]
    async fn cancellation_stops_the_stream() {
        let token = tokio_util::sync::CancellationToken::new();
        let ctx = CheckContext::builder()
            .input("q")
            .cancellation(token.clone())
            .build();
        token.cancel();

        let guard = pii_guard(PiiStreamMode::Suppress);
        let upstream = chunks(&["one ", "two ", "three"]);
        let results: Vec<_> = guard.guard(&ctx, upstream).collect().await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn erroring_detector_fails_open() {
        struct Broken;

        #[async_trait]
        impl StreamingDetector for Broken {
            fn name(&self) -> &'static str {
                "Broken"
            }
            async fn validate_chunk(
                &self,
                _ctx: &CheckContext,
                _chunk: &str,
                _accumulated: &str,
            ) -> Result<ChunkAction, DetectorError> {
                Err(DetectorError::Internal {
                    detector: "Broken".into(),
                    reason: "boom".into(),
                })
            }
            async fn validate_final(
                &self,
                _ctx: &CheckContext,
                _complete: &str,
            ) -> Result<ChunkAction, DetectorError> {
                Ok(ChunkAction::Pass)
            }
        }

        let guard = StreamGuard::new(vec![Arc::new(Broken)]);
        let ctx = CheckContext::new("q");
        let upstream = chunks(&["still ", "flows"]);
        let results: Vec<_> = guard.guard(&ctx, upstream).collect().await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].output.as_deref(), Some("still "));
    }

    #[tokio::test]
    async fn final_pass_catches_unboundaried_pii() {
        // No sentence boundary, no per-chunk match... until end of stream.
        struct FinalOnly;

        #[async_trait]
        impl StreamingDetector for FinalOnly {
            fn name(&self) -> &'static str {
                "FinalOnly"
            }
            async fn validate_chunk(
                &self,
                _ctx: &CheckContext,
                _chunk: &str,
                _accumulated: &str,
            ) -> Result<ChunkAction, DetectorError> {
                Ok(ChunkAction::Pass)
            }
            async fn validate_final(
                &self,
                _ctx: &CheckContext,
                complete: &str,
            ) -> Result<ChunkAction, DetectorError> {
                if complete.contains("forbidden") {
                    return Ok(ChunkAction::Terminate("forbidden content".into()));
                }
                Ok(ChunkAction::Pass)
            }
        }

        let guard = StreamGuard::new(vec![Arc::new(FinalOnly)]);
        let ctx = CheckContext::new("q");
        let upstream = chunks(&["some for", "bidden text"]);
        let results: Vec<_> = guard.guard(&ctx, upstream).collect().await;

        let last = results.last().unwrap();
        assert!(last.is_final);
        assert!(last.terminated);
        assert_eq!(last.reason.as_deref(), Some("forbidden content"));
    }
}
