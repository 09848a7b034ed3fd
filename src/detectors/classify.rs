//! L2 model-based detectors and the classifier seam they run on.
//!
//! The crate does not ship or load models — it defines the
//! [`SequenceClassifier`] and [`Tokenizer`] interfaces and the policy that
//! turns label probabilities into verdicts.  Inference failures are
//! fail-open: an unreachable classifier logs a warning and the detector
//! passes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::pipeline::context::CheckContext;
use crate::pipeline::outcome::Severity;

use super::{DetectorError, DetectorVerdict, InputDetector, Layer, OutputDetector};

/// Default maximum token sequence length.
pub const DEFAULT_MAX_SEQ_LEN: usize = 512;

/// Default inference timeout.
pub const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(5);

/// How many recent user messages the input classifier also scores.
const HISTORY_SCAN_LIMIT: usize = 8;

/// Label emitted by injection classifiers for the unsafe class.
pub const LABEL_INJECTION: &str = "injection";

/// The multi-label toxicity categories, in reporting order.
pub const TOXICITY_LABELS: &[&str] = &[
    "toxicity",
    "severe_toxicity",
    "obscene",
    "threat",
    "insult",
    "identity_attack",
    "sexual_explicit",
];

// ── Tokenizer ──────────────────────────────────────────────────────────

/// A tokenized sequence ready for classifier inference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedInput {
    /// Token ids, padded to the requested length.
    pub ids: Vec<u32>,
    /// 1 for real tokens, 0 for padding.
    pub attention_mask: Vec<u32>,
    /// Number of real tokens (including special tokens).
    pub len: usize,
}

/// Turns text into token ids for a [`SequenceClassifier`].
pub trait Tokenizer: Send + Sync {
    /// Encode `text` into at most `max_len` token ids.
    fn encode(&self, text: &str, max_len: usize) -> TokenizedInput;
}

/// WordPiece-style tokenizer with an optional vocabulary.
///
/// With a vocabulary loaded, unknown words map to the `[UNK]` id.  Without
/// one, words are hash-folded into the id space — deterministic across runs,
/// which is all a fixed classifier needs.
#[derive(Debug, Clone)]
pub struct WordTokenizer {
    vocab: Option<HashMap<String, u32>>,
    vocab_size: u32,
}

/// BERT-convention special token ids.
const PAD_ID: u32 = 0;
const UNK_ID: u32 = 100;
const CLS_ID: u32 = 101;
const SEP_ID: u32 = 102;
/// Ids below this are reserved for special tokens.
const RESERVED_IDS: u32 = 1000;

impl Default for WordTokenizer {
    fn default() -> Self {
        Self {
            vocab: None,
            vocab_size: 30_522,
        }
    }
}

impl WordTokenizer {
    /// Hash-fallback tokenizer with the default id space.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Vocabulary-backed tokenizer.  The map should contain lowercased words.
    #[must_use]
    pub fn with_vocab(vocab: HashMap<String, u32>, vocab_size: u32) -> Self {
        Self {
            vocab: Some(vocab),
            vocab_size,
        }
    }

    /// Deterministic FNV-1a fold of a word into the non-reserved id space.
    fn hash_id(&self, word: &str) -> u32 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in word.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
        }
        let span = u64::from(self.vocab_size.saturating_sub(RESERVED_IDS).max(1));
        #[allow(clippy::cast_possible_truncation)]
        let folded = (hash % span) as u32;
        RESERVED_IDS + folded
    }

    fn word_id(&self, word: &str) -> u32 {
        match &self.vocab {
            Some(vocab) => vocab.get(word).copied().unwrap_or(UNK_ID),
            None => self.hash_id(word),
        }
    }
}

impl Tokenizer for WordTokenizer {
    fn encode(&self, text: &str, max_len: usize) -> TokenizedInput {
        let mut ids = Vec::with_capacity(max_len);
        ids.push(CLS_ID);

        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            if ids.len() >= max_len.saturating_sub(1) {
                break;
            }
            ids.push(self.word_id(word));
        }
        ids.push(SEP_ID);

        let len = ids.len();
        let mut attention_mask = vec![1_u32; len];
        ids.resize(max_len, PAD_ID);
        attention_mask.resize(max_len, 0);

        TokenizedInput {
            ids,
            attention_mask,
            len,
        }
    }
}

// ── SequenceClassifier ─────────────────────────────────────────────────

/// Errors a classifier backend may report.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// Inference failed (model crashed, backend unreachable, bad shape).
    #[error("classifier inference failed: {0}")]
    Inference(String),
}

/// Runs a tokenized sequence through a classification model and returns a
/// probability per named label.
#[async_trait]
pub trait SequenceClassifier: Send + Sync {
    /// Classify the encoded input.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError`] when inference cannot complete; the
    /// calling detector treats that as a pass.
    async fn classify(
        &self,
        input: &TokenizedInput,
    ) -> Result<HashMap<String, f32>, ClassifierError>;
}

// ── Shared L2 policy ───────────────────────────────────────────────────

/// Map a probability to a verdict using the shared L2 thresholds.
fn l2_verdict(
    name: &str,
    probability: f32,
    label: &str,
    block_threshold: f32,
    escalation_threshold: f32,
) -> DetectorVerdict {
    let base = DetectorVerdict::pass(name, Layer::L2);
    if probability >= block_threshold {
        base.failed()
            .with_signal(probability, Severity::Critical)
            .with_pattern(label)
            .with_details(format!("P({label}) = {probability:.3}"))
    } else if probability >= escalation_threshold {
        base.escalate()
            .with_signal(probability, Severity::Medium)
            .with_pattern(label)
            .with_details(format!("P({label}) = {probability:.3}"))
    } else if probability > 0.0 {
        base.with_signal(probability, Severity::Low)
            .with_details(format!("P({label}) = {probability:.3}"))
    } else {
        base
    }
}

// ── InjectionClassifierDetector ────────────────────────────────────────

/// L2 prompt-injection classifier over the `{safe, injection}` label pair.
pub struct InjectionClassifierDetector {
    classifier: Arc<dyn SequenceClassifier>,
    tokenizer: Arc<dyn Tokenizer>,
    block_threshold: f32,
    escalation_threshold: f32,
    max_seq_len: usize,
    inference_timeout: Duration,
}

impl InjectionClassifierDetector {
    /// Create a detector with the default thresholds (block 0.85,
    /// escalate 0.5).
    #[must_use]
    pub fn new(classifier: Arc<dyn SequenceClassifier>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            classifier,
            tokenizer,
            block_threshold: 0.85,
            escalation_threshold: 0.5,
            max_seq_len: DEFAULT_MAX_SEQ_LEN,
            inference_timeout: DEFAULT_INFERENCE_TIMEOUT,
        }
    }

    /// Override the block threshold.
    #[must_use]
    pub fn with_block_threshold(mut self, threshold: f32) -> Self {
        self.block_threshold = threshold;
        self
    }

    /// Override the escalation threshold.
    #[must_use]
    pub fn with_escalation_threshold(mut self, threshold: f32) -> Self {
        self.escalation_threshold = threshold;
        self
    }

    /// Override the inference timeout.
    #[must_use]
    pub fn with_inference_timeout(mut self, timeout: Duration) -> Self {
        self.inference_timeout = timeout;
        self
    }

    /// Score one text, fail-open: `None` means inference was unavailable.
    async fn score(&self, text: &str) -> Option<f32> {
        let encoded = self.tokenizer.encode(text, self.max_seq_len);
        match tokio::time::timeout(self.inference_timeout, self.classifier.classify(&encoded))
            .await
        {
            Ok(Ok(probs)) => Some(probs.get(LABEL_INJECTION).copied().unwrap_or(0.0)),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "injection classifier unavailable, passing");
                None
            }
            Err(_) => {
                tracing::warn!("injection classifier timed out, passing");
                None
            }
        }
    }
}

#[async_trait]
impl InputDetector for InjectionClassifierDetector {
    fn name(&self) -> &'static str {
        "L2PromptInjectionClassifier"
    }

    fn layer(&self) -> Layer {
        Layer::L2
    }

    fn order(&self) -> u32 {
        200
    }

    async fn check(&self, ctx: &CheckContext) -> Result<DetectorVerdict, DetectorError> {
        let Some(mut probability) = self.score(ctx.text()).await else {
            return Ok(DetectorVerdict::pass(self.name(), self.layer())
                .with_details("classifier unavailable"));
        };

        // Multi-turn set-ups: the most recent user messages score too.
        for message in ctx
            .history()
            .iter()
            .rev()
            .filter(|m| m.role == "user")
            .take(HISTORY_SCAN_LIMIT)
        {
            if let Some(p) = self.score(&message.content).await {
                probability = probability.max(p);
            }
        }

        Ok(l2_verdict(
            self.name(),
            probability,
            LABEL_INJECTION,
            self.block_threshold,
            self.escalation_threshold,
        ))
    }
}

// ── ToxicityClassifierDetector ─────────────────────────────────────────

/// L2 output-side toxicity classifier — multi-label sigmoid over the
/// [`TOXICITY_LABELS`] set; the maximum category drives the verdict.
pub struct ToxicityClassifierDetector {
    classifier: Arc<dyn SequenceClassifier>,
    tokenizer: Arc<dyn Tokenizer>,
    block_threshold: f32,
    escalation_threshold: f32,
    max_seq_len: usize,
    inference_timeout: Duration,
}

impl ToxicityClassifierDetector {
    /// Create a detector with the default thresholds.
    #[must_use]
    pub fn new(classifier: Arc<dyn SequenceClassifier>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            classifier,
            tokenizer,
            block_threshold: 0.85,
            escalation_threshold: 0.5,
            max_seq_len: DEFAULT_MAX_SEQ_LEN,
            inference_timeout: DEFAULT_INFERENCE_TIMEOUT,
        }
    }

    /// Override the block threshold.
    #[must_use]
    pub fn with_block_threshold(mut self, threshold: f32) -> Self {
        self.block_threshold = threshold;
        self
    }

    /// Override the escalation threshold.
    #[must_use]
    pub fn with_escalation_threshold(mut self, threshold: f32) -> Self {
        self.escalation_threshold = threshold;
        self
    }
}

#[async_trait]
impl OutputDetector for ToxicityClassifierDetector {
    fn name(&self) -> &'static str {
        "L2Toxicity"
    }

    fn layer(&self) -> Layer {
        Layer::L2
    }

    fn order(&self) -> u32 {
        200
    }

    async fn check(
        &self,
        _ctx: &CheckContext,
        output: &str,
    ) -> Result<DetectorVerdict, DetectorError> {
        let encoded = self.tokenizer.encode(output, self.max_seq_len);
        let probs = match tokio::time::timeout(
            self.inference_timeout,
            self.classifier.classify(&encoded),
        )
        .await
        {
            Ok(Ok(probs)) => probs,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "toxicity classifier unavailable, passing");
                return Ok(DetectorVerdict::pass(self.name(), self.layer())
                    .with_details("classifier unavailable"));
            }
            Err(_) => {
                tracing::warn!("toxicity classifier timed out, passing");
                return Ok(DetectorVerdict::pass(self.name(), self.layer())
                    .with_details("classifier unavailable"));
            }
        };

        let (label, probability) = TOXICITY_LABELS
            .iter()
            .map(|label| (*label, probs.get(*label).copied().unwrap_or(0.0)))
            .fold(("toxicity", 0.0_f32), |acc, item| {
                if item.1 > acc.1 { item } else { acc }
            });

        Ok(l2_verdict(
            self.name(),
            probability,
            label,
            self.block_threshold,
            self.escalation_threshold,
        ))
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
