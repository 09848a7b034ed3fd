//! The [`Guardrails`] orchestrator — runs the check pipeline end to end.
//!
//! # Execution model
//!
//! 1. The `OnBeforeCheck` hook may short-circuit with a Pass.
//! 2. The normalizer canonicalizes the input (input pipeline only) and
//!    attaches its result to the context, exactly once.
//! 3. Enabled detectors run **sequentially** in ascending `order` (ties
//!    broken by name).  Cancellation is checked before each detector.
//! 4. A failed verdict at High severity or above records a block reason and
//!    stops iteration.  Detector errors route through `OnGuardError` and the
//!    fail-mode policy.
//! 5. The aggregator folds the running maxima into a [`Decision`]; an
//!    Escalate decision is resolved in-line through the remote judge when
//!    one is configured.
//! 6. `OnCustomDecision` may override the result; the decision-specific and
//!    `OnAfterCheck` hooks observe it; latency and stats are recorded.
//!
//! The caller never sees an error from the pipeline — every internal failure
//! folds into the returned [`GuardResult`].  The single exception is
//! cancellation, which propagates as [`GuardError::Cancelled`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::CacheConfig;
use crate::config::{FailMode, GuardConfig};
use crate::detectors::classify::{
    InjectionClassifierDetector, SequenceClassifier, Tokenizer, ToxicityClassifierDetector,
};
use crate::detectors::encoding::EncodingBypassDetector;
use crate::detectors::groundedness::GroundednessDetector;
use crate::detectors::injection::PromptInjectionDetector;
use crate::detectors::jailbreak::JailbreakDetector;
use crate::detectors::pii::{PiiExposureDetector, PiiLeakageDetector};
use crate::detectors::rag::RagDocumentSecurityDetector;
use crate::detectors::refusal::RefusalDetector;
use crate::detectors::{
    DetectorError, DetectorVerdict, InputDetector, Layer, OutputDetector,
};
use crate::judge::{CompletionService, JudgeConfig, RemoteJudge};
use crate::normalize::{NormalizerConfig, TextNormalizer};
use crate::patterns::{PatternEngine, PatternRegistry};
use crate::pipeline::context::CheckContext;
use crate::pipeline::hooks::{ErrorAction, GuardHooks, HookDecision};
use crate::pipeline::outcome::{Decision, GuardError, GuardResult, Severity, TriggeredDetector};
use crate::stats::{InMemoryStats, StatsCollector};

// ── Run accumulation ───────────────────────────────────────────────────

/// Running maxima and triggered list for one pipeline pass.
#[derive(Debug, Default)]
struct RunState {
    triggered: Vec<TriggeredDetector>,
    last_l2: Option<DetectorVerdict>,
    max_score: f32,
    max_severity: Severity,
    needs_escalation: bool,
    block_reason: Option<String>,
}

impl RunState {
    /// Fold one verdict in.  Returns `true` when iteration must stop.
    fn absorb(&mut self, verdict: DetectorVerdict) -> bool {
        self.max_score = self.max_score.max(verdict.score);
        self.max_severity = self.max_severity.max(verdict.severity);
        self.needs_escalation |= verdict.needs_escalation;

        let stop = !verdict.passed && verdict.severity >= Severity::High;
        if stop {
            let what = verdict
                .details
                .clone()
                .or_else(|| verdict.pattern.clone())
                .unwrap_or_else(|| "threat detected".into());
            self.block_reason = Some(format!("{}: {}", verdict.detector, what));
        }

        if verdict.is_triggered() {
            if verdict.layer == Layer::L2 {
                self.last_l2 = Some(verdict.clone());
            }
            self.triggered.push(TriggeredDetector {
                name: verdict.detector,
                layer: verdict.layer,
                score: verdict.score,
                severity: verdict.severity,
                pattern: verdict.pattern,
                matched_text: verdict.matched_text,
                details: verdict.details,
            });
        }
        stop
    }

    /// Fold a detector error in, per fail-mode.  Returns `true` when
    /// iteration must stop.
    fn absorb_error(&mut self, detector: &str, fail_mode: FailMode) -> bool {
        match fail_mode {
            FailMode::Open => {
                tracing::warn!(detector, "detector failed, continuing (fail-open)");
                false
            }
            FailMode::Closed => {
                self.max_severity = Severity::Critical;
                self.block_reason = Some(format!("Guard error: {detector}"));
                true
            }
        }
    }
}

// ── Guardrails ─────────────────────────────────────────────────────────

/// The guard pipeline: normalizer, ordered detectors, aggregator, hooks,
/// optional remote judge.
///
/// Cheap to share: wrap in an `Arc` and call from as many tasks as needed —
/// every structure inside is concurrent or immutable.
pub struct Guardrails {
    normalizer: TextNormalizer,
    engine: Arc<PatternEngine>,
    input_detectors: Vec<Arc<dyn InputDetector>>,
    output_detectors: Vec<Arc<dyn OutputDetector>>,
    hooks: GuardHooks,
    stats: Arc<dyn StatsCollector>,
    judge: Option<Arc<RemoteJudge>>,
    fail_mode: FailMode,
    block_threshold: f32,
    flag_threshold: f32,
    escalation_threshold: f32,
    guard_timeout: Duration,
    escalation_timeout: Duration,
    escalation_enabled: bool,
}

impl Guardrails {
    /// Start building a pipeline.
    #[must_use]
    pub fn builder() -> GuardrailsBuilder {
        GuardrailsBuilder::default()
    }

    /// Build a pipeline straight from a configuration record, with no
    /// classifier or judge backends.
    #[must_use]
    pub fn from_config(config: GuardConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// The shared pattern engine, for registering custom patterns.
    #[must_use]
    pub fn engine(&self) -> &Arc<PatternEngine> {
        &self.engine
    }

    /// The stats collector the pipeline reports to.
    #[must_use]
    pub fn stats(&self) -> &Arc<dyn StatsCollector> {
        &self.stats
    }

    /// The remote judge, when one is configured.
    #[must_use]
    pub fn judge(&self) -> Option<&Arc<RemoteJudge>> {
        self.judge.as_ref()
    }

    // ── Input pipeline ─────────────────────────────────────────────

    /// Run the input pipeline over the context.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Cancelled`] when the context's cancellation
    /// signal fires; every other failure folds into the result.
    pub async fn check_input(&self, ctx: &CheckContext) -> Result<GuardResult, GuardError> {
        let started = Instant::now();

        if let Some(hook) = &self.hooks.before_check
            && !hook(ctx)
        {
            let mut result = GuardResult::pass(ctx.request_id());
            result.latency_ms = elapsed_ms(started);
            self.stats.record_check(&result, true);
            return Ok(result);
        }

        ctx.set_normalized(self.normalizer.normalize(ctx.input()));

        let mut state = RunState::default();
        let mut override_result = None;

        for detector in &self.input_detectors {
            if !detector.enabled() {
                continue;
            }
            if ctx.is_cancelled() {
                return Err(GuardError::Cancelled {
                    request_id: ctx.request_id().to_string(),
                });
            }

            let check_started = Instant::now();
            let outcome = tokio::time::timeout(self.guard_timeout, detector.check(ctx)).await;
            let latency_ms = elapsed_ms(check_started);

            match flatten_timeout(outcome, detector.name()) {
                Ok(mut verdict) => {
                    verdict.latency_ms = latency_ms;
                    self.stats.record_detector(
                        detector.name(),
                        detector.layer(),
                        latency_ms,
                        verdict.is_triggered(),
                    );
                    if state.absorb(verdict) {
                        break;
                    }
                }
                Err(error) => {
                    self.stats.record_error(detector.name(), detector.layer());
                    match self.route_error(ctx, detector.name(), &error) {
                        ErrorAction::Override(result) => {
                            override_result = Some(result);
                            break;
                        }
                        ErrorAction::Continue => {
                            if state.absorb_error(detector.name(), self.fail_mode) {
                                break;
                            }
                        }
                    }
                }
            }
        }

        let mut result = match override_result {
            Some(result) => result,
            None => {
                let local = self.aggregate(ctx, state);
                self.resolve_escalation(ctx, local, None).await
            }
        };

        self.publish(ctx, &mut result, started, true);
        Ok(result)
    }

    // ── Output pipeline ────────────────────────────────────────────

    /// Run the output pipeline over the model's response.  No normalization
    /// pass — the output is the model's canonical text.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Cancelled`] when the context's cancellation
    /// signal fires; every other failure folds into the result.
    pub async fn check_output(
        &self,
        ctx: &CheckContext,
        output: &str,
    ) -> Result<GuardResult, GuardError> {
        let started = Instant::now();

        if let Some(hook) = &self.hooks.before_check
            && !hook(ctx)
        {
            let mut result = GuardResult::pass(ctx.request_id());
            result.latency_ms = elapsed_ms(started);
            self.stats.record_check(&result, false);
            return Ok(result);
        }

        let mut state = RunState::default();
        let mut override_result = None;

        for detector in &self.output_detectors {
            if !detector.enabled() {
                continue;
            }
            if ctx.is_cancelled() {
                return Err(GuardError::Cancelled {
                    request_id: ctx.request_id().to_string(),
                });
            }

            let check_started = Instant::now();
            let outcome =
                tokio::time::timeout(self.guard_timeout, detector.check(ctx, output)).await;
            let latency_ms = elapsed_ms(check_started);

            match flatten_timeout(outcome, detector.name()) {
                Ok(mut verdict) => {
                    verdict.latency_ms = latency_ms;
                    self.stats.record_detector(
                        detector.name(),
                        detector.layer(),
                        latency_ms,
                        verdict.is_triggered(),
                    );
                    if state.absorb(verdict) {
                        break;
                    }
                }
                Err(error) => {
                    self.stats.record_error(detector.name(), detector.layer());
                    match self.route_error(ctx, detector.name(), &error) {
                        ErrorAction::Override(result) => {
                            override_result = Some(result);
                            break;
                        }
                        ErrorAction::Continue => {
                            if state.absorb_error(detector.name(), self.fail_mode) {
                                break;
                            }
                        }
                    }
                }
            }
        }

        let mut result = match override_result {
            Some(result) => result,
            None => {
                let local = self.aggregate(ctx, state);
                self.resolve_escalation(ctx, local, Some(output)).await
            }
        };

        self.publish(ctx, &mut result, started, false);
        Ok(result)
    }

    // ── Aggregation ────────────────────────────────────────────────

    /// Deterministic fold of the run state into a decision.
    fn aggregate(&self, ctx: &CheckContext, state: RunState) -> AggregatedResult {
        let RunState {
            triggered,
            last_l2,
            max_score,
            max_severity,
            needs_escalation,
            block_reason,
        } = state;

        let decision = if block_reason.is_some() {
            Decision::Block
        } else if max_score >= self.block_threshold {
            Decision::Block
        } else if needs_escalation
            && self.escalation_enabled
            && max_score >= self.escalation_threshold
        {
            Decision::Escalate
        } else if max_score >= self.flag_threshold {
            Decision::Flag
        } else {
            Decision::Pass
        };

        let block_reason = match (&decision, block_reason) {
            (Decision::Block, Some(reason)) => Some(reason),
            (Decision::Block, None) => Some(
                triggered
                    .first()
                    .and_then(|t| t.details.clone().or_else(|| t.pattern.clone()))
                    .unwrap_or_else(|| "Threshold exceeded".into()),
            ),
            _ => None,
        };

        AggregatedResult {
            result: GuardResult {
                request_id: ctx.request_id().to_string(),
                decision,
                score: max_score,
                max_severity,
                triggered,
                block_reason,
                latency_ms: 0.0,
            },
            last_l2,
        }
    }

    // ── Escalation ─────────────────────────────────────────────────

    /// Resolve an Escalate decision through the remote judge, when one is
    /// configured.  Without a judge the Escalate decision is returned as-is
    /// for the caller to act on.
    async fn resolve_escalation(
        &self,
        ctx: &CheckContext,
        aggregated: AggregatedResult,
        output: Option<&str>,
    ) -> GuardResult {
        let AggregatedResult { result, last_l2 } = aggregated;

        if result.decision != Decision::Escalate {
            return result;
        }
        let Some(judge) = &self.judge else {
            return result;
        };

        if let Some(hook) = &self.hooks.before_escalation
            && !hook(ctx, &result)
        {
            return result;
        }

        let l2 = last_l2.as_ref();
        let judgment = match output {
            Some(output) => {
                tokio::time::timeout(self.escalation_timeout, judge.check_output(ctx, output, l2))
                    .await
            }
            None => {
                tokio::time::timeout(self.escalation_timeout, judge.check_input(ctx, l2)).await
            }
        };

        let Ok(judgment) = judgment else {
            tracing::warn!(request_id = ctx.request_id(), "escalation timed out");
            if let Some(hook) = &self.hooks.escalation_timeout {
                return hook(ctx, &result);
            }
            return result;
        };

        let mut result = result;
        if judgment.is_degraded() {
            // Judge unreachable — fall back to the local thresholds.
            result.decision = if result.score >= self.flag_threshold {
                Decision::Flag
            } else {
                Decision::Pass
            };
            return result;
        }

        result.score = result.score.max(judgment.score);
        result.max_severity = result.max_severity.max(judgment.severity);

        if !judgment.passed {
            result.triggered.push(TriggeredDetector {
                name: "L3Judge".into(),
                layer: Layer::L3,
                score: judgment.score,
                severity: judgment.severity,
                pattern: judgment.categories.first().cloned(),
                matched_text: None,
                details: Some(judgment.reasoning.clone()),
            });

            // The judge's own thresholds decide: block, flag, or pass.
            if judgment.score >= judge.config().block_threshold {
                result.decision = Decision::Block;
                result.block_reason = Some(if judgment.reasoning.is_empty() {
                    "Remote judge blocked".into()
                } else {
                    format!("L3Judge: {}", judgment.reasoning)
                });
            } else if judgment.score >= judge.config().flag_threshold {
                result.decision = Decision::Flag;
            } else {
                result.decision = Decision::Pass;
            }
        } else {
            result.decision = if result.score >= self.flag_threshold {
                Decision::Flag
            } else {
                Decision::Pass
            };
        }
        result
    }

    // ── Publication ────────────────────────────────────────────────

    fn route_error(
        &self,
        ctx: &CheckContext,
        detector: &str,
        error: &DetectorError,
    ) -> ErrorAction {
        tracing::warn!(detector, error = %error, "detector error");
        match &self.hooks.guard_error {
            Some(hook) => hook(ctx, detector, error),
            None => ErrorAction::Continue,
        }
    }

    fn publish(
        &self,
        ctx: &CheckContext,
        result: &mut GuardResult,
        started: Instant,
        is_input: bool,
    ) {
        if let Some(hook) = &self.hooks.custom_decision
            && let HookDecision::Override(replacement) = hook(ctx, result)
        {
            *result = replacement;
        }

        let decision_hook = match result.decision {
            Decision::Block => self.hooks.blocked.as_ref(),
            Decision::Flag => self.hooks.flagged.as_ref(),
            Decision::Pass => self.hooks.passed.as_ref(),
            Decision::Escalate => None,
        };
        if let Some(hook) = decision_hook {
            hook(ctx, result);
        }

        if let Some(hook) = &self.hooks.after_check {
            hook(ctx, result);
        }

        result.latency_ms = elapsed_ms(started);
        self.stats.record_check(result, is_input);
    }
}

/// Intermediate aggregation output, carrying the last L2 verdict for the
/// judge's context block.
struct AggregatedResult {
    result: GuardResult,
    last_l2: Option<DetectorVerdict>,
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Convert a `tokio::time::timeout` result into the detector error space.
fn flatten_timeout(
    outcome: Result<Result<DetectorVerdict, DetectorError>, tokio::time::error::Elapsed>,
    detector: &str,
) -> Result<DetectorVerdict, DetectorError> {
    match outcome {
        Ok(inner) => inner,
        Err(_) => Err(DetectorError::Timeout {
            detector: detector.to_string(),
        }),
    }
}

// ── GuardrailsBuilder ──────────────────────────────────────────────────

/// Builder assembling a [`Guardrails`] pipeline from a config record plus
/// optional backends and custom detectors.
#[derive(Default)]
pub struct GuardrailsBuilder {
    config: GuardConfig,
    hooks: GuardHooks,
    stats: Option<Arc<dyn StatsCollector>>,
    completion: Option<Arc<dyn CompletionService>>,
    classifier: Option<(Arc<dyn SequenceClassifier>, Arc<dyn Tokenizer>)>,
    registry: Option<Arc<PatternRegistry>>,
    extra_input: Vec<Arc<dyn InputDetector>>,
    extra_output: Vec<Arc<dyn OutputDetector>>,
}

impl GuardrailsBuilder {
    /// Use this configuration record.
    #[must_use]
    pub fn config(mut self, config: GuardConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach application hooks.
    #[must_use]
    pub fn hooks(mut self, hooks: GuardHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Use a custom stats collector instead of [`InMemoryStats`].
    #[must_use]
    pub fn stats(mut self, stats: Arc<dyn StatsCollector>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Wire a completion backend, enabling the remote judge and (when
    /// enabled) the groundedness detector.
    #[must_use]
    pub fn completion_service(mut self, service: Arc<dyn CompletionService>) -> Self {
        self.completion = Some(service);
        self
    }

    /// Wire a sequence classifier, enabling the L2 detectors.
    #[must_use]
    pub fn classifier(
        mut self,
        classifier: Arc<dyn SequenceClassifier>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        self.classifier = Some((classifier, tokenizer));
        self
    }

    /// Use a pre-populated pattern registry instead of the built-in banks.
    #[must_use]
    pub fn registry(mut self, registry: Arc<PatternRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Add a custom input detector (sorted into place by order).
    #[must_use]
    pub fn add_input_detector(mut self, detector: Arc<dyn InputDetector>) -> Self {
        self.extra_input.push(detector);
        self
    }

    /// Add a custom output detector (sorted into place by order).
    #[must_use]
    pub fn add_output_detector(mut self, detector: Arc<dyn OutputDetector>) -> Self {
        self.extra_output.push(detector);
        self
    }

    /// Assemble the pipeline.
    #[must_use]
    pub fn build(self) -> Guardrails {
        let config = self.config;

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(PatternRegistry::with_builtins(&config.supported_languages)));
        let engine = Arc::new(
            PatternEngine::new(registry)
                .with_match_timeout(Duration::from_millis(config.match_timeout_ms)),
        );

        let normalizer = TextNormalizer::new(
            NormalizerConfig::new()
                .apply_nfkc(config.nfkc_enabled)
                .strip_invisible(config.strip_invisible_enabled)
                .fold_homoglyphs(config.fold_homoglyphs_enabled),
        );

        let judge = self.completion.map(|service| {
            Arc::new(RemoteJudge::new(
                service,
                CacheConfig {
                    enabled: config.cache_enabled,
                    ttl: Duration::from_secs(config.cache_ttl_seconds),
                    max_entries: config.cache_max_entries,
                },
                JudgeConfig {
                    model: config.judge.model.clone(),
                    max_tokens: config.judge.max_tokens,
                    temperature: config.judge.temperature,
                    block_threshold: config.judge.block_threshold,
                    flag_threshold: config.judge.flag_threshold,
                    timeout: Duration::from_millis(config.escalation_timeout_ms),
                    max_retries: config.max_retries,
                },
            ))
        });

        let mut input_detectors: Vec<Arc<dyn InputDetector>> = Vec::new();
        let mut output_detectors: Vec<Arc<dyn OutputDetector>> = Vec::new();

        if config.encoding_bypass_enabled {
            input_detectors.push(Arc::new(EncodingBypassDetector::new(
                engine.clone(),
                config.escalation_threshold,
            )));
        }
        if config.prompt_injection_enabled {
            input_detectors.push(Arc::new(PromptInjectionDetector::new(
                engine.clone(),
                config.escalation_threshold,
            )));
        }
        if config.jailbreak_enabled {
            input_detectors.push(Arc::new(JailbreakDetector::new(
                engine.clone(),
                config.escalation_threshold,
            )));
        }
        if config.pii_enabled {
            input_detectors.push(Arc::new(PiiExposureDetector::new(
                engine.clone(),
                &config.supported_languages,
            )));
            output_detectors.push(Arc::new(PiiLeakageDetector::new(
                engine.clone(),
                &config.supported_languages,
            )));
        }
        if config.refusal_enabled {
            output_detectors.push(Arc::new(RefusalDetector::new(engine.clone())));
        }
        if config.rag_security_enabled {
            input_detectors.push(Arc::new(RagDocumentSecurityDetector::new(engine.clone())));
        }

        if let Some((classifier, tokenizer)) = self.classifier {
            let inference_timeout = Duration::from_millis(config.guard_timeout_ms);
            if config.classifier_enabled {
                input_detectors.push(Arc::new(
                    InjectionClassifierDetector::new(classifier.clone(), tokenizer.clone())
                        .with_escalation_threshold(config.escalation_threshold)
                        .with_inference_timeout(inference_timeout),
                ));
            }
            if config.toxicity_enabled {
                output_detectors.push(Arc::new(ToxicityClassifierDetector::new(
                    classifier, tokenizer,
                )));
            }
        }

        if let Some(judge) = &judge
            && config.groundedness_enabled
        {
            output_detectors.push(Arc::new(GroundednessDetector::new(judge.clone())));
        }

        input_detectors.extend(self.extra_input);
        output_detectors.extend(self.extra_output);

        input_detectors.sort_by(|a, b| {
            (a.order(), a.name().to_string()).cmp(&(b.order(), b.name().to_string()))
        });
        output_detectors.sort_by(|a, b| {
            (a.order(), a.name().to_string()).cmp(&(b.order(), b.name().to_string()))
        });

        Guardrails {
            normalizer,
            engine,
            input_detectors,
            output_detectors,
            hooks: self.hooks,
            stats: self
                .stats
                .unwrap_or_else(|| Arc::new(InMemoryStats::new())),
            judge,
            fail_mode: config.fail_mode,
            block_threshold: config.block_threshold,
            flag_threshold: config.flag_threshold,
            escalation_threshold: config.escalation_threshold,
            guard_timeout: Duration::from_millis(config.guard_timeout_ms),
            escalation_timeout: Duration::from_millis(config.escalation_timeout_ms),
            escalation_enabled: config.escalation_enabled,
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
