//! Pattern evaluation: a compiled multi-pattern first pass plus a
//! per-pattern match budget.
//!
//! Matching is two-pass: a [`RegexSet`] over every enabled pattern in the
//! category answers *which* patterns match in a single O(n) scan, then only
//! the patterns that hit are re-searched with their individual [`Regex`]es
//! to extract spans.  The compiled set is cached per category and rebuilt
//! when the registry's revision changes, so runtime registration and
//! disabling stay cheap.
//!
//! The `regex` crate guarantees linear-time scans, so a runaway evaluation
//! cannot be interrupted mid-search — instead the engine measures every
//! evaluation against the configured budget.  An evaluation that overruns it
//! contributes a synthetic match (`timed_out = true`, severity Medium,
//! confidence 0.5) per affected pattern: a potential-threat signal, not
//! certainty.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use regex::RegexSet;
use serde::{Deserialize, Serialize};

use super::registry::{PatternCategory, PatternDefinition, PatternRegistry};
use crate::pipeline::outcome::Severity;

/// Default per-pattern match budget.
pub const DEFAULT_MATCH_TIMEOUT: Duration = Duration::from_millis(100);

// ── PatternMatch ───────────────────────────────────────────────────────

/// A span produced by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMatch {
    /// Id of the pattern that fired.
    pub pattern_id: String,
    /// Name of the pattern that fired (reported in verdicts).
    pub pattern_name: String,
    /// The matched text — empty for synthetic timeout records.
    pub matched_text: String,
    /// Byte offset of the match within the input.
    pub offset: usize,
    /// Byte length of the match.
    pub length: usize,
    /// Severity inherited from the pattern (Medium for timeouts).
    pub severity: Severity,
    /// Confidence inherited from the pattern (0.5 for timeouts).
    pub confidence: f32,
    /// Whether this record is a synthetic timeout signal.
    pub timed_out: bool,
}

impl PatternMatch {
    fn found(pattern: &PatternDefinition, m: &regex::Match<'_>) -> Self {
        Self {
            pattern_id: pattern.id.to_string(),
            pattern_name: pattern.name.to_string(),
            matched_text: m.as_str().to_string(),
            offset: m.start(),
            length: m.len(),
            severity: pattern.severity,
            confidence: pattern.confidence,
            timed_out: false,
        }
    }

    /// Synthetic record emitted when a pattern evaluation overruns its budget.
    fn timed_out(pattern: &PatternDefinition) -> Self {
        Self {
            pattern_id: pattern.id.to_string(),
            pattern_name: pattern.name.to_string(),
            matched_text: String::new(),
            offset: 0,
            length: 0,
            severity: Severity::Medium,
            confidence: 0.5,
            timed_out: true,
        }
    }
}

/// All spans for one pattern, deduplicated by matched text.
fn extract_spans(pattern: &PatternDefinition, text: &str) -> Vec<PatternMatch> {
    let mut seen: Vec<&str> = Vec::new();
    let mut hits = Vec::new();
    for m in pattern.regex.find_iter(text) {
        if seen.contains(&m.as_str()) {
            continue;
        }
        seen.push(m.as_str());
        hits.push(PatternMatch::found(pattern, &m));
    }
    hits
}

// ── CompiledCategory ───────────────────────────────────────────────────

/// A category's enabled patterns with their combined first-pass set, pinned
/// to the registry revision it was built from.
#[derive(Debug)]
struct CompiledCategory {
    revision: u64,
    /// `None` when the combined set could not be built — matching then
    /// falls back to scanning each pattern individually.
    set: Option<RegexSet>,
    patterns: Vec<PatternDefinition>,
}

// ── PatternEngine ──────────────────────────────────────────────────────

/// Evaluates a category's enabled patterns against text.
#[derive(Debug, Clone)]
pub struct PatternEngine {
    registry: Arc<PatternRegistry>,
    match_timeout: Duration,
    compiled: Arc<DashMap<PatternCategory, Arc<CompiledCategory>>>,
}

impl PatternEngine {
    /// Create an engine over a shared registry with the default budget.
    #[must_use]
    pub fn new(registry: Arc<PatternRegistry>) -> Self {
        Self {
            registry,
            match_timeout: DEFAULT_MATCH_TIMEOUT,
            compiled: Arc::new(DashMap::new()),
        }
    }

    /// Override the per-pattern match budget.
    #[must_use]
    pub fn with_match_timeout(mut self, timeout: Duration) -> Self {
        self.match_timeout = timeout;
        self
    }

    /// The registry the engine evaluates.
    #[must_use]
    pub fn registry(&self) -> &Arc<PatternRegistry> {
        &self.registry
    }

    /// The cached compiled set for a category, rebuilt when stale.
    fn compiled(&self, category: PatternCategory) -> Arc<CompiledCategory> {
        let revision = self.registry.revision();
        if let Some(entry) = self.compiled.get(&category)
            && entry.revision == revision
        {
            return entry.value().clone();
        }

        let patterns = self.registry.patterns(category);
        let set = if patterns.is_empty() {
            None
        } else {
            // Each pattern already compiled individually at registration, so
            // a combined build can only fail on aggregate size limits.
            match RegexSet::new(patterns.iter().map(|p| p.regex.as_str())) {
                Ok(set) => Some(set),
                Err(e) => {
                    tracing::error!(
                        category = %category,
                        error = %e,
                        "combined pattern set failed to build, scanning patterns individually",
                    );
                    None
                }
            }
        };

        let compiled = Arc::new(CompiledCategory {
            revision,
            set,
            patterns,
        });
        self.compiled.insert(category, compiled.clone());
        compiled
    }

    /// All matches for the category, deduplicated per pattern by matched
    /// text.  Pattern order follows registration order.
    #[must_use]
    pub fn match_all(&self, text: &str, category: PatternCategory) -> Vec<PatternMatch> {
        let compiled = self.compiled(category);
        if compiled.patterns.is_empty() {
            return Vec::new();
        }

        // First pass: one combined scan decides which patterns to re-search.
        let candidates: Vec<usize> = match &compiled.set {
            Some(set) => {
                let started = Instant::now();
                let matched: Vec<usize> = set.matches(text).into_iter().collect();
                if started.elapsed() >= self.match_timeout {
                    tracing::warn!(
                        category = %category,
                        "combined set scan exceeded match budget, emitting timeout signals",
                    );
                    return compiled.patterns.iter().map(PatternMatch::timed_out).collect();
                }
                matched
            }
            None => (0..compiled.patterns.len()).collect(),
        };

        // Second pass: span extraction for matched patterns only.
        let mut results = Vec::new();
        for idx in candidates {
            let pattern = &compiled.patterns[idx];
            let started = Instant::now();
            let mut hits = extract_spans(pattern, text);
            if started.elapsed() >= self.match_timeout {
                tracing::warn!(
                    pattern = %pattern.id,
                    category = %category,
                    "pattern evaluation exceeded match budget, emitting timeout signal",
                );
                results.push(PatternMatch::timed_out(pattern));
            } else {
                results.append(&mut hits);
            }
        }
        results
    }

    /// First match for the category, or `None`.
    #[must_use]
    pub fn first_match(&self, text: &str, category: PatternCategory) -> Option<PatternMatch> {
        let compiled = self.compiled(category);
        if compiled.patterns.is_empty() {
            return None;
        }

        match &compiled.set {
            Some(set) => {
                let started = Instant::now();
                let first = set.matches(text).iter().next();
                if started.elapsed() >= self.match_timeout {
                    return Some(PatternMatch::timed_out(&compiled.patterns[0]));
                }

                let pattern = &compiled.patterns[first?];
                let started = Instant::now();
                let found = pattern.regex.find(text);
                if started.elapsed() >= self.match_timeout {
                    return Some(PatternMatch::timed_out(pattern));
                }
                found.map(|m| PatternMatch::found(pattern, &m))
            }
            None => {
                for pattern in &compiled.patterns {
                    let started = Instant::now();
                    let found = pattern.regex.find(text);
                    if started.elapsed() >= self.match_timeout {
                        return Some(PatternMatch::timed_out(pattern));
                    }
                    if let Some(m) = found {
                        return Some(PatternMatch::found(pattern, &m));
                    }
                }
                None
            }
        }
    }

    /// Whether any enabled pattern in the category matches.
    #[must_use]
    pub fn is_match(&self, text: &str, category: PatternCategory) -> bool {
        self.first_match(text, category).is_some()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(id: &'static str, re: &str) -> PatternDefinition {
        PatternDefinition::new(id, id, re, Severity::High, 0.9).unwrap()
    }

    fn engine_with(patterns: &[(&'static str, &str, Severity, f32)]) -> PatternEngine {
        let registry = PatternRegistry::new();
        for (id, re, sev, conf) in patterns {
            registry.register(
                PatternCategory::PromptInjection,
                PatternDefinition::new(*id, *id, re, *sev, *conf).unwrap(),
            );
        }
        PatternEngine::new(Arc::new(registry))
    }

    #[test]
    fn match_all_finds_spans() {
        let engine = engine_with(&[("P-1", r"(?i)ignore", Severity::High, 0.9)]);
        let hits = engine.match_all("please IGNORE this", PatternCategory::PromptInjection);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].matched_text, "IGNORE");
        assert_eq!(hits[0].offset, 7);
        assert_eq!(hits[0].length, 6);
        assert!(!hits[0].timed_out);
    }

    #[test]
    fn duplicate_spans_deduplicated_per_pattern() {
        let engine = engine_with(&[("P-1", r"foo", Severity::Low, 0.5)]);
        let hits = engine.match_all("foo foo foo", PatternCategory::PromptInjection);
        assert_eq!(hits.len(), 1, "identical matched text should deduplicate");
    }

    #[test]
    fn distinct_spans_kept() {
        let engine = engine_with(&[("P-1", r"\d+", Severity::Low, 0.5)]);
        let hits = engine.match_all("12 and 345", PatternCategory::PromptInjection);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn only_matching_patterns_are_re_searched() {
        let engine = engine_with(&[
            ("P-1", r"alpha", Severity::Low, 0.5),
            ("P-2", r"beta", Severity::Low, 0.5),
            ("P-3", r"gamma", Severity::Low, 0.5),
        ]);
        let hits = engine.match_all("beta only", PatternCategory::PromptInjection);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].pattern_id, "P-2");
    }

    #[test]
    fn first_match_respects_registration_order() {
        let engine = engine_with(&[
            ("P-1", r"alpha", Severity::Low, 0.5),
            ("P-2", r"beta", Severity::High, 0.9),
        ]);
        let m = engine
            .first_match("beta alpha", PatternCategory::PromptInjection)
            .unwrap();
        assert_eq!(m.pattern_id, "P-1");
    }

    #[test]
    fn is_match_and_empty_category() {
        let engine = engine_with(&[("P-1", r"x", Severity::Low, 0.5)]);
        assert!(engine.is_match("axb", PatternCategory::PromptInjection));
        assert!(!engine.is_match("abc", PatternCategory::Jailbreak));
    }

    #[test]
    fn zero_budget_degrades_to_timeout_signals() {
        let engine = engine_with(&[("P-1", r"safe", Severity::Low, 0.9)])
            .with_match_timeout(Duration::ZERO);
        let hits = engine.match_all("totally safe", PatternCategory::PromptInjection);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].timed_out);
        assert_eq!(hits[0].severity, Severity::Medium);
        assert!((hits[0].confidence - 0.5).abs() < f32::EPSILON);
        assert!(hits[0].matched_text.is_empty());
    }

    #[test]
    fn zero_budget_first_match_is_synthetic() {
        let engine =
            engine_with(&[("P-1", r"never", Severity::Low, 0.9)]).with_match_timeout(Duration::ZERO);
        let m = engine
            .first_match("no hit here", PatternCategory::PromptInjection)
            .unwrap();
        assert!(m.timed_out);
    }

    #[test]
    fn compiled_set_rebuilds_after_registration() {
        let registry = Arc::new(PatternRegistry::new());
        registry.register(PatternCategory::PromptInjection, pattern("P-1", "alpha"));
        let engine = PatternEngine::new(registry.clone());

        assert!(engine.is_match("alpha", PatternCategory::PromptInjection));
        assert!(!engine.is_match("beta", PatternCategory::PromptInjection));

        registry.register(PatternCategory::PromptInjection, pattern("P-2", "beta"));
        assert!(
            engine.is_match("beta", PatternCategory::PromptInjection),
            "new registration must invalidate the compiled set",
        );
    }

    #[test]
    fn compiled_set_rebuilds_after_disable() {
        let registry = Arc::new(PatternRegistry::new());
        registry.register(PatternCategory::PromptInjection, pattern("P-1", "alpha"));
        let engine = PatternEngine::new(registry.clone());

        assert!(engine.is_match("alpha", PatternCategory::PromptInjection));
        assert!(registry.disable(PatternCategory::PromptInjection, "P-1"));
        assert!(
            !engine.is_match("alpha", PatternCategory::PromptInjection),
            "disable must invalidate the compiled set",
        );
    }
}
