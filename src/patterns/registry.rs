//! Thread-safe, category-keyed pattern registry.
//!
//! Registration is idempotent by pattern id within a category: registering a
//! pattern whose id already exists replaces the previous definition. After
//! startup the registry is effectively read-only under load — reads take a
//! point-in-time snapshot of the category's pattern list.

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::outcome::Severity;

// ── PatternCategory ────────────────────────────────────────────────────

/// Which bank a pattern belongs to.  Detectors query one or more categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum PatternCategory {
    /// Instruction-override, role-switching, system-prompt extraction.
    PromptInjection,
    /// Named-persona attacks, unrestricted-mode phrasing, pretexts.
    Jailbreak,
    /// Base64/hex/escape blobs and encoding-trick mentions.
    Encoding,
    /// Language-neutral PII: email, cards, keys, tokens.
    PiiNeutral,
    /// United States locale PII bank.
    PiiUs,
    /// Korean locale PII bank.
    PiiKr,
    /// Japanese locale PII bank.
    PiiJp,
    /// Common model-refusal phrasing (output side).
    Refusal,
    /// Indirect-injection phrasing found in retrieved documents.
    RagInjection,
}

impl std::fmt::Display for PatternCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PromptInjection => "prompt_injection",
            Self::Jailbreak => "jailbreak",
            Self::Encoding => "encoding",
            Self::PiiNeutral => "pii_neutral",
            Self::PiiUs => "pii_us",
            Self::PiiKr => "pii_kr",
            Self::PiiJp => "pii_jp",
            Self::Refusal => "refusal",
            Self::RagInjection => "rag_injection",
        };
        write!(f, "{s}")
    }
}

impl PatternCategory {
    /// The PII bank for a locale tag, if one exists.
    #[must_use]
    pub fn pii_bank_for(language: &str) -> Option<Self> {
        match language.to_ascii_lowercase().as_str() {
            "us" | "en" | "en-us" => Some(Self::PiiUs),
            "kr" | "ko" | "ko-kr" => Some(Self::PiiKr),
            "jp" | "ja" | "ja-jp" => Some(Self::PiiJp),
            _ => None,
        }
    }
}

// ── PatternDefinition ──────────────────────────────────────────────────

/// A named rule: compiled matcher plus the metadata detectors report.
#[derive(Debug, Clone)]
pub struct PatternDefinition {
    /// Stable identifier, unique within a category (e.g. `"PI-001"`).
    pub id: Cow<'static, str>,
    /// Human-readable name reported in verdicts (e.g. `"IgnoreInstructions"`).
    pub name: Cow<'static, str>,
    /// Compiled matcher.
    pub regex: Regex,
    /// Severity when this pattern matches.
    pub severity: Severity,
    /// Base confidence in \[0.0, 1.0\].
    pub confidence: f32,
    /// Optional description of what the pattern detects.
    pub description: Option<Cow<'static, str>>,
    /// Whether the pattern participates in matching.
    pub enabled: bool,
}

impl PatternDefinition {
    /// Compile a definition from a regex string.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError::InvalidRegex`] if the pattern fails to compile.
    pub fn new(
        id: impl Into<Cow<'static, str>>,
        name: impl Into<Cow<'static, str>>,
        regex_str: &str,
        severity: Severity,
        confidence: f32,
    ) -> Result<Self, PatternError> {
        let id = id.into();
        let regex = Regex::new(regex_str).map_err(|e| PatternError::InvalidRegex {
            id: id.to_string(),
            source: e,
        })?;
        Ok(Self {
            id,
            name: name.into(),
            regex,
            severity,
            confidence,
            description: None,
            enabled: true,
        })
    }

    /// Attach a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = Some(description.into());
        self
    }
}

// ── PatternError ───────────────────────────────────────────────────────

/// Errors raised while building or registering patterns.
#[derive(Debug, Error)]
pub enum PatternError {
    /// The regex string failed to compile.
    #[error("pattern '{id}' has an invalid regex: {source}")]
    InvalidRegex {
        /// Pattern id that failed.
        id: String,
        /// Underlying regex error.
        source: regex::Error,
    },
}

// ── PatternRegistry ────────────────────────────────────────────────────

/// Concurrent category-keyed pattern store.
///
/// Every mutation bumps a revision counter; the
/// [`PatternEngine`](super::engine::PatternEngine) keys its compiled-set
/// cache on it.
#[derive(Debug, Default)]
pub struct PatternRegistry {
    categories: DashMap<PatternCategory, Vec<PatternDefinition>>,
    revision: AtomicU64,
}

impl PatternRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-loaded with the built-in banks for the given
    /// locale tags (unknown tags are ignored; the neutral banks always load).
    #[must_use]
    pub fn with_builtins(languages: &[String]) -> Self {
        let registry = Self::new();
        crate::patterns::builtin::load_builtins(&registry, languages);
        registry
    }

    /// Insert or update a pattern (keyed by id within the category).
    pub fn register(&self, category: PatternCategory, definition: PatternDefinition) {
        let mut entry = self.categories.entry(category).or_default();
        if let Some(existing) = entry.iter_mut().find(|p| p.id == definition.id) {
            *existing = definition;
        } else {
            entry.push(definition);
        }
        drop(entry);
        self.revision.fetch_add(1, Ordering::Release);
    }

    /// All *enabled* patterns for a category (point-in-time snapshot).
    #[must_use]
    pub fn patterns(&self, category: PatternCategory) -> Vec<PatternDefinition> {
        self.categories
            .get(&category)
            .map(|entry| entry.iter().filter(|p| p.enabled).cloned().collect())
            .unwrap_or_default()
    }

    /// Every category that has at least one registered pattern.
    #[must_use]
    pub fn categories(&self) -> Vec<PatternCategory> {
        self.categories.iter().map(|e| *e.key()).collect()
    }

    /// Disable a single pattern by id.  Returns `true` if it was found.
    pub fn disable(&self, category: PatternCategory, id: &str) -> bool {
        if let Some(mut entry) = self.categories.get_mut(&category)
            && let Some(pattern) = entry.iter_mut().find(|p| p.id == id)
        {
            pattern.enabled = false;
            drop(entry);
            self.revision.fetch_add(1, Ordering::Release);
            return true;
        }
        false
    }

    /// Monotonic change counter — bumped by every registration or disable.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Total number of registered patterns across all categories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.categories.iter().map(|e| e.value().len()).sum()
    }

    /// Whether the registry has no patterns at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(id: &'static str, re: &str) -> PatternDefinition {
        PatternDefinition::new(id, id, re, Severity::High, 0.9).unwrap()
    }

    #[test]
    fn register_and_lookup() {
        let reg = PatternRegistry::new();
        reg.register(PatternCategory::PromptInjection, pattern("P-1", "foo"));
        let found = reg.patterns(PatternCategory::PromptInjection);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "P-1");
    }

    #[test]
    fn registration_is_idempotent_by_id() {
        let reg = PatternRegistry::new();
        reg.register(PatternCategory::Jailbreak, pattern("J-1", "foo"));
        reg.register(PatternCategory::Jailbreak, pattern("J-1", "bar"));
        let found = reg.patterns(PatternCategory::Jailbreak);
        assert_eq!(found.len(), 1);
        assert!(found[0].regex.is_match("bar"));
    }

    #[test]
    fn disable_removes_from_lookup() {
        let reg = PatternRegistry::new();
        reg.register(PatternCategory::Encoding, pattern("E-1", "foo"));
        assert!(reg.disable(PatternCategory::Encoding, "E-1"));
        assert!(reg.patterns(PatternCategory::Encoding).is_empty());
        assert!(!reg.disable(PatternCategory::Encoding, "missing"));
    }

    #[test]
    fn categories_enumerated() {
        let reg = PatternRegistry::new();
        reg.register(PatternCategory::PiiUs, pattern("U-1", "foo"));
        reg.register(PatternCategory::Refusal, pattern("R-1", "bar"));
        let mut cats = reg.categories();
        cats.sort_by_key(|c| c.to_string());
        assert_eq!(cats, vec![PatternCategory::PiiUs, PatternCategory::Refusal]);
    }

    #[test]
    fn revision_bumps_on_mutation() {
        let reg = PatternRegistry::new();
        let r0 = reg.revision();
        reg.register(PatternCategory::Encoding, pattern("E-1", "foo"));
        let r1 = reg.revision();
        assert!(r1 > r0);
        assert!(reg.disable(PatternCategory::Encoding, "E-1"));
        assert!(reg.revision() > r1);

        // A failed disable is not a mutation.
        let r2 = reg.revision();
        assert!(!reg.disable(PatternCategory::Encoding, "missing"));
        assert_eq!(reg.revision(), r2);
    }

    #[test]
    fn invalid_regex_rejected() {
        let err = PatternDefinition::new("B-1", "Broken", "([unclosed", Severity::Low, 0.5);
        assert!(matches!(err, Err(PatternError::InvalidRegex { .. })));
    }

    #[test]
    fn pii_bank_locale_mapping() {
        assert_eq!(
            PatternCategory::pii_bank_for("ko-KR"),
            Some(PatternCategory::PiiKr)
        );
        assert_eq!(
            PatternCategory::pii_bank_for("ja"),
            Some(PatternCategory::PiiJp)
        );
        assert_eq!(PatternCategory::pii_bank_for("xx"), None);
    }
}
