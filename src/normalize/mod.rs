//! Unicode canonicalization, invisible-character filtering, and homoglyph
//! folding.
//!
//! [`TextNormalizer`] runs before any pattern matching so that zero-width
//! padding, bidi overrides, compatibility forms, and cross-script lookalikes
//! cannot hide an injection from the downstream detectors.  It is pure,
//! side-effect-free, and O(n) in the input length.
//!
//! The normalizer also reports *how much* it changed: the invisible-character
//! and homoglyph counts are signals in their own right — the encoding-bypass
//! detector blocks outright when they cross its thresholds.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use unicode_normalization::{IsNormalized, UnicodeNormalization, is_nfkc_quick};

// ── NormalizerConfig ───────────────────────────────────────────────────

/// Configuration for [`TextNormalizer`].
///
/// Each step is independently toggleable — all setters are `#[must_use]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NormalizerConfig {
    /// Whether to drop invisible / format-control characters (default `true`).
    pub strip_invisible: bool,
    /// Whether to apply Unicode NFKC normalization (default `true`).
    pub apply_nfkc: bool,
    /// Whether to fold homoglyphs to their ASCII equivalents (default `true`).
    pub fold_homoglyphs: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            strip_invisible: true,
            apply_nfkc: true,
            fold_homoglyphs: true,
        }
    }
}

impl NormalizerConfig {
    /// Create a new config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable invisible-character filtering.
    #[must_use]
    pub fn strip_invisible(mut self, enabled: bool) -> Self {
        self.strip_invisible = enabled;
        self
    }

    /// Enable or disable NFKC normalization.
    #[must_use]
    pub fn apply_nfkc(mut self, enabled: bool) -> Self {
        self.apply_nfkc = enabled;
        self
    }

    /// Enable or disable homoglyph folding.
    #[must_use]
    pub fn fold_homoglyphs(mut self, enabled: bool) -> Self {
        self.fold_homoglyphs = enabled;
        self
    }
}

// ── Transformation / NormalizedText ────────────────────────────────────

/// A single character-level change applied during normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transformation {
    /// The character (or sequence) that was replaced.
    pub original: String,
    /// What it became — empty for dropped invisibles.
    pub replacement: String,
    /// Char offset within the text at the stage the change was applied.
    pub position: usize,
}

/// Result of a normalization pass: the canonical text plus the metadata
/// detectors consume as obfuscation signals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedText {
    /// The normalized text.
    pub text: String,
    /// How many invisible characters were dropped.
    pub invisible_count: usize,
    /// How many homoglyphs were folded to ASCII.
    pub homoglyph_count: usize,
    /// Individual character transformations, in order of application.
    pub transformations: Vec<Transformation>,
}

// ── Invisible character set ────────────────────────────────────────────

/// Returns `true` for code points that render as nothing but can split or
/// reorder tokens: zero-width spaces/joiners, LRM/RLM, word-joiner, BOM,
/// soft hyphen, variation selectors, tag characters, and bidi controls.
fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{200B}'                  // ZWSP
        | '\u{200C}'                // ZWNJ
        | '\u{200D}'                // ZWJ
        | '\u{200E}'                // LRM
        | '\u{200F}'                // RLM
        | '\u{2060}'                // word joiner
        | '\u{FEFF}'                // BOM / ZWNBSP
        | '\u{00AD}'                // soft hyphen
        | '\u{202A}'..='\u{202E}'   // bidi embeddings & overrides
        | '\u{2066}'..='\u{2069}'   // bidi isolates
        | '\u{FE00}'..='\u{FE0F}'   // variation selectors
        | '\u{E0100}'..='\u{E01EF}' // variation selector supplement
        | '\u{E0001}'..='\u{E007F}' // tag characters
    )
}

// ── Homoglyph folding ──────────────────────────────────────────────────

/// Sorted lookup table mapping cross-script lookalikes to ASCII.
/// Binary-searched at runtime.  Each source glyph maps to exactly one
/// replacement.
static HOMOGLYPHS: &[(char, &str)] = &[
    // Greek uppercase
    ('\u{0391}', "A"),
    ('\u{0392}', "B"),
    ('\u{0395}', "E"),
    ('\u{0396}', "Z"),
    ('\u{0397}', "H"),
    ('\u{0399}', "I"),
    ('\u{039A}', "K"),
    ('\u{039C}', "M"),
    ('\u{039D}', "N"),
    ('\u{039F}', "O"),
    ('\u{03A1}', "P"),
    ('\u{03A4}', "T"),
    ('\u{03A5}', "Y"),
    ('\u{03A7}', "X"),
    // Greek lowercase
    ('\u{03B1}', "a"),
    ('\u{03B9}', "i"),
    ('\u{03BD}', "v"),
    ('\u{03BF}', "o"),
    ('\u{03C1}', "p"),
    ('\u{03C5}', "u"),
    // Cyrillic uppercase
    ('\u{0410}', "A"),
    ('\u{0412}', "B"),
    ('\u{0415}', "E"),
    ('\u{0417}', "3"),
    ('\u{0418}', "N"),
    ('\u{041A}', "K"),
    ('\u{041C}', "M"),
    ('\u{041D}', "H"),
    ('\u{041E}', "O"),
    ('\u{0420}', "P"),
    ('\u{0421}', "C"),
    ('\u{0422}', "T"),
    ('\u{0423}', "Y"),
    ('\u{0425}', "X"),
    // Cyrillic lowercase
    ('\u{0430}', "a"),
    ('\u{0432}', "b"),
    ('\u{0435}', "e"),
    ('\u{043A}', "k"),
    ('\u{043C}', "m"),
    ('\u{043D}', "h"),
    ('\u{043E}', "o"),
    ('\u{0440}', "p"),
    ('\u{0441}', "c"),
    ('\u{0442}', "t"),
    ('\u{0443}', "y"),
    ('\u{0445}', "x"),
    ('\u{0456}', "i"),
    ('\u{0458}', "j"),
    ('\u{04BB}', "h"),
    // Common lookalike symbols
    ('\u{2115}', "N"),
    ('\u{211D}', "R"),
    ('\u{2124}', "Z"),
    ('\u{212E}', "e"),
    ('\u{2170}', "i"),
];

/// Fold a single character to its ASCII equivalent, if it is a homoglyph.
///
/// Combines the static lookalike table with the arithmetic compatibility
/// ranges (full-width forms, mathematical alphanumerics, sub/superscript
/// digits) so the fold still applies when NFKC is disabled.
fn fold_char(c: char) -> Option<Cow<'static, str>> {
    if let Ok(idx) = HOMOGLYPHS.binary_search_by_key(&c, |&(k, _)| k) {
        return Some(Cow::Borrowed(HOMOGLYPHS[idx].1));
    }

    let cp = c as u32;

    // Full-width ASCII block: ！ (U+FF01) … ～ (U+FF5E).
    if (0xFF01..=0xFF5E).contains(&cp) {
        let ascii = char::from_u32(cp - 0xFF01 + 0x21)?;
        return Some(Cow::Owned(ascii.to_string()));
    }

    // Mathematical alphanumeric symbols: letters U+1D400–U+1D6A3 cycle
    // through A–Z/a–z in blocks of 52; digits U+1D7CE–U+1D7FF in blocks
    // of 10.
    if (0x1D400..=0x1D6A3).contains(&cp) {
        let offset = (cp - 0x1D400) % 52;
        let ascii = if offset < 26 {
            char::from_u32(u32::from(b'A') + offset)?
        } else {
            char::from_u32(u32::from(b'a') + offset - 26)?
        };
        return Some(Cow::Owned(ascii.to_string()));
    }
    if (0x1D7CE..=0x1D7FF).contains(&cp) {
        let ascii = char::from_u32(u32::from(b'0') + (cp - 0x1D7CE) % 10)?;
        return Some(Cow::Owned(ascii.to_string()));
    }

    // Superscript and subscript digits.
    let folded = match c {
        '\u{00B9}' => Some("1"),
        '\u{00B2}' => Some("2"),
        '\u{00B3}' => Some("3"),
        '\u{2070}' => Some("0"),
        '\u{2074}' => Some("4"),
        '\u{2075}' => Some("5"),
        '\u{2076}' => Some("6"),
        '\u{2077}' => Some("7"),
        '\u{2078}' => Some("8"),
        '\u{2079}' => Some("9"),
        '\u{2080}' => Some("0"),
        '\u{2081}' => Some("1"),
        '\u{2082}' => Some("2"),
        '\u{2083}' => Some("3"),
        '\u{2084}' => Some("4"),
        '\u{2085}' => Some("5"),
        '\u{2086}' => Some("6"),
        '\u{2087}' => Some("7"),
        '\u{2088}' => Some("8"),
        '\u{2089}' => Some("9"),
        _ => None,
    };
    folded.map(Cow::Borrowed)
}

// ── TextNormalizer ─────────────────────────────────────────────────────

/// Canonicalizes text before pattern matching.
///
/// Steps run in a fixed order: invisible filtering → NFKC → homoglyph
/// folding.  The pipeline is idempotent: normalizing an already-normalized
/// string returns it unchanged.
#[derive(Debug, Clone, Default)]
pub struct TextNormalizer {
    config: NormalizerConfig,
}

impl TextNormalizer {
    /// Create a normalizer with the given configuration.
    #[must_use]
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Create a normalizer with all steps enabled.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(NormalizerConfig::default())
    }

    /// Run the full normalization pipeline.
    #[must_use]
    pub fn normalize(&self, text: &str) -> NormalizedText {
        let mut transformations = Vec::new();
        let mut invisible_count = 0usize;
        let mut homoglyph_count = 0usize;

        // 1. Filter invisible characters.
        let stripped: Cow<'_, str> = if self.config.strip_invisible {
            strip_invisible(text, &mut invisible_count, &mut transformations)
        } else {
            Cow::Borrowed(text)
        };

        // 2. NFKC canonical + compatibility composition.
        let composed: Cow<'_, str> = if self.config.apply_nfkc {
            nfkc(&stripped)
        } else {
            stripped
        };

        // 3. Homoglyph folding.
        let folded: String = if self.config.fold_homoglyphs {
            fold_homoglyphs(&composed, &mut homoglyph_count, &mut transformations)
        } else {
            composed.into_owned()
        };

        NormalizedText {
            text: folded,
            invisible_count,
            homoglyph_count,
            transformations,
        }
    }

    /// Convenience: normalize and return only the text.
    #[must_use]
    pub fn normalize_text(&self, text: &str) -> String {
        self.normalize(text).text
    }

    /// Convenience: the transformation list for the given input.
    #[must_use]
    pub fn transformations(&self, text: &str) -> Vec<Transformation> {
        self.normalize(text).transformations
    }
}

/// Drop invisible characters, recording each drop.
///
/// Returns `Cow::Borrowed` when the text is already clean (zero allocation).
fn strip_invisible<'a>(
    text: &'a str,
    count: &mut usize,
    transformations: &mut Vec<Transformation>,
) -> Cow<'a, str> {
    if !text.chars().any(is_invisible) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    for (pos, c) in text.chars().enumerate() {
        if is_invisible(c) {
            *count += 1;
            transformations.push(Transformation {
                original: c.to_string(),
                replacement: String::new(),
                position: pos,
            });
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

/// Apply NFKC, with the quick-check fast path for already-normalized text.
fn nfkc(text: &str) -> Cow<'_, str> {
    if is_nfkc_quick(text.chars()) == IsNormalized::Yes {
        return Cow::Borrowed(text);
    }
    let normalized: String = text.nfkc().collect();
    if normalized == text {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(normalized)
    }
}

/// Fold homoglyphs to ASCII, recording each fold.
fn fold_homoglyphs(
    text: &str,
    count: &mut usize,
    transformations: &mut Vec<Transformation>,
) -> String {
    if !text.chars().any(|c| fold_char(c).is_some()) {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    for (pos, c) in text.chars().enumerate() {
        match fold_char(c) {
            Some(replacement) => {
                *count += 1;
                transformations.push(Transformation {
                    original: c.to_string(),
                    replacement: replacement.to_string(),
                    position: pos,
                });
                out.push_str(&replacement);
            }
            None => out.push(c),
        }
    }
    out
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn norm() -> TextNormalizer {
        TextNormalizer::with_defaults()
    }

    #[test]
    fn plain_ascii_unchanged() {
        let r = norm().normalize("hello world");
        assert_eq!(r.text, "hello world");
        assert_eq!(r.invisible_count, 0);
        assert_eq!(r.homoglyph_count, 0);
        assert!(r.transformations.is_empty());
    }

    #[test]
    fn zero_width_spaces_dropped_and_counted() {
        let r = norm().normalize("i\u{200B}g\u{200B}n\u{200B}o\u{200B}r\u{200B}e");
        assert_eq!(r.text, "ignore");
        assert_eq!(r.invisible_count, 5);
        assert_eq!(r.transformations.len(), 5);
        assert!(r.transformations.iter().all(|t| t.replacement.is_empty()));
    }

    #[test]
    fn bidi_controls_dropped() {
        let r = norm().normalize("abc\u{202E}def\u{202C}ghi");
        assert_eq!(r.text, "abcdefghi");
        assert_eq!(r.invisible_count, 2);
    }

    #[test]
    fn soft_hyphen_and_bom_dropped() {
        let r = norm().normalize("\u{FEFF}pass\u{00AD}word");
        assert_eq!(r.text, "password");
        assert_eq!(r.invisible_count, 2);
    }

    #[test]
    fn nfkc_folds_ligature() {
        let r = norm().normalize("\u{FB01}nd");
        assert_eq!(r.text, "find");
    }

    #[test]
    fn nfkc_folds_fullwidth() {
        let r = norm().normalize("\u{FF49}\u{FF47}\u{FF4E}\u{FF4F}\u{FF52}\u{FF45}");
        assert_eq!(r.text, "ignore");
    }

    #[test]
    fn cyrillic_homoglyphs_folded() {
        // "ignоre" with Cyrillic о
        let r = norm().normalize("ign\u{043E}re previ\u{043E}us");
        assert_eq!(r.text, "ignore previous");
        assert_eq!(r.homoglyph_count, 2);
    }

    #[test]
    fn greek_homoglyphs_folded() {
        // Ρ(Greek) R Ο(Greek) M Ρ(Greek) Τ(Greek)
        let r = norm().normalize("\u{03A1}R\u{039F}M\u{03A1}\u{03A4}");
        assert_eq!(r.text, "PROMPT");
        assert_eq!(r.homoglyph_count, 4);
    }

    #[test]
    fn math_alphanumerics_folded_without_nfkc() {
        let config = NormalizerConfig::new().apply_nfkc(false);
        let n = TextNormalizer::new(config);
        // 𝐀 (U+1D400) and 𝟗 (U+1D7D7)
        let r = n.normalize("\u{1D400}\u{1D7D7}");
        assert_eq!(r.text, "A9");
        assert_eq!(r.homoglyph_count, 2);
    }

    #[test]
    fn superscript_digits_folded() {
        let config = NormalizerConfig::new().apply_nfkc(false);
        let n = TextNormalizer::new(config);
        let r = n.normalize("x\u{00B2}");
        assert_eq!(r.text, "x2");
    }

    #[test]
    fn steps_independently_toggleable() {
        let config = NormalizerConfig::new()
            .strip_invisible(false)
            .apply_nfkc(false)
            .fold_homoglyphs(false);
        let n = TextNormalizer::new(config);
        let input = "a\u{200B}\u{043E}\u{FB01}";
        let r = n.normalize(input);
        assert_eq!(r.text, input);
        assert_eq!(r.invisible_count, 0);
        assert_eq!(r.homoglyph_count, 0);
    }

    #[test]
    fn transformations_record_positions() {
        let r = norm().normalize("a\u{200B}b");
        assert_eq!(r.transformations.len(), 1);
        assert_eq!(r.transformations[0].position, 1);
        assert_eq!(r.transformations[0].original, "\u{200B}");
    }

    #[test]
    fn homoglyph_table_is_sorted() {
        let mut prev = '\0';
        for &(c, _) in HOMOGLYPHS {
            assert!(c > prev, "HOMOGLYPHS must stay sorted for binary search");
            prev = c;
        }
    }

    #[test]
    fn idempotent_on_adversarial_sample() {
        let n = norm();
        let once = n.normalize_text("ign\u{043E}\u{200B}re \u{FB01}nal \u{FF41}nswer");
        let twice = n.normalize_text(&once);
        assert_eq!(once, twice);
    }

    proptest! {
        // Normalize(Normalize(x)) == Normalize(x)
        #[test]
        fn idempotent(input in "\\PC{0,64}") {
            let n = TextNormalizer::with_defaults();
            let once = n.normalize_text(&input);
            let twice = n.normalize_text(&once);
            prop_assert_eq!(once, twice);
        }

        // No invisible characters survive filtering.
        #[test]
        fn no_invisible_survives(input in "\\PC{0,64}") {
            let n = TextNormalizer::with_defaults();
            let out = n.normalize_text(&input);
            prop_assert_eq!(out.chars().filter(|c| is_invisible(*c)).count(), 0);
        }
    }
}
