//! Append-only chunk accumulator with a processed-text watermark.
//!
//! [`ChunkBuffer`] collects streamed output and hands back complete
//! sentences for validation as they form.  **Not** thread-safe — each
//! stream owns its buffer.

use std::sync::LazyLock;

use regex::Regex;

/// Default cap on unprocessed text before a force-extract.
pub const DEFAULT_MAX_UNPROCESSED: usize = 4096;

/// Sentence boundary: terminal punctuation followed by whitespace or the
/// end of the buffered text.
static SENTENCE_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+(\s|$)").expect("sentence boundary regex compiles"));

/// Heuristic for a tail that may be the front half of something sensitive:
/// a digit run (card/phone/account prefix), a partial e-mail, or a
/// capitalized name pair awaiting its surname.
static INCOMPLETE_SENSITIVE_TAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{3,}[-\s]?|\d{2,}[-/]|\w+@|[A-Z][a-z]+ [A-Z])$")
        .expect("sensitive tail regex compiles")
});

/// Whether `text` ends in something that could be the front half of
/// sensitive data — shared with the streaming PII detector.
#[must_use]
pub fn looks_incomplete_sensitive(text: &str) -> bool {
    INCOMPLETE_SENSITIVE_TAIL.is_match(text)
}

/// Accumulates chunks and extracts complete sentences past a watermark.
#[derive(Debug)]
pub struct ChunkBuffer {
    buffer: String,
    processed_up_to: usize,
    max_unprocessed: usize,
}

impl Default for ChunkBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkBuffer {
    /// Create a buffer with the default force-extract cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_unprocessed(DEFAULT_MAX_UNPROCESSED)
    }

    /// Create a buffer with a custom force-extract cap.
    #[must_use]
    pub fn with_max_unprocessed(max_unprocessed: usize) -> Self {
        Self {
            buffer: String::new(),
            processed_up_to: 0,
            max_unprocessed,
        }
    }

    /// Append a chunk.
    pub fn push(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
    }

    /// Everything accumulated so far, processed or not.
    #[must_use]
    pub fn accumulated(&self) -> &str {
        &self.buffer
    }

    /// The text past the watermark.
    #[must_use]
    pub fn unprocessed(&self) -> &str {
        &self.buffer[self.processed_up_to..]
    }

    /// Extract the next complete sentence past the watermark, advancing it.
    ///
    /// When the unprocessed text exceeds the cap without a boundary, the
    /// whole unprocessed slice is force-extracted so a boundary-free stream
    /// cannot grow the buffer without validation.
    pub fn try_extract_sentence(&mut self) -> Option<String> {
        let unprocessed = &self.buffer[self.processed_up_to..];
        if unprocessed.is_empty() {
            return None;
        }

        if let Some(m) = SENTENCE_BOUNDARY.find(unprocessed) {
            let end = m.end();
            let sentence = unprocessed[..end].to_string();
            self.processed_up_to += end;
            return Some(sentence);
        }

        if unprocessed.len() > self.max_unprocessed {
            let sentence = unprocessed.to_string();
            self.processed_up_to = self.buffer.len();
            return Some(sentence);
        }

        None
    }

    /// Whether the unprocessed tail looks like the beginning of sensitive
    /// data (more digits, the rest of an e-mail, a surname) that a later
    /// chunk could complete.
    #[must_use]
    pub fn may_contain_incomplete_sensitive(&self) -> bool {
        INCOMPLETE_SENSITIVE_TAIL.is_match(self.unprocessed())
    }

    /// Take everything past the watermark and mark it processed.
    pub fn flush(&mut self) -> String {
        let rest = self.buffer[self.processed_up_to..].to_string();
        self.processed_up_to = self.buffer.len();
        rest
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_complete_sentence() {
        let mut buf = ChunkBuffer::new();
        buf.push("Hello world. And more");
        assert_eq!(buf.try_extract_sentence().as_deref(), Some("Hello world. "));
        assert_eq!(buf.unprocessed(), "And more");
        assert!(buf.try_extract_sentence().is_none(), "no boundary yet");
    }

    #[test]
    fn boundary_at_end_of_buffer() {
        let mut buf = ChunkBuffer::new();
        buf.push("Question?");
        assert_eq!(buf.try_extract_sentence().as_deref(), Some("Question?"));
        assert!(buf.unprocessed().is_empty());
    }

    #[test]
    fn repeated_punctuation_is_one_boundary() {
        let mut buf = ChunkBuffer::new();
        buf.push("Wait?! Really");
        assert_eq!(buf.try_extract_sentence().as_deref(), Some("Wait?! "));
    }

    #[test]
    fn sentences_extract_across_pushes() {
        let mut buf = ChunkBuffer::new();
        buf.push("First part");
        assert!(buf.try_extract_sentence().is_none());
        buf.push(" done. Second");
        assert_eq!(
            buf.try_extract_sentence().as_deref(),
            Some("First part done. "),
        );
    }

    #[test]
    fn force_extract_past_cap() {
        let mut buf = ChunkBuffer::with_max_unprocessed(16);
        buf.push("a boundary-free stream of words that keeps going");
        let forced = buf.try_extract_sentence().unwrap();
        assert_eq!(forced, "a boundary-free stream of words that keeps going");
        assert!(buf.unprocessed().is_empty());
    }

    #[test]
    fn sensitive_tail_digit_run() {
        let mut buf = ChunkBuffer::new();
        buf.push("my card number is 4111");
        assert!(buf.may_contain_incomplete_sensitive());
    }

    #[test]
    fn sensitive_tail_partial_email() {
        let mut buf = ChunkBuffer::new();
        buf.push("write to user@");
        assert!(buf.may_contain_incomplete_sensitive());
    }

    #[test]
    fn sensitive_tail_name_pair() {
        let mut buf = ChunkBuffer::new();
        buf.push("signed, Jane D");
        assert!(buf.may_contain_incomplete_sensitive());
    }

    #[test]
    fn plain_tail_not_sensitive() {
        let mut buf = ChunkBuffer::new();
        buf.push("the weather is nice");
        assert!(!buf.may_contain_incomplete_sensitive());
    }

    #[test]
    fn flush_returns_remainder_once() {
        let mut buf = ChunkBuffer::new();
        buf.push("Done. trailing bits");
        let _ = buf.try_extract_sentence();
        assert_eq!(buf.flush(), "trailing bits");
        assert_eq!(buf.flush(), "");
        assert_eq!(buf.accumulated(), "Done. trailing bits");
    }
}
