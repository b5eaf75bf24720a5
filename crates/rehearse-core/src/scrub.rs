//! Transcript scrubbing.
//!
//! Submitted answer text can contain names, contact details, and other
//! personal information. It MUST be scrubbed before it is persisted anywhere
//! (the job payload copy included), so the scrubber runs in the handler
//! before enqueue, not in the worker.

use regex::Regex;

/// Masks personally identifying content in raw answer text.
pub trait TranscriptScrubber: Send + Sync {
    /// Returns a copy of `text` with sensitive spans replaced.
    fn scrub(&self, text: &str) -> String;
}

/// Pattern-based scrubber covering the common leak shapes: email addresses,
/// phone numbers, and SSN-formatted digits.
///
/// This is intentionally conservative masking for storage hygiene, not a
/// compliance-grade PII pipeline; deployments with stricter requirements
/// plug their own implementation into the trait.
#[derive(Debug)]
pub struct RegexScrubber {
    email: Regex,
    phone: Regex,
    ssn: Regex,
}

impl RegexScrubber {
    /// Creates the scrubber with its built-in patterns.
    ///
    /// # Panics
    ///
    /// Never panics in practice; the patterns are compile-time constants
    /// validated by tests.
    #[must_use]
    #[allow(clippy::missing_panics_doc)]
    pub fn new() -> Self {
        Self {
            email: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
                .unwrap_or_else(|e| unreachable!("email pattern: {e}")),
            phone: Regex::new(r"\+?\d[\d\s().-]{8,}\d")
                .unwrap_or_else(|e| unreachable!("phone pattern: {e}")),
            ssn: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b")
                .unwrap_or_else(|e| unreachable!("ssn pattern: {e}")),
        }
    }
}

impl Default for RegexScrubber {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptScrubber for RegexScrubber {
    fn scrub(&self, text: &str) -> String {
        // SSN before phone: the phone pattern would otherwise match the
        // digits first with a wider span.
        let text = self.ssn.replace_all(text, "[REDACTED]");
        let text = self.email.replace_all(&text, "[REDACTED]");
        self.phone.replace_all(&text, "[REDACTED]").into_owned()
    }
}

/// Scrubber that passes text through unchanged, for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughScrubber;

impl TranscriptScrubber for PassthroughScrubber {
    fn scrub(&self, text: &str) -> String {
        text.to_string()
    }
}
