//! Failure classification for paid submissions.
//!
//! A failed submission is either worth retrying as-is, a nonce conflict that
//! needs a long wait and a fresh nonce, or fatal. Nonce conflicts are detected
//! from the error text through a pluggable [`NonceConflictMatcher`], since the
//! wording is chain specific.

use std::fmt;
use std::sync::Arc;

/// Outcome of classifying a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClassification {
    /// Wait and resubmit
    Retryable,
    /// Wait for the pending transaction to clear, then sign with a fresh nonce
    NonceConflict,
    /// Retrying cannot help
    Fatal,
}

impl ErrorClassification {
    /// Whether another attempt may succeed.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorClassification::Fatal)
    }
}

impl fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClassification::Retryable => f.write_str("retryable"),
            ErrorClassification::NonceConflict => f.write_str("nonce-conflict"),
            ErrorClassification::Fatal => f.write_str("fatal"),
        }
    }
}

/// HTTP statuses that are always retried.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Server error codes that are always retried.
pub const RETRYABLE_CODES: [&str; 4] = [
    "NETWORK_ERROR",
    "FACILITATOR_UNAVAILABLE",
    "FACILITATOR_ERROR",
    "UNKNOWN_ERROR",
];

/// Error-text fragments that mark a transient failure.
pub const TRANSIENT_PHRASES: [&str; 6] = [
    "429",
    "rate limit",
    "too many requests",
    "timeout",
    "temporarily",
    "try again",
];

/// Error-text fragments that mark an account-sequence conflict.
pub const DEFAULT_NONCE_CONFLICT_PHRASES: [&str; 8] = [
    "conflictingnonceinmempool",
    "conflicting nonce in mempool",
    "conflicting nonce",
    "nonce already used",
    "nonce too low",
    "badnonce",
    "already pending",
    "sequence number too low",
];

/// Decides whether an error text describes a nonce conflict.
pub trait NonceConflictMatcher: Send + Sync + fmt::Debug {
    /// Returns `true` when `text` reports an account-sequence conflict.
    fn is_nonce_conflict(&self, text: &str) -> bool;
}

/// Case-insensitive substring matcher over a phrase list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VocabularyMatcher {
    phrases: Vec<String>,
}

impl VocabularyMatcher {
    /// Creates a matcher for the given phrases.
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            phrases: phrases.into_iter().map(|p| p.as_ref().to_lowercase()).collect(),
        }
    }

    /// Adds one more phrase.
    pub fn with_phrase(mut self, phrase: impl AsRef<str>) -> Self {
        self.phrases.push(phrase.as_ref().to_lowercase());
        self
    }
}

impl Default for VocabularyMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_NONCE_CONFLICT_PHRASES)
    }
}

impl NonceConflictMatcher for VocabularyMatcher {
    fn is_nonce_conflict(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.phrases.iter().any(|phrase| text.contains(phrase.as_str()))
    }
}

/// Classifies failed attempts by status, server code and error text.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    nonce_matcher: Arc<dyn NonceConflictMatcher>,
}

impl ErrorClassifier {
    /// Creates a classifier using the given nonce-conflict matcher.
    pub fn new(nonce_matcher: Arc<dyn NonceConflictMatcher>) -> Self {
        Self { nonce_matcher }
    }

    /// Classifies one failure.
    ///
    /// Rules are applied in order: nonce-conflict text, retryable status,
    /// retryable server code, transient text, and otherwise fatal.
    ///
    /// # Examples
    ///
    /// ```
    /// use x402_envelope::classify::{ErrorClassification, ErrorClassifier};
    ///
    /// let classifier = ErrorClassifier::default();
    /// assert_eq!(
    ///     classifier.classify(500, None, Some("ConflictingNonceInMempool")),
    ///     ErrorClassification::NonceConflict
    /// );
    /// assert_eq!(classifier.classify(503, None, None), ErrorClassification::Retryable);
    /// assert_eq!(classifier.classify(400, None, Some("bad name")), ErrorClassification::Fatal);
    /// ```
    pub fn classify(&self, status: u16, code: Option<&str>, message: Option<&str>) -> ErrorClassification {
        if let Some(text) = message {
            if self.nonce_matcher.is_nonce_conflict(text) {
                return ErrorClassification::NonceConflict;
            }
        }

        if RETRYABLE_STATUSES.contains(&status) {
            return ErrorClassification::Retryable;
        }

        if let Some(code) = code {
            if RETRYABLE_CODES.iter().any(|c| c.eq_ignore_ascii_case(code)) {
                return ErrorClassification::Retryable;
            }
        }

        if let Some(text) = message {
            let text = text.to_lowercase();
            if TRANSIENT_PHRASES.iter().any(|phrase| text.contains(phrase)) {
                return ErrorClassification::Retryable;
            }
        }

        ErrorClassification::Fatal
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(Arc::new(VocabularyMatcher::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        let classifier = ErrorClassifier::default();
        for status in RETRYABLE_STATUSES {
            assert_eq!(classifier.classify(status, None, None), ErrorClassification::Retryable);
            assert_eq!(
                classifier.classify(status, Some("SETTLEMENT_FAILED"), Some("upstream went away")),
                ErrorClassification::Retryable
            );
        }
    }

    #[test]
    fn test_nonce_conflict_wins_over_status() {
        let classifier = ErrorClassifier::default();
        let texts = [
            "conflicting nonce in mempool",
            "Conflicting Nonce",
            "NONCE ALREADY USED",
            "transaction rejected: nonce too low",
        ];
        for text in texts {
            for status in [400, 402, 429, 500, 503] {
                assert_eq!(
                    classifier.classify(status, Some("NETWORK_ERROR"), Some(text)),
                    ErrorClassification::NonceConflict,
                    "{status} {text}"
                );
            }
        }
    }

    #[test]
    fn test_retryable_codes() {
        let classifier = ErrorClassifier::default();
        for code in RETRYABLE_CODES {
            assert_eq!(classifier.classify(400, Some(code), None), ErrorClassification::Retryable);
        }
        assert_eq!(
            classifier.classify(402, Some("INSUFFICIENT_FUNDS"), None),
            ErrorClassification::Fatal
        );
    }

    #[test]
    fn test_transient_text() {
        let classifier = ErrorClassifier::default();
        for text in ["Rate limit exceeded", "upstream timeout", "Service temporarily down", "please try again"] {
            assert_eq!(classifier.classify(400, None, Some(text)), ErrorClassification::Retryable);
        }
        assert_eq!(
            classifier.classify(400, None, Some("name already registered")),
            ErrorClassification::Fatal
        );
        assert_eq!(classifier.classify(403, None, None), ErrorClassification::Fatal);
    }

    #[test]
    fn test_custom_matcher() {
        let matcher = VocabularyMatcher::new(["sequence mismatch"]).with_phrase("Stale Account Nonce");
        let classifier = ErrorClassifier::new(Arc::new(matcher));

        assert_eq!(
            classifier.classify(400, None, Some("stale account nonce for SP1")),
            ErrorClassification::NonceConflict
        );
        // Default vocabulary is replaced, not extended.
        assert_eq!(
            classifier.classify(400, None, Some("nonce too low")),
            ErrorClassification::Fatal
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(ErrorClassification::Retryable.is_retryable());
        assert!(ErrorClassification::NonceConflict.is_retryable());
        assert!(!ErrorClassification::Fatal.is_retryable());
    }
}
