//! Retryability classification over a child's captured stderr (spec.md
//! §4.6, §7 "Transient"). Grounded on `telemetry::redact`'s
//! `Lazy<Vec<Regex>>` static-pattern-list shape.

use once_cell::sync::Lazy;
use regex::RegexSet;

/// The default substrings/patterns that mark an error retryable: rate
/// limiting, timeouts, overload, and the HTTP statuses that usually mean
/// the same thing.
static DEFAULT_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)rate limit",
        r"(?i)timeout",
        r"(?i)overloaded",
        r"\b503\b",
        r"\b529\b",
        r"\b429\b",
    ])
    .expect("regex: retry classifier patterns")
});

/// Classifies captured stderr as retryable or not. A trait so a provider
/// can supply its own without changing call sites (SPEC_FULL.md §11).
pub trait RetryClassifier: Send + Sync {
    fn is_retryable(&self, stderr: &str) -> bool;
}

/// The stderr-substring heuristic named in spec.md §4.6.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRetryClassifier;

impl RetryClassifier for DefaultRetryClassifier {
    fn is_retryable(&self, stderr: &str) -> bool {
        DEFAULT_PATTERNS.is_match(stderr)
    }
}
