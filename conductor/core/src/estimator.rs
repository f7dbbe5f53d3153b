//! Token Estimation
//!
//! Maps text to an estimated model token count. The conversation ledger only
//! ever talks to the [`TokenEstimator`] trait, so a precise tokenizer can be
//! dropped in later without touching any caller.

/// Estimates how many model tokens a piece of text will consume.
///
/// Implementations must be pure and monotonic in text length: appending text
/// never lowers the estimate.
pub trait TokenEstimator: Send + Sync {
    /// Estimate the token count of `text`
    fn estimate(&self, text: &str) -> usize;
}

/// Character-count heuristic: `ceil(chars / chars_per_token)`
///
/// The default ratio of one character per token overestimates heavily, which
/// keeps the budget on the safe side when no real tokenizer is available.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CharRatioEstimator {
    chars_per_token: usize,
}

impl CharRatioEstimator {
    /// Create an estimator with the given characters-per-token ratio
    ///
    /// A ratio of zero is treated as one.
    #[must_use]
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }

    /// Characters per token used by this estimator
    #[must_use]
    pub fn chars_per_token(&self) -> usize {
        self.chars_per_token
    }
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self::new(1)
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }
}
