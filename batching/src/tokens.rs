//! Token estimation with a pluggable strategy.
//!
//! Budgets only need an upper bound, so estimators approximate from length
//! instead of running a tokenizer. The default over-counts for typical
//! English prose.

/// Trait for estimating token counts from text.
pub trait TokenEstimator: Send + Sync {
    /// Estimate the number of tokens in the given text.
    fn estimate(&self, text: &str) -> usize;
}

/// Byte-length based estimator (bytes / divisor, rounded up).
///
/// Counting bytes rather than chars charges multi-byte scripts more, which
/// keeps the estimate conservative for non-ASCII reviews.
#[derive(Debug, Clone)]
pub struct CharCountEstimator {
    pub bytes_per_token: f64,
}

impl Default for CharCountEstimator {
    fn default() -> Self {
        Self {
            bytes_per_token: 3.0,
        }
    }
}

impl TokenEstimator for CharCountEstimator {
    fn estimate(&self, text: &str) -> usize {
        (text.len() as f64 / self.bytes_per_token).ceil() as usize
    }
}
