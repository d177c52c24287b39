//! Token-bounded chunking of a project's reviews.
//!
//! Greedy packing in input order: a chunk closes as soon as the next review
//! would push it over budget. A review that is over budget on its own is
//! truncated and placed alone, never dropped.

use serde::{Deserialize, Serialize};

use crate::review::Review;
use crate::tokens::TokenEstimator;

/// Appended to any text cut short by [`truncate_chars`].
pub const ELLIPSIS: char = '…';

/// Packing limits for summary chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPolicy {
    /// Estimated token budget per chunk.
    pub max_tokens: usize,
    /// Character cap applied to a review that exceeds the budget by itself.
    pub max_review_chars: usize,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            max_tokens: 12_000,
            max_review_chars: 1_200,
        }
    }
}

impl ChunkPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_tokens == 0 {
            return Err("max_tokens must be greater than 0".into());
        }
        if self.max_review_chars == 0 {
            return Err("max_review_chars must be greater than 0".into());
        }
        Ok(())
    }
}

/// One review as it appears inside a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub review_id: String,
    /// Rendered snippet line sent to the backend.
    pub snippet: String,
    pub tokens: usize,
    pub truncated: bool,
}

/// A contiguous, budget-bounded slice of one project's reviews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub project_id: String,
    pub project_name: String,
    /// 1-based position within the project.
    pub index: usize,
    /// Number of chunks the project was split into.
    pub count: usize,
    pub entries: Vec<ChunkEntry>,
    pub token_estimate: usize,
}

impl Chunk {
    /// Snippets joined one per line, in input order.
    pub fn text(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.snippet.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Short hash over member review ids. Changes whenever the partition does.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for entry in &self.entries {
            hasher.update(entry.review_id.as_bytes());
            hasher.update(b"\n");
        }
        hasher.finalize().to_hex()[..16].to_string()
    }

    /// Checkpoint key of this chunk's summary.
    pub fn checkpoint_key(&self) -> String {
        chunk_key(&self.project_id, self.index, &self.fingerprint())
    }
}

/// `{project_id}#{index}#{fingerprint}`.
pub fn chunk_key(project_id: &str, index: usize, fingerprint: &str) -> String {
    format!("{project_id}#{index}#{fingerprint}")
}

/// Cut `text` to at most `max_chars` characters, trimming trailing whitespace
/// and appending [`ELLIPSIS`]. Text already within the cap is returned as is.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.truncate(cut.trim_end().len());
    cut.push(ELLIPSIS);
    cut
}

/// `- (Rating: 4) text`, or `- text` without a rating.
pub fn render_snippet(review: &Review, text: &str) -> String {
    match review.rating_label() {
        Some(rating) => format!("- (Rating: {rating}) {text}"),
        None => format!("- {text}"),
    }
}

fn entry_for(review: &Review, policy: &ChunkPolicy, estimator: &dyn TokenEstimator) -> ChunkEntry {
    let snippet = render_snippet(review, &review.text);
    let tokens = estimator.estimate(&snippet);
    if tokens <= policy.max_tokens {
        return ChunkEntry {
            review_id: review.review_id.clone(),
            snippet,
            tokens,
            truncated: false,
        };
    }

    let snippet = render_snippet(review, &truncate_chars(&review.text, policy.max_review_chars));
    ChunkEntry {
        review_id: review.review_id.clone(),
        tokens: estimator.estimate(&snippet),
        snippet,
        truncated: true,
    }
}

/// Greedy packing shared by chunking and tag batching.
///
/// Items are kept in order. A group closes when adding the next item would
/// exceed `max_tokens` or when it already holds `max_items`. An item costing
/// more than `max_tokens` still gets a group of its own.
pub fn pack_greedy<T>(
    items: impl IntoIterator<Item = T>,
    max_tokens: usize,
    max_items: Option<usize>,
    cost: impl Fn(&T) -> usize,
) -> Vec<Vec<T>> {
    let mut groups = Vec::new();
    let mut current: Vec<T> = Vec::new();
    let mut current_tokens = 0usize;

    for item in items {
        let t = cost(&item);
        let over_budget = current_tokens + t > max_tokens;
        let full = max_items.is_some_and(|max| current.len() >= max);
        if !current.is_empty() && (over_budget || full) {
            groups.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current_tokens += t;
        current.push(item);
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Split one project's reviews into chunks.
///
/// `reviews` must all belong to the same project and be in input order.
/// Returns no chunks for an empty slice.
pub fn chunk_project(
    reviews: &[&Review],
    policy: &ChunkPolicy,
    estimator: &dyn TokenEstimator,
) -> Vec<Chunk> {
    let Some(first) = reviews.first() else {
        return Vec::new();
    };

    let entries = reviews.iter().map(|r| entry_for(r, policy, estimator));
    let groups = pack_greedy(entries, policy.max_tokens, None, |e| e.tokens);
    let count = groups.len();

    groups
        .into_iter()
        .enumerate()
        .map(|(i, entries)| Chunk {
            project_id: first.project_id.clone(),
            project_name: first.project_name.clone(),
            index: i + 1,
            count,
            token_estimate: entries.iter().map(|e| e.tokens).sum(),
            entries,
        })
        .collect()
}
