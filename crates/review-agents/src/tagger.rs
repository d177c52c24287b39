//! Review tag generation.
//!
//! Reviews are tagged in budget-bounded batches. The batch call is the first
//! attempt; any review it leaves without three usable tags gets one isolated
//! strict regeneration, after which it is accepted or failed.

use std::collections::HashMap;
use std::sync::Arc;

use batching::chunker::pack_greedy;
use batching::records::TagRecord;
use batching::tags::{repair_tags, TagRepair, TagSet};
use batching::{CharCountEstimator, Review, TokenEstimator};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{CompletionRequest, InferenceBackend, ResponseFormat};
use crate::config::TagConfig;
use crate::contracts::{parse_response, SingleTagResponse, TagBatchResponse};
use crate::errors::{DigestError, Stage};
use crate::prompts;

/// What the backend sees for one review.
#[derive(Debug, Serialize)]
pub struct TagInput<'a> {
    pub review_uid: &'a str,
    pub project_id: &'a str,
    pub project_name: &'a str,
    pub rating: Option<f64>,
    pub created_on: Option<&'a str>,
    pub review_text: &'a str,
}

impl<'a> From<&'a Review> for TagInput<'a> {
    fn from(review: &'a Review) -> Self {
        Self {
            review_uid: &review.review_id,
            project_id: &review.project_id,
            project_name: &review.project_name,
            rating: review.rating,
            created_on: review.created_on.as_deref(),
            review_text: &review.text,
        }
    }
}

fn input_json<T: Serialize + ?Sized>(value: &T) -> Result<String, DigestError> {
    serde_json::to_string(value).map_err(|e| DigestError::Internal(e.into()))
}

/// Result of tagging one call batch.
#[derive(Debug, Default)]
pub struct TagBatchOutcome {
    pub accepted: Vec<TagRecord>,
    pub failed: Vec<String>,
    pub calls: u32,
    pub regenerated: usize,
}

pub struct TagGenerator {
    backend: Arc<dyn InferenceBackend>,
    config: TagConfig,
    estimator: CharCountEstimator,
    batch_format: ResponseFormat,
    single_format: ResponseFormat,
}

impl TagGenerator {
    pub fn new(backend: Arc<dyn InferenceBackend>, config: TagConfig) -> Self {
        Self {
            backend,
            config,
            estimator: CharCountEstimator::default(),
            batch_format: ResponseFormat::for_type::<TagBatchResponse>("review_tags"),
            single_format: ResponseFormat::for_type::<SingleTagResponse>("review_tags_single"),
        }
    }

    /// Split reviews into call batches bounded by token estimate and count.
    pub fn plan_batches<'a>(&self, reviews: Vec<&'a Review>) -> Vec<Vec<&'a Review>> {
        pack_greedy(
            reviews,
            self.config.batch_tokens,
            Some(self.config.batch_max_reviews),
            |review| {
                let payload = serde_json::to_string(&TagInput::from(*review)).unwrap_or_default();
                self.estimator.estimate(&payload)
            },
        )
    }

    fn batch_request(&self, reviews: &[&Review]) -> Result<CompletionRequest, DigestError> {
        let inputs: Vec<TagInput<'_>> = reviews.iter().map(|r| TagInput::from(*r)).collect();
        Ok(CompletionRequest {
            stage: Stage::TagBatch,
            system: prompts::TAG_SYSTEM.to_string(),
            user: prompts::tag_batch_user_prompt(&input_json(&inputs)?, reviews.len()),
            temperature: self.config.temperature,
            format: self.batch_format.clone(),
        })
    }

    fn single_request(&self, review: &Review) -> Result<CompletionRequest, DigestError> {
        let mut system = prompts::TAG_SYSTEM.to_string();
        system.push_str(&prompts::strict_tag_suffix(self.config.max_tag_len));
        Ok(CompletionRequest {
            stage: Stage::TagSingle,
            system,
            user: prompts::tag_single_user_prompt(&input_json(&TagInput::from(review))?),
            temperature: self.config.temperature,
            format: self.single_format.clone(),
        })
    }

    /// One strict, isolated call for a single review.
    async fn regenerate(&self, review: &Review) -> Result<TagSet, DigestError> {
        let raw = self.backend.complete(&self.single_request(review)?).await?;
        let response: SingleTagResponse = parse_response(Stage::TagSingle, &raw)?;
        match repair_tags(&response.tags, self.config.max_tag_len) {
            TagRepair::Accepted(set) => Ok(set),
            TagRepair::Incomplete { kept } => Err(DigestError::validation(
                Stage::TagSingle,
                format!("only {} usable tags after repair", kept.len()),
            )),
        }
    }

    /// Tag one call batch. Stops issuing calls once `cancel` fires; reviews
    /// not reached are reported as failed.
    pub async fn tag_batch(&self, reviews: &[&Review], cancel: &CancellationToken) -> TagBatchOutcome {
        let mut outcome = TagBatchOutcome::default();
        if reviews.is_empty() {
            return outcome;
        }

        let mut raw_tags: HashMap<String, Vec<String>> = HashMap::new();
        outcome.calls += 1;
        let batch_result = match self.batch_request(reviews) {
            Ok(request) => self.backend.complete(&request).await.map_err(DigestError::from),
            Err(e) => Err(e),
        };
        match batch_result.and_then(|raw| parse_response::<TagBatchResponse>(Stage::TagBatch, &raw)) {
            Ok(response) => {
                for item in response.items {
                    raw_tags.entry(item.review_uid).or_insert(item.tags);
                }
            }
            Err(e) if e.is_validation() => {
                warn!(reviews = reviews.len(), "Tag batch response unusable, regenerating each review: {e}");
            }
            Err(e) => {
                warn!(reviews = reviews.len(), "Tag batch call failed: {e}");
                outcome.failed = reviews.iter().map(|r| r.review_id.clone()).collect();
                return outcome;
            }
        }

        let mut pending: Vec<&Review> = Vec::new();
        for review in reviews {
            let repaired = raw_tags
                .get(&review.review_id)
                .map(|tags| repair_tags(tags, self.config.max_tag_len));
            match repaired {
                Some(TagRepair::Accepted(set)) => outcome.accepted.push(TagRecord::from_review(review, set)),
                Some(TagRepair::Incomplete { kept }) => {
                    debug!(review_uid = %review.review_id, kept = kept.len(), "Incomplete tag set");
                    pending.push(*review);
                }
                None => {
                    debug!(review_uid = %review.review_id, "Review missing from tag batch response");
                    pending.push(*review);
                }
            }
        }

        for (i, review) in pending.iter().enumerate() {
            if cancel.is_cancelled() {
                outcome.failed.extend(pending[i..].iter().map(|r| r.review_id.clone()));
                break;
            }
            outcome.calls += 1;
            outcome.regenerated += 1;
            match self.regenerate(review).await {
                Ok(set) => outcome.accepted.push(TagRecord::from_review(review, set)),
                Err(e) => {
                    warn!(review_uid = %review.review_id, "Strict tag regeneration failed: {e}");
                    outcome.failed.push(review.review_id.clone());
                }
            }
        }

        info!(
            reviews = reviews.len(),
            accepted = outcome.accepted.len(),
            regenerated = outcome.regenerated,
            failed = outcome.failed.len(),
            calls = outcome.calls,
            "Tagged batch"
        );
        outcome
    }
}
