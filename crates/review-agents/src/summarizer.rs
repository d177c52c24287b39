//! Chunk summarizer: one chunk of reviews in, one validated chunk summary out.

use std::sync::Arc;

use batching::records::ChunkSummaryRecord;
use batching::Chunk;
use tracing::info;

use crate::backend::{CompletionRequest, InferenceBackend, ResponseFormat};
use crate::contracts::{parse_response, ChunkSummaryResponse};
use crate::errors::{DigestError, Stage};
use crate::prompts;
use crate::retry::{run_with_strict_retry, AttemptOutcome, Strictness};

pub struct ChunkSummarizer {
    backend: Arc<dyn InferenceBackend>,
    temperature: f32,
    format: ResponseFormat,
}

impl ChunkSummarizer {
    pub fn new(backend: Arc<dyn InferenceBackend>, temperature: f32) -> Self {
        Self {
            backend,
            temperature,
            format: ResponseFormat::for_type::<ChunkSummaryResponse>("chunk_summary"),
        }
    }

    pub fn request(&self, chunk: &Chunk, strictness: Strictness) -> CompletionRequest {
        let mut system = prompts::CHUNK_SYSTEM.to_string();
        if strictness == Strictness::Strict {
            system.push_str(prompts::STRICT_JSON_SUFFIX);
        }
        CompletionRequest {
            stage: Stage::ChunkSummary,
            system,
            user: prompts::chunk_user_prompt(chunk),
            temperature: self.temperature,
            format: self.format.clone(),
        }
    }

    async fn attempt(&self, chunk: &Chunk, strictness: Strictness) -> Result<ChunkSummaryRecord, DigestError> {
        let raw = self.backend.complete(&self.request(chunk, strictness)).await?;
        let response: ChunkSummaryResponse = parse_response(Stage::ChunkSummary, &raw)?;
        let (chunk_summary, body) = response.validate()?;
        Ok(ChunkSummaryRecord {
            project_id: chunk.project_id.clone(),
            project_name: chunk.project_name.clone(),
            chunk_index: chunk.index,
            chunk_count: chunk.count,
            chunk_fingerprint: chunk.fingerprint(),
            token_estimate: chunk.token_estimate,
            review_count: chunk.entries.len(),
            chunk_summary,
            body,
        })
    }

    /// Summarize `chunk`, retrying once with strict instructions on a bad response.
    pub async fn summarize(&self, chunk: &Chunk) -> AttemptOutcome<ChunkSummaryRecord> {
        let key = chunk.checkpoint_key();
        let outcome = run_with_strict_retry(&key, |s| self.attempt(chunk, s)).await;
        if let AttemptOutcome::Accepted { attempts, .. } = &outcome {
            info!(
                project_id = %chunk.project_id,
                chunk = chunk.index,
                of = chunk.count,
                reviews = chunk.entries.len(),
                attempts,
                "Summarized chunk"
            );
        }
        outcome
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::errors::BackendError;
    use async_trait::async_trait;
    use batching::chunker::ChunkEntry;
    use mockall::mock;

    mock! {
        pub Backend {}

        #[async_trait]
        impl InferenceBackend for Backend {
            async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError>;
        }
    }

    pub(crate) fn chunk_summary_json() -> String {
        serde_json::json!({
            "chunk_summary": "Residents enjoy the quiet and the green spaces.",
            "top_highlights": ["Green spaces", "Quiet streets"],
            "watchouts_or_gaps": ["Limited parking"],
            "best_for": ["Families"],
            "not_ideal_for": ["Nightlife seekers"],
            "evidence_notes": ["Several reviews mention the park"],
        })
        .to_string()
    }

    fn chunk() -> Chunk {
        Chunk {
            project_id: "p1".into(),
            project_name: "Green Acres".into(),
            index: 1,
            count: 1,
            entries: vec![ChunkEntry {
                review_id: "r1".into(),
                snippet: "- Quiet and green".into(),
                tokens: 6,
                truncated: false,
            }],
            token_estimate: 6,
        }
    }

    #[tokio::test]
    async fn test_valid_response_accepted_first_try() {
        let mut backend = MockBackend::new();
        backend
            .expect_complete()
            .times(1)
            .returning(|_| Ok(chunk_summary_json()));

        let summarizer = ChunkSummarizer::new(Arc::new(backend), 0.2);
        let outcome = summarizer.summarize(&chunk()).await;
        assert_eq!(outcome.attempts(), 1);
        let record = outcome.ok().unwrap();
        assert_eq!(record.project_id, "p1");
        assert_eq!(record.chunk_index, 1);
        assert_eq!(record.review_count, 1);
        assert_eq!(record.body.top_highlights.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_then_strict_success() {
        let mut backend = MockBackend::new();
        let mut seq = mockall::Sequence::new();
        backend
            .expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req| !req.system.contains("STRICT"))
            .returning(|_| Ok("I cannot help with that".into()));
        backend
            .expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req| req.system.contains("STRICT"))
            .returning(|_| Ok(chunk_summary_json()));

        let summarizer = ChunkSummarizer::new(Arc::new(backend), 0.2);
        let outcome = summarizer.summarize(&chunk()).await;
        assert_eq!(outcome.attempts(), 2);
        assert!(outcome.ok().is_some());
    }

    #[tokio::test]
    async fn test_two_invalid_responses_fail() {
        let mut backend = MockBackend::new();
        backend
            .expect_complete()
            .times(2)
            .returning(|_| Ok(r#"{"chunk_summary": ""}"#.into()));

        let summarizer = ChunkSummarizer::new(Arc::new(backend), 0.2);
        let outcome = summarizer.summarize(&chunk()).await;
        assert!(matches!(outcome, AttemptOutcome::Failed { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_transport_failure_fails_without_strict_retry() {
        let mut backend = MockBackend::new();
        backend
            .expect_complete()
            .times(1)
            .returning(|_| Err(BackendError::Status { status: 401, body: "no".into() }));

        let summarizer = ChunkSummarizer::new(Arc::new(backend), 0.2);
        let outcome = summarizer.summarize(&chunk()).await;
        assert!(matches!(outcome, AttemptOutcome::Failed { attempts: 1, .. }));
    }
}
