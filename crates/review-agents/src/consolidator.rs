//! Merge a project's chunk summaries into one project summary.

use std::sync::Arc;

use batching::records::{ChunkSummaryRecord, ProjectSummaryRecord};
use tracing::info;

use crate::backend::{CompletionRequest, InferenceBackend, ResponseFormat};
use crate::contracts::{cap_headline, parse_response, ProjectSummaryResponse, ValidProjectSummary};
use crate::errors::{DigestError, Stage};
use crate::prompts;
use crate::retry::{run_with_strict_retry, AttemptOutcome, Strictness};

/// Identity of the project being consolidated. Always taken from the input,
/// never from what the backend echoes back.
#[derive(Debug, Clone)]
pub struct ProjectRef<'a> {
    pub project_id: &'a str,
    pub project_name: &'a str,
    pub review_count: usize,
}

pub struct Consolidator {
    backend: Arc<dyn InferenceBackend>,
    temperature: f32,
    single_chunk_passthrough: bool,
    format: ResponseFormat,
}

/// First sentence of `text`, or all of it.
fn first_sentence(text: &str) -> &str {
    text.find(|c| matches!(c, '.' | '!' | '?'))
        .map(|end| &text[..=end])
        .unwrap_or(text)
}

impl Consolidator {
    pub fn new(backend: Arc<dyn InferenceBackend>, temperature: f32, single_chunk_passthrough: bool) -> Self {
        Self {
            backend,
            temperature,
            single_chunk_passthrough,
            format: ResponseFormat::for_type::<ProjectSummaryResponse>("project_summary"),
        }
    }

    pub fn request(&self, project: &ProjectRef<'_>, chunks: &[ChunkSummaryRecord], strictness: Strictness) -> CompletionRequest {
        let mut system = prompts::PROJECT_SYSTEM.to_string();
        if strictness == Strictness::Strict {
            system.push_str(prompts::STRICT_JSON_SUFFIX);
        }
        CompletionRequest {
            stage: Stage::ProjectSummary,
            system,
            user: prompts::project_user_prompt(project.project_id, project.project_name, chunks),
            temperature: self.temperature,
            format: self.format.clone(),
        }
    }

    fn record(&self, project: &ProjectRef<'_>, chunk_count: usize, valid: ValidProjectSummary) -> ProjectSummaryRecord {
        ProjectSummaryRecord {
            project_id: project.project_id.to_string(),
            project_name: project.project_name.to_string(),
            headline: valid.headline,
            overall_summary: valid.overall_summary,
            body: valid.body,
            review_count: project.review_count,
            chunk_count,
            generated_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    /// Reshape a lone chunk summary without a backend call.
    fn passthrough(&self, project: &ProjectRef<'_>, chunk: &ChunkSummaryRecord) -> ProjectSummaryRecord {
        let valid = ValidProjectSummary {
            headline: cap_headline(first_sentence(&chunk.chunk_summary)),
            overall_summary: chunk.chunk_summary.clone(),
            body: chunk.body.clone(),
        };
        self.record(project, 1, valid)
    }

    async fn attempt(
        &self,
        project: &ProjectRef<'_>,
        chunks: &[ChunkSummaryRecord],
        strictness: Strictness,
    ) -> Result<ProjectSummaryRecord, DigestError> {
        let raw = self.backend.complete(&self.request(project, chunks, strictness)).await?;
        let response: ProjectSummaryResponse = parse_response(Stage::ProjectSummary, &raw)?;
        Ok(self.record(project, chunks.len(), response.validate()?))
    }

    /// Consolidate `chunks`, which must be the complete ordered set for the project.
    pub async fn consolidate(
        &self,
        project: &ProjectRef<'_>,
        chunks: &[ChunkSummaryRecord],
    ) -> AttemptOutcome<ProjectSummaryRecord> {
        if let ([only], true) = (chunks, self.single_chunk_passthrough) {
            info!(project_id = %project.project_id, "Single chunk, passing summary through");
            return AttemptOutcome::Accepted {
                value: self.passthrough(project, only),
                attempts: 0,
            };
        }

        let outcome = run_with_strict_retry(project.project_id, |s| self.attempt(project, chunks, s)).await;
        if let AttemptOutcome::Accepted { attempts, .. } = &outcome {
            info!(
                project_id = %project.project_id,
                chunks = chunks.len(),
                attempts,
                "Consolidated project summary"
            );
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summarizer::tests::MockBackend;
    use batching::records::SummaryBody;

    fn chunk_record(index: usize, summary: &str) -> ChunkSummaryRecord {
        ChunkSummaryRecord {
            project_id: "p1".into(),
            project_name: "Green Acres".into(),
            chunk_index: index,
            chunk_count: 2,
            chunk_fingerprint: format!("f{index}"),
            token_estimate: 100,
            review_count: 10,
            chunk_summary: summary.into(),
            body: SummaryBody {
                top_highlights: vec!["Parks".into()],
                evidence_notes: vec!["Mentions of parks".into()],
                ..Default::default()
            },
        }
    }

    fn project() -> ProjectRef<'static> {
        ProjectRef {
            project_id: "p1",
            project_name: "Green Acres",
            review_count: 20,
        }
    }

    fn project_json() -> String {
        serde_json::json!({
            "project_id": "wrong-id",
            "headline": "Leafy and calm",
            "overall_summary": "Reviewers consistently praise the parks.",
            "top_highlights": ["Parks"],
            "watchouts_or_gaps": ["Parking"],
            "best_for": ["Families"],
            "not_ideal_for": ["Commuters"],
            "evidence_notes": ["Parks come up often"],
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_consolidate_uses_input_identity() {
        let mut backend = MockBackend::new();
        backend
            .expect_complete()
            .times(1)
            .withf(|req| req.user.contains("PART 1:") && req.user.contains("PART 2:"))
            .returning(|_| Ok(project_json()));

        let consolidator = Consolidator::new(Arc::new(backend), 0.2, false);
        let chunks = vec![chunk_record(1, "First."), chunk_record(2, "Second.")];
        let record = consolidator.consolidate(&project(), &chunks).await.ok().unwrap();
        assert_eq!(record.project_id, "p1");
        assert_eq!(record.chunk_count, 2);
        assert_eq!(record.review_count, 20);
        assert!(record.generated_at.is_some());
    }

    #[tokio::test]
    async fn test_single_chunk_passthrough_skips_backend() {
        let backend = MockBackend::new();
        let consolidator = Consolidator::new(Arc::new(backend), 0.2, true);
        let chunks = vec![chunk_record(1, "Quiet and leafy. Parking is tight.")];
        let outcome = consolidator.consolidate(&project(), &chunks).await;
        assert_eq!(outcome.attempts(), 0);
        let record = outcome.ok().unwrap();
        assert_eq!(record.headline, "Quiet and leafy.");
        assert_eq!(record.overall_summary, "Quiet and leafy. Parking is tight.");
    }

    #[tokio::test]
    async fn test_single_chunk_without_passthrough_calls_backend() {
        let mut backend = MockBackend::new();
        backend.expect_complete().times(1).returning(|_| Ok(project_json()));
        let consolidator = Consolidator::new(Arc::new(backend), 0.2, false);
        let outcome = consolidator.consolidate(&project(), &[chunk_record(1, "Only.")]).await;
        assert_eq!(outcome.attempts(), 1);
    }

    #[test]
    fn test_first_sentence() {
        assert_eq!(first_sentence("One. Two."), "One.");
        assert_eq!(first_sentence("No stop"), "No stop");
    }
}
