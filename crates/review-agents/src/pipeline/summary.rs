//! Project summaries: chunk → summarize each chunk → consolidate.
//!
//! Keys are project ids. Chunk summaries are checkpointed on their own log,
//! so a project interrupted halfway only re-summarizes the chunks it lacks.

use std::sync::Arc;

use async_trait::async_trait;
use batching::chunker::chunk_project;
use batching::records::{ChunkSummaryRecord, ProjectSummaryRecord};
use batching::{CharCountEstimator, CheckpointStore, ChunkPolicy, LoadedTable, OutputLayout, Review};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{PassOutcome, Pipeline};
use crate::backend::InferenceBackend;
use crate::config::SummaryConfig;
use crate::consolidator::{Consolidator, ProjectRef};
use crate::errors::DigestError;
use crate::retry::AttemptOutcome;
use crate::summarizer::ChunkSummarizer;

/// Which projects this run may touch.
#[derive(Debug, Clone, Default)]
pub struct SummaryOptions {
    pub only_project_id: Option<String>,
    pub limit_projects: Option<usize>,
}

/// Project ids ordered by review count, largest first; ties keep first appearance.
pub fn summary_candidates(table: &LoadedTable, options: &SummaryOptions) -> Vec<String> {
    let mut groups: Vec<_> = table
        .projects()
        .iter()
        .filter(|g| options.only_project_id.as_deref().map_or(true, |id| g.project_id == id))
        .collect();
    groups.sort_by_key(|g| std::cmp::Reverse(g.members.len()));
    let mut keys: Vec<String> = groups.into_iter().map(|g| g.project_id.clone()).collect();
    if let Some(limit) = options.limit_projects {
        keys.truncate(limit);
    }
    keys
}

#[derive(Debug, Default)]
struct ProjectProgress {
    appended: usize,
    complete: bool,
}

pub struct SummaryPipeline {
    table: Arc<LoadedTable>,
    policy: ChunkPolicy,
    max_reviews_per_project: usize,
    estimator: CharCountEstimator,
    summarizer: ChunkSummarizer,
    consolidator: Consolidator,
    chunks: CheckpointStore<ChunkSummaryRecord>,
    summaries: CheckpointStore<ProjectSummaryRecord>,
    candidates: Vec<String>,
}

impl SummaryPipeline {
    /// Open both summary logs under `layout` and resolve the candidate keys.
    pub fn open(
        table: Arc<LoadedTable>,
        backend: Arc<dyn InferenceBackend>,
        config: &SummaryConfig,
        layout: &OutputLayout,
        options: &SummaryOptions,
    ) -> Result<Self, DigestError> {
        let chunks = CheckpointStore::open(layout.chunk_summaries())?;
        let summaries = CheckpointStore::open(layout.project_summaries())?;
        let candidates = summary_candidates(&table, options);
        Ok(Self {
            policy: config.chunk_policy(),
            max_reviews_per_project: config.max_reviews_per_project,
            estimator: CharCountEstimator::default(),
            summarizer: ChunkSummarizer::new(Arc::clone(&backend), config.temperature),
            consolidator: Consolidator::new(backend, config.temperature, config.single_chunk_passthrough),
            table,
            chunks,
            summaries,
            candidates,
        })
    }

    pub fn summaries(&self) -> &CheckpointStore<ProjectSummaryRecord> {
        &self.summaries
    }

    pub fn chunk_summaries(&self) -> &CheckpointStore<ChunkSummaryRecord> {
        &self.chunks
    }

    async fn summarize_project(&mut self, project_id: &str, cancel: &CancellationToken) -> Result<ProjectProgress, DigestError> {
        let mut progress = ProjectProgress::default();
        let Some(group) = self.table.project(project_id) else {
            warn!(project_id, "Project not found in input");
            return Ok(progress);
        };
        let reviews: Vec<&Review> = self
            .table
            .members(group)
            .take(self.max_reviews_per_project)
            .collect();
        let chunks = chunk_project(&reviews, &self.policy, &self.estimator);
        if chunks.is_empty() {
            return Ok(progress);
        }

        let mut records = Vec::with_capacity(chunks.len());
        let mut missing = 0usize;
        for chunk in &chunks {
            if let Some(existing) = self.chunks.get(&chunk.checkpoint_key()) {
                records.push(existing.clone());
                continue;
            }
            if cancel.is_cancelled() {
                return Ok(progress);
            }
            match self.summarizer.summarize(chunk).await {
                AttemptOutcome::Accepted { value, .. } => {
                    if self.chunks.append_if_absent(value.clone())? {
                        progress.appended += 1;
                    }
                    records.push(value);
                }
                AttemptOutcome::Failed { .. } => missing += 1,
            }
        }

        if missing > 0 {
            warn!(project_id, missing, chunks = chunks.len(), "Project left without a summary: chunks failed");
            return Ok(progress);
        }
        if cancel.is_cancelled() {
            return Ok(progress);
        }

        let project = ProjectRef {
            project_id: &group.project_id,
            project_name: &group.project_name,
            review_count: reviews.len(),
        };
        if let AttemptOutcome::Accepted { value, .. } = self.consolidator.consolidate(&project, &records).await {
            if self.summaries.append_if_absent(value)? {
                progress.appended += 1;
            }
            progress.complete = true;
        }
        Ok(progress)
    }
}

#[async_trait]
impl Pipeline for SummaryPipeline {
    fn name(&self) -> &'static str {
        "summaries"
    }

    fn candidate_keys(&self) -> &[String] {
        &self.candidates
    }

    fn is_done(&self, key: &str) -> bool {
        self.summaries.contains(key)
    }

    fn record_count(&self) -> usize {
        self.summaries.len() + self.chunks.len()
    }

    async fn execute(&mut self, batch: &[String], cancel: &CancellationToken) -> Result<PassOutcome, DigestError> {
        let mut outcome = PassOutcome::default();
        for project_id in batch {
            if cancel.is_cancelled() {
                break;
            }
            let progress = self.summarize_project(project_id, cancel).await?;
            outcome.appended += progress.appended;
            if !progress.complete && !cancel.is_cancelled() {
                outcome.failed.push(project_id.clone());
            }
        }
        info!(
            projects = batch.len(),
            appended = outcome.appended,
            failed = outcome.failed.len(),
            "Summary pass finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batching::loader::LoadReport;
    use batching::KeyOrigin;

    fn sample_review(project_id: &str, text: &str, row: usize) -> Review {
        Review {
            review_id: format!("{project_id}-{row}"),
            key_origin: KeyOrigin::Natural,
            project_id: project_id.into(),
            project_name: format!("Project {project_id}"),
            text: text.into(),
            rating: None,
            user_id: None,
            created_on: None,
            reviewer_name: None,
            source: None,
            row,
        }
    }

    fn table(projects: &[(&str, usize)]) -> LoadedTable {
        let mut reviews = Vec::new();
        for (pid, n) in projects {
            for _ in 0..*n {
                let row = reviews.len();
                reviews.push(sample_review(pid, "Nice place", row));
            }
        }
        LoadedTable::from_reviews(reviews, LoadReport::default())
    }

    #[test]
    fn test_candidates_sorted_by_review_count() {
        let t = table(&[("small", 1), ("big", 3), ("mid", 2), ("also_mid", 2)]);
        let keys = summary_candidates(&t, &SummaryOptions::default());
        assert_eq!(keys, vec!["big", "mid", "also_mid", "small"]);
    }

    #[test]
    fn test_candidates_respect_filters() {
        let t = table(&[("a", 1), ("b", 3), ("c", 2)]);
        let limited = summary_candidates(
            &t,
            &SummaryOptions {
                limit_projects: Some(2),
                ..Default::default()
            },
        );
        assert_eq!(limited, vec!["b", "c"]);

        let only = summary_candidates(
            &t,
            &SummaryOptions {
                only_project_id: Some("a".into()),
                ..Default::default()
            },
        );
        assert_eq!(only, vec!["a"]);
    }
}
