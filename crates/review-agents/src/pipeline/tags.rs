//! Review tags. Keys are review uids.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use batching::records::TagRecord;
use batching::{CheckpointStore, LoadedTable, OutputLayout, Review};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{PassOutcome, Pipeline};
use crate::backend::InferenceBackend;
use crate::config::TagConfig;
use crate::errors::DigestError;
use crate::tagger::TagGenerator;

#[derive(Debug, Clone, Default)]
pub struct TagOptions {
    pub only_project_id: Option<String>,
    /// Only the first N data rows of the input are eligible.
    pub limit_rows: Option<usize>,
}

/// Review uids in input order.
pub fn tag_candidates(table: &LoadedTable, options: &TagOptions) -> Vec<String> {
    table
        .reviews()
        .iter()
        .filter(|r| options.limit_rows.map_or(true, |limit| r.row < limit))
        .filter(|r| options.only_project_id.as_deref().map_or(true, |id| r.project_id == id))
        .map(|r| r.review_id.clone())
        .collect()
}

pub struct TagPipeline {
    table: Arc<LoadedTable>,
    generator: TagGenerator,
    store: CheckpointStore<TagRecord>,
    positions: HashMap<String, usize>,
    candidates: Vec<String>,
}

impl TagPipeline {
    pub fn open(
        table: Arc<LoadedTable>,
        backend: Arc<dyn InferenceBackend>,
        config: &TagConfig,
        layout: &OutputLayout,
        options: &TagOptions,
    ) -> Result<Self, DigestError> {
        let store = CheckpointStore::open(layout.review_tags())?;
        let positions = table
            .reviews()
            .iter()
            .enumerate()
            .map(|(i, r)| (r.review_id.clone(), i))
            .collect();
        let candidates = tag_candidates(&table, options);
        Ok(Self {
            generator: TagGenerator::new(backend, config.clone()),
            table,
            store,
            positions,
            candidates,
        })
    }

    pub fn store(&self) -> &CheckpointStore<TagRecord> {
        &self.store
    }
}

#[async_trait]
impl Pipeline for TagPipeline {
    fn name(&self) -> &'static str {
        "tags"
    }

    fn candidate_keys(&self) -> &[String] {
        &self.candidates
    }

    fn is_done(&self, key: &str) -> bool {
        self.store.contains(key)
    }

    fn record_count(&self) -> usize {
        self.store.len()
    }

    async fn execute(&mut self, batch: &[String], cancel: &CancellationToken) -> Result<PassOutcome, DigestError> {
        let mut outcome = PassOutcome::default();
        let mut reviews: Vec<&Review> = Vec::with_capacity(batch.len());
        for uid in batch {
            match self.positions.get(uid) {
                Some(&i) => reviews.push(&self.table.reviews()[i]),
                None => {
                    warn!(review_uid = %uid, "Review not found in input");
                    outcome.failed.push(uid.clone());
                }
            }
        }

        for call_batch in self.generator.plan_batches(reviews) {
            if cancel.is_cancelled() {
                break;
            }
            let result = self.generator.tag_batch(&call_batch, cancel).await;
            outcome.appended += self.store.append_all(result.accepted)?;
            if !cancel.is_cancelled() {
                outcome.failed.extend(result.failed);
            }
        }

        info!(
            reviews = batch.len(),
            appended = outcome.appended,
            failed = outcome.failed.len(),
            "Tag pass finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batching::loader::LoadReport;
    use batching::KeyOrigin;

    fn review(uid: &str, project_id: &str, row: usize) -> Review {
        Review {
            review_id: uid.into(),
            key_origin: KeyOrigin::Natural,
            project_id: project_id.into(),
            project_name: project_id.to_uppercase(),
            text: "Fine".into(),
            rating: None,
            user_id: None,
            created_on: None,
            reviewer_name: None,
            source: None,
            row,
        }
    }

    #[test]
    fn test_candidates_keep_input_order_and_filters() {
        let table = LoadedTable::from_reviews(
            vec![review("r0", "a", 0), review("r1", "b", 2), review("r2", "a", 3)],
            LoadReport::default(),
        );
        assert_eq!(tag_candidates(&table, &TagOptions::default()), vec!["r0", "r1", "r2"]);

        let limited = TagOptions {
            limit_rows: Some(3),
            ..Default::default()
        };
        assert_eq!(tag_candidates(&table, &limited), vec!["r0", "r1"]);

        let only = TagOptions {
            only_project_id: Some("a".into()),
            ..Default::default()
        };
        assert_eq!(tag_candidates(&table, &only), vec!["r0", "r2"]);
    }
}
