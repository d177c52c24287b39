//! Persisted output records, one JSON object per checkpoint line.

use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointRecord;
use crate::chunker::chunk_key;
use crate::tags::TagSet;

/// List fields shared by chunk and project summaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryBody {
    #[serde(default)]
    pub top_highlights: Vec<String>,
    #[serde(default)]
    pub watchouts_or_gaps: Vec<String>,
    #[serde(default)]
    pub best_for: Vec<String>,
    #[serde(default)]
    pub not_ideal_for: Vec<String>,
    #[serde(default)]
    pub evidence_notes: Vec<String>,
}

/// Summary of one chunk of a project's reviews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSummaryRecord {
    pub project_id: String,
    pub project_name: String,
    /// 1-based.
    pub chunk_index: usize,
    pub chunk_count: usize,
    pub chunk_fingerprint: String,
    pub token_estimate: usize,
    pub review_count: usize,
    pub chunk_summary: String,
    #[serde(flatten)]
    pub body: SummaryBody,
}

impl CheckpointRecord for ChunkSummaryRecord {
    fn checkpoint_key(&self) -> String {
        chunk_key(&self.project_id, self.chunk_index, &self.chunk_fingerprint)
    }
}

/// Consolidated summary of a whole project. At most one per `project_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummaryRecord {
    pub project_id: String,
    pub project_name: String,
    pub headline: String,
    pub overall_summary: String,
    #[serde(flatten)]
    pub body: SummaryBody,
    #[serde(default)]
    pub review_count: usize,
    #[serde(default)]
    pub chunk_count: usize,
    /// RFC 3339 timestamp of generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
}

impl CheckpointRecord for ProjectSummaryRecord {
    fn checkpoint_key(&self) -> String {
        self.project_id.clone()
    }
}

/// Three tags for one review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub review_uid: String,
    pub project_id: String,
    pub project_name: String,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub created_on: Option<String>,
    pub tag_1: String,
    pub tag_2: String,
    pub tag_3: String,
}

impl TagRecord {
    pub fn tags(&self) -> [&str; 3] {
        [self.tag_1.as_str(), self.tag_2.as_str(), self.tag_3.as_str()]
    }

    pub fn from_review(review: &crate::review::Review, tags: TagSet) -> Self {
        let [tag_1, tag_2, tag_3] = tags.into_inner();
        Self {
            review_uid: review.review_id.clone(),
            project_id: review.project_id.clone(),
            project_name: review.project_name.clone(),
            rating: review.rating,
            created_on: review.created_on.clone(),
            tag_1,
            tag_2,
            tag_3,
        }
    }
}

impl CheckpointRecord for TagRecord {
    fn checkpoint_key(&self) -> String {
        self.review_uid.clone()
    }
}
