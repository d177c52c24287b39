//! Per-project pack export.
//!
//! Joins each project's summary with the tag records of its reviews. Reads the
//! checkpoint logs only and never writes to them.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::checkpoint::read_records;
use crate::error::PackError;
use crate::layout::OutputLayout;
use crate::records::{ProjectSummaryRecord, TagRecord};

/// Which projects to export.
#[derive(Debug, Clone, Default)]
pub struct PackSelection {
    pub only_project_id: Option<String>,
    pub limit_projects: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedReview {
    pub review_uid: String,
    pub rating: Option<f64>,
    pub created_on: Option<String>,
    pub tags: [String; 3],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackCounts {
    pub tagged_reviews: usize,
    pub summary_chunks: usize,
    pub summarized_reviews: usize,
}

/// One project's summary plus every tag set recorded for its reviews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectPack {
    pub project_id: String,
    pub project_name: String,
    pub project_summary: ProjectSummaryRecord,
    pub tagged_reviews: Vec<TaggedReview>,
    pub counts: PackCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackIndexRow {
    pub project_id: String,
    pub project_name: String,
    pub tagged_reviews: usize,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedProject {
    pub project_id: String,
    pub reason: String,
}

/// Contents of `project_pack/index.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackIndex {
    pub exported_at: String,
    pub packs: Vec<PackIndexRow>,
    pub skipped: Vec<SkippedProject>,
}

/// File-system safe stem for a project id: the sanitized id plus a short
/// hash of the raw id, so ids that sanitize alike still get distinct files.
pub fn pack_file_stem(project_id: &str) -> String {
    let sanitized: String = project_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let hash = blake3::hash(project_id.as_bytes()).to_hex();
    format!("{sanitized}-{}", &hash[..8])
}

/// Candidate project ids: summary log order, then tag-only projects by first appearance.
fn candidate_projects(summaries: &[ProjectSummaryRecord], tags: &[TagRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    summaries
        .iter()
        .map(|s| s.project_id.as_str())
        .chain(tags.iter().map(|t| t.project_id.as_str()))
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect()
}

/// Join summaries and tags into packs. Projects without a summary are skipped.
pub fn build_packs(
    summaries: &[ProjectSummaryRecord],
    tags: &[TagRecord],
    selection: &PackSelection,
) -> (Vec<ProjectPack>, Vec<SkippedProject>) {
    let by_project: HashMap<&str, &ProjectSummaryRecord> =
        summaries.iter().map(|s| (s.project_id.as_str(), s)).collect();
    let mut tags_by_project: HashMap<&str, Vec<&TagRecord>> = HashMap::new();
    for tag in tags {
        tags_by_project.entry(tag.project_id.as_str()).or_default().push(tag);
    }

    let mut candidates = candidate_projects(summaries, tags);
    if let Some(only) = &selection.only_project_id {
        candidates.retain(|id| id == only);
        if candidates.is_empty() {
            return (
                Vec::new(),
                vec![SkippedProject {
                    project_id: only.clone(),
                    reason: "no summary or tag records".into(),
                }],
            );
        }
    }
    if let Some(limit) = selection.limit_projects {
        candidates.truncate(limit);
    }

    let mut packs = Vec::new();
    let mut skipped = Vec::new();
    for project_id in candidates {
        let project_tags = tags_by_project.remove(project_id.as_str()).unwrap_or_default();
        let Some(summary) = by_project.get(project_id.as_str()) else {
            skipped.push(SkippedProject {
                reason: format!(
                    "no project summary yet ({} tag records available)",
                    project_tags.len()
                ),
                project_id,
            });
            continue;
        };

        let tagged_reviews: Vec<TaggedReview> = project_tags
            .into_iter()
            .map(|t| TaggedReview {
                review_uid: t.review_uid.clone(),
                rating: t.rating,
                created_on: t.created_on.clone(),
                tags: [t.tag_1.clone(), t.tag_2.clone(), t.tag_3.clone()],
            })
            .collect();

        packs.push(ProjectPack {
            project_name: summary.project_name.clone(),
            counts: PackCounts {
                tagged_reviews: tagged_reviews.len(),
                summary_chunks: summary.chunk_count,
                summarized_reviews: summary.review_count,
            },
            project_summary: (*summary).clone(),
            tagged_reviews,
            project_id,
        });
    }

    (packs, skipped)
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), PackError> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)
        .and_then(|()| std::fs::rename(&tmp, path))
        .map_err(|source| PackError::Write {
            path: path.to_path_buf(),
            source,
        })
}

/// Read both logs under `layout`, write one pack per exported project and the index.
///
/// `summaries_path` and `tags_path` override the default log locations.
pub fn export_packs(
    layout: &OutputLayout,
    summaries_path: Option<&Path>,
    tags_path: Option<&Path>,
    selection: &PackSelection,
) -> Result<PackIndex, PackError> {
    let summaries_path = summaries_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| layout.project_summaries());
    let tags_path = tags_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| layout.review_tags());

    let summaries: Vec<ProjectSummaryRecord> = read_records(&summaries_path)?;
    let tags: Vec<TagRecord> = read_records(&tags_path)?;
    let (packs, skipped) = build_packs(&summaries, &tags, selection);

    let pack_dir = layout.pack_dir();
    std::fs::create_dir_all(&pack_dir).map_err(|source| PackError::Write {
        path: pack_dir.clone(),
        source,
    })?;

    let mut rows = Vec::with_capacity(packs.len());
    for pack in &packs {
        let path: PathBuf = pack_dir.join(format!("{}.json", pack_file_stem(&pack.project_id)));
        let json = serde_json::to_vec_pretty(pack).map_err(|source| PackError::Encode {
            project_id: pack.project_id.clone(),
            source,
        })?;
        write_atomic(&path, &json)?;
        rows.push(PackIndexRow {
            project_id: pack.project_id.clone(),
            project_name: pack.project_name.clone(),
            tagged_reviews: pack.counts.tagged_reviews,
            path: path.display().to_string(),
        });
    }

    for skip in &skipped {
        warn!(project_id = %skip.project_id, reason = %skip.reason, "Skipped project pack");
    }

    let index = PackIndex {
        exported_at: chrono::Utc::now().to_rfc3339(),
        packs: rows,
        skipped,
    };
    let json = serde_json::to_vec_pretty(&index).map_err(|source| PackError::Encode {
        project_id: "index".into(),
        source,
    })?;
    write_atomic(&layout.pack_index(), &json)?;

    info!(
        exported = index.packs.len(),
        skipped = index.skipped.len(),
        dir = %pack_dir.display(),
        "Exported project packs"
    );
    Ok(index)
}
