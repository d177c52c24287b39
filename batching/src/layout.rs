//! File names under an output directory.

use std::path::{Path, PathBuf};

pub const PROJECT_SUMMARIES_FILE: &str = "project_summaries.jsonl";
pub const CHUNK_SUMMARIES_FILE: &str = "project_chunk_summaries.jsonl";
pub const REVIEW_TAGS_FILE: &str = "review_tags.jsonl";
pub const RUN_LOG_FILE: &str = "run_log.jsonl";
pub const PACK_DIR: &str = "project_pack";
pub const PACK_INDEX_FILE: &str = "index.json";

/// Where every pipeline reads and writes, relative to one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_summaries(&self) -> PathBuf {
        self.root.join(PROJECT_SUMMARIES_FILE)
    }

    pub fn chunk_summaries(&self) -> PathBuf {
        self.root.join(CHUNK_SUMMARIES_FILE)
    }

    pub fn review_tags(&self) -> PathBuf {
        self.root.join(REVIEW_TAGS_FILE)
    }

    pub fn run_log(&self) -> PathBuf {
        self.root.join(RUN_LOG_FILE)
    }

    pub fn pack_dir(&self) -> PathBuf {
        self.root.join(PACK_DIR)
    }

    pub fn pack_index(&self) -> PathBuf {
        self.pack_dir().join(PACK_INDEX_FILE)
    }
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self::new("outputs")
    }
}
