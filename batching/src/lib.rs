//! Review digest batching library
//!
//! Everything here is deterministic and offline:
//! - Input loading and validation with stable review keys
//! - Token-bounded chunking of project review groups
//! - Append-if-absent JSONL checkpoint logs for resumable runs
//! - Tag post-processing and repair
//! - Per-project pack export joining summaries with tags
//!
//! The inference-facing pipelines live in the `review-agents` crate and write
//! exclusively through [`checkpoint::CheckpointStore`].

pub mod checkpoint;
pub mod chunker;
pub mod error;
pub mod layout;
pub mod loader;
pub mod pack;
pub mod records;
pub mod review;
pub mod tags;
pub mod tokens;
pub mod uid;

pub use checkpoint::{CheckpointRecord, CheckpointSet, CheckpointStore};
pub use chunker::{Chunk, ChunkEntry, ChunkPolicy};
pub use error::{CheckpointError, LoadError, PackError};
pub use layout::OutputLayout;
pub use loader::{load_reviews, LoadReport, LoadedTable};
pub use records::{ChunkSummaryRecord, ProjectSummaryRecord, SummaryBody, TagRecord};
pub use review::{KeyOrigin, ProjectGroup, Review};
pub use tags::{TagRepair, TagSet};
pub use tokens::{CharCountEstimator, TokenEstimator};
