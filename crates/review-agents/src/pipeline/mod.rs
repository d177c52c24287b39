//! The two resumable pipelines the driver can run.

pub mod summary;
pub mod tags;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::DigestError;

pub use summary::{SummaryOptions, SummaryPipeline};
pub use tags::{TagOptions, TagPipeline};

/// What one Execute step achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassOutcome {
    /// Records durably appended during the pass.
    pub appended: usize,
    /// Keys that were attempted and could not be completed.
    pub failed: Vec<String>,
}

/// A keyed unit of work whose progress lives entirely in checkpoint logs.
#[async_trait]
pub trait Pipeline: Send {
    fn name(&self) -> &'static str;

    /// Every key this run may work on, in selection order.
    fn candidate_keys(&self) -> &[String];

    /// Whether `key` already has its final record on disk.
    fn is_done(&self, key: &str) -> bool;

    /// Records currently held across this pipeline's logs.
    fn record_count(&self) -> usize;

    /// Work on `batch` and append whatever completes. Only checkpoint I/O
    /// failures are returned as errors; per-key failures go in the outcome.
    async fn execute(&mut self, batch: &[String], cancel: &CancellationToken) -> Result<PassOutcome, DigestError>;
}
