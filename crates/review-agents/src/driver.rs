//! Batch driver: Select-Batch → Execute, repeated until a pass makes no progress.
//!
//! The driver never tracks completion itself. Each selection asks the
//! pipeline which keys are done, so whatever is on disk is the only state.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use batching::{checkpoint, load_reviews, LoadReport, LoadedTable};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::InferenceBackend;
use crate::errors::DigestError;
use crate::pipeline::Pipeline;

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// No selectable keys remain.
    Exhausted,
    /// A pass appended nothing.
    NoProgress,
    Cancelled,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "exhausted"),
            Self::NoProgress => write!(f, "no_progress"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One line of `run_log.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline: String,
    pub started_at: String,
    pub finished_at: String,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<LoadReport>,
    pub candidates: usize,
    pub records_before: usize,
    pub records_after: usize,
    pub new_records: usize,
    pub passes: usize,
    /// Keys that failed during this run, in the order they failed.
    pub failed_keys: Vec<String>,
    pub outcome: RunOutcome,
}

pub struct BatchDriver {
    batch_size: Option<usize>,
    cancel: CancellationToken,
}

impl BatchDriver {
    /// `batch_size` of `None` selects every remaining key in one pass.
    pub fn new(batch_size: Option<usize>, cancel: CancellationToken) -> Self {
        Self {
            batch_size: batch_size.filter(|&n| n > 0),
            cancel,
        }
    }

    fn select_batch<P: Pipeline + ?Sized>(&self, pipeline: &P, failed: &HashSet<String>) -> Vec<String> {
        pipeline
            .candidate_keys()
            .iter()
            .filter(|key| !pipeline.is_done(key) && !failed.contains(*key))
            .take(self.batch_size.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub async fn run<P: Pipeline + ?Sized>(&self, pipeline: &mut P) -> Result<RunReport, DigestError> {
        let started_at = chrono::Utc::now();
        let timer = Instant::now();
        let records_before = pipeline.record_count();
        let candidates = pipeline.candidate_keys().len();
        let done_at_start = pipeline
            .candidate_keys()
            .iter()
            .filter(|k| pipeline.is_done(k))
            .count();
        info!(
            pipeline = pipeline.name(),
            candidates,
            already_done = done_at_start,
            batch_size = ?self.batch_size,
            "Starting run"
        );

        let mut failed: HashSet<String> = HashSet::new();
        let mut failed_keys = Vec::new();
        let mut passes = 0usize;
        let mut new_records = 0usize;

        let outcome = loop {
            if self.cancel.is_cancelled() {
                break RunOutcome::Cancelled;
            }
            let batch = self.select_batch(pipeline, &failed);
            if batch.is_empty() {
                break RunOutcome::Exhausted;
            }

            passes += 1;
            let pass = pipeline.execute(&batch, &self.cancel).await?;
            new_records += pass.appended;
            for key in pass.failed {
                if failed.insert(key.clone()) {
                    failed_keys.push(key);
                }
            }
            info!(
                pipeline = pipeline.name(),
                pass = passes,
                selected = batch.len(),
                appended = pass.appended,
                failed_so_far = failed_keys.len(),
                "Pass complete"
            );

            if self.cancel.is_cancelled() {
                break RunOutcome::Cancelled;
            }
            if pass.appended == 0 {
                break RunOutcome::NoProgress;
            }
        };

        let report = RunReport {
            run_id: Uuid::new_v4(),
            pipeline: pipeline.name().to_string(),
            started_at: started_at.to_rfc3339(),
            finished_at: chrono::Utc::now().to_rfc3339(),
            elapsed_ms: timer.elapsed().as_millis() as u64,
            input: None,
            candidates,
            records_before,
            records_after: pipeline.record_count(),
            new_records,
            passes,
            failed_keys,
            outcome,
        };
        info!(
            pipeline = %report.pipeline,
            passes,
            new_records,
            failed = report.failed_keys.len(),
            outcome = %outcome,
            "Run finished"
        );
        Ok(report)
    }
}

/// What a pipeline is opened with.
pub struct RunInputs {
    pub table: Arc<LoadedTable>,
    pub backend: Arc<dyn InferenceBackend>,
}

/// Load the input table and build the backend, then delete the `reset` logs.
///
/// Logs are only touched once both steps succeeded, so a fatal input or
/// backend error leaves stored progress as it was.
pub fn prepare_run<F>(csv: &Path, reset: &[PathBuf], build_backend: F) -> Result<RunInputs, DigestError>
where
    F: FnOnce() -> Result<Arc<dyn InferenceBackend>, DigestError>,
{
    let table = Arc::new(load_reviews(csv)?);
    let backend = build_backend()?;
    for path in reset {
        if checkpoint::reset(path)? {
            warn!(path = %path.display(), "Removed existing log (--no-resume)");
        }
    }
    Ok(RunInputs { table, backend })
}

/// Append `report` as one JSON line. Failures are logged, never fatal.
pub fn append_run_report(report: &RunReport, path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("Failed to create run log directory: {e}");
            return;
        }
    }
    match serde_json::to_string(report) {
        Ok(json) => {
            use std::io::Write;
            match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(mut file) => {
                    if let Err(e) = writeln!(file, "{json}") {
                        warn!("Failed to append run report: {e}");
                    } else {
                        info!(path = %path.display(), "Appended run report");
                    }
                }
                Err(e) => warn!("Failed to open run log: {e}"),
            }
        }
        Err(e) => warn!("Failed to serialize run report: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BackendError;
    use crate::pipeline::PassOutcome;
    use async_trait::async_trait;

    /// In-memory pipeline: keys listed in `broken` always fail.
    struct FakePipeline {
        keys: Vec<String>,
        done: HashSet<String>,
        broken: HashSet<String>,
        batches: Vec<Vec<String>>,
        cancel_after_first: Option<CancellationToken>,
    }

    impl FakePipeline {
        fn new(keys: &[&str], broken: &[&str]) -> Self {
            Self {
                keys: keys.iter().map(|k| k.to_string()).collect(),
                done: HashSet::new(),
                broken: broken.iter().map(|k| k.to_string()).collect(),
                batches: Vec::new(),
                cancel_after_first: None,
            }
        }
    }

    #[async_trait]
    impl Pipeline for FakePipeline {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn candidate_keys(&self) -> &[String] {
            &self.keys
        }

        fn is_done(&self, key: &str) -> bool {
            self.done.contains(key)
        }

        fn record_count(&self) -> usize {
            self.done.len()
        }

        async fn execute(&mut self, batch: &[String], _cancel: &CancellationToken) -> Result<PassOutcome, DigestError> {
            self.batches.push(batch.to_vec());
            let mut outcome = PassOutcome::default();
            for key in batch {
                if self.broken.contains(key) {
                    outcome.failed.push(key.clone());
                } else if self.done.insert(key.clone()) {
                    outcome.appended += 1;
                }
            }
            if let Some(token) = self.cancel_after_first.take() {
                token.cancel();
            }
            Ok(outcome)
        }
    }

    #[tokio::test]
    async fn test_batches_until_exhausted() {
        let mut pipeline = FakePipeline::new(&["a", "b", "c", "d", "e"], &[]);
        let driver = BatchDriver::new(Some(2), CancellationToken::new());
        let report = driver.run(&mut pipeline).await.unwrap();
        assert_eq!(report.passes, 3);
        assert_eq!(report.new_records, 5);
        assert_eq!(report.records_after, 5);
        assert_eq!(report.outcome, RunOutcome::Exhausted);
        assert_eq!(pipeline.batches[2], vec!["e".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_keys_are_not_reselected() {
        let mut pipeline = FakePipeline::new(&["a", "bad", "c"], &["bad"]);
        let driver = BatchDriver::new(Some(2), CancellationToken::new());
        let report = driver.run(&mut pipeline).await.unwrap();
        assert_eq!(report.passes, 2);
        assert_eq!(report.failed_keys, vec!["bad".to_string()]);
        assert_eq!(pipeline.batches[1], vec!["c".to_string()]);
        assert_eq!(report.outcome, RunOutcome::Exhausted);
    }

    #[tokio::test]
    async fn test_zero_progress_pass_stops() {
        let mut pipeline = FakePipeline::new(&["x", "y", "z"], &["x", "y"]);
        let driver = BatchDriver::new(Some(2), CancellationToken::new());
        let report = driver.run(&mut pipeline).await.unwrap();
        assert_eq!(report.passes, 1);
        assert_eq!(report.new_records, 0);
        assert_eq!(report.outcome, RunOutcome::NoProgress);
        assert!(!pipeline.is_done("z"));
    }

    #[tokio::test]
    async fn test_nothing_to_do_runs_no_pass() {
        let mut pipeline = FakePipeline::new(&["a"], &[]);
        pipeline.done.insert("a".into());
        let report = BatchDriver::new(None, CancellationToken::new())
            .run(&mut pipeline)
            .await
            .unwrap();
        assert_eq!(report.passes, 0);
        assert_eq!(report.records_before, 1);
        assert_eq!(report.outcome, RunOutcome::Exhausted);
    }

    #[tokio::test]
    async fn test_cancel_stops_after_current_pass() {
        let cancel = CancellationToken::new();
        let mut pipeline = FakePipeline::new(&["a", "b", "c"], &[]);
        pipeline.cancel_after_first = Some(cancel.clone());
        let report = BatchDriver::new(Some(1), cancel).run(&mut pipeline).await.unwrap();
        assert_eq!(report.passes, 1);
        assert_eq!(report.new_records, 1);
        assert_eq!(report.outcome, RunOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_unbounded_batch_takes_everything() {
        let mut pipeline = FakePipeline::new(&["a", "b", "c"], &[]);
        let report = BatchDriver::new(Some(0), CancellationToken::new())
            .run(&mut pipeline)
            .await
            .unwrap();
        assert_eq!(report.passes, 1);
        assert_eq!(pipeline.batches[0].len(), 3);
    }

    fn seeded_log(dir: &Path) -> PathBuf {
        let path = dir.join("out").join("review_tags.jsonl");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{\"review_uid\":\"r1\"}\n").unwrap();
        path
    }

    fn idle_backend() -> Result<Arc<dyn InferenceBackend>, DigestError> {
        Ok(Arc::new(crate::summarizer::tests::MockBackend::new()))
    }

    #[test]
    fn test_bad_input_keeps_logs_on_restart() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = seeded_log(dir.path());
        let csv = dir.path().join("bad.csv");
        std::fs::write(&csv, "project_id,rating\np1,4\n").unwrap();

        let err = prepare_run(&csv, &[log.clone()], idle_backend).err().unwrap();
        assert!(matches!(err, DigestError::Load(_)));
        assert!(log.exists());

        let missing = dir.path().join("nope.csv");
        assert!(prepare_run(&missing, &[log.clone()], idle_backend).is_err());
        assert!(log.exists());
    }

    #[test]
    fn test_backend_failure_keeps_logs_on_restart() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = seeded_log(dir.path());
        let csv = dir.path().join("reviews.csv");
        std::fs::write(&csv, "project_id,project_name,text\np1,One,Fine\n").unwrap();

        let err = prepare_run(&csv, &[log.clone()], || {
            Err(DigestError::Backend(BackendError::NotConfigured("no key".into())))
        })
        .err()
        .unwrap();
        assert!(matches!(err, DigestError::Backend(_)));
        assert!(log.exists());
    }

    #[test]
    fn test_restart_removes_logs_after_inputs_are_ready() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = seeded_log(dir.path());
        let csv = dir.path().join("reviews.csv");
        std::fs::write(&csv, "project_id,project_name,text\np1,One,Fine\np1,One,Good\n").unwrap();

        let inputs = prepare_run(&csv, &[log.clone()], idle_backend).unwrap();
        assert_eq!(inputs.table.reviews().len(), 2);
        assert!(!log.exists());
    }

    #[tokio::test]
    async fn test_run_reports_append_as_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("run_log.jsonl");
        let mut pipeline = FakePipeline::new(&["a"], &[]);
        let driver = BatchDriver::new(None, CancellationToken::new());
        let first = driver.run(&mut pipeline).await.unwrap();
        let second = driver.run(&mut pipeline).await.unwrap();
        append_run_report(&first, &path);
        append_run_report(&second, &path);

        let content = std::fs::read_to_string(&path).unwrap();
        let reports: Vec<RunReport> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(reports.len(), 2);
        assert_ne!(reports[0].run_id, reports[1].run_id);
        assert_eq!(reports[1].new_records, 0);
        assert!(content.contains("\"outcome\":\"exhausted\""));
    }
}
