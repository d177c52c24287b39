//! Resumable review digest pipelines.
//!
//! Two pipelines share one driver:
//! - `summaries`: chunk each project's reviews, summarize every chunk, then
//!   consolidate the chunk summaries into one project summary
//! - `tags`: three short tags per review, batched, with strict single-review
//!   regeneration for anything the batch call did not settle
//!
//! All progress lives in the JSONL logs of the `batching` crate, so a run can
//! be stopped at any point and started again without duplicating records.

pub mod backend;
pub mod config;
pub mod consolidator;
pub mod contracts;
pub mod driver;
pub mod errors;
pub mod pipeline;
pub mod prompts;
pub mod retry;
pub mod summarizer;
pub mod tagger;

pub use backend::{CompletionRequest, InferenceBackend, OpenAiBackend, Throttled};
pub use config::DigestConfig;
pub use driver::{append_run_report, BatchDriver, RunOutcome, RunReport};
pub use errors::{BackendError, DigestError, Stage};
pub use pipeline::{Pipeline, SummaryPipeline, TagPipeline};
