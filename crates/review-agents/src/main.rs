use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use batching::pack::{export_packs, PackSelection};
use batching::{LoadedTable, OutputLayout};
use clap::{Args, Parser, Subcommand};
use review_agents::config::call_delay;
use review_agents::driver::{prepare_run, RunInputs};
use review_agents::pipeline::{SummaryOptions, TagOptions};
use review_agents::{
    append_run_report, BatchDriver, DigestConfig, DigestError, InferenceBackend, OpenAiBackend, Pipeline,
    SummaryPipeline, TagPipeline, Throttled,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML config file; env vars and defaults fill anything it omits
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summarize each project's reviews
    Summaries {
        #[command(flatten)]
        run: RunArgs,
        #[arg(long)]
        limit_projects: Option<usize>,
    },
    /// Tag each review
    Tags {
        #[command(flatten)]
        run: RunArgs,
        /// Only consider the first N data rows
        #[arg(long)]
        limit_rows: Option<usize>,
    },
    /// Write one JSON pack per summarized project
    Export {
        #[arg(long, default_value = "outputs")]
        out: PathBuf,
        /// Project summaries log; defaults to the one under --out
        #[arg(long)]
        summaries: Option<PathBuf>,
        /// Review tags log; defaults to the one under --out
        #[arg(long)]
        tags: Option<PathBuf>,
        #[arg(long)]
        only_project_id: Option<String>,
        #[arg(long)]
        limit_projects: Option<usize>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Input review table
    #[arg(long)]
    csv: PathBuf,

    #[arg(long, default_value = "outputs")]
    out: PathBuf,

    /// Keys per pass; unset or 0 takes every remaining key
    #[arg(long)]
    batch_size: Option<usize>,

    /// Delete existing logs for this pipeline before starting
    #[arg(long, default_value_t = false)]
    no_resume: bool,

    /// Seconds between backend calls
    #[arg(long, default_value_t = 0.0)]
    sleep_s: f64,

    #[arg(long)]
    only_project_id: Option<String>,
}

fn load_config(path: Option<&Path>) -> Result<DigestConfig> {
    let config = match path {
        Some(path) => DigestConfig::from_file(path)?,
        None => DigestConfig::default(),
    };
    config.validate().map_err(DigestError::Config)?;
    Ok(config)
}

fn build_backend(config: &DigestConfig, sleep_s: f64) -> Result<Arc<dyn InferenceBackend>, DigestError> {
    let delay = call_delay(sleep_s).map_err(DigestError::Config)?;
    let http = OpenAiBackend::new(&config.backend)?;
    info!(model = %http.model(), base_url = %config.backend.base_url, "Inference backend ready");
    Ok(Arc::new(Throttled::new(Arc::new(http), delay)))
}

async fn drive(
    mut pipeline: impl Pipeline,
    table: &LoadedTable,
    layout: &OutputLayout,
    batch_size: Option<usize>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut report = BatchDriver::new(batch_size, cancel).run(&mut pipeline).await?;
    report.input = Some(table.report().clone());
    append_run_report(&report, &layout.run_log());
    if !report.failed_keys.is_empty() {
        warn!(
            failed = report.failed_keys.len(),
            first = %report.failed_keys[0],
            "Some keys could not be completed; rerun to retry them"
        );
    }
    Ok(())
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current call");
            cancel.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());

    match cli.command {
        Command::Summaries { run, limit_projects } => {
            let config = load_config(cli.config.as_deref())?;
            let layout = OutputLayout::new(&run.out);
            let reset = if run.no_resume {
                vec![layout.project_summaries(), layout.chunk_summaries()]
            } else {
                Vec::new()
            };
            let RunInputs { table, backend } = prepare_run(&run.csv, &reset, || build_backend(&config, run.sleep_s))
                .with_context(|| format!("Failed to prepare run for {}", run.csv.display()))?;
            let options = SummaryOptions {
                only_project_id: run.only_project_id,
                limit_projects,
            };
            let pipeline = SummaryPipeline::open(Arc::clone(&table), backend, &config.summary, &layout, &options)?;
            drive(pipeline, &table, &layout, run.batch_size, cancel).await?;
        }
        Command::Tags { run, limit_rows } => {
            let config = load_config(cli.config.as_deref())?;
            let layout = OutputLayout::new(&run.out);
            let reset = if run.no_resume { vec![layout.review_tags()] } else { Vec::new() };
            let RunInputs { table, backend } = prepare_run(&run.csv, &reset, || build_backend(&config, run.sleep_s))
                .with_context(|| format!("Failed to prepare run for {}", run.csv.display()))?;
            let options = TagOptions {
                only_project_id: run.only_project_id,
                limit_rows,
            };
            let pipeline = TagPipeline::open(Arc::clone(&table), backend, &config.tags, &layout, &options)?;
            drive(pipeline, &table, &layout, run.batch_size, cancel).await?;
        }
        Command::Export {
            out,
            summaries,
            tags,
            only_project_id,
            limit_projects,
        } => {
            let layout = OutputLayout::new(&out);
            let selection = PackSelection {
                only_project_id,
                limit_projects,
            };
            let index = export_packs(&layout, summaries.as_deref(), tags.as_deref(), &selection)?;
            info!(
                packs = index.packs.len(),
                skipped = index.skipped.len(),
                dir = %layout.pack_dir().display(),
                "Export complete"
            );
        }
    }

    Ok(())
}
