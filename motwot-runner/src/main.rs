//! Runner binary of the motwot pipeline.
//!
//! Loads configuration, initializes tracing and metrics, then runs one job: merging the latest
//! MOT history delta into the authoritative table, or bootstrapping the table from the bulk
//! snapshot. The process exits non-zero when the job fails.

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use motwot_telemetry::metrics::{init_metrics_handle, write_metrics_textfile};
use motwot_telemetry::tracing::init_tracing;
use tracing::{error, warn};

use crate::config::load_runner_config;
use crate::core::{Job, run_with_config};
use crate::error::{RunnerError, RunnerResult};

mod config;
mod core;
mod error;

#[derive(Debug, Parser)]
#[command(name = "motwot-runner", version, about, arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Merge the latest upstream delta into the authoritative table.
    Delta {
        /// Merge this archive instead of asking upstream for the latest delta.
        #[arg(long)]
        archive: Option<PathBuf>,
        /// Processing date used for derived columns, defaults to today (UTC).
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Replace the content of the authoritative table with the upstream bulk snapshot.
    Bootstrap {
        /// Processing date used for derived columns, defaults to today (UTC).
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

impl Command {
    fn into_job(self) -> (Job, Option<NaiveDate>) {
        match self {
            Command::Delta { archive, date } => (Job::Delta { archive }, date),
            Command::Bootstrap { date } => (Job::Bootstrap, date),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprint!("{}", err.render_report());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> RunnerResult<()> {
    let runner_config = load_runner_config()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(RunnerError::config)?;

    let metrics_handle = match &runner_config.metrics {
        Some(_) => Some(init_metrics_handle().map_err(RunnerError::config)?),
        None => None,
    };
    let metrics_textfile = runner_config
        .metrics
        .as_ref()
        .map(|metrics| metrics.textfile_path.clone());

    let (job, date) = cli.command.into_job();
    let run_date = date.unwrap_or_else(|| Utc::now().date_naive());

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run_with_config(runner_config, job, run_date));

    if let Err(err) = &result {
        error!(category = err.category(), "{err}");
    }

    // Failed runs are exported too, so that alerting can pick up the failure counter.
    if let (Some(handle), Some(path)) = (metrics_handle, metrics_textfile)
        && let Err(err) = write_metrics_textfile(&path, &handle)
    {
        warn!(path = %path.display(), error = %err, "failed to write metrics textfile");
    }

    result
}
