//! dirsync: two-way directory synchronization with a persisted baseline.
//!
//! Batch mode enumerates both roots, reconciles them against the baseline,
//! asks for confirmation, applies the changeset and persists the job file.
//! Realtime mode keeps the trees converging afterwards by feeding filesystem
//! events through the same decision logic.

use std::io::Write as _;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use dirsync_cli::{logging, monitor};
use dirsync_core::{
    apply, compute_change_set, enumerate, latest_wins, JobLock, Observed, Source, SyncJob,
    SyncOperation,
};

#[derive(Parser, Debug)]
#[command(name = "dirsync", about = "Two-way directory synchronization", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new sync job descriptor
    New {
        /// Directory path for the left side of the compare
        path_a: PathBuf,

        /// Directory path for the right side of the compare
        path_b: PathBuf,

        /// File path to save the sync job to
        #[arg(short, long)]
        output: PathBuf,

        /// Directory to write audit logs to
        #[arg(short = 'l', long = "logdir")]
        log_dir: Option<PathBuf>,

        /// Limit the number of daily log files to keep (0 keeps all)
        #[arg(short = 'c', long = "log-file-count", default_value_t = 0)]
        log_file_count: usize,

        /// Enable debug level logging for runs of this job
        #[arg(short, long)]
        debug: bool,
    },

    /// Run a folder sync against an existing job descriptor
    Sync {
        /// Path of the sync job file
        #[arg(short, long)]
        input: PathBuf,

        /// Only print warnings and errors to the console
        #[arg(short, long)]
        quiet: bool,

        /// Keep watching both roots after the batch pass
        #[arg(short, long)]
        realtime: bool,

        /// Skip the interactive confirmation
        #[arg(short, long)]
        force: bool,

        /// Enable debug level logging
        #[arg(short, long)]
        debug: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::New {
            path_a,
            path_b,
            output,
            log_dir,
            log_file_count,
            debug,
        } => new_job(path_a, path_b, output, log_dir, log_file_count, debug),
        Command::Sync {
            input,
            quiet,
            realtime,
            force,
            debug,
        } => run_sync(input, quiet, realtime, force, debug).await,
    }
}

fn new_job(
    path_a: PathBuf,
    path_b: PathBuf,
    output: PathBuf,
    log_dir: Option<PathBuf>,
    log_file_count: usize,
    debug: bool,
) -> Result<()> {
    if !path_a.is_dir() {
        bail!("path A ({}) does not exist", path_a.display());
    }
    if !path_b.is_dir() {
        bail!("path B ({}) does not exist", path_b.display());
    }

    let mut job = SyncJob::new(path_a, path_b);
    job.log_path = log_dir;
    job.log_file_limit = log_file_count;
    job.debug = debug;

    // Re-pointing an existing job file keeps its baseline.
    if output.exists() {
        let previous = SyncJob::load(&output)
            .with_context(|| format!("existing job file {} is unreadable", output.display()))?;
        job.status_lines = previous.status_lines;
    }

    job.save(&output)?;
    println!("created sync job {}", output.display());
    Ok(())
}

async fn run_sync(
    input: PathBuf,
    quiet: bool,
    realtime: bool,
    force: bool,
    debug: bool,
) -> Result<()> {
    let mut job = SyncJob::load(&input)
        .with_context(|| format!("failed to load job file {}", input.display()))?;

    // Only one sync may run against a job file at a time.
    let _lock = JobLock::acquire(&input)?;
    let _log_guard = logging::init(
        job.log_path.as_deref(),
        job.log_file_limit,
        quiet,
        debug || job.debug,
    )?;

    if !job.path_a.is_dir() {
        bail!("path A ({}) does not exist", job.path_a.display());
    }
    if !job.path_b.is_dir() {
        bail!("path B ({}) does not exist", job.path_b.display());
    }
    job.save(&input)?;

    let timer = Instant::now();
    let set_a = enumerate(&job.path_a, Source::SideA)
        .await
        .with_context(|| format!("enumerating {}", job.path_a.display()))?;
    info!(
        "enumerated side A ({}): {} files in {:.2?}",
        job.path_a.display(),
        set_a.len(),
        timer.elapsed()
    );

    let timer = Instant::now();
    let set_b = enumerate(&job.path_b, Source::SideB)
        .await
        .with_context(|| format!("enumerating {}", job.path_b.display()))?;
    info!(
        "enumerated side B ({}): {} files in {:.2?}",
        job.path_b.display(),
        set_b.len(),
        timer.elapsed()
    );

    let baseline: Vec<Observed> = job
        .status_lines
        .iter()
        .map(|line| Observed {
            source: Source::Baseline,
            stamp: line.clone(),
        })
        .collect();

    let timer = Instant::now();
    let changeset = compute_change_set(&set_a, &set_b, &baseline, &compare_logged)?;
    info!(
        "computed changeset: {} operations in {:.2?}",
        changeset.len(),
        timer.elapsed()
    );

    print_operations(&changeset);

    if !changeset.is_empty() && !force && !confirm().await? {
        debug!("user declined, nothing applied");
        return Ok(());
    }

    let timer = Instant::now();
    let report = apply(&mut job, &changeset).await?;
    job.save(&input)?;
    info!(
        "applied {} operations ({} failed) in {:.2?}",
        report.applied,
        report.failed,
        timer.elapsed()
    );

    if realtime {
        run_realtime(job, input).await?;
    }
    Ok(())
}

/// The production comparator plus the diagnostic record the engine itself
/// never emits.
fn compare_logged<'a>(x: &'a Observed, y: &'a Observed) -> Option<&'a Observed> {
    debug!(
        "conflict resolution: {} @ {} vs {} @ {}",
        x.source,
        x.last_modified(),
        y.source,
        y.last_modified()
    );
    latest_wins(x, y)
}

fn print_operations(changeset: &[SyncOperation]) {
    let actionable: Vec<&SyncOperation> = changeset.iter().filter(|op| !op.is_noop()).collect();
    if actionable.is_empty() {
        info!("directories are in sync");
        return;
    }

    info!("operations to perform:");
    let width = actionable
        .iter()
        .map(|op| op.key().len())
        .max()
        .unwrap_or(0)
        + 2;
    for op in actionable {
        info!(
            "  {:<width$} {:<16} {:<22} {}",
            op.key(),
            op.file_action.label(),
            op.baseline_action.label(),
            op.reason,
        );
    }
}

async fn confirm() -> Result<bool> {
    let answer = tokio::task::spawn_blocking(|| {
        print!("Confirm? (yes/NO): ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok::<_, std::io::Error>(line)
    })
    .await
    .context("confirmation prompt failed")??;

    Ok(answer.trim().eq_ignore_ascii_case("yes"))
}

async fn run_realtime(job: SyncJob, job_path: PathBuf) -> Result<()> {
    info!("entering realtime file system monitoring (ctrl-c to stop)");

    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    let monitor = monitor::Monitor::watch(job, job_path)?;
    monitor.run(token).await
}
