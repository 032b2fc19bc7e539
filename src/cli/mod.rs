//! # CLI Module
//!
//! Command-line interface for the media deduplicator.
//!
//! ## Usage
//! ```bash
//! # Fingerprint the configured media folders
//! media-dedup scan
//!
//! # Preview, then apply, the duplicate moves
//! media-dedup dedupe --dry-run
//! media-dedup dedupe
//!
//! # Permanently delete old JPEGs from the duplicate folders
//! media-dedup purge --pattern "*.jpg" --older-than-days 30
//!
//! # Machine-readable output
//! media-dedup status --json
//! ```

mod output;

use clap::{Parser, Subcommand};
use console::{style, Term};
use media_dedup::config::{AppConfig, DEFAULT_CONFIG_FILE};
use media_dedup::core::lock::LockManager;
use media_dedup::core::purge::CONFIRMATION_WORD;
use media_dedup::core::scanner::WalkDirScanner;
use media_dedup::core::status::status;
use media_dedup::core::{
    CancellationToken, DedupeRun, LocalFileSystem, LockName, PurgeConfirmation, PurgeFilters,
    PurgeRun, RunGuard, ScanRun, SimilarRun, SqliteStore, VolumeRoot,
};
use media_dedup::error::{DedupError, ExitStatus};
use media_dedup::events::EventChannel;
use std::path::PathBuf;
use tracing::warn;

/// Media Dedup - park duplicate photos and videos safely, purge them when you are sure
#[derive(Parser, Debug)]
#[command(name = "media-dedup")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Discover and fingerprint files in the media folders
    Scan {
        /// Report what would be recorded without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Move duplicates into the duplicate folder of their volume
    Dedupe {
        /// Print the move plan without moving anything
        #[arg(long)]
        dry_run: bool,

        /// Only consider files under these folders
        #[arg(long, num_args = 1..)]
        folders: Vec<PathBuf>,
    },

    /// Permanently delete registered files from the duplicate folders
    Purge {
        /// Print the purge plan without deleting anything
        #[arg(long)]
        dry_run: bool,

        /// Only files whose name matches this glob (e.g. "*.jpg")
        #[arg(long)]
        pattern: Option<String>,

        /// Only files last modified more than this many days ago
        #[arg(long)]
        older_than_days: Option<u32>,

        /// Only the duplicate folder of this volume root
        #[arg(long)]
        volume: Option<PathBuf>,

        /// Confirmation word, for non-interactive use (must be DELETE)
        #[arg(long)]
        confirm: Option<String>,
    },

    /// Cluster visually similar images
    Similar {
        /// Maximum Hamming distance (defaults to the configured threshold)
        #[arg(short, long)]
        threshold: Option<u32>,

        /// Record the clusters as related_id (takes the deduplicate lock)
        #[arg(long)]
        assign: bool,
    },

    /// Inspect or clean up named locks
    Locks {
        /// Remove expired lock rows
        #[arg(long)]
        clear_stale: bool,
    },

    /// Record counts, locks and pending duplicate groups
    Status,
}

/// Run the CLI and return the process exit code
pub fn run() -> i32 {
    let cli = Cli::parse();
    media_dedup::init_tracing(cli.verbose);

    let status = match execute(&cli) {
        Ok(status) => status,
        Err(e) => {
            let status = e.exit_status();
            if matches!(status, ExitStatus::StoreInconsistency) {
                tracing::error!(error = %e, "store inconsistency");
            }
            Term::stderr()
                .write_line(&format!("{} {}", style("error:").red().bold(), e))
                .ok();
            status
        }
    };
    status.code()
}

fn execute(cli: &Cli) -> Result<ExitStatus, DedupError> {
    let config = AppConfig::load(&cli.config)?;
    let store = SqliteStore::open(&config.database)?;
    let policy = config.lock_policy();
    let fs = LocalFileSystem;
    let out = output::Output::new(cli.json, cli.verbose);

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!(error = %e, "could not install Ctrl-C handler; cancellation disabled");
    }

    match &cli.command {
        Commands::Scan { dry_run } => {
            let (sender, receiver) = EventChannel::new();
            let progress = out.spawn_progress(receiver);

            let mut guard = RunGuard::begin(&store, LockName::Scan, *dry_run, &policy, cancel)?
                .with_events(&sender);
            let scanner = WalkDirScanner::new(config.scan_options());
            let fingerprinter = config.fingerprinter();
            let result = ScanRun::new(
                &store,
                &fs,
                &scanner,
                &fingerprinter,
                config.media_folders.clone(),
            )
            .excluding(config.duplicate_folders.folders())
            .with_events(sender.clone())
            .execute(&mut guard);
            guard.finish()?;

            drop(sender);
            progress.join();
            let report = result?;
            out.scan(&report);
            Ok(report.exit_status())
        }

        Commands::Dedupe { dry_run, folders } => {
            let (sender, receiver) = EventChannel::new();
            let progress = out.spawn_progress(receiver);

            let mut guard =
                RunGuard::begin(&store, LockName::Deduplicate, *dry_run, &policy, cancel)?
                    .with_events(&sender);
            let result = DedupeRun::new(&store, &fs, &config.duplicate_folders)
                .scope(folders.clone())
                .with_events(sender.clone())
                .execute(&mut guard);
            guard.finish()?;

            drop(sender);
            progress.join();
            let report = result?;
            out.dedupe(&report);
            Ok(report.exit_status())
        }

        Commands::Purge {
            dry_run,
            pattern,
            older_than_days,
            volume,
            confirm,
        } => {
            let mut filters = PurgeFilters::new();
            if let Some(pattern) = pattern {
                filters = filters.with_pattern(pattern)?;
            }
            if let Some(days) = older_than_days {
                filters = filters.older_than_days(*days);
            }
            if let Some(volume) = volume {
                filters = filters.on_volume(VolumeRoot::new(volume));
            }

            let (sender, receiver) = EventChannel::new();
            let progress = out.spawn_progress(receiver);

            let mut guard = RunGuard::begin(&store, LockName::Purge, *dry_run, &policy, cancel)?
                .with_events(&sender);
            let purge = PurgeRun::new(&store, &fs, &config.duplicate_folders, filters)
                .batch_size(config.batch_size)
                .with_events(sender.clone());

            let result = purge.plan(&mut guard).and_then(|plan| {
                let confirmation = if *dry_run || plan.targets.is_empty() {
                    None
                } else {
                    out.purge_plan(&plan);
                    Some(confirm_purge(confirm.as_deref())?)
                };
                purge.apply(plan, confirmation, &mut guard)
            });
            guard.finish()?;

            drop(sender);
            progress.join();
            let report = result?;
            out.purge(&report);
            Ok(report.exit_status())
        }

        Commands::Similar { threshold, assign } => {
            let threshold = threshold.unwrap_or(config.similarity.threshold);
            let run = SimilarRun::new(&store, threshold);
            let report = if *assign {
                // Clusters are computed under the same lock that writes them
                let mut guard =
                    RunGuard::begin(&store, LockName::Deduplicate, false, &policy, cancel)?;
                let result = run.find_and_assign(&mut guard);
                guard.finish()?;
                result?
            } else {
                run.find()?
            };
            out.similar(&report);
            Ok(ExitStatus::Success)
        }

        Commands::Locks { clear_stale } => {
            let manager = LockManager::new(&store);
            let cleared = if *clear_stale {
                Some(manager.cleanup_expired()?)
            } else {
                None
            };
            out.locks(&manager.list()?, &manager.stale()?, cleared);
            Ok(ExitStatus::Success)
        }

        Commands::Status => {
            out.status(&status(&store)?);
            Ok(ExitStatus::Success)
        }
    }
}

/// The `--confirm` value, or an interactive prompt on the terminal
fn confirm_purge(given: Option<&str>) -> Result<PurgeConfirmation, DedupError> {
    if let Some(word) = given {
        return PurgeConfirmation::parse(word);
    }

    let term = Term::stderr();
    term.write_line(&format!(
        "{} This permanently deletes the files listed above. Type {} to continue:",
        style("!").red().bold(),
        style(CONFIRMATION_WORD).bold()
    ))
    .ok();
    let line = term.read_line().map_err(|_| DedupError::NotConfirmed)?;
    PurgeConfirmation::parse(&line)
}
