//! Rendering of progress and reports.

use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use media_dedup::core::dedupe::{DedupeReport, MoveAction};
use media_dedup::core::ingest::ScanReport;
use media_dedup::core::purge::{PurgePlan, PurgeReport};
use media_dedup::core::report::Issue;
use media_dedup::core::similar::SimilarReport;
use media_dedup::core::status::StatusReport;
use media_dedup::core::store::LockRecord;
use media_dedup::events::{
    DedupeEvent, Event, EventReceiver, FingerprintEvent, LockEvent, OperationEvent, PurgeEvent,
    ScanEvent,
};
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use std::thread::{self, JoinHandle};

pub struct Output {
    json: bool,
    verbose: bool,
    term: Term,
}

/// Background thread draining the event channel
pub struct Progress {
    handle: Option<JoinHandle<()>>,
}

impl Progress {
    /// Wait for the renderer; call after dropping the last sender
    pub fn join(self) {
        if let Some(handle) = self.handle {
            handle.join().ok();
        }
    }
}

impl Output {
    pub fn new(json: bool, verbose: bool) -> Self {
        Self {
            json,
            verbose,
            term: Term::stderr(),
        }
    }

    /// Render events as a progress bar. JSON mode just drains them.
    pub fn spawn_progress(&self, receiver: EventReceiver) -> Progress {
        let verbose = self.verbose;
        let bar = if self.json {
            None
        } else {
            let pb = ProgressBar::new(0);
            let bar_style = ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .map(|s| s.progress_chars("█▓░"))
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            pb.set_style(bar_style);
            Some(pb)
        };

        let handle = thread::spawn(move || {
            for event in receiver.iter() {
                let Some(pb) = &bar else { continue };
                match event {
                    Event::Operation(OperationEvent::PhaseChanged { phase }) => {
                        pb.set_message(phase.to_string());
                    }
                    Event::Scan(ScanEvent::Progress(p)) => {
                        pb.set_message(format!("discovering ({} files)", p.files_found));
                    }
                    Event::Fingerprint(FingerprintEvent::Started { total_files }) => {
                        pb.set_length(total_files as u64);
                        pb.set_position(0);
                    }
                    Event::Fingerprint(FingerprintEvent::Progress(p)) => {
                        pb.set_position(p.completed as u64);
                        if verbose {
                            pb.set_message(file_name(&p.current_path));
                        }
                    }
                    Event::Fingerprint(FingerprintEvent::Error { path, message }) if verbose => {
                        pb.println(format!("  {} {}: {}", style("!").yellow(), path.display(), message));
                    }
                    Event::Dedupe(DedupeEvent::Planned { moves, .. }) => {
                        pb.set_length(moves as u64);
                        pb.set_position(0);
                    }
                    Event::Dedupe(DedupeEvent::Moved { to, .. }) => {
                        pb.inc(1);
                        if verbose {
                            pb.set_message(file_name(&to));
                        }
                    }
                    Event::Dedupe(DedupeEvent::Failed { .. }) => pb.inc(1),
                    Event::Purge(PurgeEvent::Classified { targets, .. }) => {
                        pb.set_length(targets as u64);
                        pb.set_position(0);
                    }
                    Event::Purge(PurgeEvent::Purged { .. }) | Event::Purge(PurgeEvent::Failed { .. }) => {
                        pb.inc(1)
                    }
                    Event::Lock(LockEvent::Acquired { name }) if verbose => {
                        pb.println(format!("  {} lock '{}' acquired", style("●").dim(), name));
                    }
                    Event::Lock(LockEvent::Watching { name }) if verbose => {
                        pb.println(format!("  {} dry run watching lock '{}'", style("○").dim(), name));
                    }
                    Event::Operation(OperationEvent::Completed { .. })
                    | Event::Operation(OperationEvent::Cancelled) => pb.finish_and_clear(),
                    _ => {}
                }
            }
            if let Some(pb) = &bar {
                pb.finish_and_clear();
            }
        });

        Progress {
            handle: Some(handle),
        }
    }

    pub fn scan(&self, report: &ScanReport) {
        if self.print_json(report) {
            return;
        }
        self.header(report.dry_run, "Scan", report.cancelled);
        self.line(format!(
            "  {} files found in {:.1}s",
            style(report.discovered).cyan(),
            report.duration_ms as f64 / 1000.0
        ));
        self.line(format!("  {} new", style(report.inserted.len()).cyan()));
        self.line(format!("  {} changed (new version recorded)", style(report.versioned.len()).cyan()));
        self.line(format!(
            "  {} unchanged",
            style(report.unchanged + report.refreshed).dim()
        ));
        if !report.missing.is_empty() {
            self.line(format!(
                "  {} recorded files are missing from disk",
                style(report.missing.len()).yellow()
            ));
            if self.verbose {
                for missing in &report.missing {
                    self.line(format!("    #{} {}", missing.record_id, display_path(&missing.path)));
                }
            }
        }
        self.issues(&report.issues);
    }

    pub fn dedupe(&self, report: &DedupeReport) {
        if self.print_json(report) {
            return;
        }
        self.header(report.dry_run, "Dedupe", report.cancelled);
        let plan = &report.plan;
        self.line(format!(
            "  {} duplicate groups, {} files to move ({})",
            style(plan.groups.len()).cyan(),
            style(plan.move_count()).cyan(),
            style(format_bytes(plan.bytes_to_move())).yellow()
        ));

        if report.dry_run || self.verbose {
            for group in &plan.groups {
                if group.moves.is_empty()
                    && group.failure.is_none()
                    && group.rejected.is_empty()
                    && group.restore_survivor.is_none()
                {
                    continue;
                }
                self.line(String::new());
                self.line(format!(
                    "  {} {} {}",
                    style("★").green(),
                    style(format!("#{}", group.survivor_id)).bold(),
                    display_path(&group.survivor_path)
                ));
                if let Some(failure) = &group.failure {
                    self.line(format!("    {} {}", style("✗").red(), failure.message));
                }
                if let Some(restore) = &group.restore_survivor {
                    self.line(format!(
                        "    {} back to {}",
                        style("↩").green(),
                        display_path(&restore.destination)
                    ));
                }
                for planned in &group.moves {
                    let verb = match planned.action {
                        MoveAction::Move => "→",
                        MoveAction::Relink => "=",
                    };
                    self.line(format!(
                        "    {} #{} {} {} {}",
                        style("○").dim(),
                        planned.record_id,
                        display_path(&planned.source),
                        verb,
                        display_path(&planned.destination)
                    ));
                }
                for rejected in &group.rejected {
                    self.line(format!("    {} {}", style("!").yellow(), rejected.message));
                }
            }
        }

        if let Some(applied) = &report.applied {
            self.line(String::new());
            self.line(format!(
                "  {} moved, {} relinked, {} reclaimed from originals",
                style(applied.moved).green(),
                style(applied.relinked).green(),
                style(format_bytes(applied.bytes_moved)).yellow()
            ));
            if applied.restored > 0 {
                self.line(format!(
                    "  {} survivors moved back out of duplicate folders",
                    style(applied.restored).green()
                ));
            }
        }
        self.issues(&report.issues());
    }

    /// The plan, shown before asking for confirmation
    pub fn purge_plan(&self, plan: &PurgePlan) {
        if self.json {
            return;
        }
        self.line(format!(
            "{} {} files ({}) will be permanently deleted:",
            style("Purge").bold(),
            style(plan.targets.len()).red().bold(),
            format_bytes(plan.bytes())
        ));
        for target in &plan.targets {
            self.line(format!("    {}", display_path(&target.path)));
        }
        if !plan.orphaned.is_empty() {
            self.line(format!(
                "  {} orphaned files have no record and will be kept",
                style(plan.orphaned.len()).yellow()
            ));
        }
        if !plan.protected.is_empty() {
            self.line(format!(
                "  {} files may be the last copy of their content and will be kept",
                style(plan.protected.len()).yellow()
            ));
        }
    }

    pub fn purge(&self, report: &PurgeReport) {
        if self.print_json(report) {
            return;
        }
        self.header(report.dry_run, "Purge", report.cancelled);
        let plan = &report.plan;
        if report.dry_run {
            self.line(format!(
                "  {} files would be deleted ({})",
                style(plan.targets.len()).cyan(),
                style(format_bytes(plan.bytes())).yellow()
            ));
            for target in &plan.targets {
                self.line(format!("    {}", display_path(&target.path)));
            }
        } else {
            self.line(format!(
                "  {} files deleted, {} reclaimed",
                style(report.purged).green(),
                style(format_bytes(report.bytes_reclaimed)).yellow()
            ));
        }
        if plan.filtered_out > 0 {
            self.line(format!("  {} registered files excluded by filters", plan.filtered_out));
        }
        if report.orphaned_skipped > 0 {
            self.line(format!(
                "  {} orphaned files skipped; they have no record and need manual review",
                style(report.orphaned_skipped).yellow()
            ));
            if self.verbose {
                for orphan in &plan.orphaned {
                    self.line(format!("    {}", display_path(&orphan.path)));
                }
            }
        }
        if report.protected_skipped > 0 {
            self.line(format!(
                "  {} files kept because they may be the last copy of their content",
                style(report.protected_skipped).yellow()
            ));
        }
        self.issues(&report.issues);
    }

    pub fn similar(&self, report: &SimilarReport) {
        if self.print_json(report) {
            return;
        }
        self.line(format!(
            "{} {} clusters among {} images (threshold {})",
            style("Similar").bold().cyan(),
            style(report.clusters.len()).cyan(),
            report.records_considered,
            report.threshold
        ));
        for cluster in &report.clusters {
            self.line(String::new());
            self.line(format!(
                "  {} #{} {} ({})",
                style("★").green(),
                cluster.reference.record_id,
                display_path(&cluster.reference.path),
                format_bytes(cluster.total_size())
            ));
            for member in &cluster.members {
                self.line(format!(
                    "    {} #{} {} {:.1}%",
                    style("○").dim(),
                    member.record_id,
                    display_path(&member.path),
                    member.similarity_percent
                ));
            }
        }
        if let Some(assigned) = report.assigned {
            self.line(format!("  {} records labelled with related_id", style(assigned).green()));
        }
    }

    pub fn locks(&self, live: &[LockRecord], stale: &[LockRecord], cleared: Option<usize>) {
        if self.json {
            self.print_value(&json!({
                "live": live,
                "stale": stale,
                "cleared": cleared,
            }));
            return;
        }
        if live.is_empty() {
            self.line(format!("{} no locks held", style("✓").green()));
        }
        for lock in live {
            self.line(format!(
                "  {} {} held by {} since {} (expires {})",
                style("●").yellow(),
                style(&lock.name).bold(),
                lock.holder,
                lock.acquired_at.format("%Y-%m-%d %H:%M:%S UTC"),
                lock.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }
        for lock in stale {
            self.line(format!(
                "  {} {} expired (was held by {})",
                style("○").dim(),
                lock.name,
                lock.holder
            ));
        }
        if let Some(cleared) = cleared {
            self.line(format!("  {} stale locks removed", cleared));
        }
    }

    pub fn status(&self, report: &StatusReport) {
        if self.print_json(report) {
            return;
        }
        let counts = &report.counts;
        self.line(format!("{}", style("Records").bold().underlined()));
        self.line(format!("  new        {}", counts.new));
        self.line(format!("  scanned    {}", counts.scanned));
        self.line(format!("  duplicate  {}", counts.duplicate));
        self.line(format!("  deleted    {}", counts.deleted));
        self.line(format!(
            "  {} duplicate groups pending ({} files)",
            style(report.pending_groups).cyan(),
            report.pending_candidates
        ));
        self.locks(&report.live_locks, &report.stale_locks, None);
    }

    fn header(&self, dry_run: bool, operation: &str, cancelled: bool) {
        let mut title = format!("{} {}", style("✓").green().bold(), operation);
        if dry_run {
            title.push_str(&format!(" {}", style("(dry run, nothing changed)").dim()));
        }
        if cancelled {
            title = format!("{} {} cancelled", style("!").yellow().bold(), operation);
        }
        self.line(String::new());
        self.line(title);
    }

    fn issues(&self, issues: &[Issue]) {
        if issues.is_empty() {
            return;
        }
        self.line(String::new());
        self.line(format!("{} {} problems:", style("!").yellow().bold(), issues.len()));
        for issue in issues {
            let id = issue
                .record_id
                .map(|id| format!("#{} ", id))
                .unwrap_or_default();
            self.line(format!(
                "    {} {}{}: {}",
                style(format!("{:?}", issue.kind)).red(),
                id,
                display_path(&issue.path),
                issue.message
            ));
        }
    }

    fn print_json<T: Serialize>(&self, value: &T) -> bool {
        if self.json {
            self.print_value(value);
        }
        self.json
    }

    fn print_value<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                self.term
                    .write_line(&format!("{} cannot encode JSON: {}", style("error:").red(), e))
                    .ok();
            }
        }
    }

    fn line(&self, text: String) {
        self.term.write_line(&text).ok();
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned()
}

fn display_path(path: &Path) -> String {
    match dirs::home_dir() {
        Some(home) => match path.strip_prefix(&home) {
            Ok(rest) => format!("~/{}", rest.display()),
            Err(_) => path.display().to_string(),
        },
        None => path.display().to_string(),
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
