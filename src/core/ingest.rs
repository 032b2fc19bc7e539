//! # Ingest
//!
//! The scan operation: discover media files, fingerprint what is new or
//! changed, and record it.
//!
//! ## Rules
//! - Same path, same size and mtime as recorded: not re-hashed
//! - Same path, same content hash: left as is (metadata refreshed)
//! - Same path, different content hash: a new record is written whose
//!   `previous_version_id` points at the old one; the old one is retired
//! - New path: inserted as `scanned`
//! - A recorded file that vanished is reported as missing and left alone
//!
//! Fingerprinting runs on the worker pool; recording is single-threaded
//! and in path order, so ids follow a stable discovery order.

use crate::core::fingerprint::Fingerprinter;
use crate::core::fs::FileSystem;
use crate::core::report::{worst_status, Issue, IssueKind};
use crate::core::run::RunGuard;
use crate::core::scanner::{MediaFile, MediaScanner};
use crate::core::store::{FileRecord, NewFileRecord, RecordStore};
use crate::core::volume::normalize;
use crate::error::{DedupError, ExitStatus};
use crate::events::{Event, EventSender, FingerprintEvent, OperationSummary, Phase};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// A path whose content changed since it was recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionChange {
    pub path: PathBuf,
    pub previous_id: i64,
    /// `None` in a dry run
    pub new_id: Option<i64>,
}

/// A recorded file no longer on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingFile {
    pub record_id: i64,
    pub path: PathBuf,
}

/// Outcome of a scan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanReport {
    pub dry_run: bool,
    pub discovered: usize,
    /// New paths (with record ids once written)
    pub inserted: Vec<(PathBuf, Option<i64>)>,
    pub versioned: Vec<VersionChange>,
    /// Re-hashed, content identical
    pub refreshed: usize,
    /// Size and mtime unchanged, not re-hashed
    pub unchanged: usize,
    pub missing: Vec<MissingFile>,
    pub issues: Vec<Issue>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl ScanReport {
    pub fn exit_status(&self) -> ExitStatus {
        let status = worst_status(&self.issues);
        if self.cancelled {
            status.worst(ExitStatus::Cancelled)
        } else {
            status
        }
    }
}

/// One scan over the configured media folders
pub struct ScanRun<'a> {
    store: &'a dyn RecordStore,
    fs: &'a dyn FileSystem,
    scanner: &'a dyn MediaScanner,
    fingerprinter: &'a Fingerprinter,
    roots: Vec<PathBuf>,
    excluded: Vec<PathBuf>,
    events: EventSender,
}

impl<'a> ScanRun<'a> {
    pub fn new(
        store: &'a dyn RecordStore,
        fs: &'a dyn FileSystem,
        scanner: &'a dyn MediaScanner,
        fingerprinter: &'a Fingerprinter,
        roots: Vec<PathBuf>,
    ) -> Self {
        Self {
            store,
            fs,
            scanner,
            fingerprinter,
            roots,
            excluded: Vec::new(),
            events: crate::events::null_sender(),
        }
    }

    /// Never ingest files under these folders (the duplicate folders)
    pub fn excluding(mut self, folders: Vec<PathBuf>) -> Self {
        self.excluded = folders.iter().map(|f| normalize(f)).collect();
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    fn is_excluded(&self, path: &Path) -> bool {
        let path = normalize(path);
        self.excluded.iter().any(|folder| path.starts_with(folder))
    }

    /// Run under `guard` (the `scan` lock, or a dry-run monitor)
    pub fn execute(&self, guard: &mut RunGuard<'_>) -> Result<ScanReport, DedupError> {
        let started = Instant::now();
        let dry_run = guard.is_dry_run();
        let mut report = ScanReport {
            dry_run,
            ..Default::default()
        };

        info!(roots = self.roots.len(), dry_run, "scan started");
        self.events.started("scan", dry_run);

        self.events.phase(Phase::Discovering);
        let scan = self.scanner.scan_with_events(&self.roots, &self.events)?;
        for error in scan.errors {
            warn!(error = %error, "discovery error");
            report
                .issues
                .push(Issue::new(IssueKind::TransientIo, PathBuf::new(), error.to_string()));
        }

        let mut files: Vec<MediaFile> = scan
            .files
            .into_iter()
            .filter(|f| !self.is_excluded(&f.path))
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        report.discovered = files.len();

        let known: HashMap<PathBuf, FileRecord> = self
            .store
            .list_active_files()?
            .into_iter()
            .map(|r| (r.path.clone(), r))
            .collect();

        let mut to_hash = Vec::new();
        for file in &files {
            match known.get(&file.path) {
                Some(record) if is_unchanged(record, file) => report.unchanged += 1,
                _ => to_hash.push(file.path.clone()),
            }
        }
        debug!(
            discovered = files.len(),
            unchanged = report.unchanged,
            to_hash = to_hash.len(),
            "change detection done"
        );

        guard.checkpoint()?;
        self.events.phase(Phase::Fingerprinting);
        let mut outcomes =
            self.fingerprinter
                .fingerprint_all(&to_hash, &self.events, || guard.checkpoint())?;
        outcomes.sort_by(|a, b| a.path.cmp(&b.path));
        self.events.send(Event::Fingerprint(FingerprintEvent::Completed {
            fingerprinted: outcomes.len(),
            unchanged: report.unchanged,
        }));

        let by_path: HashMap<&Path, &MediaFile> =
            files.iter().map(|f| (f.path.as_path(), f)).collect();

        self.events.phase(Phase::Recording);
        for outcome in outcomes {
            match guard.checkpoint() {
                Err(DedupError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                other => other?,
            }

            let fingerprint = match outcome.result {
                Ok(fp) => fp,
                Err(e) => {
                    report
                        .issues
                        .push(Issue::new(IssueKind::TransientIo, &outcome.path, e.to_string()));
                    continue;
                }
            };
            let Some(file) = by_path.get(outcome.path.as_path()) else {
                continue;
            };

            let new_record = NewFileRecord {
                path: file.path.clone(),
                size: file.size,
                modified: file.modified,
                content_hash: fingerprint.content_hash,
                similarity_hash: fingerprint.similarity_hash,
            };

            if let Err(e) = self.record(known.get(&file.path), new_record, dry_run, &mut report) {
                warn!(path = %file.path.display(), error = %e, "failed to record file");
                report
                    .issues
                    .push(Issue::new(IssueKind::Store, &file.path, e.to_string()));
            }
        }

        if guard.cancellation().is_cancelled() {
            report.cancelled = true;
        }

        if !report.cancelled {
            report.missing = self.find_missing(&known, &by_path);
            for missing in &report.missing {
                warn!(id = missing.record_id, path = %missing.path.display(), "recorded file is missing");
            }
        }

        if dry_run {
            guard.verify()?;
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            discovered = report.discovered,
            inserted = report.inserted.len(),
            versioned = report.versioned.len(),
            unchanged = report.unchanged,
            missing = report.missing.len(),
            issues = report.issues.len(),
            cancelled = report.cancelled,
            "scan finished"
        );
        self.finish(&report);
        Ok(report)
    }

    fn record(
        &self,
        existing: Option<&FileRecord>,
        new_record: NewFileRecord,
        dry_run: bool,
        report: &mut ScanReport,
    ) -> Result<(), crate::error::StoreError> {
        match existing {
            Some(record) if record.content_hash == new_record.content_hash => {
                if !dry_run {
                    self.store
                        .touch_scanned(record.id, new_record.size, new_record.modified)?;
                }
                report.refreshed += 1;
            }
            Some(record) => {
                let new_id = if dry_run {
                    None
                } else {
                    Some(self.store.insert_version(record.id, &new_record)?.id)
                };
                debug!(path = %new_record.path.display(), previous_id = record.id, ?new_id, "content changed");
                report.versioned.push(VersionChange {
                    path: new_record.path,
                    previous_id: record.id,
                    new_id,
                });
            }
            None => {
                let new_id = if dry_run {
                    None
                } else {
                    Some(self.store.insert_file(&new_record)?.id)
                };
                report.inserted.push((new_record.path, new_id));
            }
        }
        Ok(())
    }

    fn find_missing(
        &self,
        known: &HashMap<PathBuf, FileRecord>,
        discovered: &HashMap<&Path, &MediaFile>,
    ) -> Vec<MissingFile> {
        let roots: Vec<PathBuf> = self.roots.iter().map(|r| normalize(r)).collect();
        let mut missing: Vec<MissingFile> = known
            .values()
            .filter(|r| roots.iter().any(|root| normalize(&r.path).starts_with(root)))
            .filter(|r| !self.is_excluded(&r.path))
            .filter(|r| !discovered.contains_key(r.path.as_path()))
            .filter(|r| !self.fs.exists(&r.path))
            .map(|r| MissingFile {
                record_id: r.id,
                path: r.path.clone(),
            })
            .collect();
        missing.sort_by_key(|m| m.record_id);
        missing
    }

    fn finish(&self, report: &ScanReport) {
        self.events.finished(
            OperationSummary {
                operation: "scan".to_string(),
                processed: report.inserted.len() + report.versioned.len() + report.refreshed,
                errors: report.issues.len(),
                bytes: 0,
                duration_ms: report.duration_ms,
            },
            report.cancelled,
        );
    }
}

fn is_unchanged(record: &FileRecord, file: &MediaFile) -> bool {
    record.size == file.size
        && record.modified.is_some()
        && record.modified.map(|t| t.timestamp_millis())
            == file.modified.map(|t| t.timestamp_millis())
}
