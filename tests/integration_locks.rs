//! Integration tests for named locks across processes sharing one database.
//!
//! Two `SqliteStore` handles on the same file stand in for two processes.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{add_file, begin, policy};
use media_dedup::core::fingerprint::Fingerprinter;
use media_dedup::core::lock::{LockManager, LockOutcome};
use media_dedup::core::purge::{PurgeFilters, PurgeRun};
use media_dedup::core::store::{LockAttempt, LockHolder, RecordStore, SqliteStore};
use media_dedup::core::{
    CancellationToken, DuplicateFolders, LocalFileSystem, LockName, RunGuard, VolumeRoot,
};
use media_dedup::error::{DedupError, ExitStatus};
use media_dedup::events::null_sender;
use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn shared_db() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("records.db");
    (dir, path)
}

#[test]
fn exactly_one_concurrent_acquire_wins() {
    let (_dir, db) = shared_db();
    // Create the schema before racing
    SqliteStore::open(&db).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (1..=2u32)
        .map(|pid| {
            let db = db.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let store = SqliteStore::open(&db).unwrap();
                let manager = LockManager::new(&store);
                barrier.wait();
                let outcome = manager
                    .acquire(
                        LockName::Purge,
                        &LockHolder::new(pid, "host"),
                        Duration::from_secs(60),
                    )
                    .unwrap();
                matches!(outcome, LockOutcome::Acquired(_))
            })
        })
        .collect();

    let wins: usize = handles
        .into_iter()
        .map(|h| h.join().unwrap() as usize)
        .sum();
    assert_eq!(wins, 1);
}

#[test]
fn busy_reports_first_holder() {
    let (_dir, db) = shared_db();
    let process_a = SqliteStore::open(&db).unwrap();
    let process_b = SqliteStore::open(&db).unwrap();

    let _held = begin(&process_a, LockName::Purge, false, 100).unwrap();
    let err = begin(&process_b, LockName::Purge, false, 200).unwrap_err();

    match &err {
        DedupError::Busy { name, holder, .. } => {
            assert_eq!(name, "purge");
            assert!(holder.contains("100"), "{}", holder);
            assert!(holder.contains("test-host"));
        }
        other => panic!("expected Busy, got {:?}", other),
    }
    assert_eq!(err.exit_status(), ExitStatus::Busy);
}

#[test]
fn destructive_operations_exclude_each_other() {
    let (_dir, db) = shared_db();
    let process_a = SqliteStore::open(&db).unwrap();
    let process_b = SqliteStore::open(&db).unwrap();

    let _dedupe = begin(&process_a, LockName::Deduplicate, false, 1).unwrap();

    assert!(matches!(
        begin(&process_b, LockName::Purge, false, 2),
        Err(DedupError::Busy { .. })
    ));
    assert!(matches!(
        begin(&process_b, LockName::Scan, false, 2),
        Err(DedupError::Busy { .. })
    ));
    // A refused attempt leaves no lock of its own behind
    let names: Vec<String> = process_b
        .list_locks()
        .unwrap()
        .into_iter()
        .map(|l| l.name)
        .collect();
    assert_eq!(names, vec!["deduplicate".to_string()]);
}

#[test]
fn stale_lock_is_reclaimed_without_release() {
    let (_dir, db) = shared_db();
    let crashed = SqliteStore::open(&db).unwrap();
    let now = Utc::now();
    let attempt = crashed
        .try_acquire_lock(
            "purge",
            &LockHolder::new(9, "gone"),
            now - ChronoDuration::hours(3),
            now - ChronoDuration::hours(1),
        )
        .unwrap();
    assert!(matches!(attempt, LockAttempt::Acquired(_)));
    drop(crashed);

    let fresh = SqliteStore::open(&db).unwrap();
    let guard = begin(&fresh, LockName::Purge, false, 10).unwrap();

    let held = LockManager::new(&fresh)
        .is_held(LockName::Purge)
        .unwrap()
        .unwrap();
    assert_eq!(held.holder.pid, 10);
    guard.finish().unwrap();
}

#[test]
fn dry_run_refuses_to_start_while_lock_is_held() {
    let (_dir, db) = shared_db();
    let process_a = SqliteStore::open(&db).unwrap();
    let process_c = SqliteStore::open(&db).unwrap();

    let _live = begin(&process_a, LockName::Purge, false, 1).unwrap();

    assert!(matches!(
        begin(&process_c, LockName::Purge, true, 3),
        Err(DedupError::Busy { .. })
    ));
}

#[test]
fn dry_run_purge_aborts_when_purge_lock_appears() {
    let (dir, db) = shared_db();
    let process_b = SqliteStore::open(&db).unwrap();
    let process_c = SqliteStore::open(&db).unwrap();
    let dups = dir.path().join("duplicates");
    let mut folders = DuplicateFolders::new();
    folders.insert(VolumeRoot::new(dir.path()), &dups);
    add_file(&process_c, &dups.join("a.jpg"), b"a");

    let mut dry = RunGuard::begin(
        &process_c,
        LockName::Purge,
        true,
        &policy(3),
        CancellationToken::new(),
    )
    .unwrap();

    // Another process starts a real purge while the dry run is running
    let _live = begin(&process_b, LockName::Purge, false, 2).unwrap();

    let err = PurgeRun::new(&process_c, &LocalFileSystem, &folders, PurgeFilters::new())
        .execute(None, &mut dry)
        .unwrap_err();

    match err {
        DedupError::DryRunInterrupted { name, holder } => {
            assert_eq!(name, "purge");
            assert!(holder.contains("PID 2"));
        }
        other => panic!("expected DryRunInterrupted, got {:?}", other),
    }
    assert!(dups.join("a.jpg").exists());
}

#[test]
fn concurrent_dry_runs_do_not_block_each_other() {
    let (_dir, db) = shared_db();
    let one = SqliteStore::open(&db).unwrap();
    let two = SqliteStore::open(&db).unwrap();

    let first = begin(&one, LockName::Deduplicate, true, 1);
    let second = begin(&two, LockName::Deduplicate, true, 2);

    assert!(first.is_ok());
    assert!(second.is_ok());
    assert!(one.list_locks().unwrap().is_empty());
}

fn media_files(dir: &TempDir, n: usize) -> Vec<PathBuf> {
    (0..n)
        .map(|i| {
            let path = dir.path().join(format!("IMG_{:04}.jpg", i));
            std::fs::write(&path, format!("frame {}", i)).unwrap();
            path
        })
        .collect()
}

#[test]
fn short_lease_outlives_a_slow_fingerprint_phase() {
    let (dir, db) = shared_db();
    let scanner = SqliteStore::open(&db).unwrap();
    let rival = SqliteStore::open(&db).unwrap();
    let paths = media_files(&dir, 12);
    let mut short = policy(1);
    short.scan_timeout = Duration::from_millis(300);
    let mut guard = RunGuard::begin(
        &scanner,
        LockName::Scan,
        false,
        &short,
        CancellationToken::new(),
    )
    .unwrap();

    // Twelve slow files take well over twice the lease
    let outcomes = Fingerprinter::new()
        .workers(1)
        .fingerprint_all(&paths, &null_sender(), || {
            thread::sleep(Duration::from_millis(60));
            guard.checkpoint()
        })
        .unwrap();

    assert_eq!(outcomes.len(), 12);
    let attempt = LockManager::new(&rival)
        .acquire(LockName::Scan, &LockHolder::new(2, "test-host"), Duration::from_secs(60))
        .unwrap();
    assert!(matches!(attempt, LockOutcome::Busy(ref held) if held.holder.pid == 1));
    guard.finish().unwrap();
}

#[test]
fn dry_run_fingerprinting_stops_when_scan_lock_appears() {
    let (dir, db) = shared_db();
    let watcher = SqliteStore::open(&db).unwrap();
    let rival = SqliteStore::open(&db).unwrap();
    let paths = media_files(&dir, 8);
    let mut dry = RunGuard::begin(
        &watcher,
        LockName::Scan,
        true,
        &policy(3),
        CancellationToken::new(),
    )
    .unwrap();
    let mut calls = 0;

    let err = Fingerprinter::new()
        .workers(1)
        .fingerprint_all(&paths, &null_sender(), || {
            calls += 1;
            if calls == 3 {
                LockManager::new(&rival)
                    .acquire(LockName::Scan, &LockHolder::new(2, "test-host"), Duration::from_secs(60))
                    .unwrap();
            }
            dry.checkpoint()
        })
        .unwrap_err();

    assert!(matches!(err, DedupError::DryRunInterrupted { ref name, .. } if name == "scan"));
    assert_eq!(calls, 3);
}
