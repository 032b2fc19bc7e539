//! # Config Module
//!
//! Loads, normalises and validates the JSON configuration file.
//!
//! ## Shape
//! ```json
//! {
//!   "database": "/var/lib/media-dedup/records.db",
//!   "media_folders": ["/mnt/a/photos", "/mnt/b/camera"],
//!   "duplicate_folders": {
//!     "/mnt/a": "/mnt/a/duplicates",
//!     "/mnt/b": "/mnt/b/duplicates"
//!   },
//!   "scan": { "extensions": ["jpg", "mov"], "min_size": 1024 },
//!   "workers": 4,
//!   "lock_timeouts": { "scan": 21600, "deduplicate": 7200, "purge": 7200 }
//! }
//! ```
//!
//! The legacy `"duplicate_folder": "/data/dups"` form is accepted and turned
//! into a one-entry volume map here, so nothing downstream has to care
//! which form was written. Every problem is collected and reported in a
//! single `ConfigError::Invalid`.

use crate::core::fingerprint::{Fingerprinter, SimilarityAlgorithm, SimilarityHasher};
use crate::core::lock::LockPolicy;
use crate::core::purge::MAX_BATCH_SIZE;
use crate::core::scanner::ScanOptions;
use crate::core::volume::{DuplicateFolders, VolumeRoot};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// File discovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Extensions to include; defaults to common image and video types
    pub extensions: Option<Vec<String>>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub recursive: bool,
    pub include_hidden: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            extensions: None,
            min_size: None,
            max_size: None,
            recursive: true,
            include_hidden: false,
        }
    }
}

/// Lock lease lengths in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockTimeouts {
    pub scan: u64,
    pub deduplicate: u64,
    pub purge: u64,
}

impl Default for LockTimeouts {
    fn default() -> Self {
        Self {
            scan: 6 * 60 * 60,
            deduplicate: 2 * 60 * 60,
            purge: 2 * 60 * 60,
        }
    }
}

/// Near-duplicate settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilaritySettings {
    /// Compute similarity hashes while scanning
    pub enabled: bool,
    pub algorithm: SimilarityAlgorithm,
    pub hash_size: u32,
    /// Maximum Hamming distance for two images to cluster together
    pub threshold: u32,
}

impl Default for SimilaritySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: SimilarityAlgorithm::Difference,
            hash_size: 8,
            threshold: 5,
        }
    }
}

/// The file as written, before normalisation
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    database: Option<PathBuf>,
    media_folders: Vec<PathBuf>,
    duplicate_folders: Option<BTreeMap<String, PathBuf>>,
    duplicate_folder: Option<PathBuf>,
    scan: ScanSettings,
    workers: Option<usize>,
    lock_timeouts: LockTimeouts,
    dry_run_poll_interval_secs: Option<u64>,
    batch_size: Option<usize>,
    similarity: SimilaritySettings,
}

/// Validated configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppConfig {
    pub database: PathBuf,
    pub media_folders: Vec<PathBuf>,
    pub duplicate_folders: DuplicateFolders,
    pub scan: ScanSettings,
    pub workers: usize,
    pub lock_timeouts: LockTimeouts,
    pub dry_run_poll_interval: Duration,
    /// Paths per batch when matching purge candidates against the store
    pub batch_size: usize,
    pub similarity: SimilaritySettings,
}

impl AppConfig {
    /// Read, parse and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = Self::from_json(&text, path)?;
        debug!(path = %path.display(), volumes = config.duplicate_folders.len(), "configuration loaded");
        Ok(config)
    }

    /// Parse and validate JSON text; `origin` is only used in messages
    pub fn from_json(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let mut problems = Vec::new();

        let duplicate_folders = match (raw.duplicate_folders, raw.duplicate_folder) {
            (Some(_), Some(_)) => {
                problems.push(
                    "set either duplicate_folders or the legacy duplicate_folder, not both"
                        .to_string(),
                );
                DuplicateFolders::new()
            }
            (Some(map), None) => {
                let mut folders = DuplicateFolders::new();
                for (volume, folder) in map {
                    if let Some(previous) = folders.insert(VolumeRoot::new(&volume), &folder) {
                        problems.push(format!(
                            "volume {} is configured more than once ({} and {})",
                            volume,
                            previous.display(),
                            folder.display()
                        ));
                    }
                }
                folders
            }
            (None, Some(folder)) => {
                if folder.is_absolute() {
                    DuplicateFolders::from_single_folder(&folder)
                } else {
                    problems.push(format!(
                        "duplicate folder {} is not an absolute path",
                        folder.display()
                    ));
                    DuplicateFolders::new()
                }
            }
            (None, None) => DuplicateFolders::new(),
        };

        problems.extend(duplicate_folders.problems(&raw.media_folders));

        let workers = raw.workers.unwrap_or_else(default_workers);
        if workers == 0 {
            problems.push("workers must be at least 1".to_string());
        }

        let batch_size = raw.batch_size.unwrap_or(500);
        if batch_size == 0 {
            problems.push("batch_size must be at least 1".to_string());
        } else if batch_size > MAX_BATCH_SIZE {
            problems.push(format!(
                "batch_size {} is larger than the maximum of {}",
                batch_size, MAX_BATCH_SIZE
            ));
        }

        let poll_secs = raw.dry_run_poll_interval_secs.unwrap_or(60);
        if poll_secs == 0 {
            problems.push("dry_run_poll_interval_secs must be greater than 0".to_string());
        }

        for (name, secs) in [
            ("scan", raw.lock_timeouts.scan),
            ("deduplicate", raw.lock_timeouts.deduplicate),
            ("purge", raw.lock_timeouts.purge),
        ] {
            if secs == 0 {
                problems.push(format!("lock_timeouts.{} must be greater than 0", name));
            }
        }

        if let (Some(min), Some(max)) = (raw.scan.min_size, raw.scan.max_size) {
            if min > max {
                problems.push(format!(
                    "scan.min_size ({}) is larger than scan.max_size ({})",
                    min, max
                ));
            }
        }

        if raw.similarity.hash_size < 2 {
            problems.push("similarity.hash_size must be at least 2".to_string());
        }

        let database = raw.database.unwrap_or_else(default_database_path);

        if !problems.is_empty() {
            return Err(ConfigError::Invalid { problems });
        }

        Ok(Self {
            database,
            media_folders: raw.media_folders,
            duplicate_folders,
            scan: raw.scan,
            workers,
            lock_timeouts: raw.lock_timeouts,
            dry_run_poll_interval: Duration::from_secs(poll_secs),
            batch_size,
            similarity: raw.similarity,
        })
    }

    /// Lock leases and polling for this configuration
    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            scan_timeout: Duration::from_secs(self.lock_timeouts.scan),
            deduplicate_timeout: Duration::from_secs(self.lock_timeouts.deduplicate),
            purge_timeout: Duration::from_secs(self.lock_timeouts.purge),
            poll_interval: self.dry_run_poll_interval,
            ..LockPolicy::default()
        }
    }

    /// Scanner options for the media folders
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            recursive: self.scan.recursive,
            include_hidden: self.scan.include_hidden,
            extensions: self.scan.extensions.clone(),
            min_size: self.scan.min_size,
            max_size: self.scan.max_size,
            ..ScanOptions::default()
        }
    }

    /// Fingerprinter sized to the worker pool
    pub fn fingerprinter(&self) -> Fingerprinter {
        let fingerprinter = Fingerprinter::new().workers(self.workers);
        if self.similarity.enabled {
            fingerprinter.with_similarity(SimilarityHasher::new(
                self.similarity.algorithm,
                self.similarity.hash_size,
            ))
        } else {
            fingerprinter
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// `<data dir>/media-dedup/records.db`
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("media-dedup")
        .join("records.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<AppConfig, ConfigError> {
        AppConfig::from_json(json, Path::new("config.json"))
    }

    fn problems(json: &str) -> Vec<String> {
        match parse(json) {
            Err(ConfigError::Invalid { problems }) => problems,
            other => panic!("expected invalid config, got {:?}", other),
        }
    }

    #[test]
    fn per_volume_mapping_parses_with_defaults() {
        let config = parse(
            r#"{
                "media_folders": ["/mnt/a/photos"],
                "duplicate_folders": { "/mnt/a": "/mnt/a/duplicates" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.batch_size, 500);
        assert_eq!(config.dry_run_poll_interval, Duration::from_secs(60));
        assert_eq!(config.lock_timeouts.scan, 21600);
        assert_eq!(config.lock_timeouts.purge, 7200);
        assert!(config.scan.recursive);
        assert_eq!(config.similarity.threshold, 5);
        assert!(config.workers >= 1);
        assert_eq!(
            config
                .duplicate_folders
                .safe_folder_for(Path::new("/mnt/a/photos/x.jpg"))
                .unwrap(),
            Path::new("/mnt/a/duplicates")
        );
    }

    #[test]
    fn legacy_single_folder_is_normalised() {
        let config = parse(
            r#"{
                "media_folders": ["/home/me/photos"],
                "duplicate_folder": "/home/me/duplicates"
            }"#,
        )
        .unwrap();

        assert_eq!(config.duplicate_folders.len(), 1);
        assert_eq!(
            config.duplicate_folders.folders(),
            vec![PathBuf::from("/home/me/duplicates")]
        );
    }

    #[test]
    fn both_forms_at_once_are_rejected() {
        let problems = problems(
            r#"{
                "duplicate_folder": "/dups",
                "duplicate_folders": { "/": "/dups" }
            }"#,
        );
        assert!(problems.iter().any(|p| p.contains("not both")));
    }

    #[test]
    fn equivalent_volume_keys_are_rejected() {
        let problems = problems(
            r#"{
                "duplicate_folders": {
                    "/mnt/a": "/mnt/a/dups",
                    "/mnt/a/": "/mnt/a/other"
                }
            }"#,
        );
        assert!(problems.iter().any(|p| p.contains("more than once")));
    }

    #[test]
    fn every_problem_is_reported_together() {
        let problems = problems(
            r#"{
                "media_folders": ["/srv/photos"],
                "duplicate_folders": { "/mnt/a": "/mnt/b/dups" },
                "workers": 0,
                "batch_size": 0,
                "lock_timeouts": { "purge": 0 }
            }"#,
        );

        assert!(problems.iter().any(|p| p.contains("/srv/photos")));
        assert!(problems.iter().any(|p| p.contains("/mnt/b/dups")));
        assert!(problems.iter().any(|p| p.contains("workers")));
        assert!(problems.iter().any(|p| p.contains("batch_size")));
        assert!(problems.iter().any(|p| p.contains("lock_timeouts.purge")));
    }

    #[test]
    fn batch_size_above_the_store_parameter_limit_is_rejected() {
        let problems = problems(
            r#"{
                "media_folders": ["/mnt/a/photos"],
                "duplicate_folders": { "/mnt/a": "/mnt/a/dups" },
                "batch_size": 40000
            }"#,
        );

        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("batch_size 40000"));
    }

    #[test]
    fn missing_mapping_is_rejected() {
        let problems = problems(r#"{ "media_folders": ["/mnt/a"] }"#);
        assert!(problems.iter().any(|p| p.contains("no duplicate folders")));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(parse("{ nope"), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn lock_policy_uses_configured_timeouts() {
        let config = parse(
            r#"{
                "duplicate_folders": { "/mnt/a": "/mnt/a/dups" },
                "lock_timeouts": { "scan": 10, "deduplicate": 20, "purge": 30 },
                "dry_run_poll_interval_secs": 5
            }"#,
        )
        .unwrap();

        let policy = config.lock_policy();

        assert_eq!(policy.scan_timeout, Duration::from_secs(10));
        assert_eq!(policy.purge_timeout, Duration::from_secs(30));
        assert_eq!(policy.poll_interval, Duration::from_secs(5));
    }
}
