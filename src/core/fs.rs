//! Narrow filesystem capability used by the planners and executors.
//!
//! Everything that touches the disk during planning or execution goes
//! through [`FileSystem`], so tests can inject failures between a move
//! and its record update.

use crate::core::scanner::{MediaFilter, MediaScanner, ScanOptions, ScanResult, WalkDirScanner};
use crate::error::ScanError;
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};

/// Size and modification time of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Filesystem operations the engine needs
pub trait FileSystem: Send + Sync {
    /// Whether anything exists at `path`
    fn exists(&self, path: &Path) -> bool;

    fn metadata(&self, path: &Path) -> io::Result<FileMeta>;

    /// Every regular file under `root`, hidden ones included
    fn list_files(&self, root: &Path, recursive: bool) -> Result<ScanResult, ScanError>;

    /// Rename `from` to `to` on the same volume.
    ///
    /// Fails with `AlreadyExists` rather than replacing an existing file.
    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// The real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.symlink_metadata().is_ok()
    }

    fn metadata(&self, path: &Path) -> io::Result<FileMeta> {
        let metadata = std::fs::metadata(path)?;
        Ok(FileMeta {
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    fn list_files(&self, root: &Path, recursive: bool) -> Result<ScanResult, ScanError> {
        let options = ScanOptions {
            recursive,
            include_hidden: true,
            ..Default::default()
        };
        WalkDirScanner::with_filter(options, MediaFilter::any_file()).scan(&[root.to_path_buf()])
    }

    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        if self.exists(to) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("destination {} already exists", to.display()),
            ));
        }
        std::fs::rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }
}

/// Paths of every file a listing found
pub fn listed_paths(result: &ScanResult) -> Vec<PathBuf> {
    result.files.iter().map(|f| f.path.clone()).collect()
}
