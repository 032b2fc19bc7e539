//! # Scanner Module
//!
//! Discovers media files in directories.
//!
//! ## Default Formats
//! - Images: jpg, jpeg, png, webp, heic, heif, gif, bmp, tiff, tif
//! - Video: mp4, mov, m4v, avi, mkv, 3gp, mts
//!
//! ## Example
//! ```rust,ignore
//! use media_dedup::core::scanner::{MediaScanner, ScanOptions, WalkDirScanner};
//!
//! let scanner = WalkDirScanner::new(ScanOptions::default());
//! let result = scanner.scan(&["/mnt/photos".into()])?;
//! ```

mod filter;
mod walker;

pub use filter::MediaFilter;
pub use walker::{ScanOptions, WalkDirScanner};

use crate::error::ScanError;
use crate::events::EventSender;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Represents a discovered file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFile {
    /// Path to the file
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modified time, if the platform reports one
    pub modified: Option<DateTime<Utc>>,
    /// Broad media category, from the extension
    pub kind: MediaKind,
}

/// Broad media category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
    Video,
    Other,
}

impl MediaKind {
    /// Classify by file extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "webp" | "heic" | "heif" | "gif" | "bmp" | "tiff"
            | "tif" => MediaKind::Image,
            "mp4" | "mov" | "m4v" | "avi" | "mkv" | "3gp" | "mts" => MediaKind::Video,
            _ => MediaKind::Other,
        }
    }
}

/// Result of a scan operation
#[derive(Debug)]
pub struct ScanResult {
    /// Successfully discovered files
    pub files: Vec<MediaFile>,
    /// Errors that occurred during scanning (non-fatal)
    pub errors: Vec<ScanError>,
}

/// Trait for media scanners
pub trait MediaScanner: Send + Sync {
    /// Scan directories and return discovered files
    fn scan(&self, paths: &[PathBuf]) -> Result<ScanResult, ScanError>;

    /// Scan with progress reporting via events
    fn scan_with_events(
        &self,
        paths: &[PathBuf],
        events: &EventSender,
    ) -> Result<ScanResult, ScanError>;
}
