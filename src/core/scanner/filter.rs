//! File filtering logic for the scanner.

use super::MediaKind;
use std::collections::HashSet;
use std::path::Path;

const DEFAULT_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "webp", "heic", "heif", "gif", "bmp", "tiff", "tif", "mp4", "mov",
    "m4v", "avi", "mkv", "3gp", "mts",
];

/// Decides which files the scanner reports
#[derive(Debug, Clone)]
pub struct MediaFilter {
    /// Lowercase extensions to include; `None` accepts every file
    extensions: Option<HashSet<String>>,
    /// Whether to include hidden files
    include_hidden: bool,
    min_size: Option<u64>,
    max_size: Option<u64>,
}

impl MediaFilter {
    /// Create a filter with the default media extensions
    pub fn new() -> Self {
        Self {
            extensions: Some(DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()),
            include_hidden: false,
            min_size: None,
            max_size: None,
        }
    }

    /// A filter that accepts every file, hidden ones included
    pub fn any_file() -> Self {
        Self {
            extensions: None,
            include_hidden: true,
            min_size: None,
            max_size: None,
        }
    }

    /// Include hidden files (starting with .)
    pub fn with_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    /// Override the list of extensions to accept
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = Some(
            extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        );
        self
    }

    /// Restrict accepted file sizes (inclusive bounds)
    pub fn with_size_range(mut self, min_size: Option<u64>, max_size: Option<u64>) -> Self {
        self.min_size = min_size;
        self.max_size = max_size;
        self
    }

    /// Whether hidden entries are accepted
    pub fn includes_hidden(&self) -> bool {
        self.include_hidden
    }

    /// Check the path alone (name and extension)
    pub fn should_include(&self, path: &Path) -> bool {
        if !self.include_hidden && is_hidden(path) {
            return false;
        }

        let Some(extensions) = &self.extensions else {
            return true;
        };

        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| extensions.contains(&ext.to_lowercase()))
            .unwrap_or(false)
    }

    /// Check the file size against the configured bounds
    pub fn accepts_size(&self, size: u64) -> bool {
        self.min_size.map_or(true, |min| size >= min) && self.max_size.map_or(true, |max| size <= max)
    }

    /// Get the media kind for a path
    pub fn kind_of(&self, path: &Path) -> MediaKind {
        path.extension()
            .and_then(|e| e.to_str())
            .map(MediaKind::from_extension)
            .unwrap_or(MediaKind::Other)
    }
}

impl Default for MediaFilter {
    fn default() -> Self {
        Self::new()
    }
}

pub(super) fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}
