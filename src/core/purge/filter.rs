//! User-supplied purge filters. All set filters must match.

use crate::core::volume::VolumeRoot;
use crate::error::ConfigError;
use chrono::{DateTime, Duration, Utc};
use glob::Pattern;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct PurgeFilters {
    pattern: Option<Pattern>,
    older_than_days: Option<u32>,
    volume: Option<VolumeRoot>,
}

impl PurgeFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Glob matched against the file name (`*.jpg`, `IMG_*`)
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self, ConfigError> {
        let compiled = Pattern::new(pattern).map_err(|e| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        self.pattern = Some(compiled);
        Ok(self)
    }

    /// Only files last modified more than `days` days ago
    pub fn older_than_days(mut self, days: u32) -> Self {
        self.older_than_days = Some(days);
        self
    }

    pub fn on_volume(mut self, volume: VolumeRoot) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn volume(&self) -> Option<&VolumeRoot> {
        self.volume.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.pattern.is_none() && self.older_than_days.is_none() && self.volume.is_none()
    }

    /// Whether a file passes every filter that is set.
    ///
    /// A file with unknown mtime never passes an age filter.
    pub fn matches(&self, path: &Path, modified: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        if let Some(pattern) = &self.pattern {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy())
                .unwrap_or_default();
            if !pattern.matches(&name) {
                return false;
            }
        }

        if let Some(days) = self.older_than_days {
            let cutoff = now - Duration::days(i64::from(days));
            match modified {
                Some(modified) if modified < cutoff => {}
                _ => return false,
            }
        }

        if let Some(volume) = &self.volume {
            if !volume.contains(path) {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filters_match_everything() {
        let filters = PurgeFilters::new();
        assert!(filters.is_empty());
        assert!(filters.matches(Path::new("/d/x.png"), None, Utc::now()));
    }

    #[test]
    fn pattern_matches_file_name_only() {
        let filters = PurgeFilters::new().with_pattern("*.jpg").unwrap();
        let now = Utc::now();
        assert!(filters.matches(Path::new("/dups/jpg-folder/a.jpg"), None, now));
        assert!(!filters.matches(Path::new("/dups/a.jpg/b.png"), None, now));
    }

    #[test]
    fn bad_pattern_is_config_error() {
        let err = PurgeFilters::new().with_pattern("[").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn age_filter_uses_modification_time() {
        let now = Utc::now();
        let filters = PurgeFilters::new().older_than_days(30);
        assert!(filters.matches(Path::new("/d/a.jpg"), Some(now - Duration::days(31)), now));
        assert!(!filters.matches(Path::new("/d/a.jpg"), Some(now - Duration::days(2)), now));
        assert!(!filters.matches(Path::new("/d/a.jpg"), None, now));
    }

    #[test]
    fn filters_are_conjunctive() {
        let now = Utc::now();
        let filters = PurgeFilters::new()
            .with_pattern("*.jpg")
            .unwrap()
            .on_volume(VolumeRoot::new("/mnt/a"));
        assert!(filters.matches(Path::new("/mnt/a/dups/x.jpg"), None, now));
        assert!(!filters.matches(Path::new("/mnt/b/dups/x.jpg"), None, now));
        assert!(!filters.matches(Path::new("/mnt/a/dups/x.png"), None, now));
    }
}
