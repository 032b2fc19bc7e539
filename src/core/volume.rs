//! Volume resolution and the volume to duplicate-folder map.
//!
//! A volume is identified by a configured root directory. The volume of a
//! path is the longest configured root that is a component-wise prefix of
//! the lexically normalised path. Drive prefixes compare case-insensitively
//! and trailing separators are ignored.

use crate::error::{ConfigError, PlanError};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};

/// A normalised volume root
#[derive(Debug, Clone)]
pub struct VolumeRoot {
    path: PathBuf,
    key: Vec<String>,
}

impl VolumeRoot {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self {
            path: normalize(path),
            key: path_key(path),
        }
    }

    /// Root of the filesystem namespace containing `path`
    /// (`/` on Unix, the drive root on Windows)
    pub fn filesystem_root_of(path: &Path) -> Self {
        let root: PathBuf = path
            .components()
            .take_while(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
            .collect();
        Self::new(root)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `path` lies on or under this root
    pub fn contains(&self, path: &Path) -> bool {
        path_key(path).starts_with(&self.key)
    }

    fn depth(&self) -> usize {
        self.key.len()
    }
}

impl PartialEq for VolumeRoot {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for VolumeRoot {}

impl Hash for VolumeRoot {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for VolumeRoot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VolumeRoot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for VolumeRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl Serialize for VolumeRoot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.path.to_string_lossy())
    }
}

/// Lexically normalise a path: drop `.`, resolve `..`, strip trailing
/// separators. Does not touch the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn path_key(path: &Path) -> Vec<String> {
    normalize(path)
        .components()
        .map(|component| match component {
            Component::Prefix(prefix) => prefix.as_os_str().to_string_lossy().to_uppercase(),
            Component::RootDir => std::path::MAIN_SEPARATOR.to_string(),
            other => other.as_os_str().to_string_lossy().into_owned(),
        })
        .collect()
}

/// Configured duplicate folder per volume.
///
/// Built from configuration; the legacy single-folder form is normalised
/// into a one-entry map before reaching the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DuplicateFolders {
    entries: BTreeMap<VolumeRoot, PathBuf>,
}

impl DuplicateFolders {
    pub fn new() -> Self {
        Self::default()
    }

    /// One folder serving the whole filesystem namespace it lives in
    pub fn from_single_folder(folder: impl AsRef<Path>) -> Self {
        let folder = folder.as_ref();
        let mut map = Self::new();
        map.insert(VolumeRoot::filesystem_root_of(folder), folder);
        map
    }

    /// Add or replace the folder for a volume. Returns the folder that
    /// was already registered under an equivalent key, if any.
    pub fn insert(&mut self, volume: VolumeRoot, folder: impl AsRef<Path>) -> Option<PathBuf> {
        self.entries.insert(volume, normalize(folder.as_ref()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Configured (volume, folder) pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (&VolumeRoot, &Path)> {
        self.entries.iter().map(|(v, f)| (v, f.as_path()))
    }

    /// All duplicate folders
    pub fn folders(&self) -> Vec<PathBuf> {
        self.entries.values().cloned().collect()
    }

    /// Whether `path` lies inside any configured duplicate folder
    pub fn is_parked(&self, path: &Path) -> bool {
        let path = normalize(path);
        self.entries.values().any(|folder| path.starts_with(folder))
    }

    /// The most specific configured volume containing `path`
    pub fn volume_of(&self, path: &Path) -> Option<&VolumeRoot> {
        self.entries
            .keys()
            .filter(|volume| volume.contains(path))
            .max_by_key(|volume| volume.depth())
    }

    /// The duplicate folder for the volume `path` lives on
    pub fn folder_for(&self, path: &Path) -> Result<(&VolumeRoot, &Path), ConfigError> {
        let volume = self
            .volume_of(path)
            .ok_or_else(|| ConfigError::UnknownVolume {
                path: path.to_path_buf(),
            })?;
        let folder = self
            .entries
            .get(volume)
            .ok_or_else(|| ConfigError::NoDuplicateFolder {
                volume: volume.to_string(),
            })?;
        Ok((volume, folder.as_path()))
    }

    /// Resolve the destination folder for `path` and prove it sits on the
    /// same volume as `path`.
    pub fn safe_folder_for(&self, path: &Path) -> Result<&Path, PlanError> {
        let (volume, folder) = self.folder_for(path)?;
        match self.volume_of(folder) {
            Some(folder_volume) if folder_volume == volume => Ok(folder),
            other => Err(PlanError::CrossDriveViolation {
                path: path.to_path_buf(),
                volume: volume.to_string(),
                folder: folder.to_path_buf(),
                folder_volume: other
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "no configured volume".to_string()),
            }),
        }
    }

    /// Structural problems with the mapping, all at once
    pub fn problems(&self, media_folders: &[PathBuf]) -> Vec<String> {
        let mut problems = Vec::new();

        if self.entries.is_empty() {
            problems.push("no duplicate folders are configured".to_string());
        }

        for (volume, folder) in &self.entries {
            if !volume.path().is_absolute() {
                problems.push(format!("volume root {} is not an absolute path", volume));
            }
            if !folder.is_absolute() {
                problems.push(format!(
                    "duplicate folder {} for volume {} is not an absolute path",
                    folder.display(),
                    volume
                ));
            }
            match self.volume_of(folder) {
                Some(resolved) if resolved == volume => {}
                Some(resolved) => problems.push(format!(
                    "duplicate folder {} is keyed by volume {} but resolves to volume {}",
                    folder.display(),
                    volume,
                    resolved
                )),
                None => problems.push(format!(
                    "duplicate folder {} does not lie on volume {}",
                    folder.display(),
                    volume
                )),
            }
        }

        for media in media_folders {
            if !media.is_absolute() {
                problems.push(format!(
                    "media folder {} is not an absolute path",
                    media.display()
                ));
            }
            if self.volume_of(media).is_none() {
                problems.push(format!(
                    "media folder {} is not covered by any configured volume",
                    media.display()
                ));
            }
        }

        problems
    }
}
