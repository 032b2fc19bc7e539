//! File reading for fingerprinting.
//!
//! Large files are memory-mapped so hashing does not copy them
//! through a user-space buffer first.

use crate::error::HashError;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// Minimum file size to use memory-mapped I/O (1MB)
const MMAP_THRESHOLD: u64 = 1024 * 1024;

/// Read file bytes, memory-mapping files >= 1MB.
pub fn read_file_bytes(path: &Path) -> Result<FileBytes, HashError> {
    let metadata = std::fs::metadata(path).map_err(|e| HashError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;

    if metadata.len() >= MMAP_THRESHOLD {
        read_mmap(path)
    } else {
        read_standard(path)
    }
}

fn read_mmap(path: &Path) -> Result<FileBytes, HashError> {
    let file = File::open(path).map_err(|e| HashError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;

    // SAFETY: the map is read-only and owns the file handle for its lifetime.
    // A concurrent writer could change the bytes under us; the caller treats
    // the result like any other racy read of a file being modified.
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| HashError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;

    Ok(FileBytes::Mmap(mmap))
}

fn read_standard(path: &Path) -> Result<FileBytes, HashError> {
    let bytes = std::fs::read(path).map_err(|e| HashError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;

    Ok(FileBytes::Vec(bytes))
}

/// File bytes that may be either owned or memory-mapped.
pub enum FileBytes {
    /// Standard heap-allocated bytes
    Vec(Vec<u8>),
    /// Memory-mapped bytes (zero-copy from disk)
    Mmap(Mmap),
}

impl AsRef<[u8]> for FileBytes {
    fn as_ref(&self) -> &[u8] {
        match self {
            FileBytes::Vec(v) => v,
            FileBytes::Mmap(m) => m,
        }
    }
}

impl std::ops::Deref for FileBytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_ref()
    }
}

/// Image container detected from magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSignature {
    Jpeg,
    Png,
    Gif,
    WebP,
    Heic,
    Bmp,
    Tiff,
}

/// Sniff the image container from the first bytes of a file.
///
/// Much cheaper than attempting a decode; videos and other media
/// return `None` and never reach a decoder.
pub fn sniff_image(bytes: &[u8]) -> Option<ImageSignature> {
    if bytes.len() < 8 {
        return None;
    }

    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(ImageSignature::Jpeg);
    }

    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some(ImageSignature::Png);
    }

    if bytes.starts_with(b"GIF8") {
        return Some(ImageSignature::Gif);
    }

    if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        return Some(ImageSignature::WebP);
    }

    // ISO base media container; only still-image brands count
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        let brand = &bytes[8..12];
        if brand == b"heic" || brand == b"heix" || brand == b"mif1" || brand == b"hevc" {
            return Some(ImageSignature::Heic);
        }
        return None;
    }

    if bytes.starts_with(&[0x42, 0x4D]) {
        return Some(ImageSignature::Bmp);
    }

    if bytes.starts_with(&[0x49, 0x49, 0x2A, 0x00]) || bytes.starts_with(&[0x4D, 0x4D, 0x00, 0x2A])
    {
        return Some(ImageSignature::Tiff);
    }

    None
}
