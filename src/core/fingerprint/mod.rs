//! # Fingerprint Module
//!
//! Computes content and similarity fingerprints for media files.
//!
//! ## Fingerprint
//! - **Content hash** - BLAKE3 digest of the file bytes, lowercase hex.
//!   Equal hashes are treated as byte-identical files.
//! - **Similarity hash** - perceptual hash of the decoded image, only for
//!   image content. Undecodable content yields `None`, never an error.
//!
//! Fingerprinting is a pure function of the bytes, so files are processed
//! on a bounded rayon pool with no shared mutable state.
//!
//! ## Performance
//! - Files >= 1MB are memory-mapped
//! - JPEG uses `zune-jpeg` for faster decoding
//!
//! ## Example
//! ```rust,ignore
//! let fingerprinter = Fingerprinter::new()
//!     .with_similarity(SimilarityHasher::new(SimilarityAlgorithm::Difference, 8))
//!     .workers(4);
//!
//! let fp = fingerprinter.fingerprint_file(&path)?;
//! ```

mod decode;
mod read;
mod similarity;

pub use read::{read_file_bytes, sniff_image, FileBytes, ImageSignature};
pub use similarity::{hamming_distance, SimilarityAlgorithm, SimilarityHasher};

use crate::error::{DedupError, HashError};
use crate::events::{Event, EventSender, FingerprintEvent, FingerprintProgress};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Content and similarity identity of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub content_hash: String,
    pub similarity_hash: Option<String>,
}

/// Result of fingerprinting one file in a batch
#[derive(Debug)]
pub struct FingerprintOutcome {
    pub path: PathBuf,
    pub result: Result<Fingerprint, HashError>,
}

/// Content hash of a byte slice
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Fingerprints files, optionally with similarity hashes
pub struct Fingerprinter {
    similarity: Option<SimilarityHasher>,
    workers: usize,
}

impl Fingerprinter {
    /// Content hashes only, one worker per CPU
    pub fn new() -> Self {
        Self {
            similarity: None,
            workers: 0,
        }
    }

    /// Also compute similarity hashes for image content
    pub fn with_similarity(mut self, hasher: SimilarityHasher) -> Self {
        self.similarity = Some(hasher);
        self
    }

    /// Bound the worker pool; 0 means one per CPU
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Fingerprint in-memory bytes
    pub fn fingerprint_bytes(&self, bytes: &[u8]) -> Fingerprint {
        Fingerprint {
            content_hash: content_hash(bytes),
            similarity_hash: self.similarity_hash(bytes),
        }
    }

    /// Read and fingerprint a file
    pub fn fingerprint_file(&self, path: &Path) -> Result<Fingerprint, HashError> {
        let bytes = read_file_bytes(path)?;
        let fingerprint = self.fingerprint_bytes(&bytes);
        debug!(
            path = %path.display(),
            content_hash = %fingerprint.content_hash,
            similarity = fingerprint.similarity_hash.is_some(),
            "fingerprinted"
        );
        Ok(fingerprint)
    }

    fn similarity_hash(&self, bytes: &[u8]) -> Option<String> {
        let hasher = self.similarity.as_ref()?;
        let signature = sniff_image(bytes)?;
        match decode::decode_image(bytes, signature) {
            Ok(image) => Some(hasher.hash_image(&image)),
            Err(reason) => {
                debug!(?signature, %reason, "image not decodable, no similarity hash");
                None
            }
        }
    }

    /// Fingerprint many files on the worker pool.
    ///
    /// Per-file failures are returned in the outcome, never abort the batch.
    /// `checkpoint` runs before each file, one worker at a time, so a long
    /// batch keeps its lock lease (or dry-run watch) current. Cancellation
    /// skips the files not yet started and leaves them out of the result;
    /// any other checkpoint error stops every worker and is returned.
    pub fn fingerprint_all<F>(
        &self,
        paths: &[PathBuf],
        events: &EventSender,
        checkpoint: F,
    ) -> Result<Vec<FingerprintOutcome>, DedupError>
    where
        F: FnMut() -> Result<(), DedupError> + Send,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| HashError::ComputationFailed(format!("worker pool: {}", e)))?;

        let total = paths.len();
        let completed = AtomicUsize::new(0);
        let checkpoint = Mutex::new(checkpoint);
        let stopped = AtomicBool::new(false);
        let failure: Mutex<Option<DedupError>> = Mutex::new(None);
        events.send(Event::Fingerprint(FingerprintEvent::Started { total_files: total }));

        let outcomes: Vec<FingerprintOutcome> = pool.install(|| {
            paths
                .par_iter()
                .filter_map(|path| {
                    if stopped.load(Ordering::SeqCst) {
                        return None;
                    }
                    let step = match checkpoint.lock() {
                        Ok(mut check) => (*check)(),
                        Err(_) => Err(HashError::ComputationFailed(
                            "checkpoint panicked on another worker".to_string(),
                        )
                        .into()),
                    };
                    if let Err(e) = step {
                        stopped.store(true, Ordering::SeqCst);
                        if !matches!(e, DedupError::Cancelled) {
                            if let Ok(mut slot) = failure.lock() {
                                slot.get_or_insert(e);
                            }
                        }
                        return None;
                    }

                    let result = self.fingerprint_file(path);
                    if let Err(ref e) = result {
                        warn!(path = %path.display(), error = %e, "fingerprinting failed");
                        events.send(Event::Fingerprint(FingerprintEvent::Error {
                            path: path.clone(),
                            message: e.to_string(),
                        }));
                    }

                    let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    events.send(Event::Fingerprint(FingerprintEvent::Progress(
                        FingerprintProgress {
                            completed: done,
                            total,
                            current_path: path.clone(),
                        },
                    )));

                    Some(FingerprintOutcome {
                        path: path.clone(),
                        result,
                    })
                })
                .collect()
        });

        let failure = failure
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(e) = failure {
            warn!(error = %e, finished = outcomes.len(), total, "fingerprinting stopped");
            return Err(e);
        }
        Ok(outcomes)
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new()
    }
}
