//! Perceptual similarity hashes.
//!
//! ## Algorithms
//! - **aHash** - mean brightness, fastest
//! - **dHash** - brightness gradients, best balance (default)
//! - **pHash** - DCT-based, most robust to edits
//!
//! Hashes are stored as lowercase hex and compared by Hamming distance.

use crate::error::HashError;
use image::DynamicImage;
use image_hasher::{HashAlg, HasherConfig};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Available similarity algorithms
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityAlgorithm {
    Average,
    #[default]
    Difference,
    Perceptual,
}

impl SimilarityAlgorithm {
    /// Get a human-readable description of the algorithm
    pub fn description(&self) -> &'static str {
        match self {
            SimilarityAlgorithm::Average => "Average Hash (aHash) - based on average brightness",
            SimilarityAlgorithm::Difference => {
                "Difference Hash (dHash) - compares brightness gradients between pixels"
            }
            SimilarityAlgorithm::Perceptual => {
                "Perceptual Hash (pHash) - DCT-based, robust to edits and re-encoding"
            }
        }
    }
}

impl std::fmt::Display for SimilarityAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimilarityAlgorithm::Average => write!(f, "aHash"),
            SimilarityAlgorithm::Difference => write!(f, "dHash"),
            SimilarityAlgorithm::Perceptual => write!(f, "pHash"),
        }
    }
}

impl FromStr for SimilarityAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "average" | "ahash" => Ok(SimilarityAlgorithm::Average),
            "difference" | "dhash" => Ok(SimilarityAlgorithm::Difference),
            "perceptual" | "phash" => Ok(SimilarityAlgorithm::Perceptual),
            other => Err(HashError::UnknownAlgorithm {
                name: other.to_string(),
            }),
        }
    }
}

/// Computes similarity hashes with a fixed algorithm and size
pub struct SimilarityHasher {
    algorithm: SimilarityAlgorithm,
    hash_size: u32,
    hasher: image_hasher::Hasher,
}

impl SimilarityHasher {
    /// Create a hasher; `hash_size` is the side of the comparison grid
    /// (8 gives 64-bit hashes).
    pub fn new(algorithm: SimilarityAlgorithm, hash_size: u32) -> Self {
        let config = HasherConfig::new().hash_size(hash_size, hash_size);
        let config = match algorithm {
            SimilarityAlgorithm::Average => config.hash_alg(HashAlg::Mean),
            SimilarityAlgorithm::Difference => config.hash_alg(HashAlg::Gradient),
            SimilarityAlgorithm::Perceptual => config.hash_alg(HashAlg::Mean).preproc_dct(),
        };

        Self {
            algorithm,
            hash_size,
            hasher: config.to_hasher(),
        }
    }

    pub fn algorithm(&self) -> SimilarityAlgorithm {
        self.algorithm
    }

    pub fn hash_size(&self) -> u32 {
        self.hash_size
    }

    /// Hash a decoded image to lowercase hex
    pub fn hash_image(&self, image: &DynamicImage) -> String {
        to_hex(self.hasher.hash_image(image).as_bytes())
    }
}

impl Default for SimilarityHasher {
    fn default() -> Self {
        Self::new(SimilarityAlgorithm::default(), 8)
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn from_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Number of differing bits between two hex-encoded hashes.
///
/// `None` when either hash is malformed or the lengths differ
/// (hashes from different algorithms or sizes are not comparable).
pub fn hamming_distance(a: &str, b: &str) -> Option<u32> {
    let a = from_hex(a)?;
    let b = from_hex(b)?;
    if a.len() != b.len() {
        return None;
    }
    Some(a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn gradient_image(offset: u8) -> DynamicImage {
        let img = ImageBuffer::from_fn(64, 64, |x, _| {
            Rgb([(x as u8 * 4).saturating_add(offset), 90, 40])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn identical_images_produce_identical_hash() {
        for algorithm in [
            SimilarityAlgorithm::Average,
            SimilarityAlgorithm::Difference,
            SimilarityAlgorithm::Perceptual,
        ] {
            let hasher = SimilarityHasher::new(algorithm, 8);
            let image = gradient_image(0);
            assert_eq!(hasher.hash_image(&image), hasher.hash_image(&image));
        }
    }

    #[test]
    fn hash_size_eight_gives_sixty_four_bits() {
        let hasher = SimilarityHasher::new(SimilarityAlgorithm::Difference, 8);
        assert_eq!(hasher.hash_image(&gradient_image(0)).len(), 16);
    }

    #[test]
    fn slightly_brighter_image_stays_close() {
        let hasher = SimilarityHasher::default();
        let a = hasher.hash_image(&gradient_image(0));
        let b = hasher.hash_image(&gradient_image(3));
        assert!(hamming_distance(&a, &b).unwrap() <= 5);
    }

    #[test]
    fn distance_counts_differing_bits() {
        assert_eq!(hamming_distance("ff", "00"), Some(8));
        assert_eq!(hamming_distance("f0f0", "f0f1"), Some(1));
        assert_eq!(hamming_distance("abcd", "abcd"), Some(0));
    }

    #[test]
    fn incomparable_hashes_have_no_distance() {
        assert_eq!(hamming_distance("ff", "ffff"), None);
        assert_eq!(hamming_distance("zz", "00"), None);
        assert_eq!(hamming_distance("fff", "fff"), None);
    }

    #[test]
    fn algorithm_names_parse() {
        assert_eq!(
            "pHash".parse::<SimilarityAlgorithm>().unwrap(),
            SimilarityAlgorithm::Perceptual
        );
        assert!("blockhash".parse::<SimilarityAlgorithm>().is_err());
        assert_eq!(SimilarityAlgorithm::Difference.to_string(), "dHash");
    }
}
