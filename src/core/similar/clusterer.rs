//! Greedy Hamming-distance clustering.

use super::types::{SimilarCluster, SimilarMember};
use crate::core::fingerprint::hamming_distance;
use crate::core::store::{FileRecord, FileStatus};

/// Cluster records by similarity hash.
///
/// Records are visited in ascending id. Each unassigned record seeds a
/// cluster and claims every later unassigned record within `threshold` of
/// it. Records settled as duplicates, and records without a similarity
/// hash, are left out. Hashes of different lengths never match.
pub fn cluster_records(records: &[FileRecord], threshold: u32) -> Vec<SimilarCluster> {
    let mut candidates: Vec<(&FileRecord, &str)> = records
        .iter()
        .filter(|r| r.status.is_active() && r.status != FileStatus::Duplicate)
        .filter_map(|r| r.similarity_hash.as_deref().map(|h| (r, h)))
        .collect();
    candidates.sort_by_key(|(r, _)| r.id);

    let mut assigned = vec![false; candidates.len()];
    let mut clusters = Vec::new();

    for i in 0..candidates.len() {
        if assigned[i] {
            continue;
        }
        let (seed, seed_hash) = candidates[i];
        let bits = (seed_hash.len() * 4) as u32;

        let mut members = Vec::new();
        for j in (i + 1)..candidates.len() {
            if assigned[j] {
                continue;
            }
            let (other, other_hash) = candidates[j];
            match hamming_distance(seed_hash, other_hash) {
                Some(distance) if distance <= threshold => {
                    assigned[j] = true;
                    members.push(member(other, distance, bits));
                }
                _ => {}
            }
        }

        if !members.is_empty() {
            assigned[i] = true;
            clusters.push(SimilarCluster {
                related_id: seed.id,
                reference: member(seed, 0, bits),
                members,
            });
        }
    }

    clusters
}

fn member(record: &FileRecord, distance: u32, bits: u32) -> SimilarMember {
    let similarity_percent = if bits == 0 {
        0.0
    } else {
        (1.0 - distance as f64 / bits as f64) * 100.0
    };
    SimilarMember {
        record_id: record.id,
        path: record.path.clone(),
        size: record.size,
        distance,
        similarity_percent,
    }
}
