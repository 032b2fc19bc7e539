//! Types for similarity clustering.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A record in a cluster, compared against the cluster's reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarMember {
    pub record_id: i64,
    pub path: PathBuf,
    pub size: u64,
    /// Hamming distance to the reference
    pub distance: u32,
    pub similarity_percent: f64,
}

/// Records that look alike
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarCluster {
    /// Lowest id in the cluster; written to `related_id`
    pub related_id: i64,
    pub reference: SimilarMember,
    pub members: Vec<SimilarMember>,
}

impl SimilarCluster {
    /// Reference first, then members by ascending id
    pub fn record_ids(&self) -> Vec<i64> {
        std::iter::once(self.reference.record_id)
            .chain(self.members.iter().map(|m| m.record_id))
            .collect()
    }

    pub fn total_size(&self) -> u64 {
        self.reference.size + self.members.iter().map(|m| m.size).sum::<u64>()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarReport {
    pub threshold: u32,
    pub records_considered: usize,
    pub clusters: Vec<SimilarCluster>,
    /// Records updated with a `related_id`, when assigned
    pub assigned: Option<usize>,
    pub duration_ms: u64,
}
