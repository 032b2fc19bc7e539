//! Grouping of active records by content hash.

use super::DuplicateGroup;
use crate::core::store::FileRecord;
use crate::core::volume::normalize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Group records sharing a content hash.
///
/// Deleted records never take part. Groups of one are dropped. The survivor
/// of each group is the lowest id; groups come back in ascending survivor
/// id and candidates in ascending id.
pub fn group_duplicates(records: Vec<FileRecord>, scope: &[PathBuf]) -> Vec<DuplicateGroup> {
    let scope: Vec<PathBuf> = scope.iter().map(|p| normalize(p)).collect();

    let mut by_hash: HashMap<String, Vec<FileRecord>> = HashMap::new();
    for record in records {
        if !record.status.is_active() {
            continue;
        }
        if !scope.is_empty() && !scope.iter().any(|s| normalize(&record.path).starts_with(s)) {
            continue;
        }
        by_hash
            .entry(record.content_hash.clone())
            .or_default()
            .push(record);
    }

    let mut groups: Vec<DuplicateGroup> = by_hash
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(content_hash, mut members)| {
            members.sort_by_key(|r| r.id);
            let survivor = members.remove(0);
            DuplicateGroup {
                content_hash,
                survivor,
                candidates: members,
            }
        })
        .collect();

    groups.sort_by_key(|g| g.survivor.id);
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::FileStatus;
    use chrono::Utc;

    fn record(id: i64, path: &str, hash: &str, status: FileStatus) -> FileRecord {
        let now = Utc::now();
        FileRecord {
            id,
            path: PathBuf::from(path),
            original_path: PathBuf::from(path),
            name: String::new(),
            original_name: String::new(),
            size: 10,
            modified: None,
            content_hash: hash.to_string(),
            similarity_hash: None,
            duplicate_of_id: None,
            previous_version_id: None,
            related_id: None,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn survivor_is_lowest_id_regardless_of_input_order() {
        let records = vec![
            record(12, "/p/c.jpg", "h", FileStatus::Scanned),
            record(10, "/p/a.jpg", "h", FileStatus::Scanned),
            record(11, "/p/b.jpg", "h", FileStatus::Scanned),
        ];

        let groups = group_duplicates(records, &[]);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].survivor.id, 10);
        let ids: Vec<i64> = groups[0].candidates.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![11, 12]);
    }

    #[test]
    fn singletons_and_deleted_records_are_ignored() {
        let records = vec![
            record(1, "/p/a.jpg", "x", FileStatus::Scanned),
            record(2, "/p/b.jpg", "y", FileStatus::Scanned),
            record(3, "/p/c.jpg", "y", FileStatus::Deleted),
        ];

        assert!(group_duplicates(records, &[]).is_empty());
    }

    #[test]
    fn groups_are_ordered_by_survivor_id() {
        let records = vec![
            record(5, "/p/a.jpg", "late", FileStatus::Scanned),
            record(6, "/p/b.jpg", "late", FileStatus::Scanned),
            record(1, "/p/c.jpg", "early", FileStatus::Scanned),
            record(9, "/p/d.jpg", "early", FileStatus::Scanned),
        ];

        let groups = group_duplicates(records, &[]);

        assert_eq!(groups[0].survivor.id, 1);
        assert_eq!(groups[1].survivor.id, 5);
    }

    #[test]
    fn scope_limits_which_records_are_grouped() {
        let records = vec![
            record(1, "/other/a.jpg", "h", FileStatus::Scanned),
            record(2, "/photos/b.jpg", "h", FileStatus::Scanned),
            record(3, "/photos/trip/c.jpg", "h", FileStatus::Scanned),
        ];

        let groups = group_duplicates(records, &[PathBuf::from("/photos/")]);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].survivor.id, 2);
    }
}
