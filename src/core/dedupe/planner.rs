//! Volume-safe move planning for duplicate groups.

use super::{DuplicateGroup, GroupPlan, MoveAction, PlannedMove, SettledCandidate};
use crate::core::fs::FileSystem;
use crate::core::report::{Issue, IssueKind};
use crate::core::store::{FileStatus, FileRecord};
use crate::core::volume::{normalize, DuplicateFolders};
use crate::error::PlanError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Plans one group at a time, remembering every destination it has handed
/// out so later groups never collide with earlier ones.
pub struct MovePlanner<'a> {
    folders: &'a DuplicateFolders,
    fs: &'a dyn FileSystem,
    reserved: HashSet<PathBuf>,
}

impl<'a> MovePlanner<'a> {
    pub fn new(folders: &'a DuplicateFolders, fs: &'a dyn FileSystem) -> Self {
        Self {
            folders,
            fs,
            reserved: HashSet::new(),
        }
    }

    /// Plan a single group.
    ///
    /// A candidate whose volume has no duplicate folder fails the whole
    /// group. A cross-drive candidate is rejected on its own and the rest of
    /// the group still moves.
    pub fn plan_group(&mut self, group: &DuplicateGroup) -> GroupPlan {
        let survivor = &group.survivor;
        let mut plan = GroupPlan {
            content_hash: group.content_hash.clone(),
            survivor_id: survivor.id,
            survivor_path: survivor.path.clone(),
            promote_survivor: survivor.status == FileStatus::Duplicate,
            restore_survivor: None,
            moves: Vec::new(),
            settled: Vec::new(),
            rejected: Vec::new(),
            failure: None,
        };
        let mut pending: HashSet<PathBuf> = HashSet::new();

        // A survivor left in a duplicate folder would be purged along with
        // the candidates moved in beside it.
        if self.folders.is_parked(&survivor.path) {
            match self.restore_destination(survivor) {
                Ok(destination) => {
                    debug!(
                        id = survivor.id,
                        from = %survivor.path.display(),
                        to = %destination.display(),
                        "survivor restored from duplicate folder"
                    );
                    pending.insert(destination.clone());
                    plan.promote_survivor = true;
                    plan.restore_survivor = Some(PlannedMove {
                        record_id: survivor.id,
                        source: survivor.path.clone(),
                        destination,
                        size: survivor.size,
                        action: MoveAction::Move,
                    });
                }
                Err(reason) => {
                    debug!(group = %group.content_hash, id = survivor.id, %reason, "group needs review");
                    plan.failure = Some(
                        Issue::new(IssueKind::NeedsReview, &survivor.path, reason)
                            .for_record(survivor.id),
                    );
                    return plan;
                }
            }
        }

        for candidate in &group.candidates {
            if candidate.status == FileStatus::Duplicate
                && candidate.duplicate_of_id == Some(survivor.id)
            {
                plan.settled.push(SettledCandidate {
                    record_id: candidate.id,
                    path: candidate.path.clone(),
                });
                continue;
            }

            let folder = match self.folders.safe_folder_for(&candidate.path) {
                Ok(folder) => folder,
                Err(PlanError::Config(e)) => {
                    debug!(group = %group.content_hash, id = candidate.id, error = %e, "group failed");
                    plan.failure = Some(
                        Issue::new(IssueKind::Config, &candidate.path, e.to_string())
                            .for_record(candidate.id),
                    );
                    plan.moves.clear();
                    return plan;
                }
                Err(e @ PlanError::CrossDriveViolation { .. }) => {
                    plan.rejected.push(
                        Issue::new(IssueKind::CrossDriveViolation, &candidate.path, e.to_string())
                            .for_record(candidate.id),
                    );
                    continue;
                }
            };

            if !self.fs.exists(&candidate.path) {
                plan.rejected.push(
                    Issue::new(
                        IssueKind::TransientIo,
                        &candidate.path,
                        "file is no longer on disk; rescan to update the record",
                    )
                    .for_record(candidate.id),
                );
                continue;
            }

            let planned = if normalize(&candidate.path).starts_with(normalize(folder)) {
                PlannedMove {
                    record_id: candidate.id,
                    source: candidate.path.clone(),
                    destination: candidate.path.clone(),
                    size: candidate.size,
                    action: MoveAction::Relink,
                }
            } else {
                let destination = self.free_destination(folder, candidate, &pending);
                pending.insert(destination.clone());
                PlannedMove {
                    record_id: candidate.id,
                    source: candidate.path.clone(),
                    destination,
                    size: candidate.size,
                    action: MoveAction::Move,
                }
            };
            debug!(
                id = planned.record_id,
                from = %planned.source.display(),
                to = %planned.destination.display(),
                action = ?planned.action,
                "planned"
            );
            plan.moves.push(planned);
        }

        self.reserved.extend(pending);
        plan
    }

    /// Where a parked survivor can go back to: its original path, if that
    /// is outside every duplicate folder, on the same volume, and free.
    fn restore_destination(&self, survivor: &FileRecord) -> Result<PathBuf, String> {
        let original = &survivor.original_path;
        if self.folders.is_parked(original) {
            return Err(format!(
                "survivor was first recorded inside a duplicate folder ({}); move it out by hand",
                original.display()
            ));
        }
        match (
            self.folders.volume_of(&survivor.path),
            self.folders.volume_of(original),
        ) {
            (Some(here), Some(there)) if here == there => {}
            _ => {
                return Err(format!(
                    "survivor sits in a duplicate folder and its original path {} is on another volume",
                    original.display()
                ))
            }
        }
        if !self.fs.exists(&survivor.path) {
            return Err("survivor file is no longer on disk; rescan to update the record".to_string());
        }
        if self.reserved.contains(original) || self.fs.exists(original) {
            return Err(format!(
                "survivor sits in a duplicate folder and its original path {} is taken",
                original.display()
            ));
        }
        Ok(original.clone())
    }

    /// First of `name`, `stem-dup1.ext`, `stem-dup2.ext`, ... not on disk
    /// and not already handed out.
    fn free_destination(
        &self,
        folder: &Path,
        candidate: &FileRecord,
        pending: &HashSet<PathBuf>,
    ) -> PathBuf {
        let name = candidate
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("record-{}", candidate.id));
        let taken = |path: &Path| {
            self.reserved.contains(path) || pending.contains(path) || self.fs.exists(path)
        };

        let first = folder.join(&name);
        if !taken(&first) {
            return first;
        }

        let stem = Path::new(&name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.clone());
        let extension = Path::new(&name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut n = 1u32;
        loop {
            let path = folder.join(format!("{}-dup{}{}", stem, n, extension));
            if !taken(&path) {
                return path;
            }
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fs::LocalFileSystem;
    use crate::core::volume::VolumeRoot;
    use chrono::Utc;
    use tempfile::TempDir;

    fn record(id: i64, path: &Path) -> FileRecord {
        let now = Utc::now();
        FileRecord {
            id,
            path: path.to_path_buf(),
            original_path: path.to_path_buf(),
            name: String::new(),
            original_name: String::new(),
            size: 4,
            modified: None,
            content_hash: "h".to_string(),
            similarity_hash: None,
            duplicate_of_id: None,
            previous_version_id: None,
            related_id: None,
            status: FileStatus::Scanned,
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"same").unwrap();
    }

    struct Volume {
        dir: TempDir,
        folders: DuplicateFolders,
    }

    fn volume() -> Volume {
        let dir = TempDir::new().unwrap();
        let mut folders = DuplicateFolders::new();
        folders.insert(VolumeRoot::new(dir.path()), dir.path().join("duplicates"));
        Volume { dir, folders }
    }

    fn group(records: Vec<FileRecord>) -> DuplicateGroup {
        let mut records = records;
        let survivor = records.remove(0);
        DuplicateGroup {
            content_hash: "h".to_string(),
            survivor,
            candidates: records,
        }
    }

    #[test]
    fn same_names_get_stable_suffixes() {
        let v = volume();
        let paths: Vec<PathBuf> = ["a/x.jpg", "b/x.jpg", "c/x.jpg"]
            .iter()
            .map(|p| v.dir.path().join(p))
            .collect();
        paths.iter().for_each(|p| touch(p));
        let g = group(
            paths
                .iter()
                .enumerate()
                .map(|(i, p)| record(i as i64 + 1, p))
                .collect(),
        );

        let first = MovePlanner::new(&v.folders, &LocalFileSystem).plan_group(&g);
        let second = MovePlanner::new(&v.folders, &LocalFileSystem).plan_group(&g);

        let names: Vec<PathBuf> = first.moves.iter().map(|m| m.destination.clone()).collect();
        let dups = v.dir.path().join("duplicates");
        assert_eq!(names, vec![dups.join("x.jpg"), dups.join("x-dup1.jpg")]);
        assert_eq!(
            names,
            second.moves.iter().map(|m| m.destination.clone()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn existing_destination_files_are_skipped_over() {
        let v = volume();
        let survivor = v.dir.path().join("a/x.jpg");
        let candidate = v.dir.path().join("b/x.jpg");
        touch(&survivor);
        touch(&candidate);
        touch(&v.dir.path().join("duplicates/x.jpg"));
        touch(&v.dir.path().join("duplicates/x-dup1.jpg"));

        let plan = MovePlanner::new(&v.folders, &LocalFileSystem)
            .plan_group(&group(vec![record(1, &survivor), record(2, &candidate)]));

        assert_eq!(
            plan.moves[0].destination,
            v.dir.path().join("duplicates/x-dup2.jpg")
        );
    }

    #[test]
    fn unmapped_volume_fails_whole_group() {
        let v = volume();
        let inside = v.dir.path().join("a/x.jpg");
        touch(&inside);
        let outside = TempDir::new().unwrap();
        let stray = outside.path().join("x.jpg");
        touch(&stray);

        let plan = MovePlanner::new(&v.folders, &LocalFileSystem).plan_group(&group(vec![
            record(1, &inside),
            record(2, &inside.with_file_name("y.jpg")),
            record(3, &stray),
        ]));

        assert!(plan.failure.is_some());
        assert!(plan.moves.is_empty());
    }

    #[test]
    fn cross_drive_candidate_is_rejected_alone() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let mut folders = DuplicateFolders::new();
        folders.insert(VolumeRoot::new(a.path()), a.path().join("duplicates"));
        folders.insert(VolumeRoot::new(b.path()), a.path().join("duplicates"));
        let survivor = a.path().join("x.jpg");
        let same_volume = a.path().join("sub/x.jpg");
        let other_volume = b.path().join("x.jpg");
        for p in [&survivor, &same_volume, &other_volume] {
            touch(p);
        }

        let plan = MovePlanner::new(&folders, &LocalFileSystem).plan_group(&group(vec![
            record(1, &survivor),
            record(2, &same_volume),
            record(3, &other_volume),
        ]));

        assert!(plan.failure.is_none());
        assert_eq!(plan.moves.len(), 1);
        assert_eq!(plan.moves[0].record_id, 2);
        assert_eq!(plan.rejected.len(), 1);
        assert_eq!(plan.rejected[0].kind, IssueKind::CrossDriveViolation);
    }

    #[test]
    fn settled_candidates_are_not_moved_again() {
        let v = volume();
        let survivor = v.dir.path().join("a/x.jpg");
        let settled = v.dir.path().join("duplicates/x.jpg");
        touch(&survivor);
        touch(&settled);
        let mut dup = record(2, &settled);
        dup.status = FileStatus::Duplicate;
        dup.duplicate_of_id = Some(1);

        let plan = MovePlanner::new(&v.folders, &LocalFileSystem)
            .plan_group(&group(vec![record(1, &survivor), dup]));

        assert!(plan.moves.is_empty());
        assert_eq!(plan.settled.len(), 1);
    }

    #[test]
    fn candidate_already_in_duplicate_folder_is_relinked() {
        let v = volume();
        let survivor = v.dir.path().join("a/x.jpg");
        let parked = v.dir.path().join("duplicates/x.jpg");
        touch(&survivor);
        touch(&parked);

        let plan = MovePlanner::new(&v.folders, &LocalFileSystem)
            .plan_group(&group(vec![record(1, &survivor), record(2, &parked)]));

        assert_eq!(plan.moves[0].action, MoveAction::Relink);
        assert_eq!(plan.moves[0].destination, parked);
    }

    #[test]
    fn duplicate_survivor_is_promoted() {
        let v = volume();
        let survivor = v.dir.path().join("a/x.jpg");
        let candidate = v.dir.path().join("b/x.jpg");
        touch(&survivor);
        touch(&candidate);
        let mut first = record(1, &survivor);
        first.status = FileStatus::Duplicate;
        first.duplicate_of_id = Some(2);

        let plan = MovePlanner::new(&v.folders, &LocalFileSystem)
            .plan_group(&group(vec![first, record(2, &candidate)]));

        assert!(plan.promote_survivor);
        assert!(plan.restore_survivor.is_none());
        assert_eq!(plan.moves.len(), 1);
    }

    #[test]
    fn parked_survivor_goes_back_to_its_original_path() {
        let v = volume();
        let original = v.dir.path().join("a/x.jpg");
        let parked = v.dir.path().join("duplicates/x.jpg");
        let candidate = v.dir.path().join("b/x.jpg");
        touch(&parked);
        touch(&candidate);
        let mut first = record(1, &parked);
        first.original_path = original.clone();
        first.status = FileStatus::Duplicate;
        first.duplicate_of_id = Some(9);

        let plan = MovePlanner::new(&v.folders, &LocalFileSystem)
            .plan_group(&group(vec![first, record(2, &candidate)]));

        assert!(plan.failure.is_none());
        assert!(plan.promote_survivor);
        let restore = plan.restore_survivor.as_ref().unwrap();
        assert_eq!(restore.source, parked);
        assert_eq!(restore.destination, original);
        // The restored survivor vacates its name, but it is still on disk when
        // the candidate's destination is chosen.
        assert_eq!(plan.moves[0].destination, v.dir.path().join("duplicates/x-dup1.jpg"));
    }

    #[test]
    fn parked_survivor_with_taken_original_path_needs_review() {
        let v = volume();
        let original = v.dir.path().join("a/x.jpg");
        let parked = v.dir.path().join("duplicates/x.jpg");
        let candidate = v.dir.path().join("b/x.jpg");
        touch(&original);
        touch(&parked);
        touch(&candidate);
        let mut first = record(1, &parked);
        first.original_path = original;

        let plan = MovePlanner::new(&v.folders, &LocalFileSystem)
            .plan_group(&group(vec![first, record(2, &candidate)]));

        assert_eq!(plan.failure.as_ref().unwrap().kind, IssueKind::NeedsReview);
        assert!(plan.moves.is_empty());
        assert!(plan.restore_survivor.is_none());
    }
}
