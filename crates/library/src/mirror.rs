//! One-way mirroring of the library to a secondary destination.

use std::fs;
use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::fsops;
use crate::report::{Action, Report};
use crate::SyncOptions;

const MTIME_TOLERANCE: Duration = Duration::from_secs(1);

fn change_reason(source: &Path, target: &Path) -> Option<&'static str> {
    let target_meta = match fs::metadata(target) {
        Ok(meta) => meta,
        Err(_) => return Some("new file"),
    };
    let source_meta = match fs::metadata(source) {
        Ok(meta) => meta,
        Err(_) => return Some("source unreadable"),
    };
    if source_meta.len() != target_meta.len() {
        return Some("size changed");
    }
    match (source_meta.modified(), target_meta.modified()) {
        (Ok(a), Ok(b)) => {
            let drift = a.duration_since(b).unwrap_or_else(|e| e.duration());
            if drift > MTIME_TOLERANCE {
                Some("modification time changed")
            } else {
                None
            }
        }
        _ => Some("modification time unknown"),
    }
}

/// A missing or empty source looks exactly like "delete everything", which
/// is never what an unmounted library volume means.
fn source_available(source_root: &Path) -> bool {
    fs::read_dir(source_root)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Make `mirror_root` a copy of `source_root`: changed files are copied,
/// files with no source counterpart are deleted and emptied directories are
/// removed. Directories named in `exclude_dirs` are left alone on both
/// sides.
pub fn mirror_tree(
    source_root: &Path,
    mirror_root: &Path,
    exclude_dirs: &[String],
    options: &SyncOptions,
) -> Report {
    let mut report = Report::new();
    info!("Mirroring {:?} to {:?}", source_root, mirror_root);

    for source in fsops::list_files(source_root, exclude_dirs) {
        if options.is_junk(&source) {
            continue;
        }
        let rel = match source.strip_prefix(source_root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let target = mirror_root.join(rel);
        let reason = match change_reason(&source, &target) {
            Some(reason) => reason,
            None => {
                report.record(&source, Some(target), Action::Skipped, "unchanged");
                continue;
            }
        };
        if options.dry_run {
            report.record(&source, Some(target), Action::Copied, format!("would copy: {}", reason));
            continue;
        }
        match fsops::replace_file_preserving_mtime(&source, &target) {
            Ok(()) => report.record(&source, Some(target), Action::Copied, reason),
            Err(err) => {
                warn!("Mirror copy of {:?} failed: {}", source, err);
                report.record(&source, Some(target), Action::Error, format!("copy failed: {}", err));
            }
        }
    }

    if mirror_root.is_dir() && !source_available(source_root) {
        warn!("Source {:?} is missing or empty, not deleting anything on the mirror", source_root);
        report.record(
            source_root,
            Some(mirror_root.to_path_buf()),
            Action::Error,
            "source missing or empty; mirror deletions skipped",
        );
    } else if mirror_root.is_dir() {
        for target in fsops::list_files(mirror_root, exclude_dirs) {
            if options.is_junk(&target) {
                continue;
            }
            if !source_root.is_dir() {
                warn!("Source {:?} disappeared, stopping mirror deletions", source_root);
                report.record(
                    source_root,
                    Some(mirror_root.to_path_buf()),
                    Action::Error,
                    "source disappeared; mirror deletions stopped",
                );
                return report;
            }
            let rel = match target.strip_prefix(mirror_root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            if source_root.join(rel).exists() {
                continue;
            }
            if options.dry_run {
                report.record(&target, None, Action::Deleted, "would delete: not in source");
                continue;
            }
            match fsops::remove_file(&target) {
                Ok(()) => report.record(&target, None, Action::Deleted, "not in source"),
                Err(err) => {
                    warn!("Mirror delete of {:?} failed: {}", target, err);
                    report.record(&target, None, Action::Error, format!("delete failed: {}", err));
                }
            }
        }

        let pruned = fsops::prune_empty_dirs(
            mirror_root,
            &options.junk_filenames,
            exclude_dirs,
            options.dry_run,
            &|dir: &Path| {
                dir.strip_prefix(mirror_root)
                    .map(|rel| source_root.join(rel).is_dir())
                    .unwrap_or(false)
            },
        );
        for dir in pruned.removed {
            report.record(dir, None, Action::Deleted, "empty mirror folder");
        }
        for (dir, err) in pruned.failed {
            warn!("Could not remove mirror directory {:?}: {}", dir, err);
            report.record(dir, None, Action::Error, format!("rmdir failed: {}", err));
        }
    }

    let summary = report.summary();
    info!(
        "Mirror finished: {} copied, {} deleted, {} unchanged",
        summary.copied, summary.deleted, summary.skipped
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn excludes() -> Vec<String> {
        vec![".thumbnails".to_string()]
    }

    #[test]
    fn copies_new_and_changed_files_then_goes_quiet() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("lib");
        let mirror = dir.path().join("mirror");
        fs::create_dir_all(source.join("A/B")).unwrap();
        fs::write(source.join("A/B/01 Song.flac"), b"audio").unwrap();
        fs::write(source.join("A/B/cover.jpg"), b"img").unwrap();
        fs::write(source.join("A/B/.DS_Store"), b"").unwrap();

        let options = SyncOptions::default();
        let first = mirror_tree(&source, &mirror, &excludes(), &options);
        assert_eq!(first.count(Action::Copied), 2);
        assert!(!mirror.join("A/B/.DS_Store").exists());

        let second = mirror_tree(&source, &mirror, &excludes(), &options);
        assert_eq!(second.count(Action::Copied), 0);
        assert_eq!(second.count(Action::Skipped), 2);

        fs::write(source.join("A/B/cover.jpg"), b"bigger image").unwrap();
        let third = mirror_tree(&source, &mirror, &excludes(), &options);
        assert_eq!(third.count(Action::Copied), 1);
        assert_eq!(fs::read(mirror.join("A/B/cover.jpg")).unwrap(), b"bigger image");
    }

    #[test]
    fn deletes_orphans_and_prunes_but_keeps_excluded() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("lib");
        let mirror = dir.path().join("mirror");
        fs::create_dir_all(source.join("A")).unwrap();
        fs::write(source.join("A/keep.flac"), b"k").unwrap();
        fs::create_dir_all(mirror.join("Gone/Album")).unwrap();
        fs::write(mirror.join("Gone/Album/old.flac"), b"o").unwrap();
        fs::create_dir_all(mirror.join(".thumbnails")).unwrap();
        fs::write(mirror.join(".thumbnails/t.jpg"), b"t").unwrap();

        let report = mirror_tree(&source, &mirror, &excludes(), &SyncOptions::default());
        let deleted: Vec<_> = report
            .outcomes()
            .iter()
            .filter(|o| o.action == Action::Deleted)
            .map(|o| o.source_path.clone())
            .collect();
        assert_eq!(
            deleted,
            vec![
                mirror.join("Gone/Album/old.flac"),
                mirror.join("Gone/Album"),
                mirror.join("Gone"),
            ]
        );
        assert!(!mirror.join("Gone").exists());
        assert!(mirror.join(".thumbnails/t.jpg").exists());
        assert!(mirror.join("A/keep.flac").exists());
    }

    #[test]
    fn dry_run_mirror_has_no_side_effects() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("lib");
        let mirror = dir.path().join("mirror");
        fs::create_dir_all(source.join("A")).unwrap();
        fs::write(source.join("A/new.flac"), b"n").unwrap();
        fs::create_dir_all(mirror.join("B")).unwrap();
        fs::write(mirror.join("B/orphan.flac"), b"o").unwrap();
        let options = SyncOptions { dry_run: true, ..SyncOptions::default() };

        let report = mirror_tree(&source, &mirror, &excludes(), &options);
        assert_eq!(report.count(Action::Copied), 1);
        assert_eq!(report.count(Action::Deleted), 1);
        assert!(!mirror.join("A").exists());
        assert!(mirror.join("B/orphan.flac").exists());
    }

    #[test]
    fn missing_or_empty_source_never_empties_the_mirror() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("unmounted");
        let mirror = dir.path().join("mirror");
        fs::create_dir_all(mirror.join("A/B")).unwrap();
        fs::write(mirror.join("A/B/01 Song.flac"), b"precious").unwrap();

        let report = mirror_tree(&source, &mirror, &excludes(), &SyncOptions::default());
        assert_eq!(report.count(Action::Error), 1);
        assert_eq!(report.count(Action::Deleted), 0);
        assert!(mirror.join("A/B/01 Song.flac").exists());

        fs::create_dir_all(&source).unwrap();
        let report = mirror_tree(&source, &mirror, &excludes(), &SyncOptions::default());
        assert_eq!(report.count(Action::Error), 1);
        assert!(mirror.join("A/B/01 Song.flac").exists());
    }
}
