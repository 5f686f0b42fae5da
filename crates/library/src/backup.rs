//! One-time backups of library files before they are modified in place, and
//! the restore pass that puts them back.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::fsops;
use crate::report::{Action, Report};
use crate::SyncOptions;

const SAME_MTIME_TOLERANCE: Duration = Duration::from_secs(2);

/// `backup_root/<path relative to library_root>`, or `None` when `path` is
/// outside the library.
pub fn backup_path_for(library_root: &Path, backup_root: &Path, path: &Path) -> Option<PathBuf> {
    let rel = path.strip_prefix(library_root).ok()?;
    Some(backup_root.join(rel))
}

/// Copy `path` into the backup tree unless a backup already exists. Returns
/// the backup written, if any.
pub fn backup_file(
    library_root: &Path,
    backup_root: &Path,
    path: &Path,
    dry_run: bool,
) -> io::Result<Option<PathBuf>> {
    let target = match backup_path_for(library_root, backup_root, path) {
        Some(target) => target,
        None => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{:?} is outside the library", path),
            ))
        }
    };
    if target.exists() {
        debug!("Backup already present for {:?}", path);
        return Ok(None);
    }
    if !dry_run {
        fsops::replace_file_preserving_mtime(path, &target)?;
        info!("Backed up {:?}", path);
    }
    Ok(Some(target))
}

/// Drop the backup for `rel` once the live file has been superseded.
pub fn remove_backup_for(backup_root: &Path, rel: &Path, dry_run: bool) -> io::Result<bool> {
    let target = backup_root.join(rel);
    if !target.is_file() {
        return Ok(false);
    }
    if !dry_run {
        fs::remove_file(&target)?;
        debug!("Removed obsolete backup {:?}", target);
    }
    Ok(true)
}

fn same_file_state(a: &Path, b: &Path) -> bool {
    let (a, b) = match (fs::metadata(a), fs::metadata(b)) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return false,
    };
    if a.len() != b.len() {
        return false;
    }
    match (a.modified(), b.modified()) {
        (Ok(a), Ok(b)) => {
            let drift = a.duration_since(b).unwrap_or_else(|e| e.duration());
            drift <= SAME_MTIME_TOLERANCE
        }
        _ => false,
    }
}

/// Copy every backed-up FLAC over its library path, then delete the backup
/// and prune backup directories left empty.
pub fn restore_from_backups(
    backup_root: &Path,
    library_root: &Path,
    options: &SyncOptions,
) -> Report {
    let mut report = Report::new();
    if !backup_root.is_dir() {
        info!("No backups at {:?}", backup_root);
        return report;
    }

    let backups: Vec<PathBuf> = fsops::list_files(backup_root, &[])
        .into_iter()
        .filter(|path| path.extension().map(|e| e.eq_ignore_ascii_case("flac")).unwrap_or(false))
        .collect();
    info!("Found {} backed up files", backups.len());

    for backup in backups {
        let rel = match backup.strip_prefix(backup_root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => continue,
        };
        let dest = library_root.join(&rel);

        if same_file_state(&backup, &dest) {
            report.record(&backup, Some(dest), Action::Skipped, "library copy identical");
            continue;
        }
        if options.dry_run {
            report.record(&backup, Some(dest), Action::Copied, "would restore from backup");
            continue;
        }
        if let Err(err) = fsops::replace_file_preserving_mtime(&backup, &dest) {
            warn!("Failed to restore {:?}: {}", dest, err);
            report.record(&backup, Some(dest), Action::Error, format!("restore failed: {}", err));
            continue;
        }
        match fs::remove_file(&backup) {
            Ok(()) => report.record(&backup, Some(dest), Action::Copied, "restored from backup"),
            Err(err) => report.record(
                &backup,
                Some(dest),
                Action::DeletedSourceFailed,
                format!("restored, but backup not deleted: {}", err),
            ),
        }
    }

    let pruned = fsops::prune_empty_dirs(
        backup_root,
        &options.junk_filenames,
        &[],
        options.dry_run,
        &|_: &Path| false,
    );
    for (dir, err) in pruned.failed {
        warn!("Could not remove backup directory {:?}: {}", dir, err);
    }
    report
}

/// A backup is redundant once the live file is byte-for-byte what was saved.
/// Size and mtime stand in for the bytes; a live file touched after the
/// backup always differs.
fn backup_matches_live(backup: &Path, live: &Path) -> bool {
    let newer = match (fs::metadata(backup), fs::metadata(live)) {
        (Ok(b), Ok(l)) => match (b.modified(), l.modified()) {
            (Ok(b), Ok(l)) => l > b,
            _ => true,
        },
        _ => true,
    };
    !newer && same_file_state(backup, live)
}

/// Drop backups the library no longer needs: those identical to their live
/// file and those whose live file is gone. Emptied backup folders are pruned.
pub fn sync_backups(backup_root: &Path, library_root: &Path, options: &SyncOptions) -> Report {
    let mut report = Report::new();
    if !backup_root.is_dir() {
        debug!("No backups at {:?}", backup_root);
        return report;
    }
    let library_available = fs::read_dir(library_root)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false);
    if !library_available {
        warn!("Library {:?} is missing or empty, keeping every backup", library_root);
        report.record(
            library_root,
            Some(backup_root.to_path_buf()),
            Action::Error,
            "library missing or empty; backup sync skipped",
        );
        return report;
    }

    for backup in fsops::list_files(backup_root, &[]) {
        if options.is_junk(&backup) {
            continue;
        }
        let rel = match backup.strip_prefix(backup_root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let live = library_root.join(rel);
        let reason = if !live.exists() {
            "live file missing"
        } else if backup_matches_live(&backup, &live) {
            "identical to live file"
        } else {
            debug!("Keeping backup {:?}: live file differs", backup);
            continue;
        };
        if options.dry_run {
            report.record(&backup, Some(live), Action::Deleted, format!("would remove backup: {}", reason));
            continue;
        }
        match fs::remove_file(&backup) {
            Ok(()) => {
                info!("Removed backup {:?}: {}", backup, reason);
                report.record(&backup, Some(live), Action::Deleted, reason);
            }
            Err(err) => {
                warn!("Could not remove backup {:?}: {}", backup, err);
                report.record(&backup, Some(live), Action::Error, format!("delete failed: {}", err));
            }
        }
    }

    let pruned = fsops::prune_empty_dirs(
        backup_root,
        &options.junk_filenames,
        &[],
        options.dry_run,
        &|_: &Path| false,
    );
    for dir in pruned.removed {
        report.record(dir, None, Action::Deleted, "empty backup folder");
    }
    for (dir, err) in pruned.failed {
        warn!("Could not remove backup directory {:?}: {}", dir, err);
        report.record(dir, None, Action::Error, format!("rmdir failed: {}", err));
    }
    report
}
