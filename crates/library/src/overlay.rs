//! Applies the overlay (patch) tree onto the library, one file at a time.

use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::backup::remove_backup_for;
use crate::compare::{compare, Decision};
use crate::fsops;
use crate::probe::MediaProbe;
use crate::report::{Action, ReconciliationOutcome, Report};
use crate::SyncOptions;

/// Merge every file under `overlay_root` into the same relative path under
/// `library_root`, deleting each overlay file once its job is done.
///
/// Audio files only replace the library copy when [`compare`] says the
/// overlay copy is better; other files always overwrite. A backup of a
/// replaced audio file under `backup_root` is dropped since the new file is
/// the original from now on.
pub fn apply_overlay(
    overlay_root: &Path,
    library_root: &Path,
    backup_root: Option<&Path>,
    probe: &dyn MediaProbe,
    options: &SyncOptions,
) -> Report {
    let mut report = Report::new();
    if !overlay_root.is_dir() {
        info!("No overlay at {:?}", overlay_root);
        return report;
    }

    let files = fsops::list_files(overlay_root, &[]);
    info!("Found {} files in overlay", files.len());
    for source in files {
        let rel = match source.strip_prefix(overlay_root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => continue,
        };
        let dest = library_root.join(&rel);

        let outcome = if options.is_junk(&source) {
            discard_junk(&source, options)
        } else if rel.parent().map_or(true, |p| p.as_os_str().is_empty()) {
            // nothing in the library lives directly under its root
            ReconciliationOutcome::new(&source, None, Action::Skipped, "not inside an artist folder")
        } else if options.is_audio(&source) {
            apply_audio(&source, &dest, &rel, backup_root, probe, options)
        } else {
            apply_other(&source, &dest, options)
        };
        match outcome.action {
            Action::Error | Action::DeletedSourceFailed => {
                warn!("{} {:?}: {}", outcome.action.as_str(), source, outcome.detail)
            }
            _ => debug!("{} {:?}: {}", outcome.action.as_str(), source, outcome.detail),
        }
        report.push(outcome);
    }
    report
}

fn apply_audio(
    source: &Path,
    dest: &Path,
    rel: &Path,
    backup_root: Option<&Path>,
    probe: &dyn MediaProbe,
    options: &SyncOptions,
) -> ReconciliationOutcome {
    let dest_path = Some(dest.to_path_buf());
    let candidate = match probe.probe(source) {
        Ok(asset) => asset,
        Err(err) => {
            return ReconciliationOutcome::new(
                source,
                dest_path,
                Action::Error,
                format!("cannot inspect overlay file: {}", err),
            )
        }
    };
    let existing = if dest.is_file() {
        match probe.probe(dest) {
            Ok(asset) => Some(asset),
            Err(err) => {
                return ReconciliationOutcome::new(
                    source,
                    dest_path,
                    Action::Error,
                    format!("cannot inspect library file: {}", err),
                )
            }
        }
    } else {
        None
    };

    let comparison = compare(&candidate, existing.as_ref());
    let action = match comparison.decision {
        Decision::CopyNew => Action::Copied,
        Decision::UpgradeReplace => Action::Upgraded,
        Decision::KeepExisting => Action::Skipped,
    };

    if options.dry_run {
        let verb = if comparison.writes_candidate() { "copy" } else { "discard" };
        return ReconciliationOutcome::new(
            source,
            dest_path,
            action,
            format!("would {}: {}", verb, comparison.reason),
        );
    }

    if comparison.writes_candidate() {
        if let Err(err) = fsops::replace_file(source, dest) {
            return ReconciliationOutcome::new(
                source,
                dest_path,
                Action::Error,
                format!("copy failed: {}", err),
            );
        }
        if let Some(backup_root) = backup_root {
            if let Err(err) = remove_backup_for(backup_root, rel, false) {
                warn!("Could not drop obsolete backup for {:?}: {}", rel, err);
            }
        }
    }
    finish_source(source, dest, action, comparison.reason)
}

fn apply_other(source: &Path, dest: &Path, options: &SyncOptions) -> ReconciliationOutcome {
    let dest_path = Some(dest.to_path_buf());
    if options.dry_run {
        return ReconciliationOutcome::new(source, dest_path, Action::Copied, "would copy: non-audio");
    }
    if let Err(err) = fsops::replace_file(source, dest) {
        return ReconciliationOutcome::new(
            source,
            dest_path,
            Action::Error,
            format!("copy failed: {}", err),
        );
    }
    finish_source(source, dest, Action::Copied, "non-audio, overwritten".to_string())
}

fn discard_junk(source: &Path, options: &SyncOptions) -> ReconciliationOutcome {
    if !options.dry_run {
        if let Err(err) = fsops::remove_file(source) {
            return ReconciliationOutcome::new(
                source,
                None,
                Action::DeletedSourceFailed,
                format!("junk file not deleted: {}", err),
            );
        }
    }
    ReconciliationOutcome::new(source, None, Action::Skipped, "junk file discarded")
}

/// The decision for `source` has been applied; remove it from the overlay.
fn finish_source(source: &Path, dest: &Path, action: Action, detail: String) -> ReconciliationOutcome {
    match fsops::remove_file(source) {
        Ok(()) => ReconciliationOutcome::new(source, Some(dest.to_path_buf()), action, detail),
        Err(err) => ReconciliationOutcome::new(
            source,
            Some(dest.to_path_buf()),
            Action::DeletedSourceFailed,
            format!("{} ({} applied, source not deleted: {})", detail, action.as_str(), err),
        ),
    }
}

/// Keep the overlay tree shaped like the library: every library directory
/// gets an overlay counterpart, and empty overlay directories whose library
/// counterpart is gone are removed. Files dropped straight into the overlay
/// root have no library home and are deleted.
pub fn mirror_overlay_structure(
    library_root: &Path,
    overlay_root: &Path,
    options: &SyncOptions,
) -> Report {
    let mut report = Report::new();
    let mut created = 0usize;
    for dir in fsops::list_dirs(library_root, &[]) {
        let rel = match dir.strip_prefix(library_root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let counterpart = overlay_root.join(rel);
        if counterpart.is_dir() {
            continue;
        }
        created += 1;
        if options.dry_run {
            continue;
        }
        if let Err(err) = fs::create_dir_all(&counterpart) {
            warn!("Could not create overlay directory {:?}: {}", counterpart, err);
            report.record(&counterpart, None, Action::Error, format!("mkdir failed: {}", err));
        }
    }
    debug!("Created {} overlay directories", created);

    if overlay_root.is_dir() {
        for stray in fsops::files_in_dir(overlay_root).unwrap_or_default() {
            if options.dry_run {
                report.record(&stray, None, Action::Deleted, "would delete stray file in overlay root");
                continue;
            }
            match fsops::remove_file(&stray) {
                Ok(()) => report.record(&stray, None, Action::Deleted, "stray file in overlay root"),
                Err(err) => report.record(&stray, None, Action::Error, format!("cannot delete stray file: {}", err)),
            }
        }

        let pruned = fsops::prune_empty_dirs(
            overlay_root,
            &options.junk_filenames,
            &[],
            options.dry_run,
            &|dir: &Path| {
                dir.strip_prefix(overlay_root)
                    .map(|rel| library_root.join(rel).is_dir())
                    .unwrap_or(false)
            },
        );
        for dir in pruned.removed {
            report.record(dir, None, Action::Deleted, "overlay directory no longer in library");
        }
        for (dir, err) in pruned.failed {
            report.record(dir, None, Action::Error, format!("rmdir failed: {}", err));
        }
    }
    report
}
