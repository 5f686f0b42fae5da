//! Unpacks zip downloads in place so the ingest planner sees their tracks.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use common::extension_lower;
use tracing::{info, warn};

use crate::fsops;
use crate::report::{Action, Report};
use crate::SyncOptions;

/// Archive types that are recognised but cannot be unpacked.
const UNSUPPORTED_ARCHIVES: &[&str] = &["rar", "7z", "tar", "gz"];

/// Extract every `.zip` under `downloads_root` into a sibling folder named
/// after the archive (`Album.zip` → `Album/`), then delete the archive.
///
/// An archive whose folder already exists is taken as extracted and left
/// alone. A broken archive is reported and kept, and whatever it managed to
/// write is removed again.
pub fn extract_archives(downloads_root: &Path, options: &SyncOptions) -> Report {
    let mut report = Report::new();
    if !downloads_root.is_dir() {
        return report;
    }

    for archive in fsops::list_files(downloads_root, &[]) {
        let ext = match extension_lower(&archive) {
            Some(ext) => ext,
            None => continue,
        };
        if UNSUPPORTED_ARCHIVES.contains(&ext.as_str()) {
            report.record(&archive, None, Action::Warning, format!("cannot extract .{} archives", ext));
            continue;
        }
        if ext != "zip" {
            continue;
        }

        let target = match extract_dir(&archive) {
            Some(target) => target,
            None => continue,
        };
        if target.exists() {
            report.record(&archive, Some(target), Action::Skipped, "already extracted");
            continue;
        }
        if options.dry_run {
            report.record(&archive, Some(target), Action::Copied, "would extract");
            continue;
        }

        match unzip(&archive, &target) {
            Ok(count) => {
                info!("Extracted {} files from {:?}", count, archive);
                match fsops::remove_file(&archive) {
                    Ok(()) => report.record(&archive, Some(target), Action::Deleted, format!("extracted {} files", count)),
                    Err(err) => report.record(
                        &archive,
                        Some(target),
                        Action::DeletedSourceFailed,
                        format!("extracted {} files, archive not deleted: {}", count, err),
                    ),
                }
            }
            Err(err) => {
                warn!("Cannot extract {:?}: {}", archive, err);
                if target.exists() {
                    if let Err(cleanup) = fs::remove_dir_all(&target) {
                        warn!("Could not remove partial extraction {:?}: {}", target, cleanup);
                    }
                }
                report.record(&archive, None, Action::Error, format!("extraction failed: {}", err));
            }
        }
    }
    report
}

fn extract_dir(archive: &Path) -> Option<PathBuf> {
    let stem = archive.file_stem()?;
    Some(archive.parent()?.join(stem))
}

fn unzip(archive: &Path, target: &Path) -> Result<usize, String> {
    let file = File::open(archive).map_err(|e| e.to_string())?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| e.to_string())?;
    fs::create_dir_all(target).map_err(|e| e.to_string())?;

    let mut written = 0usize;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| e.to_string())?;
        // entries that would escape the target ("../x", "/etc/x") are dropped
        let rel = match entry.enclosed_name() {
            Some(rel) => rel,
            None => {
                warn!("Skipping unsafe entry {:?} in {:?}", entry.name(), archive);
                continue;
            }
        };
        let out_path = target.join(rel);
        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| e.to_string())?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let mut out = File::create(&out_path).map_err(|e| e.to_string())?;
        io::copy(&mut entry, &mut out).map_err(|e| e.to_string())?;
        written += 1;
    }
    Ok(written)
}
