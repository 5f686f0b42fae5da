//! Filesystem primitives shared by the reconcilers.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};
use walkdir::WalkDir;

/// Copy `src` over `dest` through a staging file in the destination
/// directory, so a reader never sees a half-written destination.
pub fn replace_file(src: &Path, dest: &Path) -> io::Result<()> {
    ensure_parent(dest)?;
    let staging = staging_path(dest);
    if let Err(err) = fs::copy(src, &staging) {
        let _ = fs::remove_file(&staging);
        return Err(err);
    }
    if let Err(err) = fs::rename(&staging, dest) {
        let _ = fs::remove_file(&staging);
        return Err(err);
    }
    Ok(())
}

/// Like [`replace_file`] but also carries the source modification time, so a
/// later size+mtime comparison sees the two files as identical.
pub fn replace_file_preserving_mtime(src: &Path, dest: &Path) -> io::Result<()> {
    let modified = fs::metadata(src)?.modified()?;
    replace_file(src, dest)?;
    set_modified(dest, modified)
}

/// Rename when possible, else copy and remove the source.
pub fn move_file(src: &Path, dest: &Path) -> io::Result<()> {
    ensure_parent(dest)?;
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(err) => {
            debug!("Rename {:?} failed ({}), copying instead", src, err);
            replace_file(src, dest)?;
            fs::remove_file(src)
        }
    }
}

pub fn remove_file(path: &Path) -> io::Result<()> {
    fs::remove_file(path)
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn staging_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.partial", name))
}

fn set_modified(path: &Path, modified: SystemTime) -> io::Result<()> {
    let file = fs::OpenOptions::new().write(true).open(path)?;
    file.set_modified(modified)
}

/// Every regular file under `root`, in file-name order per directory.
/// Directories whose name is in `exclude_dirs` are not descended.
pub fn list_files(root: &Path, exclude_dirs: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !(entry.file_type().is_dir() && is_excluded(entry.path(), exclude_dirs))
        });
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable entry under {:?}: {}", root, err);
                continue;
            }
        };
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files
}

/// Every directory strictly below `root`, parents before children.
pub fn list_dirs(root: &Path, exclude_dirs: &[String]) -> Vec<PathBuf> {
    WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !(entry.file_type().is_dir() && is_excluded(entry.path(), exclude_dirs)))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect()
}

fn is_excluded(path: &Path, exclude_dirs: &[String]) -> bool {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => exclude_dirs.iter().any(|ex| ex == name),
        None => false,
    }
}

#[derive(Debug, Default)]
pub struct PruneResult {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, io::Error)>,
}

/// Remove directories under `root` that hold nothing but junk files,
/// deepest first. `root` itself is never removed, and neither is any
/// directory for which `keep` returns true or whose name is excluded.
///
/// In a dry run nothing is touched, but a directory whose only children
/// would have been removed is still reported.
pub fn prune_empty_dirs(
    root: &Path,
    junk_filenames: &[String],
    exclude_dirs: &[String],
    dry_run: bool,
    keep: &dyn Fn(&Path) -> bool,
) -> PruneResult {
    let mut result = PruneResult::default();
    let mut gone: HashSet<PathBuf> = HashSet::new();

    let mut dirs = list_dirs(root, exclude_dirs);
    dirs.reverse();
    for dir in dirs {
        if keep(&dir) {
            continue;
        }
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                result.failed.push((dir, err));
                continue;
            }
        };

        let mut junk = Vec::new();
        let mut occupied = false;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                if !gone.contains(&path) {
                    occupied = true;
                    break;
                }
            } else if is_junk_name(&path, junk_filenames) {
                junk.push(path);
            } else {
                occupied = true;
                break;
            }
        }
        if occupied {
            continue;
        }

        if !dry_run {
            let cleared = junk.iter().try_for_each(|path| fs::remove_file(path));
            if let Err(err) = cleared.and_then(|()| fs::remove_dir(&dir)) {
                result.failed.push((dir, err));
                continue;
            }
        }
        debug!("Removed empty directory {:?}", dir);
        gone.insert(dir.clone());
        result.removed.push(dir);
    }
    result
}

pub fn is_junk_name(path: &Path, junk_filenames: &[String]) -> bool {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => junk_filenames.iter().any(|j| j.eq_ignore_ascii_case(name)),
        None => false,
    }
}

/// Non-recursive, sorted listing of the regular files in `dir`.
pub fn files_in_dir(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
