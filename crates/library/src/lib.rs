//! Reconciliation core: decides what happens to every candidate audio file
//! and applies those decisions to the library tree.
//!
//! Every component returns a [`Report`] instead of logging into shared
//! state; the caller merges and renders them. Per-file failures are outcomes,
//! never `Err`.

pub mod archive;
pub mod backup;
pub mod compare;
pub mod formats;
pub mod fsops;
pub mod ingest;
pub mod mirror;
pub mod naming;
pub mod overlay;
pub mod probe;
pub mod report;

use std::path::{Path, PathBuf};

use common::AudioExtensions;

pub use compare::{compare, Basis, Decision, SideInfo, SlotComparison};
pub use formats::{
    album_dirs_with_audio, planned_audio_writes, resolve_album_formats, resolve_album_formats_planned,
    resolve_library_formats, resolve_library_formats_planned,
};
pub use ingest::{
    clean_downloads, execute_ingest, group_album_units, plan_ingest, AlbumIdentity, AlbumUnit,
    IdentitySource, IngestPlan, NoLookup, PlannedMove, ReleaseLookup, TrackSetFingerprint,
};
pub use archive::extract_archives;
pub use backup::{backup_file, restore_from_backups, sync_backups};
pub use mirror::mirror_tree;
pub use overlay::{apply_overlay, mirror_overlay_structure};
pub use probe::{LoftyProbe, MediaProbe};
pub use report::{Action, ReconciliationOutcome, Report, ReportSummary};

pub const DEFAULT_JUNK_FILENAMES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];

/// Knobs shared by every component of a run.
#[derive(Clone, Debug)]
pub struct SyncOptions {
    pub extensions: AudioExtensions,
    pub junk_filenames: Vec<String>,
    pub dry_run: bool,
}

impl SyncOptions {
    pub fn is_audio(&self, path: &Path) -> bool {
        self.extensions.contains(path)
    }

    pub fn is_junk(&self, path: &Path) -> bool {
        fsops::is_junk_name(path, &self.junk_filenames)
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            extensions: AudioExtensions::default(),
            junk_filenames: DEFAULT_JUNK_FILENAMES.iter().map(|s| s.to_string()).collect(),
            dry_run: false,
        }
    }
}

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    MissingRoot(PathBuf),
    NotADirectory(PathBuf),
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::MissingRoot(path) => write!(f, "root does not exist: {:?}", path),
            LibraryError::NotADirectory(path) => write!(f, "root is not a directory: {:?}", path),
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

/// Fatal precondition check for a root the caller is about to hand to the
/// core. Cheap enough to run for every configured root before a pass.
pub fn check_root(path: &Path) -> Result<(), LibraryError> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(LibraryError::MissingRoot(path.to_path_buf()))
        }
        Err(err) => return Err(err.into()),
    };
    if !metadata.is_dir() {
        return Err(LibraryError::NotADirectory(path.to_path_buf()));
    }
    std::fs::read_dir(path)?;
    Ok(())
}
