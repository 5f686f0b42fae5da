use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use library::{
    album_dirs_with_audio, apply_overlay, clean_downloads, execute_ingest, extract_archives,
    mirror_overlay_structure, mirror_tree, plan_ingest, planned_audio_writes, resolve_library_formats,
    resolve_library_formats_planned, restore_from_backups, sync_backups, MediaProbe, ReleaseLookup,
    Report, SyncOptions,
};
use tracing::info;

use crate::artwork::{
    album_root, albums_with_new_cover, embed_art, ensure_artist_images, ensure_cover,
    holds_album_audio, CoverSource,
};
use crate::config::Roots;
use crate::root_art::match_root_artwork;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Ingest downloads, apply the overlay, tidy formats and art, mirror.
    #[default]
    Normal,
    /// Normal, then force-embed overlay-supplied covers into every FLAC.
    Embed,
    /// Put backed-up FLACs back into the library, then mirror.
    Restore,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::Embed => "embed",
            Mode::Restore => "restore",
        }
    }
}

/// Everything one run needs, borrowed from `main`.
pub struct Curator<'a> {
    pub roots: &'a Roots,
    pub options: &'a SyncOptions,
    pub mirror_exclude_dirs: &'a [String],
    pub clean_empty_download_dirs: bool,
    pub probe: &'a dyn MediaProbe,
    pub lookup: &'a dyn ReleaseLookup,
    pub covers: Option<&'a dyn CoverSource>,
}

impl Curator<'_> {
    pub fn run(&self, mode: Mode) -> Report {
        info!(
            "Starting {} run{}",
            mode.as_str(),
            if self.options.dry_run { " (dry)" } else { "" }
        );
        match mode {
            Mode::Normal => self.run_normal(false),
            Mode::Embed => self.run_normal(true),
            Mode::Restore => self.run_restore(),
        }
    }

    fn run_normal(&self, force_overlay_art: bool) -> Report {
        let library_root = &self.roots.library;
        let mut report = Report::new();
        let mut touched: BTreeSet<PathBuf> = BTreeSet::new();

        if let Some(downloads) = &self.roots.downloads {
            report.extend(extract_archives(downloads, self.options));
            let plan = plan_ingest(downloads, library_root, self.probe, self.lookup, self.options);
            info!("Planned {} moves from downloads", plan.moves.len());
            let executed = execute_ingest(&plan, self.probe, self.options);
            touched.extend(executed.touched_album_dirs());
            report.extend(plan.report);
            report.extend(executed);
            report.extend(match_root_artwork(downloads, library_root, self.options));
            if self.clean_empty_download_dirs {
                report.extend(clean_downloads(downloads, self.options));
            }
        }

        let mut overlay_covers: BTreeSet<PathBuf> = BTreeSet::new();
        if let Some(overlay) = &self.roots.overlay {
            let applied = apply_overlay(
                overlay,
                library_root,
                self.roots.backup.as_deref(),
                self.probe,
                self.options,
            );
            touched.extend(applied.touched_album_dirs());
            overlay_covers.extend(albums_with_new_cover(&applied).iter().map(|d| album_root(d)));
            report.extend(applied);
        }

        // A dry run wrote nothing, so the lossy copies its moves would
        // shadow are only found by resolving against the planned writes.
        if self.options.dry_run {
            let planned = planned_audio_writes(&report, self.probe, self.options);
            report.extend(resolve_library_formats_planned(library_root, &planned, self.probe, self.options));
        } else {
            report.extend(resolve_library_formats(library_root, self.probe, self.options));
        }

        // Artist/Album is the shallowest an album can sit; anything above it
        // is an artist folder whose files belong to no album.
        let audio_dirs = album_dirs_with_audio(library_root, self.options);
        let albums: BTreeSet<PathBuf> = audio_dirs
            .iter()
            .map(|dir| album_root(dir))
            .filter(|dir| depth_below(library_root, dir).map_or(false, |depth| depth >= 2))
            .filter(|dir| holds_album_audio(dir, self.options))
            .collect();
        let mut artists: BTreeSet<PathBuf> = touched
            .iter()
            .chain(audio_dirs.iter())
            .filter(|dir| dir.is_dir() && depth_below(library_root, dir) == Some(1))
            .cloned()
            .collect();
        artists.extend(
            albums
                .iter()
                .filter(|album| depth_below(library_root, album) == Some(2))
                .filter_map(|album| album.parent())
                .map(Path::to_path_buf),
        );
        info!("Checking art for {} albums and {} artists", albums.len(), artists.len());

        for album in &albums {
            report.extend(ensure_cover(album, self.covers, self.options));
            let force = force_overlay_art && overlay_covers.contains(album);
            report.extend(embed_art(
                album,
                library_root,
                self.roots.backup.as_deref(),
                force,
                self.options,
            ));
        }

        for artist in &artists {
            report.extend(ensure_artist_images(artist, self.options));
        }

        if let Some(overlay) = &self.roots.overlay {
            report.extend(mirror_overlay_structure(library_root, overlay, self.options));
        }
        if let Some(backup) = &self.roots.backup {
            report.extend(sync_backups(backup, library_root, self.options));
        }
        self.mirror(&mut report);
        report
    }

    fn run_restore(&self) -> Report {
        let mut report = Report::new();
        match &self.roots.backup {
            Some(backup) => report.extend(restore_from_backups(backup, &self.roots.library, self.options)),
            None => info!("No backup root configured, nothing to restore"),
        }
        self.mirror(&mut report);
        report
    }

    fn mirror(&self, report: &mut Report) {
        if let Some(mirror) = &self.roots.mirror {
            report.extend(mirror_tree(
                &self.roots.library,
                mirror,
                self.mirror_exclude_dirs,
                self.options,
            ));
        }
    }
}

/// Number of components `dir` sits below `root`, `None` outside of it.
fn depth_below(root: &Path, dir: &Path) -> Option<usize> {
    dir.strip_prefix(root).ok().map(|rel| rel.components().count())
}
