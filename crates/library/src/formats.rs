//! Lossless-first enforcement inside one album directory.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use common::AudioAsset;
use tracing::{debug, info, warn};

use crate::fsops;
use crate::naming::{file_stem, parse_track_file_name, title_key};
use crate::probe::MediaProbe;
use crate::report::{Action, Report};
use crate::SyncOptions;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct TrackKey {
    track_no: Option<u16>,
    title: String,
}

fn track_key(asset: &AudioAsset) -> TrackKey {
    let artist = asset.tags.effective_artist();
    let parsed = parse_track_file_name(&file_stem(&asset.path), artist);
    let title = asset
        .tags
        .effective_title()
        .map(str::to_string)
        .unwrap_or(parsed.title);
    TrackKey {
        track_no: asset.tags.track_no.or(parsed.track_no),
        title: title_key(&title),
    }
}

/// Delete every non-FLAC copy of a track that also exists as FLAC in
/// `album_dir`. Only the directory itself is scanned, not its children.
pub fn resolve_album_formats(
    album_dir: &Path,
    probe: &dyn MediaProbe,
    options: &SyncOptions,
) -> Report {
    resolve_album_formats_planned(album_dir, &[], probe, options)
}

/// [`resolve_album_formats`] as if every asset in `planned` had already been
/// written to its `path`. Dry runs pass the writes earlier steps only
/// reported, so the deletions they would cause show up as well.
pub fn resolve_album_formats_planned(
    album_dir: &Path,
    planned: &[AudioAsset],
    probe: &dyn MediaProbe,
    options: &SyncOptions,
) -> Report {
    let mut report = Report::new();
    let incoming: Vec<&AudioAsset> = planned
        .iter()
        .filter(|asset| asset.path.parent() == Some(album_dir))
        .collect();
    let files = match fsops::files_in_dir(album_dir) {
        Ok(files) => files,
        Err(_) if !incoming.is_empty() && !album_dir.exists() => Vec::new(),
        Err(err) => {
            warn!("Cannot list {:?}: {}", album_dir, err);
            report.record(album_dir, None, Action::Error, format!("cannot list directory: {}", err));
            return report;
        }
    };

    let mut groups: BTreeMap<TrackKey, Vec<AudioAsset>> = BTreeMap::new();
    for path in files.into_iter().filter(|p| options.is_audio(p)) {
        if incoming.iter().any(|asset| asset.path == path) {
            continue;
        }
        match probe.probe(&path) {
            Ok(asset) => groups.entry(track_key(&asset)).or_default().push(asset),
            Err(err) => {
                warn!("Cannot inspect {:?}: {}", path, err);
                report.record(&path, None, Action::Error, format!("cannot inspect: {}", err));
            }
        }
    }

    for asset in incoming {
        groups.entry(track_key(asset)).or_default().push(asset.clone());
    }

    for (key, members) in groups {
        if members.len() < 2 || !members.iter().any(|m| m.format.is_flac()) {
            continue;
        }
        debug!("Track {:?} {:?} has a FLAC copy", key.track_no, key.title);
        for duplicate in members.iter().filter(|m| !m.format.is_flac()) {
            let path = &duplicate.path;
            if options.dry_run {
                report.record(path, None, Action::Deleted, "would delete: FLAC copy present");
                continue;
            }
            match fsops::remove_file(path) {
                Ok(()) => {
                    info!("Deleted {:?}: FLAC copy present", path);
                    report.record(path, None, Action::Deleted, "FLAC copy present");
                }
                Err(err) => {
                    warn!("Failed to delete {:?}: {}", path, err);
                    report.record(path, None, Action::Error, format!("delete failed: {}", err));
                }
            }
        }
    }
    report
}

/// Directories under `root` (the root included) that directly hold audio.
pub fn album_dirs_with_audio(root: &Path, options: &SyncOptions) -> Vec<PathBuf> {
    let dirs: BTreeSet<PathBuf> = fsops::list_files(root, &[])
        .into_iter()
        .filter(|path| options.is_audio(path))
        .filter_map(|path| path.parent().map(Path::to_path_buf))
        .collect();
    dirs.into_iter().collect()
}

/// Run [`resolve_album_formats`] over every album directory of `root`.
pub fn resolve_library_formats(
    root: &Path,
    probe: &dyn MediaProbe,
    options: &SyncOptions,
) -> Report {
    resolve_library_formats_planned(root, &[], probe, options)
}

/// [`resolve_library_formats`] with pending writes; directories that only
/// exist in `planned` are visited too.
pub fn resolve_library_formats_planned(
    root: &Path,
    planned: &[AudioAsset],
    probe: &dyn MediaProbe,
    options: &SyncOptions,
) -> Report {
    let mut dirs: BTreeSet<PathBuf> = album_dirs_with_audio(root, options).into_iter().collect();
    dirs.extend(
        planned
            .iter()
            .filter(|asset| asset.path.starts_with(root))
            .filter_map(|asset| asset.path.parent().map(Path::to_path_buf)),
    );
    info!("Checking formats in {} album folders", dirs.len());
    let mut report = Report::new();
    for dir in dirs {
        report.extend(resolve_album_formats_planned(&dir, planned, probe, options));
    }
    report
}

/// Audio that `report` says was (or in a dry run, would be) written, described
/// by its source but placed at its destination. The sources must still exist,
/// which only holds for dry runs.
pub fn planned_audio_writes(
    report: &Report,
    probe: &dyn MediaProbe,
    options: &SyncOptions,
) -> Vec<AudioAsset> {
    let mut planned: BTreeMap<PathBuf, AudioAsset> = BTreeMap::new();
    for outcome in report.outcomes() {
        if !matches!(outcome.action, Action::Copied | Action::Upgraded) {
            continue;
        }
        let dest = match &outcome.dest_path {
            Some(dest) if options.is_audio(dest) => dest,
            _ => continue,
        };
        match probe.probe(&outcome.source_path) {
            Ok(mut asset) => {
                asset.path = dest.clone();
                planned.insert(dest.clone(), asset);
            }
            Err(err) => debug!("Skipping planned write {:?}: {}", outcome.source_path, err),
        }
    }
    planned.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::stub::{write_fixture, StubProbe};
    use proptest::prelude::*;
    use std::fs;
    use tempfile::tempdir;

    const EXTENSIONS: [&str; 4] = ["flac", "mp3", "m4a", "ogg"];

    #[test]
    fn flac_copy_removes_mp3_duplicate() {
        let dir = tempdir().unwrap();
        let album = dir.path().join("Artist").join("(2010) Album");
        let flac = write_fixture(&album.join("02 Song.flac"), &["rate=44100"], 100);
        let mp3 = write_fixture(&album.join("02 Song.mp3"), &["rate=44100"], 10);
        let other = write_fixture(&album.join("03 Other.mp3"), &[], 10);

        let report = resolve_album_formats(&album, &StubProbe, &SyncOptions::default());
        assert_eq!(report.count(Action::Deleted), 1);
        assert_eq!(report.outcomes()[0].source_path, mp3);
        assert!(flac.exists());
        assert!(!mp3.exists());
        assert!(other.exists());
    }

    #[test]
    fn duplicates_match_by_tags_not_file_name() {
        let dir = tempdir().unwrap();
        let album = dir.path().join("Album");
        write_fixture(&album.join("02 Song.flac"), &["track=2", "title=Song"], 0);
        let renamed = write_fixture(
            &album.join("song (web).mp3"),
            &["track=2", "title=  SONG "],
            0,
        );

        let report = resolve_album_formats(&album, &StubProbe, &SyncOptions::default());
        assert_eq!(report.count(Action::Deleted), 1);
        assert!(!renamed.exists());
    }

    #[test]
    fn directories_without_flac_are_untouched() {
        let dir = tempdir().unwrap();
        let album = dir.path().join("Album");
        let mp3 = write_fixture(&album.join("01 Song.mp3"), &[], 0);
        let m4a = write_fixture(&album.join("01 Song.m4a"), &[], 0);

        let report = resolve_album_formats(&album, &StubProbe, &SyncOptions::default());
        assert!(report.is_empty());
        assert!(mp3.exists() && m4a.exists());
    }

    #[test]
    fn unverified_flac_does_not_count_as_lossless() {
        let dir = tempdir().unwrap();
        let album = dir.path().join("Album");
        let fake = write_fixture(&album.join("01 Song.flac"), &["format=corrupt"], 0);
        let mp3 = write_fixture(&album.join("01 Song.mp3"), &[], 0);

        let report = resolve_album_formats(&album, &StubProbe, &SyncOptions::default());
        assert!(report.is_empty());
        assert!(fake.exists() && mp3.exists());
    }

    #[test]
    fn dry_run_reports_without_deleting() {
        let dir = tempdir().unwrap();
        let album = dir.path().join("Album");
        write_fixture(&album.join("02 Song.flac"), &[], 0);
        let mp3 = write_fixture(&album.join("02 Song.mp3"), &[], 0);
        let options = SyncOptions { dry_run: true, ..SyncOptions::default() };

        let report = resolve_album_formats(&album, &StubProbe, &options);
        assert_eq!(report.count(Action::Deleted), 1);
        assert!(mp3.exists());
    }

    #[test]
    fn library_pass_visits_each_album() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write_fixture(&root.join("A/One/01 X.flac"), &[], 0);
        write_fixture(&root.join("A/One/01 X.mp3"), &[], 0);
        write_fixture(&root.join("B/Two/05 Y.flac"), &[], 0);
        write_fixture(&root.join("B/Two/05 Y.ogg"), &[], 0);
        fs::write(root.join("B/Two/cover.jpg"), b"img").unwrap();

        let options = SyncOptions::default();
        assert_eq!(album_dirs_with_audio(root, &options).len(), 2);
        let report = resolve_library_formats(root, &StubProbe, &options);
        assert_eq!(report.count(Action::Deleted), 2);
        assert!(root.join("B/Two/cover.jpg").exists());
    }

    #[test]
    fn planned_writes_join_the_directory_listing() {
        let dir = tempdir().unwrap();
        let incoming = dir.path().join("incoming");
        let album = dir.path().join("lib/Band/Album");
        let on_disk = write_fixture(&album.join("02 Song.mp3"), &[], 0);
        let source = write_fixture(&incoming.join("02 Song.flac"), &[], 0);

        let mut pending = Report::new();
        pending.record(&source, Some(album.join("02 Song.flac")), Action::Copied, "would copy");
        pending.record(&source, None, Action::Skipped, "unrelated");
        let options = SyncOptions { dry_run: true, ..SyncOptions::default() };
        let planned = planned_audio_writes(&pending, &StubProbe, &options);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].path, album.join("02 Song.flac"));

        let report = resolve_album_formats_planned(&album, &planned, &StubProbe, &options);
        assert_eq!(report.count(Action::Deleted), 1);
        assert_eq!(report.outcomes()[0].source_path, on_disk);
        assert!(on_disk.exists());
    }

    #[test]
    fn planned_album_that_does_not_exist_yet_is_visited() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("lib");
        fs::create_dir_all(&root).unwrap();
        let incoming = dir.path().join("incoming");
        let flac = write_fixture(&incoming.join("01 A.flac"), &[], 0);
        let mp3 = write_fixture(&incoming.join("01 A.mp3"), &[], 0);

        let mut pending = Report::new();
        pending.record(&flac, Some(root.join("New/Album/01 A.flac")), Action::Copied, "");
        pending.record(&mp3, Some(root.join("New/Album/01 A.mp3")), Action::Copied, "");
        let options = SyncOptions { dry_run: true, ..SyncOptions::default() };
        let planned = planned_audio_writes(&pending, &StubProbe, &options);

        let report = resolve_library_formats_planned(&root, &planned, &StubProbe, &options);
        assert_eq!(report.count(Action::Error), 0);
        assert_eq!(report.count(Action::Deleted), 1);
        assert_eq!(report.outcomes()[0].source_path, root.join("New/Album/01 A.mp3"));
    }

    /// Removes the lossy copy of the first track right after inspecting it,
    /// so deleting it later fails.
    struct VanishingLossy {
        vanish: PathBuf,
    }

    impl MediaProbe for VanishingLossy {
        fn probe(&self, path: &Path) -> std::io::Result<AudioAsset> {
            let asset = StubProbe.probe(path)?;
            if path == self.vanish {
                fs::remove_file(path)?;
            }
            Ok(asset)
        }
    }

    #[test]
    fn failed_delete_is_reported_and_later_tracks_still_resolve() {
        let dir = tempdir().unwrap();
        let album = dir.path().join("Album");
        write_fixture(&album.join("01 First.flac"), &[], 0);
        let doomed = write_fixture(&album.join("01 First.mp3"), &[], 0);
        write_fixture(&album.join("02 Second.flac"), &[], 0);
        let second = write_fixture(&album.join("02 Second.ogg"), &[], 0);

        let probe = VanishingLossy { vanish: doomed.clone() };
        let report = resolve_album_formats(&album, &probe, &SyncOptions::default());
        assert_eq!(report.count(Action::Error), 1);
        let failed = report.outcomes().iter().find(|o| o.action == Action::Error).unwrap();
        assert_eq!(failed.source_path, doomed);
        assert_eq!(report.count(Action::Deleted), 1);
        assert!(!second.exists());
        assert!(album.join("02 Second.flac").exists());
    }

    /// Per track, a non-empty subset of `EXTENSIONS` as a bit mask.
    fn album_layout() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(1u8..16, 1..6)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn only_flac_survives_where_one_exists(layout in album_layout()) {
            let dir = tempdir().unwrap();
            let album = dir.path().join("Artist").join("Album");
            for (i, mask) in layout.iter().enumerate() {
                for (bit, ext) in EXTENSIONS.iter().enumerate() {
                    if mask & (1 << bit) != 0 {
                        write_fixture(&album.join(format!("{:02} Song {}.{}", i + 1, i + 1, ext)), &[], i);
                    }
                }
            }

            resolve_album_formats(&album, &StubProbe, &SyncOptions::default());

            for (i, mask) in layout.iter().enumerate() {
                let has_flac = mask & 1 != 0;
                for (bit, ext) in EXTENSIONS.iter().enumerate() {
                    let path = album.join(format!("{:02} Song {}.{}", i + 1, i + 1, ext));
                    let written = mask & (1 << bit) != 0;
                    let expected = written && (!has_flac || *ext == "flac");
                    prop_assert_eq!(path.exists(), expected, "{:?}", path);
                }
            }
        }
    }
}
