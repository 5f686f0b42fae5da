//! Album cover acquisition and embedding.

use std::fs;
use std::path::{Path, PathBuf};

use common::extension_lower;
use library::naming::{is_disc_folder, split_album_year};
use library::{backup_file, fsops, Action, Report, SyncOptions};
use metadata::{embed_cover, read_cover, CoverArt};
use tracing::{debug, info, warn};

pub const COVER_FILE: &str = "cover.jpg";
pub const FOLDER_FILE: &str = "folder.jpg";
pub const ARTIST_FILE: &str = "artist.jpg";

const LOCAL_COVERS: &[&str] = &[
    "cover.jpg",
    "cover.jpeg",
    "cover.png",
    "large_cover.jpg",
    "folder.jpg",
    "folder.jpeg",
    "folder.png",
    "front.jpg",
    "front.jpeg",
    "front.png",
    "album.jpg",
    "album.png",
];

/// Remote cover provider.
pub trait CoverSource {
    fn front_cover(&self, artist: &str, album: &str) -> Result<Option<Vec<u8>>, String>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArtOrigin {
    Local(PathBuf),
    Embedded(PathBuf),
    Web,
}

impl std::fmt::Display for ArtOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtOrigin::Local(path) => write!(f, "local file {:?}", path),
            ArtOrigin::Embedded(path) => write!(f, "embedded in {:?}", path),
            ArtOrigin::Web => f.write_str("web"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FoundArt {
    pub art: CoverArt,
    pub origin: ArtOrigin,
}

/// Album directory for a track directory: disc folders roll up to their
/// parent.
pub fn album_root(dir: &Path) -> PathBuf {
    let is_disc = dir
        .file_name()
        .and_then(|n| n.to_str())
        .map(is_disc_folder)
        .unwrap_or(false);
    match dir.parent() {
        Some(parent) if is_disc => parent.to_path_buf(),
        _ => dir.to_path_buf(),
    }
}

/// Artist and album named by a canonical `Artist/(Year) Album` directory.
pub fn identity_from_dir(album_dir: &Path) -> Option<(String, String)> {
    let album_folder = album_dir.file_name()?.to_string_lossy().to_string();
    let artist = album_dir.parent()?.file_name()?.to_string_lossy().to_string();
    let (album, _) = split_album_year(&album_folder);
    Some((artist, album))
}

/// Well-known names first, then any image whose name mentions "cover" or
/// "front" (`Album Cover.png`, `front_scan.jpg`).
pub fn find_local_cover(album_dir: &Path) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(album_dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    entries.sort();
    let named = LOCAL_COVERS.iter().find_map(|wanted| {
        entries
            .iter()
            .find(|path| {
                path.file_name()
                    .map(|n| n.to_string_lossy().eq_ignore_ascii_case(wanted))
                    .unwrap_or(false)
            })
            .cloned()
    });
    named.or_else(|| {
        entries
            .iter()
            .find(|path| {
                let is_image = matches!(extension_lower(path).as_deref(), Some("jpg" | "jpeg" | "png"));
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                is_image && (stem.contains("cover") || stem.contains("front"))
            })
            .cloned()
    })
}

/// Local image, then the first embedded picture, then the web.
pub fn find_cover_art(
    album_dir: &Path,
    tracks: &[PathBuf],
    web: Option<&dyn CoverSource>,
) -> Option<FoundArt> {
    if let Some(path) = find_local_cover(album_dir) {
        match fs::read(&path) {
            Ok(data) => {
                let mime = metadata::guess_mime(&data);
                return Some(FoundArt {
                    art: CoverArt { data, mime },
                    origin: ArtOrigin::Local(path),
                });
            }
            Err(err) => warn!("Cannot read {:?}: {}", path, err),
        }
    }

    for track in tracks {
        match read_cover(track) {
            Ok(Some(art)) => {
                return Some(FoundArt {
                    art,
                    origin: ArtOrigin::Embedded(track.clone()),
                })
            }
            Ok(None) => {}
            Err(err) => debug!("No readable art in {:?}: {}", track, err),
        }
    }

    let web = web?;
    let (artist, album) = identity_from_dir(album_dir)?;
    match web.front_cover(&artist, &album) {
        Ok(Some(data)) => {
            let mime = metadata::guess_mime(&data);
            Some(FoundArt {
                art: CoverArt { data, mime },
                origin: ArtOrigin::Web,
            })
        }
        Ok(None) => None,
        Err(err) => {
            warn!("Web art lookup failed for {} - {}: {}", artist, album, err);
            None
        }
    }
}

/// Files of one album: those directly in `album_dir` plus those in its disc
/// subfolders. Sibling albums and other nested folders are not included.
fn album_files(album_dir: &Path) -> Vec<PathBuf> {
    let mut files = fsops::files_in_dir(album_dir).unwrap_or_default();
    let mut discs: Vec<PathBuf> = match fs::read_dir(album_dir) {
        Ok(entries) => entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(is_disc_folder)
                    .unwrap_or(false)
            })
            .collect(),
        Err(_) => Vec::new(),
    };
    discs.sort();
    for disc in discs {
        files.extend(fsops::files_in_dir(&disc).unwrap_or_default());
    }
    files
}

fn audio_tracks(album_dir: &Path, options: &SyncOptions) -> Vec<PathBuf> {
    album_files(album_dir)
        .into_iter()
        .filter(|path| options.is_audio(path))
        .collect()
}

fn flac_tracks(album_dir: &Path) -> Vec<PathBuf> {
    album_files(album_dir)
        .into_iter()
        .filter(|path| extension_lower(path).as_deref() == Some("flac"))
        .collect()
}

/// Whether `album_dir` holds audio itself or in a disc subfolder.
pub fn holds_album_audio(album_dir: &Path, options: &SyncOptions) -> bool {
    !audio_tracks(album_dir, options).is_empty()
}

/// Make sure `album_dir` has a `cover.jpg` and a `folder.jpg`.
pub fn ensure_cover(album_dir: &Path, web: Option<&dyn CoverSource>, options: &SyncOptions) -> Report {
    let mut report = Report::new();
    let cover_path = album_dir.join(COVER_FILE);
    let folder_path = album_dir.join(FOLDER_FILE);

    if !cover_path.is_file() {
        let tracks = audio_tracks(album_dir, options);
        match find_cover_art(album_dir, &tracks, web) {
            Some(found) => {
                let detail = format!("cover from {}", found.origin);
                if options.dry_run {
                    report.record(&cover_path, Some(cover_path.clone()), Action::Copied, format!("would write {}", detail));
                } else {
                    match fs::write(&cover_path, &found.art.data) {
                        Ok(()) => {
                            info!("Wrote {:?} ({})", cover_path, detail);
                            report.record(&cover_path, Some(cover_path.clone()), Action::Copied, detail);
                        }
                        Err(err) => report.record(
                            &cover_path,
                            Some(cover_path.clone()),
                            Action::Error,
                            format!("cannot write cover: {}", err),
                        ),
                    }
                }
            }
            None => {
                report.record(album_dir, None, Action::Warning, "could not obtain artwork");
                return report;
            }
        }
    }

    if !folder_path.exists() && (cover_path.is_file() || options.dry_run) {
        if options.dry_run {
            report.record(&cover_path, Some(folder_path), Action::Copied, "would create folder.jpg");
        } else {
            match fs::copy(&cover_path, &folder_path) {
                Ok(_) => report.record(&cover_path, Some(folder_path), Action::Copied, "folder.jpg from cover.jpg"),
                Err(err) => report.record(
                    &cover_path,
                    Some(folder_path),
                    Action::Error,
                    format!("cannot create folder.jpg: {}", err),
                ),
            }
        }
    }
    report
}

/// Artist folders carry the same portrait as `folder.jpg` and `artist.jpg`;
/// whichever one exists supplies the missing other. No portrait, no change.
pub fn ensure_artist_images(artist_dir: &Path, options: &SyncOptions) -> Report {
    let mut report = Report::new();
    let folder_path = artist_dir.join(FOLDER_FILE);
    let artist_path = artist_dir.join(ARTIST_FILE);
    let (from, to) = match (folder_path.is_file(), artist_path.is_file()) {
        (true, false) => (folder_path, artist_path),
        (false, true) => (artist_path, folder_path),
        _ => return report,
    };
    if options.dry_run {
        report.record(&from, Some(to), Action::Copied, "would create artist image");
        return report;
    }
    match fs::copy(&from, &to) {
        Ok(_) => {
            info!("Created artist image {:?}", to);
            report.record(&from, Some(to), Action::Copied, "artist image");
        }
        Err(err) => report.record(&from, Some(to), Action::Error, format!("cannot create artist image: {}", err)),
    }
    report
}

/// Embed `cover.jpg` into the album's FLACs. Without `force` only FLACs that
/// carry no picture are touched. Each file is backed up first when a backup
/// root is configured, and is left alone if that backup fails.
pub fn embed_art(
    album_dir: &Path,
    library_root: &Path,
    backup_root: Option<&Path>,
    force: bool,
    options: &SyncOptions,
) -> Report {
    let mut report = Report::new();
    let cover_path = album_dir.join(COVER_FILE);
    let image = match fs::read(&cover_path) {
        Ok(image) => image,
        Err(_) => {
            debug!("No {} in {:?}, nothing to embed", COVER_FILE, album_dir);
            return report;
        }
    };

    for flac in flac_tracks(album_dir) {
        if !force {
            match read_cover(&flac) {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(err) => {
                    report.record(&flac, Some(flac.clone()), Action::Warning, format!("unreadable, not embedding: {}", err));
                    continue;
                }
            }
        }

        if let Some(backup_root) = backup_root {
            if let Err(err) = backup_file(library_root, backup_root, &flac, options.dry_run) {
                warn!("Backup of {:?} failed: {}", flac, err);
                report.record(&flac, Some(flac.clone()), Action::Error, format!("backup failed, not embedding: {}", err));
                continue;
            }
        }

        if options.dry_run {
            report.record(&flac, Some(flac.clone()), Action::Upgraded, "would embed cover art");
            continue;
        }
        match embed_cover(&flac, &image) {
            Ok(()) => {
                info!("Embedded cover into {:?}", flac);
                report.record(&flac, Some(flac.clone()), Action::Upgraded, "embedded cover art");
            }
            Err(err) => {
                warn!("Embedding into {:?} failed: {}", flac, err);
                report.record(&flac, Some(flac.clone()), Action::Error, format!("embed failed: {}", err));
            }
        }
    }
    report
}

/// Album directories whose `cover.jpg` was written by `report`.
pub fn albums_with_new_cover(report: &Report) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = report
        .outcomes()
        .iter()
        .filter(|o| matches!(o.action, Action::Copied | Action::Upgraded))
        .filter_map(|o| o.dest_path.as_deref())
        .filter(|dest| {
            dest.file_name()
                .map(|n| n.to_string_lossy().eq_ignore_ascii_case(COVER_FILE))
                .unwrap_or(false)
        })
        .filter_map(Path::parent)
        .map(Path::to_path_buf)
        .collect();
    dirs.sort();
    dirs.dedup();
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::tempdir;

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 1, 2, 3];

    struct FixedCover {
        calls: Cell<usize>,
        data: Option<Vec<u8>>,
    }

    impl CoverSource for FixedCover {
        fn front_cover(&self, _artist: &str, _album: &str) -> Result<Option<Vec<u8>>, String> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.data.clone())
        }
    }

    #[test]
    fn album_root_rolls_disc_folders_up() {
        assert_eq!(album_root(Path::new("/m/A/B/CD2")), PathBuf::from("/m/A/B"));
        assert_eq!(album_root(Path::new("/m/A/B")), PathBuf::from("/m/A/B"));
        assert_eq!(
            identity_from_dir(Path::new("/m/The Band/(2013) Great Album")),
            Some(("The Band".to_string(), "Great Album".to_string()))
        );
    }

    #[test]
    fn album_names_with_a_volume_number_are_album_roots() {
        let dir = Path::new("/m/Band/(2003) Kill Bill Vol. 1");
        assert_eq!(album_root(dir), dir.to_path_buf());
        assert_eq!(album_root(Path::new("/m/Band/Greatest Hits Vol. 2")), PathBuf::from("/m/Band/Greatest Hits Vol. 2"));
        assert_eq!(album_root(Path::new("/m/Band/Box/Disc 3")), PathBuf::from("/m/Band/Box"));
    }

    #[test]
    fn embedding_stays_inside_one_album() {
        let dir = tempdir().unwrap();
        let library = dir.path().join("lib");
        let backups = dir.path().join("bak");
        let artist = library.join("Band");
        let album = artist.join("Box");
        let sibling = artist.join("Other Album");
        fs::create_dir_all(album.join("CD1")).unwrap();
        fs::create_dir_all(album.join("Extras")).unwrap();
        fs::create_dir_all(&sibling).unwrap();
        fs::write(album.join(COVER_FILE), JPEG).unwrap();
        fs::write(album.join("CD1/01 Song.flac"), b"not audio").unwrap();
        fs::write(album.join("Extras/01 Demo.flac"), b"not audio").unwrap();
        fs::write(sibling.join("01 Other.flac"), b"not audio").unwrap();
        fs::write(artist.join(COVER_FILE), JPEG).unwrap();

        let report = embed_art(&album, &library, Some(&backups), true, &SyncOptions::default());
        assert_eq!(report.count(Action::Error), 1);
        assert!(backups.join("Band/Box/CD1/01 Song.flac").exists());
        assert!(!backups.join("Band/Box/Extras").exists());

        // an artist folder is not an album: its own files only, none of them FLAC
        let report = embed_art(&artist, &library, Some(&backups), true, &SyncOptions::default());
        assert!(report.outcomes().is_empty());
        assert!(!backups.join("Band/Other Album").exists());
        assert!(!holds_album_audio(&artist, &SyncOptions::default()));
        assert!(holds_album_audio(&album, &SyncOptions::default()));
    }

    #[test]
    fn loosely_named_cover_images_are_found() {
        let dir = tempdir().unwrap();
        let album = dir.path().join("Band").join("Album");
        fs::create_dir_all(&album).unwrap();
        fs::write(album.join("back.jpg"), JPEG).unwrap();
        fs::write(album.join("Album Cover (Hi-Res).PNG"), JPEG).unwrap();
        assert_eq!(find_local_cover(&album), Some(album.join("Album Cover (Hi-Res).PNG")));

        fs::write(album.join("folder.jpg"), JPEG).unwrap();
        assert_eq!(find_local_cover(&album), Some(album.join("folder.jpg")));
    }

    #[test]
    fn local_cover_wins_over_web() {
        let dir = tempdir().unwrap();
        let album = dir.path().join("Band").join("Album");
        fs::create_dir_all(&album).unwrap();
        fs::write(album.join("Front.JPG"), JPEG).unwrap();
        let web = FixedCover { calls: Cell::new(0), data: Some(b"web".to_vec()) };

        let found = find_cover_art(&album, &[], Some(&web)).unwrap();
        assert!(matches!(found.origin, ArtOrigin::Local(_)));
        assert_eq!(found.art.mime.as_deref(), Some("image/jpeg"));
        assert_eq!(web.calls.get(), 0);
    }

    #[test]
    fn ensure_cover_fetches_from_web_and_adds_folder_jpg() {
        let dir = tempdir().unwrap();
        let album = dir.path().join("Band").join("(2001) Album");
        fs::create_dir_all(&album).unwrap();
        fs::write(album.join("01 Song.flac"), b"not audio").unwrap();
        let web = FixedCover { calls: Cell::new(0), data: Some(JPEG.to_vec()) };

        let report = ensure_cover(&album, Some(&web), &SyncOptions::default());
        assert_eq!(report.count(Action::Copied), 2);
        assert_eq!(fs::read(album.join(COVER_FILE)).unwrap(), JPEG);
        assert!(album.join(FOLDER_FILE).exists());
        assert_eq!(albums_with_new_cover(&report), vec![album.clone()]);
    }

    #[test]
    fn missing_art_is_a_warning() {
        let dir = tempdir().unwrap();
        let album = dir.path().join("Band").join("Album");
        fs::create_dir_all(&album).unwrap();
        let report = ensure_cover(&album, None, &SyncOptions::default());
        assert_eq!(report.count(Action::Warning), 1);
    }

    #[test]
    fn dry_run_ensure_cover_writes_nothing() {
        let dir = tempdir().unwrap();
        let album = dir.path().join("Band").join("Album");
        fs::create_dir_all(&album).unwrap();
        let web = FixedCover { calls: Cell::new(0), data: Some(JPEG.to_vec()) };
        let options = SyncOptions { dry_run: true, ..SyncOptions::default() };

        let report = ensure_cover(&album, Some(&web), &options);
        assert_eq!(report.count(Action::Copied), 2);
        assert!(!album.join(COVER_FILE).exists());
    }

    #[test]
    fn embed_skips_unreadable_flacs_without_force() {
        let dir = tempdir().unwrap();
        let library = dir.path().join("lib");
        let album = library.join("Band").join("Album");
        fs::create_dir_all(&album).unwrap();
        fs::write(album.join(COVER_FILE), JPEG).unwrap();
        fs::write(album.join("01 Song.flac"), b"not audio").unwrap();

        let report = embed_art(&album, &library, None, false, &SyncOptions::default());
        assert_eq!(report.count(Action::Warning), 1);
        assert_eq!(fs::read(album.join("01 Song.flac")).unwrap(), b"not audio");
    }

    #[test]
    fn forced_embed_backs_up_before_failing_on_bad_file() {
        let dir = tempdir().unwrap();
        let library = dir.path().join("lib");
        let backups = dir.path().join("bak");
        let album = library.join("Band").join("Album");
        fs::create_dir_all(&album).unwrap();
        fs::write(album.join(COVER_FILE), JPEG).unwrap();
        fs::write(album.join("01 Song.flac"), b"not audio").unwrap();

        let report = embed_art(&album, &library, Some(&backups), true, &SyncOptions::default());
        assert_eq!(report.count(Action::Error), 1);
        assert!(backups.join("Band/Album/01 Song.flac").exists());
    }

    #[test]
    fn artist_portrait_is_kept_under_both_names() {
        let dir = tempdir().unwrap();
        let artist = dir.path().join("Band");
        fs::create_dir_all(&artist).unwrap();
        assert!(ensure_artist_images(&artist, &SyncOptions::default()).outcomes().is_empty());

        fs::write(artist.join(ARTIST_FILE), JPEG).unwrap();
        let dry = SyncOptions { dry_run: true, ..SyncOptions::default() };
        assert_eq!(ensure_artist_images(&artist, &dry).count(Action::Copied), 1);
        assert!(!artist.join(FOLDER_FILE).exists());

        let report = ensure_artist_images(&artist, &SyncOptions::default());
        assert_eq!(report.count(Action::Copied), 1);
        assert_eq!(fs::read(artist.join(FOLDER_FILE)).unwrap(), JPEG);
        assert!(ensure_artist_images(&artist, &SyncOptions::default()).outcomes().is_empty());
    }
}
