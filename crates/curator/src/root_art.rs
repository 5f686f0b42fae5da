//! Loose cover images left in the downloads root, matched to albums that
//! are already in the library.

use std::fs;
use std::path::{Path, PathBuf};

use common::extension_lower;
use library::naming::{is_disc_folder, split_album_year};
use library::{Action, Report, SyncOptions};
use metadata::image_dimensions;
use tracing::{debug, info, warn};

use crate::artwork::{COVER_FILE, FOLDER_FILE};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
const RESERVED_NAMES: &[&str] = &["cover.jpg", "folder.jpg", "large_cover.jpg"];

struct LibraryAlbum {
    dir: PathBuf,
    artist: String,
    album: String,
}

/// Lowercase letters and digits only, so punctuation and spacing in file
/// names never decide a match.
fn match_key(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn sorted_dirs(dir: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|entry| entry.path())
            .collect(),
        Err(_) => Vec::new(),
    };
    dirs.sort();
    dirs
}

fn library_albums(library_root: &Path) -> Vec<LibraryAlbum> {
    let mut albums = Vec::new();
    for artist_dir in sorted_dirs(library_root) {
        let artist = match artist_dir.file_name() {
            Some(name) => match_key(&name.to_string_lossy()),
            None => continue,
        };
        for album_dir in sorted_dirs(&artist_dir) {
            let name = match album_dir.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => continue,
            };
            if is_disc_folder(&name) {
                continue;
            }
            let album = match_key(&split_album_year(&name).0);
            if artist.is_empty() || album.is_empty() {
                continue;
            }
            albums.push(LibraryAlbum { dir: album_dir, artist: artist.clone(), album });
        }
    }
    albums
}

fn root_images(downloads_root: &Path) -> Vec<PathBuf> {
    let mut images: Vec<PathBuf> = match fs::read_dir(downloads_root) {
        Ok(entries) => entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|entry| entry.path())
            .filter(|path| {
                extension_lower(path)
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
                    .unwrap_or(false)
            })
            .filter(|path| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                !RESERVED_NAMES.contains(&name.as_str())
            })
            .collect(),
        Err(_) => Vec::new(),
    };
    images.sort();
    images
}

/// The album whose artist and title both appear in the image name; with
/// several candidates the longest combined match wins.
fn best_album<'a>(image: &Path, albums: &'a [LibraryAlbum]) -> Option<&'a LibraryAlbum> {
    let stem = match_key(&image.file_stem()?.to_string_lossy());
    let mut best: Option<(usize, &LibraryAlbum)> = None;
    for album in albums {
        if !(stem.contains(&album.artist) && stem.contains(&album.album)) {
            continue;
        }
        let score = album.artist.len() + album.album.len();
        if best.map_or(true, |(top, _)| score > top) {
            best = Some((score, album));
        }
    }
    best.map(|(_, album)| album)
}

fn pixels(path: &Path) -> Option<u64> {
    let bytes = fs::read(path).ok()?;
    let (width, height) = image_dimensions(&bytes)?;
    Some(u64::from(width) * u64::from(height))
}

fn drop_root_image(image: &Path, cover: PathBuf, action: Action, detail: String, report: &mut Report) {
    match fs::remove_file(image) {
        Ok(()) => report.record(image, Some(cover), action, detail),
        Err(err) => {
            warn!("Could not delete {:?}: {}", image, err);
            report.record(
                image,
                Some(cover),
                Action::DeletedSourceFailed,
                format!("{}; image not deleted: {}", detail, err),
            );
        }
    }
}

fn install_cover(image: &Path, album_dir: &Path) -> std::io::Result<()> {
    let cover = album_dir.join(COVER_FILE);
    let folder = album_dir.join(FOLDER_FILE);
    let old_cover_len = fs::metadata(&cover).map(|meta| meta.len()).ok();
    fs::copy(image, &cover)?;
    let folder_follows_cover = match fs::metadata(&folder) {
        Ok(meta) => Some(meta.len()) == old_cover_len,
        Err(_) => true,
    };
    if folder_follows_cover {
        fs::copy(&cover, &folder)?;
    }
    Ok(())
}

/// Images downloaded on their own (say from a browser) after their album was
/// ingested. Each one naming an existing `Artist/Album` either replaces that
/// album's cover, when it has more pixels, or is discarded.
pub fn match_root_artwork(downloads_root: &Path, library_root: &Path, options: &SyncOptions) -> Report {
    let mut report = Report::new();
    let images = root_images(downloads_root);
    if images.is_empty() {
        return report;
    }
    let albums = library_albums(library_root);
    info!(
        "Matching {} loose images in {:?} against {} albums",
        images.len(),
        downloads_root,
        albums.len()
    );

    for image in images {
        let album = match best_album(&image, &albums) {
            Some(album) => album,
            None => {
                debug!("No album matches {:?}", image);
                continue;
            }
        };
        let cover = album.dir.join(COVER_FILE);
        let root_pixels = match pixels(&image) {
            Some(pixels) => pixels,
            None => {
                warn!("Cannot read the size of {:?}, leaving it", image);
                report.record(&image, Some(cover), Action::Warning, "cannot read image size");
                continue;
            }
        };

        let existing_pixels = pixels(&cover);
        if existing_pixels.map_or(false, |existing| existing >= root_pixels) {
            let detail = format!(
                "existing cover is as large ({} >= {} pixels)",
                existing_pixels.unwrap_or_default(),
                root_pixels
            );
            if options.dry_run {
                report.record(&image, Some(cover), Action::Skipped, format!("would discard: {}", detail));
            } else {
                drop_root_image(&image, cover, Action::Skipped, detail, &mut report);
            }
            continue;
        }

        let detail = match existing_pixels {
            Some(existing) => format!("larger cover ({} > {} pixels)", root_pixels, existing),
            None => format!("cover ({} pixels)", root_pixels),
        };
        if options.dry_run {
            report.record(&image, Some(cover), Action::Upgraded, format!("would install {}", detail));
            continue;
        }
        match install_cover(&image, &album.dir) {
            Ok(()) => {
                info!("Installed {:?} as {:?}", image, cover);
                drop_root_image(&image, cover, Action::Upgraded, detail, &mut report);
            }
            Err(err) => {
                warn!("Could not install {:?} as {:?}: {}", image, cover, err);
                report.record(&image, Some(cover), Action::Error, format!("cover copy failed: {}", err));
            }
        }
    }
    report
}
