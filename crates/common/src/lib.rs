use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";
pub const UNKNOWN_TRACK: &str = "Unknown Track";

const ILLEGAL_PATH_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const SANITIZE_SUBSTITUTE: char = '_';

pub const DEFAULT_AUDIO_EXTENSIONS: &[&str] =
    &["flac", "mp3", "m4a", "m4v", "aac", "ogg", "wav", "wma"];

/// Container/codec family of an audio file, as established by inspecting the
/// file contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    Flac,
    Mp3,
    Aac,
    OtherLossy,
    Other,
}

impl AudioFormat {
    pub fn is_flac(self) -> bool {
        matches!(self, AudioFormat::Flac)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AudioFormat::Flac => "flac",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Aac => "aac",
            AudioFormat::OtherLossy => "other-lossy",
            AudioFormat::Other => "other",
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackTags {
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub year: Option<i32>,
    pub track_no: Option<u16>,
    pub disc_no: Option<u16>,
    pub title: Option<String>,
}

impl TrackTags {
    /// Album artist when present, track artist otherwise.
    pub fn effective_artist(&self) -> Option<&str> {
        non_empty(self.album_artist.as_deref()).or_else(|| non_empty(self.artist.as_deref()))
    }

    pub fn effective_album(&self) -> Option<&str> {
        non_empty(self.album.as_deref())
    }

    pub fn effective_title(&self) -> Option<&str> {
        non_empty(self.title.as_deref())
    }
}

/// Snapshot of one physical audio file taken during a tree walk.
///
/// The snapshot is not refreshed; once the file is moved or replaced the
/// record describes a stale location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AudioAsset {
    pub path: PathBuf,
    pub format: AudioFormat,
    pub sample_rate_hz: Option<u32>,
    pub bit_depth: Option<u8>,
    pub size_bytes: u64,
    pub tags: TrackTags,
}

impl AudioAsset {
    pub fn extension(&self) -> Option<String> {
        extension_lower(&self.path)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Allow-list of file extensions treated as audio.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioExtensions {
    exts: Vec<String>,
}

impl AudioExtensions {
    pub fn new<I, S>(exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = exts
            .into_iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        out.sort();
        out.dedup();
        Self { exts: out }
    }

    pub fn contains(&self, path: &Path) -> bool {
        match extension_lower(path) {
            Some(ext) => self.exts.iter().any(|e| e == &ext),
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.exts.iter().map(String::as_str)
    }
}

impl Default for AudioExtensions {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIO_EXTENSIONS)
    }
}

pub fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Make a single path component portable: characters illegal on common
/// filesystems become `_`, trailing spaces and periods are dropped, and an
/// empty result falls back to `placeholder`.
pub fn sanitize_component(raw: &str, placeholder: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|ch| {
            if ILLEGAL_PATH_CHARS.contains(&ch) || ch.is_control() {
                SANITIZE_SUBSTITUTE
            } else {
                ch
            }
        })
        .collect();
    let trimmed = replaced.trim_end_matches(|ch: char| ch == '.' || ch.is_whitespace());
    if trimmed.trim().is_empty() {
        placeholder.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Hex digest over an ordered list of parts. Parts are length-prefixed so
/// `["ab", "c"]` and `["a", "bc"]` do not collide.
pub fn digest_parts<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        let bytes = part.as_ref().as_bytes();
        hasher.update(&(bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }
    hasher.finalize().to_hex().to_string()
}

pub fn relpath_from(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(path_to_slash_string(rel))
}

pub fn join_relpath(root: &Path, relpath: &str) -> PathBuf {
    let mut out = PathBuf::from(root);
    for part in relpath.split('/') {
        if part.is_empty() {
            continue;
        }
        out.push(part);
    }
    out
}

fn path_to_slash_string(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    parts.join("/")
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn digest_is_deterministic() {
        let first = digest_parts(["Artist", "Album", "01"]);
        let second = digest_parts(["Artist", "Album", "01"]);
        assert_eq!(first, second);
        assert_ne!(first, digest_parts(["Artist", "Album", "02"]));
        assert_ne!(digest_parts(["ab", "c"]), digest_parts(["a", "bc"]));
    }

    #[test]
    fn sanitize_replaces_illegal_and_strips_trailing() {
        assert_eq!(sanitize_component("AC/DC", UNKNOWN_ARTIST), "AC_DC");
        assert_eq!(sanitize_component("What?: Yes*", UNKNOWN_ALBUM), "What__ Yes_");
        assert_eq!(sanitize_component("Vol. 2 . ", UNKNOWN_ALBUM), "Vol. 2");
        assert_eq!(sanitize_component("...", UNKNOWN_ALBUM), UNKNOWN_ALBUM);
        assert_eq!(sanitize_component("   ", UNKNOWN_TRACK), UNKNOWN_TRACK);
    }

    #[test]
    fn extensions_match_case_insensitive() {
        let exts = AudioExtensions::new([".FLAC", "mp3", " m4a "]);
        assert!(exts.contains(Path::new("/a/b.flac")));
        assert!(exts.contains(Path::new("/a/b.MP3")));
        assert!(exts.contains(Path::new("b.m4a")));
        assert!(!exts.contains(Path::new("cover.jpg")));
        assert!(!exts.contains(Path::new("noext")));
    }

    #[test]
    fn effective_artist_prefers_album_artist() {
        let tags = TrackTags {
            artist: Some("Guest".to_string()),
            album_artist: Some("  ".to_string()),
            ..TrackTags::default()
        };
        assert_eq!(tags.effective_artist(), Some("Guest"));
        let tags = TrackTags {
            artist: Some("Guest".to_string()),
            album_artist: Some("Band".to_string()),
            ..TrackTags::default()
        };
        assert_eq!(tags.effective_artist(), Some("Band"));
    }

    #[test]
    fn relpath_round_trips_through_join() {
        let root = Path::new("/music");
        let path = Path::new("/music/Artist/Album/01 Song.flac");
        let rel = relpath_from(root, path).unwrap();
        assert_eq!(rel, "Artist/Album/01 Song.flac");
        assert_eq!(join_relpath(root, &rel), path);
    }

    proptest! {
        #[test]
        fn sanitized_component_is_always_portable(raw in any::<String>()) {
            let out = sanitize_component(&raw, UNKNOWN_ALBUM);
            prop_assert!(!out.is_empty());
            prop_assert!(!out.chars().any(|c| ILLEGAL_PATH_CHARS.contains(&c)));
            prop_assert!(!out.ends_with(' '));
            prop_assert!(!out.ends_with('.'));
        }

        #[test]
        fn sanitized_component_handles_illegal_heavy_input(
            raw in "[<>:\"/\\\\|?* .a-z]{0,24}"
        ) {
            let out = sanitize_component(&raw, UNKNOWN_ARTIST);
            prop_assert!(!out.is_empty());
            prop_assert!(!out.chars().any(|c| ILLEGAL_PATH_CHARS.contains(&c)));
            prop_assert!(!out.ends_with(' ') && !out.ends_with('.'));
        }
    }
}
