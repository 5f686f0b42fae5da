use std::fs;
use std::io;
use std::path::Path;

use common::{AudioAsset, AudioFormat, TrackTags};
use metadata::{read_audio_metadata, Codec, TagInfo};
use tracing::debug;

/// The one seam through which the core learns about a file.
///
/// `Err` means the file itself is gone or unreadable at the filesystem
/// level. Unparseable contents are not an error: they come back as an
/// asset with `AudioFormat::Other` and unknown stream values.
pub trait MediaProbe {
    fn probe(&self, path: &Path) -> io::Result<AudioAsset>;
}

/// Probe backed by the `metadata` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoftyProbe;

impl MediaProbe for LoftyProbe {
    fn probe(&self, path: &Path) -> io::Result<AudioAsset> {
        let size_bytes = fs::metadata(path)?.len();
        let asset = match read_audio_metadata(path) {
            Ok(meta) => AudioAsset {
                path: path.to_path_buf(),
                format: format_from_codec(meta.stream.codec),
                sample_rate_hz: meta.stream.sample_rate,
                bit_depth: meta.stream.bit_depth,
                size_bytes,
                tags: track_tags(meta.tags),
            },
            Err(err) => {
                debug!("Unreadable metadata for {:?}: {}", path, err);
                AudioAsset {
                    path: path.to_path_buf(),
                    format: AudioFormat::Other,
                    sample_rate_hz: None,
                    bit_depth: None,
                    size_bytes,
                    tags: TrackTags::default(),
                }
            }
        };
        Ok(asset)
    }
}

pub fn format_from_codec(codec: Codec) -> AudioFormat {
    match codec {
        Codec::Flac => AudioFormat::Flac,
        Codec::Mp3 => AudioFormat::Mp3,
        Codec::Aac => AudioFormat::Aac,
        Codec::Vorbis | Codec::Opus | Codec::Speex | Codec::Musepack => AudioFormat::OtherLossy,
        Codec::Alac
        | Codec::Wav
        | Codec::Aiff
        | Codec::Ape
        | Codec::WavPack
        | Codec::Unknown => AudioFormat::Other,
    }
}

fn track_tags(info: TagInfo) -> TrackTags {
    TrackTags {
        artist: info.artist,
        album_artist: info.album_artist,
        album: info.album,
        year: info.year,
        track_no: info.track_no,
        disc_no: info.disc_no,
        title: info.title,
    }
}
