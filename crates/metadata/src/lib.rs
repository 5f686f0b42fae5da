use std::path::Path;

use lofty::config::WriteOptions;
use lofty::error::LoftyError;
use lofty::file::{FileType, TaggedFile};
use lofty::picture::{MimeType, Picture, PictureInformation, PictureType};
use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::Tag;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TagInfo {
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub track_no: Option<u16>,
    pub disc_no: Option<u16>,
    pub year: Option<i32>,
    pub has_embedded_cover: bool,
}

/// Codec family as reported by the container parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Flac,
    Mp3,
    Aac,
    Alac,
    Vorbis,
    Opus,
    Speex,
    Musepack,
    Wav,
    Aiff,
    Ape,
    WavPack,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub sample_rate: Option<u32>,
    pub bit_depth: Option<u8>,
    pub codec: Codec,
}

#[derive(Debug, Clone)]
pub struct AudioMetadata {
    pub tags: TagInfo,
    pub stream: StreamInfo,
}

#[derive(Debug, Clone)]
pub struct CoverArt {
    pub data: Vec<u8>,
    pub mime: Option<String>,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "unreadable audio: {}", err),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

/// Read tags and stream properties in one pass.
///
/// The extension only seeds the probe; the container type is re-guessed from
/// the file's magic bytes and confirmed by a full parse, so a mislabelled or
/// truncated file comes back as an error rather than a wrong codec.
pub fn read_audio_metadata(path: &Path) -> Result<AudioMetadata, MetadataError> {
    let tagged_file = open_verified(path)?;
    let stream = stream_info(&tagged_file);

    let mut info = TagInfo::default();
    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        info.title = tag.get_string(&ItemKey::TrackTitle).and_then(clean_text);
        info.album = tag.get_string(&ItemKey::AlbumTitle).and_then(clean_text);
        info.album_artist = tag.get_string(&ItemKey::AlbumArtist).and_then(clean_text);
        info.artist = tag.get_string(&ItemKey::TrackArtist).and_then(clean_text);
        info.track_no = tag.get_string(&ItemKey::TrackNumber).and_then(parse_u16);
        info.disc_no = tag.get_string(&ItemKey::DiscNumber).and_then(parse_u16);
        info.year = tag
            .get_string(&ItemKey::Year)
            .or_else(|| tag.get_string(&ItemKey::RecordingDate))
            .and_then(parse_year);
        info.has_embedded_cover = !tag.pictures().is_empty();
    }

    Ok(AudioMetadata { tags: info, stream })
}

/// Stream properties only; `None` when the file cannot be parsed.
pub fn read_audio_stream_info(path: &Path) -> Option<StreamInfo> {
    open_verified(path).ok().map(|file| stream_info(&file))
}

pub fn read_cover(path: &Path) -> Result<Option<CoverArt>, MetadataError> {
    let tagged_file = open_verified(path)?;
    let tag = match tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        Some(tag) => tag,
        None => return Ok(None),
    };

    let picture = match pick_picture(tag.pictures()) {
        Some(picture) => picture,
        None => return Ok(None),
    };

    let data = picture.data().to_vec();
    let mime = guess_mime(&data);
    Ok(Some(CoverArt { data, mime }))
}

/// Replace the front-cover picture of `path` with `data`, creating the
/// primary tag if the file has none.
pub fn embed_cover(path: &Path, data: &[u8]) -> Result<(), MetadataError> {
    let mut tagged_file = open_verified(path)?;
    if tagged_file.primary_tag().is_none() {
        let tag_type = tagged_file.primary_tag_type();
        tagged_file.insert_tag(Tag::new(tag_type));
    }
    if let Some(tag) = tagged_file.primary_tag_mut() {
        tag.remove_picture_type(PictureType::CoverFront);
        let mime = match guess_mime(data).as_deref() {
            Some("image/png") => MimeType::Png,
            _ => MimeType::Jpeg,
        };
        tag.push_picture(Picture::new_unchecked(
            PictureType::CoverFront,
            Some(mime),
            None,
            data.to_vec(),
        ));
    }
    tagged_file.save_to_path(path, WriteOptions::default())?;
    Ok(())
}

pub fn guess_mime(bytes: &[u8]) -> Option<String> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg".to_string())
    } else if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        Some("image/png".to_string())
    } else {
        None
    }
}

/// Pixel width and height of a JPEG or PNG, read from its header.
pub fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let info = match guess_mime(bytes)?.as_str() {
        "image/jpeg" => PictureInformation::from_jpeg(bytes).ok()?,
        "image/png" => PictureInformation::from_png(bytes).ok()?,
        _ => return None,
    };
    Some((info.width, info.height)).filter(|(w, h)| *w > 0 && *h > 0)
}

fn open_verified(path: &Path) -> Result<TaggedFile, MetadataError> {
    let tagged_file = Probe::open(path)?.guess_file_type()?.read()?;
    Ok(tagged_file)
}

fn stream_info(tagged_file: &TaggedFile) -> StreamInfo {
    let properties = tagged_file.properties();
    let bit_depth = properties.bit_depth();
    StreamInfo {
        sample_rate: properties.sample_rate().filter(|rate| *rate > 0),
        bit_depth,
        codec: codec_from_file_type(tagged_file.file_type(), bit_depth),
    }
}

fn codec_from_file_type(file_type: FileType, bit_depth: Option<u8>) -> Codec {
    match file_type {
        FileType::Flac => Codec::Flac,
        FileType::Mpeg => Codec::Mp3,
        FileType::Aac => Codec::Aac,
        // MP4 carries either AAC or ALAC; only ALAC reports a bit depth.
        FileType::Mp4 => {
            if bit_depth.is_some() {
                Codec::Alac
            } else {
                Codec::Aac
            }
        }
        FileType::Vorbis => Codec::Vorbis,
        FileType::Opus => Codec::Opus,
        FileType::Speex => Codec::Speex,
        FileType::Mpc => Codec::Musepack,
        FileType::Wav => Codec::Wav,
        FileType::Aiff => Codec::Aiff,
        FileType::Ape => Codec::Ape,
        FileType::WavPack => Codec::WavPack,
        _ => Codec::Unknown,
    }
}

fn clean_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_u16(text: &str) -> Option<u16> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok().filter(|n| *n > 0)
}

fn parse_year(text: &str) -> Option<i32> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.len() == 4 {
        digits.parse().ok()
    } else {
        None
    }
}

fn pick_picture(pictures: &[Picture]) -> Option<&Picture> {
    for picture in pictures {
        if picture.pic_type() == PictureType::CoverFront {
            return Some(picture);
        }
    }
    pictures.first()
}
