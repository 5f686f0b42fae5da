//! Parsing of folder and file names into album, disc and track fields.

use std::path::Path;

use common::UNKNOWN_TRACK;

/// Words that name a disc when they make up the whole folder name together
/// with a number. "Vol." and "Part" are left out: "Greatest Hits Vol. 2"
/// is an album, not a disc of one.
const DISC_KEYWORDS: &[&str] = &["cd", "disc", "disk", "dvd", "medium"];

/// `"(2013) Album"`, `"Album (2013)"` and `"Album [2013]"` all yield the
/// album name plus its year; anything else comes back untouched.
pub fn split_album_year(input: &str) -> (String, Option<i32>) {
    let trimmed = input.trim();
    if let Some((album, year)) = year_prefix(trimmed) {
        return (album.to_string(), Some(year));
    }
    for (open, close) in [('(', ')'), ('[', ']')] {
        if let Some((album, year)) = year_suffix(trimmed, open, close) {
            return (album.to_string(), Some(year));
        }
    }
    (trimmed.to_string(), None)
}

fn year_prefix(input: &str) -> Option<(&str, i32)> {
    let rest = input.strip_prefix('(')?;
    let close = rest.find(')')?;
    let year = four_digit_year(&rest[..close])?;
    let album = rest[close + 1..].trim_start();
    if album.is_empty() {
        return None;
    }
    Some((album, year))
}

fn year_suffix(input: &str, open: char, close: char) -> Option<(&str, i32)> {
    let body = input.strip_suffix(close)?;
    let open_idx = body.rfind(open)?;
    let year = four_digit_year(&body[open_idx + open.len_utf8()..])?;
    let album = body[..open_idx].trim_end();
    if album.is_empty() {
        return None;
    }
    Some((album, year))
}

fn four_digit_year(text: &str) -> Option<i32> {
    let text = text.trim();
    if text.len() != 4 || !text.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// Disc number of a folder named like `CD1`, `Disc 2`, `disk_03`,
/// `Disc II` or `CD2 - Live`. The keyword and number must lead the name;
/// anything after them has to be set off by a dash.
pub fn parse_disc_number(name: &str) -> Option<u16> {
    let lowered = name.trim().to_ascii_lowercase();
    let (head, subtitle) = match lowered.split_once(" - ") {
        Some((head, subtitle)) => (head.trim(), Some(subtitle.trim())),
        None => (lowered.as_str(), None),
    };
    if subtitle == Some("") {
        return None;
    }
    let cleaned: String = head
        .chars()
        .map(|ch| match ch {
            '_' | '-' | '.' => ' ',
            other => other,
        })
        .collect();
    let cleaned = cleaned.trim();

    for keyword in DISC_KEYWORDS {
        if let Some(raw) = cleaned.strip_prefix(keyword) {
            let rest = raw.trim_start();
            if rest.contains(char::is_whitespace) {
                continue;
            }
            // "cdx" is a word, "cd 10" and "cd10" are discs
            let glued = rest.len() == raw.len();
            if glued && !rest.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            if let Some(num) = parse_number_token(rest) {
                return Some(num);
            }
        }
    }
    None
}

pub fn is_disc_folder(name: &str) -> bool {
    parse_disc_number(name).is_some()
}

fn parse_number_token(token: &str) -> Option<u16> {
    if token.is_empty() {
        return None;
    }
    if token.chars().all(|c| c.is_ascii_digit()) {
        return token.parse::<u16>().ok().filter(|n| *n > 0);
    }
    roman_to_u16(token)
}

fn roman_to_u16(input: &str) -> Option<u16> {
    let mut total = 0u16;
    let mut prev = 0u16;
    for ch in input.chars().rev() {
        let value = match ch {
            'i' => 1,
            'v' => 5,
            'x' => 10,
            'l' => 50,
            'c' => 100,
            'd' => 500,
            'm' => 1000,
            _ => return None,
        };
        if value < prev {
            total = total.saturating_sub(value);
        } else {
            total = total.saturating_add(value);
            prev = value;
        }
    }
    Some(total).filter(|t| *t > 0)
}

/// Track number and title recovered from a file stem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedFileName {
    pub track_no: Option<u16>,
    pub title: String,
}

/// `"03 - Song"` → track 3, `"Song"`. A leading `"Artist - "` is removed
/// only when it matches `artist`, so titles that legitimately contain a
/// dash survive.
pub fn parse_track_file_name(stem: &str, artist: Option<&str>) -> ParsedFileName {
    let stem = stem.trim();
    let digits: String = stem.chars().take_while(|c| c.is_ascii_digit()).collect();
    let (track_no, rest) = if !digits.is_empty() && digits.len() <= 3 {
        let rest = &stem[digits.len()..];
        // a number glued to a word ("3rd Stone") belongs to the title
        if rest.is_empty() || rest.starts_with(|c: char| c.is_whitespace() || "-._)".contains(c)) {
            (digits.parse::<u16>().ok().filter(|n| *n > 0), rest)
        } else {
            (None, stem)
        }
    } else {
        (None, stem)
    };

    let mut title = rest
        .trim_start_matches(|c: char| c.is_whitespace() || "-._)".contains(c))
        .trim();
    if let Some(artist) = artist {
        title = strip_artist_prefix(title, artist);
    }

    let title = if title.is_empty() {
        if track_no.is_some() {
            UNKNOWN_TRACK.to_string()
        } else {
            stem.to_string()
        }
    } else {
        title.to_string()
    };
    ParsedFileName { track_no, title }
}

/// For tracks whose artist is not known: any leading `"Someone - "` is
/// taken to be the artist and removed from the title.
pub fn parse_track_file_name_any_artist(stem: &str) -> ParsedFileName {
    let mut parsed = parse_track_file_name(stem, None);
    if let Some((head, tail)) = parsed.title.split_once(" - ") {
        let (head, tail) = (head.trim(), tail.trim());
        if !head.is_empty() && !tail.is_empty() {
            parsed.title = tail.to_string();
        }
    }
    parsed
}

fn strip_artist_prefix<'a>(title: &'a str, artist: &str) -> &'a str {
    let artist = artist.trim();
    if artist.is_empty() {
        return title;
    }
    let (head, tail) = match title.split_once(" - ") {
        Some(parts) => parts,
        None => return title,
    };
    if head.trim().eq_ignore_ascii_case(artist) && !tail.trim().is_empty() {
        tail.trim()
    } else {
        title
    }
}

/// Case- and whitespace-insensitive form of a title used to match the same
/// track across re-encoded copies.
pub fn title_key(title: &str) -> String {
    title
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| UNKNOWN_TRACK.to_string())
}
