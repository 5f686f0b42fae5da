use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use library::{AlbumIdentity, ReleaseLookup, TrackSetFingerprint};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::artwork::CoverSource;

/// Lowest MusicBrainz search score accepted as an identification.
pub const MIN_SCORE: u32 = 90;

/// MusicBrainz allows one request per second per client.
pub const MUSICBRAINZ_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct WebSource {
    pub user_agent: String,
    pub timeout: Duration,
    pub retries: u32,
}

/// MusicBrainz search plus Cover Art Archive downloads.
pub struct WebLookup {
    client: Client,
    source: WebSource,
    last_musicbrainz: Cell<Option<Instant>>,
}

impl WebLookup {
    pub fn new(source: WebSource) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(source.timeout).build()?;
        Ok(Self {
            client,
            source,
            last_musicbrainz: Cell::new(None),
        })
    }

    fn musicbrainz_get(&self, url: &str) -> Result<Response, String> {
        let wait = throttle_wait(self.last_musicbrainz.get(), Instant::now(), MUSICBRAINZ_INTERVAL);
        if !wait.is_zero() {
            debug!("Waiting {:?} before the next MusicBrainz request", wait);
            std::thread::sleep(wait);
        }
        let response = self.get(url);
        self.last_musicbrainz.set(Some(Instant::now()));
        response
    }

    fn get(&self, url: &str) -> Result<Response, String> {
        self.client
            .get(url)
            .timeout(self.source.timeout)
            .header("User-Agent", self.source.user_agent.trim())
            .header("Accept", "application/json")
            .send()
            .map_err(|err| err.to_string())
    }

    /// Best release id for `artist` / `album`, if any scores high enough.
    pub fn search_release(&self, artist: &str, album: &str) -> Result<Option<String>, String> {
        let url = format!(
            "https://musicbrainz.org/ws/2/release/?query={}&fmt=json&limit=1",
            url_escape(&release_query(artist, album))
        );
        let response = self.musicbrainz_get(&url)?;
        if !response.status().is_success() {
            return Err(format!("http {}", response.status()));
        }
        let payload = response
            .json::<MusicBrainzReleaseResponse>()
            .map_err(|err| err.to_string())?;
        Ok(best_release_id(payload))
    }

    /// Identify an album from its track titles via a recording search
    /// restricted to releases of the same length.
    pub fn identify(&self, fingerprint: &TrackSetFingerprint) -> Result<Option<AlbumIdentity>, String> {
        let query = match recording_query(fingerprint) {
            Some(query) => query,
            None => return Ok(None),
        };
        let url = format!(
            "https://musicbrainz.org/ws/2/recording/?query={}&fmt=json&limit=5",
            url_escape(&query)
        );
        let response = self.musicbrainz_get(&url)?;
        if !response.status().is_success() {
            return Err(format!("http {}", response.status()));
        }
        let payload = response
            .json::<MusicBrainzRecordingResponse>()
            .map_err(|err| err.to_string())?;
        Ok(best_identity(payload, fingerprint.track_count))
    }

    /// Front cover (500px) of a release, retried up to the configured count.
    pub fn fetch_front_cover(&self, release_id: &str) -> Result<Option<Vec<u8>>, String> {
        let url = format!("https://coverartarchive.org/release/{}/front-500", release_id);
        let attempts = self.source.retries.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            debug!("Cover fetch attempt {}/{} for {}", attempt, attempts, release_id);
            match self.get(&url) {
                Ok(response) if response.status() == StatusCode::NOT_FOUND => return Ok(None),
                Ok(response) if response.status().is_success() => {
                    let bytes = response.bytes().map_err(|err| err.to_string())?;
                    return Ok(Some(bytes.to_vec()));
                }
                Ok(response) => last_error = format!("http {}", response.status()),
                Err(err) => last_error = err,
            }
            warn!("Cover fetch attempt {} failed: {}", attempt, last_error);
        }
        Err(last_error)
    }
}

impl CoverSource for WebLookup {
    fn front_cover(&self, artist: &str, album: &str) -> Result<Option<Vec<u8>>, String> {
        match self.search_release(artist, album)? {
            Some(release_id) => self.fetch_front_cover(&release_id),
            None => Ok(None),
        }
    }
}

/// [`ReleaseLookup`] backed by MusicBrainz, caching answers per track-set
/// digest for the lifetime of the run.
pub struct MusicBrainzLookup {
    web: Rc<WebLookup>,
    cache: RefCell<HashMap<String, Option<AlbumIdentity>>>,
}

impl MusicBrainzLookup {
    /// `web` may be shared with the cover pass so both obey one throttle.
    pub fn new(web: Rc<WebLookup>) -> Self {
        Self {
            web,
            cache: RefCell::new(HashMap::new()),
        }
    }
}

impl ReleaseLookup for MusicBrainzLookup {
    fn lookup(&self, fingerprint: &TrackSetFingerprint) -> Option<AlbumIdentity> {
        if let Some(cached) = self.cache.borrow().get(&fingerprint.digest) {
            return cached.clone();
        }
        let identity = match self.web.identify(fingerprint) {
            Ok(identity) => identity,
            Err(err) => {
                warn!("Release lookup failed: {}", err);
                None
            }
        };
        self.cache
            .borrow_mut()
            .insert(fingerprint.digest.clone(), identity.clone());
        identity
    }
}

#[derive(Deserialize)]
struct MusicBrainzReleaseResponse {
    releases: Option<Vec<MusicBrainzRelease>>,
}

#[derive(Deserialize)]
struct MusicBrainzRelease {
    id: String,
    score: Option<u32>,
    title: Option<String>,
    date: Option<String>,
    #[serde(rename = "track-count")]
    track_count: Option<usize>,
}

#[derive(Deserialize)]
struct MusicBrainzRecordingResponse {
    recordings: Option<Vec<MusicBrainzRecording>>,
}

#[derive(Deserialize)]
struct MusicBrainzRecording {
    score: Option<u32>,
    #[serde(rename = "artist-credit")]
    artist_credit: Option<Vec<MusicBrainzArtistCredit>>,
    releases: Option<Vec<MusicBrainzRelease>>,
}

#[derive(Deserialize)]
struct MusicBrainzArtistCredit {
    name: String,
}

/// How long to wait so requests stay `interval` apart.
fn throttle_wait(last: Option<Instant>, now: Instant, interval: Duration) -> Duration {
    match last {
        Some(last) => interval.saturating_sub(now.saturating_duration_since(last)),
        None => Duration::ZERO,
    }
}

fn release_query(artist: &str, album: &str) -> String {
    format!("artist:\"{}\" AND release:\"{}\"", quote_safe(artist), quote_safe(album))
}

fn recording_query(fingerprint: &TrackSetFingerprint) -> Option<String> {
    let titles: Vec<String> = fingerprint
        .titles
        .iter()
        .map(|title| title.trim())
        .filter(|title| !title.is_empty() && *title != common::UNKNOWN_TRACK)
        .take(3)
        .map(|title| format!("recording:\"{}\"", quote_safe(title)))
        .collect();
    if titles.is_empty() {
        return None;
    }
    Some(format!(
        "({}) AND tracks:{}",
        titles.join(" OR "),
        fingerprint.track_count
    ))
}

fn quote_safe(value: &str) -> String {
    value.replace('"', " ").trim().to_string()
}

fn best_release_id(payload: MusicBrainzReleaseResponse) -> Option<String> {
    payload
        .releases?
        .into_iter()
        .find(|release| release.score.unwrap_or(0) >= MIN_SCORE)
        .map(|release| release.id)
}

fn best_identity(payload: MusicBrainzRecordingResponse, track_count: usize) -> Option<AlbumIdentity> {
    for recording in payload.recordings? {
        if recording.score.unwrap_or(0) < MIN_SCORE {
            continue;
        }
        let artist = match recording
            .artist_credit
            .as_ref()
            .and_then(|credits| credits.first())
            .map(|credit| credit.name.trim().to_string())
        {
            Some(artist) if !artist.is_empty() => artist,
            _ => continue,
        };
        let releases = recording.releases.unwrap_or_default();
        let release = releases
            .iter()
            .find(|r| r.track_count == Some(track_count))
            .or_else(|| releases.first());
        let release = match release {
            Some(release) => release,
            None => continue,
        };
        let album = match release.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title.to_string(),
            _ => continue,
        };
        let year = release
            .date
            .as_deref()
            .and_then(|date| date.get(..4))
            .and_then(|year| year.parse().ok());
        return Some(AlbumIdentity { artist, album, year });
    }
    None
}

fn url_escape(input: &str) -> String {
    let mut out = String::new();
    for byte in input.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(*byte as char)
            }
            b' ' => out.push_str("%20"),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
