//! Turns a loose batch of downloads into moves onto the canonical
//! `Artist/(Year) Album/[CD<n>/]NN Title.ext` layout.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use common::{
    digest_parts, extension_lower, sanitize_component, AudioAsset, UNKNOWN_ALBUM, UNKNOWN_ARTIST,
    UNKNOWN_TRACK,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::compare::{compare, Decision};
use crate::fsops;
use crate::naming::{
    file_stem, is_disc_folder, parse_disc_number, parse_track_file_name,
    parse_track_file_name_any_artist, split_album_year,
};
use crate::probe::MediaProbe;
use crate::report::{Action, ReconciliationOutcome, Report};
use crate::SyncOptions;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct AlbumIdentity {
    pub artist: String,
    pub album: String,
    pub year: Option<i32>,
}

impl AlbumIdentity {
    pub fn placeholder() -> Self {
        Self {
            artist: UNKNOWN_ARTIST.to_string(),
            album: UNKNOWN_ALBUM.to_string(),
            year: None,
        }
    }

    fn key(&self) -> (String, String) {
        (self.artist.to_lowercase(), self.album.to_lowercase())
    }
}

/// Where an album identity came from, in order of preference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    Tags,
    Path,
    Lookup,
    Placeholder,
}

/// Description of a folder's track set, handed to a [`ReleaseLookup`] when
/// neither tags nor folder names identify the album.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TrackSetFingerprint {
    pub digest: String,
    pub folder_name: Option<String>,
    pub track_count: usize,
    pub track_numbers: Vec<Option<u16>>,
    pub titles: Vec<String>,
}

impl TrackSetFingerprint {
    pub fn new(folder_name: Option<String>, tracks: Vec<(Option<u16>, String)>) -> Self {
        let mut parts = vec![tracks.len().to_string()];
        parts.extend(folder_name.clone());
        for (number, title) in &tracks {
            let number = number.map(|n| n.to_string()).unwrap_or_default();
            parts.push(format!("{}|{}", number, title.to_lowercase()));
        }
        let track_count = tracks.len();
        let (track_numbers, titles) = tracks.into_iter().unzip();
        Self {
            digest: digest_parts(parts),
            folder_name,
            track_count,
            track_numbers,
            titles,
        }
    }

    fn from_folder(folder: &Path, assets: &[AudioAsset]) -> Self {
        let folder_name = folder
            .file_name()
            .map(|n| n.to_string_lossy().to_string());
        let tracks = assets
            .iter()
            .map(|asset| {
                let parsed = parse_track_file_name(&file_stem(&asset.path), None);
                (asset.tags.track_no.or(parsed.track_no), parsed.title)
            })
            .collect();
        Self::new(folder_name, tracks)
    }
}

/// External verification of an album identity from its track set.
pub trait ReleaseLookup {
    fn lookup(&self, fingerprint: &TrackSetFingerprint) -> Option<AlbumIdentity>;
}

/// Lookup that never identifies anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoLookup;

impl ReleaseLookup for NoLookup {
    fn lookup(&self, _fingerprint: &TrackSetFingerprint) -> Option<AlbumIdentity> {
        None
    }
}

type IdentityStrategy = fn(&AudioAsset, &Path) -> Option<AlbumIdentity>;

/// Per-file strategies, tried in order. The release lookup works on whole
/// folders and runs afterwards for whatever these leave unresolved.
const FILE_STRATEGIES: &[(IdentitySource, IdentityStrategy)] = &[
    (IdentitySource::Tags, identity_from_tags),
    (IdentitySource::Path, identity_from_path),
];

fn identity_from_tags(asset: &AudioAsset, _downloads_root: &Path) -> Option<AlbumIdentity> {
    let artist = asset.tags.effective_artist()?;
    let album = asset.tags.effective_album()?;
    Some(AlbumIdentity {
        artist: artist.to_string(),
        album: album.to_string(),
        year: asset.tags.year,
    })
}

/// `.../Artist/Album/[Disc]/file` relative to the downloads root.
fn identity_from_path(asset: &AudioAsset, downloads_root: &Path) -> Option<AlbumIdentity> {
    let rel = asset.path.parent()?.strip_prefix(downloads_root).ok()?;
    let mut parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().trim().to_string())
        .collect();
    while parts.last().map(|p| is_disc_folder(p)).unwrap_or(false) {
        parts.pop();
    }
    if parts.len() < 2 {
        return None;
    }
    let album_folder = parts.pop()?;
    let artist = parts.pop()?;
    let (album, year) = split_album_year(&album_folder);
    if artist.is_empty() || album.is_empty() {
        return None;
    }
    Some(AlbumIdentity {
        artist,
        album,
        year: year.or(asset.tags.year),
    })
}

fn resolve_file(asset: &AudioAsset, downloads_root: &Path) -> Option<(AlbumIdentity, IdentitySource)> {
    FILE_STRATEGIES
        .iter()
        .find_map(|(source, strategy)| strategy(asset, downloads_root).map(|id| (id, *source)))
}

#[derive(Clone, Debug, PartialEq)]
pub struct UnitTrack {
    pub asset: AudioAsset,
    pub disc_no: Option<u16>,
    pub track_no: Option<u16>,
    pub title: String,
}

/// Tracks believed to form one album, ordered disc, then track number
/// (unknown last), then file name.
#[derive(Clone, Debug, PartialEq)]
pub struct AlbumUnit {
    pub identity: AlbumIdentity,
    pub source: IdentitySource,
    pub tracks: Vec<UnitTrack>,
}

impl AlbumUnit {
    pub fn disc_count(&self) -> usize {
        self.tracks
            .iter()
            .filter_map(|t| t.disc_no)
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn is_multi_disc(&self) -> bool {
        self.disc_count() > 1
    }

    fn sort_tracks(&mut self) {
        self.tracks.sort_by(|a, b| {
            let a_key = (
                a.disc_no.unwrap_or(u16::MAX),
                a.track_no.unwrap_or(u16::MAX),
                a.asset.file_name(),
            );
            let b_key = (
                b.disc_no.unwrap_or(u16::MAX),
                b.track_no.unwrap_or(u16::MAX),
                b.asset.file_name(),
            );
            a_key.cmp(&b_key)
        });
    }
}

fn unit_track(asset: AudioAsset, artist: &str, source: IdentitySource) -> UnitTrack {
    let stem = file_stem(&asset.path);
    let parsed = match source {
        IdentitySource::Placeholder => parse_track_file_name_any_artist(&stem),
        _ => parse_track_file_name(&stem, Some(artist)),
    };
    let title = asset
        .tags
        .effective_title()
        .map(str::to_string)
        .unwrap_or(parsed.title);
    let track_no = asset.tags.track_no.or(parsed.track_no);
    let disc_no = asset.tags.disc_no.or_else(|| {
        asset
            .path
            .parent()
            .and_then(|dir| dir.file_name())
            .and_then(|name| name.to_str())
            .and_then(parse_disc_number)
    });
    UnitTrack {
        asset,
        disc_no,
        track_no,
        title,
    }
}

/// Most common year; ties go to the earliest.
pub fn choose_album_year(years: &[i32]) -> Option<i32> {
    let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
    for year in years {
        *counts.entry(*year).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(year, _)| year)
}

struct UnitBuilder {
    identity: AlbumIdentity,
    source: IdentitySource,
    years: Vec<i32>,
    assets: Vec<AudioAsset>,
}

/// Probe every audio file under `downloads_root` and group the results
/// into album units.
pub fn group_album_units(
    downloads_root: &Path,
    probe: &dyn MediaProbe,
    lookup: &dyn ReleaseLookup,
    options: &SyncOptions,
) -> (Vec<AlbumUnit>, Report) {
    let mut report = Report::new();
    let mut resolved: Vec<(AudioAsset, AlbumIdentity, IdentitySource)> = Vec::new();
    let mut unresolved: BTreeMap<PathBuf, Vec<AudioAsset>> = BTreeMap::new();

    for path in fsops::list_files(downloads_root, &[]) {
        if !options.is_audio(&path) || options.is_junk(&path) {
            continue;
        }
        let asset = match probe.probe(&path) {
            Ok(asset) => asset,
            Err(err) => {
                warn!("Cannot inspect download {:?}: {}", path, err);
                report.record(&path, None, Action::Error, format!("cannot inspect: {}", err));
                continue;
            }
        };
        match resolve_file(&asset, downloads_root) {
            Some((identity, source)) => resolved.push((asset, identity, source)),
            None => {
                let folder = path.parent().unwrap_or(downloads_root).to_path_buf();
                unresolved.entry(folder).or_default().push(asset);
            }
        }
    }

    for (folder, assets) in unresolved {
        let fingerprint = TrackSetFingerprint::from_folder(&folder, &assets);
        let (identity, source) = match lookup.lookup(&fingerprint) {
            Some(identity) => {
                info!("Identified {:?} as {} - {}", folder, identity.artist, identity.album);
                (identity, IdentitySource::Lookup)
            }
            None => {
                warn!("Could not identify {} files in {:?}", assets.len(), folder);
                for asset in &assets {
                    report.record(
                        &asset.path,
                        None,
                        Action::Warning,
                        "no artist/album from tags, folders or lookup; using placeholder",
                    );
                }
                (AlbumIdentity::placeholder(), IdentitySource::Placeholder)
            }
        };
        for asset in assets {
            resolved.push((asset, identity.clone(), source));
        }
    }

    let mut builders: BTreeMap<(String, String), UnitBuilder> = BTreeMap::new();
    for (asset, identity, source) in resolved {
        let builder = builders.entry(identity.key()).or_insert_with(|| UnitBuilder {
            identity: identity.clone(),
            source,
            years: Vec::new(),
            assets: Vec::new(),
        });
        if let Some(year) = identity.year.or(asset.tags.year) {
            builder.years.push(year);
        }
        builder.assets.push(asset);
    }

    let units = builders
        .into_values()
        .map(|builder| {
            let mut identity = builder.identity;
            identity.year = choose_album_year(&builder.years);
            let artist = identity.artist.clone();
            let source = builder.source;
            let mut unit = AlbumUnit {
                identity,
                source,
                tracks: builder
                    .assets
                    .into_iter()
                    .map(|asset| unit_track(asset, &artist, source))
                    .collect(),
            };
            unit.sort_tracks();
            unit
        })
        .collect();
    (units, report)
}

pub fn album_dir_name(identity: &AlbumIdentity) -> String {
    let album = sanitize_component(&identity.album, UNKNOWN_ALBUM);
    match identity.year {
        Some(year) => format!("({}) {}", year, album),
        None => album,
    }
}

pub fn track_file_name(track: &UnitTrack) -> String {
    let title = sanitize_component(&track.title, UNKNOWN_TRACK);
    let stem = match track.track_no {
        Some(number) => format!("{:02} {}", number, title),
        None => title,
    };
    match track.asset.extension() {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem,
    }
}

fn canonical_path(library_root: &Path, unit: &AlbumUnit, track: &UnitTrack) -> PathBuf {
    let mut path = library_root
        .join(sanitize_component(&unit.identity.artist, UNKNOWN_ARTIST))
        .join(album_dir_name(&unit.identity));
    if unit.is_multi_disc() {
        if let Some(disc) = track.disc_no {
            path.push(format!("CD{}", disc));
        }
    }
    path.join(track_file_name(track))
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlannedMove {
    pub asset: AudioAsset,
    pub dest_path: PathBuf,
}

/// Artwork and booklets found next to an album's tracks.
pub const COMPANION_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "pdf"];

/// A non-audio file that follows its album into the library.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompanionMove {
    pub source: PathBuf,
    pub dest_path: PathBuf,
}

#[derive(Clone, Debug, Default)]
pub struct IngestPlan {
    pub moves: Vec<PlannedMove>,
    pub companions: Vec<CompanionMove>,
    /// Warnings and errors found while planning.
    pub report: Report,
}

/// Plan moves for every audio file under `downloads_root`. Nothing is
/// touched; sources whose destinations collide are left out of `moves` and
/// reported as warnings.
pub fn plan_ingest(
    downloads_root: &Path,
    library_root: &Path,
    probe: &dyn MediaProbe,
    lookup: &dyn ReleaseLookup,
    options: &SyncOptions,
) -> IngestPlan {
    if !downloads_root.is_dir() {
        info!("No downloads at {:?}", downloads_root);
        return IngestPlan::default();
    }
    let (units, mut report) = group_album_units(downloads_root, probe, lookup, options);
    info!("Found {} albums in downloads", units.len());

    let candidates: Vec<PlannedMove> = units
        .iter()
        .flat_map(|unit| {
            unit.tracks.iter().map(move |track| PlannedMove {
                asset: track.asset.clone(),
                dest_path: canonical_path(library_root, unit, track),
            })
        })
        .collect();

    let mut claims: HashMap<String, usize> = HashMap::new();
    for planned in &candidates {
        *claims.entry(collision_key(&planned.dest_path)).or_default() += 1;
    }

    let mut moves = Vec::with_capacity(candidates.len());
    for planned in candidates {
        let claimants = claims
            .get(&collision_key(&planned.dest_path))
            .copied()
            .unwrap_or(0);
        if claimants > 1 {
            report.record(
                &planned.asset.path,
                Some(planned.dest_path.clone()),
                Action::Warning,
                format!("ambiguous: {} downloads map to this destination", claimants),
            );
            continue;
        }
        debug!("Plan {:?} -> {:?}", planned.asset.path, planned.dest_path);
        moves.push(planned);
    }
    let companions = plan_companions(downloads_root, &moves, options, &mut report);
    IngestPlan {
        moves,
        companions,
        report,
    }
}

fn is_companion(path: &Path, options: &SyncOptions) -> bool {
    if options.is_junk(path) || options.is_audio(path) {
        return false;
    }
    extension_lower(path)
        .map(|ext| COMPANION_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Companion files of every download folder whose tracks all land in one
/// album directory. A disc folder's parent follows the album root, so a
/// box-set cover next to `CD1/` and `CD2/` is carried along too.
fn plan_companions(
    downloads_root: &Path,
    moves: &[PlannedMove],
    options: &SyncOptions,
    report: &mut Report,
) -> Vec<CompanionMove> {
    let mut targets: BTreeMap<PathBuf, BTreeSet<PathBuf>> = BTreeMap::new();
    for planned in moves {
        if let (Some(folder), Some(dest_dir)) = (planned.asset.path.parent(), planned.dest_path.parent()) {
            targets
                .entry(folder.to_path_buf())
                .or_default()
                .insert(dest_dir.to_path_buf());
            let folder_is_disc = folder.file_name().and_then(|n| n.to_str()).map(is_disc_folder);
            let dest_is_disc = dest_dir.file_name().and_then(|n| n.to_str()).map(is_disc_folder);
            if folder_is_disc == Some(true) && dest_is_disc == Some(true) {
                if let (Some(outer), Some(album_dir)) = (folder.parent(), dest_dir.parent()) {
                    targets
                        .entry(outer.to_path_buf())
                        .or_default()
                        .insert(album_dir.to_path_buf());
                }
            }
        }
    }

    let mut companions = Vec::new();
    let mut claimed: BTreeSet<String> = BTreeSet::new();
    for (folder, dest_dirs) in targets {
        if folder.as_path() == downloads_root || dest_dirs.len() != 1 {
            debug!("Not carrying companions from {:?}", folder);
            continue;
        }
        let dest_dir = match dest_dirs.into_iter().next() {
            Some(dir) => dir,
            None => continue,
        };
        let files = match fsops::files_in_dir(&folder) {
            Ok(files) => files,
            Err(err) => {
                warn!("Cannot list {:?}: {}", folder, err);
                continue;
            }
        };
        for source in files.into_iter().filter(|path| is_companion(path, options)) {
            let name = match source.file_name() {
                Some(name) => name.to_os_string(),
                None => continue,
            };
            let dest_path = dest_dir.join(name);
            if !claimed.insert(collision_key(&dest_path)) {
                report.record(
                    &source,
                    Some(dest_path),
                    Action::Warning,
                    "another download already claims this destination",
                );
                continue;
            }
            companions.push(CompanionMove { source, dest_path });
        }
    }
    companions
}

fn collision_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

/// Carry out a plan against the current library state. Each move is
/// re-checked against whatever occupies its destination right now.
pub fn execute_ingest(plan: &IngestPlan, probe: &dyn MediaProbe, options: &SyncOptions) -> Report {
    let mut report = Report::new();
    for planned in &plan.moves {
        let source = &planned.asset.path;
        let dest = &planned.dest_path;
        let existing = if dest.is_file() {
            match probe.probe(dest) {
                Ok(asset) => Some(asset),
                Err(err) => {
                    report.record(
                        source,
                        Some(dest.clone()),
                        Action::Error,
                        format!("cannot inspect library file: {}", err),
                    );
                    continue;
                }
            }
        } else {
            None
        };

        let comparison = compare(&planned.asset, existing.as_ref());
        let action = match comparison.decision {
            Decision::CopyNew => Action::Copied,
            Decision::UpgradeReplace => Action::Upgraded,
            Decision::KeepExisting => Action::Skipped,
        };
        if options.dry_run {
            let verb = if comparison.writes_candidate() { "move" } else { "discard" };
            report.record(
                source,
                Some(dest.clone()),
                action,
                format!("would {}: {}", verb, comparison.reason),
            );
            continue;
        }

        if comparison.writes_candidate() {
            match fsops::move_file(source, dest) {
                Ok(()) => {
                    info!("{} {:?}", action.as_str(), dest);
                    report.record(source, Some(dest.clone()), action, comparison.reason);
                }
                Err(err) => {
                    warn!("Failed to move {:?}: {}", source, err);
                    report.record(source, Some(dest.clone()), Action::Error, format!("move failed: {}", err));
                }
            }
        } else {
            match fsops::remove_file(source) {
                Ok(()) => report.record(
                    source,
                    Some(dest.clone()),
                    Action::Skipped,
                    format!("download superseded: {}", comparison.reason),
                ),
                Err(err) => report.record(
                    source,
                    Some(dest.clone()),
                    Action::DeletedSourceFailed,
                    format!("{}; download not deleted: {}", comparison.reason, err),
                ),
            }
        }
    }
    for companion in &plan.companions {
        report.push(execute_companion(companion, options));
    }
    report
}

/// Move a companion into place unless the library already has that file,
/// in which case the download copy is dropped.
fn execute_companion(companion: &CompanionMove, options: &SyncOptions) -> ReconciliationOutcome {
    let source = &companion.source;
    let dest = Some(companion.dest_path.clone());
    let occupied = companion.dest_path.exists();
    if options.dry_run {
        let detail = if occupied {
            "would discard: library already has this file"
        } else {
            "would move: album companion"
        };
        let action = if occupied { Action::Skipped } else { Action::Copied };
        return ReconciliationOutcome::new(source, dest, action, detail);
    }
    if occupied {
        return match fsops::remove_file(source) {
            Ok(()) => ReconciliationOutcome::new(source, dest, Action::Skipped, "library already has this file"),
            Err(err) => ReconciliationOutcome::new(
                source,
                dest,
                Action::DeletedSourceFailed,
                format!("library already has this file; download not deleted: {}", err),
            ),
        };
    }
    match fsops::move_file(source, &companion.dest_path) {
        Ok(()) => {
            debug!("Moved companion {:?}", companion.dest_path);
            ReconciliationOutcome::new(source, dest, Action::Copied, "album companion")
        }
        Err(err) => {
            warn!("Failed to move {:?}: {}", source, err);
            ReconciliationOutcome::new(source, dest, Action::Error, format!("move failed: {}", err))
        }
    }
}

/// Remove download folders emptied by an ingest. The root stays.
pub fn clean_downloads(downloads_root: &Path, options: &SyncOptions) -> Report {
    let mut report = Report::new();
    if !downloads_root.is_dir() {
        return report;
    }
    let pruned = fsops::prune_empty_dirs(
        downloads_root,
        &options.junk_filenames,
        &[],
        options.dry_run,
        &|_: &Path| false,
    );
    for dir in pruned.removed {
        report.record(dir, None, Action::Deleted, "empty download folder");
    }
    for (dir, err) in pruned.failed {
        report.record(dir, None, Action::Error, format!("rmdir failed: {}", err));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::stub::{write_fixture, StubProbe};
    use std::cell::RefCell;
    use std::fs;
    use tempfile::tempdir;

    struct Roots {
        _dir: tempfile::TempDir,
        downloads: PathBuf,
        library: PathBuf,
    }

    fn roots() -> Roots {
        let dir = tempdir().unwrap();
        let downloads = dir.path().join("Downloads");
        let library = dir.path().join("Library");
        fs::create_dir_all(&downloads).unwrap();
        fs::create_dir_all(&library).unwrap();
        Roots { _dir: dir, downloads, library }
    }

    fn plan(r: &Roots) -> IngestPlan {
        plan_ingest(&r.downloads, &r.library, &StubProbe, &NoLookup, &SyncOptions::default())
    }

    #[test]
    fn untagged_file_resolves_from_folders() {
        let r = roots();
        write_fixture(&r.downloads.join("The Band/Great Album/03 - Song.flac"), &[], 0);

        let (units, report) =
            group_album_units(&r.downloads, &StubProbe, &NoLookup, &SyncOptions::default());
        assert!(report.is_empty());
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].identity.artist, "The Band");
        assert_eq!(units[0].identity.album, "Great Album");
        assert_eq!(units[0].source, IdentitySource::Path);
        assert_eq!(units[0].tracks[0].track_no, Some(3));
        assert_eq!(units[0].tracks[0].title, "Song");

        let plan = plan(&r);
        assert_eq!(
            plan.moves[0].dest_path,
            r.library.join("The Band/Great Album/03 Song.flac")
        );
    }

    #[test]
    fn volume_and_part_album_folders_are_albums() {
        let r = roots();
        write_fixture(&r.downloads.join("The Band/Greatest Hits Vol. 2/03 - Song.flac"), &[], 0);
        write_fixture(&r.downloads.join("Other/(2003) Kill Bill Vol. 1/01 Intro.flac"), &[], 0);
        write_fixture(&r.downloads.join("Third/Saga Part 2/CD1/01 A.flac"), &[], 0);
        write_fixture(&r.downloads.join("Third/Saga Part 2/CD2/01 B.flac"), &[], 0);

        let plan = plan(&r);
        assert!(plan.report.is_empty());
        let dests: Vec<_> = plan.moves.iter().map(|m| m.dest_path.clone()).collect();
        assert_eq!(
            dests,
            vec![
                r.library.join("Other/(2003) Kill Bill Vol. 1/01 Intro.flac"),
                r.library.join("The Band/Greatest Hits Vol. 2/03 Song.flac"),
                r.library.join("Third/Saga Part 2/CD1/01 A.flac"),
                r.library.join("Third/Saga Part 2/CD2/01 B.flac"),
            ]
        );
    }

    #[test]
    fn tags_take_precedence_and_set_year() {
        let r = roots();
        write_fixture(
            &r.downloads.join("misc/stuff/track1.flac"),
            &["artist=Guest", "album_artist=Band", "album=Record", "year=2013", "track=1", "title=Opener"],
            0,
        );
        let plan = plan(&r);
        assert_eq!(plan.moves.len(), 1);
        assert_eq!(plan.moves[0].dest_path, r.library.join("Band/(2013) Record/01 Opener.flac"));
    }

    #[test]
    fn folder_year_and_artist_prefix_are_parsed() {
        let r = roots();
        write_fixture(&r.downloads.join("The Band/(1999) Early/01 The Band - First.mp3"), &[], 0);
        write_fixture(&r.downloads.join("The Band/(1999) Early/Hidden.mp3"), &[], 0);
        let plan = plan(&r);
        let dests: Vec<_> = plan.moves.iter().map(|m| m.dest_path.clone()).collect();
        assert_eq!(
            dests,
            vec![
                r.library.join("The Band/(1999) Early/01 First.mp3"),
                r.library.join("The Band/(1999) Early/Hidden.mp3"),
            ]
        );
    }

    #[test]
    fn multi_disc_units_get_cd_folders() {
        let r = roots();
        write_fixture(&r.downloads.join("Band/Box/CD1/01 A.flac"), &[], 0);
        write_fixture(&r.downloads.join("Band/Box/CD2/01 B.flac"), &[], 0);
        let plan = plan(&r);
        let dests: Vec<_> = plan.moves.iter().map(|m| m.dest_path.clone()).collect();
        assert_eq!(
            dests,
            vec![
                r.library.join("Band/Box/CD1/01 A.flac"),
                r.library.join("Band/Box/CD2/01 B.flac"),
            ]
        );
    }

    #[test]
    fn unit_tracks_sort_disc_then_number_unknown_last() {
        let r = roots();
        let tags = |track: &str, disc: &str| {
            vec!["artist=A".to_string(), "album=B".to_string(), track.to_string(), disc.to_string()]
        };
        for (name, track, disc) in [
            ("z.flac", "track=2", "disc=1"),
            ("y.flac", "", "disc=1"),
            ("x.flac", "track=1", "disc=2"),
            ("w.flac", "track=1", "disc=1"),
        ] {
            let lines = tags(track, disc);
            let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
            write_fixture(&r.downloads.join(name), &refs, 0);
        }
        let (units, _) = group_album_units(&r.downloads, &StubProbe, &NoLookup, &SyncOptions::default());
        let order: Vec<String> = units[0].tracks.iter().map(|t| t.asset.file_name()).collect();
        assert_eq!(order, vec!["w.flac", "z.flac", "y.flac", "x.flac"]);
        assert!(units[0].is_multi_disc());
    }

    #[test]
    fn year_is_the_most_common_with_early_ties() {
        assert_eq!(choose_album_year(&[2001, 2003, 2003]), Some(2003));
        assert_eq!(choose_album_year(&[2005, 2001]), Some(2001));
        assert_eq!(choose_album_year(&[]), None);
    }

    #[test]
    fn colliding_destinations_are_excluded_with_warnings() {
        let r = roots();
        write_fixture(&r.downloads.join("Band/Album/01 Song.flac"), &[], 0);
        write_fixture(&r.downloads.join("Band/Album/01 - song.flac"), &[], 1);
        write_fixture(&r.downloads.join("Band/Album/02 Other.flac"), &[], 0);
        let plan = plan(&r);
        assert_eq!(plan.moves.len(), 1);
        assert_eq!(plan.report.count(Action::Warning), 2);
        assert!(plan.moves[0].dest_path.ends_with("02 Other.flac"));
    }

    #[test]
    fn unidentifiable_files_get_placeholder_and_warning() {
        let r = roots();
        write_fixture(&r.downloads.join("05 Mystery.flac"), &[], 0);
        let plan = plan(&r);
        assert_eq!(plan.moves.len(), 1);
        assert_eq!(
            plan.moves[0].dest_path,
            r.library.join("Unknown Artist/Unknown Album/05 Mystery.flac")
        );
        assert_eq!(plan.report.count(Action::Warning), 1);
    }

    #[test]
    fn placeholder_tracks_lose_any_artist_prefix() {
        let r = roots();
        write_fixture(&r.downloads.join("01 Some Band - Song.flac"), &[], 0);
        write_fixture(&r.downloads.join("02 Other.flac"), &[], 0);
        let plan = plan(&r);
        let dests: Vec<_> = plan.moves.iter().map(|m| m.dest_path.clone()).collect();
        assert_eq!(
            dests,
            vec![
                r.library.join("Unknown Artist/Unknown Album/01 Song.flac"),
                r.library.join("Unknown Artist/Unknown Album/02 Other.flac"),
            ]
        );
    }

    struct FixedLookup {
        seen: RefCell<Vec<TrackSetFingerprint>>,
    }

    impl ReleaseLookup for FixedLookup {
        fn lookup(&self, fingerprint: &TrackSetFingerprint) -> Option<AlbumIdentity> {
            self.seen.borrow_mut().push(fingerprint.clone());
            Some(AlbumIdentity {
                artist: "Looked Up".to_string(),
                album: "Release: Part 1".to_string(),
                year: Some(2020),
            })
        }
    }

    #[test]
    fn lookup_only_runs_for_unresolved_folders() {
        let r = roots();
        write_fixture(&r.downloads.join("rips/01 One.flac"), &[], 0);
        write_fixture(&r.downloads.join("rips/02 Two.flac"), &[], 0);
        write_fixture(&r.downloads.join("Band/Album/01 Known.flac"), &[], 0);
        let lookup = FixedLookup { seen: RefCell::new(Vec::new()) };

        let plan = plan_ingest(&r.downloads, &r.library, &StubProbe, &lookup, &SyncOptions::default());
        let seen = lookup.seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].track_count, 2);
        assert_eq!(seen[0].titles, vec!["One".to_string(), "Two".to_string()]);
        assert!(plan.report.is_empty());
        assert!(plan
            .moves
            .iter()
            .any(|m| m.dest_path == r.library.join("Looked Up/(2020) Release_ Part 1/01 One.flac")));
    }

    #[test]
    fn fingerprint_digest_tracks_content() {
        let a = TrackSetFingerprint::new(None, vec![(Some(1), "One".to_string())]);
        let b = TrackSetFingerprint::new(None, vec![(Some(1), "one".to_string())]);
        let c = TrackSetFingerprint::new(None, vec![(Some(2), "One".to_string())]);
        assert_eq!(a.digest, b.digest);
        assert_ne!(a.digest, c.digest);
    }

    #[test]
    fn execute_moves_upgrades_and_discards() {
        let r = roots();
        write_fixture(&r.downloads.join("Band/Album/01 New.flac"), &[], 0);
        write_fixture(&r.downloads.join("Band/Album/02 Better.flac"), &["rate=96000"], 0);
        write_fixture(&r.downloads.join("Band/Album/03 Worse.flac"), &["rate=44100"], 0);
        write_fixture(&r.library.join("Band/Album/02 Better.flac"), &["rate=44100"], 0);
        let kept = write_fixture(&r.library.join("Band/Album/03 Worse.flac"), &["rate=48000"], 0);

        let plan = plan(&r);
        let report = execute_ingest(&plan, &StubProbe, &SyncOptions::default());
        assert_eq!(report.count(Action::Copied), 1);
        assert_eq!(report.count(Action::Upgraded), 1);
        assert_eq!(report.count(Action::Skipped), 1);
        assert!(fs::read_to_string(r.library.join("Band/Album/02 Better.flac"))
            .unwrap()
            .starts_with("rate=96000"));
        assert!(fs::read_to_string(&kept).unwrap().starts_with("rate=48000"));
        assert!(fsops::list_files(&r.downloads, &[]).is_empty());

        let cleaned = clean_downloads(&r.downloads, &SyncOptions::default());
        assert_eq!(cleaned.count(Action::Deleted), 2);
        assert!(r.downloads.exists());
        assert!(!r.downloads.join("Band").exists());
    }

    #[test]
    fn dry_run_execute_touches_nothing() {
        let r = roots();
        let source = write_fixture(&r.downloads.join("Band/Album/01 New.flac"), &[], 0);
        let options = SyncOptions { dry_run: true, ..SyncOptions::default() };
        let plan = plan_ingest(&r.downloads, &r.library, &StubProbe, &NoLookup, &options);
        let report = execute_ingest(&plan, &StubProbe, &options);
        assert_eq!(report.count(Action::Copied), 1);
        assert!(source.exists());
        assert!(!r.library.join("Band").exists());
    }

    #[test]
    fn artwork_and_booklets_follow_their_album() {
        let r = roots();
        write_fixture(&r.downloads.join("Band/Album/01 Song.mp3"), &[], 0);
        fs::write(r.downloads.join("Band/Album/cover.jpg"), b"jpeg").unwrap();
        fs::write(r.downloads.join("Band/Album/Digital Booklet.pdf"), b"pdf").unwrap();
        fs::write(r.downloads.join("Band/Album/Thumbs.db"), b"junk").unwrap();
        fs::write(r.downloads.join("Band/Album/notes.nfo"), b"nfo").unwrap();

        let plan = plan(&r);
        assert_eq!(plan.companions.len(), 2);
        let report = execute_ingest(&plan, &StubProbe, &SyncOptions::default());
        assert_eq!(report.count(Action::Copied), 3);
        let album = r.library.join("Band/Album");
        assert_eq!(fs::read(album.join("cover.jpg")).unwrap(), b"jpeg");
        assert!(album.join("Digital Booklet.pdf").is_file());
        assert!(!r.downloads.join("Band/Album/cover.jpg").exists());
        assert!(report.touched_album_dirs().contains(&album));
    }

    #[test]
    fn box_set_cover_lands_in_album_root() {
        let r = roots();
        write_fixture(&r.downloads.join("Band/Box/CD1/01 A.flac"), &[], 0);
        write_fixture(&r.downloads.join("Band/Box/CD2/01 B.flac"), &[], 0);
        fs::write(r.downloads.join("Band/Box/folder.jpg"), b"box").unwrap();
        fs::write(r.downloads.join("Band/Box/CD2/cover.png"), b"disc two").unwrap();

        let plan = plan(&r);
        let dests: Vec<_> = plan.companions.iter().map(|c| c.dest_path.clone()).collect();
        assert_eq!(
            dests,
            vec![
                r.library.join("Band/Box/folder.jpg"),
                r.library.join("Band/Box/CD2/cover.png"),
            ]
        );
    }

    #[test]
    fn shared_folders_keep_their_artwork() {
        let r = roots();
        write_fixture(&r.downloads.join("mixed/a.flac"), &["artist=A", "album=X"], 0);
        write_fixture(&r.downloads.join("mixed/b.flac"), &["artist=B", "album=Y"], 0);
        fs::write(r.downloads.join("mixed/cover.jpg"), b"which one").unwrap();
        write_fixture(&r.downloads.join("loose.flac"), &["artist=C", "album=Z"], 0);
        fs::write(r.downloads.join("cover.jpg"), b"root art").unwrap();

        let plan = plan(&r);
        assert!(plan.companions.is_empty());
    }

    #[test]
    fn companion_already_in_library_is_dropped_from_downloads() {
        let r = roots();
        write_fixture(&r.downloads.join("Band/Album/01 Song.mp3"), &[], 0);
        fs::write(r.downloads.join("Band/Album/cover.jpg"), b"new").unwrap();
        fs::create_dir_all(r.library.join("Band/Album")).unwrap();
        fs::write(r.library.join("Band/Album/cover.jpg"), b"old").unwrap();

        let report = execute_ingest(&plan(&r), &StubProbe, &SyncOptions::default());
        assert_eq!(report.count(Action::Skipped), 1);
        assert_eq!(fs::read(r.library.join("Band/Album/cover.jpg")).unwrap(), b"old");
        let cleaned = clean_downloads(&r.downloads, &SyncOptions::default());
        assert!(!cleaned.has_failures());
        assert!(!r.downloads.join("Band").exists());
    }
}
