use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use library::{Action, ReconciliationOutcome, Report, ReportSummary};
use serde::Serialize;
use tracing::{info, warn};

use crate::run::Mode;

/// What gets written to `summary_path`.
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub mode: &'static str,
    pub dry_run: bool,
    pub counts: ReportSummary,
    pub outcomes: &'a [ReconciliationOutcome],
}

impl<'a> RunSummary<'a> {
    pub fn new(mode: Mode, dry_run: bool, report: &'a Report) -> Self {
        Self {
            mode: mode.as_str(),
            dry_run,
            counts: report.summary(),
            outcomes: report.outcomes(),
        }
    }
}

/// Log failures as they matter, then one line per album and the totals.
pub fn log_report(report: &Report) {
    for outcome in report.outcomes() {
        match outcome.action {
            Action::Error | Action::DeletedSourceFailed | Action::Warning => warn!(
                "{} {:?}: {}",
                outcome.action.as_str(),
                outcome.source_path,
                outcome.detail
            ),
            _ => {}
        }
    }

    for (album, counts) in per_album(report) {
        let line: Vec<String> = counts
            .iter()
            .map(|(action, n)| format!("{} {}", n, action.to_ascii_lowercase()))
            .collect();
        info!("{:?}: {}", album, line.join(", "));
    }

    let s = report.summary();
    info!(
        "Done: {} copied, {} upgraded, {} skipped, {} deleted, {} source deletes failed, {} warnings, {} errors",
        s.copied, s.upgraded, s.skipped, s.deleted, s.deleted_source_failed, s.warnings, s.errors
    );
}

/// Changing actions grouped by album directory. Skips are left out so
/// unchanged albums stay quiet.
fn per_album(report: &Report) -> BTreeMap<PathBuf, BTreeMap<&'static str, usize>> {
    let mut albums: BTreeMap<PathBuf, BTreeMap<&'static str, usize>> = BTreeMap::new();
    for outcome in report.outcomes() {
        if outcome.action == Action::Skipped {
            continue;
        }
        let dir = match outcome.album_dir() {
            Some(dir) => dir.to_path_buf(),
            None => continue,
        };
        *albums
            .entry(dir)
            .or_default()
            .entry(outcome.action.as_str())
            .or_default() += 1;
    }
    albums
}

/// Process exit status for a finished run: 0 when clean, 2 when anything
/// needs a look.
pub fn exit_status(summary: &ReportSummary) -> u8 {
    if summary.warnings + summary.errors + summary.deleted_source_failed > 0 {
        2
    } else {
        0
    }
}

pub fn write_summary(path: &Path, summary: &RunSummary<'_>) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let bytes = serde_json::to_vec_pretty(summary)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    fs::write(path, bytes)
}
