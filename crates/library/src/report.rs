use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Copied,
    Skipped,
    Upgraded,
    Deleted,
    /// The decision was applied but the source could not be removed.
    DeletedSourceFailed,
    Warning,
    Error,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Copied => "COPIED",
            Action::Skipped => "SKIPPED",
            Action::Upgraded => "UPGRADED",
            Action::Deleted => "DELETED",
            Action::DeletedSourceFailed => "DELETED_SOURCE_FAILED",
            Action::Warning => "WARNING",
            Action::Error => "ERROR",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Action::Error | Action::DeletedSourceFailed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReconciliationOutcome {
    pub source_path: PathBuf,
    pub dest_path: Option<PathBuf>,
    pub action: Action,
    pub detail: String,
}

impl ReconciliationOutcome {
    pub fn new(
        source_path: impl Into<PathBuf>,
        dest_path: Option<PathBuf>,
        action: Action,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            dest_path,
            action,
            detail: detail.into(),
        }
    }

    /// Directory the outcome concerns, preferring the destination side.
    pub fn album_dir(&self) -> Option<&Path> {
        self.dest_path
            .as_deref()
            .unwrap_or(self.source_path.as_path())
            .parent()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub copied: usize,
    pub skipped: usize,
    pub upgraded: usize,
    pub deleted: usize,
    pub deleted_source_failed: usize,
    pub warnings: usize,
    pub errors: usize,
}

/// Append-only list of outcomes owned by one run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    outcomes: Vec<ReconciliationOutcome>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, outcome: ReconciliationOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn record(
        &mut self,
        source_path: impl Into<PathBuf>,
        dest_path: Option<PathBuf>,
        action: Action,
        detail: impl Into<String>,
    ) {
        self.push(ReconciliationOutcome::new(source_path, dest_path, action, detail));
    }

    pub fn extend(&mut self, other: Report) {
        self.outcomes.extend(other.outcomes);
    }

    pub fn outcomes(&self) -> &[ReconciliationOutcome] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<ReconciliationOutcome> {
        self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn count(&self, action: Action) -> usize {
        self.outcomes.iter().filter(|o| o.action == action).count()
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| o.action.is_failure())
    }

    /// Parent directories of every destination written or kept by this
    /// report. Errors and warnings never count as touching a directory.
    pub fn touched_album_dirs(&self) -> BTreeSet<PathBuf> {
        self.outcomes
            .iter()
            .filter(|o| !matches!(o.action, Action::Error | Action::Warning))
            .filter_map(|o| o.dest_path.as_deref())
            .filter_map(Path::parent)
            .map(Path::to_path_buf)
            .collect()
    }

    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary::default();
        for outcome in &self.outcomes {
            match outcome.action {
                Action::Copied => summary.copied += 1,
                Action::Skipped => summary.skipped += 1,
                Action::Upgraded => summary.upgraded += 1,
                Action::Deleted => summary.deleted += 1,
                Action::DeletedSourceFailed => summary.deleted_source_failed += 1,
                Action::Warning => summary.warnings += 1,
                Action::Error => summary.errors += 1,
            }
        }
        summary
    }
}
