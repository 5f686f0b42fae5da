//! Quality comparison between a candidate file and the current occupant of
//! its destination slot.
//!
//! The rules are one flat list evaluated in order; the first rule that
//! applies decides. Every pair of inputs reaches a decision.

use common::{AudioAsset, AudioFormat};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    CopyNew,
    KeepExisting,
    UpgradeReplace,
}

/// Which rule produced the decision. `SizeOnly` marks the cases where
/// neither side's sample rate settled it and the outcome rests on file size
/// alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Basis {
    DestinationEmpty,
    SeparateSlot,
    SampleRate,
    SizeOnly,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SideInfo {
    pub format: AudioFormat,
    pub extension: Option<String>,
    pub sample_rate_hz: Option<u32>,
    pub size_bytes: u64,
}

impl From<&AudioAsset> for SideInfo {
    fn from(asset: &AudioAsset) -> Self {
        Self {
            format: asset.format,
            extension: asset.extension(),
            sample_rate_hz: asset.sample_rate_hz,
            size_bytes: asset.size_bytes,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SlotComparison {
    pub decision: Decision,
    pub basis: Basis,
    pub reason: String,
    pub candidate: SideInfo,
    pub existing: Option<SideInfo>,
}

impl SlotComparison {
    /// Whether the candidate should be written to the slot.
    pub fn writes_candidate(&self) -> bool {
        matches!(self.decision, Decision::CopyNew | Decision::UpgradeReplace)
    }
}

pub fn compare(candidate: &AudioAsset, existing: Option<&AudioAsset>) -> SlotComparison {
    let candidate_info = SideInfo::from(candidate);
    let existing_info = match existing {
        Some(existing) => SideInfo::from(existing),
        None => {
            return SlotComparison {
                decision: Decision::CopyNew,
                basis: Basis::DestinationEmpty,
                reason: "destination empty".to_string(),
                candidate: candidate_info,
                existing: None,
            }
        }
    };

    let (decision, basis, reason) = decide(&candidate_info, &existing_info);
    SlotComparison {
        decision,
        basis,
        reason,
        candidate: candidate_info,
        existing: Some(existing_info),
    }
}

fn decide(candidate: &SideInfo, existing: &SideInfo) -> (Decision, Basis, String) {
    if candidate.extension != existing.extension {
        return (
            Decision::CopyNew,
            Basis::SeparateSlot,
            format!(
                "different container ({} vs {}), separate slot",
                candidate.extension.as_deref().unwrap_or("none"),
                existing.extension.as_deref().unwrap_or("none")
            ),
        );
    }

    if let (Some(new_rate), Some(old_rate)) = (candidate.sample_rate_hz, existing.sample_rate_hz) {
        if new_rate > old_rate {
            return (
                Decision::UpgradeReplace,
                Basis::SampleRate,
                format!("higher frequency: {}Hz > {}Hz", new_rate, old_rate),
            );
        }
        if new_rate < old_rate {
            return (
                Decision::KeepExisting,
                Basis::SampleRate,
                format!("existing has higher frequency: {}Hz > {}Hz", old_rate, new_rate),
            );
        }
    }

    if candidate.size_bytes > existing.size_bytes {
        (
            Decision::UpgradeReplace,
            Basis::SizeOnly,
            format!(
                "same/unknown frequency, larger file: {} > {} bytes",
                candidate.size_bytes, existing.size_bytes
            ),
        )
    } else {
        (
            Decision::KeepExisting,
            Basis::SizeOnly,
            format!(
                "same/unknown frequency, existing not smaller: {} >= {} bytes",
                existing.size_bytes, candidate.size_bytes
            ),
        )
    }
}
