//! Firmware update (DFU) availability and progress states
//!
//! Dice report the build timestamp of the firmware they run. Comparing it
//! against the timestamp of the bundled DFU files decides whether an update
//! is offered.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether the bundled firmware should be installed on a die
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DfuAvailability {
    /// Either timestamp is missing
    Unknown,
    /// Die runs an older build than the bundled one
    Outdated,
    UpToDate,
    /// Die runs a newer build than the bundled one
    Newer,
}

impl Default for DfuAvailability {
    fn default() -> Self {
        Self::Unknown
    }
}

pub fn dfu_availability(
    die_timestamp: Option<DateTime<Utc>>,
    files_timestamp: Option<DateTime<Utc>>,
) -> DfuAvailability {
    match (die_timestamp, files_timestamp) {
        (Some(die), Some(files)) if die < files => DfuAvailability::Outdated,
        (Some(die), Some(files)) if die > files => DfuAvailability::Newer,
        (Some(_), Some(_)) => DfuAvailability::UpToDate,
        _ => DfuAvailability::Unknown,
    }
}

/// DFU images available to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DfuFilesInfo {
    pub firmware_path: PathBuf,
    /// Bootloader image, flashed before the firmware when present
    #[serde(default)]
    pub bootloader_path: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
}

impl DfuFilesInfo {
    /// Number of images a full update writes
    pub fn image_count(&self) -> usize {
        1 + self.bootloader_path.is_some() as usize
    }
}

/// Progress of a firmware update
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DfuState {
    /// Waiting for a connection slot
    Pending,
    Initializing,
    Uploading { progress: u8 },
    Completed,
    Aborted,
    Errored { error: String },
}

impl Default for DfuState {
    fn default() -> Self {
        Self::Pending
    }
}

impl DfuState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DfuState::Completed | DfuState::Aborted | DfuState::Errored { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Option<DateTime<Utc>> {
        Some(s.parse().unwrap())
    }

    #[test]
    fn test_availability() {
        let files = ts("2024-03-01T00:00:00Z");
        assert_eq!(
            dfu_availability(ts("2024-01-01T00:00:00Z"), files),
            DfuAvailability::Outdated
        );
        assert_eq!(dfu_availability(files, files), DfuAvailability::UpToDate);
        assert_eq!(
            dfu_availability(ts("2024-06-01T00:00:00Z"), files),
            DfuAvailability::Newer
        );
        assert_eq!(dfu_availability(None, files), DfuAvailability::Unknown);
    }

    #[test]
    fn test_dfu_state() {
        assert!(!DfuState::Uploading { progress: 50 }.is_terminal());
        assert!(DfuState::Errored {
            error: "lost".to_string()
        }
        .is_terminal());
        let json = serde_json::to_value(DfuState::Uploading { progress: 10 }).unwrap();
        assert_eq!(json["state"], "uploading");
    }
}
