use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Default memory budget for the frame queue: 256 MiB.
pub const DEFAULT_MAX_MEMORY_USAGE: u64 = 256 * 1024 * 1024;

/// Default averaging window for the mean save rate, in milliseconds.
pub const DEFAULT_MEAN_RATE_INTERVAL_MS: u64 = 1000;

/// Configuration options for the recording subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    /// Directory the media file and its sidecar are written to.
    pub output_dir: PathBuf,
    /// File name prefix. An empty prefix disables recording.
    pub savefile: String,
    /// Key used to look up the writer factory.
    pub save_format: String,
    /// Write a `<media>.txt` metadata sidecar next to each recording.
    pub save_info_file: bool,
    /// Frames after which a session ends on its own. Zero means unbounded.
    pub recording_frames_limit: u64,
    /// Bytes the hand-off queue may hold.
    pub max_memory_usage: u64,
    pub observer: String,
    pub telescope: String,
    pub mean_rate_interval_ms: u64,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            savefile: String::new(),
            save_format: "raw".to_string(),
            save_info_file: true,
            recording_frames_limit: 0,
            max_memory_usage: DEFAULT_MAX_MEMORY_USAGE,
            observer: String::new(),
            telescope: String::new(),
            mean_rate_interval_ms: DEFAULT_MEAN_RATE_INTERVAL_MS,
        }
    }
}

impl RecordingSettings {
    /// Reads settings from a JSON document. Missing keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Whether a destination has been configured at all.
    pub fn recording_enabled(&self) -> bool {
        !self.savefile.is_empty()
    }

    /// The frame ceiling for a session, `None` when unbounded.
    pub fn frames_ceiling(&self) -> Option<u64> {
        match self.recording_frames_limit {
            0 => None,
            limit => Some(limit),
        }
    }
}
