use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, SecondsFormat};
use serde_json::{json, Map, Value};

use crate::{ControlKind, ControlSetting, Imager, RecordingSettings, Result};

const DURATION_UNITS: [(&str, f64); 3] = [
    ("seconds", 1.0),
    ("milliseconds", 1_000.0),
    ("microseconds", 1_000_000.0),
];

/// Descriptive facts about one recording session, written as an indented JSON
/// sidecar next to the media file when the metadata is dropped.
///
/// Camera settings are snapshotted at construction; later control changes are
/// not reflected.
#[derive(Debug)]
pub struct SessionMetadata {
    properties: Map<String, Value>,
    started: DateTime<Local>,
    filename: Option<PathBuf>,
    written: bool,
}

impl SessionMetadata {
    pub fn new(settings: &RecordingSettings, imager: &dyn Imager) -> Self {
        Self::started_at(settings, imager, Local::now())
    }

    pub(crate) fn started_at(
        settings: &RecordingSettings,
        imager: &dyn Imager,
        started: DateTime<Local>,
    ) -> Self {
        let mut properties = Map::new();
        properties.insert(
            "started".into(),
            Value::String(started.to_rfc3339_opts(SecondsFormat::Secs, false)),
        );
        properties.insert("camera".into(), Value::String(imager.name()));
        properties.insert("observer".into(), Value::String(settings.observer.clone()));
        properties.insert("telescope".into(), Value::String(settings.telescope.clone()));

        let camera_settings: Map<String, Value> = imager
            .controls()
            .iter()
            .map(|control| (control.name.clone(), control_snapshot(control)))
            .collect();
        properties.insert("camera-settings".into(), Value::Object(camera_settings));

        Self {
            properties,
            started,
            filename: None,
            written: false,
        }
    }

    /// Derives the sidecar path from the media filename.
    pub fn set_base_filename(&mut self, media: impl AsRef<Path>) {
        let mut name = media.as_ref().as_os_str().to_owned();
        name.push(".txt");
        self.filename = Some(PathBuf::from(name));
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    /// Records closing totals. Dimensions are `-1` when no frame was seen.
    pub fn set_ended(&mut self, total_frames: u64, width: i64, height: i64) {
        self.set_ended_at(total_frames, width, height, Local::now());
    }

    /// Same as [`set_ended`](Self::set_ended) with an explicit end time.
    ///
    /// The mean rate is `total_frames` over the whole seconds elapsed, and
    /// `0.0` when less than a second has passed.
    pub fn set_ended_at(&mut self, total_frames: u64, width: i64, height: i64, ended: DateTime<Local>) {
        let elapsed = ended.signed_duration_since(self.started).num_seconds();
        let mean_fps = if elapsed > 0 {
            total_frames as f64 / elapsed as f64
        } else {
            0.0
        };

        self.properties.insert(
            "ended".into(),
            Value::String(ended.to_rfc3339_opts(SecondsFormat::Secs, false)),
        );
        self.properties.insert("total-frames".into(), json!(total_frames));
        self.properties.insert("width".into(), json!(width));
        self.properties.insert("height".into(), json!(height));
        self.properties.insert("mean-fps".into(), json!(mean_fps));
    }

    /// Writes the sidecar now. Returns `Ok(false)` when no filename was set
    /// or the file was already written.
    pub fn persist(&mut self) -> Result<bool> {
        let Some(path) = self.filename.as_ref() else {
            return Ok(false);
        };
        if self.written {
            return Ok(false);
        }

        let document = serde_json::to_string_pretty(&self.properties)?;
        std::fs::write(path, document)?;
        self.written = true;
        tracing::debug!(path = %path.display(), "wrote session metadata");
        Ok(true)
    }
}

impl Drop for SessionMetadata {
    fn drop(&mut self) {
        match self.persist() {
            Ok(true) => {}
            Ok(false) if self.filename.is_none() => {
                tracing::debug!("no media filename assigned, skipping session metadata");
            }
            Ok(false) => {}
            Err(err) => tracing::warn!(%err, "could not write session metadata"),
        }
    }
}

fn control_snapshot(control: &ControlSetting) -> Value {
    let mut entry = Map::new();
    let value = match control.kind {
        ControlKind::Bool => Value::Bool(control.value != 0.0),
        ControlKind::Combo => json!(control.value as i64),
        ControlKind::Number | ControlKind::Duration => json!(control.value),
    };
    entry.insert("value".into(), value);
    entry.insert("type".into(), Value::String(control.kind.label().to_string()));

    match control.kind {
        ControlKind::Combo => {
            let choices: Map<String, Value> = control
                .choices
                .iter()
                .map(|choice| (choice.label.clone(), json!(choice.value)))
                .collect();
            entry.insert("choices".into(), Value::Object(choices));
        }
        ControlKind::Duration => {
            let seconds = control.value * control.duration_unit.as_secs_f64();
            for (unit, scale) in DURATION_UNITS {
                entry.insert(format!("value_{unit}"), json!(seconds * scale));
            }
        }
        ControlKind::Number => {
            entry.insert("min".into(), json!(control.min));
            entry.insert("max".into(), json!(control.max));
            entry.insert("step".into(), json!(control.step));
        }
        ControlKind::Bool => {}
    }

    Value::Object(entry)
}
