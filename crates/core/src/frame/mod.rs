use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{RecorderError, Result};

/// One captured image buffer. Once handed to the recorder the buffer is owned
/// by the queue and never mutated again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    elem_size: usize,
    data: Vec<u8>,
}

impl Frame {
    /// Wraps a pixel buffer, checking that its length matches the layout.
    pub fn new(width: u32, height: u32, elem_size: usize, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * elem_size;
        if data.len() != expected {
            return Err(RecorderError::msg(format!(
                "frame buffer holds {} bytes, {width}x{height}x{elem_size} needs {expected}",
                data.len()
            )));
        }

        Ok(Self {
            width,
            height,
            elem_size,
            data,
        })
    }

    /// A zero-filled frame of the requested layout.
    pub fn blank(width: u32, height: u32, elem_size: usize) -> Self {
        let len = width as usize * height as usize * elem_size;
        Self {
            width,
            height,
            elem_size,
            data: vec![0; len],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per pixel, all channels included.
    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Size of the pixel buffer in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Type tag of a camera control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    Number,
    Combo,
    Bool,
    Duration,
}

impl ControlKind {
    /// Label used for the control type in session metadata.
    pub fn label(self) -> &'static str {
        match self {
            ControlKind::Number => "number",
            ControlKind::Combo => "combo",
            ControlKind::Bool => "bool",
            ControlKind::Duration => "duration",
        }
    }
}

/// One entry of a combo control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlChoice {
    pub label: String,
    pub value: i64,
}

impl ControlChoice {
    pub fn new(label: impl Into<String>, value: i64) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

/// Snapshot of a single camera control as exposed by the imager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSetting {
    pub name: String,
    pub kind: ControlKind,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub choices: Vec<ControlChoice>,
    /// Length of one tick of `value` for duration controls.
    pub duration_unit: Duration,
}

impl ControlSetting {
    fn base(name: impl Into<String>, kind: ControlKind, value: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
            min: 0.0,
            max: 0.0,
            step: 0.0,
            choices: Vec::new(),
            duration_unit: Duration::ZERO,
        }
    }

    pub fn number(name: impl Into<String>, value: f64, min: f64, max: f64, step: f64) -> Self {
        Self {
            min,
            max,
            step,
            ..Self::base(name, ControlKind::Number, value)
        }
    }

    pub fn combo(name: impl Into<String>, value: i64, choices: Vec<ControlChoice>) -> Self {
        Self {
            choices,
            ..Self::base(name, ControlKind::Combo, value as f64)
        }
    }

    pub fn boolean(name: impl Into<String>, value: bool) -> Self {
        Self {
            max: 1.0,
            step: 1.0,
            ..Self::base(name, ControlKind::Bool, if value { 1.0 } else { 0.0 })
        }
    }

    /// A numeric control whose value counts ticks of `unit`.
    pub fn duration(name: impl Into<String>, value: f64, unit: Duration) -> Self {
        Self {
            duration_unit: unit,
            ..Self::base(name, ControlKind::Duration, value)
        }
    }

    /// The value expressed in seconds, for duration controls.
    pub fn seconds(&self) -> Option<f64> {
        match self.kind {
            ControlKind::Duration => Some(self.value * self.duration_unit.as_secs_f64()),
            _ => None,
        }
    }
}

/// Camera collaborator: identity plus the current state of its controls.
pub trait Imager {
    fn name(&self) -> String;
    fn controls(&self) -> Vec<ControlSetting>;
}
