use std::{
    collections::HashMap,
    fmt,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Local};

use crate::{Frame, RecorderError, RecordingSettings, Result};

/// Output sink for the frames of one session. Implementations own the file
/// and its container format; the pipeline only feeds frames in order.
pub trait FileWriter: Send {
    /// Path of the media file being written.
    fn filename(&self) -> &Path;

    fn handle(&mut self, frame: &Frame) -> Result<()>;

    /// Flushes and closes the output. Called once, after the last frame.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Builds the writer for a session.
pub type WriterFactory = Arc<dyn Fn(&WriterContext) -> Result<Box<dyn FileWriter>> + Send + Sync>;

/// Everything a writer factory needs to open its output.
#[derive(Debug, Clone)]
pub struct WriterContext {
    pub camera_name: String,
    pub settings: RecordingSettings,
    pub started: DateTime<Local>,
}

impl WriterContext {
    pub fn new(camera_name: impl Into<String>, settings: RecordingSettings) -> Self {
        Self {
            camera_name: camera_name.into(),
            settings,
            started: Local::now(),
        }
    }

    /// `<output_dir>/<savefile>_<camera>_<timestamp>.<extension>`
    pub fn output_path(&self, extension: &str) -> PathBuf {
        let camera: String = self
            .camera_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let name = format!(
            "{}_{}_{}.{}",
            self.settings.savefile,
            camera,
            self.started.format("%Y-%m-%dT%H-%M-%S%.3f"),
            extension
        );
        self.settings.output_dir.join(name)
    }
}

/// Format identifier to writer factory lookup.
#[derive(Clone, Default)]
pub struct WriterRegistry {
    factories: HashMap<String, WriterFactory>,
}

impl WriterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in formats.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(RawFrameWriter::FORMAT, |context| {
            let writer = RawFrameWriter::create(context.output_path(RawFrameWriter::EXTENSION))?;
            Ok(Box::new(writer) as Box<dyn FileWriter>)
        });
        registry
    }

    pub fn register<F>(&mut self, format: impl Into<String>, factory: F)
    where
        F: Fn(&WriterContext) -> Result<Box<dyn FileWriter>> + Send + Sync + 'static,
    {
        self.factories.insert(format.into(), Arc::new(factory));
    }

    /// Registered format identifiers, sorted.
    pub fn formats(&self) -> Vec<&str> {
        let mut formats: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        formats.sort_unstable();
        formats
    }

    pub fn get(&self, format: &str) -> Result<WriterFactory> {
        self.factories
            .get(format)
            .cloned()
            .ok_or_else(|| RecorderError::UnknownFormat(format.to_string()))
    }

    /// The factory to use for `settings`, or `None` when recording is not
    /// configured.
    pub fn factory_for(&self, settings: &RecordingSettings) -> Option<WriterFactory> {
        if !settings.recording_enabled() {
            return None;
        }

        match self.get(&settings.save_format) {
            Ok(factory) => Some(factory),
            Err(err) => {
                tracing::warn!(%err, "recording disabled");
                None
            }
        }
    }
}

impl fmt::Debug for WriterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterRegistry")
            .field("formats", &self.formats())
            .finish()
    }
}

/// Appends the pixel buffer of every frame, unchanged, to a single file.
#[derive(Debug)]
pub struct RawFrameWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl RawFrameWriter {
    pub const FORMAT: &'static str = "raw";
    pub const EXTENSION: &'static str = "raw";

    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let out = BufWriter::new(File::create(&path)?);
        Ok(Self { path, out })
    }
}

impl FileWriter for RawFrameWriter {
    fn filename(&self) -> &Path {
        &self.path
    }

    fn handle(&mut self, frame: &Frame) -> Result<()> {
        self.out.write_all(frame.data())?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}
