use std::{
    path::PathBuf,
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand};
use frame_recorder_core::{
    ControlChoice, ControlSetting, Frame, Imager, RecordingController, RecordingEvent,
    RecordingSettings, WriterRegistry,
};
use tracing_subscriber::EnvFilter;

fn main() -> frame_recorder_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Record {
            config,
            frames,
            seconds,
            fps,
            width,
            height,
        } => {
            let pattern = TestPattern::new(width, height);
            run_record(config.as_ref(), &pattern, frames, seconds, fps)
        }
        Commands::Formats => {
            for format in WriterRegistry::with_defaults().formats() {
                println!("{format}");
            }
            Ok(())
        }
        Commands::Defaults => {
            println!(
                "{}",
                serde_json::to_string_pretty(&RecordingSettings::default())?
            );
            Ok(())
        }
    }
}

fn run_record(
    config: Option<&PathBuf>,
    imager: &TestPattern,
    frames: u64,
    seconds: f64,
    fps: f64,
) -> frame_recorder_core::Result<()> {
    let settings = match config {
        Some(path) => RecordingSettings::load(path)?,
        None => RecordingSettings {
            savefile: "capture".to_string(),
            ..Default::default()
        },
    };
    tracing::info!(?settings, "recording test pattern");

    let (tx, rx) = mpsc::channel();
    let listener = thread::spawn(move || log_events(rx));

    let mut recorder = RecordingController::new(settings, WriterRegistry::with_defaults(), tx);
    if !recorder.start_recording(imager)? {
        tracing::warn!("no destination configured, nothing to record");
        drop(recorder);
        let _ = listener.join();
        return Ok(());
    }

    let period = Duration::from_secs_f64(1.0 / fps.max(0.1));
    let deadline = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
    let mut index = 0u64;
    while recorder.is_recording() && index < frames && Instant::now() < deadline {
        recorder.handle(imager.frame(index));
        index += 1;
        thread::sleep(period);
    }

    recorder.end_recording();
    recorder.join()?;
    drop(recorder);
    let _ = listener.join();
    tracing::info!(captured = index, "acquisition stopped");
    Ok(())
}

fn log_events(rx: mpsc::Receiver<RecordingEvent>) {
    for event in rx {
        match event {
            RecordingEvent::Started(path) => tracing::info!(?path, "writing"),
            RecordingEvent::FrameSaved(count) => tracing::debug!(count, "frame saved"),
            RecordingEvent::FrameDropped(count) => tracing::warn!(count, "frame dropped"),
            RecordingEvent::SaveRate(rate) => tracing::trace!(rate, "save rate"),
            RecordingEvent::MeanRate(rate) => tracing::info!("mean rate {rate:.1} fps"),
            RecordingEvent::WriterFailed(err) => tracing::error!(%err, "writer failed"),
            RecordingEvent::Finished => tracing::info!("finished"),
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// Synthetic 16-bit camera producing a moving gradient.
struct TestPattern {
    width: u32,
    height: u32,
}

impl TestPattern {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    fn frame(&self, index: u64) -> Frame {
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 2);
        for y in 0..self.height {
            for x in 0..self.width {
                let level = (u64::from(x + y) + index * 8) as u16;
                data.extend_from_slice(&level.wrapping_mul(64).to_le_bytes());
            }
        }
        Frame::new(self.width, self.height, 2, data)
            .unwrap_or_else(|_| Frame::blank(self.width, self.height, 2))
    }
}

impl Imager for TestPattern {
    fn name(&self) -> String {
        "Test Pattern".to_string()
    }

    fn controls(&self) -> Vec<ControlSetting> {
        vec![
            ControlSetting::duration("exposure", 10.0, Duration::from_millis(1)),
            ControlSetting::number("gain", 120.0, 0.0, 600.0, 1.0),
            ControlSetting::combo(
                "bin",
                1,
                vec![ControlChoice::new("1x1", 1), ControlChoice::new("2x2", 2)],
            ),
            ControlSetting::boolean("cooler", false),
        ]
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Record camera frames to disk", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record frames from the built-in test pattern camera.
    Record {
        /// JSON recording settings; defaults write `capture_*.raw` here.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Stop after this many captured frames.
        #[arg(long, default_value_t = 100)]
        frames: u64,
        /// Stop after this many seconds.
        #[arg(long, default_value_t = 10.0)]
        seconds: f64,
        /// Capture rate of the test pattern.
        #[arg(long, default_value_t = 30.0)]
        fps: f64,
        #[arg(long, default_value_t = 640)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
    },
    /// List the available output formats.
    Formats,
    /// Print the default recording settings as JSON.
    Defaults,
}
