//! Core library for the Frame Recorder application.
//!
//! Frames captured on an acquisition thread are handed to a bounded queue and
//! persisted by a dedicated writer thread, so a slow disk never stalls the
//! sensor and a fast sensor never exhausts memory. Each module owns one piece
//! of that pipeline: the hand-off queue, the writer worker, session metadata,
//! rate reporting and the controller that ties them together.

pub mod config;
pub mod error;
pub mod frame;
pub mod metadata;
pub mod queue;
pub mod rate;
pub mod record;
pub mod worker;
pub mod writer;

pub use config::RecordingSettings;
pub use error::{RecorderError, Result};
pub use frame::{ControlChoice, ControlKind, ControlSetting, Frame, Imager};
pub use metadata::SessionMetadata;
pub use queue::{FrameQueue, FrameReceiver, FrameSender, PushError};
pub use rate::{FrameRateCounter, RateMode};
pub use record::{RecordingController, RecordingEvent, StopHandle};
pub use worker::{FrameSink, WorkerHandle, WorkerState, WriterWorker};
pub use writer::{FileWriter, RawFrameWriter, WriterContext, WriterFactory, WriterRegistry};
