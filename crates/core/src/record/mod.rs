use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
        Arc,
    },
    time::Duration,
};

use crate::{
    Frame, FrameSink, Imager, RecordingSettings, Result, SessionMetadata, WorkerHandle,
    WriterContext, WriterRegistry, WriterWorker,
};

/// Progress notifications of a recording session. Sent from the writer
/// thread (and from the acquisition thread for drops), so listeners receive
/// them on whichever thread drains the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingEvent {
    /// The writer opened its output file.
    Started(PathBuf),
    /// Frames written so far.
    FrameSaved(u64),
    /// Frames dropped so far because the queue was full.
    FrameDropped(u64),
    /// Instantaneous save rate, frames per second.
    SaveRate(f64),
    /// Save rate averaged over the reporting interval.
    MeanRate(f64),
    /// The file writer reported an error; the session is ending.
    WriterFailed(String),
    /// The session is over. Sent exactly once per started worker.
    Finished,
}

/// Cloneable handle that ends the running session from any thread.
///
/// Shares the controller's recording flag, so it stays valid across sessions
/// and stops whichever one is active. A frame handed in while the stop races
/// with the writer's final drain may be discarded.
#[derive(Debug, Clone)]
pub struct StopHandle {
    recording: Arc<AtomicBool>,
}

impl StopHandle {
    /// Same as [`RecordingController::end_recording`].
    pub fn stop(&self) {
        self.recording.store(false, Ordering::Release);
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }
}

/// High level abstraction that starts and stops recording sessions and pipes
/// captured frames to the active session's writer thread.
#[derive(Debug)]
pub struct RecordingController {
    settings: RecordingSettings,
    registry: WriterRegistry,
    events: Sender<RecordingEvent>,
    recording: Arc<AtomicBool>,
    sink: Option<FrameSink>,
    worker: Option<WorkerHandle>,
}

impl RecordingController {
    pub fn new(
        settings: RecordingSettings,
        registry: WriterRegistry,
        events: Sender<RecordingEvent>,
    ) -> Self {
        Self {
            settings,
            registry,
            events,
            recording: Arc::new(AtomicBool::new(false)),
            sink: None,
            worker: None,
        }
    }

    /// A handle that can end recording without access to the controller,
    /// e.g. from a UI thread while acquisition keeps calling
    /// [`handle`](Self::handle).
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            recording: self.recording.clone(),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    /// Hands a captured frame to the active session. Never blocks; a no-op
    /// when not recording.
    pub fn handle(&mut self, frame: Frame) {
        if !self.is_recording() {
            return;
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.push(frame);
        }
    }

    /// Starts a session for `imager`.
    ///
    /// Returns `Ok(false)` without side effects when no writer is configured
    /// or a session is already running.
    pub fn start_recording(&mut self, imager: &dyn Imager) -> Result<bool> {
        let Some(factory) = self.registry.factory_for(&self.settings) else {
            return Ok(false);
        };
        if self.is_recording() {
            tracing::warn!("recording already in progress");
            return Ok(false);
        }
        self.join()?;

        let metadata = self
            .settings
            .save_info_file
            .then(|| SessionMetadata::new(&self.settings, imager));
        let context = WriterContext::new(imager.name(), self.settings.clone());
        // The previous worker has been joined, so nothing else touches the flag.
        self.recording.store(true, Ordering::Release);

        let (worker, sink) = WriterWorker::new(
            factory,
            context,
            self.events.clone(),
            self.recording.clone(),
            self.settings.max_memory_usage,
        );
        let worker = worker
            .with_ceiling(self.settings.frames_ceiling())
            .with_metadata(metadata)
            .with_mean_rate_interval(Duration::from_millis(self.settings.mean_rate_interval_ms));

        let handle = match worker.spawn() {
            Ok(handle) => handle,
            Err(err) => {
                self.recording.store(false, Ordering::Release);
                return Err(err);
            }
        };
        tracing::info!(
            camera = %imager.name(),
            ceiling = ?self.settings.frames_ceiling(),
            "recording session launched"
        );
        self.sink = Some(sink);
        self.worker = Some(handle);
        Ok(true)
    }

    /// Asks the current session to stop. Frames already queued are still
    /// written; wait for [`RecordingEvent::Finished`] or call
    /// [`join`](Self::join) for confirmation.
    pub fn end_recording(&self) {
        self.recording.store(false, Ordering::Release);
    }

    /// Waits for the current writer thread, if any, to exit.
    pub fn join(&mut self) -> Result<()> {
        self.sink = None;
        match self.worker.take() {
            Some(worker) => worker.join(),
            None => Ok(()),
        }
    }
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        self.end_recording();
        if let Err(err) = self.join() {
            tracing::error!(%err, "writer thread did not shut down cleanly");
        }
    }
}
