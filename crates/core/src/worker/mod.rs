use std::{
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    config::DEFAULT_MEAN_RATE_INTERVAL_MS,
    queue::{FrameQueue, FrameReceiver, FrameSender, PushError},
    FileWriter, Frame, FrameRateCounter, RecorderError, RecordingEvent, Result, SessionMetadata,
    WriterContext, WriterFactory,
};

/// Sleep between polls of an empty queue.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Lifecycle of a [`WriterWorker`]. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Running = 1,
    Stopped = 2,
}

impl WorkerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => WorkerState::Idle,
            1 => WorkerState::Running,
            _ => WorkerState::Stopped,
        }
    }
}

/// Producer side of a session: creates the frame queue from the first frame
/// it sees and counts frames that do not fit.
#[derive(Debug)]
pub struct FrameSink {
    memory_budget: u64,
    queue: Option<FrameSender>,
    handoff: Option<Sender<FrameReceiver>>,
    dropped: u64,
    events: Sender<RecordingEvent>,
}

impl FrameSink {
    /// Enqueues `frame` without blocking. Returns `false` when it was dropped.
    pub fn push(&mut self, frame: Frame) -> bool {
        if self.queue.is_none() {
            self.allocate(frame.size_bytes());
        }
        let Some(queue) = self.queue.as_ref() else {
            return false;
        };

        match queue.try_push(frame) {
            Ok(()) => true,
            Err(PushError::Full(_)) => {
                self.dropped += 1;
                tracing::warn!(dropped = self.dropped, "frames queue full, dropping frame");
                let _ = self.events.send(RecordingEvent::FrameDropped(self.dropped));
                false
            }
            Err(PushError::Closed(_)) => {
                tracing::debug!("writer already stopped, discarding frame");
                false
            }
        }
    }

    /// Frames dropped so far because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Queue capacity, once the first frame has sized it.
    pub fn capacity(&self) -> Option<usize> {
        self.queue.as_ref().map(FrameSender::capacity)
    }

    fn allocate(&mut self, frame_size: usize) {
        let queue = FrameQueue::for_budget(self.memory_budget, frame_size);
        tracing::debug!(
            bytes = self.memory_budget,
            frames = queue.capacity(),
            "allocated frames queue"
        );
        let (tx, rx) = queue.split();
        if let Some(handoff) = self.handoff.take() {
            // The worker may already be gone; frames then report `Closed`.
            let _ = handoff.send(rx);
        }
        self.queue = Some(tx);
    }
}

/// Drains the frame queue of one session into a [`FileWriter`] on its own
/// thread.
pub struct WriterWorker {
    factory: WriterFactory,
    context: WriterContext,
    events: Sender<RecordingEvent>,
    recording: Arc<AtomicBool>,
    ceiling: Option<u64>,
    metadata: Option<SessionMetadata>,
    mean_rate_interval: Duration,
    handoff: Receiver<FrameReceiver>,
    queue: Option<FrameReceiver>,
    state: Arc<AtomicU8>,
}

impl WriterWorker {
    /// Creates an idle worker and the sink that feeds it.
    ///
    /// The session runs while `recording` is true; the worker clears it when
    /// it stops on its own.
    pub fn new(
        factory: WriterFactory,
        context: WriterContext,
        events: Sender<RecordingEvent>,
        recording: Arc<AtomicBool>,
        memory_budget: u64,
    ) -> (Self, FrameSink) {
        let (handoff_tx, handoff_rx) = mpsc::channel();
        let sink = FrameSink {
            memory_budget,
            queue: None,
            handoff: Some(handoff_tx),
            dropped: 0,
            events: events.clone(),
        };
        let worker = Self {
            factory,
            context,
            events,
            recording,
            ceiling: None,
            metadata: None,
            mean_rate_interval: Duration::from_millis(DEFAULT_MEAN_RATE_INTERVAL_MS),
            handoff: handoff_rx,
            queue: None,
            state: Arc::new(AtomicU8::new(WorkerState::Idle as u8)),
        };
        (worker, sink)
    }

    /// Stop after `ceiling` frames. `None` runs until the flag clears.
    pub fn with_ceiling(mut self, ceiling: Option<u64>) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn with_metadata(mut self, metadata: Option<SessionMetadata>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_mean_rate_interval(mut self, interval: Duration) -> Self {
        self.mean_rate_interval = interval;
        self
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Runs the worker on a dedicated thread.
    pub fn spawn(self) -> Result<WorkerHandle> {
        let state = self.state.clone();
        let thread = thread::Builder::new()
            .name("frame-writer".to_string())
            .spawn(move || self.run())?;
        Ok(WorkerHandle {
            thread: Some(thread),
            state,
        })
    }

    /// Runs the session to completion on the calling thread.
    pub fn run(mut self) {
        self.set_state(WorkerState::Running);
        match (self.factory)(&self.context) {
            Ok(writer) => self.record(writer),
            Err(err) => {
                tracing::error!(%err, "could not open file writer");
                self.recording.store(false, Ordering::Release);
                let _ = self.events.send(RecordingEvent::WriterFailed(err.to_string()));
                if let Some(metadata) = self.metadata.as_mut() {
                    metadata.set_ended(0, -1, -1);
                }
            }
        }

        // Dropping the metadata writes the sidecar before listeners are told.
        drop(self.metadata.take());
        tracing::info!("recording finished");
        self.set_state(WorkerState::Stopped);
        let _ = self.events.send(RecordingEvent::Finished);
    }

    fn record(&mut self, mut writer: Box<dyn FileWriter>) {
        let filename = writer.filename().to_path_buf();
        if let Some(metadata) = self.metadata.as_mut() {
            metadata.set_base_filename(&filename);
        }
        tracing::info!(file = %filename.display(), "recording started");
        let _ = self.events.send(RecordingEvent::Started(filename));

        let save_events = self.events.clone();
        let mut save_rate = FrameRateCounter::instant(move |rate| {
            let _ = save_events.send(RecordingEvent::SaveRate(rate));
        });
        let mean_events = self.events.clone();
        let mut mean_rate = FrameRateCounter::windowed(self.mean_rate_interval, move |rate| {
            let _ = mean_events.send(RecordingEvent::MeanRate(rate));
        });

        let mut frames = 0u64;
        let mut dimensions: Option<(u32, u32)> = None;
        let mut failed = false;

        let mut write = |frame: Frame, frames: &mut u64| -> Result<()> {
            writer.handle(&frame)?;
            *frames += 1;
            save_rate.tick();
            mean_rate.tick();
            let _ = self.events.send(RecordingEvent::FrameSaved(*frames));
            dimensions.get_or_insert((frame.width(), frame.height()));
            Ok(())
        };

        while self.recording.load(Ordering::Acquire) && !reached(self.ceiling, frames) {
            match next_frame(&self.handoff, &mut self.queue) {
                Some(frame) => {
                    if let Err(err) = write(frame, &mut frames) {
                        report_write_failure(&self.events, err);
                        failed = true;
                        break;
                    }
                }
                None => thread::sleep(POLL_INTERVAL),
            }
        }

        // Stopped from outside: everything already accepted still gets written.
        if !failed && !reached(self.ceiling, frames) {
            while let Some(frame) = next_frame(&self.handoff, &mut self.queue) {
                if let Err(err) = write(frame, &mut frames) {
                    report_write_failure(&self.events, err);
                    break;
                }
                if reached(self.ceiling, frames) {
                    break;
                }
            }
        }

        self.recording.store(false, Ordering::Release);
        if let Err(err) = writer.finish() {
            tracing::error!(%err, "could not close file writer");
        }
        drop(writer);

        let (width, height) = dimensions
            .map(|(w, h)| (i64::from(w), i64::from(h)))
            .unwrap_or((-1, -1));
        if let Some(metadata) = self.metadata.as_mut() {
            metadata.set_ended(frames, width, height);
        }
        tracing::info!(frames, width, height, "closing writer");
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl std::fmt::Debug for WriterWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterWorker")
            .field("context", &self.context)
            .field("ceiling", &self.ceiling)
            .field("state", &self.state())
            .finish()
    }
}

fn reached(ceiling: Option<u64>, frames: u64) -> bool {
    ceiling.is_some_and(|ceiling| frames >= ceiling)
}

fn next_frame(handoff: &Receiver<FrameReceiver>, queue: &mut Option<FrameReceiver>) -> Option<Frame> {
    if queue.is_none() {
        *queue = handoff.try_recv().ok();
    }
    queue.as_ref()?.try_pop()
}

fn report_write_failure(events: &Sender<RecordingEvent>, err: RecorderError) {
    tracing::error!(%err, "file writer failed, stopping recording");
    let _ = events.send(RecordingEvent::WriterFailed(err.to_string()));
}

/// Handle to a spawned [`WriterWorker`].
#[derive(Debug)]
pub struct WorkerHandle {
    thread: Option<JoinHandle<()>>,
    state: Arc<AtomicU8>,
}

impl WorkerHandle {
    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for the worker thread to exit.
    pub fn join(mut self) -> Result<()> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| RecorderError::msg("frame writer thread panicked")),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::{Path, PathBuf},
        sync::Mutex,
        time::Instant,
    };

    use super::*;
    use crate::{Imager, RecordingSettings};

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[derive(Default)]
    struct Written {
        tags: Vec<u8>,
        finished: bool,
    }

    struct MemoryWriter {
        path: PathBuf,
        written: Arc<Mutex<Written>>,
        fail_after: Option<usize>,
    }

    impl FileWriter for MemoryWriter {
        fn filename(&self) -> &Path {
            &self.path
        }

        fn handle(&mut self, frame: &Frame) -> Result<()> {
            let mut written = self.written.lock().unwrap();
            if self.fail_after == Some(written.tags.len()) {
                return Err(RecorderError::msg("disk full"));
            }
            written.tags.push(frame.data()[0]);
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.written.lock().unwrap().finished = true;
            Ok(())
        }
    }

    fn memory_factory(path: PathBuf, fail_after: Option<usize>) -> (WriterFactory, Arc<Mutex<Written>>) {
        let written = Arc::new(Mutex::new(Written::default()));
        let shared = written.clone();
        let factory: WriterFactory = Arc::new(move |_: &WriterContext| -> Result<Box<dyn FileWriter>> {
            Ok(Box::new(MemoryWriter {
                path: path.clone(),
                written: shared.clone(),
                fail_after,
            }) as Box<dyn FileWriter>)
        });
        (factory, written)
    }

    fn tagged(tag: u8) -> Frame {
        Frame::new(4, 2, 1, vec![tag; 8]).unwrap()
    }

    fn worker(
        factory: WriterFactory,
        budget: u64,
    ) -> (WriterWorker, FrameSink, Arc<AtomicBool>, Receiver<RecordingEvent>) {
        let (tx, rx) = mpsc::channel();
        let recording = Arc::new(AtomicBool::new(true));
        let context = WriterContext::new("test", RecordingSettings::default());
        let (worker, sink) = WriterWorker::new(factory, context, tx, recording.clone(), budget);
        (worker, sink, recording, rx)
    }

    fn until_finished(rx: &Receiver<RecordingEvent>) -> Vec<RecordingEvent> {
        let deadline = Instant::now() + TIMEOUT;
        let mut events = Vec::new();
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let event = rx.recv_timeout(left).expect("worker did not finish in time");
            let done = event == RecordingEvent::Finished;
            events.push(event);
            if done {
                return events;
            }
        }
    }

    fn saved(events: &[RecordingEvent]) -> Vec<u64> {
        events
            .iter()
            .filter_map(|event| match event {
                RecordingEvent::FrameSaved(count) => Some(*count),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn stops_at_frame_ceiling_without_flag_change() {
        let (factory, written) = memory_factory(PathBuf::from("ceiling.raw"), None);
        let (worker, mut sink, recording, rx) = worker(factory, 1 << 20);
        for tag in 0..10 {
            assert!(sink.push(tagged(tag)));
        }

        let handle = worker.with_ceiling(Some(4)).spawn().unwrap();
        let events = until_finished(&rx);
        handle.join().unwrap();

        assert_eq!(saved(&events), vec![1, 2, 3, 4]);
        assert_eq!(written.lock().unwrap().tags, vec![0, 1, 2, 3]);
        assert!(written.lock().unwrap().finished);
        assert!(!recording.load(Ordering::Acquire));
        assert_eq!(
            events.first(),
            Some(&RecordingEvent::Started(PathBuf::from("ceiling.raw")))
        );
    }

    #[test]
    fn drains_accepted_frames_after_stop_request() {
        let (factory, written) = memory_factory(PathBuf::from("drain.raw"), None);
        let (worker, mut sink, recording, rx) = worker(factory, 1 << 20);
        let handle = worker.spawn().unwrap();

        for tag in 0..3 {
            assert!(sink.push(tagged(tag)));
        }
        // Wait until the worker is demonstrably writing.
        loop {
            if rx.recv_timeout(TIMEOUT).unwrap() == RecordingEvent::FrameSaved(1) {
                break;
            }
        }
        for tag in 3..20 {
            assert!(sink.push(tagged(tag)));
        }
        recording.store(false, Ordering::Release);

        let events = until_finished(&rx);
        handle.join().unwrap();

        let tags = written.lock().unwrap().tags.clone();
        assert_eq!(tags, (0..20).collect::<Vec<u8>>());
        assert_eq!(saved(&events).last(), Some(&20));
        assert_eq!(
            events.iter().filter(|e| **e == RecordingEvent::Finished).count(),
            1
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stop_before_start_still_writes_queued_frames() {
        let (factory, written) = memory_factory(PathBuf::from("early.raw"), None);
        let (worker, mut sink, recording, rx) = worker(factory, 1 << 20);
        for tag in 0..5 {
            sink.push(tagged(tag));
        }
        recording.store(false, Ordering::Release);

        worker.run();
        let events: Vec<_> = rx.try_iter().collect();

        assert_eq!(written.lock().unwrap().tags, vec![0, 1, 2, 3, 4]);
        assert_eq!(events.last(), Some(&RecordingEvent::Finished));
    }

    fn rate_events(events: &[RecordingEvent]) -> (Vec<f64>, Vec<f64>) {
        let mut save = Vec::new();
        let mut mean = Vec::new();
        for event in events {
            match event {
                RecordingEvent::SaveRate(rate) => save.push(*rate),
                RecordingEvent::MeanRate(rate) => mean.push(*rate),
                _ => {}
            }
        }
        (save, mean)
    }

    fn paced_session(interval: Duration) -> Vec<RecordingEvent> {
        let (factory, _written) = memory_factory(PathBuf::from("rates.raw"), None);
        let (worker, mut sink, recording, rx) = worker(factory, 1 << 20);
        let handle = worker.with_mean_rate_interval(interval).spawn().unwrap();

        let mut events = Vec::new();
        sink.push(tagged(0));
        // The first tick opens the averaging window; wait until it happened.
        loop {
            let event = rx.recv_timeout(TIMEOUT).unwrap();
            let first = event == RecordingEvent::FrameSaved(1);
            events.push(event);
            if first {
                break;
            }
        }
        let window_opened = Instant::now();
        for tag in 1..8 {
            thread::sleep(Duration::from_millis(3));
            sink.push(tagged(tag));
        }
        assert!(window_opened.elapsed() >= Duration::from_millis(20));
        recording.store(false, Ordering::Release);

        events.extend(until_finished(&rx));
        handle.join().unwrap();
        events
    }

    #[test]
    fn reports_save_and_mean_rates() {
        let events = paced_session(Duration::from_millis(5));
        let (save, mean) = rate_events(&events);

        assert!(!save.is_empty(), "no save rate in {events:?}");
        assert!(!mean.is_empty(), "no mean rate in {events:?}");
        assert!(save.iter().chain(&mean).all(|rate| rate.is_finite() && *rate > 0.0));

        // Both rates are computed from written frames, never before the first.
        let first_saved = events
            .iter()
            .position(|e| *e == RecordingEvent::FrameSaved(1))
            .unwrap();
        let first_mean = events
            .iter()
            .position(|e| matches!(e, RecordingEvent::MeanRate(_)))
            .unwrap();
        assert!(first_mean > first_saved);
    }

    #[test]
    fn mean_rate_waits_for_its_interval() {
        let events = paced_session(Duration::from_secs(60));
        let (save, mean) = rate_events(&events);

        assert!(!save.is_empty());
        assert!(mean.is_empty(), "mean rate reported before its interval: {mean:?}");
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let (factory, written) = memory_factory(PathBuf::from("drops.raw"), None);
        // Room for exactly three 8-byte frames.
        let (worker, mut sink, recording, rx) = worker(factory, 24);

        let accepted: Vec<bool> = (0..6).map(|tag| sink.push(tagged(tag))).collect();
        assert_eq!(accepted, vec![true, true, true, false, false, false]);
        assert_eq!(sink.dropped(), 3);
        assert_eq!(sink.capacity(), Some(3));

        recording.store(false, Ordering::Release);
        let handle = worker.spawn().unwrap();
        let events = until_finished(&rx);
        handle.join().unwrap();

        let dropped: Vec<u64> = events
            .iter()
            .filter_map(|event| match event {
                RecordingEvent::FrameDropped(count) => Some(*count),
                _ => None,
            })
            .collect();
        assert_eq!(dropped, vec![1, 2, 3]);
        assert_eq!(written.lock().unwrap().tags, vec![0, 1, 2]);
    }

    #[test]
    fn factory_failure_still_finishes() {
        let failing: WriterFactory = Arc::new(|_: &WriterContext| -> Result<Box<dyn FileWriter>> {
            Err(RecorderError::msg("no space"))
        });
        let (worker, mut sink, recording, rx) = worker(failing, 1 << 20);
        let handle = worker.spawn().unwrap();

        let events = until_finished(&rx);
        handle.join().unwrap();

        assert_eq!(
            events,
            vec![
                RecordingEvent::WriterFailed("no space".to_string()),
                RecordingEvent::Finished
            ]
        );
        assert!(!recording.load(Ordering::Acquire));
        assert!(!sink.push(tagged(0)));
        assert_eq!(sink.dropped(), 0);
    }

    #[test]
    fn write_failure_ends_session() {
        let (factory, written) = memory_factory(PathBuf::from("fail.raw"), Some(2));
        let (worker, mut sink, recording, rx) = worker(factory, 1 << 20);
        for tag in 0..6 {
            sink.push(tagged(tag));
        }

        let handle = worker.spawn().unwrap();
        let events = until_finished(&rx);
        assert_eq!(handle.state(), WorkerState::Stopped);
        handle.join().unwrap();

        assert_eq!(saved(&events), vec![1, 2]);
        assert!(events.contains(&RecordingEvent::WriterFailed("disk full".to_string())));
        assert!(written.lock().unwrap().finished);
        assert!(!recording.load(Ordering::Acquire));
    }

    struct Scope;

    impl Imager for Scope {
        fn name(&self) -> String {
            "scope".to_string()
        }

        fn controls(&self) -> Vec<crate::ControlSetting> {
            Vec::new()
        }
    }

    #[test]
    fn finalises_metadata_before_finished() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("jupiter.raw");
        let (factory, _written) = memory_factory(media.clone(), None);
        let (worker, mut sink, _recording, rx) = worker(factory, 1 << 20);
        let metadata = SessionMetadata::new(&RecordingSettings::default(), &Scope);
        for tag in 0..3 {
            sink.push(tagged(tag));
        }

        let handle = worker
            .with_ceiling(Some(3))
            .with_metadata(Some(metadata))
            .spawn()
            .unwrap();
        until_finished(&rx);
        handle.join().unwrap();

        let sidecar = std::fs::read_to_string(dir.path().join("jupiter.raw.txt")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&sidecar).unwrap();
        assert_eq!(parsed["total-frames"], 3);
        assert_eq!(parsed["width"], 4);
        assert_eq!(parsed["height"], 2);
        assert_eq!(parsed["camera"], "scope");
    }
}
