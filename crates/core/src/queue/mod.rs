use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};

use crate::Frame;

/// Bounded single-producer/single-consumer hand-off queue of frames.
///
/// The capacity is fixed when the queue is built; pushing never blocks, a full
/// queue hands the frame back to the caller instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameQueue {
    capacity: usize,
}

impl FrameQueue {
    /// A queue holding at most `capacity` frames (never less than one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }

    /// Sizes the queue so that `memory_budget` bytes hold as many frames of
    /// `frame_size` bytes as fit, with room for at least one.
    pub fn for_budget(memory_budget: u64, frame_size: usize) -> Self {
        let frame_size = frame_size.max(1) as u64;
        let capacity = usize::try_from(memory_budget / frame_size).unwrap_or(usize::MAX);
        Self::new(capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Builds the queue and returns its two halves.
    pub fn split(self) -> (FrameSender, FrameReceiver) {
        let (tx, rx) = crossbeam_channel::bounded(self.capacity);
        (FrameSender { tx }, FrameReceiver { rx })
    }
}

/// Why a frame could not be enqueued. The frame is handed back.
#[derive(Debug, PartialEq, Eq)]
pub enum PushError {
    /// The queue is at capacity.
    Full(Frame),
    /// The consumer is gone.
    Closed(Frame),
}

impl PushError {
    pub fn into_frame(self) -> Frame {
        match self {
            PushError::Full(frame) | PushError::Closed(frame) => frame,
        }
    }
}

/// Producer half of a [`FrameQueue`].
#[derive(Debug)]
pub struct FrameSender {
    tx: Sender<Frame>,
}

impl FrameSender {
    /// Enqueues `frame` without blocking.
    pub fn try_push(&self, frame: Frame) -> Result<(), PushError> {
        self.tx.try_send(frame).map_err(|err| match err {
            TrySendError::Full(frame) => PushError::Full(frame),
            TrySendError::Disconnected(frame) => PushError::Closed(frame),
        })
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(usize::MAX)
    }

    /// Frames currently waiting in the queue.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// Consumer half of a [`FrameQueue`].
#[derive(Debug)]
pub struct FrameReceiver {
    rx: Receiver<Frame>,
}

impl FrameReceiver {
    /// Dequeues the oldest frame, or `None` when the queue is empty.
    pub fn try_pop(&self) -> Option<Frame> {
        match self.rx.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
