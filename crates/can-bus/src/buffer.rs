//! Thread-safe store of timestamped frames awaiting a drain.

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use crate::{CanFrame, FrameSink, TimestampedFrame};

/// Ordered frame store shared between the receiver loop and drainers.
///
/// The buffer is only touched under its lock, and both operations hold it
/// just long enough to touch the vector, so the receiver is never stalled by
/// a consumer that is merely slow to call [`drain`](FrameBuffer::drain).
#[derive(Default)]
pub struct FrameBuffer {
    frames: Mutex<Vec<TimestampedFrame>>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one frame; arrival order is preserved.
    pub fn push(&self, frame: CanFrame, stamp: Instant) {
        let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        frames.push(TimestampedFrame { frame, stamp });
    }

    /// Take every buffered frame, leaving the buffer empty.
    ///
    /// The swap happens under the lock, so each frame is observed by exactly
    /// one drain, in arrival order, across the whole drain history.
    pub fn drain(&self) -> Vec<TimestampedFrame> {
        let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *frames)
    }

    pub fn len(&self) -> usize {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FrameSink for FrameBuffer {
    fn accept(&self, frame: CanFrame, stamp: Instant) {
        self.push(frame, stamp);
    }
}
