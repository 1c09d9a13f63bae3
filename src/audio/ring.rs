//! Bounded frame queues for the capture hand-off.
//!
//! The raw-audio hand-off is the pipeline's one documented lossy boundary:
//! when the segmenter falls behind, the oldest buffered frame is dropped so
//! capture jitter never propagates into unbounded reasoning latency. Every
//! drop is counted.

use crate::audio::frame::AudioFrame;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Thread-safe bounded frame queue with drop-oldest overflow.
///
/// Single producer (capture source), single consumer (segmenter worker).
/// The consumer polls; pushing never blocks.
#[derive(Clone)]
pub struct FrameQueue {
    inner: Arc<Mutex<VecDeque<AudioFrame>>>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Push a frame, evicting the oldest one if the queue is full.
    ///
    /// Returns true if an old frame was dropped to make room.
    pub fn push(&self, frame: AudioFrame) -> bool {
        let mut queue = self.inner.lock();
        let mut dropped = false;
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            dropped = true;
        }
        queue.push_back(frame);
        dropped
    }

    /// Pop the oldest frame, if any.
    pub fn pop(&self) -> Option<AudioFrame> {
        self.inner.lock().pop_front()
    }

    /// Number of frames currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Total frames dropped since creation.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Remove all queued frames.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

/// Fixed-capacity pre-speech buffer.
///
/// Holds the most recent frames observed during silence so the onset of
/// speech is not clipped: when speech starts, the buffered frames are
/// drained into the new utterance ahead of the triggering frame.
pub struct PrerollBuffer {
    frames: VecDeque<AudioFrame>,
    capacity: usize,
}

impl PrerollBuffer {
    /// Create a buffer holding at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a silence frame, evicting the oldest when full.
    pub fn push(&mut self, frame: AudioFrame) {
        if self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// Drain all buffered frames in capture order.
    pub fn drain(&mut self) -> Vec<AudioFrame> {
        self.frames.drain(..).collect()
    }

    /// Number of buffered frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Discard all buffered frames.
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
