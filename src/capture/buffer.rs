//! Latest-frame-wins buffer
//!
//! A single slot holding the most recently encoded frame. The capture loop
//! overwrites it every cycle; the broadcast loop and status queries read it.
//! Neither side waits for the other beyond a pointer swap, so readers may see
//! the same frame twice or skip frames entirely.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::frame::EncodedFrame;

struct Slot {
    frame: Option<Arc<EncodedFrame>>,
    closed: bool,
}

/// Single-slot overwrite buffer
pub struct FrameBuffer {
    slot: Mutex<Slot>,
    writes: AtomicU64,
    reads: AtomicU64,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                frame: None,
                closed: false,
            }),
            writes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
        }
    }

    /// Replace the held frame. Ignored once the buffer is closed.
    pub fn write(&self, frame: Arc<EncodedFrame>) {
        let previous = {
            let mut slot = self.slot.lock();
            if slot.closed {
                return;
            }
            slot.frame.replace(frame)
        };
        // Last reference to the old payload is released outside the lock
        drop(previous);
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Most recently written frame, or `None` if empty or closed
    pub fn read(&self) -> Option<Arc<EncodedFrame>> {
        let frame = self.slot.lock().frame.clone();
        if frame.is_some() {
            self.reads.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// Clear and refuse further writes
    pub fn close(&self) {
        let previous = {
            let mut slot = self.slot.lock();
            slot.closed = true;
            slot.frame.take()
        };
        drop(previous);
    }

    pub fn stats(&self) -> FrameBufferStats {
        FrameBufferStats {
            writes: self.writes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame buffer counters
#[derive(Debug, Clone, Copy)]
pub struct FrameBufferStats {
    pub writes: u64,
    pub reads: u64,
}

/// Thread-safe handle to a frame buffer
pub type SharedFrameBuffer = Arc<FrameBuffer>;

/// Create a new shared frame buffer
pub fn create_shared_buffer() -> SharedFrameBuffer {
    Arc::new(FrameBuffer::new())
}
