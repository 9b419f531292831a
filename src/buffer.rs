//! Shared, append-only frame store
//!
//! One writer (the controller's delivery task) appends frames as they arrive;
//! any number of readers (playback) fetch them by index. The length and the
//! frames live behind the same lock, so a reader never observes a length that
//! covers a frame it cannot fetch.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, trace};

use crate::types::Frame;

#[derive(Debug, Default)]
struct BufferState {
    frames: Vec<Arc<Frame>>,
    /// Bumped by every reset
    generation: u64,
}

/// Cloneable handle to a shared frame list.
#[derive(Debug, Clone, Default)]
pub struct FrameBuffer {
    state: Arc<RwLock<BufferState>>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame and return the new length.
    pub fn append(&self, frame: Frame) -> usize {
        let mut state = self.write();
        state.frames.push(Arc::new(frame));
        state.frames.len()
    }

    /// Append only if no reset happened since `generation` was read.
    ///
    /// Returns whether the frame was stored.
    pub fn append_if_generation(&self, generation: u64, frame: Frame) -> bool {
        let mut state = self.write();
        if state.generation != generation {
            trace!(
                frame_id = frame.frame_id,
                stale = generation,
                current = state.generation,
                "Discarding frame from an abandoned session"
            );
            return false;
        }
        state.frames.push(Arc::new(frame));
        true
    }

    pub fn get(&self, index: usize) -> Option<Arc<Frame>> {
        self.read().frames.get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().frames.is_empty()
    }

    /// Drop all frames and start a new generation.
    pub fn reset(&self) -> u64 {
        let mut state = self.write();
        let dropped = state.frames.len();
        state.frames.clear();
        state.generation += 1;
        debug!(dropped, generation = state.generation, "Frame buffer reset");
        state.generation
    }

    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    fn read(&self) -> RwLockReadGuard<'_, BufferState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BufferState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
