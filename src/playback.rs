//! Frame-by-frame playback over a shared buffer

use std::sync::Arc;

use tracing::{debug, trace};

use crate::buffer::FrameBuffer;
use crate::pixel::{self, ImageSurface};
use crate::types::Frame;

/// Advances a cursor through a [`FrameBuffer`] and draws each frame once.
///
/// The host calls [`PlaybackScheduler::tick`] at its display cadence. When
/// playback catches up with delivery, ticks are no-ops and the last image
/// stays on the surface.
#[derive(Debug)]
pub struct PlaybackScheduler {
    buffer: FrameBuffer,
    cursor: usize,
    running: bool,
    surface: ImageSurface,
}

impl PlaybackScheduler {
    /// Create a running scheduler with an opaque black surface.
    pub fn new(buffer: FrameBuffer, width: u32, height: u32) -> Self {
        Self { buffer, cursor: 0, running: true, surface: ImageSurface::new(width, height) }
    }

    /// Draw the next buffered frame, returning its id.
    pub fn tick(&mut self) -> Option<i32> {
        if !self.running {
            return None;
        }
        let frame: Arc<Frame> = self.buffer.get(self.cursor)?;
        pixel::decode(&frame, &mut self.surface);
        self.cursor += 1;
        trace!(frame_id = frame.frame_id, cursor = self.cursor, "Frame displayed");
        Some(frame.frame_id)
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Rewind to the first frame; buffered frames are kept.
    pub fn clear(&mut self) {
        self.cursor = 0;
    }

    /// Move the cursor, clamped to the buffered range.
    pub fn seek(&mut self, index: usize) -> usize {
        self.cursor = index.min(self.buffer.len());
        self.cursor
    }

    /// Replace the surface and drop every buffered frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.stop();
        self.clear();
        self.buffer.reset();
        self.surface = ImageSurface::new(width, height);
        debug!(width, height, "Playback surface resized");
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn surface(&self) -> &ImageSurface {
        &self.surface
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }
}
