//! Request model submitted to the simulation service

use serde::{Deserialize, Serialize};

use crate::{FluidError, Result};

/// Two-component vector in surface coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// A density/force source placed by the user.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Source {
    /// Where the source sits
    pub position: Vec2,
    /// Direction and strength of the injected velocity
    pub direction: Vec2,
}

impl Source {
    pub const fn new(position: Vec2, direction: Vec2) -> Self {
        Self { position, direction }
    }

    /// Build a source from a drag gesture: anchored at `start`, pointing at `end`.
    pub fn from_drag(start: Vec2, end: Vec2) -> Self {
        Self { position: start, direction: Vec2::new(end.x - start.x, end.y - start.y) }
    }
}

/// Simulation parameters for one submission.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Request {
    /// Number of frames to simulate
    pub num_frames: i32,
    /// Field width in cells
    pub width: i32,
    /// Field height in cells
    pub height: i32,
    /// Sources in placement order
    pub sources: Vec<Source>,
}

impl Request {
    /// Create a request without sources
    pub fn new(num_frames: i32, width: i32, height: i32) -> Self {
        Self { num_frames, width, height, sources: Vec::new() }
    }

    /// Append a source
    pub fn with_source(mut self, source: Source) -> Self {
        self.sources.push(source);
        self
    }

    /// Append several sources, keeping their order
    pub fn with_sources(mut self, sources: impl IntoIterator<Item = Source>) -> Self {
        self.sources.extend(sources);
        self
    }

    /// Reject requests the service cannot satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.num_frames <= 0 {
            return Err(FluidError::invalid_request(format!(
                "num_frames must be positive, got {}",
                self.num_frames
            )));
        }
        if self.width <= 0 || self.height <= 0 {
            return Err(FluidError::invalid_request(format!(
                "dimensions must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}
