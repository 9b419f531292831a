//! Frame type for the reply stream

/// One simulation time step: a row-major normalized scalar field.
///
/// `pixels` should hold `width * height` values in `[0, 1]`, but a misbehaving
/// producer may send fewer. Consumers index through [`Frame::pixel_count`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    /// Zero-based position in the requested sequence
    pub frame_id: i32,

    /// Field width in cells
    pub width: i32,

    /// Field height in cells
    pub height: i32,

    /// Scalar values, row major
    pub pixels: Vec<f32>,
}

impl Frame {
    /// Create a new frame
    pub fn new(frame_id: i32, width: i32, height: i32, pixels: Vec<f32>) -> Self {
        Self { frame_id, width, height, pixels }
    }

    /// Number of cells the header claims, zero for non-positive dimensions.
    pub fn declared_len(&self) -> usize {
        if self.width <= 0 || self.height <= 0 {
            return 0;
        }
        (self.width as usize).saturating_mul(self.height as usize)
    }

    /// Number of cells that can be safely indexed.
    pub fn pixel_count(&self) -> usize {
        self.declared_len().min(self.pixels.len())
    }

    /// Whether the payload carries fewer values than the header declares.
    pub fn is_truncated(&self) -> bool {
        self.pixels.len() < self.declared_len()
    }

    /// Value at `(x, y)` if it lies inside both the header and the payload.
    pub fn value_at(&self, x: i32, y: i32) -> Option<f32> {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return None;
        }
        let index = x as usize + y as usize * self.width as usize;
        if index < self.pixel_count() { self.pixels.get(index).copied() } else { None }
    }
}
