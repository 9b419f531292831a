//! Scalar field to greyscale image conversion

use crate::types::Frame;

/// RGBA8 image the playback scheduler draws into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSurface {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl ImageSurface {
    /// Create an opaque black surface.
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize;
        let rgba = [0u8, 0, 0, 255].repeat(len);
        Self { width, height, rgba }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA bytes, row major
    pub fn as_rgba(&self) -> &[u8] {
        &self.rgba
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let bytes = self.rgba.get(offset..offset + 4)?;
        Some([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn set_grey(&mut self, x: u32, y: u32, value: u8) {
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        if let Some(bytes) = self.rgba.get_mut(offset..offset + 4) {
            bytes.copy_from_slice(&[value, value, value, 255]);
        }
    }

    /// Encode as a binary (P5) greyscale PGM using the red channel.
    pub fn to_pgm(&self) -> Vec<u8> {
        let header = format!("P5\n{} {}\n255\n", self.width, self.height);
        let mut out = Vec::with_capacity(header.len() + self.rgba.len() / 4);
        out.extend_from_slice(header.as_bytes());
        out.extend(self.rgba.chunks_exact(4).map(|px| px[0]));
        out
    }
}

/// Map a normalized concentration to a grey level: 0 is white, 1 is black.
pub fn intensity(c: f32) -> u8 {
    let c = if c.is_nan() { 0.0 } else { c.clamp(0.0, 1.0) };
    ((1.0 - c) * 255.0).round() as u8
}

/// Draw `frame` onto `surface`.
///
/// Only cells inside both the frame header and the surface are written, and
/// only while the payload has values for them; everything else is left as is.
pub fn decode(frame: &Frame, surface: &mut ImageSurface) {
    let available = frame.pixel_count();
    if available == 0 {
        return;
    }

    // A non-zero pixel count implies positive dimensions.
    let frame_width = frame.width as usize;
    let cols = (frame.width as u32).min(surface.width);
    let rows = (frame.height as u32).min(surface.height);

    for y in 0..rows {
        let row_start = y as usize * frame_width;
        if row_start >= available {
            break;
        }
        for x in 0..cols {
            let index = row_start + x as usize;
            if index >= available {
                break;
            }
            surface.set_grey(x, y, intensity(frame.pixels[index]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{gradient_frame, uniform_frame};
    use proptest::prelude::*;

    #[test]
    fn intensity_endpoints() {
        assert_eq!(intensity(0.0), 255);
        assert_eq!(intensity(1.0), 0);
        assert_eq!(intensity(0.5), 128);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        assert_eq!(intensity(-3.0), 255);
        assert_eq!(intensity(7.5), 0);
        assert_eq!(intensity(f32::NAN), 255);
        assert_eq!(intensity(f32::INFINITY), 0);
    }

    #[test]
    fn new_surface_is_opaque_black() {
        let surface = ImageSurface::new(3, 2);
        assert_eq!(surface.as_rgba().len(), 24);
        assert_eq!(surface.pixel(2, 1), Some([0, 0, 0, 255]));
        assert_eq!(surface.pixel(3, 0), None);
    }

    #[test]
    fn decode_writes_grey_with_full_alpha() {
        let mut surface = ImageSurface::new(2, 2);
        decode(&uniform_frame(0, 2, 2, 0.0), &mut surface);
        for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            assert_eq!(surface.pixel(x, y), Some([255, 255, 255, 255]));
        }
    }

    #[test]
    fn truncated_frame_leaves_the_rest_untouched() {
        let mut surface = ImageSurface::new(10, 10);
        decode(&Frame::new(0, 10, 10, vec![0.0; 50]), &mut surface);

        let mut written = 0;
        let mut untouched = 0;
        for y in 0..10 {
            for x in 0..10 {
                match surface.pixel(x, y) {
                    Some([255, 255, 255, 255]) => written += 1,
                    Some([0, 0, 0, 255]) => untouched += 1,
                    other => panic!("unexpected pixel {:?}", other),
                }
            }
        }
        assert_eq!(written, 50);
        assert_eq!(untouched, 50);
        assert_eq!(surface.pixel(9, 4), Some([255, 255, 255, 255]));
        assert_eq!(surface.pixel(0, 5), Some([0, 0, 0, 255]));
    }

    #[test]
    fn frames_larger_than_the_surface_are_clipped() {
        let mut surface = ImageSurface::new(2, 2);
        let frame = gradient_frame(0, 4, 4);
        decode(&frame, &mut surface);
        // (1, 1) maps to index 5 of the 4-wide frame.
        assert_eq!(surface.pixel(1, 1).map(|p| p[0]), Some(intensity(frame.pixels[5])));
    }

    #[test]
    fn smaller_frames_only_cover_their_area() {
        let mut surface = ImageSurface::new(4, 4);
        decode(&uniform_frame(0, 2, 2, 1.0), &mut surface);
        assert_eq!(surface.pixel(1, 1), Some([0, 0, 0, 255]));
        assert_eq!(surface.pixel(3, 3), Some([0, 0, 0, 255]));

        decode(&uniform_frame(0, 2, 2, 0.0), &mut surface);
        assert_eq!(surface.pixel(1, 1), Some([255, 255, 255, 255]));
        assert_eq!(surface.pixel(2, 2), Some([0, 0, 0, 255]));
    }

    #[test]
    fn decoding_is_deterministic() {
        let frame = gradient_frame(3, 16, 9);
        let mut a = ImageSurface::new(16, 9);
        let mut b = ImageSurface::new(16, 9);
        decode(&frame, &mut a);
        decode(&frame, &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn pgm_has_header_and_one_byte_per_pixel() {
        let mut surface = ImageSurface::new(2, 1);
        decode(&Frame::new(0, 2, 1, vec![0.0, 1.0]), &mut surface);
        let pgm = surface.to_pgm();
        let header = b"P5\n2 1\n255\n";
        assert_eq!(&pgm[..header.len()], header);
        assert_eq!(&pgm[header.len()..], &[255, 0]);
    }

    proptest! {
        #[test]
        fn intensity_matches_formula(c in 0.0f32..=1.0) {
            prop_assert_eq!(intensity(c), ((1.0 - c) * 255.0).round() as u8);
        }

        #[test]
        fn intensity_is_non_increasing(a in -1.0f32..2.0, b in -1.0f32..2.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(intensity(lo) >= intensity(hi));
        }

        #[test]
        fn decode_never_panics(
            width in -4i32..12,
            height in -4i32..12,
            len in 0usize..200,
            surface_w in 0u32..12,
            surface_h in 0u32..12,
        ) {
            let frame = Frame::new(0, width, height, vec![0.25; len]);
            let mut surface = ImageSurface::new(surface_w, surface_h);
            decode(&frame, &mut surface);
        }
    }
}
