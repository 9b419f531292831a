//! Core types exchanged with the simulation service.
//!
//! - [`Request`] describes one submission: frame count, field size and the
//!   ordered list of [`Source`]s.
//! - [`Frame`] is one time step of the reply stream, a row-major scalar field
//!   whose payload may be shorter than its header claims.
//!
//! Both are immutable once built and are freely shared across tasks.
//!
//! ```rust
//! use fluidstream::types::{Frame, Request, Source, Vec2};
//!
//! let request = Request::new(5, 100, 80)
//!     .with_source(Source::new(Vec2::new(1.0, 2.0), Vec2::new(3.0, 4.0)));
//! assert!(request.validate().is_ok());
//!
//! let frame = Frame::new(0, 10, 10, vec![0.5; 50]);
//! assert_eq!(frame.pixel_count(), 50);
//! ```

mod frame;
mod request;

pub use frame::Frame;
pub use request::{Request, Source, Vec2};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn pixel_count_never_exceeds_either_bound(
            width in -4i32..64,
            height in -4i32..64,
            len in 0usize..5000,
        ) {
            let frame = Frame::new(0, width, height, vec![0.0; len]);
            prop_assert!(frame.pixel_count() <= len);
            prop_assert!(frame.pixel_count() <= frame.declared_len());
        }

        #[test]
        fn value_at_only_reads_counted_cells(
            width in 1i32..16,
            height in 1i32..16,
            len in 0usize..300,
            x in 0i32..16,
            y in 0i32..16,
        ) {
            let frame = Frame::new(0, width, height, vec![1.0; len]);
            let index = x as usize + y as usize * width as usize;
            let inside = x < width && y < height && index < frame.pixel_count();
            prop_assert_eq!(frame.value_at(x, y).is_some(), inside);
        }
    }
}
