//! Various utilities functions and types

mod clock;
mod geometry;

pub use self::clock::*;
pub use self::geometry::{Buffer, Coordinate, Physical, Point, Rectangle, Size};
