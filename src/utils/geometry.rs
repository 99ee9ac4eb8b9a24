use std::{fmt, marker::PhantomData};

/// Coordinate space of a display, in pixels of its active mode
#[derive(Debug)]
pub struct Physical;

/// Coordinate space of a framebuffer
#[derive(Debug)]
pub struct Buffer;

/// Numeric types usable as coordinates
pub trait Coordinate: Copy + Default + PartialEq + PartialOrd + fmt::Debug {
    /// The coordinate as a f64
    fn to_f64(self) -> f64;
}

macro_rules! coordinate {
    ($($ty:ty),*) => {
        $(
            impl Coordinate for $ty {
                #[inline]
                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

coordinate!(i32, u32, f64);

/// A position in the coordinate space `Kind`
pub struct Point<N, Kind> {
    /// horizontal coordinate
    pub x: N,
    /// vertical coordinate
    pub y: N,
    _kind: PhantomData<Kind>,
}

/// An extent in the coordinate space `Kind`
pub struct Size<N, Kind> {
    /// width
    pub w: N,
    /// height
    pub h: N,
    _kind: PhantomData<Kind>,
}

/// An axis aligned rectangle in the coordinate space `Kind`
pub struct Rectangle<N, Kind> {
    /// Top left corner
    pub loc: Point<N, Kind>,
    /// Extent, growing to the right and down
    pub size: Size<N, Kind>,
}

impl<N: Coordinate, Kind> From<(N, N)> for Point<N, Kind> {
    #[inline]
    fn from((x, y): (N, N)) -> Self {
        Point {
            x,
            y,
            _kind: PhantomData,
        }
    }
}

impl<N: Coordinate, Kind> From<(N, N)> for Size<N, Kind> {
    #[inline]
    fn from((w, h): (N, N)) -> Self {
        Size {
            w,
            h,
            _kind: PhantomData,
        }
    }
}

impl<N: Coordinate, Kind> Rectangle<N, Kind> {
    /// Create a rectangle from its top left corner and its size
    #[inline]
    pub fn from_loc_and_size(loc: impl Into<Point<N, Kind>>, size: impl Into<Size<N, Kind>>) -> Self {
        Rectangle {
            loc: loc.into(),
            size: size.into(),
        }
    }

    /// Returns true if the rectangle covers no area
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size.w <= N::default() || self.size.h <= N::default()
    }
}

// Manual impls, deriving would put bounds on `Kind`.

impl<N: Copy, Kind> Clone for Point<N, Kind> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<N: Copy, Kind> Copy for Point<N, Kind> {}

impl<N: Copy, Kind> Clone for Size<N, Kind> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<N: Copy, Kind> Copy for Size<N, Kind> {}

impl<N: Copy, Kind> Clone for Rectangle<N, Kind> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<N: Copy, Kind> Copy for Rectangle<N, Kind> {}

impl<N: PartialEq, Kind> PartialEq for Point<N, Kind> {
    fn eq(&self, other: &Self) -> bool {
        self.x == other.x && self.y == other.y
    }
}

impl<N: PartialEq, Kind> PartialEq for Size<N, Kind> {
    fn eq(&self, other: &Self) -> bool {
        self.w == other.w && self.h == other.h
    }
}

impl<N: PartialEq, Kind> PartialEq for Rectangle<N, Kind> {
    fn eq(&self, other: &Self) -> bool {
        self.loc == other.loc && self.size == other.size
    }
}

impl<N: Coordinate, Kind> Default for Rectangle<N, Kind> {
    fn default() -> Self {
        Rectangle::from_loc_and_size((N::default(), N::default()), (N::default(), N::default()))
    }
}

impl<N: fmt::Debug, Kind> fmt::Debug for Point<N, Kind> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:?}, {:?})", self.x, self.y)
    }
}

impl<N: fmt::Debug, Kind> fmt::Debug for Size<N, Kind> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}x{:?}", self.w, self.h)
    }
}

impl<N: fmt::Debug, Kind> fmt::Debug for Rectangle<N, Kind> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{:?}", self.size, self.loc)
    }
}

#[cfg(test)]
mod test {
    use super::{Buffer, Physical, Rectangle};

    #[test]
    fn default_rectangle_is_empty() {
        assert!(Rectangle::<i32, Physical>::default().is_empty());
        assert!(Rectangle::<f64, Buffer>::default().is_empty());
    }

    #[test]
    fn rectangle_keeps_corner_and_size() {
        let rect = Rectangle::<i32, Physical>::from_loc_and_size((-10, 20), (200, 100));
        assert_eq!((rect.loc.x, rect.loc.y), (-10, 20));
        assert_eq!((rect.size.w, rect.size.h), (200, 100));
        assert!(!rect.is_empty());
        assert_eq!(format!("{:?}", rect), "200x100@(-10, 20)");
    }
}
