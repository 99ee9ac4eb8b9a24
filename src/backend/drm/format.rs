//! Format info tables for scanout formats.
//!
//! [`is_rgb`] tells apart RGB formats from YUV formats, planes supporting any
//! YUV format may expose color encoding and range properties.
//!
//! ```
//! # use smithay_scanout::backend::drm::format::is_rgb;
//! # use drm_fourcc::DrmFourcc;
//! assert!(is_rgb(DrmFourcc::Argb8888));
//! assert!(!is_rgb(DrmFourcc::Nv12));
//! ```
//!
//! [`has_alpha`] returns true if the format has an alpha channel and [`get_bpp`] returns
//! the number of bits per pixel of the first plane of a format.

use drm_fourcc::DrmFourcc;
use indexmap::IndexSet;

/// Macro to generate table lookup functions for formats.
///
/// See the module documentation for usage details.
macro_rules! format_tables {
    (
        $($fourcc: ident {
            rgb: $rgb: expr,
            alpha: $alpha: expr,
            bpp: $bpp: expr $(,)?
        }),* $(,)?
    ) => {
        /// Returns true if the format stores RGB data.
        ///
        /// Unknown formats will always return `false`.
        pub const fn is_rgb(fourcc: DrmFourcc) -> bool {
            match fourcc {
                $(DrmFourcc::$fourcc => $rgb,)*
                _ => false,
            }
        }

        /// Returns true if the format has an alpha channel.
        ///
        /// Unknown formats will always return `false`.
        pub const fn has_alpha(fourcc: DrmFourcc) -> bool {
            match fourcc {
                $(DrmFourcc::$fourcc => $alpha,)*
                _ => false,
            }
        }

        /// Returns the bits per pixel of the first plane of the specified format.
        ///
        /// Unknown formats will always return [`None`].
        pub const fn get_bpp(fourcc: DrmFourcc) -> Option<usize> {
            match fourcc {
                $(DrmFourcc::$fourcc => Some($bpp),)*
                _ => None,
            }
        }

        /// All formats with table entries
        pub const KNOWN_FORMATS: &[DrmFourcc] = &[$(DrmFourcc::$fourcc,)*];
    };
}

format_tables! {
    // 16-bit bpp RGB
    Rgb565 { rgb: true, alpha: false, bpp: 16 },
    Bgr565 { rgb: true, alpha: false, bpp: 16 },

    // 24-bit bpp RGB
    Rgb888 { rgb: true, alpha: false, bpp: 24 },
    Bgr888 { rgb: true, alpha: false, bpp: 24 },

    // 32-bit bpp RGB, 8 bits per channel
    Argb8888 { rgb: true, alpha: true, bpp: 32 },
    Xrgb8888 { rgb: true, alpha: false, bpp: 32 },
    Abgr8888 { rgb: true, alpha: true, bpp: 32 },
    Xbgr8888 { rgb: true, alpha: false, bpp: 32 },
    Rgba8888 { rgb: true, alpha: true, bpp: 32 },
    Rgbx8888 { rgb: true, alpha: false, bpp: 32 },
    Bgra8888 { rgb: true, alpha: true, bpp: 32 },
    Bgrx8888 { rgb: true, alpha: false, bpp: 32 },

    // 32-bit bpp RGB with 10-bits per color channel
    Argb2101010 { rgb: true, alpha: true, bpp: 32 },
    Xrgb2101010 { rgb: true, alpha: false, bpp: 32 },
    Abgr2101010 { rgb: true, alpha: true, bpp: 32 },
    Xbgr2101010 { rgb: true, alpha: false, bpp: 32 },

    // Floating point 64bpp RGB
    Abgr16161616f { rgb: true, alpha: true, bpp: 64 },
    Xbgr16161616f { rgb: true, alpha: false, bpp: 64 },

    // packed YUV
    Yuyv { rgb: false, alpha: false, bpp: 16 },
    Uyvy { rgb: false, alpha: false, bpp: 16 },

    // 2 plane YUV
    Nv12 { rgb: false, alpha: false, bpp: 8 },
    Nv21 { rgb: false, alpha: false, bpp: 8 },
    Nv16 { rgb: false, alpha: false, bpp: 8 },
    P010 { rgb: false, alpha: false, bpp: 16 },

    // 3 plane YUV
    Yuv420 { rgb: false, alpha: false, bpp: 8 },
    Yvu420 { rgb: false, alpha: false, bpp: 8 },
}

/// Like [`is_rgb`], but for raw fourcc codes as reported by the kernel
pub fn is_rgb_code(code: u32) -> bool {
    DrmFourcc::try_from(code).map(is_rgb).unwrap_or(false)
}

/// A set of fourcc codes, in the order the kernel reported them
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FormatSet {
    formats: IndexSet<u32>,
}

impl FormatSet {
    /// Returns true if `format` is part of the set
    pub fn contains(&self, format: DrmFourcc) -> bool {
        self.formats.contains(&(format as u32))
    }

    /// Returns true if the set contains any format that is not known to be RGB
    pub fn has_non_rgb(&self) -> bool {
        self.formats.iter().any(|code| !is_rgb_code(*code))
    }

    /// Iterate over the formats that are known to `drm-fourcc`
    pub fn iter(&self) -> impl Iterator<Item = DrmFourcc> + '_ {
        self.formats.iter().filter_map(|code| DrmFourcc::try_from(*code).ok())
    }

    /// Number of formats, including unknown ones
    pub fn len(&self) -> usize {
        self.formats.len()
    }

    /// Returns true if the set is empty
    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}

impl FromIterator<u32> for FormatSet {
    fn from_iter<T: IntoIterator<Item = u32>>(iter: T) -> Self {
        FormatSet {
            formats: iter.into_iter().collect(),
        }
    }
}

impl FromIterator<DrmFourcc> for FormatSet {
    fn from_iter<T: IntoIterator<Item = DrmFourcc>>(iter: T) -> Self {
        iter.into_iter().map(|format| format as u32).collect()
    }
}
