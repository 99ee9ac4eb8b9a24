use std::os::unix::io::OwnedFd;

use drm::control::framebuffer;
use drm_fourcc::DrmFourcc;

use crate::utils::{Buffer, Physical, Rectangle};

/// Transformation applied to a layers content before scanout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Transform {
    /// Content is presented as is
    #[default]
    Identity,
    /// Mirrored along the vertical axis
    FlipH,
    /// Mirrored along the horizontal axis
    FlipV,
    /// Rotated by 90 degrees
    Rotate90,
    /// Rotated by 180 degrees
    Rotate180,
    /// Rotated by 270 degrees
    Rotate270,
}

/// How a layer is blended with the content below it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    /// The layer is opaque
    #[default]
    None,
    /// Color channels are pre-multiplied with the alpha channel
    PreMultiplied,
    /// Color channels are not pre-multiplied
    Coverage,
}

/// Color encoding of YUV content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorSpace {
    /// Leave it up to the driver
    #[default]
    Undefined,
    /// ITU-R BT.601
    ItuRec601,
    /// ITU-R BT.709
    ItuRec709,
    /// ITU-R BT.2020
    ItuRec2020,
}

/// Sample range of YUV content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SampleRange {
    /// Leave it up to the driver
    #[default]
    Undefined,
    /// Full range
    Full,
    /// Limited (studio swing) range
    Limited,
}

/// Plane alpha of a fully opaque layer
pub const OPAQUE: u16 = u16::MAX;

/// A buffer to present on a display as part of a frame
#[derive(Debug)]
pub struct Layer {
    /// Region of the buffer to present
    pub source_crop: Rectangle<f64, Buffer>,
    /// Region of the display to present it at
    pub display_frame: Rectangle<i32, Physical>,
    /// Transformation of the content
    pub transform: Transform,
    /// Blending with the content below
    pub blending: BlendMode,
    /// Plane alpha, [`OPAQUE`] for none
    pub alpha: u16,
    /// Color encoding of YUV content
    pub color_space: ColorSpace,
    /// Sample range of YUV content
    pub sample_range: SampleRange,
    /// Pixel format of the buffer
    pub format: DrmFourcc,
    /// Framebuffer the buffer was imported as
    pub fb: Option<framebuffer::Handle>,
    /// Fence to wait on before the buffer may be read
    pub acquire_fence: Option<OwnedFd>,
    /// Position among the layers of a frame, higher is on top
    pub z_order: u32,
}

impl Layer {
    /// Create an opaque, untransformed layer of the given format
    ///
    /// Crop and frame are empty until set.
    pub fn new(format: DrmFourcc) -> Layer {
        Layer {
            source_crop: Rectangle::default(),
            display_frame: Rectangle::default(),
            transform: Transform::Identity,
            blending: BlendMode::None,
            alpha: OPAQUE,
            color_space: ColorSpace::Undefined,
            sample_range: SampleRange::Undefined,
            format,
            fb: None,
            acquire_fence: None,
            z_order: 0,
        }
    }

    /// Returns true if the plane alpha does not make the layer translucent
    pub fn is_opaque(&self) -> bool {
        self.alpha == OPAQUE
    }
}
