use std::os::unix::io::AsRawFd;

use drm::control::{plane, PlaneType};
use tracing::{error, trace};

use super::{
    atomic::AtomicRequest,
    compositor::{BlendMode, ColorSpace, Layer, SampleRange, Transform},
    crtc::Crtc,
    format::FormatSet,
    kms::{KmsDevice, PlaneInfo},
    property::{EnumMap, Property, PropertyStore},
    Error,
};
use crate::utils::Coordinate;

bitflags::bitflags! {
    /// Possible flags for a DRM plane rotation
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct DrmRotation: u8 {
        /// Rotate by 0 degrees
        const ROTATE_0      =   0b00000001;
        /// Rotate by 90 degrees
        const ROTATE_90     =   0b00000010;
        /// Rotate by 180 degrees
        const ROTATE_180    =   0b00000100;
        /// Rotate by 270 degrees
        const ROTATE_270    =   0b00001000;
        /// Reflect along the x axis
        const REFLECT_X     =   0b00010000;
        /// Reflect along the y axis
        const REFLECT_Y     =   0b00100000;
    }
}

impl From<Transform> for DrmRotation {
    fn from(transform: Transform) -> Self {
        match transform {
            Transform::Identity => DrmRotation::ROTATE_0,
            Transform::FlipH => DrmRotation::REFLECT_X | DrmRotation::ROTATE_0,
            Transform::FlipV => DrmRotation::REFLECT_Y | DrmRotation::ROTATE_0,
            Transform::Rotate90 => DrmRotation::ROTATE_90,
            Transform::Rotate180 => DrmRotation::ROTATE_180,
            Transform::Rotate270 => DrmRotation::ROTATE_270,
        }
    }
}

#[derive(Debug, Clone)]
struct PlaneProperties {
    crtc_id: Property,
    fb_id: Property,
    crtc_x: Property,
    crtc_y: Property,
    crtc_w: Property,
    crtc_h: Property,
    src_x: Property,
    src_y: Property,
    src_w: Property,
    src_h: Property,
    zpos: Option<Property>,
    rotation: Option<Property>,
    alpha: Option<Property>,
    blend: Option<Property>,
    in_fence_fd: Option<Property>,
    color_encoding: Option<Property>,
    color_range: Option<Property>,
}

/// A scanout plane of a [`DrmDevice`](super::DrmDevice)
#[derive(Debug, Clone)]
pub struct Plane {
    handle: plane::Handle,
    plane_type: PlaneType,
    possible_crtcs: u32,
    formats: FormatSet,
    props: PlaneProperties,
    transforms: EnumMap<Transform>,
    blend_modes: EnumMap<BlendMode>,
    color_encodings: EnumMap<ColorSpace>,
    color_ranges: EnumMap<SampleRange>,
}

impl Plane {
    pub(super) fn new(kms: &dyn KmsDevice, info: &PlaneInfo) -> Result<Plane, Error> {
        let props = PropertyStore::load(kms, info.handle.into())?;

        let type_prop = props.mandatory("type")?;
        let plane_type = match type_prop.value {
            x if x == PlaneType::Overlay as u64 => PlaneType::Overlay,
            x if x == PlaneType::Primary as u64 => PlaneType::Primary,
            x if x == PlaneType::Cursor as u64 => PlaneType::Cursor,
            value => {
                error!(plane = ?info.handle, "Invalid plane type {}", value);
                return Err(Error::InvalidPlaneType {
                    handle: info.handle,
                    value,
                });
            }
        };

        let formats: FormatSet = info.formats.iter().copied().collect();
        let has_non_rgb = formats.has_non_rgb();

        let props = PlaneProperties {
            crtc_id: props.mandatory("CRTC_ID")?,
            fb_id: props.mandatory("FB_ID")?,
            crtc_x: props.mandatory("CRTC_X")?,
            crtc_y: props.mandatory("CRTC_Y")?,
            crtc_w: props.mandatory("CRTC_W")?,
            crtc_h: props.mandatory("CRTC_H")?,
            src_x: props.mandatory("SRC_X")?,
            src_y: props.mandatory("SRC_Y")?,
            src_w: props.mandatory("SRC_W")?,
            src_h: props.mandatory("SRC_H")?,
            zpos: props.optional("zpos"),
            rotation: props.optional("rotation"),
            alpha: props.optional("alpha"),
            blend: props.optional("pixel blend mode"),
            in_fence_fd: props.optional("IN_FENCE_FD"),
            color_encoding: has_non_rgb.then(|| props.optional("COLOR_ENCODING")).flatten(),
            color_range: has_non_rgb.then(|| props.optional("COLOR_RANGE")).flatten(),
        };

        let mut transforms = EnumMap::default();
        if let Some(rotation) = props.rotation.as_ref() {
            transforms.add_enum(rotation, "rotate-0", Transform::Identity);
            transforms.add_enum(rotation, "rotate-90", Transform::Rotate90);
            transforms.add_enum(rotation, "rotate-180", Transform::Rotate180);
            transforms.add_enum(rotation, "rotate-270", Transform::Rotate270);
            transforms.add_enum(rotation, "reflect-x", Transform::FlipH);
            transforms.add_enum(rotation, "reflect-y", Transform::FlipV);
        }

        let mut blend_modes = EnumMap::default();
        if let Some(blend) = props.blend.as_ref() {
            blend_modes.add_enum(blend, "Pre-multiplied", BlendMode::PreMultiplied);
            blend_modes.add_enum(blend, "Coverage", BlendMode::Coverage);
            blend_modes.add_enum(blend, "None", BlendMode::None);
        }

        let mut color_encodings = EnumMap::default();
        if let Some(encoding) = props.color_encoding.as_ref() {
            color_encodings.add_enum(encoding, "ITU-R BT.709 YCbCr", ColorSpace::ItuRec709);
            color_encodings.add_enum(encoding, "ITU-R BT.601 YCbCr", ColorSpace::ItuRec601);
            color_encodings.add_enum(encoding, "ITU-R BT.2020 YCbCr", ColorSpace::ItuRec2020);
        }

        let mut color_ranges = EnumMap::default();
        if let Some(range) = props.color_range.as_ref() {
            color_ranges.add_enum(range, "YCbCr full range", SampleRange::Full);
            color_ranges.add_enum(range, "YCbCr limited range", SampleRange::Limited);
        }

        Ok(Plane {
            handle: info.handle,
            plane_type,
            possible_crtcs: info.possible_crtcs,
            formats,
            props,
            transforms,
            blend_modes,
            color_encodings,
            color_ranges,
        })
    }

    /// Handle of the plane
    pub fn handle(&self) -> plane::Handle {
        self.handle
    }

    /// Type of the plane
    pub fn plane_type(&self) -> PlaneType {
        self.plane_type
    }

    /// Formats the plane can scan out
    pub fn formats(&self) -> &FormatSet {
        &self.formats
    }

    /// `zpos` property, if supported
    pub fn zpos_property(&self) -> Option<&Property> {
        self.props.zpos.as_ref()
    }

    /// Returns true if the plane can be attached to `crtc`
    pub fn supports_crtc(&self, crtc: &Crtc) -> bool {
        crtc.supported_by(self.possible_crtcs)
    }

    /// Returns true if the plane is able to present `layer`
    pub fn is_valid_for_layer(&self, layer: &Layer) -> bool {
        if layer.transform != Transform::Identity {
            if self.props.rotation.is_none() {
                trace!(plane = ?self.handle, "No rotation property on plane");
                return false;
            }
            if !self.transforms.contains(layer.transform) {
                trace!(plane = ?self.handle, "Transform {:?} is not supported on plane", layer.transform);
                return false;
            }
        }

        if self.props.alpha.is_none() && !layer.is_opaque() {
            trace!(plane = ?self.handle, "Alpha is not supported on plane");
            return false;
        }

        if !self.blend_modes.contains(layer.blending)
            && layer.blending != BlendMode::None
            && layer.blending != BlendMode::PreMultiplied
        {
            trace!(plane = ?self.handle, "Blending {:?} is not supported on plane", layer.blending);
            return false;
        }

        if !self.formats.contains(layer.format) {
            trace!(plane = ?self.handle, "Plane does not support {:?}", layer.format);
            return false;
        }

        true
    }

    /// Add the writes presenting `layer` at `zpos` on `crtc` to `req`
    pub fn atomic_set_state(
        &self,
        req: &mut AtomicRequest,
        layer: &Layer,
        zpos: u32,
        crtc: &Crtc,
    ) -> Result<(), Error> {
        let fb = layer.fb.ok_or(Error::MissingFramebuffer(self.handle))?;
        let props = &self.props;

        if let Some(prop) = props.zpos.as_ref().filter(|prop| !prop.immutable) {
            let min_zpos = prop.range_min().unwrap_or(0);
            prop.atomic_set(req, zpos as u64 + min_zpos)?;
        }

        if let Some(fence) = layer.acquire_fence.as_ref() {
            let prop = props.in_fence_fd.as_ref().ok_or(Error::UnknownProperty {
                handle: self.handle.into(),
                name: "IN_FENCE_FD",
            })?;
            prop.atomic_set(req, fence.as_raw_fd() as u64)?;
        }

        let src = layer.source_crop;
        let dst = layer.display_frame;
        props.crtc_id.atomic_set(req, u32::from(crtc.handle()) as u64)?;
        props.fb_id.atomic_set(req, u32::from(fb) as u64)?;
        props.crtc_x.atomic_set(req, dst.loc.x as i64 as u64)?;
        props.crtc_y.atomic_set(req, dst.loc.y as i64 as u64)?;
        props.crtc_w.atomic_set(req, dst.size.w as u64)?;
        props.crtc_h.atomic_set(req, dst.size.h as u64)?;
        // these are 16.16. fixed point
        props.src_x.atomic_set(req, to_fixed(src.loc.x) as u64)?;
        props.src_y.atomic_set(req, to_fixed(src.loc.y) as u64)?;
        props.src_w.atomic_set(req, to_fixed(src.size.w) as u64)?;
        props.src_h.atomic_set(req, to_fixed(src.size.h) as u64)?;

        if let Some(prop) = props.rotation.as_ref() {
            prop.atomic_set(req, DrmRotation::from(layer.transform).bits() as u64)?;
        } else if layer.transform != Transform::Identity {
            // without the rotation property only the identity transform is guaranteed to work
            return Err(Error::UnknownProperty {
                handle: self.handle.into(),
                name: "rotation",
            });
        }

        if let Some(prop) = props.alpha.as_ref() {
            prop.atomic_set(req, layer.alpha as u64)?;
        } else if !layer.is_opaque() {
            return Err(Error::UnknownProperty {
                handle: self.handle.into(),
                name: "alpha",
            });
        }

        if let (Some(prop), Some(value)) = (props.blend.as_ref(), self.blend_modes.get(layer.blending)) {
            prop.atomic_set(req, value)?;
        }
        if let (Some(prop), Some(value)) = (
            props.color_encoding.as_ref(),
            self.color_encodings.get(layer.color_space),
        ) {
            prop.atomic_set(req, value)?;
        }
        if let (Some(prop), Some(value)) = (
            props.color_range.as_ref(),
            self.color_ranges.get(layer.sample_range),
        ) {
            prop.atomic_set(req, value)?;
        }

        Ok(())
    }

    /// Add the writes detaching this plane to `req`
    pub fn atomic_disable(&self, req: &mut AtomicRequest) -> Result<(), Error> {
        self.props.crtc_id.atomic_set(req, 0)?;
        self.props.fb_id.atomic_set(req, 0)
    }
}

#[inline]
fn to_fixed<N: Coordinate>(n: N) -> u32 {
    f64::round(n.to_f64() * (1 << 16) as f64) as u32
}

#[cfg(test)]
mod test {
    use drm::control::PlaneType;
    use drm_fourcc::DrmFourcc;

    use crate::backend::drm::{
        atomic::AtomicRequest,
        compositor::{BlendMode, Layer, Transform, OPAQUE},
        property::PropertyKind,
        testing::{blend_kind, rotation_kind, FakeKms},
        Error,
    };
    use crate::utils::{Physical, Rectangle};

    use super::to_fixed;

    fn layer(format: DrmFourcc) -> Layer {
        let mut layer = Layer::new(format);
        layer.fb = drm::control::from_u32(77);
        layer.source_crop = Rectangle::from_loc_and_size((0.0, 0.0), (1920.0, 1080.0));
        layer.display_frame = Rectangle::from_loc_and_size((0, 0), (1920, 1080));
        layer
    }

    #[test]
    fn test_fixed_point() {
        let geometry: Rectangle<f64, Physical> = Rectangle::from_loc_and_size((0.0, 0.0), (1920.0, 1080.0));
        let fixed = to_fixed(geometry.size.w) as u64;
        assert_eq!(125829120, fixed);
    }

    #[test]
    fn test_fractional_fixed_point() {
        let geometry: Rectangle<f64, Physical> = Rectangle::from_loc_and_size((0.0, 0.0), (1920.1, 1080.0));
        let fixed = to_fixed(geometry.size.w) as u64;
        assert_eq!(125835674, fixed);
    }

    #[test]
    fn plane_without_rotation_only_accepts_identity() {
        let kms = FakeKms::builder()
            .crtcs(1)
            .plane(PlaneType::Primary, 0b1, &[DrmFourcc::Xrgb8888, DrmFourcc::Argb8888])
            .build();
        let plane = kms.load_plane(0);

        for transform in [
            Transform::FlipH,
            Transform::FlipV,
            Transform::Rotate90,
            Transform::Rotate180,
            Transform::Rotate270,
        ] {
            for format in [DrmFourcc::Xrgb8888, DrmFourcc::Argb8888, DrmFourcc::Nv12] {
                for blending in [BlendMode::None, BlendMode::PreMultiplied, BlendMode::Coverage] {
                    for alpha in [0, 0x8000, OPAQUE] {
                        let mut layer = layer(format);
                        layer.transform = transform;
                        layer.blending = blending;
                        layer.alpha = alpha;
                        assert!(!plane.is_valid_for_layer(&layer));
                    }
                }
            }
        }
        assert!(plane.is_valid_for_layer(&layer(DrmFourcc::Xrgb8888)));
    }

    #[test]
    fn rotation_must_be_reported() {
        let kms = FakeKms::builder()
            .crtcs(1)
            .plane_with_props(
                PlaneType::Overlay,
                0b1,
                &[DrmFourcc::Xrgb8888],
                vec![("rotation", rotation_kind(&["rotate-0", "rotate-180", "reflect-x"]))],
            )
            .build();
        let plane = kms.load_plane(0);

        let mut l = layer(DrmFourcc::Xrgb8888);
        l.transform = Transform::Rotate180;
        assert!(plane.is_valid_for_layer(&l));
        l.transform = Transform::FlipH;
        assert!(plane.is_valid_for_layer(&l));
        l.transform = Transform::Rotate90;
        assert!(!plane.is_valid_for_layer(&l));
    }

    #[test]
    fn alpha_and_blending() {
        let kms = FakeKms::builder()
            .crtcs(1)
            .plane(PlaneType::Overlay, 0b1, &[DrmFourcc::Argb8888])
            .plane_with_props(
                PlaneType::Overlay,
                0b1,
                &[DrmFourcc::Argb8888],
                vec![
                    ("alpha", PropertyKind::Range { min: 0, max: 0xffff }),
                    ("pixel blend mode", blend_kind(&["None", "Pre-multiplied", "Coverage"])),
                ],
            )
            .build();
        let basic = kms.load_plane(0);
        let capable = kms.load_plane(1);

        let mut l = layer(DrmFourcc::Argb8888);
        l.alpha = 0x7fff;
        assert!(!basic.is_valid_for_layer(&l));
        assert!(capable.is_valid_for_layer(&l));

        let mut l = layer(DrmFourcc::Argb8888);
        l.blending = BlendMode::Coverage;
        assert!(!basic.is_valid_for_layer(&l));
        assert!(capable.is_valid_for_layer(&l));

        // pre-multiplied is assumed to be supported everywhere
        l.blending = BlendMode::PreMultiplied;
        assert!(basic.is_valid_for_layer(&l));
    }

    #[test]
    fn format_must_match_exactly() {
        let kms = FakeKms::builder()
            .crtcs(1)
            .plane(PlaneType::Primary, 0b1, &[DrmFourcc::Xrgb8888])
            .build();
        let plane = kms.load_plane(0);
        assert!(!plane.is_valid_for_layer(&layer(DrmFourcc::Argb8888)));
    }

    #[test]
    fn color_properties_only_for_yuv_planes() {
        let extra = || {
            vec![
                ("COLOR_ENCODING", PropertyKind::Enum(vec![("ITU-R BT.709 YCbCr".into(), 1)])),
                ("COLOR_RANGE", PropertyKind::Enum(vec![("YCbCr full range".into(), 1)])),
            ]
        };
        let kms = FakeKms::builder()
            .crtcs(1)
            .plane_with_props(PlaneType::Overlay, 0b1, &[DrmFourcc::Xrgb8888], extra())
            .plane_with_props(PlaneType::Overlay, 0b1, &[DrmFourcc::Nv12], extra())
            .build();
        let rgb = kms.load_plane(0);
        let yuv = kms.load_plane(1);
        assert!(rgb.color_encodings.is_empty());
        assert!(rgb.props.color_range.is_none());
        assert!(!yuv.color_encodings.is_empty());
        assert!(!yuv.color_ranges.is_empty());
    }

    #[test]
    fn invalid_plane_type_is_rejected() {
        let kms = FakeKms::builder()
            .crtcs(1)
            .plane(PlaneType::Overlay, 0b1, &[DrmFourcc::Xrgb8888])
            .build();
        kms.set_property_value(kms.plane_handle(0).into(), "type", 7);
        let info = crate::backend::drm::KmsDevice::plane(&kms, kms.plane_handle(0)).unwrap();
        assert!(matches!(
            super::Plane::new(&kms, &info),
            Err(Error::InvalidPlaneType { value: 7, .. })
        ));
    }

    #[test]
    fn set_state_writes_geometry() {
        let kms = FakeKms::builder()
            .crtcs(1)
            .plane_with_props(
                PlaneType::Overlay,
                0b1,
                &[DrmFourcc::Xrgb8888],
                vec![("zpos", PropertyKind::Range { min: 2, max: 8 })],
            )
            .build();
        let plane = kms.load_plane(0);
        let crtc = kms.load_crtc(0);
        let mut l = layer(DrmFourcc::Xrgb8888);
        l.source_crop = Rectangle::from_loc_and_size((8.0, 0.0), (100.5, 50.0));
        l.display_frame = Rectangle::from_loc_and_size((-10, 20), (200, 100));

        let mut req = AtomicRequest::new();
        plane.atomic_set_state(&mut req, &l, 1, &crtc).unwrap();

        let value = |name| kms.request_value(&req, kms.plane_handle(0).into(), name);
        assert_eq!(value("zpos"), Some(3));
        assert_eq!(value("FB_ID"), Some(77));
        assert_eq!(value("CRTC_ID"), Some(u32::from(crtc.handle()) as u64));
        assert_eq!(value("CRTC_X"), Some(-10i64 as u64));
        assert_eq!(value("SRC_X"), Some(8 << 16));
        assert_eq!(value("SRC_W"), Some((100 << 16) + (1 << 15)));
        assert_eq!(value("CRTC_H"), Some(100));
    }

    #[test]
    fn set_state_fails_without_framebuffer() {
        let kms = FakeKms::builder()
            .crtcs(1)
            .plane(PlaneType::Primary, 0b1, &[DrmFourcc::Xrgb8888])
            .build();
        let plane = kms.load_plane(0);
        let crtc = kms.load_crtc(0);
        let mut l = layer(DrmFourcc::Xrgb8888);
        l.fb = None;
        assert!(matches!(
            plane.atomic_set_state(&mut AtomicRequest::new(), &l, 0, &crtc),
            Err(Error::MissingFramebuffer(_))
        ));

        let mut l = layer(DrmFourcc::Xrgb8888);
        l.transform = Transform::Rotate90;
        assert!(matches!(
            plane.atomic_set_state(&mut AtomicRequest::new(), &l, 0, &crtc),
            Err(Error::UnknownProperty { name: "rotation", .. })
        ));
    }

    #[test]
    fn disable_detaches_plane() {
        let kms = FakeKms::builder()
            .crtcs(1)
            .plane(PlaneType::Cursor, 0b1, &[DrmFourcc::Argb8888])
            .build();
        let plane = kms.load_plane(0);
        assert_eq!(plane.plane_type(), PlaneType::Cursor);
        let mut req = AtomicRequest::new();
        plane.atomic_disable(&mut req).unwrap();
        assert_eq!(kms.request_value(&req, kms.plane_handle(0).into(), "FB_ID"), Some(0));
        assert_eq!(kms.request_value(&req, kms.plane_handle(0).into(), "CRTC_ID"), Some(0));
    }
}
