//! In-memory kms device for tests

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    io,
    os::raw::c_char,
    path::PathBuf,
    sync::Mutex,
    time::Duration,
};

use drm::control::{
    connector, crtc, encoder, from_u32, plane, property, AtomicCommitFlags, Mode, PlaneType,
    RawResourceHandle,
};
use drm_fourcc::DrmFourcc;

use super::{
    atomic::AtomicRequest,
    connector::Connector,
    crtc::Crtc,
    kms::{ConnectorInfo, CrtcInfo, EncoderInfo, KmsDevice, PlaneInfo, ResourceHandles},
    plane::Plane,
    property::{Property, PropertyKind},
};

const CRTC_BASE: u32 = 100;
const ENCODER_BASE: u32 = 200;
const CONNECTOR_BASE: u32 = 300;
const PLANE_BASE: u32 = 400;
const PROPERTY_BASE: u32 = 1000;

pub(crate) fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A mode of `w`x`h` whose timings result in exactly `refresh` Hz
pub(crate) fn mode(w: u16, h: u16, refresh: u32, preferred: bool) -> Mode {
    let clock = w as u32 * h as u32 * refresh / 1000;
    let mut name = [0 as c_char; 32];
    for (dst, src) in name.iter_mut().zip(format!("{}x{}", w, h).bytes()) {
        *dst = src as c_char;
    }
    Mode::from(drm_ffi::drm_mode_modeinfo {
        clock,
        hdisplay: w,
        hsync_start: w,
        hsync_end: w,
        htotal: w,
        hskew: 0,
        vdisplay: h,
        vsync_start: h,
        vsync_end: h,
        vtotal: h,
        vscan: 0,
        vrefresh: refresh,
        flags: 0,
        type_: if preferred {
            drm_ffi::DRM_MODE_TYPE_PREFERRED | drm_ffi::DRM_MODE_TYPE_DRIVER
        } else {
            drm_ffi::DRM_MODE_TYPE_DRIVER
        },
        name,
    })
}

/// A free-standing property of the object `object_id`
pub(crate) fn prop(object_id: u32, name: &str, kind: PropertyKind) -> Property {
    Property {
        object: RawResourceHandle::new(object_id).unwrap(),
        handle: from_u32(PROPERTY_BASE + object_id).unwrap(),
        name: name.into(),
        value: 0,
        kind,
        immutable: false,
        atomic: true,
    }
}

/// A `rotation` bitmask offering the given entries
pub(crate) fn rotation_kind(names: &[&str]) -> PropertyKind {
    const BITS: [&str; 6] = [
        "rotate-0",
        "rotate-90",
        "rotate-180",
        "rotate-270",
        "reflect-x",
        "reflect-y",
    ];
    PropertyKind::Bitmask(
        names
            .iter()
            .map(|name| {
                let bit = BITS.iter().position(|b| b == name).unwrap();
                (name.to_string(), bit as u64)
            })
            .collect(),
    )
}

/// A `pixel blend mode` enum offering the given entries
pub(crate) fn blend_kind(names: &[&str]) -> PropertyKind {
    const VALUES: [&str; 3] = ["None", "Pre-multiplied", "Coverage"];
    PropertyKind::Enum(
        names
            .iter()
            .map(|name| {
                let value = VALUES.iter().position(|v| v == name).unwrap();
                (name.to_string(), value as u64)
            })
            .collect(),
    )
}

#[derive(Debug)]
struct EncoderDesc {
    possible_crtcs: u32,
    crtc: Option<usize>,
    possible_clones: u32,
}

#[derive(Debug)]
struct ConnectorDesc {
    interface: connector::Interface,
    interface_id: u32,
    state: connector::State,
    encoders: Vec<usize>,
    current: Option<usize>,
}

#[derive(Debug)]
struct PlaneDesc {
    ty: PlaneType,
    possible_crtcs: u32,
    formats: Vec<u32>,
    extra: Vec<(&'static str, PropertyKind)>,
}

#[derive(Debug, Default)]
pub(crate) struct FakeKmsBuilder {
    crtcs: usize,
    encoders: Vec<EncoderDesc>,
    connectors: Vec<ConnectorDesc>,
    planes: Vec<PlaneDesc>,
    driver: Option<String>,
}

impl FakeKmsBuilder {
    pub(crate) fn crtcs(mut self, count: usize) -> Self {
        self.crtcs = count;
        self
    }

    pub(crate) fn encoder(self, possible_crtcs: u32, crtc: Option<usize>) -> Self {
        self.encoder_with_clones(possible_crtcs, crtc, 0)
    }

    pub(crate) fn encoder_with_clones(mut self, possible_crtcs: u32, crtc: Option<usize>, clones: u32) -> Self {
        self.encoders.push(EncoderDesc {
            possible_crtcs,
            crtc,
            possible_clones: clones,
        });
        self
    }

    pub(crate) fn connector(
        mut self,
        interface: connector::Interface,
        interface_id: u32,
        state: connector::State,
        encoders: &[usize],
    ) -> Self {
        self.connectors.push(ConnectorDesc {
            interface,
            interface_id,
            state,
            encoders: encoders.to_vec(),
            current: None,
        });
        self
    }

    /// Attach encoder `encoder` to the last added connector
    pub(crate) fn attached(mut self, encoder: usize) -> Self {
        if let Some(conn) = self.connectors.last_mut() {
            conn.current = Some(encoder);
        }
        self
    }

    pub(crate) fn plane(self, ty: PlaneType, possible_crtcs: u32, formats: &[DrmFourcc]) -> Self {
        self.plane_with_props(ty, possible_crtcs, formats, Vec::new())
    }

    pub(crate) fn plane_with_props(
        mut self,
        ty: PlaneType,
        possible_crtcs: u32,
        formats: &[DrmFourcc],
        extra: Vec<(&'static str, PropertyKind)>,
    ) -> Self {
        self.planes.push(PlaneDesc {
            ty,
            possible_crtcs,
            formats: formats.iter().map(|f| *f as u32).collect(),
            extra,
        });
        self
    }

    pub(crate) fn driver(mut self, name: &str) -> Self {
        self.driver = Some(name.into());
        self
    }

    pub(crate) fn build(self) -> FakeKms {
        let mut state = FakeState {
            driver: self.driver,
            next_property: PROPERTY_BASE,
            next_blob: 1,
            ..FakeState::default()
        };

        for i in 0..self.crtcs {
            let handle = crtc_handle(i);
            state.resources.crtcs.push(handle);
            state.crtcs.push(CrtcInfo { handle, mode: None });
            let object = handle.into();
            state.add_property(object, "ACTIVE", PropertyKind::Range { min: 0, max: 1 }, 0);
            state.add_property(object, "MODE_ID", PropertyKind::Blob, 0);
            state.add_property(
                object,
                "OUT_FENCE_PTR",
                PropertyKind::Range { min: 0, max: u64::MAX },
                0,
            );
        }

        for (i, desc) in self.encoders.iter().enumerate() {
            let handle = encoder_handle(i);
            state.resources.encoders.push(handle);
            state.encoders.push(EncoderInfo {
                handle,
                crtc: desc.crtc.map(crtc_handle),
                possible_crtcs: desc.possible_crtcs,
                possible_clones: desc.possible_clones,
            });
        }

        for (i, desc) in self.connectors.iter().enumerate() {
            let handle = connector_handle(i);
            state.resources.connectors.push(handle);
            let modes = if desc.state == connector::State::Connected {
                vec![mode(1920, 1080, 60, true)]
            } else {
                Vec::new()
            };
            state.connectors.push(ConnectorInfo {
                handle,
                interface: desc.interface,
                interface_id: desc.interface_id,
                state: desc.state,
                size_mm: (520, 290),
                current_encoder: desc.current.map(encoder_handle),
                encoders: desc.encoders.iter().copied().map(encoder_handle).collect(),
                modes,
            });

            let object = handle.into();
            state.add_property(
                object,
                "DPMS",
                PropertyKind::Enum(vec![
                    ("On".into(), 0),
                    ("Standby".into(), 1),
                    ("Suspend".into(), 2),
                    ("Off".into(), 3),
                ]),
                0,
            );
            state.add_property(object, "CRTC_ID", PropertyKind::Object, 0);
            state.add_property(object, "EDID", PropertyKind::Blob, 0);
            if desc.interface == connector::Interface::Writeback {
                state.add_property(object, "WRITEBACK_PIXEL_FORMATS", PropertyKind::Blob, 0);
                state.add_property(object, "WRITEBACK_FB_ID", PropertyKind::Object, 0);
                state.add_property(
                    object,
                    "WRITEBACK_OUT_FENCE_PTR",
                    PropertyKind::Range { min: 0, max: u64::MAX },
                    0,
                );
            }
        }

        for (i, desc) in self.planes.into_iter().enumerate() {
            let handle = plane_handle(i);
            state.resources.planes.push(handle);
            state.planes.push(PlaneInfo {
                handle,
                possible_crtcs: desc.possible_crtcs,
                formats: desc.formats,
            });

            let object = handle.into();
            state.add_property(
                object,
                "type",
                PropertyKind::Enum(vec![
                    ("Overlay".into(), PlaneType::Overlay as u64),
                    ("Primary".into(), PlaneType::Primary as u64),
                    ("Cursor".into(), PlaneType::Cursor as u64),
                ]),
                desc.ty as u64,
            );
            for name in ["FB_ID", "CRTC_ID"] {
                state.add_property(object, name, PropertyKind::Object, 0);
            }
            for name in ["CRTC_X", "CRTC_Y"] {
                state.add_property(
                    object,
                    name,
                    PropertyKind::SignedRange {
                        min: i32::MIN as i64,
                        max: i32::MAX as i64,
                    },
                    0,
                );
            }
            for name in ["CRTC_W", "CRTC_H"] {
                state.add_property(
                    object,
                    name,
                    PropertyKind::Range {
                        min: 0,
                        max: i32::MAX as u64,
                    },
                    0,
                );
            }
            for name in ["SRC_X", "SRC_Y", "SRC_W", "SRC_H"] {
                state.add_property(
                    object,
                    name,
                    PropertyKind::Range {
                        min: 0,
                        max: u32::MAX as u64,
                    },
                    0,
                );
            }
            state.add_property(
                object,
                "IN_FENCE_FD",
                PropertyKind::SignedRange {
                    min: -1,
                    max: i32::MAX as i64,
                },
                u64::MAX,
            );
            for (name, kind) in desc.extra {
                state.add_property(object, name, kind, 0);
            }
        }

        state.resources.min_size = (0, 0);
        state.resources.max_size = (8192, 8192);

        FakeKms {
            state: Mutex::new(state),
        }
    }
}

pub(crate) fn crtc_handle(index: usize) -> crtc::Handle {
    from_u32(CRTC_BASE + index as u32).unwrap()
}

pub(crate) fn encoder_handle(index: usize) -> encoder::Handle {
    from_u32(ENCODER_BASE + index as u32).unwrap()
}

pub(crate) fn connector_handle(index: usize) -> connector::Handle {
    from_u32(CONNECTOR_BASE + index as u32).unwrap()
}

pub(crate) fn plane_handle(index: usize) -> plane::Handle {
    from_u32(PLANE_BASE + index as u32).unwrap()
}

#[derive(Debug, Default)]
struct FakeState {
    resources: ResourceHandles,
    crtcs: Vec<CrtcInfo>,
    encoders: Vec<EncoderInfo>,
    connectors: Vec<ConnectorInfo>,
    planes: Vec<PlaneInfo>,
    properties: HashMap<RawResourceHandle, Vec<Property>>,
    next_property: u32,
    blobs: BTreeMap<u32, Option<Mode>>,
    next_blob: u32,
    commits: Vec<(AtomicRequest, AtomicCommitFlags)>,
    vblanks: VecDeque<io::Result<Duration>>,
    driver: Option<String>,
    fail_resources: bool,
}

impl FakeState {
    fn add_property(&mut self, object: RawResourceHandle, name: &str, kind: PropertyKind, value: u64) {
        let handle = from_u32::<property::Handle>(self.next_property).unwrap();
        self.next_property += 1;
        self.properties.entry(object).or_default().push(Property {
            object,
            handle,
            name: name.into(),
            value,
            immutable: matches!(name, "type" | "EDID" | "WRITEBACK_PIXEL_FORMATS"),
            atomic: !matches!(name, "DPMS"),
            kind,
        });
    }

    fn property_mut(&mut self, object: RawResourceHandle, name: &str) -> &mut Property {
        self.properties
            .get_mut(&object)
            .and_then(|props| props.iter_mut().find(|prop| prop.name == name))
            .unwrap()
    }
}

/// A kms device living in memory
///
/// Crtcs, encoders, connectors and planes get the ids 100, 200, 300 and 400 plus their index.
#[derive(Debug)]
pub(crate) struct FakeKms {
    state: Mutex<FakeState>,
}

impl FakeKms {
    pub(crate) fn builder() -> FakeKmsBuilder {
        FakeKmsBuilder::default()
    }

    pub(crate) fn resources_unchecked(&self) -> ResourceHandles {
        self.state.lock().unwrap().resources.clone()
    }

    pub(crate) fn crtc_handle(&self, index: usize) -> crtc::Handle {
        crtc_handle(index)
    }

    pub(crate) fn connector_handle(&self, index: usize) -> connector::Handle {
        connector_handle(index)
    }

    pub(crate) fn plane_handle(&self, index: usize) -> plane::Handle {
        plane_handle(index)
    }

    pub(crate) fn load_crtc(&self, index: usize) -> Crtc {
        Crtc::new(self, crtc_handle(index), index as u32).unwrap()
    }

    pub(crate) fn load_connector(&self, index: usize) -> Connector {
        let info = self.connector(connector_handle(index)).unwrap();
        Connector::new(self, &info, info.current_encoder, info.encoders.clone()).unwrap()
    }

    pub(crate) fn load_plane(&self, index: usize) -> Plane {
        let info = self.plane(plane_handle(index)).unwrap();
        Plane::new(self, &info).unwrap()
    }

    pub(crate) fn set_modes(&self, connector: usize, modes: Vec<Mode>) {
        self.state.lock().unwrap().connectors[connector].modes = modes;
    }

    pub(crate) fn set_state(&self, connector: usize, state: connector::State) {
        self.state.lock().unwrap().connectors[connector].state = state;
    }

    pub(crate) fn remove_property(&self, object: RawResourceHandle, name: &str) {
        if let Some(props) = self.state.lock().unwrap().properties.get_mut(&object) {
            props.retain(|prop| prop.name != name);
        }
    }

    pub(crate) fn set_property_value(&self, object: RawResourceHandle, name: &str, value: u64) {
        self.state.lock().unwrap().property_mut(object, name).value = value;
    }

    pub(crate) fn fail_resources(&self) {
        self.state.lock().unwrap().fail_resources = true;
    }

    /// Value `req` writes to the property `name` of `object`
    pub(crate) fn request_value(&self, req: &AtomicRequest, object: RawResourceHandle, name: &str) -> Option<u64> {
        let handle = self.state.lock().unwrap().property_mut(object, name).handle;
        req.value(object, handle)
    }

    pub(crate) fn commits(&self) -> Vec<(AtomicRequest, AtomicCommitFlags)> {
        self.state.lock().unwrap().commits.clone()
    }

    pub(crate) fn live_blobs(&self) -> Vec<u32> {
        self.state.lock().unwrap().blobs.keys().copied().collect()
    }

    pub(crate) fn blob_mode(&self, blob: u32) -> Option<Mode> {
        self.state.lock().unwrap().blobs.get(&blob).copied().flatten()
    }

    /// Queue the result of the next `wait_vblank`, waits fail as unsupported once the queue is empty
    pub(crate) fn push_vblank(&self, result: io::Result<Duration>) {
        self.state.lock().unwrap().vblanks.push_back(result);
    }
}

impl KmsDevice for FakeKms {
    fn dev_path(&self) -> Option<PathBuf> {
        None
    }

    fn resources(&self) -> io::Result<ResourceHandles> {
        let state = self.state.lock().unwrap();
        if state.fail_resources {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        Ok(state.resources.clone())
    }

    fn crtc(&self, handle: crtc::Handle) -> io::Result<CrtcInfo> {
        let state = self.state.lock().unwrap();
        state
            .crtcs
            .iter()
            .find(|info| info.handle == handle)
            .cloned()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
    }

    fn encoder(&self, handle: encoder::Handle) -> io::Result<EncoderInfo> {
        let state = self.state.lock().unwrap();
        state
            .encoders
            .iter()
            .find(|info| info.handle == handle)
            .cloned()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
    }

    fn connector(&self, handle: connector::Handle) -> io::Result<ConnectorInfo> {
        let state = self.state.lock().unwrap();
        state
            .connectors
            .iter()
            .find(|info| info.handle == handle)
            .cloned()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
    }

    fn plane(&self, handle: plane::Handle) -> io::Result<PlaneInfo> {
        let state = self.state.lock().unwrap();
        state
            .planes
            .iter()
            .find(|info| info.handle == handle)
            .cloned()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
    }

    fn properties(&self, object: RawResourceHandle) -> io::Result<Vec<Property>> {
        let state = self.state.lock().unwrap();
        Ok(state.properties.get(&object).cloned().unwrap_or_default())
    }

    fn atomic_commit(&self, request: &AtomicRequest, flags: AtomicCommitFlags) -> io::Result<()> {
        self.state.lock().unwrap().commits.push((request.clone(), flags));
        Ok(())
    }

    fn create_property_blob(&self, _data: &[u8]) -> io::Result<u32> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_blob;
        state.next_blob += 1;
        state.blobs.insert(id, None);
        Ok(id)
    }

    fn create_mode_blob(&self, mode: &Mode) -> io::Result<u32> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_blob;
        state.next_blob += 1;
        state.blobs.insert(id, Some(*mode));
        Ok(id)
    }

    fn destroy_property_blob(&self, blob: u32) -> io::Result<()> {
        match self.state.lock().unwrap().blobs.remove(&blob) {
            Some(_) => Ok(()),
            None => Err(io::Error::from_raw_os_error(libc::ENOENT)),
        }
    }

    fn wait_vblank(&self, _pipe: u32) -> io::Result<Duration> {
        self.state
            .lock()
            .unwrap()
            .vblanks
            .pop_front()
            .unwrap_or_else(|| Err(io::Error::from_raw_os_error(libc::EOPNOTSUPP)))
    }

    fn driver_name(&self) -> io::Result<String> {
        self.state
            .lock()
            .unwrap()
            .driver
            .clone()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOTTY))
    }

    fn has_addfb2_modifiers(&self) -> bool {
        true
    }
}
