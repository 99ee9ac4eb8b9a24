use std::{
    fs::OpenOptions,
    io,
    ops::{Bound, RangeBounds},
    os::unix::{
        fs::OpenOptionsExt,
        io::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd},
    },
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use drm::{
    control::{
        self, connector, crtc, encoder, plane, property, AtomicCommitFlags,
        Device as ControlDevice, Mode, RawResourceHandle, ResourceHandle,
    },
    ClientCapability, Device as BasicDevice, DriverCapability, VblankWaitFlags, VblankWaitTarget,
};
use tracing::{debug, error, info, info_span, warn};

use crate::backend::drm::{
    atomic::AtomicRequest,
    error::{AccessError, Error},
    kms::{ConnectorInfo, CrtcInfo, EncoderInfo, KmsDevice, PlaneInfo, ResourceHandles},
    property::{Property, PropertyKind},
};

#[derive(Debug)]
struct InternalDrmDeviceFd {
    fd: OwnedFd,
    path: PathBuf,
    privileged: bool,
    resources: Option<control::ResourceHandles>,
    planes: Vec<plane::Handle>,
    addfb2_modifiers: bool,
}

impl Drop for InternalDrmDeviceFd {
    fn drop(&mut self) {
        info!("Dropping device: {:?}", self.path);
        if self.privileged {
            if let Err(err) = self.release_master_lock() {
                error!("Failed to drop drm master state. Error: {}", err);
            }
        }
    }
}

impl AsFd for InternalDrmDeviceFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
impl BasicDevice for InternalDrmDeviceFd {}
impl ControlDevice for InternalDrmDeviceFd {}

/// Ref-counted file descriptor of an open drm node
///
/// Implements [`KmsDevice`] through the atomic kernel interface.
#[derive(Debug, Clone)]
pub struct DrmDeviceFd(Arc<InternalDrmDeviceFd>);

impl AsFd for DrmDeviceFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.fd.as_fd()
    }
}

impl AsRawFd for DrmDeviceFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.fd.as_raw_fd()
    }
}

impl BasicDevice for DrmDeviceFd {}
impl ControlDevice for DrmDeviceFd {}

fn access<'a>(errmsg: &'static str, dev: &'a Path) -> impl FnOnce(io::Error) -> Error + 'a {
    move |source| {
        Error::Access(AccessError {
            errmsg,
            dev: Some(dev.to_path_buf()),
            source,
        })
    }
}

impl DrmDeviceFd {
    /// Open the drm node at `path` for atomic modesetting
    ///
    /// This tries to acquire the master lock of the device and releases it on drop again.
    /// Universal planes and atomic modesetting are required, writeback connectors are
    /// enabled if the driver offers them.
    ///
    /// drm-rs has no variant for the writeback client capability, it is set through drm-ffi.
    pub fn open(path: impl AsRef<Path>) -> Result<DrmDeviceFd, Error> {
        let path = path.as_ref();
        let span = info_span!("drm_device_fd", path = %path.display());
        let _guard = span.enter();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(path)
            .map_err(access("Failed to open device", path))?;
        let fd = OwnedFd::from(file);

        let mut dev = InternalDrmDeviceFd {
            fd,
            path: path.to_path_buf(),
            privileged: false,
            resources: None,
            planes: Vec::new(),
            addfb2_modifiers: false,
        };

        // We want to modeset, so we better be the master, if we run via a tty session.
        // This is only needed on older kernels. Newer kernels grant this permission,
        // if no other process is already the *master*. So we skip over this error.
        if dev.acquire_master_lock().is_err() {
            warn!("Unable to become drm master, assuming unprivileged mode");
        } else {
            dev.privileged = true;
        }

        for (cap, name) in [
            (ClientCapability::UniversalPlanes, "universal planes"),
            (ClientCapability::Atomic, "atomic"),
        ] {
            if let Err(err) = dev.set_client_capability(cap, true) {
                error!("Failed to set {} capability: {}", name, err);
                return Err(Error::MissingCapability {
                    dev: Some(path.to_path_buf()),
                    capability: name,
                });
            }
        }
        if let Err(err) =
            drm_ffi::set_capability(dev.as_fd(), drm_ffi::DRM_CLIENT_CAP_WRITEBACK_CONNECTORS as u64, true)
        {
            info!("Failed to set writeback capability: {}", err);
        }

        dev.addfb2_modifiers = match dev.get_driver_capability(DriverCapability::AddFB2Modifiers) {
            Ok(value) => value != 0,
            Err(err) => {
                warn!("Failed to query modifier support, assuming none: {}", err);
                false
            }
        };

        dev.resources = Some(
            dev.resource_handles()
                .map_err(access("Error loading drm resources", path))?,
        );
        dev.planes = dev
            .plane_handles()
            .map_err(access("Error loading planes", path))?;

        Ok(DrmDeviceFd(Arc::new(dev)))
    }

    /// Returns true if the node at `path` exposes at least one crtc, encoder and connector
    pub fn is_kms_device(path: impl AsRef<Path>) -> bool {
        struct KmsNode(OwnedFd);
        impl AsFd for KmsNode {
            fn as_fd(&self) -> BorrowedFd<'_> {
                self.0.as_fd()
            }
        }
        impl BasicDevice for KmsNode {}
        impl ControlDevice for KmsNode {}

        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(path.as_ref())
        {
            Ok(file) => file,
            Err(_) => return false,
        };
        match KmsNode(file.into()).resource_handles() {
            Ok(res) => !res.crtcs().is_empty() && !res.encoders().is_empty() && !res.connectors().is_empty(),
            Err(err) => {
                debug!(path = ?path.as_ref(), "Not a kms device: {}", err);
                false
            }
        }
    }

    fn drm_resources(&self) -> io::Result<&control::ResourceHandles> {
        self.0
            .resources
            .as_ref()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENODEV))
    }

    fn crtc_mask(&self, crtcs: &[crtc::Handle]) -> io::Result<u32> {
        Ok(self
            .drm_resources()?
            .crtcs()
            .iter()
            .enumerate()
            .filter(|(_, crtc)| crtcs.contains(crtc))
            .fold(0, |mask, (pipe, _)| mask | (1 << pipe)))
    }

    fn read_properties<H: ResourceHandle>(&self, handle: H) -> io::Result<Vec<Property>> {
        let props = self.get_properties(handle)?;
        let (handles, values) = props.as_props_and_values();
        handles
            .iter()
            .zip(values.iter())
            .map(|(prop, value)| {
                let info = self.get_property(*prop)?;
                let kind = match info.value_type() {
                    property::ValueType::UnsignedRange(min, max) => PropertyKind::Range { min, max },
                    property::ValueType::SignedRange(min, max) => PropertyKind::SignedRange { min, max },
                    property::ValueType::Boolean => PropertyKind::Range { min: 0, max: 1 },
                    property::ValueType::Enum(entries) => {
                        let (_, entries) = entries.values();
                        PropertyKind::Enum(
                            entries
                                .iter()
                                .map(|entry| (entry.name().to_string_lossy().into_owned(), entry.value()))
                                .collect(),
                        )
                    }
                    property::ValueType::Bitmask => PropertyKind::Bitmask(self.bitmask_entries(*prop)?),
                    property::ValueType::Blob => PropertyKind::Blob,
                    property::ValueType::Object
                    | property::ValueType::CRTC
                    | property::ValueType::Connector
                    | property::ValueType::Encoder
                    | property::ValueType::Framebuffer
                    | property::ValueType::Plane
                    | property::ValueType::Property => PropertyKind::Object,
                    _ => PropertyKind::Unknown,
                };
                Ok(Property {
                    object: handle.into(),
                    handle: *prop,
                    name: info.name().to_string_lossy().into_owned(),
                    value: *value,
                    kind,
                    immutable: !info.mutable(),
                    atomic: info.atomic(),
                })
            })
            .collect()
    }

    // drm-rs does not expose the names of bitmask entries, values are bit indices
    fn bitmask_entries(&self, prop: property::Handle) -> io::Result<Vec<(String, u64)>> {
        let mut enums = Vec::new();
        drm_ffi::mode::get_property(self.as_fd(), prop.into(), None, Some(&mut enums))?;
        Ok(enums
            .iter()
            .map(|entry| {
                let name = entry
                    .name
                    .iter()
                    .take_while(|c| **c != 0)
                    .map(|c| *c as u8)
                    .collect::<Vec<u8>>();
                (String::from_utf8_lossy(&name).into_owned(), entry.value)
            })
            .collect())
    }
}

fn bounds(range: impl RangeBounds<u32>) -> (u32, u32) {
    let min = match range.start_bound() {
        Bound::Included(min) => *min,
        Bound::Excluded(min) => min.saturating_add(1),
        Bound::Unbounded => 0,
    };
    let max = match range.end_bound() {
        Bound::Included(max) => *max,
        Bound::Excluded(max) => max.saturating_sub(1),
        Bound::Unbounded => u32::MAX,
    };
    (min, max)
}

impl KmsDevice for DrmDeviceFd {
    fn dev_path(&self) -> Option<PathBuf> {
        Some(self.0.path.clone())
    }

    fn resources(&self) -> io::Result<ResourceHandles> {
        let res = self.drm_resources()?;
        let (min_w, max_w) = bounds(res.supported_fb_width());
        let (min_h, max_h) = bounds(res.supported_fb_height());
        Ok(ResourceHandles {
            crtcs: res.crtcs().to_vec(),
            encoders: res.encoders().to_vec(),
            connectors: res.connectors().to_vec(),
            planes: self.0.planes.clone(),
            min_size: (min_w, min_h),
            max_size: (max_w, max_h),
        })
    }

    fn crtc(&self, handle: crtc::Handle) -> io::Result<CrtcInfo> {
        let info = self.get_crtc(handle)?;
        Ok(CrtcInfo {
            handle,
            mode: info.mode(),
        })
    }

    fn encoder(&self, handle: encoder::Handle) -> io::Result<EncoderInfo> {
        let info = drm_ffi::mode::get_encoder(self.as_fd(), handle.into())?;
        Ok(EncoderInfo {
            handle,
            crtc: control::from_u32(info.crtc_id),
            possible_crtcs: info.possible_crtcs,
            possible_clones: info.possible_clones,
        })
    }

    fn connector(&self, handle: connector::Handle) -> io::Result<ConnectorInfo> {
        let info = self.get_connector(handle, true)?;
        Ok(ConnectorInfo {
            handle,
            interface: info.interface(),
            interface_id: info.interface_id(),
            state: info.state(),
            size_mm: info.size().unwrap_or((0, 0)),
            current_encoder: info.current_encoder(),
            encoders: info.encoders().to_vec(),
            modes: info.modes().to_vec(),
        })
    }

    fn plane(&self, handle: plane::Handle) -> io::Result<PlaneInfo> {
        let info = self.get_plane(handle)?;
        let crtcs = self.drm_resources()?.filter_crtcs(info.possible_crtcs());
        Ok(PlaneInfo {
            handle,
            possible_crtcs: self.crtc_mask(&crtcs)?,
            formats: info.formats().to_vec(),
        })
    }

    fn properties(&self, object: RawResourceHandle) -> io::Result<Vec<Property>> {
        let res = self.drm_resources()?;
        let is = |handle: RawResourceHandle| handle == object;
        if let Some(crtc) = res.crtcs().iter().find(|h| is((**h).into())) {
            self.read_properties(*crtc)
        } else if let Some(conn) = res.connectors().iter().find(|h| is((**h).into())) {
            self.read_properties(*conn)
        } else if let Some(plane) = self.0.planes.iter().find(|h| is((**h).into())) {
            self.read_properties(*plane)
        } else {
            Err(io::Error::from_raw_os_error(libc::ENOENT))
        }
    }

    fn atomic_commit(&self, request: &AtomicRequest, flags: AtomicCommitFlags) -> io::Result<()> {
        ControlDevice::atomic_commit(self, flags, request.to_mode_req())
    }

    fn create_property_blob(&self, data: &[u8]) -> io::Result<u32> {
        let mut data = data.to_vec();
        let blob = drm_ffi::mode::create_property_blob(self.as_fd(), &mut data)?;
        Ok(blob.blob_id)
    }

    fn create_mode_blob(&self, mode: &Mode) -> io::Result<u32> {
        match ControlDevice::create_property_blob(self, mode)? {
            property::Value::Blob(id) => Ok(id as u32),
            _ => Err(io::Error::from_raw_os_error(libc::EINVAL)),
        }
    }

    fn destroy_property_blob(&self, blob: u32) -> io::Result<()> {
        ControlDevice::destroy_property_blob(self, blob as u64)
    }

    fn wait_vblank(&self, pipe: u32) -> io::Result<Duration> {
        let reply = BasicDevice::wait_vblank(
            self,
            VblankWaitTarget::Relative(1),
            VblankWaitFlags::empty(),
            pipe,
            0,
        )?;
        // only asynchronous waits are missing the timestamp
        reply
            .time()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "vblank reply without timestamp"))
    }

    fn driver_name(&self) -> io::Result<String> {
        let driver = self.get_driver()?;
        Ok(driver.name().to_string_lossy().into_owned())
    }

    fn has_addfb2_modifiers(&self) -> bool {
        self.0.addfb2_modifiers
    }
}
