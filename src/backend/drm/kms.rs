//! Abstraction over the kernel mode-setting interface
//!
//! Everything the resource manager needs from the kernel is expressed by the
//! [`KmsDevice`] trait. [`DrmDeviceFd`](super::DrmDeviceFd) implements it for an open drm node.

use std::{fmt, io, path::PathBuf, time::Duration};

use drm::control::{connector, crtc, encoder, plane, AtomicCommitFlags, Mode, RawResourceHandle};

use super::{atomic::AtomicRequest, property::Property};

/// Resource handles of a device in the order reported by the kernel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceHandles {
    /// Crtcs, the index of a crtc in this list is its pipe
    pub crtcs: Vec<crtc::Handle>,
    /// Encoders
    pub encoders: Vec<encoder::Handle>,
    /// Connectors
    pub connectors: Vec<connector::Handle>,
    /// Planes (all of them, the universal planes capability is always set)
    pub planes: Vec<plane::Handle>,
    /// Smallest supported framebuffer size
    pub min_size: (u32, u32),
    /// Largest supported framebuffer size
    pub max_size: (u32, u32),
}

/// Current state of a crtc
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrtcInfo {
    /// Handle of the crtc
    pub handle: crtc::Handle,
    /// Currently programmed mode, if any
    pub mode: Option<Mode>,
}

/// Static description of an encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInfo {
    /// Handle of the encoder
    pub handle: encoder::Handle,
    /// Crtc currently driven by this encoder
    pub crtc: Option<crtc::Handle>,
    /// Bitmask of crtc pipes this encoder may drive
    pub possible_crtcs: u32,
    /// Bitmask of encoder indices this encoder may be cloned with
    pub possible_clones: u32,
}

/// Current state of a connector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorInfo {
    /// Handle of the connector
    pub handle: connector::Handle,
    /// Interface of the connector
    pub interface: connector::Interface,
    /// Instance of this interface on the device, starting at 1
    pub interface_id: u32,
    /// Connection state
    pub state: connector::State,
    /// Physical size in millimeters
    pub size_mm: (u32, u32),
    /// Encoder currently attached
    pub current_encoder: Option<encoder::Handle>,
    /// Encoders that may be attached
    pub encoders: Vec<encoder::Handle>,
    /// Modes reported by the connector
    pub modes: Vec<Mode>,
}

/// Static description of a plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneInfo {
    /// Handle of the plane
    pub handle: plane::Handle,
    /// Bitmask of crtc pipes this plane may be attached to
    pub possible_crtcs: u32,
    /// Supported fourcc codes
    pub formats: Vec<u32>,
}

/// The kernel side of a kms device
pub trait KmsDevice: Send + Sync + fmt::Debug {
    /// Path of the underlying node, used for error reporting
    fn dev_path(&self) -> Option<PathBuf>;
    /// Handles of all resources of this device
    fn resources(&self) -> io::Result<ResourceHandles>;
    /// Current state of a crtc
    fn crtc(&self, handle: crtc::Handle) -> io::Result<CrtcInfo>;
    /// Description of an encoder
    fn encoder(&self, handle: encoder::Handle) -> io::Result<EncoderInfo>;
    /// Current state of a connector, probing it may be slow
    fn connector(&self, handle: connector::Handle) -> io::Result<ConnectorInfo>;
    /// Description of a plane
    fn plane(&self, handle: plane::Handle) -> io::Result<PlaneInfo>;
    /// All properties of an object with their current values
    fn properties(&self, object: RawResourceHandle) -> io::Result<Vec<Property>>;
    /// Submit an atomic request
    fn atomic_commit(&self, request: &AtomicRequest, flags: AtomicCommitFlags) -> io::Result<()>;
    /// Create a property blob from raw bytes
    fn create_property_blob(&self, data: &[u8]) -> io::Result<u32>;
    /// Create a property blob holding a mode, as expected by `MODE_ID`
    fn create_mode_blob(&self, mode: &Mode) -> io::Result<u32>;
    /// Destroy a property blob
    fn destroy_property_blob(&self, blob: u32) -> io::Result<()>;
    /// Wait for the next vblank of the crtc at `pipe` and return its timestamp
    fn wait_vblank(&self, pipe: u32) -> io::Result<Duration>;
    /// Name of the kernel driver
    fn driver_name(&self) -> io::Result<String>;
    /// Whether framebuffers may be created with explicit modifiers
    fn has_addfb2_modifiers(&self) -> bool;
}
