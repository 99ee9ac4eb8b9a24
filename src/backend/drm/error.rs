use drm::control::{connector, plane, RawResourceHandle};
use std::path::PathBuf;

/// Errors thrown by the [`DrmDevice`](crate::backend::drm::DrmDevice),
/// the [`ResourceManager`](crate::backend::drm::ResourceManager) and their resources.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The `DrmDevice` encountered an access error
    #[error(transparent)]
    Access(#[from] AccessError),
    /// The device refused a client capability required for atomic modesetting
    #[error("Device `{dev:?}` does not support the `{capability}` client capability")]
    MissingCapability {
        /// Device that refused the capability
        dev: Option<PathBuf>,
        /// Name of the capability
        capability: &'static str,
    },
    /// The DrmDevice is missing a required property
    #[error("The DrmDevice is missing a required property '{name}' for handle ({handle:?})")]
    UnknownProperty {
        /// Object handle
        handle: RawResourceHandle,
        /// Property name
        name: &'static str,
    },
    /// A value was written to a property that does not accept it
    #[error("Value `{value}` is not valid for property '{name}' of handle ({handle:?})")]
    InvalidPropertyValue {
        /// Object handle
        handle: RawResourceHandle,
        /// Property name
        name: String,
        /// Rejected value
        value: u64,
    },
    /// A plane reported a type that is neither primary, overlay nor cursor
    #[error("Plane `{handle:?}` has an unknown type `{value}`")]
    InvalidPlaneType {
        /// Plane handle
        handle: plane::Handle,
        /// Reported type value
        value: u64,
    },
    /// No connector matched the configured primary display order
    #[error("Failed to find a primary display from the display order `{0:?}`")]
    NoPrimaryDisplay(Vec<String>),
    /// No encoder and crtc combination could be bound to a connector
    #[error("No suitable encoder/crtc found for connector `{connector:?}` (display {display})")]
    NoSuitableEncoder {
        /// Connector
        connector: connector::Handle,
        /// Display the connector is assigned to
        display: u32,
    },
    /// A referenced connector is not part of this device
    #[error("Unknown connector `{0:?}`")]
    UnknownConnector(connector::Handle),
    /// A display has no bound crtc or connector on this device
    #[error("Display {0} is not handled by this device")]
    UnknownDisplay(u32),
    /// The connector of a display has no mode with the given id
    #[error("Display {display} has no mode {mode}")]
    UnknownMode {
        /// Display
        display: u32,
        /// Requested mode id
        mode: u32,
    },
    /// The display already has a writeback connector attached
    #[error("Display {0} already has a writeback connector attached")]
    WritebackAlreadyAttached(u32),
    /// No unassigned writeback connector can drive the crtc of a display
    #[error("No writeback connector can be attached to display {0}")]
    NoWritebackConnector(u32),
    /// A layer was handed to a plane without an imported framebuffer
    #[error("Layer has no framebuffer to scan out on plane `{0:?}`")]
    MissingFramebuffer(plane::Handle),
    /// A composition plane refers to a layer the composition does not have
    #[error("Composition plane `{0:?}` has no layer to scan out")]
    MissingLayer(plane::Handle),
    /// No device with usable displays was found
    #[error("Failed to initialize any displays")]
    NoDisplays,
}

/// Error caused by a failed kernel request
#[derive(thiserror::Error, Debug)]
#[error("DRM access error: {errmsg} on device `{dev:?}` ({source:})")]
pub struct AccessError {
    /// Error message associated to the access error
    pub errmsg: &'static str,
    /// Device on which the error was generated
    pub dev: Option<PathBuf>,
    /// Underlying device error
    #[source]
    pub source: std::io::Error,
}

impl AccessError {
    /// Returns true if the underlying request was interrupted by a signal
    pub fn is_interrupted(&self) -> bool {
        self.source.kind() == std::io::ErrorKind::Interrupted
    }
}
