//! Drm/Kms types and scanout resource management
//!
//! This module manages the scanout resources of kms devices. It does not render or
//! allocate buffers, but decides which hardware resources a display and its frames use.
//!
//! ## How to use it
//!
//! ### Initialization
//!
//! A [`ResourceManager`] opens the devices named by the [`Config`](crate::config::Config),
//! usually every kms node at `/dev/dri/card%`. Every device is represented by a [`DrmDevice`],
//! that discovers the connectors, encoders, crtcs and planes of the device once and numbers
//! the connected connectors as displays. Display `0` is the primary display, selected
//! from the configured [`DisplayOrder`](crate::config::DisplayOrder).
//!
//! Every display is bound to its own encoder and crtc during discovery, so
//! [`DrmDevice::crtc_for_display`] and [`DrmDevice::connector_for_display`] never change.
//!
//! Talking to the kernel is abstracted by the [`KmsDevice`] trait, which is implemented by
//! [`DrmDeviceFd`] for an open drm node.
//!
//! ### Frames
//!
//! Frames, power state changes and modesets are described by a
//! [`DisplayComposition`](compositor::DisplayComposition). See the [`compositor`]
//! module on how layers of a frame are assigned to planes.
//!
//! ### Vsync
//!
//! A [`VsyncTimer`] per display reports the timestamps of its vblanks on a dedicated
//! thread. [`ResourceManager::vblank_source`] provides the hardware vblanks of a display,
//! if the driver is not able to deliver them the timer falls back to a synthetic vblank
//! in phase with the last reported one. The synthetic vblank is paced by the refresh
//! rate of the mode recorded with [`ResourceManager::set_active_mode`].
//!
//! ```no_run
//! use smithay_scanout::{backend::drm::{ResourceManager, VsyncTimer}, config::Config};
//!
//! let mut manager = ResourceManager::init(&Config::from_env()).expect("No displays");
//! let source = manager.vblank_source(0).expect("Primary display");
//! let timer = VsyncTimer::new(0, source, |timestamp| {
//!     println!("vblank at {:?}", timestamp);
//! })
//! .expect("Failed to spawn vsync thread");
//!
//! // after the modeset to the preferred mode was committed
//! let preferred = manager
//!     .device_for_display(0)
//!     .and_then(|dev| dev.connector_for_display(0))
//!     .and_then(|conn| conn.preferred_mode_id());
//! if let Some(mode_id) = preferred {
//!     let mode = manager.set_active_mode(0, mode_id).expect("Known mode");
//!     timer.set_refresh_rate(mode.refresh());
//! }
//! timer.vsync_control(true);
//! ```

mod atomic;
pub mod compositor;
mod connector;
mod crtc;
mod device;
mod encoder;
mod error;
pub mod format;
mod kms;
mod plane;
mod property;
mod resource_manager;
mod vsync;

#[cfg(test)]
pub(crate) mod testing;

pub use self::atomic::AtomicRequest;
pub use self::connector::{Connector, ConnectorClass, DisplayMode};
pub use self::crtc::Crtc;
pub use self::device::{fd::DrmDeviceFd, DrmDevice, PropertyBlob};
pub use self::encoder::Encoder;
pub use self::error::{AccessError, Error};
pub use self::kms::{ConnectorInfo, CrtcInfo, EncoderInfo, KmsDevice, PlaneInfo, ResourceHandles};
pub use self::plane::{DrmRotation, Plane};
pub use self::property::{EnumMap, Property, PropertyKind, PropertyStore};
pub use self::resource_manager::ResourceManager;
pub use self::vsync::{
    frame_period, phased_vsync, DrmVblankSource, VblankError, VblankSource, VsyncTimer, DEFAULT_REFRESH_RATE,
    MIN_FRAME_PERIOD,
};
