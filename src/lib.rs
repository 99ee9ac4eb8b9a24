#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
// Allow acronyms like CRTC
#![allow(clippy::upper_case_acronyms)]

//! # Smithay Scanout: display pipeline management for kms devices
//!
//! This crate manages the scanout resources of one or more kms devices on behalf of a
//! display server or hardware composer. It does not render anything itself, it decides
//! which hardware resources a frame may use.
//!
//! ## Structure of the crate
//!
//! Everything lives in [`backend::drm`]:
//!
//! - [`DrmDevice`](backend::drm::DrmDevice) discovers the fixed topology of a device
//!   (connectors, encoders, crtcs and planes), assigns logical display numbers and binds
//!   every display to its own encoder and crtc.
//! - [`ResourceManager`](backend::drm::ResourceManager) aggregates multiple devices and maps
//!   display numbers back to the device handling them.
//! - [`DisplayComposition`](backend::drm::compositor::DisplayComposition) plans every frame,
//!   handing layers to scanout planes through a pluggable
//!   [`Planner`](backend::drm::compositor::Planner) and leaving the rest to client composition.
//! - [`VsyncTimer`](backend::drm::VsyncTimer) emits phase-locked vsync timestamps per display,
//!   falling back to a synthetic timer if the hardware does not deliver vblanks.
//!
//! Talking to the kernel is abstracted by the [`KmsDevice`](backend::drm::KmsDevice) trait,
//! [`DrmDeviceFd`](backend::drm::DrmDeviceFd) is the implementation backed by an open drm node.
//!
//! ### Logging
//!
//! Smithay Scanout makes extensive use of [`tracing`] for its internal logging.
//!
//! For release builds it is recommended to limit the log level during compile time.
//! This can be done by adding a dependency to [`tracing`] and enabling the corresponding features.
//!
//! ```toml
//! [dependencies]
//! tracing = { version = "0.1", features = ["max_level_trace", "release_max_level_debug"] }
//! ```

pub mod backend;
pub mod config;
pub mod utils;
