//! Backend helpers
//!
//! Smithay Scanout only provides the [`drm`] backend, managing the scanout
//! resources of kms devices.

pub mod drm;
