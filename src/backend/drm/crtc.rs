use drm::control::crtc;

use super::{kms::KmsDevice, property::Property, property::PropertyStore, Error};

/// A crtc of a [`DrmDevice`](super::DrmDevice)
///
/// A crtc drives at most one display at a time.
#[derive(Debug, Clone)]
pub struct Crtc {
    handle: crtc::Handle,
    pipe: u32,
    display: Option<u32>,
    active: Property,
    mode_id: Property,
    out_fence_ptr: Option<Property>,
}

impl Crtc {
    pub(super) fn new(kms: &dyn KmsDevice, handle: crtc::Handle, pipe: u32) -> Result<Crtc, Error> {
        let props = PropertyStore::load(kms, handle.into())?;
        Ok(Crtc {
            handle,
            pipe,
            display: None,
            active: props.mandatory("ACTIVE")?,
            mode_id: props.mandatory("MODE_ID")?,
            out_fence_ptr: props.optional("OUT_FENCE_PTR"),
        })
    }

    /// Handle of the crtc
    pub fn handle(&self) -> crtc::Handle {
        self.handle
    }

    /// Index of the crtc in the resource list of the device
    pub fn pipe(&self) -> u32 {
        self.pipe
    }

    /// Display driven by this crtc
    pub fn display(&self) -> Option<u32> {
        self.display
    }

    /// Returns true if this crtc is free or already drives `display`
    pub fn can_bind(&self, display: u32) -> bool {
        self.display.map(|bound| bound == display).unwrap_or(true)
    }

    pub(super) fn bind(&mut self, display: u32) {
        self.display = Some(display);
    }

    /// `ACTIVE` property
    pub fn active_property(&self) -> &Property {
        &self.active
    }

    /// `MODE_ID` property
    pub fn mode_property(&self) -> &Property {
        &self.mode_id
    }

    /// `OUT_FENCE_PTR` property, if supported
    pub fn out_fence_ptr_property(&self) -> Option<&Property> {
        self.out_fence_ptr.as_ref()
    }

    /// Returns true if a plane with the given `possible_crtcs` mask may be attached
    pub fn supported_by(&self, possible_crtcs: u32) -> bool {
        1u32.checked_shl(self.pipe)
            .map(|bit| bit & possible_crtcs != 0)
            .unwrap_or(false)
    }
}
