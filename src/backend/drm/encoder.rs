use drm::control::{crtc, encoder};

/// An encoder of a [`DrmDevice`](super::DrmDevice)
///
/// Many connectors may list the same encoder, but it only drives one crtc at a time.
/// Once bound to a display it is not available to any other display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoder {
    handle: encoder::Handle,
    crtc: Option<crtc::Handle>,
    display: Option<u32>,
    possible_crtcs: Vec<crtc::Handle>,
    possible_clones: Vec<encoder::Handle>,
}

impl Encoder {
    pub(super) fn new(
        handle: encoder::Handle,
        crtc: Option<crtc::Handle>,
        possible_crtcs: Vec<crtc::Handle>,
    ) -> Encoder {
        Encoder {
            handle,
            crtc,
            display: None,
            possible_crtcs,
            possible_clones: Vec::new(),
        }
    }

    /// Handle of the encoder
    pub fn handle(&self) -> encoder::Handle {
        self.handle
    }

    /// Crtc currently driven by this encoder
    ///
    /// Before discovery bound the encoder this is whatever the kernel reported.
    pub fn crtc(&self) -> Option<crtc::Handle> {
        self.crtc
    }

    /// Display this encoder is bound to
    pub fn display(&self) -> Option<u32> {
        self.display
    }

    pub(super) fn bind(&mut self, display: u32, crtc: crtc::Handle) {
        self.display = Some(display);
        self.crtc = Some(crtc);
    }

    /// Crtcs this encoder may drive, in pipe order
    pub fn possible_crtcs(&self) -> &[crtc::Handle] {
        &self.possible_crtcs
    }

    /// Encoders this encoder may be cloned with
    pub fn possible_clones(&self) -> &[encoder::Handle] {
        &self.possible_clones
    }

    pub(super) fn add_possible_clone(&mut self, clone: encoder::Handle) {
        if !self.possible_clones.contains(&clone) {
            self.possible_clones.push(clone);
        }
    }

    /// Returns true if this encoder may show the same content as `other`
    pub fn can_clone(&self, other: encoder::Handle) -> bool {
        self.possible_clones.contains(&other)
    }

    /// Returns true if this encoder is unbound or already bound to `display`
    pub fn can_bind(&self, display: u32) -> bool {
        self.display.map_or(true, |bound| bound == display)
    }
}
