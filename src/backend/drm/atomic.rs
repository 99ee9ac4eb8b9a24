use drm::control::{atomic::AtomicModeReq, property, RawResourceHandle};

/// A batch of property writes, applied all at once by
/// [`KmsDevice::atomic_commit`](super::KmsDevice::atomic_commit)
///
/// Writing the same property of an object twice keeps the last value.
/// Unlike [`AtomicModeReq`] the writes can be read back, which is what
/// [`DisplayComposition::build_request`](super::compositor::DisplayComposition::build_request)
/// callers and tests rely on. [`AtomicRequest::to_mode_req`] produces the kernel request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AtomicRequest {
    props: Vec<(RawResourceHandle, property::Handle, u64)>,
}

impl AtomicRequest {
    /// Create an empty request
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `property` of `object` to `value`
    pub fn add_property(&mut self, object: RawResourceHandle, property: property::Handle, value: u64) {
        match self
            .props
            .iter_mut()
            .find(|(obj, prop, _)| *obj == object && *prop == property)
        {
            Some(entry) => entry.2 = value,
            None => self.props.push((object, property, value)),
        }
    }

    /// Value written to `property` of `object`, if any
    pub fn value(&self, object: RawResourceHandle, property: property::Handle) -> Option<u64> {
        self.props
            .iter()
            .find(|(obj, prop, _)| *obj == object && *prop == property)
            .map(|(_, _, value)| *value)
    }

    /// Iterate over all writes in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (RawResourceHandle, property::Handle, u64)> + '_ {
        self.props.iter().copied()
    }

    /// Number of writes
    pub fn len(&self) -> usize {
        self.props.len()
    }

    /// Returns true if nothing would be written
    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    /// Build the drm request submitted to the kernel
    pub fn to_mode_req(&self) -> AtomicModeReq {
        let mut req = AtomicModeReq::new();
        for (object, prop, value) in self.iter() {
            req.add_raw_property(object, prop, value);
        }
        req
    }
}
