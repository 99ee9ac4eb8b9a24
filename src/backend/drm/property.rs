//! Typed access to the properties of kms objects
//!
//! Every kms object (crtc, connector, plane) exposes its state as a list of named properties.
//! A [`PropertyStore`] caches them per object after discovery, [`Property::atomic_set`]
//! adds validated writes to an [`AtomicRequest`].

use std::collections::HashMap;

use drm::control::{property, RawResourceHandle};
use tracing::trace;

use super::{atomic::AtomicRequest, error::Error, kms::KmsDevice, AccessError};

/// Value domain of a property
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKind {
    /// Unsigned integer in `[min, max]`
    Range {
        /// Smallest accepted value
        min: u64,
        /// Largest accepted value
        max: u64,
    },
    /// Signed integer in `[min, max]`
    SignedRange {
        /// Smallest accepted value
        min: i64,
        /// Largest accepted value
        max: i64,
    },
    /// One of the named values
    Enum(Vec<(String, u64)>),
    /// Combination of named bits, values are bit indices
    Bitmask(Vec<(String, u64)>),
    /// Blob id
    Blob,
    /// Id of another kms object
    Object,
    /// Type not understood
    Unknown,
}

/// A single property of a kms object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Object the property belongs to
    pub object: RawResourceHandle,
    /// Handle of the property
    pub handle: property::Handle,
    /// Name of the property
    pub name: String,
    /// Current value
    pub value: u64,
    /// Value domain
    pub kind: PropertyKind,
    /// The property can not be changed
    pub immutable: bool,
    /// The property is only exposed to atomic clients
    pub atomic: bool,
}

impl Property {
    /// Smallest accepted value, if this is a range property
    pub fn range_min(&self) -> Option<u64> {
        match self.kind {
            PropertyKind::Range { min, .. } => Some(min),
            PropertyKind::SignedRange { min, .. } => Some(min as u64),
            _ => None,
        }
    }

    /// Largest accepted value, if this is a range property
    pub fn range_max(&self) -> Option<u64> {
        match self.kind {
            PropertyKind::Range { max, .. } => Some(max),
            PropertyKind::SignedRange { max, .. } => Some(max as u64),
            _ => None,
        }
    }

    /// Raw value of the enum entry called `name`
    ///
    /// For bitmask properties this is the bit (not the bit index) of the entry.
    pub fn enum_value(&self, name: &str) -> Option<u64> {
        match &self.kind {
            PropertyKind::Enum(entries) => entries.iter().find(|(n, _)| n == name).map(|(_, v)| *v),
            PropertyKind::Bitmask(entries) => entries
                .iter()
                .find(|(n, _)| n == name)
                .and_then(|(_, bit)| 1u64.checked_shl(*bit as u32)),
            _ => None,
        }
    }

    /// Add a write of `value` to `req`
    ///
    /// Enum properties only accept values of their table, bitmask properties only
    /// accept combinations of their bits.
    pub fn atomic_set(&self, req: &mut AtomicRequest, value: u64) -> Result<(), Error> {
        let valid = match &self.kind {
            PropertyKind::Enum(entries) => entries.iter().any(|(_, v)| *v == value),
            PropertyKind::Bitmask(entries) => {
                let mask = entries
                    .iter()
                    .filter_map(|(_, bit)| 1u64.checked_shl(*bit as u32))
                    .fold(0, |mask, bit| mask | bit);
                value & !mask == 0
            }
            _ => true,
        };
        if !valid {
            return Err(Error::InvalidPropertyValue {
                handle: self.object,
                name: self.name.clone(),
                value,
            });
        }

        req.add_property(self.object, self.handle, value);
        Ok(())
    }
}

/// Maps domain values to the raw values a property accepts for them
///
/// Built once from the enum names reported by the hardware. A key without
/// a mapping is not supported by the object.
#[derive(Debug, Clone)]
pub struct EnumMap<K> {
    entries: Vec<(K, u64)>,
}

impl<K> Default for EnumMap<K> {
    fn default() -> Self {
        EnumMap { entries: Vec::new() }
    }
}

impl<K: Copy + PartialEq> EnumMap<K> {
    /// Map `key` to the value of the enum entry `name` of `prop`
    ///
    /// Returns false if the property has no such entry.
    pub fn add_enum(&mut self, prop: &Property, name: &str, key: K) -> bool {
        match prop.enum_value(name) {
            Some(value) => {
                self.entries.retain(|(k, _)| *k != key);
                self.entries.push((key, value));
                true
            }
            None => {
                trace!(property = %prop.name, "No enum entry named {:?}", name);
                false
            }
        }
    }

    /// Raw value of `key`, if supported
    pub fn get(&self, key: K) -> Option<u64> {
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    /// Returns true if `key` has a mapping
    pub fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    /// Returns true if no key has a mapping
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Properties of one kms object, looked up by name
#[derive(Debug, Clone)]
pub struct PropertyStore {
    object: RawResourceHandle,
    properties: HashMap<String, Property>,
}

impl PropertyStore {
    /// Read all properties of `object`
    pub fn load(kms: &dyn KmsDevice, object: RawResourceHandle) -> Result<Self, Error> {
        let props = kms.properties(object).map_err(|source| AccessError {
            errmsg: "Failed to get properties",
            dev: kms.dev_path(),
            source,
        })?;
        Ok(PropertyStore {
            object,
            properties: props.into_iter().map(|prop| (prop.name.clone(), prop)).collect(),
        })
    }

    /// Object these properties belong to
    pub fn object(&self) -> RawResourceHandle {
        self.object
    }

    /// Look up a property the object is required to have
    pub fn mandatory(&self, name: &'static str) -> Result<Property, Error> {
        self.properties.get(name).cloned().ok_or(Error::UnknownProperty {
            handle: self.object,
            name,
        })
    }

    /// Look up a property the object may lack
    pub fn optional(&self, name: &str) -> Option<Property> {
        let prop = self.properties.get(name).cloned();
        if prop.is_none() {
            trace!(object = ?self.object, "Could not get optional property {:?}", name);
        }
        prop
    }
}

#[cfg(test)]
mod test {
    use crate::backend::drm::{atomic::AtomicRequest, testing::prop, Error};

    use super::{EnumMap, PropertyKind};

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Blend {
        PreMultiplied,
        Coverage,
    }

    #[test]
    fn enum_rejects_unknown_values() {
        let blend = prop(
            7,
            "pixel blend mode",
            PropertyKind::Enum(vec![("None".into(), 0), ("Pre-multiplied".into(), 1)]),
        );
        let mut req = AtomicRequest::new();
        blend.atomic_set(&mut req, 1).unwrap();
        assert!(matches!(
            blend.atomic_set(&mut req, 2),
            Err(Error::InvalidPropertyValue { value: 2, .. })
        ));
        assert_eq!(req.len(), 1);
    }

    #[test]
    fn bitmask_accepts_combinations() {
        let rotation = prop(
            7,
            "rotation",
            PropertyKind::Bitmask(vec![
                ("rotate-0".into(), 0),
                ("rotate-90".into(), 1),
                ("reflect-x".into(), 4),
            ]),
        );
        let mut req = AtomicRequest::new();
        rotation.atomic_set(&mut req, 0b10010).unwrap();
        assert!(rotation.atomic_set(&mut req, 0b100).is_err());
        assert_eq!(rotation.enum_value("reflect-x"), Some(0b10000));
    }

    #[test]
    fn enum_map_only_maps_reported_names() {
        let blend = prop(
            7,
            "pixel blend mode",
            PropertyKind::Enum(vec![("Pre-multiplied".into(), 1)]),
        );
        let mut map = EnumMap::default();
        assert!(map.add_enum(&blend, "Pre-multiplied", Blend::PreMultiplied));
        assert!(!map.add_enum(&blend, "Coverage", Blend::Coverage));
        assert_eq!(map.get(Blend::PreMultiplied), Some(1));
        assert!(!map.contains(Blend::Coverage));
    }

    #[test]
    fn range_bounds() {
        let zpos = prop(7, "zpos", PropertyKind::Range { min: 2, max: 8 });
        assert_eq!(zpos.range_min(), Some(2));
        assert_eq!(zpos.range_max(), Some(8));
        assert_eq!(prop(7, "FB_ID", PropertyKind::Object).range_min(), None);
    }
}
