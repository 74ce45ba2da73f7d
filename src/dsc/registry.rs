//! Type-to-body dispatch. Built-in kinds (descriptor sets, the name
//! mapping descriptor, the opaque fallback) are hard-wired; everything
//! else goes through an application-registered factory, falling back to
//! `OpaqueBody` for any type nobody registered — the mechanism that lets
//! a file written by a newer version of an application still open in an
//! older one.

use std::collections::BTreeMap;

use crate::dsc::id_mapping::{NameMappingBody, NAME_MAPPING_TYPE};
use crate::dsc::opaque::OpaqueBody;
use crate::dsc::set::DescriptorSetBody;
use crate::dsc::{CustomDescriptor, DescriptorBody};
use crate::error::{Result, XozError};

pub const TYPE_RESERVED_THRESHOLD: u16 = 4;
pub const DSET_TYPE: u16 = 0x0001;
pub const DSET_SUBCLASS_MIN_TYPE: u16 = 0x01e0;
pub const DSET_SUBCLASS_MAX_TYPE: u16 = 0x01e0 + 2048;

type CustomFactory = fn() -> Box<dyn CustomDescriptor>;

pub struct DescriptorRegistry {
    custom: BTreeMap<u16, CustomFactory>,
}

impl Default for DescriptorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        DescriptorRegistry {
            custom: BTreeMap::new(),
        }
    }

    /// Register a factory for application-defined type `dsc_type`. Types
    /// below `TYPE_RESERVED_THRESHOLD` are reserved for the library and
    /// rejected unless `override_reserved` is set (for tests).
    pub fn register(&mut self, dsc_type: u16, factory: CustomFactory, override_reserved: bool) -> Result<()> {
        if dsc_type < TYPE_RESERVED_THRESHOLD && !override_reserved {
            return Err(XozError::BadDescriptor {
                dsc_type,
                reason: "this type id is reserved for library use".into(),
            });
        }
        self.custom.insert(dsc_type, factory);
        Ok(())
    }

    /// Build an (empty, not-yet-populated) body for `dsc_type`; the caller
    /// fills it in with `DescriptorBody::read_specifics`/equivalent.
    pub fn create(&self, dsc_type: u16) -> Result<DescriptorBody> {
        if let Some(factory) = self.custom.get(&dsc_type) {
            return Ok(DescriptorBody::Custom(factory()));
        }

        match dsc_type {
            0 | 2 | 3 => Err(XozError::BadDescriptor {
                dsc_type,
                reason: "this type id is reserved and has no registered meaning".into(),
            }),
            DSET_TYPE => Ok(DescriptorBody::Set(DescriptorSetBody::new())),
            t if (DSET_SUBCLASS_MIN_TYPE..=DSET_SUBCLASS_MAX_TYPE).contains(&t) => {
                Ok(DescriptorBody::Set(DescriptorSetBody::new()))
            }
            NAME_MAPPING_TYPE => Ok(DescriptorBody::NameMapping(NameMappingBody::empty())),
            _ => Ok(DescriptorBody::Opaque(OpaqueBody::empty())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_type_falls_back_to_opaque() {
        let registry = DescriptorRegistry::new();
        let body = registry.create(0x0777).unwrap();
        assert!(matches!(body, DescriptorBody::Opaque(_)));
    }

    #[test]
    fn reserved_types_are_rejected() {
        let registry = DescriptorRegistry::new();
        assert!(registry.create(0).is_err());
        assert!(registry.create(2).is_err());
        assert!(registry.create(3).is_err());
    }

    #[test]
    fn registering_a_reserved_type_requires_override() {
        fn make() -> Box<dyn CustomDescriptor> {
            unimplemented!()
        }
        let mut registry = DescriptorRegistry::new();
        assert!(registry.register(1, make, false).is_err());
        assert!(registry.register(1, make, true).is_ok());
    }

    #[test]
    fn descriptor_set_subclass_range_resolves_to_a_set_body() {
        let registry = DescriptorRegistry::new();
        let body = registry.create(DSET_SUBCLASS_MIN_TYPE + 5).unwrap();
        assert!(matches!(body, DescriptorBody::Set(_)));
    }
}
