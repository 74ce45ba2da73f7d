//! `NameMappingDescriptor`: a reserved, library-provided descriptor that
//! persists a `name -> persistent id` map as its content, letting an
//! application look up well-known descriptors by a stable string instead
//! of a raw id.
//!
//! Grounded in `xoz/dsc/id_mapping.{h,cpp}`: same reserved type constant,
//! same `'~'`-prefixed "temporary, not persisted" convention, same
//! `(id: u32, name_len: u8, name)` packed record shape.

use std::collections::BTreeMap;

use crate::error::{Result, XozError};

pub const NAME_MAPPING_TYPE: u16 = 0x01bf;
const TEMP_NAME_PREFIX: char = '~';

/// In-memory body for a `NameMappingDescriptor`. `idata` is just the
/// `u16` entry count; the packed `(id, name_len, name)` records live in
/// the owning `DescriptorRecord`'s content part, read/written through
/// `content_bytes`/`load_content` rather than through this type directly
/// (the body has no access to a `BlockArray`).
#[derive(Debug, Clone, Default)]
pub struct NameMappingBody {
    num_entries: u16,
    entries: BTreeMap<String, u32>,
}

impl NameMappingBody {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_map(map: BTreeMap<String, u32>) -> Result<Self> {
        for (name, id) in &map {
            fail_if_bad_values(*id, name)?;
        }
        let persisted = map.keys().filter(|n| !is_temp_name(n)).count();
        Ok(NameMappingBody {
            num_entries: persisted as u16,
            entries: map,
        })
    }

    pub fn load(&self) -> BTreeMap<String, u32> {
        self.entries.clone()
    }

    pub fn write_specifics(&self) -> Vec<u8> {
        self.num_entries.to_le_bytes().to_vec()
    }

    pub fn read_specifics(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.len() < 2 {
            return Err(XozError::BadDescriptor {
                dsc_type: NAME_MAPPING_TYPE,
                reason: "idata too short to hold the entry count".into(),
            });
        }
        self.num_entries = u16::from_le_bytes([buf[0], buf[1]]);
        Ok(2)
    }

    /// Serialize the non-temporary entries as the descriptor's content
    /// bytes.
    pub fn content_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut cnt = 0u16;
        for (name, id) in &self.entries {
            if is_temp_name(name) {
                continue;
            }
            fail_if_bad_values(*id, name)?;
            out.extend_from_slice(&id.to_le_bytes());
            out.push(name.len() as u8);
            out.extend_from_slice(name.as_bytes());
            cnt += 1;
        }
        debug_assert_eq!(cnt, self.num_entries);
        Ok(out)
    }

    /// Populate `entries` from previously-written content bytes, using
    /// the `num_entries` idata already read by `read_specifics`.
    pub fn load_content(&mut self, buf: &[u8]) -> Result<()> {
        let mut pos = 0usize;
        let mut entries = BTreeMap::new();
        for _ in 0..self.num_entries {
            let id_bytes = buf.get(pos..pos + 4).ok_or_else(|| XozError::BadFormat(
                "name mapping content truncated while reading an id".into(),
            ))?;
            let id = u32::from_le_bytes([id_bytes[0], id_bytes[1], id_bytes[2], id_bytes[3]]);
            pos += 4;
            let len = *buf.get(pos).ok_or_else(|| {
                XozError::BadFormat("name mapping content truncated before a name length".into())
            })? as usize;
            pos += 1;
            let name_bytes = buf
                .get(pos..pos + len)
                .ok_or_else(|| XozError::BadFormat("name mapping content truncated within a name".into()))?;
            let name = String::from_utf8(name_bytes.to_vec())
                .map_err(|_| XozError::BadFormat("name mapping entry is not valid UTF-8".into()))?;
            pos += len;
            fail_if_bad_values(id, &name)?;
            entries.insert(name, id);
        }
        self.entries = entries;
        Ok(())
    }

    /// Replace the whole mapping and recompute `num_entries`. Mirrors the
    /// original's `store()`: validates every entry, including temporary
    /// ones (they're validated but excluded from serialization).
    pub fn store(&mut self, map: BTreeMap<String, u32>) -> Result<()> {
        for (name, id) in &map {
            fail_if_bad_values(*id, name)?;
        }
        self.num_entries = map.keys().filter(|n| !is_temp_name(n)).count() as u16;
        self.entries = map;
        Ok(())
    }
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_NAME_PREFIX)
}

fn fail_if_bad_values(id: u32, name: &str) -> Result<()> {
    if id == 0 {
        return Err(XozError::BadDescriptor {
            dsc_type: NAME_MAPPING_TYPE,
            reason: "descriptor id '0' is not valid".into(),
        });
    }
    if id & 0x8000_0000 != 0 {
        return Err(XozError::BadDescriptor {
            dsc_type: NAME_MAPPING_TYPE,
            reason: "descriptor id must be persistent (high bit clear)".into(),
        });
    }
    if name.is_empty() {
        return Err(XozError::BadDescriptor {
            dsc_type: NAME_MAPPING_TYPE,
            reason: "name for the descriptor cannot be empty".into(),
        });
    }
    if name.len() > 255 {
        return Err(XozError::BadDescriptor {
            dsc_type: NAME_MAPPING_TYPE,
            reason: "name for the descriptor is too large".into(),
        });
    }
    if name == "/" || name == "." || name == ".." {
        return Err(XozError::BadDescriptor {
            dsc_type: NAME_MAPPING_TYPE,
            reason: "name for the descriptor is reserved".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_then_load_roundtrips_non_temp_entries() {
        let mut body = NameMappingBody::empty();
        let mut map = BTreeMap::new();
        map.insert("alpha".to_string(), 1);
        map.insert("beta".to_string(), 2);
        map.insert("~scratch".to_string(), 3);
        body.store(map).unwrap();

        let idata = body.write_specifics();
        let content = body.content_bytes().unwrap();

        let mut reloaded = NameMappingBody::empty();
        reloaded.read_specifics(&idata).unwrap();
        reloaded.load_content(&content).unwrap();

        let loaded = reloaded.load();
        assert_eq!(loaded.get("alpha"), Some(&1));
        assert_eq!(loaded.get("beta"), Some(&2));
        assert!(!loaded.contains_key("~scratch"));
    }

    #[test]
    fn zero_id_is_rejected() {
        let mut map = BTreeMap::new();
        map.insert("x".to_string(), 0);
        assert!(NameMappingBody::from_map(map).is_err());
    }

    #[test]
    fn temporal_id_is_rejected() {
        let mut map = BTreeMap::new();
        map.insert("x".to_string(), 0x8000_0001);
        assert!(NameMappingBody::from_map(map).is_err());
    }

    #[test]
    fn reserved_names_are_rejected() {
        for bad in ["/", ".", ".."] {
            let mut map = BTreeMap::new();
            map.insert(bad.to_string(), 1);
            assert!(NameMappingBody::from_map(map).is_err(), "{bad} should be rejected");
        }
    }
}
