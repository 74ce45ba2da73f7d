//! Descriptor codec: the header word, id, content parts, and idata shared
//! by every descriptor, plus the small set of concrete descriptor bodies
//! this crate ships.
//!
//! Descriptor types are dispatched by a tag (`dsc_type`), not by trait
//! objects: the handful of built-in kinds are plain enum variants, and
//! only application-registered custom types pay for a `Box<dyn ..>`.

mod id_mapping;
mod opaque;
mod registry;
pub mod set;

pub use id_mapping::NameMappingBody;
pub use opaque::OpaqueBody;
pub use registry::{DescriptorRegistry, DSET_SUBCLASS_MAX_TYPE, DSET_SUBCLASS_MIN_TYPE, DSET_TYPE};
pub use set::DescriptorSetBody;

use crate::error::{Result, XozError};
use crate::segment::Segment;

pub const ID_TEMPORAL_BIT: u32 = 0x8000_0000;
const MAX_ISIZE: usize = 127;
const MAX_TYPE_EX_THRESHOLD: u16 = 0x1fff;

/// A content part: the byte length actually in use, plus the segment its
/// bytes live in (which may be larger than `csize` once rounded to the
/// allocator's granularity).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentPart {
    pub csize: u32,
    pub segment: Segment,
}

#[derive(Debug, Clone)]
pub struct DescriptorMeta {
    pub dsc_type: u16,
    pub id: Option<u32>,
    pub content: Vec<ContentPart>,
    /// Idata bytes belonging to fields this build doesn't know about,
    /// preserved byte-for-byte across a read/write round trip.
    pub future_idata: Vec<u8>,
}

impl DescriptorMeta {
    pub fn is_id_temporal(&self) -> bool {
        matches!(self.id, Some(id) if id & ID_TEMPORAL_BIT != 0)
    }

    pub fn is_id_persistent(&self) -> bool {
        matches!(self.id, Some(id) if id & ID_TEMPORAL_BIT == 0)
    }
}

/// Hook implemented by application-registered descriptor types. The
/// built-in kinds (opaque pass-through, name mapping, descriptor set)
/// don't need this — they're plain `DescriptorBody` variants.
pub trait CustomDescriptor: std::fmt::Debug {
    fn write_specifics(&self) -> Vec<u8>;
    fn read_specifics(&mut self, buf: &[u8]) -> Result<usize>;

    /// Bytes to store in this descriptor's (first) content part. Types
    /// with no content of their own can rely on the default empty body.
    fn content_bytes(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Populate in-memory state from previously-written content bytes.
    fn load_content(&mut self, _buf: &[u8]) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub enum DescriptorBody {
    Opaque(OpaqueBody),
    NameMapping(NameMappingBody),
    Set(DescriptorSetBody),
    Custom(Box<dyn CustomDescriptor>),
}

impl DescriptorBody {
    fn write_specifics(&self) -> Vec<u8> {
        match self {
            DescriptorBody::Opaque(b) => b.write_specifics(),
            DescriptorBody::NameMapping(b) => b.write_specifics(),
            DescriptorBody::Set(b) => b.write_specifics(),
            DescriptorBody::Custom(b) => b.write_specifics(),
        }
    }

    fn read_specifics(&mut self, buf: &[u8]) -> Result<usize> {
        match self {
            DescriptorBody::Opaque(b) => b.read_specifics(buf),
            DescriptorBody::NameMapping(b) => b.read_specifics(buf),
            DescriptorBody::Set(b) => b.read_specifics(buf),
            DescriptorBody::Custom(b) => b.read_specifics(buf),
        }
    }

    /// Bytes for this descriptor's (sole, first) content part, for the
    /// kinds whose content is managed generically by `DescriptorRecord`
    /// rather than by a containing `DescriptorSet` (i.e. everything
    /// except `Set`, whose children catalog is written directly by
    /// `dsc::set::DescriptorSet::full_sync`).
    pub fn content_bytes(&self) -> Result<Vec<u8>> {
        match self {
            DescriptorBody::Opaque(b) => Ok(b.content_bytes()),
            DescriptorBody::NameMapping(b) => b.content_bytes(),
            DescriptorBody::Set(_) => Ok(Vec::new()),
            DescriptorBody::Custom(b) => Ok(b.content_bytes()),
        }
    }

    pub fn load_content(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            DescriptorBody::Opaque(b) => b.load_content(buf),
            DescriptorBody::NameMapping(b) => b.load_content(buf),
            DescriptorBody::Set(_) => Ok(()),
            DescriptorBody::Custom(b) => b.load_content(buf),
        }
    }

    pub fn is_descriptor_set(&self) -> bool {
        matches!(self, DescriptorBody::Set(_))
    }
}

#[derive(Debug)]
pub struct DescriptorRecord {
    pub meta: DescriptorMeta,
    pub body: DescriptorBody,
}

impl DescriptorRecord {
    pub fn new(dsc_type: u16, body: DescriptorBody) -> Self {
        DescriptorRecord {
            meta: DescriptorMeta {
                dsc_type,
                id: None,
                content: Vec::new(),
                future_idata: Vec::new(),
            },
            body,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let type_ex_present = self.meta.dsc_type > MAX_TYPE_EX_THRESHOLD;
        let has_content = !self.meta.content.is_empty();

        let mut w0: u16 = 0;
        if type_ex_present {
            w0 |= 1 << 0;
        } else {
            w0 |= (self.meta.dsc_type & 0x1fff) << 1;
        }
        if has_content {
            w0 |= 1 << 14;
        }
        if self.meta.id.is_none() {
            w0 |= 1 << 15;
        }
        out.extend_from_slice(&w0.to_le_bytes());
        if type_ex_present {
            out.extend_from_slice(&self.meta.dsc_type.to_le_bytes());
        }
        if let Some(id) = self.meta.id {
            out.extend_from_slice(&id.to_le_bytes());
        }

        let mut idata = self.body.write_specifics();
        idata.extend_from_slice(&self.meta.future_idata);
        if idata.len() > MAX_ISIZE {
            return Err(XozError::BadDescriptor {
                dsc_type: self.meta.dsc_type,
                reason: format!("idata of {} bytes exceeds the {} byte limit", idata.len(), MAX_ISIZE),
            });
        }
        out.push(idata.len() as u8);

        if has_content {
            if self.meta.content.len() > u8::MAX as usize {
                return Err(XozError::BadDescriptor {
                    dsc_type: self.meta.dsc_type,
                    reason: format!("{} content parts exceeds the 255 part limit", self.meta.content.len()),
                });
            }
            out.push(self.meta.content.len() as u8);
        }
        for part in &self.meta.content {
            out.extend_from_slice(&part.csize.to_le_bytes());
            part.segment.encode(&mut out, false);
        }

        out.extend_from_slice(&idata);
        Ok(out)
    }

    pub fn decode(buf: &[u8], registry: &DescriptorRegistry) -> Result<(DescriptorRecord, usize)> {
        let mut pos = 0usize;
        let w0 = read_u16(buf, &mut pos)?;
        let type_ex_present = w0 & 1 != 0;
        let has_content = w0 & (1 << 14) != 0;
        let id_absent = w0 & (1 << 15) != 0;

        let dsc_type = if type_ex_present {
            read_u16(buf, &mut pos)?
        } else {
            (w0 >> 1) & 0x1fff
        };

        let id = if id_absent {
            None
        } else {
            Some(read_u32(buf, &mut pos)?)
        };

        let isize_lo = *byte_at(buf, pos)? as usize;
        pos += 1;

        let cpart_cnt = if has_content {
            let n = *byte_at(buf, pos)? as usize;
            pos += 1;
            n
        } else {
            0
        };

        let mut content = Vec::with_capacity(cpart_cnt);
        for _ in 0..cpart_cnt {
            let csize = read_u32(buf, &mut pos)?;
            let (segment, consumed) = Segment::decode(&buf[pos..])?;
            pos += consumed;
            content.push(ContentPart { csize, segment });
        }

        let idata = buf
            .get(pos..pos + isize_lo)
            .ok_or_else(|| XozError::BadFormat("descriptor truncated within idata".into()))?
            .to_vec();
        pos += isize_lo;

        let mut body = registry.create(dsc_type)?;
        let specifics_consumed = body.read_specifics(&idata)?;
        if specifics_consumed > idata.len() {
            return Err(XozError::InternalBug(format!(
                "descriptor type {dsc_type} consumed more idata than was present"
            )));
        }
        let future_idata = idata[specifics_consumed..].to_vec();

        Ok((
            DescriptorRecord {
                meta: DescriptorMeta {
                    dsc_type,
                    id,
                    content,
                    future_idata,
                },
                body,
            },
            pos,
        ))
    }
}

fn byte_at(buf: &[u8], pos: usize) -> Result<&u8> {
    buf.get(pos)
        .ok_or_else(|| XozError::BadFormat("descriptor truncated".into()))
}

fn read_u16(buf: &[u8], pos: &mut usize) -> Result<u16> {
    let bytes = buf
        .get(*pos..*pos + 2)
        .ok_or_else(|| XozError::BadFormat("descriptor truncated while reading a u16 field".into()))?;
    *pos += 2;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32> {
    let bytes = buf
        .get(*pos..*pos + 4)
        .ok_or_else(|| XozError::BadFormat("descriptor truncated while reading a u32 field".into()))?;
    *pos += 4;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsc::opaque::OpaqueBody;

    #[test]
    fn opaque_descriptor_roundtrips_through_the_registry() {
        let registry = DescriptorRegistry::new();
        let mut rec = DescriptorRecord::new(0x0500, DescriptorBody::Opaque(OpaqueBody::from_idata(vec![1, 2, 3])));
        rec.meta.id = Some(42);
        let bytes = rec.encode().unwrap();
        let (decoded, consumed) = DescriptorRecord::decode(&bytes, &registry).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.meta.dsc_type, 0x0500);
        assert_eq!(decoded.meta.id, Some(42));
        match decoded.body {
            DescriptorBody::Opaque(b) => assert_eq!(b.idata(), &[1, 2, 3]),
            _ => panic!("expected an opaque body"),
        }
    }

    #[test]
    fn descriptor_with_extended_type_roundtrips() {
        let registry = DescriptorRegistry::new();
        let rec = DescriptorRecord::new(0x2000, DescriptorBody::Opaque(OpaqueBody::from_idata(vec![])));
        let bytes = rec.encode().unwrap();
        let (decoded, _) = DescriptorRecord::decode(&bytes, &registry).unwrap();
        assert_eq!(decoded.meta.dsc_type, 0x2000);
    }

    #[test]
    fn unknown_future_idata_is_preserved_across_a_roundtrip() {
        let registry = DescriptorRegistry::new();
        let mut rec = DescriptorRecord::new(0x0500, DescriptorBody::Opaque(OpaqueBody::from_idata(vec![9, 9])));
        rec.meta.future_idata = vec![0xaa, 0xbb];
        let bytes = rec.encode().unwrap();
        let (decoded, _) = DescriptorRecord::decode(&bytes, &registry).unwrap();
        assert_eq!(decoded.meta.future_idata, vec![0xaa, 0xbb]);
    }
}
