//! Segment codec: an ordered list of extents plus an optional inline-data
//! tail and an optional explicit end-of-segment terminator.
//!
//! Layout is documented in `SPEC_FULL.md` §4.1.

use crate::error::{Result, XozError};
use crate::extent::Extent;

const HAS_INLINE: u8 = 1 << 6;
const END_OF_SEGMENT: u8 = 1 << 7;
const COUNT_MASK: u8 = 0x3f;
const COUNT_ESCAPE: u8 = 0x3f;

pub const MAX_INLINE_SZ: usize = 63;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segment {
    pub extents: Vec<Extent>,
    pub inline_data: Option<Vec<u8>>,
    /// Whether this segment must carry an explicit terminator when
    /// serialized outside of a length-prefixed context.
    pub end_of_segment: bool,
}

impl Segment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extents(extents: Vec<Extent>) -> Self {
        Segment {
            extents,
            inline_data: None,
            end_of_segment: false,
        }
    }

    pub fn set_inline_data(&mut self, data: Vec<u8>) -> Result<()> {
        if data.len() > MAX_INLINE_SZ {
            return Err(XozError::BadFormat(format!(
                "inline data of {} bytes exceeds the {} byte limit",
                data.len(),
                MAX_INLINE_SZ
            )));
        }
        self.inline_data = Some(data);
        Ok(())
    }

    /// Total size, in bytes, of the data this segment addresses: the sum
    /// of every extent's block span in bytes plus any inline-data bytes.
    pub fn data_size(&self, blk_sz: u32) -> u64 {
        let extents_sz: u64 = self.extents.iter().map(|e| e.data_size(blk_sz)).sum();
        extents_sz + self.inline_data.as_ref().map_or(0, |d| d.len() as u64)
    }

    /// Size, in bytes, this segment occupies once serialized.
    pub fn footprint(&self) -> usize {
        let mut buf = Vec::new();
        self.encode(&mut buf, true);
        buf.len()
    }

    /// Encode this segment. `terminated` selects whether the trailer is
    /// always written with `END_OF_SEGMENT` forced on (for unframed
    /// contexts) or only written when inline data is present (for
    /// length-prefixed contexts, where the caller's own framing marks the
    /// end).
    pub fn encode(&self, out: &mut Vec<u8>, terminated: bool) {
        let mut hdr = 0u8;
        let n = self.extents.len();
        if n >= COUNT_ESCAPE as usize {
            hdr |= COUNT_ESCAPE;
        } else {
            hdr |= n as u8 & COUNT_MASK;
        }
        let write_trailer = self.inline_data.is_some() || (terminated && self.end_of_segment);
        if self.inline_data.is_some() {
            hdr |= HAS_INLINE;
        }
        if terminated && self.end_of_segment {
            hdr |= END_OF_SEGMENT;
        }
        out.push(hdr);
        if n >= COUNT_ESCAPE as usize {
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        for ext in &self.extents {
            ext.encode(out);
        }
        if write_trailer {
            if let Some(data) = &self.inline_data {
                out.push(data.len() as u8);
                out.extend_from_slice(data);
            } else {
                out.push(0);
            }
        }
    }

    /// Decode a segment from the front of `buf`, returning it together
    /// with the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Segment, usize)> {
        let hdr = *buf
            .first()
            .ok_or_else(|| XozError::BadFormat("segment truncated before header byte".into()))?;
        let mut pos = 1usize;

        let has_inline = hdr & HAS_INLINE != 0;
        let end_of_segment = hdr & END_OF_SEGMENT != 0;
        let inline_count = hdr & COUNT_MASK;

        let count = if inline_count == COUNT_ESCAPE {
            let bytes = buf.get(pos..pos + 2).ok_or_else(|| {
                XozError::BadFormat("segment truncated while reading extended extent count".into())
            })?;
            pos += 2;
            u16::from_le_bytes([bytes[0], bytes[1]]) as usize
        } else {
            inline_count as usize
        };

        let mut extents = Vec::with_capacity(count);
        for _ in 0..count {
            let (ext, consumed) = Extent::decode(&buf[pos..])?;
            extents.push(ext);
            pos += consumed;
        }

        let inline_data = if has_inline {
            let len = *buf.get(pos).ok_or_else(|| {
                XozError::BadFormat("segment truncated before inline data length".into())
            })? as usize;
            pos += 1;
            let data = buf
                .get(pos..pos + len)
                .ok_or_else(|| XozError::BadFormat("segment truncated within inline data".into()))?
                .to_vec();
            pos += len;
            Some(data)
        } else {
            None
        };

        Ok((
            Segment {
                extents,
                inline_data,
                end_of_segment,
            },
            pos,
        ))
    }
}
