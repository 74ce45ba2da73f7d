//! Extent codec.
//!
//! An extent names either a run of whole blocks or a single block's
//! sub-block bitmap. The bit layout committed to here is documented in
//! `SPEC_FULL.md` §4.1.

use crate::error::{Result, XozError};

const IS_SUBALLOC: u16 = 1 << 0;
const HI_CNT_PRESENT: u16 = 1 << 1;
const INLINE_CNT_SHIFT: u16 = 2;
const INLINE_CNT_MASK: u16 = 0x3f;
const BLK_NR_HI_PRESENT: u16 = 1 << 8;

const MAX_INLINE_BLK_CNT: u16 = 0x3f;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extent {
    /// A contiguous run of `blk_cnt` whole blocks starting at `blk_nr`.
    WholeBlock { blk_nr: u32, blk_cnt: u16 },
    /// A single block's sub-block allocation, one bit per sub-block.
    SubBlock { blk_nr: u32, bitmap: u16 },
}

impl Extent {
    pub fn blk_nr(&self) -> u32 {
        match self {
            Extent::WholeBlock { blk_nr, .. } => *blk_nr,
            Extent::SubBlock { blk_nr, .. } => *blk_nr,
        }
    }

    pub fn is_suballoc(&self) -> bool {
        matches!(self, Extent::SubBlock { .. })
    }

    /// A sub-block extent with an empty bitmap addresses no sub-blocks at
    /// all, so it can never be a legitimate allocation; treat it as
    /// out-of-bounds rather than silently letting it contribute zero bytes
    /// to whatever segment holds it.
    pub fn validate(&self) -> Result<()> {
        if let Extent::SubBlock { blk_nr, bitmap: 0 } = self {
            return Err(XozError::OutOfBounds {
                blk_nr: *blk_nr,
                blk_cnt: 0,
                total_blocks: 0,
            });
        }
        Ok(())
    }

    /// Number of whole blocks this extent spans (1 for a sub-block extent,
    /// since it still occupies exactly one host block).
    pub fn blk_span(&self) -> u32 {
        match self {
            Extent::WholeBlock { blk_cnt, .. } => *blk_cnt as u32,
            Extent::SubBlock { .. } => 1,
        }
    }

    /// Bytes of actual data this extent addresses, given a block size.
    pub fn data_size(&self, blk_sz: u32) -> u64 {
        match self {
            Extent::WholeBlock { blk_cnt, .. } => *blk_cnt as u64 * blk_sz as u64,
            Extent::SubBlock { bitmap, .. } => {
                bitmap.count_ones() as u64 * (blk_sz / 16) as u64
            }
        }
    }

    /// Bit indices (0..16), ascending, of the sub-blocks this extent
    /// covers. Empty for a whole-block extent.
    pub fn subblock_indices(&self) -> Vec<u16> {
        match self {
            Extent::WholeBlock { .. } => Vec::new(),
            Extent::SubBlock { bitmap, .. } => (0..16).filter(|i| bitmap & (1 << i) != 0).collect(),
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut w0: u16 = 0;
        let blk_nr = self.blk_nr();
        let blk_nr_hi = blk_nr > 0xffff;
        if blk_nr_hi {
            w0 |= BLK_NR_HI_PRESENT;
        }

        match self {
            Extent::SubBlock { .. } => {
                w0 |= IS_SUBALLOC;
                out.extend_from_slice(&w0.to_le_bytes());
            }
            Extent::WholeBlock { blk_cnt, .. } => {
                let hi_present = *blk_cnt > MAX_INLINE_BLK_CNT;
                if hi_present {
                    w0 |= HI_CNT_PRESENT;
                } else {
                    w0 |= (*blk_cnt & INLINE_CNT_MASK) << INLINE_CNT_SHIFT;
                }
                out.extend_from_slice(&w0.to_le_bytes());
                if hi_present {
                    out.extend_from_slice(&blk_cnt.to_le_bytes());
                }
            }
        }

        if blk_nr_hi {
            out.extend_from_slice(&blk_nr.to_le_bytes());
        } else {
            out.extend_from_slice(&(blk_nr as u16).to_le_bytes());
        }

        if let Extent::SubBlock { bitmap, .. } = self {
            out.extend_from_slice(&bitmap.to_le_bytes());
        }
    }

    /// Decode one extent from the front of `buf`, returning it along with
    /// the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Extent, usize)> {
        let mut pos = 0usize;
        let w0 = read_u16(buf, &mut pos)?;

        let is_suballoc = w0 & IS_SUBALLOC != 0;
        let hi_cnt_present = w0 & HI_CNT_PRESENT != 0;
        let blk_nr_hi_present = w0 & BLK_NR_HI_PRESENT != 0;

        let blk_cnt = if !is_suballoc {
            if hi_cnt_present {
                read_u16(buf, &mut pos)?
            } else {
                (w0 >> INLINE_CNT_SHIFT) & INLINE_CNT_MASK
            }
        } else {
            0
        };

        let blk_nr = if blk_nr_hi_present {
            read_u32(buf, &mut pos)?
        } else {
            read_u16(buf, &mut pos)? as u32
        };

        let extent = if is_suballoc {
            let bitmap = read_u16(buf, &mut pos)?;
            Extent::SubBlock { blk_nr, bitmap }
        } else {
            Extent::WholeBlock { blk_nr, blk_cnt }
        };
        extent.validate()?;

        Ok((extent, pos))
    }
}

fn read_u16(buf: &[u8], pos: &mut usize) -> Result<u16> {
    let bytes = buf
        .get(*pos..*pos + 2)
        .ok_or_else(|| XozError::BadFormat("extent truncated while reading a u16 field".into()))?;
    *pos += 2;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32> {
    let bytes = buf
        .get(*pos..*pos + 4)
        .ok_or_else(|| XozError::BadFormat("extent truncated while reading a u32 field".into()))?;
    *pos += 4;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
