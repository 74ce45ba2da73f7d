//! A `BlockArray` view restricted to the blocks named by a `Segment`,
//! letting a descriptor's content area be addressed with its own
//! block-relative numbering instead of the full file's.

use crate::block_array::BlockArray;
use crate::error::{Result, XozError};
use crate::extent::Extent;
use crate::segment::Segment;

pub struct SegmentBlockArray<'a, B: BlockArray> {
    backing: &'a mut B,
    segment: Segment,
    blk_cnt: u32,
}

impl<'a, B: BlockArray> SegmentBlockArray<'a, B> {
    /// Build a view over `segment`'s blocks. Only whole-block extents are
    /// supported: a descriptor's content area is always block-aligned, so
    /// a sub-block extent appearing here indicates a caller error.
    pub fn new(backing: &'a mut B, segment: Segment) -> Result<Self> {
        let mut blk_cnt = 0u32;
        for ext in &segment.extents {
            if ext.is_suballoc() {
                return Err(XozError::InternalBug(
                    "SegmentBlockArray does not support sub-block extents".into(),
                ));
            }
            blk_cnt += ext.blk_span();
        }
        Ok(SegmentBlockArray {
            backing,
            segment,
            blk_cnt,
        })
    }

    fn resolve(&self, blk_nr: u32) -> Result<u32> {
        let mut local = blk_nr;
        for ext in &self.segment.extents {
            let span = ext.blk_span();
            if local < span {
                return Ok(ext.blk_nr() + local);
            }
            local -= span;
        }
        Err(XozError::OutOfBounds {
            blk_nr,
            blk_cnt: 1,
            total_blocks: self.blk_cnt,
        })
    }
}

impl<'a, B: BlockArray> BlockArray for SegmentBlockArray<'a, B> {
    fn blk_sz(&self) -> u32 {
        self.backing.blk_sz()
    }

    fn blk_cnt(&self) -> u32 {
        self.blk_cnt
    }

    fn grow_by(&mut self, _extra_blks: u32) -> Result<u32> {
        Err(XozError::InternalBug(
            "a SegmentBlockArray cannot grow on its own; extend the owning segment instead".into(),
        ))
    }

    fn shrink_by(&mut self, _blks: u32) -> Result<()> {
        Err(XozError::InternalBug(
            "a SegmentBlockArray cannot shrink on its own; shrink the owning segment instead".into(),
        ))
    }

    fn read_blk(&mut self, blk_nr: u32, offset: u32, buf: &mut [u8]) -> Result<()> {
        let host = self.resolve(blk_nr)?;
        self.backing.read_blk(host, offset, buf)
    }

    fn write_blk(&mut self, blk_nr: u32, offset: u32, buf: &[u8]) -> Result<()> {
        let host = self.resolve(blk_nr)?;
        self.backing.write_blk(host, offset, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_array::{FileBackend, FileBlockArray};
    use std::io::Cursor;

    #[test]
    fn reads_map_to_the_right_host_block() {
        let mut backing = FileBlockArray::new(FileBackend::Memory(Cursor::new(Vec::new())), 16, 0, 0);
        backing.grow_by(10).unwrap();
        backing.write_blk(7, 0, b"seven!!").unwrap();

        let segment = Segment::with_extents(vec![Extent::WholeBlock {
            blk_nr: 5,
            blk_cnt: 4,
        }]);
        let mut view = SegmentBlockArray::new(&mut backing, segment).unwrap();
        assert_eq!(view.blk_cnt(), 4);
        let mut buf = [0u8; 7];
        view.read_blk(2, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"seven!!");
    }
}
