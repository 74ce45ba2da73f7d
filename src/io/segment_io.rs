//! Reads and writes the scattered extents (and optional inline-data tail)
//! of a `Segment` as one continuous byte stream.

use crate::block_array::BlockArray;
use crate::error::{Result, XozError};
use crate::extent::Extent;
use crate::io::{IoBase, IoState};
use crate::segment::Segment;

struct ExtPtr {
    host_blk_nr: u32,
    intra_offset: u32,
    remain: u32,
}

/// Reads/writes the data held by a `Segment`, stitching its (possibly
/// discontinuous, possibly out-of-order) extents plus optional inline tail
/// into one continuous address space.
///
/// Takes a mutable reference to the segment because reads/writes of the
/// inline-data tail touch the segment's own bytes directly; the segment
/// must outlive and must not move while this `IoSegment` is alive.
pub struct IoSegment<'a, B: BlockArray> {
    blkarr: &'a mut B,
    sg: &'a mut Segment,
    sg_no_inline_sz: u32,
    begin_positions: Vec<u32>,
    state: IoState,
    /// First malformed extent found at construction time (e.g. a sub-block
    /// extent with an empty bitmap). Such an extent has a `data_size` of 0,
    /// so it would otherwise vanish from `sg_no_inline_sz`/`begin_positions`
    /// instead of ever being walked into; remembered here so the first
    /// read/write still surfaces it as `OutOfBounds`.
    invalid_extent: Option<Extent>,
}

impl<'a, B: BlockArray> IoSegment<'a, B> {
    pub fn new(blkarr: &'a mut B, sg: &'a mut Segment) -> Self {
        let blk_sz = blkarr.blk_sz();
        let mut begin_positions = Vec::with_capacity(sg.extents.len());
        let mut acc = 0u32;
        let mut invalid_extent = None;
        for ext in &sg.extents {
            if invalid_extent.is_none() && ext.validate().is_err() {
                invalid_extent = Some(*ext);
            }
            begin_positions.push(acc);
            acc += ext.data_size(blk_sz) as u32;
        }
        let sg_no_inline_sz = acc;
        let inline_sz = sg.inline_data.as_ref().map_or(0, |d| d.len() as u32);
        let total = sg_no_inline_sz + inline_sz;
        IoSegment {
            blkarr,
            sg,
            sg_no_inline_sz,
            begin_positions,
            state: IoState::new(total),
            invalid_extent,
        }
    }

    /// An independent clone sharing the same segment and block array, with
    /// its own read/write cursors initialized to this `IoSegment`'s
    /// current positions.
    pub fn dup<'b>(&'b mut self) -> IoSegment<'b, B> {
        let mut dup = IoSegment::new(self.blkarr, self.sg);
        dup.state.rd = self.state.rd;
        dup.state.wr = self.state.wr;
        dup
    }

    /// Fill the whole data space addressed by `sg` with byte `c`.
    pub fn fill_c(blkarr: &'a mut B, sg: &'a mut Segment, c: u8, include_inline: bool) -> Result<()> {
        let sz = {
            let blk_sz = blkarr.blk_sz();
            sg.extents.iter().map(|e| e.data_size(blk_sz)).sum::<u64>() as u32
        };
        let mut io = IoSegment::new(blkarr, sg);
        io.fill(c, sz)?;
        if include_inline {
            if let Some(data) = io.sg.inline_data.as_mut() {
                for b in data.iter_mut() {
                    *b = c;
                }
            }
        }
        Ok(())
    }

    fn abs_pos_to_ext(&self, pos: u32) -> Result<Option<ExtPtr>> {
        if pos >= self.sg_no_inline_sz {
            return Ok(None);
        }
        let blk_sz = self.blkarr.blk_sz();
        let idx = match self.begin_positions.binary_search(&pos) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let ext = &self.sg.extents[idx];
        ext.validate()?;
        let local = pos - self.begin_positions[idx];
        Ok(Some(match ext {
            Extent::WholeBlock { blk_nr, .. } => {
                let blk_off = local / blk_sz;
                let intra_offset = local % blk_sz;
                ExtPtr {
                    host_blk_nr: blk_nr + blk_off,
                    intra_offset,
                    remain: blk_sz - intra_offset,
                }
            }
            Extent::SubBlock { blk_nr, .. } => {
                let subblk_sz = blk_sz / 16;
                let bits = ext.subblock_indices();
                let sub_idx = (local / subblk_sz) as usize;
                let bit = bits[sub_idx] as u32;
                let within = local % subblk_sz;
                ExtPtr {
                    host_blk_nr: *blk_nr,
                    intra_offset: bit * subblk_sz + within,
                    remain: subblk_sz - within,
                }
            }
        }))
    }
}

impl<'a, B: BlockArray> IoBase for IoSegment<'a, B> {
    fn io_state(&self) -> &IoState {
        &self.state
    }

    fn io_state_mut(&mut self) -> &mut IoState {
        &mut self.state
    }

    fn rw_operation(&mut self, is_read_op: bool, data: &mut [u8]) -> Result<u32> {
        if let Some(ext) = &self.invalid_extent {
            if !data.is_empty() {
                return Err(XozError::OutOfBounds {
                    blk_nr: ext.blk_nr(),
                    blk_cnt: 0,
                    total_blocks: 0,
                });
            }
        }
        let pos = if is_read_op { self.state.rd } else { self.state.wr };
        let max_sz = data.len() as u32;
        let mut done = 0u32;

        while done < max_sz {
            let cur = pos + done;
            if cur < self.sg_no_inline_sz {
                let ptr = match self.abs_pos_to_ext(cur)? {
                    Some(p) => p,
                    None => break,
                };
                let n = (max_sz - done).min(ptr.remain);
                if is_read_op {
                    self.blkarr
                        .read_blk(ptr.host_blk_nr, ptr.intra_offset, &mut data[done as usize..(done + n) as usize])?;
                } else {
                    self.blkarr
                        .write_blk(ptr.host_blk_nr, ptr.intra_offset, &data[done as usize..(done + n) as usize])?;
                }
                done += n;
            } else {
                // Inline-data region.
                let inline_off = (cur - self.sg_no_inline_sz) as usize;
                let Some(inline) = self.sg.inline_data.as_mut() else {
                    break;
                };
                if inline_off >= inline.len() {
                    break;
                }
                let n = ((max_sz - done) as usize).min(inline.len() - inline_off);
                if is_read_op {
                    data[done as usize..done as usize + n]
                        .copy_from_slice(&inline[inline_off..inline_off + n]);
                } else {
                    inline[inline_off..inline_off + n]
                        .copy_from_slice(&data[done as usize..done as usize + n]);
                }
                done += n as u32;
            }
        }

        if is_read_op {
            self.state.rd += done;
        } else {
            self.state.wr += done;
        }
        Ok(done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_array::{FileBackend, FileBlockArray};
    use std::io::Cursor;

    #[test]
    fn reads_and_writes_across_two_extents() {
        let mut backing = FileBlockArray::new(FileBackend::Memory(Cursor::new(Vec::new())), 8, 0, 0);
        backing.grow_by(4).unwrap();

        let mut sg = Segment::with_extents(vec![
            Extent::WholeBlock {
                blk_nr: 0,
                blk_cnt: 1,
            },
            Extent::WholeBlock {
                blk_nr: 2,
                blk_cnt: 1,
            },
        ]);

        {
            let mut io = IoSegment::new(&mut backing, &mut sg);
            io.writeall(b"ABCDEFGH").unwrap();
        }

        let mut sg2 = sg.clone();
        let mut io2 = IoSegment::new(&mut backing, &mut sg2);
        let mut buf = [0u8; 8];
        io2.readall(&mut buf).unwrap();
        assert_eq!(&buf, b"ABCDEFGH");
    }

    #[test]
    fn a_sub_block_extent_with_an_empty_bitmap_is_rejected_on_read() {
        let mut backing = FileBlockArray::new(FileBackend::Memory(Cursor::new(Vec::new())), 32, 0, 0);
        backing.grow_by(1).unwrap();

        let mut sg = Segment::with_extents(vec![Extent::SubBlock { blk_nr: 0, bitmap: 0 }]);
        let mut io = IoSegment::new(&mut backing, &mut sg);
        let mut buf = [0u8; 2];
        let err = io.readall(&mut buf).unwrap_err();
        assert!(matches!(err, crate::error::XozError::OutOfBounds { .. }));
    }

    #[test]
    fn inline_data_is_part_of_the_stream() {
        let mut backing = FileBlockArray::new(FileBackend::Memory(Cursor::new(Vec::new())), 8, 0, 0);
        backing.grow_by(1).unwrap();

        let mut sg = Segment::with_extents(vec![Extent::WholeBlock {
            blk_nr: 0,
            blk_cnt: 1,
        }]);
        sg.set_inline_data(vec![0u8; 3]).unwrap();

        let mut io = IoSegment::new(&mut backing, &mut sg);
        io.writeall(b"12345678XYZ").unwrap();
        assert_eq!(sg.inline_data.as_deref(), Some(&b"XYZ"[..]));
    }
}
