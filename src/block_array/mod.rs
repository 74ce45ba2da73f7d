//! Fixed-size block storage: the foundation `IoSegment` and the allocator
//! read and write against.

mod file_array;
mod segment_array;

pub use file_array::{FileBackend, FileBlockArray};
pub use segment_array::SegmentBlockArray;

use crate::error::Result;

/// A block-addressable store of `blk_sz()`-byte blocks.
///
/// Implementors need not keep the whole array resident; `grow_by` is the
/// only mutation to the array's shape, everything else is a read or write
/// of up to one block's worth of bytes at a given intra-block offset.
pub trait BlockArray {
    fn blk_sz(&self) -> u32;

    /// Number of blocks currently addressable.
    fn blk_cnt(&self) -> u32;

    /// Grow the array by `extra_blks` blocks, zero-initialized. Returns
    /// the block number of the first newly added block.
    fn grow_by(&mut self, extra_blks: u32) -> Result<u32>;

    /// Shrink the array by `blks` blocks, releasing the tail. The caller
    /// (the allocator) is responsible for only shrinking blocks it knows
    /// to be free.
    fn shrink_by(&mut self, blks: u32) -> Result<()>;

    /// Read `buf.len()` bytes from block `blk_nr` starting at `offset`
    /// bytes into that block. The caller must ensure
    /// `offset + buf.len() <= blk_sz()`.
    fn read_blk(&mut self, blk_nr: u32, offset: u32, buf: &mut [u8]) -> Result<()>;

    /// Write `buf` into block `blk_nr` starting at `offset` bytes into
    /// that block. The caller must ensure `offset + buf.len() <= blk_sz()`.
    fn write_blk(&mut self, blk_nr: u32, offset: u32, buf: &[u8]) -> Result<()>;
}
