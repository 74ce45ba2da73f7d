//! Byte-stream abstraction over a discontinuous backing store.
//!
//! `IoBase` gives every concrete stream (a byte span, a segment's scattered
//! extents, a restricted slice of another stream) independent read and
//! write cursors, clampable limits, and a common set of read/write helpers.
//! Seeking never errors: positions are clamped into the current limits,
//! mirroring the behavior documented on the original `iobase` contract.

mod restricted;
mod segment_io;
mod span;

pub use restricted::{IoRestricted, ReadOnly, WriteOnly};
pub use segment_io::IoSegment;
pub use span::IoSpan;

use crate::error::{Result, XozError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seekdir {
    Beg,
    End,
    Fwd,
    Bwd,
}

/// Cursor and limit bookkeeping shared by every `IoBase` implementation.
#[derive(Debug, Clone)]
pub struct IoState {
    pub(crate) src_sz: u32,
    pub(crate) rd: u32,
    pub(crate) wr: u32,
    pub(crate) rd_min: u32,
    pub(crate) rd_end: u32,
    pub(crate) wr_min: u32,
    pub(crate) wr_end: u32,
    pub(crate) read_only: bool,
}

impl IoState {
    pub fn new(src_sz: u32) -> Self {
        IoState {
            src_sz,
            rd: 0,
            wr: 0,
            rd_min: 0,
            rd_end: src_sz,
            wr_min: 0,
            wr_end: src_sz,
            read_only: false,
        }
    }

    pub(crate) fn rd(&self) -> u32 {
        self.rd
    }

    pub(crate) fn wr(&self) -> u32 {
        self.wr
    }

    pub(crate) fn bump_rd(&mut self, n: u32) {
        self.rd += n;
    }

    pub(crate) fn bump_wr(&mut self, n: u32) {
        self.wr += n;
    }
}

fn calc_seek(cur: u32, pos: i64, way: Seekdir, min: u32, end: u32) -> u32 {
    let target: i64 = match way {
        Seekdir::Beg => pos,
        Seekdir::End => end as i64 + pos,
        Seekdir::Fwd => cur as i64 + pos,
        Seekdir::Bwd => cur as i64 - pos,
    };
    target.clamp(min as i64, end as i64) as u32
}

/// A discontinuous, bounded byte stream with independent read/write
/// cursors.
///
/// Implementors provide storage access through `rw_operation`; every other
/// method is derived from it plus the shared cursor/limit bookkeeping in
/// `IoState`.
pub trait IoBase {
    fn io_state(&self) -> &IoState;
    fn io_state_mut(&mut self) -> &mut IoState;

    /// Read (`is_read_op = true`) into `data`, filling it from the current
    /// read cursor, or write (`is_read_op = false`) `data` at the current
    /// write cursor. Returns the number of bytes actually transferred,
    /// which may be less than `data.len()` if the stream runs out of
    /// room; advancing the appropriate cursor is the implementor's
    /// responsibility.
    fn rw_operation(&mut self, is_read_op: bool, data: &mut [u8]) -> Result<u32>;

    fn src_sz(&self) -> u32 {
        self.io_state().src_sz
    }

    fn tell_rd(&self) -> u32 {
        self.io_state().rd
    }

    fn tell_wr(&self) -> u32 {
        self.io_state().wr
    }

    fn remain_rd(&self) -> u32 {
        let st = self.io_state();
        st.rd_end.saturating_sub(st.rd)
    }

    fn remain_wr(&self) -> u32 {
        let st = self.io_state();
        st.wr_end.saturating_sub(st.wr)
    }

    fn is_read_only(&self) -> bool {
        self.io_state().read_only
    }

    fn seek_rd(&mut self, pos: i64, way: Seekdir) {
        let st = self.io_state();
        let new = calc_seek(st.rd, pos, way, st.rd_min, st.rd_end);
        self.io_state_mut().rd = new;
    }

    fn seek_wr(&mut self, pos: i64, way: Seekdir) {
        let st = self.io_state();
        let new = calc_seek(st.wr, pos, way, st.wr_min, st.wr_end);
        self.io_state_mut().wr = new;
    }

    fn limit_rd(&mut self, min_pos: u32, new_sz: u32) {
        let st = self.io_state_mut();
        st.rd_min = min_pos;
        st.rd_end = min_pos + new_sz;
        st.rd = st.rd.clamp(st.rd_min, st.rd_end);
    }

    fn limit_wr(&mut self, min_pos: u32, new_sz: u32) {
        let st = self.io_state_mut();
        st.wr_min = min_pos;
        st.wr_end = min_pos + new_sz;
        st.wr = st.wr.clamp(st.wr_min, st.wr_end);
    }

    /// Remove write access from this point on, without marking it
    /// permanent (callers may still call `limit_wr` again afterwards).
    fn limit_to_read_only(&mut self) {
        let at = self.tell_wr();
        self.limit_wr(at, 0);
    }

    /// Permanently disallow writes.
    fn turn_read_only(&mut self) {
        self.limit_to_read_only();
        self.io_state_mut().read_only = true;
    }

    fn readall(&mut self, buf: &mut [u8]) -> Result<()> {
        let got = self.rw_operation(true, buf)?;
        if got as usize != buf.len() {
            return Err(XozError::UnexpectedShorten {
                requested: buf.len() as u64,
                available: self.remain_rd() as u64 + got as u64,
                got: got as u64,
            });
        }
        Ok(())
    }

    fn readsome(&mut self, buf: &mut [u8]) -> Result<u32> {
        self.rw_operation(true, buf)
    }

    fn writeall(&mut self, buf: &[u8]) -> Result<()> {
        if self.is_read_only() {
            return Err(XozError::NotEnoughRoom {
                requested: buf.len() as u64,
                available: 0,
            });
        }
        let mut tmp = buf.to_vec();
        let got = self.rw_operation(false, &mut tmp)?;
        if got as usize != buf.len() {
            return Err(XozError::UnexpectedShorten {
                requested: buf.len() as u64,
                available: self.remain_wr() as u64 + got as u64,
                got: got as u64,
            });
        }
        Ok(())
    }

    fn writesome(&mut self, buf: &[u8]) -> Result<u32> {
        if self.is_read_only() {
            return Ok(0);
        }
        let mut tmp = buf.to_vec();
        self.rw_operation(false, &mut tmp)
    }

    fn fill(&mut self, c: u8, sz: u32) -> Result<()> {
        const CHUNK: usize = 512;
        let chunk = vec![c; CHUNK.min(sz as usize).max(1)];
        let mut remaining = sz;
        while remaining > 0 {
            let n = (remaining as usize).min(chunk.len());
            self.writeall(&chunk[..n])?;
            remaining -= n as u32;
        }
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.readall(&mut b)?;
        Ok(b[0])
    }

    fn read_u16_from_le(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.readall(&mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    fn read_u32_from_le(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.readall(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn write_u8(&mut self, v: u8) -> Result<()> {
        self.writeall(&[v])
    }

    fn write_u16_to_le(&mut self, v: u16) -> Result<()> {
        self.writeall(&v.to_le_bytes())
    }

    fn write_u32_to_le(&mut self, v: u32) -> Result<()> {
        self.writeall(&v.to_le_bytes())
    }

    /// Read `len` bytes starting at `at` without disturbing the current
    /// read cursor (uses a rewind guard internally).
    fn dump(&mut self, at: u32, len: u32) -> Result<Vec<u8>>
    where
        Self: Sized,
    {
        let mut guard = RewindGuard::new(self);
        guard.io.seek_rd(at as i64, Seekdir::Beg);
        let mut buf = vec![0u8; len as usize];
        guard.io.readsome(&mut buf)?;
        Ok(buf)
    }

    fn hexdump(&mut self, at: u32, len: u32) -> Result<String>
    where
        Self: Sized,
    {
        let bytes = self.dump(at, len)?;
        let mut s = String::with_capacity(bytes.len() * 3);
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 {
                s.push(' ');
            }
            s.push_str(&format!("{:02x}", b));
        }
        Ok(s)
    }
}

/// Copy `exact_sz` bytes from the current read cursor of `src` to the
/// current write cursor of `dst`.
pub fn copy_into<S: IoBase, D: IoBase>(src: &mut S, dst: &mut D, exact_sz: u32) -> Result<()> {
    const CHUNK: usize = 4096;
    let mut remaining = exact_sz;
    let mut buf = vec![0u8; CHUNK.min(exact_sz as usize).max(1)];
    while remaining > 0 {
        let n = (remaining as usize).min(buf.len());
        src.readall(&mut buf[..n])?;
        dst.writeall(&buf[..n])?;
        remaining -= n as u32;
    }
    Ok(())
}

/// Copy `exact_sz` bytes within the same stream, from its read cursor to
/// its write cursor, correctly handling overlap between the two ranges.
pub fn copy_into_self<T: IoBase>(io: &mut T, exact_sz: u32) -> Result<()> {
    let rd0 = io.tell_rd();
    let wr0 = io.tell_wr();
    if rd0 == wr0 || exact_sz == 0 {
        return Ok(());
    }

    const CHUNK: u32 = 4096;
    let overlapping_forward = wr0 > rd0 && wr0 < rd0 + exact_sz;

    if overlapping_forward {
        // The destination range starts inside the source range: copy
        // back-to-front so a chunk is never overwritten before it is read.
        let mut remaining = exact_sz;
        while remaining > 0 {
            let n = remaining.min(CHUNK);
            let off = remaining - n;
            io.seek_rd((rd0 + off) as i64, Seekdir::Beg);
            let mut buf = vec![0u8; n as usize];
            io.readall(&mut buf)?;
            io.seek_wr((wr0 + off) as i64, Seekdir::Beg);
            io.writeall(&buf)?;
            remaining -= n;
        }
    } else {
        // Either non-overlapping or the destination trails the source:
        // a front-to-back chunked copy never clobbers unread source bytes
        // because both cursors advance by the same amount each step.
        let mut remaining = exact_sz;
        let mut off = 0u32;
        while remaining > 0 {
            let n = remaining.min(CHUNK);
            io.seek_rd((rd0 + off) as i64, Seekdir::Beg);
            let mut buf = vec![0u8; n as usize];
            io.readall(&mut buf)?;
            io.seek_wr((wr0 + off) as i64, Seekdir::Beg);
            io.writeall(&buf)?;
            off += n;
            remaining -= n;
        }
    }

    io.seek_rd((rd0 + exact_sz) as i64, Seekdir::Beg);
    io.seek_wr((wr0 + exact_sz) as i64, Seekdir::Beg);
    Ok(())
}

/// RAII guard that restores both cursors to the position they had when
/// the guard was created, unless `dont_rewind` is called first.
pub struct RewindGuard<'a, T: IoBase> {
    io: &'a mut T,
    rd: u32,
    wr: u32,
    active: bool,
}

impl<'a, T: IoBase> RewindGuard<'a, T> {
    pub fn new(io: &'a mut T) -> Self {
        let rd = io.tell_rd();
        let wr = io.tell_wr();
        RewindGuard {
            io,
            rd,
            wr,
            active: true,
        }
    }

    pub fn dont_rewind(&mut self) {
        self.active = false;
    }
}

impl<'a, T: IoBase> Drop for RewindGuard<'a, T> {
    fn drop(&mut self) {
        if self.active {
            self.io.seek_rd(self.rd as i64, Seekdir::Beg);
            self.io.seek_wr(self.wr as i64, Seekdir::Beg);
        }
    }
}

/// RAII guard that restores all four limits (read min/end, write min/end)
/// to the values they had when the guard was created, unless
/// `dont_restore` is called first.
///
/// When combining with a `RewindGuard` on the same stream, create the
/// `RewindGuard` first: guards run their `Drop` in reverse declaration
/// order, and the cursor rewind must happen before the limits are
/// restored or the rewound position may fall outside the about-to-be
/// restored limits.
pub struct RestoreLimitsGuard<'a, T: IoBase> {
    io: &'a mut T,
    rd_min: u32,
    rd_end: u32,
    wr_min: u32,
    wr_end: u32,
    active: bool,
}

impl<'a, T: IoBase> RestoreLimitsGuard<'a, T> {
    pub fn new(io: &'a mut T) -> Self {
        let st = io.io_state().clone();
        RestoreLimitsGuard {
            io,
            rd_min: st.rd_min,
            rd_end: st.rd_end,
            wr_min: st.wr_min,
            wr_end: st.wr_end,
            active: true,
        }
    }

    pub fn dont_restore(&mut self) {
        self.active = false;
    }
}

impl<'a, T: IoBase> Drop for RestoreLimitsGuard<'a, T> {
    fn drop(&mut self) {
        if self.active {
            self.io.limit_rd(self.rd_min, self.rd_end - self.rd_min);
            self.io.limit_wr(self.wr_min, self.wr_end - self.wr_min);
        }
    }
}
