//! A read-only or write-only slice over another stream's current position.

use crate::error::Result;
use crate::io::{IoBase, IoState, Seekdir};

/// Wraps another `IoBase`, exposing only `sz` bytes starting at the
/// wrapped stream's current position (read position if `is_read_mode`,
/// write position otherwise), truncated to however much room the wrapped
/// stream actually has left.
///
/// The wrapped stream is reseeked on every operation, so it must not be
/// used directly while this wrapper is alive.
pub struct IoRestricted<'a, T: IoBase> {
    io: &'a mut T,
    base: u32,
    is_read_mode: bool,
    state: IoState,
}

impl<'a, T: IoBase> IoRestricted<'a, T> {
    pub fn new(io: &'a mut T, is_read_mode: bool, sz: u32) -> Self {
        let (base, remain) = if is_read_mode {
            (io.tell_rd(), io.remain_rd())
        } else {
            (io.tell_wr(), io.remain_wr())
        };
        let sz = sz.min(remain);
        IoRestricted {
            io,
            base,
            is_read_mode,
            state: IoState::new(sz),
        }
    }
}

impl<'a, T: IoBase> IoBase for IoRestricted<'a, T> {
    fn io_state(&self) -> &IoState {
        &self.state
    }

    fn io_state_mut(&mut self) -> &mut IoState {
        &mut self.state
    }

    fn rw_operation(&mut self, is_read_op: bool, data: &mut [u8]) -> Result<u32> {
        if is_read_op {
            if !self.is_read_mode {
                return Ok(0);
            }
            self.io.seek_rd((self.base + self.state.rd) as i64, Seekdir::Beg);
            let n = self.io.readsome(data)?;
            self.state.rd += n;
            Ok(n)
        } else {
            if self.is_read_mode {
                return Ok(0);
            }
            self.io.seek_wr((self.base + self.state.wr) as i64, Seekdir::Beg);
            let n = self.io.writesome(data)?;
            self.state.wr += n;
            Ok(n)
        }
    }
}

/// A read-only view, for callers that should not be able to write through
/// it even though the underlying stream is writable.
pub struct ReadOnly<'a, T: IoBase>(IoRestricted<'a, T>);

impl<'a, T: IoBase> ReadOnly<'a, T> {
    pub fn new(io: &'a mut T, sz: u32) -> Self {
        ReadOnly(IoRestricted::new(io, true, sz))
    }
}

impl<'a, T: IoBase> IoBase for ReadOnly<'a, T> {
    fn io_state(&self) -> &IoState {
        self.0.io_state()
    }

    fn io_state_mut(&mut self) -> &mut IoState {
        self.0.io_state_mut()
    }

    fn rw_operation(&mut self, is_read_op: bool, data: &mut [u8]) -> Result<u32> {
        self.0.rw_operation(is_read_op, data)
    }
}

/// A write-only view, for callers that should not be able to read through
/// it even though the underlying stream is readable.
pub struct WriteOnly<'a, T: IoBase>(IoRestricted<'a, T>);

impl<'a, T: IoBase> WriteOnly<'a, T> {
    pub fn new(io: &'a mut T, sz: u32) -> Self {
        WriteOnly(IoRestricted::new(io, false, sz))
    }
}

impl<'a, T: IoBase> IoBase for WriteOnly<'a, T> {
    fn io_state(&self) -> &IoState {
        self.0.io_state()
    }

    fn io_state_mut(&mut self) -> &mut IoState {
        self.0.io_state_mut()
    }

    fn rw_operation(&mut self, is_read_op: bool, data: &mut [u8]) -> Result<u32> {
        self.0.rw_operation(is_read_op, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::IoSpan;

    #[test]
    fn read_only_view_cannot_write() {
        let mut backing = IoSpan::new(vec![0u8; 8]);
        let mut ro = ReadOnly::new(&mut backing, 4);
        assert_eq!(ro.writesome(&[1, 2, 3]).unwrap(), 0);
    }

    #[test]
    fn read_only_view_is_truncated_to_remaining_room() {
        let mut backing = IoSpan::new(vec![0u8; 4]);
        backing.seek_rd(2, Seekdir::Beg);
        let ro = ReadOnly::new(&mut backing, 100);
        assert_eq!(ro.src_sz(), 2);
    }
}
