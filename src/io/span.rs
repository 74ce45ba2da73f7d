//! In-memory byte-slice backed stream, mostly useful for tests and for the
//! file header's fixed-size regions.

use crate::error::Result;
use crate::io::{IoBase, IoState};

pub struct IoSpan {
    data: Vec<u8>,
    state: IoState,
}

impl IoSpan {
    pub fn new(data: Vec<u8>) -> Self {
        let sz = data.len() as u32;
        IoSpan {
            data,
            state: IoState::new(sz),
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl IoBase for IoSpan {
    fn io_state(&self) -> &IoState {
        &self.state
    }

    fn io_state_mut(&mut self) -> &mut IoState {
        &mut self.state
    }

    fn rw_operation(&mut self, is_read_op: bool, data: &mut [u8]) -> Result<u32> {
        if is_read_op {
            let rd = self.state.rd as usize;
            let n = data.len().min(self.data.len().saturating_sub(rd));
            data[..n].copy_from_slice(&self.data[rd..rd + n]);
            self.state.rd += n as u32;
            Ok(n as u32)
        } else {
            let wr = self.state.wr as usize;
            let n = data.len().min(self.data.len().saturating_sub(wr));
            self.data[wr..wr + n].copy_from_slice(&data[..n]);
            self.state.wr += n as u32;
            Ok(n as u32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_back_written_bytes() {
        let mut io = IoSpan::new(vec![0u8; 8]);
        io.writeall(&[1, 2, 3, 4]).unwrap();
        io.seek_rd(0, crate::io::Seekdir::Beg);
        let mut buf = [0u8; 4];
        io.readall(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn readall_past_end_is_an_error() {
        let mut io = IoSpan::new(vec![0u8; 2]);
        let mut buf = [0u8; 4];
        assert!(io.readall(&mut buf).is_err());
    }
}
