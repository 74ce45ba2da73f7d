//! Pass-through descriptor for unregistered types: carries whatever idata
//! was read without interpreting it, and writes it back byte-for-byte.

use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct OpaqueBody {
    idata: Vec<u8>,
    content: Vec<u8>,
}

impl OpaqueBody {
    pub fn empty() -> Self {
        OpaqueBody::default()
    }

    pub fn from_idata(idata: Vec<u8>) -> Self {
        OpaqueBody {
            idata,
            content: Vec::new(),
        }
    }

    /// For testing and diagnostics only: nothing should rely on an opaque
    /// descriptor's content having any particular shape.
    pub fn idata(&self) -> &[u8] {
        &self.idata
    }

    pub fn write_specifics(&self) -> Vec<u8> {
        self.idata.clone()
    }

    pub fn read_specifics(&mut self, buf: &[u8]) -> Result<usize> {
        // An opaque descriptor doesn't interpret idata at all: it
        // consumes the whole buffer as its own bytes, so `future_idata`
        // on the owning record stays empty and a round trip writes back
        // exactly what was read.
        self.idata = buf.to_vec();
        Ok(buf.len())
    }

    pub fn content_bytes(&self) -> Vec<u8> {
        self.content.clone()
    }

    pub fn load_content(&mut self, buf: &[u8]) -> Result<()> {
        self.content = buf.to_vec();
        Ok(())
    }
}
