//! The `File` envelope: a 128-byte header, the block region it describes,
//! and a trailer, wrapping a root `DescriptorSet` that anchors everything
//! an application stores in the container.
//!
//! Grounded in `xoz/file/file.h`: same header field list and order, same
//! block-size-order bounds, same "root set either fits directly in the
//! header's 32-byte slot, or a pointer to a trampoline does" scheme for
//! letting an arbitrarily large root catalog still be reachable from a
//! fixed-size header.

use std::fs::OpenOptions;
use std::io::Cursor;
use std::path::Path;

use bitflags::bitflags;
use static_assertions::const_assert_eq;

use crate::alloc::SegmentAllocator;
use crate::block_array::{BlockArray, FileBackend, FileBlockArray};
use crate::checksum::checksum_bytes;
use crate::dsc::set::{Child, DescriptorSet};
use crate::dsc::{DescriptorRegistry, DSET_TYPE};
use crate::error::{Result, XozError};
use crate::runtime::RuntimeContext;
use crate::segment::Segment;

pub const MIN_BLK_SZ_ORDER: u8 = 7;
pub const MAX_BLK_SZ_ORDER: u8 = 16;
pub const MIN_BLK_SZ: u32 = 1 << MIN_BLK_SZ_ORDER;
pub const MAX_BLK_SZ: u32 = 1 << MAX_BLK_SZ_ORDER;
const_assert_eq!(MIN_BLK_SZ, 128);
const_assert_eq!(MAX_BLK_SZ, 65536);

/// Size, in bytes, of the header's `root` field: the fixed-size slot that
/// either holds a small root `DescriptorSet`'s `Segment` directly, or a
/// single-extent `Segment` pointing at the trampoline blocks that hold it.
pub const HEADER_ROOT_SET_SZ: usize = 32;

const HEADER_SZ: usize = 128;
const TRAILER_MIN_SZ: usize = 4;
const MAGIC: [u8; 4] = *b"XOZ\0";
const TRAILER_MAGIC: [u8; 4] = *b"EOF\0";

const FLAG_HAS_TRAMPOLINE: u8 = 1 << 0;

// magic(4) + app_name(12) + file_sz(8) + trailer_sz(2) + blk_total_cnt(4)
// + blk_sz_order(1) + flags(1) + compat(4) + incompat(4) + ro_compat(4)
// + root(32) + checksum(2) = 78, padded with 50 zero bytes to 128.
const_assert_eq!(4 + 12 + 8 + 2 + 4 + 1 + 1 + 4 + 4 + 4 + HEADER_ROOT_SET_SZ + 2, 78);
const_assert_eq!(78 + 50, HEADER_SZ);

bitflags! {
    /// Raw feature-flag bits carried in the header. This crate defines no
    /// flags of its own yet; the type exists so that bits set by a future
    /// version (or a different implementation) round-trip untouched
    /// instead of being silently dropped, mirroring how unrecognized
    /// descriptor idata is preserved.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FeatureFlags: u32 {
        const _ = !0;
    }
}

struct Header {
    app_name: [u8; 12],
    file_sz: u64,
    trailer_sz: u16,
    blk_total_cnt: u32,
    blk_sz_order: u8,
    flags: u8,
    compat: FeatureFlags,
    incompat: FeatureFlags,
    ro_compat: FeatureFlags,
    root: [u8; HEADER_ROOT_SET_SZ],
}

impl Header {
    fn encode(&self) -> [u8; HEADER_SZ] {
        let mut buf = [0u8; HEADER_SZ];
        let mut pos = 0usize;
        macro_rules! put {
            ($bytes:expr) => {{
                let b = $bytes;
                buf[pos..pos + b.len()].copy_from_slice(&b);
                pos += b.len();
            }};
        }
        put!(MAGIC);
        put!(self.app_name);
        put!(self.file_sz.to_le_bytes());
        put!(self.trailer_sz.to_le_bytes());
        put!(self.blk_total_cnt.to_le_bytes());
        put!([self.blk_sz_order]);
        put!([self.flags]);
        put!(self.compat.bits().to_le_bytes());
        put!(self.incompat.bits().to_le_bytes());
        put!(self.ro_compat.bits().to_le_bytes());
        put!(self.root);
        debug_assert_eq!(pos, 76);
        let checksum_at = pos;
        pos += 2; // checksum, computed below with these two bytes zeroed
        debug_assert_eq!(pos, 78);

        let checksum = checksum_bytes(&buf);
        buf[checksum_at..checksum_at + 2].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; HEADER_SZ]) -> Result<Header> {
        if buf[0..4] != MAGIC {
            return Err(XozError::BadFormat("file header magic mismatch".into()));
        }
        let stored_checksum = u16::from_le_bytes([buf[76], buf[77]]);
        let mut check_buf = *buf;
        check_buf[76] = 0;
        check_buf[77] = 0;
        let computed = checksum_bytes(&check_buf);
        if computed != stored_checksum {
            return Err(XozError::BadFormat(format!(
                "file header checksum mismatch: stored {stored_checksum:#06x}, computed {computed:#06x}"
            )));
        }

        let mut app_name = [0u8; 12];
        app_name.copy_from_slice(&buf[4..16]);
        let file_sz = u64::from_le_bytes(buf[16..24].try_into().unwrap());
        let trailer_sz = u16::from_le_bytes(buf[24..26].try_into().unwrap());
        let blk_total_cnt = u32::from_le_bytes(buf[26..30].try_into().unwrap());
        let blk_sz_order = buf[30];
        let flags = buf[31];
        let compat = FeatureFlags::from_bits_retain(u32::from_le_bytes(buf[32..36].try_into().unwrap()));
        let incompat = FeatureFlags::from_bits_retain(u32::from_le_bytes(buf[36..40].try_into().unwrap()));
        let ro_compat = FeatureFlags::from_bits_retain(u32::from_le_bytes(buf[40..44].try_into().unwrap()));
        let mut root = [0u8; HEADER_ROOT_SET_SZ];
        root.copy_from_slice(&buf[44..44 + HEADER_ROOT_SET_SZ]);

        if !(MIN_BLK_SZ_ORDER..=MAX_BLK_SZ_ORDER).contains(&blk_sz_order) {
            return Err(XozError::BadFormat(format!(
                "file header block size order {blk_sz_order} is out of range [{MIN_BLK_SZ_ORDER}, {MAX_BLK_SZ_ORDER}]"
            )));
        }
        if (trailer_sz as usize) < TRAILER_MIN_SZ {
            return Err(XozError::BadFormat(format!(
                "file header trailer size {trailer_sz} is smaller than the minimum {TRAILER_MIN_SZ}"
            )));
        }

        Ok(Header {
            app_name,
            file_sz,
            trailer_sz,
            blk_total_cnt,
            blk_sz_order,
            flags,
            compat,
            incompat,
            ro_compat,
            root,
        })
    }
}

/// An open xoz container: the block region, the allocator tracking its
/// free space, and the root `DescriptorSet` every other descriptor hangs
/// off of, directly or through nested sets.
pub struct File {
    blkarr: FileBlockArray,
    alloc: SegmentAllocator,
    rt: RuntimeContext,
    root: DescriptorSet<FileBlockArray>,
    trampoline: Segment,
    app_name: [u8; 12],
    feature_flags_compat: FeatureFlags,
    feature_flags_incompat: FeatureFlags,
    feature_flags_ro_compat: FeatureFlags,
    /// Bytes of the on-disk trailer beyond the mandatory `"EOF\0"` magic,
    /// preserved byte-for-byte across a full_sync/close even though this
    /// implementation never writes anything there itself.
    extra_trailer: Vec<u8>,
    closed: bool,
    /// Set when the header's `ro_compat` field carries a bit this
    /// implementation doesn't recognize: per the compat contract such a
    /// file must still be readable, just not written back to.
    read_only: bool,
}

impl File {
    /// Create a new container backed by an in-memory buffer; useful for
    /// tests and for applications that serialize the whole file
    /// elsewhere (e.g. as a blob in another store).
    pub fn create_in_memory(blk_sz_order: u8, registry: DescriptorRegistry) -> Result<File> {
        bootstrap_new(FileBackend::Memory(Cursor::new(Vec::new())), blk_sz_order, registry)
    }

    /// Create a new container at `path`, failing if it already exists.
    pub fn create<P: AsRef<Path>>(path: P, blk_sz_order: u8, registry: DescriptorRegistry) -> Result<File> {
        let f = OpenOptions::new().read(true).write(true).create_new(true).open(path)?;
        bootstrap_new(FileBackend::Disk(f), blk_sz_order, registry)
    }

    /// Open a previously created container at `path`.
    pub fn open<P: AsRef<Path>>(path: P, registry: DescriptorRegistry) -> Result<File> {
        let f = OpenOptions::new().read(true).write(true).open(path)?;
        bootstrap_existing(FileBackend::Disk(f), registry)
    }

    /// Open a previously created container whose bytes are held in memory,
    /// e.g. a buffer previously populated by `Self::create_in_memory` and
    /// then read back out through its backing `Cursor<Vec<u8>>`.
    pub fn open_from_bytes(data: Vec<u8>, registry: DescriptorRegistry) -> Result<File> {
        bootstrap_existing(FileBackend::Memory(Cursor::new(data)), registry)
    }

    pub fn root(&self) -> &DescriptorSet<FileBlockArray> {
        &self.root
    }

    /// Split-borrow accessor: mutating the root set almost always needs
    /// the runtime context alongside it (to mint ids, or to consult
    /// `on_external_ref_action`), and the two can't both be reached
    /// through separate `&mut self` methods at once.
    pub fn root_and_runtime(&mut self) -> (&mut DescriptorSet<FileBlockArray>, &mut RuntimeContext) {
        (&mut self.root, &mut self.rt)
    }

    pub fn blk_sz(&self) -> u32 {
        self.blkarr.blk_sz()
    }

    pub fn blk_cnt(&self) -> u32 {
        self.blkarr.blk_cnt()
    }

    /// Whether this file was opened read-only, because its header's
    /// `ro_compat` field carried a feature bit this implementation does not
    /// recognize. `full_sync`/`close` become no-ops on such a file rather
    /// than risk writing a format extension back out incorrectly.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Persist every staged change: the root set (recursively, including
    /// nested sets and leaf content), the trampoline if the root no
    /// longer fits directly in the header, and the header/trailer
    /// themselves. `release` additionally reclaims trailing free blocks.
    pub fn full_sync(&mut self, release: bool) -> Result<()> {
        if self.read_only {
            log::debug!("full_sync skipped: file is open read-only");
            return Ok(());
        }
        self.root.full_sync(&mut self.blkarr, &mut self.alloc, &mut self.rt, release)?;
        let root_field = self.update_trampoline_space()?;

        if release {
            self.alloc.release(&mut self.blkarr)?;
            self.blkarr.release_blocks()?;
        }

        let blk_sz = self.blkarr.blk_sz();
        let data_blk_cnt = self.blkarr.blk_cnt();
        // `blk_total_cnt` counts block 0 (the header) along with the data
        // blocks that follow it, per the file's own block numbering.
        let blk_total_cnt = data_blk_cnt + 1;
        let trailer_sz = (TRAILER_MIN_SZ + self.extra_trailer.len()) as u16;
        let file_sz = blk_total_cnt as u64 * blk_sz as u64;
        let trailer_at = self.blkarr.base() + data_blk_cnt as u64 * blk_sz as u64;
        let flags = if self.trampoline_in_use() { FLAG_HAS_TRAMPOLINE } else { 0 };

        let header = Header {
            app_name: self.app_name,
            file_sz,
            trailer_sz,
            blk_total_cnt,
            blk_sz_order: blk_sz.trailing_zeros() as u8,
            flags,
            compat: self.feature_flags_compat,
            incompat: self.feature_flags_incompat,
            ro_compat: self.feature_flags_ro_compat,
            root: root_field,
        };
        self.blkarr.write_raw(0, &header.encode())?;

        let mut trailer = TRAILER_MAGIC.to_vec();
        trailer.extend_from_slice(&self.extra_trailer);
        self.blkarr.write_raw(trailer_at, &trailer)?;

        self.blkarr.sync()?;
        Ok(())
    }

    /// Persist everything and mark the file closed. Calling `close` more
    /// than once is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.full_sync(true)?;
        self.closed = true;
        Ok(())
    }

    /// Best-effort close for use on an unwind path, where propagating a
    /// `Result` isn't an option: persists what it can and logs rather
    /// than returning an error.
    pub fn panic_close(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.full_sync(true) {
            log::error!("panic_close: full_sync failed, file may be left in a partially-synced state: {err}");
        }
        self.closed = true;
    }

    fn trampoline_in_use(&self) -> bool {
        !self.trampoline.extents.is_empty() || self.trampoline.inline_data.is_some()
    }

    /// Encode the root set's `Segment` into a `[u8; HEADER_ROOT_SET_SZ]`,
    /// growing or shrinking the trampoline as needed if it no longer fits
    /// directly.
    fn update_trampoline_space(&mut self) -> Result<[u8; HEADER_ROOT_SET_SZ]> {
        let mut direct = Vec::new();
        self.root.segment().encode(&mut direct, true);

        if direct.len() <= HEADER_ROOT_SET_SZ {
            if self.trampoline_in_use() {
                self.alloc.dealloc(&self.trampoline)?;
                self.trampoline = Segment::new();
            }
            let mut field = [0u8; HEADER_ROOT_SET_SZ];
            field[..direct.len()].copy_from_slice(&direct);
            return Ok(field);
        }

        let needed = direct.len() as u64;
        let cur_sz = self.trampoline.data_size(self.blkarr.blk_sz());
        if !self.trampoline_in_use() || cur_sz != needed {
            if self.trampoline_in_use() {
                self.alloc.dealloc(&self.trampoline)?;
            }
            self.trampoline = self.alloc.alloc_single_extent(&mut self.blkarr, needed)?;
        }
        {
            let mut io = crate::io::IoSegment::new(&mut self.blkarr, &mut self.trampoline);
            use crate::io::IoBase;
            io.writeall(&direct)?;
        }

        let mut pointer = Vec::new();
        self.trampoline.encode(&mut pointer, true);
        if pointer.len() > HEADER_ROOT_SET_SZ {
            return Err(XozError::InternalBug(format!(
                "trampoline pointer of {} bytes does not fit the {} byte root slot",
                pointer.len(),
                HEADER_ROOT_SET_SZ
            )));
        }
        let mut field = [0u8; HEADER_ROOT_SET_SZ];
        field[..pointer.len()].copy_from_slice(&pointer);
        Ok(field)
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if !self.closed {
            log::warn!("file dropped without an explicit close; syncing now on a best-effort basis");
            self.panic_close();
        }
    }
}

fn check_blk_sz_order(blk_sz_order: u8) -> Result<()> {
    if !(MIN_BLK_SZ_ORDER..=MAX_BLK_SZ_ORDER).contains(&blk_sz_order) {
        return Err(XozError::BadFormat(format!(
            "block size order {blk_sz_order} is out of range [{MIN_BLK_SZ_ORDER}, {MAX_BLK_SZ_ORDER}]"
        )));
    }
    Ok(())
}

fn bootstrap_new(backend: FileBackend, blk_sz_order: u8, registry: DescriptorRegistry) -> Result<File> {
    check_blk_sz_order(blk_sz_order)?;
    let blk_sz = 1u32 << blk_sz_order;

    let blkarr = FileBlockArray::new(backend, blk_sz, 0, HEADER_SZ as u64);
    let mut alloc = SegmentAllocator::new();
    alloc.initialize_from_allocated(0, &[])?;

    let mut file = File {
        blkarr,
        alloc,
        rt: RuntimeContext::new(registry),
        root: DescriptorSet::empty(DSET_TYPE),
        trampoline: Segment::new(),
        app_name: [0u8; 12],
        feature_flags_compat: FeatureFlags::empty(),
        feature_flags_incompat: FeatureFlags::empty(),
        feature_flags_ro_compat: FeatureFlags::empty(),
        extra_trailer: Vec::new(),
        closed: false,
        read_only: false,
    };
    file.full_sync(false)?;
    log::debug!("created a new xoz file with a {blk_sz} byte block size");
    Ok(file)
}

fn bootstrap_existing(mut backend: FileBackend, registry: DescriptorRegistry) -> Result<File> {
    let mut hdr_bytes = [0u8; HEADER_SZ];
    match &mut backend {
        FileBackend::Disk(f) => {
            use std::io::{Read, Seek, SeekFrom};
            f.seek(SeekFrom::Start(0))?;
            f.read_exact(&mut hdr_bytes)?;
        }
        FileBackend::Memory(c) => {
            use std::io::{Read, Seek, SeekFrom};
            c.seek(SeekFrom::Start(0))?;
            c.read_exact(&mut hdr_bytes)?;
        }
    }
    let header = Header::decode(&hdr_bytes)?;
    let blk_sz = 1u32 << header.blk_sz_order;

    // This implementation defines no incompatible feature bits of its own,
    // so any set bit is by definition one it doesn't understand; per the
    // compat/incompat/ro_compat contract, that means refuse to open rather
    // than silently misinterpret the file.
    if !header.incompat.is_empty() {
        return Err(XozError::BadFormat(format!(
            "file header declares incompatible feature flags {:#010x} this implementation does not understand",
            header.incompat.bits()
        )));
    }

    let expected_file_sz = header.blk_total_cnt as u64 * blk_sz as u64;
    if header.file_sz != expected_file_sz {
        return Err(XozError::BadFormat(format!(
            "file header declares file_sz {} but {} blocks of {} bytes imply {}",
            header.file_sz, header.blk_total_cnt, blk_sz, expected_file_sz
        )));
    }
    if header.blk_total_cnt < 1 {
        return Err(XozError::BadFormat("file header declares zero total blocks, but block 0 is the header itself".into()));
    }
    let data_blk_cnt = header.blk_total_cnt - 1;

    let mut blkarr = FileBlockArray::new(backend, blk_sz, data_blk_cnt, HEADER_SZ as u64);

    let trailer_at = HEADER_SZ as u64 + data_blk_cnt as u64 * blk_sz as u64;
    let mut trailer = vec![0u8; header.trailer_sz as usize];
    blkarr.read_raw(trailer_at, &mut trailer)?;
    if trailer[0..4] != TRAILER_MAGIC {
        return Err(XozError::BadFormat("file trailer magic mismatch".into()));
    }
    let extra_trailer = trailer[4..].to_vec();

    let mut rt = RuntimeContext::new(registry);
    let (root_segment, trampoline) = load_root_segment(&header, &mut blkarr)?;
    let root: DescriptorSet<FileBlockArray> = DescriptorSet::load(DSET_TYPE, root_segment, &mut blkarr, &mut rt)?;

    let mut allocated = Vec::new();
    root.collect_allocated(&mut allocated);
    if let Some(tr) = &trampoline {
        allocated.push(tr.clone());
    }
    let mut alloc = SegmentAllocator::new();
    alloc.initialize_from_allocated(data_blk_cnt, &allocated)?;

    let read_only = !header.ro_compat.is_empty();
    if read_only {
        log::warn!(
            "file header declares read-only-compat feature flags {:#010x} this implementation does not understand; opening read-only",
            header.ro_compat.bits()
        );
    }

    Ok(File {
        blkarr,
        alloc,
        rt,
        root,
        trampoline: trampoline.unwrap_or_default(),
        app_name: header.app_name,
        feature_flags_compat: header.compat,
        feature_flags_incompat: header.incompat,
        feature_flags_ro_compat: header.ro_compat,
        extra_trailer,
        closed: false,
        read_only,
    })
}

/// Decode the header's `root` field into the root set's own `Segment`,
/// resolving one level of trampoline indirection if `FLAG_HAS_TRAMPOLINE`
/// is set. Returns the trampoline `Segment` too (so its blocks are marked
/// in-use when the allocator bootstraps), or `None` if the root fit
/// directly.
fn load_root_segment(header: &Header, blkarr: &mut FileBlockArray) -> Result<(Segment, Option<Segment>)> {
    let (direct, _) = Segment::decode(&header.root)?;
    if header.flags & FLAG_HAS_TRAMPOLINE == 0 {
        return Ok((direct, None));
    }

    let trampoline = direct;
    let needed = trampoline.data_size(blkarr.blk_sz());
    let mut buf = vec![0u8; needed as usize];
    {
        use crate::io::{IoBase, IoSegment};
        let mut tr = trampoline.clone();
        let mut io = IoSegment::new(blkarr, &mut tr);
        io.readall(&mut buf)?;
    }
    let (root_segment, _) = Segment::decode(&buf)?;
    Ok((root_segment, Some(trampoline)))
}
