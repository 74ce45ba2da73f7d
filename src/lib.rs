//! XOZ: a single-file container format for persisting a tree of typed,
//! variable-size descriptors, with optional large opaque content payloads,
//! organized hierarchically into descriptor sets.
//!
//! The crate is layered bottom-up, each module documented in
//! `SPEC_FULL.md`: `extent`/`segment` are the wire-level location codec,
//! `io` presents a segment (or a span, or a restricted view) as a flat
//! byte stream, `block_array` is the block-addressable storage underneath
//! it, `alloc` hands out and reclaims segments against a block array,
//! `dsc` is the descriptor codec and the `DescriptorSet` container built on
//! top of it, and `file` is the envelope that ties a `DescriptorSet` tree
//! to an actual file on disk.
//!
//! ```no_run
//! use xoz::{DescriptorBody, DescriptorRecord, DescriptorRegistry, File, OpaqueBody};
//!
//! let mut file = File::create("demo.xoz", 10, DescriptorRegistry::new())?;
//! {
//!     let (root, rt) = file.root_and_runtime();
//!     root.add(
//!         DescriptorRecord::new(0x0500, DescriptorBody::Opaque(OpaqueBody::from_idata(vec![1, 2, 3]))),
//!         rt,
//!     );
//! }
//! file.close()?;
//! # Ok::<(), xoz::XozError>(())
//! ```

pub mod alloc;
pub mod block_array;
pub mod checksum;
pub mod dsc;
pub mod error;
pub mod extent;
pub mod file;
pub mod io;
pub mod runtime;
pub mod segment;

pub use alloc::{AllocatorStats, SegmentAllocator};
pub use block_array::{BlockArray, FileBackend, FileBlockArray, SegmentBlockArray};
pub use dsc::{
    ContentPart, CustomDescriptor, DescriptorBody, DescriptorMeta, DescriptorRecord, DescriptorRegistry,
    DescriptorSetBody, NameMappingBody, OpaqueBody, DSET_SUBCLASS_MAX_TYPE, DSET_SUBCLASS_MIN_TYPE, DSET_TYPE,
};
pub use dsc::set::{Child, DescriptorSet};
pub use error::{Result, XozError};
pub use extent::Extent;
pub use file::{File, HEADER_ROOT_SET_SZ, MAX_BLK_SZ, MAX_BLK_SZ_ORDER, MIN_BLK_SZ, MIN_BLK_SZ_ORDER};
pub use io::{IoBase, IoRestricted, IoSegment, IoSpan, ReadOnly, Seekdir, WriteOnly};
pub use runtime::{OnExternalRefAction, RuntimeConfig, RuntimeContext};
pub use segment::{Segment, MAX_INLINE_SZ};
