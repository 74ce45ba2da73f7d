//! `DescriptorSet`: an ordered collection of descriptors (leaves or nested
//! sets), persisted as one content blob — a 4-byte header (reserved `u16`
//! plus a checksum) followed by each member's encoded descriptor record
//! back to back.
//!
//! Ownership follows the "the set owns its descriptors, an external handle
//! may outlive erasure" model from the distilled design: each member lives
//! behind `Rc<RefCell<Child<B>>>`. Erasing a member tries `Rc::try_unwrap`
//! first — if nothing else holds a clone, its storage is reclaimed
//! immediately on the next `full_sync`; if an external clone is still
//! alive, `RuntimeConfig::on_external_ref_action` decides whether to erase
//! anyway (leaving that storage unreclaimed until the external handle goes
//! away on its own), warn and erase, or refuse.
//!
//! Every mutation (`add`, `erase`, `assign_persistent_id`) takes effect in
//! memory immediately; `full_sync` is what's lazy — it's the only place
//! that touches the backing `BlockArray`, and it always rebuilds this
//! set's whole catalog from current state rather than patching individual
//! records in place. That costs some allocator churn this crate doesn't
//! try to avoid, but it sidesteps ever having to tell a live record apart
//! from a stale, zero-padded hole when a catalog is re-read from disk: by
//! construction, a set that was last written by `full_sync` — including
//! the one `File::close` always performs — never has holes in it, so
//! `load` never needs to guess.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use crate::alloc::SegmentAllocator;
use crate::block_array::BlockArray;
use crate::checksum::checksum_bytes;
use crate::dsc::{ContentPart, DescriptorBody, DescriptorRecord, DescriptorRegistry, ID_TEMPORAL_BIT};
use crate::error::{Result, XozError};
use crate::io::{IoBase, IoSegment};
use crate::runtime::{OnExternalRefAction, RuntimeContext};
use crate::segment::Segment;

/// Body for a descriptor that *is* a `DescriptorSet`: it carries no idata
/// or content of its own — the set's children catalog is written directly
/// by `DescriptorSet::full_sync`, addressed through the owning
/// `DescriptorRecord`'s content part instead of through this type.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSetBody;

impl DescriptorSetBody {
    pub fn new() -> Self {
        DescriptorSetBody
    }

    pub fn write_specifics(&self) -> Vec<u8> {
        Vec::new()
    }

    pub fn read_specifics(&mut self, _buf: &[u8]) -> Result<usize> {
        Ok(0)
    }
}

/// A member of a `DescriptorSet`: either an ordinary descriptor record, or
/// a nested set (recursive composition).
pub enum Child<B: BlockArray> {
    Leaf(DescriptorRecord),
    Set(DescriptorSet<B>),
}

pub struct DescriptorSet<B: BlockArray> {
    dsc_type: u16,
    segment: Segment,
    children: BTreeMap<u32, Rc<RefCell<Child<B>>>>,
    /// Physical member order, maintained across add/erase so `full_sync`
    /// writes a deterministic, stable catalog layout.
    order: Vec<u32>,
    to_add: BTreeSet<u32>,
    to_update: BTreeSet<u32>,
    /// Children erased with exclusive ownership, awaiting storage
    /// reclamation at the next `full_sync`.
    to_destroy: Vec<Child<B>>,
}

impl<B: BlockArray> DescriptorSet<B> {
    pub fn empty(dsc_type: u16) -> Self {
        DescriptorSet {
            dsc_type,
            segment: Segment::new(),
            children: BTreeMap::new(),
            order: Vec::new(),
            to_add: BTreeSet::new(),
            to_update: BTreeSet::new(),
            to_destroy: Vec::new(),
        }
    }

    pub fn dsc_type(&self) -> u16 {
        self.dsc_type
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterate member ids in their on-disk order.
    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.order.iter().copied()
    }

    pub fn get(&self, id: u32) -> Option<Rc<RefCell<Child<B>>>> {
        self.children.get(&id).cloned()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.children.contains_key(&id)
    }

    /// Add a leaf descriptor, assigning it a fresh temporal id if it
    /// doesn't already carry one.
    pub fn add(&mut self, mut rec: DescriptorRecord, rt: &mut RuntimeContext) -> u32 {
        let id = rec.meta.id.unwrap_or_else(|| rt.new_temporal_id());
        rec.meta.id = Some(id);
        self.children.insert(id, Rc::new(RefCell::new(Child::Leaf(rec))));
        self.order.push(id);
        self.to_add.insert(id);
        id
    }

    /// Add a nested, initially-empty `DescriptorSet`, returning its id and
    /// a shared handle to it.
    pub fn add_set(&mut self, nested_dsc_type: u16, rt: &mut RuntimeContext) -> (u32, Rc<RefCell<Child<B>>>) {
        let id = rt.new_temporal_id();
        let handle = Rc::new(RefCell::new(Child::Set(DescriptorSet::empty(nested_dsc_type))));
        self.children.insert(id, handle.clone());
        self.order.push(id);
        self.to_add.insert(id);
        (id, handle)
    }

    /// Promote a (usually temporal) id to a fresh, file-unique persistent
    /// id. Returns the new id.
    pub fn assign_persistent_id(&mut self, id: u32, rt: &mut RuntimeContext) -> Result<u32> {
        let handle = self
            .children
            .remove(&id)
            .ok_or_else(|| XozError::BadDescriptor {
                dsc_type: self.dsc_type,
                reason: format!("no member with id {id:#x}"),
            })?;
        let new_id = rt.assign_persistent_id();
        if let Child::Leaf(rec) = &mut *handle.borrow_mut() {
            rec.meta.id = Some(new_id);
        }
        self.children.insert(new_id, handle);
        if let Some(slot) = self.order.iter_mut().find(|x| **x == id) {
            *slot = new_id;
        }
        if self.to_add.remove(&id) {
            self.to_add.insert(new_id);
        } else {
            self.to_update.insert(new_id);
        }
        Ok(new_id)
    }

    pub fn mark_as_modified(&mut self, id: u32) {
        if self.children.contains_key(&id) {
            self.to_update.insert(id);
        }
    }

    /// Remove a member from the set. Returns `false` if `id` wasn't a
    /// member. Reclaiming its storage is deferred to the next
    /// `full_sync`, and only happens at all if this call obtains
    /// exclusive ownership (see the module doc comment).
    pub fn erase(&mut self, id: u32, rt: &RuntimeContext) -> Result<bool> {
        let Some(handle) = self.children.remove(&id) else {
            return Ok(false);
        };
        match Rc::try_unwrap(handle) {
            Ok(cell) => {
                self.order.retain(|&x| x != id);
                self.to_add.remove(&id);
                self.to_update.remove(&id);
                self.to_destroy.push(cell.into_inner());
            }
            Err(still_shared) => match rt.config.on_external_ref_action {
                OnExternalRefAction::Fail => {
                    self.children.insert(id, still_shared);
                    return Err(XozError::BadDescriptor {
                        dsc_type: self.dsc_type,
                        reason: format!("descriptor {id:#x} still has an external reference"),
                    });
                }
                OnExternalRefAction::Warn => {
                    log::warn!(
                        "erasing descriptor {id:#x} with a live external reference; its storage won't be reclaimed until that handle is dropped"
                    );
                    self.order.retain(|&x| x != id);
                    self.to_add.remove(&id);
                    self.to_update.remove(&id);
                }
                OnExternalRefAction::Pass => {
                    self.order.retain(|&x| x != id);
                    self.to_add.remove(&id);
                    self.to_update.remove(&id);
                }
            },
        }
        Ok(true)
    }

    /// Transfer ownership of member `id` from `self` to `other`, without
    /// touching its content (or, for a nested set, its catalog) segments:
    /// only the in-memory bookkeeping changes, so the next `full_sync` of
    /// each set reflects the move. Checks both sets before mutating
    /// either, so a failure (no such member, or `other` already has one
    /// with that id) leaves both sets exactly as they were.
    pub fn move_out(&mut self, id: u32, other: &mut DescriptorSet<B>) -> Result<()> {
        if !self.children.contains_key(&id) {
            return Err(XozError::BadDescriptor {
                dsc_type: self.dsc_type,
                reason: format!("no member with id {id:#x}"),
            });
        }
        if other.children.contains_key(&id) {
            return Err(XozError::BadDescriptor {
                dsc_type: other.dsc_type,
                reason: format!("destination set already has a member with id {id:#x}"),
            });
        }

        let handle = self.children.remove(&id).expect("presence checked above");
        self.order.retain(|&x| x != id);
        let was_new = self.to_add.remove(&id);
        let was_dirty = self.to_update.remove(&id);

        other.children.insert(id, handle);
        other.order.push(id);
        if was_new {
            // Content was never synced in `self`; it still needs its
            // first sync, just now under `other`.
            other.to_add.insert(id);
        } else if was_dirty {
            other.to_update.insert(id);
        }
        Ok(())
    }

    /// Erase every member.
    pub fn clear_set(&mut self, rt: &RuntimeContext) -> Result<()> {
        for id in self.order.clone() {
            self.erase(id, rt)?;
        }
        Ok(())
    }

    /// Push `self.segment` and the content/catalog segments of every
    /// (recursively nested) member onto `out`, for allocator bootstrap at
    /// open time.
    pub fn collect_allocated(&self, out: &mut Vec<Segment>) {
        out.push(self.segment.clone());
        for id in &self.order {
            let Some(handle) = self.children.get(id) else { continue };
            match &*handle.borrow() {
                Child::Leaf(rec) => {
                    for part in &rec.meta.content {
                        out.push(part.segment.clone());
                    }
                }
                Child::Set(nested) => nested.collect_allocated(out),
            }
        }
    }

    /// Persist every staged change, recursing depth-first into nested
    /// sets (a child set's own storage must be committed before its
    /// parent encodes a content part pointing at it). When `release` is
    /// set, returns freed trailing blocks to the backing array afterward.
    pub fn full_sync(
        &mut self,
        blkarr: &mut B,
        alloc: &mut SegmentAllocator,
        rt: &mut RuntimeContext,
        release: bool,
    ) -> Result<()> {
        for child in self.to_destroy.drain(..) {
            destroy_child(child, blkarr, alloc)?;
        }

        let dirty: Vec<u32> = self.to_add.iter().chain(self.to_update.iter()).copied().collect();
        for id in dirty {
            if let Some(handle) = self.children.get(&id) {
                if let Child::Leaf(rec) = &mut *handle.borrow_mut() {
                    sync_leaf_content(rec, blkarr, alloc)?;
                }
            }
        }
        self.to_add.clear();
        self.to_update.clear();

        let mut body = Vec::new();
        for id in self.order.clone() {
            let handle = self.children.get(&id).expect("order and children stay in sync").clone();
            let bytes = match &mut *handle.borrow_mut() {
                Child::Leaf(rec) => rec.encode()?,
                Child::Set(nested) => {
                    nested.full_sync(blkarr, alloc, rt, release)?;
                    let mut rec = DescriptorRecord::new(nested.dsc_type, DescriptorBody::Set(DescriptorSetBody::new()));
                    rec.meta.id = Some(id);
                    rec.meta.content = vec![ContentPart {
                        csize: nested.segment.data_size(blkarr.blk_sz()) as u32,
                        segment: nested.segment.clone(),
                    }];
                    rec.encode()?
                }
            };
            body.extend_from_slice(&bytes);
        }

        let mut content = vec![0u8; 4];
        content.extend_from_slice(&body);
        let checksum = checksum_bytes(&content);
        content[2..4].copy_from_slice(&checksum.to_le_bytes());

        let needed = content.len() as u64;
        let cur_sz = self.segment.data_size(blkarr.blk_sz());
        if needed != cur_sz {
            if !self.segment.extents.is_empty() || self.segment.inline_data.is_some() {
                alloc.dealloc(&self.segment)?;
            }
            self.segment = alloc.alloc(blkarr, needed)?;
        }
        let mut io = IoSegment::new(blkarr, &mut self.segment);
        io.writeall(&content)?;
        drop(io);

        if release {
            alloc.release(blkarr)?;
        }
        Ok(())
    }

    /// Erase every member and free this set's own catalog storage. Consumes
    /// `self`: a destroyed set has nothing left to operate on.
    pub fn destroy(mut self, blkarr: &mut B, alloc: &mut SegmentAllocator) -> Result<()> {
        for id in self.order.clone() {
            if let Some(handle) = self.children.remove(&id) {
                if let Ok(cell) = Rc::try_unwrap(handle) {
                    destroy_child(cell.into_inner(), blkarr, alloc)?;
                }
            }
        }
        for child in self.to_destroy.drain(..) {
            destroy_child(child, blkarr, alloc)?;
        }
        if !self.segment.extents.is_empty() || self.segment.inline_data.is_some() {
            alloc.dealloc(&self.segment)?;
        }
        Ok(())
    }

    /// Reconstruct a set from a previously-written catalog. Recurses
    /// eagerly into nested sets so the whole tree is available right
    /// away — `File::open` needs every allocated segment up front to
    /// bootstrap the allocator.
    pub fn load(dsc_type: u16, mut segment: Segment, blkarr: &mut B, rt: &mut RuntimeContext) -> Result<Self> {
        let total = segment.data_size(blkarr.blk_sz());
        let mut set = DescriptorSet::empty(dsc_type);
        if total == 0 {
            set.segment = segment;
            return Ok(set);
        }

        let mut content = vec![0u8; total as usize];
        {
            let mut io = IoSegment::new(blkarr, &mut segment);
            io.readall(&mut content)?;
        }
        if content.len() < 4 {
            return Err(XozError::BadFormat(
                "descriptor set content shorter than its 4-byte header".into(),
            ));
        }
        let stored_checksum = u16::from_le_bytes([content[2], content[3]]);
        let mut check_buf = content.clone();
        check_buf[2] = 0;
        check_buf[3] = 0;
        let computed = checksum_bytes(&check_buf);
        if computed != stored_checksum {
            return Err(XozError::BadFormat(format!(
                "descriptor set checksum mismatch: stored {stored_checksum:#06x}, computed {computed:#06x}"
            )));
        }

        let mut pos = 4usize;
        while pos < content.len() {
            let (rec, consumed) = DescriptorRecord::decode(&content[pos..], &rt.registry)?;
            pos += consumed;
            let id = rec
                .meta
                .id
                .ok_or_else(|| XozError::BadFormat("descriptor set entries must carry an id".into()))?;
            if id & ID_TEMPORAL_BIT == 0 {
                rt.register_persistent_id(id)?;
            }

            if rec.body.is_descriptor_set() {
                let child_segment = rec
                    .meta
                    .content
                    .first()
                    .ok_or_else(|| XozError::BadFormat("nested descriptor set has no content part".into()))?
                    .segment
                    .clone();
                let nested = DescriptorSet::load(rec.meta.dsc_type, child_segment, blkarr, rt)?;
                set.children.insert(id, Rc::new(RefCell::new(Child::Set(nested))));
            } else {
                let mut rec = rec;
                if let Some(part) = rec.meta.content.first() {
                    let mut seg = part.segment.clone();
                    let mut buf = vec![0u8; part.csize as usize];
                    {
                        let mut io = IoSegment::new(blkarr, &mut seg);
                        io.readall(&mut buf)?;
                    }
                    rec.body.load_content(&buf)?;
                }
                set.children.insert(id, Rc::new(RefCell::new(Child::Leaf(rec))));
            }
            set.order.push(id);
        }
        set.segment = segment;
        Ok(set)
    }
}

fn destroy_child<B: BlockArray>(child: Child<B>, blkarr: &mut B, alloc: &mut SegmentAllocator) -> Result<()> {
    match child {
        Child::Leaf(rec) => {
            for part in &rec.meta.content {
                alloc.dealloc(&part.segment)?;
            }
        }
        Child::Set(nested) => nested.destroy(blkarr, alloc)?,
    }
    Ok(())
}

fn sync_leaf_content<B: BlockArray>(rec: &mut DescriptorRecord, blkarr: &mut B, alloc: &mut SegmentAllocator) -> Result<()> {
    let bytes = rec.body.content_bytes()?;
    if bytes.is_empty() {
        for part in rec.meta.content.drain(..) {
            alloc.dealloc(&part.segment)?;
        }
        return Ok(());
    }

    let needs_new = match rec.meta.content.first() {
        Some(part) => part.segment.data_size(blkarr.blk_sz()) != bytes.len() as u64,
        None => true,
    };
    if needs_new {
        if let Some(part) = rec.meta.content.first() {
            alloc.dealloc(&part.segment)?;
        }
        let mut seg = alloc.alloc(blkarr, bytes.len() as u64)?;
        {
            let mut io = IoSegment::new(blkarr, &mut seg);
            io.writeall(&bytes)?;
        }
        rec.meta.content = vec![ContentPart {
            csize: bytes.len() as u32,
            segment: seg,
        }];
    } else {
        let part = &mut rec.meta.content[0];
        part.csize = bytes.len() as u32;
        let mut io = IoSegment::new(blkarr, &mut part.segment);
        io.writeall(&bytes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_array::{FileBackend, FileBlockArray};
    use crate::dsc::{NameMappingBody, OpaqueBody};
    use std::collections::BTreeMap as StdBTreeMap;
    use std::io::Cursor;

    fn fresh() -> (FileBlockArray, SegmentAllocator, RuntimeContext) {
        (
            FileBlockArray::new(FileBackend::Memory(Cursor::new(Vec::new())), 128, 0, 0),
            SegmentAllocator::new(),
            RuntimeContext::new(DescriptorRegistry::new()),
        )
    }

    #[test]
    fn add_then_full_sync_then_load_roundtrips_a_leaf() {
        let (mut arr, mut alloc, mut rt) = fresh();
        let mut set: DescriptorSet<FileBlockArray> = DescriptorSet::empty(1);
        let rec = DescriptorRecord::new(0x0500, DescriptorBody::Opaque(OpaqueBody::from_idata(vec![1, 2, 3])));
        let id = set.add(rec, &mut rt);
        set.full_sync(&mut arr, &mut alloc, &mut rt, false).unwrap();

        let reloaded: DescriptorSet<FileBlockArray> =
            DescriptorSet::load(1, set.segment().clone(), &mut arr, &mut rt).unwrap();
        assert_eq!(reloaded.len(), 1);
        let handle = reloaded.get(id).unwrap();
        match &*handle.borrow() {
            Child::Leaf(rec) => match &rec.body {
                DescriptorBody::Opaque(b) => assert_eq!(b.idata(), &[1, 2, 3]),
                _ => panic!("expected opaque"),
            },
            _ => panic!("expected a leaf"),
        }
    }

    #[test]
    fn erase_then_full_sync_drops_the_member() {
        let (mut arr, mut alloc, mut rt) = fresh();
        let mut set: DescriptorSet<FileBlockArray> = DescriptorSet::empty(1);
        let id = set.add(
            DescriptorRecord::new(0x0500, DescriptorBody::Opaque(OpaqueBody::empty())),
            &mut rt,
        );
        set.full_sync(&mut arr, &mut alloc, &mut rt, false).unwrap();
        assert!(set.erase(id, &rt).unwrap());
        set.full_sync(&mut arr, &mut alloc, &mut rt, true).unwrap();

        let reloaded: DescriptorSet<FileBlockArray> =
            DescriptorSet::load(1, set.segment().clone(), &mut arr, &mut rt).unwrap();
        assert_eq!(reloaded.len(), 0);
    }

    #[test]
    fn nested_sets_round_trip_through_full_sync_and_load() {
        let (mut arr, mut alloc, mut rt) = fresh();
        let mut root: DescriptorSet<FileBlockArray> = DescriptorSet::empty(1);
        let (child_id, child_handle) = root.add_set(0x01e5, &mut rt);
        {
            let mut child = child_handle.borrow_mut();
            if let Child::Set(nested) = &mut *child {
                nested.add(
                    DescriptorRecord::new(0x0500, DescriptorBody::Opaque(OpaqueBody::from_idata(vec![9]))),
                    &mut rt,
                );
            }
        }
        root.full_sync(&mut arr, &mut alloc, &mut rt, false).unwrap();

        let reloaded: DescriptorSet<FileBlockArray> =
            DescriptorSet::load(1, root.segment().clone(), &mut arr, &mut rt).unwrap();
        let handle = reloaded.get(child_id).unwrap();
        match &*handle.borrow() {
            Child::Set(nested) => assert_eq!(nested.len(), 1),
            _ => panic!("expected a nested set"),
        }
    }

    #[test]
    fn erase_with_a_live_external_handle_honors_the_fail_policy() {
        let (_arr, _alloc, mut rt) = fresh();
        rt.config.on_external_ref_action = OnExternalRefAction::Fail;
        let mut set: DescriptorSet<FileBlockArray> = DescriptorSet::empty(1);
        let id = set.add(
            DescriptorRecord::new(0x0500, DescriptorBody::Opaque(OpaqueBody::empty())),
            &mut rt,
        );
        let _external = set.get(id).unwrap();
        assert!(set.erase(id, &rt).is_err());
        assert!(set.contains(id));
    }

    #[test]
    fn move_out_transfers_membership_without_touching_content_segments() {
        let (mut arr, mut alloc, mut rt) = fresh();
        let mut src: DescriptorSet<FileBlockArray> = DescriptorSet::empty(1);
        let mut dst: DescriptorSet<FileBlockArray> = DescriptorSet::empty(2);
        let id = src.add(
            DescriptorRecord::new(0x0500, DescriptorBody::Opaque(OpaqueBody::from_idata(vec![1, 2, 3]))),
            &mut rt,
        );
        src.full_sync(&mut arr, &mut alloc, &mut rt, false).unwrap();

        let segment_before = match &*src.get(id).unwrap().borrow() {
            Child::Leaf(rec) => rec.meta.content.first().map(|p| p.segment.clone()),
            _ => panic!("expected a leaf"),
        };
        let stats_before = alloc.stats();

        src.move_out(id, &mut dst).unwrap();
        assert!(!src.contains(id));
        assert!(dst.contains(id));
        assert_eq!(src.ids().collect::<Vec<_>>(), Vec::<u32>::new());
        assert_eq!(dst.ids().collect::<Vec<_>>(), vec![id]);

        src.full_sync(&mut arr, &mut alloc, &mut rt, false).unwrap();
        dst.full_sync(&mut arr, &mut alloc, &mut rt, false).unwrap();

        let segment_after = match &*dst.get(id).unwrap().borrow() {
            Child::Leaf(rec) => rec.meta.content.first().map(|p| p.segment.clone()),
            _ => panic!("expected a leaf"),
        };
        assert_eq!(segment_before, segment_after, "content segment's extents must survive the move untouched");
        assert_eq!(alloc.stats().free_whole_blocks, stats_before.free_whole_blocks);
        assert_eq!(alloc.stats().alloc_calls, stats_before.alloc_calls, "no new allocation for the moved content");

        let reloaded_dst: DescriptorSet<FileBlockArray> =
            DescriptorSet::load(2, dst.segment().clone(), &mut arr, &mut rt).unwrap();
        assert_eq!(reloaded_dst.len(), 1);
        assert!(reloaded_dst.contains(id));
    }

    #[test]
    fn move_out_of_a_missing_id_leaves_both_sets_untouched() {
        let (_arr, _alloc, mut rt) = fresh();
        let mut src: DescriptorSet<FileBlockArray> = DescriptorSet::empty(1);
        let mut dst: DescriptorSet<FileBlockArray> = DescriptorSet::empty(2);
        let id = src.add(
            DescriptorRecord::new(0x0500, DescriptorBody::Opaque(OpaqueBody::empty())),
            &mut rt,
        );
        assert!(src.move_out(0xdead_beef, &mut dst).is_err());
        assert!(src.contains(id));
        assert!(dst.is_empty());
    }

    #[test]
    fn name_mapping_descriptor_content_round_trips_through_a_set() {
        let (mut arr, mut alloc, mut rt) = fresh();
        let mut set: DescriptorSet<FileBlockArray> = DescriptorSet::empty(1);
        let mut map = StdBTreeMap::new();
        map.insert("alpha".to_string(), 7u32);
        let mut body = NameMappingBody::empty();
        body.store(map).unwrap();
        let id = set.add(DescriptorRecord::new(0x01bf, DescriptorBody::NameMapping(body)), &mut rt);
        set.full_sync(&mut arr, &mut alloc, &mut rt, false).unwrap();

        let reloaded: DescriptorSet<FileBlockArray> =
            DescriptorSet::load(1, set.segment().clone(), &mut arr, &mut rt).unwrap();
        let handle = reloaded.get(id).unwrap();
        match &*handle.borrow() {
            Child::Leaf(rec) => match &rec.body {
                DescriptorBody::NameMapping(b) => assert_eq!(b.load().get("alpha"), Some(&7)),
                _ => panic!("expected a name mapping body"),
            },
            _ => panic!("expected a leaf"),
        }
    }
}
