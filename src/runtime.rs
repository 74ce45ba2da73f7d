//! Session-scoped state a `File` thread through every loader, factory, and
//! `DescriptorSet` operation: the descriptor-type registry, id bookkeeping,
//! and policy knobs. Grounded in the small context-struct-plus-dispatch
//! pattern the teacher uses for `hal::fs::FileSystem`/`hal::vfs`, adapted
//! to carry policy instead of async device handles.
//!
//! Confining this to a value passed explicitly (rather than a global) is
//! what the distilled spec's "Global state" design note asks for: the id
//! manager tracks used persistent ids for the lifetime of one `File`
//! session, not process-wide.

use std::collections::BTreeSet;

use crate::dsc::DescriptorRegistry;
use crate::error::{Result, XozError};

pub const ID_TEMPORAL_BIT: u32 = 0x8000_0000;

/// What to do when a descriptor is erased from its set while an external
/// `Rc` handle to it is still alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnExternalRefAction {
    /// Erase anyway; the external handle keeps the descriptor alive via
    /// its own `Rc` but it is detached from the set.
    Pass,
    /// Erase anyway, logging a warning.
    Warn,
    /// Refuse the erase.
    Fail,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub on_external_ref_action: OnExternalRefAction,
    /// `blk_sz_order` used by `File::create` when the caller doesn't
    /// specify one explicitly.
    pub default_blk_sz_order: u8,
    /// Grow the trampoline when its current data space is smaller than
    /// required; this is exact, not a factor (always grows to exactly fit
    /// what's required, unlike shrink below, which is hysteresis-gated).
    pub trampoline_shrink_factor: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            on_external_ref_action: OnExternalRefAction::Pass,
            default_blk_sz_order: 10, // 1 KiB blocks
            trampoline_shrink_factor: 2,
        }
    }
}

/// Id bookkeeping and the descriptor-type registry, threaded explicitly
/// through every `DescriptorSet` operation that needs to mint or validate
/// an id rather than stashed in a global.
pub struct RuntimeContext {
    pub config: RuntimeConfig,
    pub registry: DescriptorRegistry,
    next_temporal: u32,
    next_persistent_candidate: u32,
    used_persistent_ids: BTreeSet<u32>,
}

impl RuntimeContext {
    pub fn new(registry: DescriptorRegistry) -> Self {
        Self::with_config(registry, RuntimeConfig::default())
    }

    pub fn with_config(registry: DescriptorRegistry, config: RuntimeConfig) -> Self {
        RuntimeContext {
            config,
            registry,
            next_temporal: 1,
            next_persistent_candidate: 1,
            used_persistent_ids: BTreeSet::new(),
        }
    }

    /// Mint a fresh temporal id (high bit set), unique for the lifetime of
    /// this `RuntimeContext`.
    pub fn new_temporal_id(&mut self) -> u32 {
        let id = self.next_temporal | ID_TEMPORAL_BIT;
        self.next_temporal = self.next_temporal.wrapping_add(1);
        id
    }

    /// Reserve `id` (a persistent id, high bit clear) as in-use, e.g.
    /// because it was just read from disk. Errors if it was already
    /// reserved (file-wide uniqueness).
    pub fn register_persistent_id(&mut self, id: u32) -> Result<()> {
        if id & ID_TEMPORAL_BIT != 0 {
            return Err(XozError::InternalBug(format!(
                "id {id:#x} has the temporal bit set and cannot be registered as persistent"
            )));
        }
        if id == 0 {
            return Err(XozError::BadDescriptor {
                dsc_type: 0,
                reason: "persistent id 0 is not valid".into(),
            });
        }
        if !self.used_persistent_ids.insert(id) {
            return Err(XozError::BadDescriptor {
                dsc_type: 0,
                reason: format!("persistent id {id:#x} is already in use"),
            });
        }
        Ok(())
    }

    /// Mint the next unused persistent id.
    pub fn assign_persistent_id(&mut self) -> u32 {
        loop {
            let candidate = self.next_persistent_candidate;
            self.next_persistent_candidate = self.next_persistent_candidate.wrapping_add(1);
            if candidate != 0 && candidate & ID_TEMPORAL_BIT == 0 && self.used_persistent_ids.insert(candidate) {
                return candidate;
            }
        }
    }

    pub fn release_persistent_id(&mut self, id: u32) {
        self.used_persistent_ids.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporal_ids_always_carry_the_high_bit() {
        let mut rt = RuntimeContext::new(DescriptorRegistry::new());
        for _ in 0..4 {
            assert!(rt.new_temporal_id() & ID_TEMPORAL_BIT != 0);
        }
    }

    #[test]
    fn persistent_ids_are_unique() {
        let mut rt = RuntimeContext::new(DescriptorRegistry::new());
        let a = rt.assign_persistent_id();
        let b = rt.assign_persistent_id();
        assert_ne!(a, b);
        assert_eq!(a & ID_TEMPORAL_BIT, 0);
    }

    #[test]
    fn registering_a_duplicate_persistent_id_fails() {
        let mut rt = RuntimeContext::new(DescriptorRegistry::new());
        rt.register_persistent_id(10).unwrap();
        assert!(rt.register_persistent_id(10).is_err());
    }

    #[test]
    fn assign_persistent_id_skips_registered_ids() {
        let mut rt = RuntimeContext::new(DescriptorRegistry::new());
        rt.register_persistent_id(1).unwrap();
        let id = rt.assign_persistent_id();
        assert_ne!(id, 1);
    }
}
