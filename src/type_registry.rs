//! Process-wide dense component/event type registry.
//!
//! Grounded in `component.rs`'s `Component` trait, which carried a
//! compile-time `TABLE_ID`. IDs here are assigned dynamically at `register`
//! time instead and are dense, not author-chosen. The registry is shared by
//! every `World` in the process — isolation between concurrent worlds is
//! achieved by mapping the same type to the same ID in all worlds
//! (`SPEC_FULL.md` §4.1) — so it lives behind a lazily-initialized global
//! lock rather than inside `World`.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::HashMap;

use crate::error::{EcsError, Result};

/// Dense component-type ID, always in `[0, 256)`.
pub type ComponentId = u8;

pub const MAX_COMPONENT_TYPES: usize = 256;

/// Per-type data-policy flags (spec §3, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypePolicy {
    pub snapshotable: bool,
    pub recordable: bool,
    pub saveable: bool,
    pub needs_clone: bool,
}

impl TypePolicy {
    /// Default policy for unmanaged (POD) components: fully snapshotable,
    /// recordable and saveable; no clone needed since they are `Copy`.
    pub const fn pod_default() -> Self {
        Self {
            snapshotable: true,
            recordable: true,
            saveable: true,
            needs_clone: false,
        }
    }

    /// Default policy for managed reference types that behave as immutable
    /// records.
    pub const fn immutable_record_default() -> Self {
        Self {
            snapshotable: true,
            recordable: true,
            saveable: true,
            needs_clone: false,
        }
    }

    /// Default policy for mutable managed classes: not snapshotable unless
    /// the caller opts in explicitly via `set_policy`.
    pub const fn mutable_class_default() -> Self {
        Self {
            snapshotable: false,
            recordable: true,
            saveable: true,
            needs_clone: true,
        }
    }
}

struct RegistryInner {
    ids: HashMap<TypeId, ComponentId>,
    names: Vec<&'static str>,
    policies: Vec<TypePolicy>,
}

impl RegistryInner {
    fn new() -> Self {
        Self {
            ids: HashMap::new(),
            names: Vec::new(),
            policies: Vec::new(),
        }
    }
}

static REGISTRY: Lazy<RwLock<RegistryInner>> = Lazy::new(|| RwLock::new(RegistryInner::new()));

/// Handle to the process-wide type registry. Stateless — every method reads
/// or writes the single global table behind an internal lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeRegistry;

impl TypeRegistry {
    pub fn new() -> Self {
        Self
    }

    /// Registers `T` with a default policy, or returns its existing ID.
    pub fn register<T: 'static>(&self, default_policy: TypePolicy) -> Result<ComponentId> {
        let type_id = TypeId::of::<T>();
        {
            let read = REGISTRY.read();
            if let Some(&id) = read.ids.get(&type_id) {
                return Ok(id);
            }
        }
        let mut write = REGISTRY.write();
        // Re-check under the write lock in case of a race with another
        // thread's registration.
        if let Some(&id) = write.ids.get(&type_id) {
            return Ok(id);
        }
        if write.names.len() >= MAX_COMPONENT_TYPES {
            return Err(EcsError::Overflow);
        }
        let id = write.names.len() as ComponentId;
        write.ids.insert(type_id, id);
        write.names.push(std::any::type_name::<T>());
        write.policies.push(default_policy);
        Ok(id)
    }

    pub fn set_policy<T: 'static>(&self, policy: TypePolicy) -> Result<()> {
        let id = self
            .id_of::<T>()
            .ok_or(EcsError::NotRegistered(std::any::type_name::<T>()))?;
        REGISTRY.write().policies[id as usize] = policy;
        Ok(())
    }

    pub fn id_of<T: 'static>(&self) -> Option<ComponentId> {
        REGISTRY.read().ids.get(&TypeId::of::<T>()).copied()
    }

    pub fn policy_of(&self, id: ComponentId) -> Option<TypePolicy> {
        REGISTRY.read().policies.get(id as usize).copied()
    }

    pub fn type_name(&self, id: ComponentId) -> Option<&'static str> {
        REGISTRY.read().names.get(id as usize).copied()
    }

    pub fn count(&self) -> usize {
        REGISTRY.read().names.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Alpha;
    struct Beta;

    #[test]
    fn register_is_idempotent_and_dense() {
        let reg = TypeRegistry::new();
        let a1 = reg.register::<Alpha>(TypePolicy::pod_default()).unwrap();
        let a2 = reg.register::<Alpha>(TypePolicy::pod_default()).unwrap();
        assert_eq!(a1, a2);
        let b = reg.register::<Beta>(TypePolicy::pod_default()).unwrap();
        assert_ne!(a1, b);
        assert_eq!(reg.id_of::<Alpha>(), Some(a1));
        assert_eq!(reg.type_name(a1), Some(std::any::type_name::<Alpha>()));
    }

    #[test]
    fn set_policy_updates_flags() {
        let reg = TypeRegistry::new();
        struct Gamma;
        let id = reg.register::<Gamma>(TypePolicy::pod_default()).unwrap();
        assert!(reg.policy_of(id).unwrap().snapshotable);
        reg.set_policy::<Gamma>(TypePolicy::mutable_class_default())
            .unwrap();
        assert!(!reg.policy_of(id).unwrap().snapshotable);
    }
}
