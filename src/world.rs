//! The repository: owns entities, component tables, singletons, phase
//! state, and the event bus (spec §4.6).
//!
//! Grounded in `db.rs`'s `Database`, which held the same set of
//! collaborators (`entity_registry`, a dense table dispatch, a version
//! counter) behind one façade type, there wrapping each collaborator in
//! `Arc<RwLock<_>>` for multi-threaded access. Under the single-threaded-
//! cooperative model this crate targets (`SPEC_FULL.md` §5), `World` instead
//! exposes the same exclusivity through `&mut self`/`&self` and owns its
//! collaborators directly, with no interior locking except where §5
//! explicitly calls for concurrent access (the event bus, the process-wide
//! type registry).

use std::any::Any;
use std::collections::HashMap;

use bytemuck::Pod;

use crate::entity::{Entity, EntityIndex, Lifecycle, LifecycleDescriptor};
use crate::error::{EcsError, Result};
use crate::event_bus::EventBus;
use crate::mask::BitMask256;
use crate::phase::{self, Phase, PhaseTransitionTable};
use crate::storage::{ComponentStorage, ComponentTable, ManagedTable};
use crate::type_registry::{ComponentId, TypePolicy, TypeRegistry};

/// The ECS repository: one process-wide type registry's view of entities,
/// their component data, singletons, and the current frame phase.
pub struct World {
    pub(crate) entities: EntityIndex,
    tables: Vec<Option<Box<dyn ComponentStorage>>>,
    singletons: HashMap<ComponentId, Box<dyn Any + Send + Sync>>,
    singleton_versions: HashMap<ComponentId, u64>,
    lifecycle: HashMap<u32, LifecycleDescriptor>,
    registry: TypeRegistry,
    pub event_bus: EventBus,
    phase: Phase,
    phase_transitions: PhaseTransitionTable,
    global_version: u64,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self {
            entities: EntityIndex::new(),
            tables: Vec::new(),
            singletons: HashMap::new(),
            singleton_versions: HashMap::new(),
            lifecycle: HashMap::new(),
            registry: TypeRegistry::new(),
            event_bus: EventBus::new(),
            phase: Phase::Initialization,
            phase_transitions: PhaseTransitionTable::default(),
            global_version: 0,
        }
    }

    pub fn global_version(&self) -> u64 {
        self.global_version
    }

    /// Overwrites `global_version` directly, used by playback to pin the
    /// world at a recorded frame's tick rather than advancing one at a time.
    pub(crate) fn set_global_version(&mut self, tick: u64) {
        self.global_version = tick;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn entities(&self) -> &EntityIndex {
        &self.entities
    }

    /// Atomically increments `global_version` (spec §4.6, §8: "after
    /// `tick()`, `global_version` increases by exactly 1").
    pub fn tick(&mut self) -> u64 {
        self.global_version += 1;
        self.global_version
    }

    /// Validates the transition against `phase_transitions` (defaults to
    /// the single-step cycle `phase::Phase::next` encodes) and rejects an
    /// illegal jump with `IllegalPhaseTransition`. Permission is derived
    /// from the phase itself, so there is no separate cache to invalidate
    /// once the transition is accepted.
    pub fn set_phase(&mut self, phase: Phase) -> Result<()> {
        if !self.phase_transitions.is_allowed(self.phase, phase) {
            return Err(EcsError::IllegalPhaseTransition {
                from: self.phase,
                to: phase,
            });
        }
        self.phase = phase;
        Ok(())
    }

    /// Replaces the transition table `set_phase` validates against (spec
    /// §4.10: "configurable transition table").
    pub fn set_phase_transitions(&mut self, table: PhaseTransitionTable) {
        self.phase_transitions = table;
    }

    fn ensure_table_slot(&mut self, id: ComponentId) {
        let id = id as usize;
        while self.tables.len() <= id {
            self.tables.push(None);
        }
    }

    /// Registers an unmanaged (POD) component type and returns its dense
    /// ID, creating the backing table on first registration.
    pub fn register_component<T: Pod + Send + Sync + 'static>(&mut self) -> Result<ComponentId> {
        let id = self.registry.register::<T>(TypePolicy::pod_default())?;
        self.ensure_table_slot(id);
        let slot = &mut self.tables[id as usize];
        if slot.is_none() {
            *slot = Some(Box::new(ComponentTable::<T>::new(id)));
        }
        Ok(id)
    }

    /// Registers a managed (reference) component type and returns its dense
    /// ID, creating the backing table on first registration.
    pub fn register_managed_component<T: Clone + Send + Sync + 'static>(
        &mut self,
    ) -> Result<ComponentId> {
        let id = self
            .registry
            .register::<T>(TypePolicy::mutable_class_default())?;
        self.ensure_table_slot(id);
        let slot = &mut self.tables[id as usize];
        if slot.is_none() {
            *slot = Some(Box::new(ManagedTable::<T>::new(id)));
        }
        Ok(id)
    }

    fn component_id<T: 'static>(&self) -> Result<ComponentId> {
        self.registry
            .id_of::<T>()
            .ok_or(EcsError::NotRegistered(std::any::type_name::<T>()))
    }

    fn table_mut<T: Pod + Send + Sync + 'static>(&mut self) -> Result<&mut ComponentTable<T>> {
        let id = self.component_id::<T>()?;
        let storage = self.tables[id as usize]
            .as_mut()
            .ok_or(EcsError::NotRegistered(std::any::type_name::<T>()))?;
        storage
            .as_any_mut()
            .downcast_mut::<ComponentTable<T>>()
            .ok_or(EcsError::Unsupported)
    }

    fn table_ref<T: Pod + Send + Sync + 'static>(&self) -> Result<&ComponentTable<T>> {
        let id = self.component_id::<T>()?;
        let storage = self.tables[id as usize]
            .as_ref()
            .ok_or(EcsError::NotRegistered(std::any::type_name::<T>()))?;
        storage
            .as_any()
            .downcast_ref::<ComponentTable<T>>()
            .ok_or(EcsError::Unsupported)
    }

    fn managed_table_mut<T: Clone + Send + Sync + 'static>(
        &mut self,
    ) -> Result<&mut ManagedTable<T>> {
        let id = self.component_id::<T>()?;
        let storage = self.tables[id as usize]
            .as_mut()
            .ok_or(EcsError::NotRegistered(std::any::type_name::<T>()))?;
        storage
            .as_any_mut()
            .downcast_mut::<ManagedTable<T>>()
            .ok_or(EcsError::Unsupported)
    }

    fn managed_table_ref<T: Clone + Send + Sync + 'static>(
        &self,
    ) -> Result<&ManagedTable<T>> {
        let id = self.component_id::<T>()?;
        let storage = self.tables[id as usize]
            .as_ref()
            .ok_or(EcsError::NotRegistered(std::any::type_name::<T>()))?;
        storage
            .as_any()
            .downcast_ref::<ManagedTable<T>>()
            .ok_or(EcsError::Unsupported)
    }

    pub fn create_entity(&mut self) -> Entity {
        let entity = self.entities.create();
        if let Some(header) = self.entities.get_header_mut(entity.index) {
            header.last_change_tick = self.global_version;
        }
        entity
    }

    /// Creates an entity pending readiness acknowledgement from
    /// `required_mask`'s modules before it transitions to `Active` (spec §3
    /// lifecycle).
    pub fn create_staged_entity(&mut self, required_mask: BitMask256, authority: BitMask256) -> Entity {
        let entity = self.entities.create();
        if let Some(header) = self.entities.get_header_mut(entity.index) {
            header.authority_mask = authority;
            header.set_lifecycle(Lifecycle::Constructing);
            header.last_change_tick = self.global_version;
        }
        self.lifecycle
            .insert(entity.index, LifecycleDescriptor::new(required_mask));
        entity
    }

    /// Acknowledges a module's readiness for a staged entity, advancing its
    /// lifecycle to `Active` once every required module has acked.
    pub fn ack_module_ready(&mut self, entity: Entity, module_bit: u8) -> Result<()> {
        self.entities.header_checked(entity)?;
        if let Some(desc) = self.lifecycle.get_mut(&entity.index) {
            desc.ack(module_bit);
            let ready = desc.is_ready();
            if ready {
                if let Some(header) = self.entities.get_header_mut(entity.index) {
                    header.set_lifecycle(Lifecycle::Active);
                }
            }
        }
        Ok(())
    }

    /// Advances staged-entity ages by `delta_seconds` and destroys any whose
    /// accumulated age exceeds the 5s zombie timeout without readiness.
    pub fn advance_staged_lifecycles(&mut self, delta_seconds: f64) -> Result<()> {
        let mut timed_out = Vec::new();
        for (&index, desc) in self.lifecycle.iter_mut() {
            if desc.is_ready() {
                continue;
            }
            desc.age_seconds += delta_seconds;
            if desc.is_timed_out() {
                timed_out.push(index);
            }
        }
        for index in timed_out {
            self.lifecycle.remove(&index);
            if let Some(header) = self.entities.get_header(index) {
                if header.is_active() {
                    let entity = Entity {
                        index,
                        generation: header.generation,
                    };
                    self.destroy_entity(entity)?;
                }
            }
        }
        Ok(())
    }

    pub fn destroy_entity(&mut self, entity: Entity) -> Result<()> {
        self.lifecycle.remove(&entity.index);
        self.entities.destroy(entity)
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    fn check_write_access(&self, entity: Entity, id: ComponentId) -> Result<()> {
        let header = self.entities.header_checked(entity)?;
        let has_authority = header.authority_mask.test(id);
        phase::validate_write_access(self.phase, entity, has_authority)
    }

    /// Adds or overwrites an unmanaged component on `entity`. Both "add"
    /// and "set" are the same write at this layer; the distinction in the
    /// spec is about whether the component was already present, which
    /// callers can check with `has` first.
    pub fn set<T: Pod + Send + Sync + 'static>(&mut self, entity: Entity, value: T) -> Result<()> {
        let id = self.component_id::<T>()?;
        self.check_write_access(entity, id)?;
        let tick = self.global_version;
        self.table_mut::<T>()?.set(entity.index, value, tick);
        let header = self
            .entities
            .get_header_mut(entity.index)
            .expect("checked above");
        header.component_mask.set(id);
        header.last_change_tick = tick;
        Ok(())
    }

    pub fn get_ro<T: Pod + Send + Sync + 'static>(&self, entity: Entity) -> Result<&T> {
        let id = self.component_id::<T>()?;
        let header = self.entities.header_checked(entity)?;
        if !header.component_mask.test(id) {
            return Err(EcsError::MissingComponent(entity));
        }
        self.table_ref::<T>()?
            .get(entity.index)
            .ok_or(EcsError::MissingComponent(entity))
    }

    pub fn get_rw<T: Pod + Send + Sync + 'static>(&mut self, entity: Entity) -> Result<&mut T> {
        let id = self.component_id::<T>()?;
        self.check_write_access(entity, id)?;
        let header = self.entities.header_checked(entity)?;
        if !header.component_mask.test(id) {
            return Err(EcsError::MissingComponent(entity));
        }
        let tick = self.global_version;
        self.entities
            .get_header_mut(entity.index)
            .expect("checked above")
            .last_change_tick = tick;
        self.table_mut::<T>()?
            .get_mut(entity.index, tick)
            .ok_or(EcsError::MissingComponent(entity))
    }

    pub fn try_get<T: Pod + Send + Sync + 'static>(&self, entity: Entity) -> Option<&T> {
        self.get_ro::<T>(entity).ok()
    }

    pub fn has<T: 'static>(&self, entity: Entity) -> bool {
        let Some(id) = self.registry.id_of::<T>() else {
            return false;
        };
        self.entities
            .get_header(entity.index)
            .map(|h| h.is_active() && h.generation == entity.generation && h.component_mask.test(id))
            .unwrap_or(false)
    }

    pub fn remove<T: Pod + Send + Sync + 'static>(&mut self, entity: Entity) -> Result<()> {
        let id = self.component_id::<T>()?;
        self.check_write_access(entity, id)?;
        let header = self.entities.header_checked(entity)?;
        if !header.component_mask.test(id) {
            return Err(EcsError::MissingComponent(entity));
        }
        self.table_mut::<T>()?.clear_slot(entity.index);
        let header = self
            .entities
            .get_header_mut(entity.index)
            .expect("checked above");
        header.component_mask.clear(id);
        header.authority_mask.clear(id);
        Ok(())
    }

    pub fn set_managed<T: Clone + Send + Sync + 'static>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<()> {
        let id = self.component_id::<T>()?;
        self.check_write_access(entity, id)?;
        let tick = self.global_version;
        self.managed_table_mut::<T>()?.set(entity.index, value, tick);
        let header = self
            .entities
            .get_header_mut(entity.index)
            .expect("checked above");
        header.component_mask.set(id);
        header.last_change_tick = tick;
        Ok(())
    }

    pub fn get_managed<T: Clone + Send + Sync + 'static>(&self, entity: Entity) -> Result<&T> {
        let id = self.component_id::<T>()?;
        let header = self.entities.header_checked(entity)?;
        if !header.component_mask.test(id) {
            return Err(EcsError::MissingComponent(entity));
        }
        self.managed_table_ref::<T>()?
            .get(entity.index)
            .ok_or(EcsError::MissingComponent(entity))
    }

    pub fn remove_managed<T: Clone + Send + Sync + 'static>(&mut self, entity: Entity) -> Result<()> {
        let id = self.component_id::<T>()?;
        self.check_write_access(entity, id)?;
        self.managed_table_mut::<T>()?.clear_slot(entity.index);
        let header = self
            .entities
            .get_header_mut(entity.index)
            .expect("checked above");
        header.component_mask.clear(id);
        header.authority_mask.clear(id);
        Ok(())
    }

    /// Flips `entity`'s authority bit for `T`. Requires the component to
    /// already be present (spec §4.6).
    pub fn set_authority<T: 'static>(&mut self, entity: Entity, owned: bool) -> Result<()> {
        let id = self.component_id::<T>()?;
        let header = self.entities.header_mut_checked(entity)?;
        if !header.component_mask.test(id) {
            return Err(EcsError::AuthorityConflict(entity));
        }
        if owned {
            header.authority_mask.set(id);
        } else {
            header.authority_mask.clear(id);
        }
        Ok(())
    }

    pub fn set_singleton<T: Send + Sync + 'static>(&mut self, value: T) -> Result<()> {
        let id = self.registry.register::<T>(TypePolicy::pod_default())?;
        self.singletons.insert(id, Box::new(value));
        self.singleton_versions.insert(id, self.global_version);
        Ok(())
    }

    pub fn get_singleton<T: Send + Sync + 'static>(&self) -> Option<&T> {
        let id = self.registry.id_of::<T>()?;
        self.singletons.get(&id)?.downcast_ref::<T>()
    }

    pub fn has_singleton<T: 'static>(&self) -> bool {
        match self.registry.id_of::<T>() {
            Some(id) => self.singletons.contains_key(&id),
            None => false,
        }
    }

    pub fn type_registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Sets `entity`'s `component_mask` bit for `id` and stamps
    /// `last_change_tick`, without touching any table. Used by
    /// `CommandBuffer::playback`, which writes table bytes directly through
    /// `table_mut_by_id` rather than through `World::set`.
    pub(crate) fn mark_component_present(&mut self, entity: Entity, id: ComponentId) {
        let tick = self.global_version;
        if let Some(header) = self.entities.get_header_mut(entity.index) {
            header.component_mask.set(id);
            header.last_change_tick = tick;
        }
    }

    /// Clears `entity`'s `component_mask` and `authority_mask` bits for
    /// `id`, the header-side counterpart of `CommandBuffer::playback`'s
    /// direct table clear.
    pub(crate) fn mark_component_absent(&mut self, entity: Entity, id: ComponentId) {
        if let Some(header) = self.entities.get_header_mut(entity.index) {
            header.component_mask.clear(id);
            header.authority_mask.clear(id);
        }
    }

    pub(crate) fn table(&self, id: ComponentId) -> Option<&dyn ComponentStorage> {
        self.tables.get(id as usize).and_then(|t| t.as_deref())
    }

    pub(crate) fn table_mut_by_id(&mut self, id: ComponentId) -> Option<&mut Box<dyn ComponentStorage>> {
        self.tables.get_mut(id as usize).and_then(|t| t.as_mut())
    }

    pub(crate) fn singleton_blob(&self, id: ComponentId) -> Option<(&(dyn Any + Send + Sync), u64)> {
        let value = self.singletons.get(&id)?;
        let version = self.singleton_versions.get(&id).copied().unwrap_or(0);
        Some((value.as_ref(), version))
    }

    /// Installs a type-erased singleton value restored by playback, bypassing
    /// the `TypeRegistry::register::<T>()` path since the concrete `T` is
    /// unknown to this crate for managed types.
    pub(crate) fn restore_singleton_raw(&mut self, id: ComponentId, value: Box<dyn Any + Send + Sync>) {
        self.singletons.insert(id, value);
        self.singleton_versions.insert(id, self.global_version);
    }

    /// Copies one entity-header chunk's raw bytes restored by playback
    /// (`type_id = -1` in the frame format) back into the entity index.
    pub(crate) fn restore_header_chunk(&mut self, chunk_idx: usize, bytes: &[u8]) {
        self.entities.restore_chunk(chunk_idx, bytes);
    }

    /// Recomputes `EntityIndex` bookkeeping after a bulk chunk restore.
    pub(crate) fn rebuild_entity_metadata(&mut self) {
        self.entities.rebuild_metadata();
    }

    /// Resets the entity index, singletons, and lifecycle bookkeeping before
    /// a keyframe is applied (spec §4.11: a keyframe fully replaces world
    /// state rather than patching it). Component tables are left registered
    /// so the chunk blobs that follow have somewhere to land by ID; any
    /// stale slot data beyond the keyframe's restored range is orphaned and
    /// unreachable once no live header's `component_mask` references it.
    pub(crate) fn clear_all_for_keyframe(&mut self) {
        self.entities = EntityIndex::new();
        self.singletons.clear();
        self.singleton_versions.clear();
        self.lifecycle.clear();
    }

    /// Per-table shallow sync of dirty chunks from `other` into `self`,
    /// optionally restricted to the component types set in `mask` (spec
    /// §4.6). Both worlds must have registered the same types at the same
    /// IDs, which holds automatically since IDs come from the shared
    /// process-wide registry.
    pub fn sync_from(&mut self, other: &World, mask: Option<&BitMask256>) -> Result<()> {
        for id in 0..self.tables.len().min(other.tables.len()) {
            let id = id as u8;
            if let Some(mask) = mask {
                if !mask.test(id) {
                    continue;
                }
            }
            let Some(src) = other.tables[id as usize].as_ref() else {
                continue;
            };
            self.ensure_table_slot(id);
            if self.tables[id as usize].is_none() {
                continue;
            }
            for chunk_idx in 0..src.chunk_count() {
                let mut bytes = Vec::new();
                if src.copy_chunk(chunk_idx, &mut bytes).is_ok() && !bytes.is_empty() {
                    let dst = self.tables[id as usize].as_mut().unwrap();
                    let _ = dst.restore_chunk(chunk_idx, &bytes);
                }
            }
        }
        Ok(())
    }
}
