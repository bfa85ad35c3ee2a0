//! Deferred structural-change log with placeholder-handle remapping
//! (spec §4.8).
//!
//! Grounded in `transaction/write_queue.rs`'s `WriteOp`/
//! `WriteOpWithoutResponse` tagged enums, but stripped of the channel/
//! background-thread machinery: the caller owns a `CommandBuffer` per
//! worker, and the coordinating thread collects and plays them back with no
//! ambient thread state. Commands are buffered as a plain `Vec<Command>` and
//! applied synchronously by `playback`.

use std::any::Any;

use bytemuck::Pod;

use crate::entity::Entity;
use crate::error::{EcsError, Result};
use crate::type_registry::ComponentId;
use crate::world::World;

/// Component payloads above this size are rejected at record time (spec
/// §4.8).
pub const MAX_PAYLOAD_BYTES: usize = 1024;

/// A handle recorded into a command buffer: either a real, already-live
/// entity, or a placeholder standing in for an entity this same buffer will
/// create during playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandHandle {
    Real(Entity),
    /// Negative-indexed placeholder minted by `CommandBuffer::create_entity`.
    Placeholder(i32),
}

impl From<Entity> for CommandHandle {
    fn from(e: Entity) -> Self {
        CommandHandle::Real(e)
    }
}

enum Command {
    CreateEntity { placeholder: i32 },
    DestroyEntity { handle: CommandHandle },
    AddComponent { handle: CommandHandle, type_id: ComponentId, bytes: Vec<u8> },
    SetComponent { handle: CommandHandle, type_id: ComponentId, bytes: Vec<u8> },
    RemoveComponent { handle: CommandHandle, type_id: ComponentId },
    AddManagedComponent { handle: CommandHandle, type_id: ComponentId, object_slot: usize },
    SetManagedComponent { handle: CommandHandle, type_id: ComponentId, object_slot: usize },
    RemoveManagedComponent { handle: CommandHandle, type_id: ComponentId },
}

/// Per-thread deferred mutation log. Filled by worker threads (or the main
/// thread) during a parallel query or a system that must not mutate the
/// world directly, then played back on the coordinating thread.
#[derive(Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
    managed_payloads: Vec<Option<Box<dyn Any + Send + Sync>>>,
    next_placeholder: i32,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            managed_payloads: Vec::new(),
            next_placeholder: -1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns a placeholder handle for an entity that will exist once this
    /// buffer is played back.
    pub fn create_entity(&mut self) -> CommandHandle {
        let placeholder = self.next_placeholder;
        self.next_placeholder -= 1;
        self.commands.push(Command::CreateEntity { placeholder });
        CommandHandle::Placeholder(placeholder)
    }

    pub fn destroy_entity(&mut self, handle: CommandHandle) {
        self.commands.push(Command::DestroyEntity { handle });
    }

    fn encode<T: Pod>(value: &T) -> Result<Vec<u8>> {
        let bytes = bytemuck::bytes_of(value).to_vec();
        if bytes.len() > MAX_PAYLOAD_BYTES {
            return Err(EcsError::PayloadTooLarge { size: bytes.len() });
        }
        Ok(bytes)
    }

    pub fn add_component<T: Pod + Send + Sync + 'static>(
        &mut self,
        handle: CommandHandle,
        type_id: ComponentId,
        value: T,
    ) -> Result<()> {
        let bytes = Self::encode(&value)?;
        self.commands.push(Command::AddComponent { handle, type_id, bytes });
        Ok(())
    }

    pub fn set_component<T: Pod + Send + Sync + 'static>(
        &mut self,
        handle: CommandHandle,
        type_id: ComponentId,
        value: T,
    ) -> Result<()> {
        let bytes = Self::encode(&value)?;
        self.commands.push(Command::SetComponent { handle, type_id, bytes });
        Ok(())
    }

    pub fn remove_component(&mut self, handle: CommandHandle, type_id: ComponentId) {
        self.commands.push(Command::RemoveComponent { handle, type_id });
    }

    fn push_managed_payload(&mut self, value: Box<dyn Any + Send + Sync>) -> usize {
        let slot = self.managed_payloads.len();
        self.managed_payloads.push(Some(value));
        slot
    }

    pub fn add_managed_component<T: Clone + Send + Sync + 'static>(
        &mut self,
        handle: CommandHandle,
        type_id: ComponentId,
        value: T,
    ) {
        let slot = self.push_managed_payload(Box::new(value));
        self.commands.push(Command::AddManagedComponent { handle, type_id, object_slot: slot });
    }

    pub fn set_managed_component<T: Clone + Send + Sync + 'static>(
        &mut self,
        handle: CommandHandle,
        type_id: ComponentId,
        value: T,
    ) {
        let slot = self.push_managed_payload(Box::new(value));
        self.commands.push(Command::SetManagedComponent { handle, type_id, object_slot: slot });
    }

    pub fn remove_managed_component(&mut self, handle: CommandHandle, type_id: ComponentId) {
        self.commands.push(Command::RemoveManagedComponent { handle, type_id });
    }

    /// Applies every buffered command to `world` in order, remapping
    /// placeholder handles as each `CreateEntity` is processed. Clears the
    /// buffer on completion; a failure on one command does not roll back
    /// earlier ones (spec §4.8).
    pub fn playback(&mut self, world: &mut World) {
        let tick = world.global_version();
        let mut remap: std::collections::HashMap<i32, Entity> = std::collections::HashMap::new();
        let resolve = |remap: &std::collections::HashMap<i32, Entity>, handle: CommandHandle| -> Option<Entity> {
            match handle {
                CommandHandle::Real(e) => Some(e),
                CommandHandle::Placeholder(p) => remap.get(&p).copied(),
            }
        };

        for command in self.commands.drain(..) {
            match command {
                Command::CreateEntity { placeholder } => {
                    let entity = world.create_entity();
                    remap.insert(placeholder, entity);
                }
                Command::DestroyEntity { handle } => {
                    if let Some(entity) = resolve(&remap, handle) {
                        if world.is_alive(entity) {
                            let _ = world.destroy_entity(entity);
                        }
                    }
                }
                Command::AddComponent { handle, type_id, bytes }
                | Command::SetComponent { handle, type_id, bytes } => {
                    if let Some(entity) = resolve(&remap, handle) {
                        if world.is_alive(entity) {
                            let wrote = if let Some(table) = world.table_mut_by_id(type_id) {
                                table.ensure_capacity(entity.index);
                                table.set_raw(entity.index, &bytes, tick).is_ok()
                            } else {
                                false
                            };
                            if wrote {
                                world.mark_component_present(entity, type_id);
                            }
                        }
                    }
                }
                Command::RemoveComponent { handle, type_id } => {
                    if let Some(entity) = resolve(&remap, handle) {
                        if world.is_alive(entity) {
                            if let Some(table) = world.table_mut_by_id(type_id) {
                                table.clear_slot(entity.index);
                            }
                            world.mark_component_absent(entity, type_id);
                        }
                    }
                }
                Command::AddManagedComponent { handle, type_id, object_slot }
                | Command::SetManagedComponent { handle, type_id, object_slot } => {
                    if let Some(entity) = resolve(&remap, handle) {
                        if world.is_alive(entity) {
                            if let Some(payload) = self.managed_payloads[object_slot].take() {
                                let wrote = if let Some(table) = world.table_mut_by_id(type_id) {
                                    table.ensure_capacity(entity.index);
                                    table.set_raw_object(entity.index, payload, tick).is_ok()
                                } else {
                                    false
                                };
                                if wrote {
                                    world.mark_component_present(entity, type_id);
                                }
                            }
                        }
                    }
                }
                Command::RemoveManagedComponent { handle, type_id } => {
                    if let Some(entity) = resolve(&remap, handle) {
                        if world.is_alive(entity) {
                            if let Some(table) = world.table_mut_by_id(type_id) {
                                table.clear_slot(entity.index);
                            }
                            world.mark_component_absent(entity, type_id);
                        }
                    }
                }
            }
        }
        self.managed_payloads.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ComponentStorage;
    use bytemuck::Zeroable;

    #[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
    #[repr(C)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }

    #[test]
    fn create_then_add_component_resolves_placeholder() {
        let mut world = World::new();
        let type_id = world.register_component::<Velocity>().unwrap();
        let mut cb = CommandBuffer::new();
        let placeholder = cb.create_entity();
        cb.add_component(placeholder, type_id, Velocity { dx: 1.0, dy: 2.0 }).unwrap();
        cb.playback(&mut world);
        assert!(cb.is_empty());

        let created: Vec<Entity> = (0..world.entities().max_issued())
            .filter_map(|i| world.entities().get_header(i).filter(|h| h.is_active()).map(|_| Entity { index: i, generation: world.entities().get_header(i).unwrap().generation }))
            .collect();
        assert_eq!(created.len(), 1);
        assert_eq!(world.get_ro::<Velocity>(created[0]).unwrap(), &Velocity { dx: 1.0, dy: 2.0 });
    }

    #[test]
    fn playback_write_stamps_the_owning_chunk_with_the_current_tick() {
        let mut world = World::new();
        let type_id = world.register_component::<Velocity>().unwrap();
        world.tick();
        let mut cb = CommandBuffer::new();
        let placeholder = cb.create_entity();
        cb.add_component(placeholder, type_id, Velocity { dx: 1.0, dy: 1.0 }).unwrap();
        cb.playback(&mut world);

        let table = world.table(type_id).unwrap();
        assert!(table.has_changes_since(0, 0));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        #[derive(Clone, Copy, Pod, Zeroable)]
        #[repr(C)]
        struct Big([u8; 1025]);

        let mut cb = CommandBuffer::new();
        let placeholder = cb.create_entity();
        let err = cb.add_component(placeholder, 0, Big([0; 1025])).unwrap_err();
        assert!(matches!(err, EcsError::PayloadTooLarge { .. }));
    }

    #[test]
    fn playback_twice_is_a_noop_second_time() {
        let mut world = World::new();
        let type_id = world.register_component::<Velocity>().unwrap();
        let mut cb = CommandBuffer::new();
        let placeholder = cb.create_entity();
        cb.add_component(placeholder, type_id, Velocity { dx: 1.0, dy: 1.0 }).unwrap();
        cb.playback(&mut world);
        let count_before = world.entities().active_count();
        cb.playback(&mut world);
        assert_eq!(world.entities().active_count(), count_before);
    }
}
