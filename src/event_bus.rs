//! Double-buffered event streams (spec §4.9).
//!
//! Grounded in `storage/buffer.rs`'s `ArcStorageBuffer`: an atomic-pointer
//! double buffer with a graveyard of retired buffers so in-flight readers
//! are never invalidated by a resize. That module's own comment admits its
//! raw-pointer `StorageBuffer` "can't really" deallocate safely and
//! recommends the `Arc` version; this module follows that recommendation
//! throughout rather than repeating the unsafe leak/raw-swap pattern — write
//! buffers are `parking_lot::Mutex`-protected (an explicit simplification of
//! a lock-free atomic-reserve-and-store, recorded in `DESIGN.md`) and read
//! buffers are published as `Arc<Vec<T>>` snapshots so `consume` never
//! blocks on a concurrent `publish`.
//!
//! Event type IDs are drawn from the same process-wide `TypeRegistry` dense
//! ID space as components, rather than a separately-declared stable 32-bit
//! constant per type (an Open Question resolution, see `DESIGN.md`): one ID
//! scheme is simpler and the registry already guarantees density and
//! process-lifetime stability. Native events mirror the unmanaged/managed
//! component split: native streams hold `Pod` types so the recorder can
//! address them as raw bytes, managed streams hold `Clone` reference types
//! serialized through the `ReflectiveCodec`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::Pod;
use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::type_registry::{ComponentId, TypePolicy, TypeRegistry};

/// Type-erased operations every stream kind supports, so `EventBus` (and the
/// recorder) can drive swap/clear/persistence across heterogeneous element
/// types without knowing them statically.
trait StreamOps: Any + Send + Sync {
    fn swap(&self);
    fn clear_current(&self);
    fn clear_graveyard(&self);
    fn component_id(&self) -> ComponentId;
    fn as_any(&self) -> &dyn Any;

    /// `(element_size, read-buffer bytes)` for a native stream; `None` for
    /// managed streams.
    fn raw_snapshot(&self) -> Option<(usize, Vec<u8>)> {
        None
    }

    fn inject_raw(&self, _element_size: usize, _bytes: &[u8]) {}

    /// Clones of the managed stream's read buffer as type-erased objects;
    /// `None` for native streams.
    fn managed_snapshot(&self) -> Option<Vec<Box<dyn Any + Send + Sync>>> {
        None
    }

    fn inject_managed(&self, _values: Vec<Box<dyn Any + Send + Sync>>) {}
}

struct NativeEventStream<T> {
    type_id: ComponentId,
    write_buf: Mutex<Vec<T>>,
    read_buf: RwLock<Arc<Vec<T>>>,
    graveyard: Mutex<Vec<Arc<Vec<T>>>>,
}

impl<T: Pod + Send + Sync + 'static> NativeEventStream<T> {
    fn new(type_id: ComponentId) -> Self {
        Self {
            type_id,
            write_buf: Mutex::new(Vec::new()),
            read_buf: RwLock::new(Arc::new(Vec::new())),
            graveyard: Mutex::new(Vec::new()),
        }
    }

    fn publish(&self, event: T) {
        self.write_buf.lock().push(event);
    }

    fn consume(&self) -> Arc<Vec<T>> {
        self.read_buf.read().clone()
    }

    /// Injects pre-decoded elements straight into the write buffer, used by
    /// playback when restoring a recorded native stream.
    fn inject(&self, events: Vec<T>) {
        self.write_buf.lock().extend(events);
    }
}

impl<T: Pod + Send + Sync + 'static> StreamOps for NativeEventStream<T> {
    fn swap(&self) {
        let next = Arc::new(std::mem::take(&mut *self.write_buf.lock()));
        let previous = std::mem::replace(&mut *self.read_buf.write(), next);
        self.graveyard.lock().push(previous);
    }

    fn clear_current(&self) {
        self.write_buf.lock().clear();
    }

    fn clear_graveyard(&self) {
        self.graveyard.lock().clear();
    }

    fn component_id(&self) -> ComponentId {
        self.type_id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn raw_snapshot(&self) -> Option<(usize, Vec<u8>)> {
        let read = self.read_buf.read();
        Some((std::mem::size_of::<T>(), bytemuck::cast_slice(read.as_slice()).to_vec()))
    }

    fn inject_raw(&self, element_size: usize, bytes: &[u8]) {
        if element_size != std::mem::size_of::<T>() {
            return;
        }
        let events: Vec<T> = bytemuck::cast_slice(bytes).to_vec();
        self.inject(events);
    }
}

struct ManagedEventStream<T> {
    type_id: ComponentId,
    write_buf: Mutex<Vec<T>>,
    read_buf: Mutex<Vec<T>>,
}

impl<T: Clone + Send + Sync + 'static> ManagedEventStream<T> {
    fn new(type_id: ComponentId) -> Self {
        Self {
            type_id,
            write_buf: Mutex::new(Vec::new()),
            read_buf: Mutex::new(Vec::new()),
        }
    }

    fn publish(&self, event: T) {
        self.write_buf.lock().push(event);
    }

    fn consume(&self) -> Vec<T> {
        self.read_buf.lock().clone()
    }

    fn inject(&self, events: Vec<T>) {
        self.write_buf.lock().extend(events);
    }
}

impl<T: Clone + Send + Sync + 'static> StreamOps for ManagedEventStream<T> {
    fn swap(&self) {
        let next = std::mem::take(&mut *self.write_buf.lock());
        *self.read_buf.lock() = next;
    }

    fn clear_current(&self) {
        self.write_buf.lock().clear();
    }

    fn clear_graveyard(&self) {}

    fn component_id(&self) -> ComponentId {
        self.type_id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn managed_snapshot(&self) -> Option<Vec<Box<dyn Any + Send + Sync>>> {
        let read = self.read_buf.lock();
        Some(
            read.iter()
                .map(|v| Box::new(v.clone()) as Box<dyn Any + Send + Sync>)
                .collect(),
        )
    }

    fn inject_managed(&self, values: Vec<Box<dyn Any + Send + Sync>>) {
        let events: Vec<T> = values
            .into_iter()
            .filter_map(|v| v.downcast::<T>().ok().map(|b| *b))
            .collect();
        self.inject(events);
    }
}

/// Raw bytes for a native event `type_id` this bus has never had a Rust
/// type registered for. Created on the fly by `inject_native_by_id` (spec
/// §4.9: "streams not previously registered are created on the fly") so a
/// replayed frame referencing a type the target world hasn't declared
/// doesn't silently drop its event data.
struct RawNativeStream {
    element_size: usize,
    bytes: Vec<u8>,
}

/// Owns every native and managed event stream a world has touched, keyed by
/// the publishing/consuming Rust type.
#[derive(Default)]
pub struct EventBus {
    registry: TypeRegistry,
    native: HashMap<TypeId, Box<dyn StreamOps>>,
    managed: HashMap<TypeId, Box<dyn StreamOps>>,
    native_raw: HashMap<ComponentId, RawNativeStream>,
    managed_raw: HashMap<ComponentId, Vec<Box<dyn Any + Send + Sync>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            registry: TypeRegistry::new(),
            native: HashMap::new(),
            managed: HashMap::new(),
            native_raw: HashMap::new(),
            managed_raw: HashMap::new(),
        }
    }

    fn native_stream<T: Pod + Send + Sync + 'static>(&mut self) -> Result<&NativeEventStream<T>> {
        let type_id = self.registry.register::<T>(TypePolicy::pod_default())?;
        let entry = self
            .native
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(NativeEventStream::<T>::new(type_id)));
        Ok(entry
            .as_any()
            .downcast_ref::<NativeEventStream<T>>()
            .expect("type-keyed"))
    }

    fn managed_stream<T: Clone + Send + Sync + 'static>(
        &mut self,
    ) -> Result<&ManagedEventStream<T>> {
        let type_id = self
            .registry
            .register::<T>(TypePolicy::mutable_class_default())?;
        let entry = self
            .managed
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(ManagedEventStream::<T>::new(type_id)));
        Ok(entry
            .as_any()
            .downcast_ref::<ManagedEventStream<T>>()
            .expect("type-keyed"))
    }

    pub fn publish<T: Pod + Send + Sync + 'static>(&mut self, event: T) -> Result<()> {
        self.native_stream::<T>()?.publish(event);
        Ok(())
    }

    pub fn consume<T: Pod + Send + Sync + 'static>(&mut self) -> Result<Arc<Vec<T>>> {
        Ok(self.native_stream::<T>()?.consume())
    }

    pub fn inject_into_current<T: Pod + Send + Sync + 'static>(&mut self, events: Vec<T>) -> Result<()> {
        self.native_stream::<T>()?.inject(events);
        Ok(())
    }

    pub fn publish_managed<T: Clone + Send + Sync + 'static>(&mut self, event: T) -> Result<()> {
        self.managed_stream::<T>()?.publish(event);
        Ok(())
    }

    pub fn consume_managed<T: Clone + Send + Sync + 'static>(&mut self) -> Result<Vec<T>> {
        Ok(self.managed_stream::<T>()?.consume())
    }

    pub fn inject_managed_into_current<T: Clone + Send + Sync + 'static>(
        &mut self,
        events: Vec<T>,
    ) -> Result<()> {
        self.managed_stream::<T>()?.inject(events);
        Ok(())
    }

    /// Swaps every registered stream's write buffer into its read buffer.
    /// Must be called exactly once per frame, at the end (spec §4.9).
    pub fn swap_buffers(&mut self) {
        for stream in self.native.values() {
            stream.swap();
        }
        for stream in self.managed.values() {
            stream.swap();
        }
    }

    pub fn clear_current_buffers(&mut self) {
        for stream in self.native.values() {
            stream.clear_current();
        }
        for stream in self.managed.values() {
            stream.clear_current();
        }
    }

    /// Releases graveyard buffers retired by native-stream resizes. Safe to
    /// call any time there are no in-flight readers holding an old `Arc`.
    pub fn clear_graveyards(&mut self) {
        for stream in self.native.values() {
            stream.clear_graveyard();
        }
    }

    pub fn native_type_id<T: Pod + Send + Sync + 'static>(&mut self) -> Result<ComponentId> {
        Ok(self.native_stream::<T>()?.component_id())
    }

    /// Every native stream's `(type_id, element_size, read-buffer bytes)`,
    /// for the recorder to persist (spec §4.11 frame layout).
    pub(crate) fn native_snapshots(&self) -> Vec<(ComponentId, usize, Vec<u8>)> {
        self.native
            .values()
            .filter_map(|s| s.raw_snapshot().map(|(size, bytes)| (s.component_id(), size, bytes)))
            .collect()
    }

    /// Every managed stream's `(type_id, type_name, cloned values)`, for the
    /// recorder to persist through the reflective codec.
    pub(crate) fn managed_snapshots(&self) -> Vec<(ComponentId, &'static str, Vec<Box<dyn Any + Send + Sync>>)> {
        self.managed
            .values()
            .filter_map(|s| {
                let values = s.managed_snapshot()?;
                let name = self.registry.type_name(s.component_id()).unwrap_or("<unknown>");
                Some((s.component_id(), name, values))
            })
            .collect()
    }

    /// Injects a decoded native event block by its recorded `type_id`. If no
    /// registered stream claims that ID, the bytes land in an untyped
    /// fallback stream instead of being dropped (spec §4.9).
    pub(crate) fn inject_native_by_id(&mut self, type_id: ComponentId, element_size: usize, bytes: &[u8]) {
        for stream in self.native.values() {
            if stream.component_id() == type_id {
                stream.inject_raw(element_size, bytes);
                return;
            }
        }
        let raw = self
            .native_raw
            .entry(type_id)
            .or_insert_with(|| RawNativeStream { element_size, bytes: Vec::new() });
        raw.element_size = element_size;
        raw.bytes.extend_from_slice(bytes);
    }

    /// Managed counterpart of `inject_native_by_id`: values land in an
    /// untyped fallback keyed by `type_id` when no registered stream claims
    /// it.
    pub(crate) fn inject_managed_by_id(
        &mut self,
        type_id: ComponentId,
        values: Vec<Box<dyn Any + Send + Sync>>,
    ) {
        for stream in self.managed.values() {
            if stream.component_id() == type_id {
                stream.inject_managed(values);
                return;
            }
        }
        self.managed_raw.entry(type_id).or_default().extend(values);
    }

    /// Raw bytes accumulated for a native event `type_id` with no
    /// registered Rust type in this bus, for consumers that know how to
    /// reinterpret them (spec §4.9).
    pub fn raw_native_bytes(&self, type_id: ComponentId) -> Option<(usize, &[u8])> {
        self.native_raw
            .get(&type_id)
            .map(|s| (s.element_size, s.bytes.as_slice()))
    }

    /// Managed counterpart of `raw_native_bytes`.
    pub fn raw_managed_objects(&self, type_id: ComponentId) -> Option<&[Box<dyn Any + Send + Sync>]> {
        self.managed_raw.get(&type_id).map(|v| v.as_slice())
    }

    pub(crate) fn resolve_managed_type_name(&self, name: &str) -> Option<ComponentId> {
        self.managed
            .values()
            .find(|s| self.registry.type_name(s.component_id()) == Some(name))
            .map(|s| s.component_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;

    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Hit {
        damage: u32,
    }

    #[test]
    fn published_events_are_invisible_until_swap() {
        let mut bus = EventBus::new();
        bus.publish(Hit { damage: 5 }).unwrap();
        bus.publish(Hit { damage: 9 }).unwrap();
        assert!(bus.consume::<Hit>().unwrap().is_empty());

        bus.swap_buffers();
        let read = bus.consume::<Hit>().unwrap();
        assert_eq!(read.as_slice(), &[Hit { damage: 5 }, Hit { damage: 9 }]);

        bus.swap_buffers();
        assert!(bus.consume::<Hit>().unwrap().is_empty());
    }

    #[test]
    fn managed_stream_round_trips() {
        let mut bus = EventBus::new();
        bus.publish_managed("hello".to_string()).unwrap();
        bus.swap_buffers();
        assert_eq!(bus.consume_managed::<String>().unwrap(), vec!["hello".to_string()]);
    }

    #[test]
    fn injecting_an_unregistered_type_id_lands_in_the_raw_fallback() {
        let mut bus = EventBus::new();
        let unclaimed_id = 200;
        bus.inject_native_by_id(unclaimed_id, 4, &[1, 2, 3, 4]);
        let (element_size, bytes) = bus.raw_native_bytes(unclaimed_id).unwrap();
        assert_eq!(element_size, 4);
        assert_eq!(bytes, &[1, 2, 3, 4]);

        bus.inject_managed_by_id(unclaimed_id, vec![Box::new("lost".to_string())]);
        let objects = bus.raw_managed_objects(unclaimed_id).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].downcast_ref::<String>(), Some(&"lost".to_string()));
    }
}
