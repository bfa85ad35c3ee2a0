//! A chunked, cache-aligned entity/component runtime with bitmask-driven
//! queries, a deferred command buffer, a double-buffered event bus, and a
//! delta/keyframe flight recorder.
//!
//! The top-level modules mirror the collaborators a `World` owns: entity
//! identity and storage (`entity`, `chunk`, `storage`), typed access
//! (`mask`, `type_registry`, `query`, `command_buffer`), cross-frame
//! communication (`event_bus`), frame-phase enforcement (`phase`), and
//! recording/playback (`recorder`, `codec`).

pub mod chunk;
pub mod codec;
pub mod command_buffer;
pub mod entity;
pub mod error;
pub mod event_bus;
pub mod mask;
pub mod phase;
pub mod query;
pub mod recorder;
pub mod storage;
pub mod type_registry;
pub mod world;

pub use codec::{NullCodec, ReflectiveCodec};
pub use command_buffer::{CommandBuffer, CommandHandle};
pub use entity::{Entity, EntityHeader, Lifecycle};
pub use error::{EcsError, Result};
pub use event_bus::EventBus;
pub use mask::BitMask256;
pub use phase::{Phase, PhasePermission};
pub use query::{Query, QueryBuilder};
pub use recorder::{MaskDesync, Playback, PlaybackSummary, Recorder, RecorderConfig};
pub use type_registry::{ComponentId, TypePolicy, TypeRegistry};
pub use world::World;
