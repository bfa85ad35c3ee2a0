//! Externally-supplied serialization for managed component and event types.
//!
//! The core never derives `Serialize`/`Deserialize` for caller types itself;
//! it only addresses a codec by `type_id` and trusts the implementor to
//! handle nested primitives, collections, and polymorphism. Grounded in the
//! teacher's `field_codec` module (`storage/field_codec.rs`), which played
//! the same "serialize this generic payload, I don't care how" role for
//! component bytes, but pushed out to a trait object here since the
//! concrete reference types are unknown to this crate.

use std::io::{Read, Write};

use crate::error::Result;
use crate::type_registry::ComponentId;

/// Null is a single leading zero byte; non-null is a non-zero discriminator
/// byte followed by the encoded body (§6).
pub const NULL_DISCRIMINANT: u8 = 0;

/// Implemented by the host application for every managed type it wants the
/// recorder and command buffer to be able to serialize.
pub trait ReflectiveCodec: Send + Sync {
    /// Writes `value`'s encoded form (including the null/non-null
    /// discriminator byte) for `type_id`.
    fn serialize_object(
        &self,
        type_id: ComponentId,
        value: Option<&(dyn std::any::Any + Send + Sync)>,
        writer: &mut dyn Write,
    ) -> Result<()>;

    /// Reads one encoded object for `type_id`, honoring the discriminator
    /// byte written by `serialize_object`.
    fn deserialize_object(
        &self,
        type_id: ComponentId,
        reader: &mut dyn Read,
    ) -> Result<Option<Box<dyn std::any::Any + Send + Sync>>>;

    /// Resolves a managed type's stable name back to a `ComponentId`,
    /// used by playback when a recording names a type by string.
    fn resolve_type_name(&self, name: &str) -> Option<ComponentId>;
}

/// A codec with nothing registered; every call reports `UnknownType`. Useful
/// as a default for worlds that only use unmanaged components.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCodec;

impl ReflectiveCodec for NullCodec {
    fn serialize_object(
        &self,
        _type_id: ComponentId,
        value: Option<&(dyn std::any::Any + Send + Sync)>,
        writer: &mut dyn Write,
    ) -> Result<()> {
        if value.is_none() {
            writer.write_all(&[NULL_DISCRIMINANT])?;
            return Ok(());
        }
        Err(crate::error::EcsError::UnknownType(
            "NullCodec cannot serialize any managed type".to_string(),
        ))
    }

    fn deserialize_object(
        &self,
        _type_id: ComponentId,
        _reader: &mut dyn Read,
    ) -> Result<Option<Box<dyn std::any::Any + Send + Sync>>> {
        Err(crate::error::EcsError::UnknownType(
            "NullCodec cannot deserialize any managed type".to_string(),
        ))
    }

    fn resolve_type_name(&self, _name: &str) -> Option<ComponentId> {
        None
    }
}
