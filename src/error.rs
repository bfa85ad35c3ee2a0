//! Crate-wide error type.
//!
//! Every failure mode named in `SPEC_FULL.md` §7's error table is a variant
//! here. Structural errors (registration, phase, handle) abort the current
//! operation; recorder/playback errors are scoped to a single frame and
//! never roll back in-memory state.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EcsError {
    #[error("entity handle is stale: index {index} has generation {current}, handle carries {requested}")]
    StaleHandle {
        index: u32,
        current: u16,
        requested: u16,
    },

    #[error("component or event type not registered: {0}")]
    NotRegistered(&'static str),

    #[error("type registry overflow: more than 256 component types registered")]
    Overflow,

    #[error("entity {0:?} is missing the requested component")]
    MissingComponent(crate::entity::Entity),

    #[error("set_authority called on entity {0:?} without the component present")]
    AuthorityConflict(crate::entity::Entity),

    #[error("write attempted in phase {phase:?}, whose permission ({permission:?}) forbids it")]
    WrongPhase {
        phase: crate::phase::Phase,
        permission: crate::phase::PhasePermission,
    },

    #[error("illegal phase transition: {from:?} -> {to:?} is not permitted by the current transition table")]
    IllegalPhaseTransition {
        from: crate::phase::Phase,
        to: crate::phase::Phase,
    },

    #[error("operation unsupported on a managed table")]
    Unsupported,

    #[error("command buffer payload of {size} bytes exceeds the 1024 byte limit")]
    PayloadTooLarge { size: usize },

    #[error("recording format mismatch: expected magic {expected_magic:?} version {expected_version}, found {found_magic:?} version {found_version}")]
    FormatMismatch {
        expected_magic: [u8; 6],
        expected_version: u32,
        found_magic: [u8; 6],
        found_version: u32,
    },

    #[error("corrupt frame: {0}")]
    CorruptFrame(String),

    #[error("playback referenced an unknown managed type: {0}")]
    UnknownType(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, EcsError>;
