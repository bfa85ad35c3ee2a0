//! Frame phase gate: which phases permit which mutations (spec §5).
//!
//! A standing database has no phase concept of its own, so this module has
//! no single analogue to adapt; it is grounded instead in the
//! transaction-style guard pattern of `transaction/engine.rs`, which
//! validates an operation against a mode before letting it through. Here the
//! "mode" is the current frame phase and the "operation" is a write to an
//! owned or unowned component.

use std::collections::HashSet;

use crate::entity::Entity;
use crate::error::{EcsError, Result};
use crate::type_registry::ComponentId;

/// A stage of the frame loop, advanced by `World::tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Initialization,
    Input,
    Simulation,
    PostSimulation,
    Teardown,
}

/// What kind of write a phase allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhasePermission {
    /// Any component, owned or not, may be written.
    ReadWriteAll,
    /// No component may be written.
    ReadOnly,
    /// Only components this world has authority over may be written.
    OwnedOnly,
    /// Only components this world does not have authority over may be
    /// written (replication intake).
    UnownedOnly,
}

impl Phase {
    pub const fn permission(self) -> PhasePermission {
        match self {
            Phase::Initialization => PhasePermission::ReadWriteAll,
            Phase::Input => PhasePermission::UnownedOnly,
            Phase::Simulation => PhasePermission::OwnedOnly,
            Phase::PostSimulation => PhasePermission::ReadOnly,
            Phase::Teardown => PhasePermission::ReadWriteAll,
        }
    }

    /// Ordered transition table; `tick` advances through phases in this
    /// order and wraps from `Teardown` back to `Initialization`.
    pub const fn next(self) -> Phase {
        match self {
            Phase::Initialization => Phase::Input,
            Phase::Input => Phase::Simulation,
            Phase::Simulation => Phase::PostSimulation,
            Phase::PostSimulation => Phase::Teardown,
            Phase::Teardown => Phase::Initialization,
        }
    }
}

/// Checks a write to `entity`'s component `has_authority` (whether this
/// world owns that component on that entity) against the current phase.
pub fn validate_write_access(phase: Phase, entity: Entity, has_authority: bool) -> Result<()> {
    match phase.permission() {
        PhasePermission::ReadWriteAll => Ok(()),
        PhasePermission::ReadOnly => Err(EcsError::WrongPhase {
            phase,
            permission: PhasePermission::ReadOnly,
        }),
        PhasePermission::OwnedOnly if has_authority => Ok(()),
        PhasePermission::UnownedOnly if !has_authority => Ok(()),
        permission => {
            let _ = entity;
            Err(EcsError::WrongPhase { phase, permission })
        }
    }
}

/// Which `(from, to)` phase jumps `World::set_phase` accepts (spec §4.6,
/// §4.10: "validates the transition against a configurable transition
/// table"). Staying in the current phase is always permitted; every other
/// jump must be listed explicitly.
#[derive(Debug, Clone)]
pub struct PhaseTransitionTable {
    allowed: HashSet<(Phase, Phase)>,
}

impl PhaseTransitionTable {
    /// The single-step cycle `Phase::next` encodes:
    /// `Initialization -> Input -> Simulation -> PostSimulation -> Teardown
    /// -> Initialization`, with no jumps ahead or behind.
    pub fn linear_cycle() -> Self {
        let mut allowed = HashSet::new();
        let mut phase = Phase::Initialization;
        for _ in 0..5 {
            allowed.insert((phase, phase.next()));
            phase = phase.next();
        }
        Self { allowed }
    }

    /// An empty table: every transition but staying put is rejected until
    /// explicitly allowed.
    pub fn empty() -> Self {
        Self { allowed: HashSet::new() }
    }

    /// Additionally permits `from -> to`.
    pub fn allow(&mut self, from: Phase, to: Phase) -> &mut Self {
        self.allowed.insert((from, to));
        self
    }

    pub fn is_allowed(&self, from: Phase, to: Phase) -> bool {
        from == to || self.allowed.contains(&(from, to))
    }
}

impl Default for PhaseTransitionTable {
    fn default() -> Self {
        Self::linear_cycle()
    }
}

/// Same check addressed by component ID, used by call sites that have not
/// yet resolved an authority bit into a bool (kept distinct so the
/// type-checked entry point stays the common one).
pub fn validate_component_write_access(
    phase: Phase,
    entity: Entity,
    component: ComponentId,
    has_authority: bool,
) -> Result<()> {
    let _ = component;
    validate_write_access(phase, entity, has_authority)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulation_allows_only_owned_writes() {
        let e = Entity { index: 0, generation: 1 };
        assert!(validate_write_access(Phase::Simulation, e, true).is_ok());
        assert!(validate_write_access(Phase::Simulation, e, false).is_err());
    }

    #[test]
    fn post_simulation_is_read_only() {
        let e = Entity { index: 0, generation: 1 };
        assert!(validate_write_access(Phase::PostSimulation, e, true).is_err());
        assert!(validate_write_access(Phase::PostSimulation, e, false).is_err());
    }

    #[test]
    fn phase_cycle_wraps() {
        assert_eq!(Phase::Teardown.next(), Phase::Initialization);
    }

    #[test]
    fn linear_cycle_rejects_jumps_and_allows_single_steps() {
        let table = PhaseTransitionTable::linear_cycle();
        assert!(table.is_allowed(Phase::Initialization, Phase::Input));
        assert!(table.is_allowed(Phase::Initialization, Phase::Initialization));
        assert!(!table.is_allowed(Phase::Initialization, Phase::Simulation));
        assert!(!table.is_allowed(Phase::Teardown, Phase::Simulation));
        assert!(table.is_allowed(Phase::Teardown, Phase::Initialization));
    }

    #[test]
    fn allow_widens_the_table() {
        let mut table = PhaseTransitionTable::empty();
        assert!(!table.is_allowed(Phase::Initialization, Phase::Simulation));
        table.allow(Phase::Initialization, Phase::Simulation);
        assert!(table.is_allowed(Phase::Initialization, Phase::Simulation));
    }
}
