use crate::component::impl_component;
use crate::{ComponentId, MachineId};

/// Microinstruction sequence the control unit is walking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Sequence {
    /// The machine's fetch sequence.
    #[default]
    Fetch,
    /// The micros of a machine instruction.
    Instruction(ComponentId),
}

/// Snapshot of the execution cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ControlUnitState {
    /// Sequence being executed.
    pub sequence: Sequence,
    /// Index of the next micro to execute within `sequence`.
    pub micro_index: usize,
}

/// Sequencing cursor advanced by the execution driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlUnit {
    pub(crate) id: ComponentId,
    pub(crate) owner: MachineId,
    pub(crate) name: String,
    state: ControlUnitState,
}

impl_component!(ControlUnit);

impl ControlUnit {
    pub(crate) fn new(id: ComponentId, owner: MachineId, name: String) -> Self {
        Self {
            id,
            owner,
            name,
            state: ControlUnitState::default(),
        }
    }

    /// Sequence being executed.
    #[must_use]
    pub const fn sequence(&self) -> Sequence {
        self.state.sequence
    }

    /// Index of the next micro to execute.
    #[must_use]
    pub const fn micro_index(&self) -> usize {
        self.state.micro_index
    }

    /// Current cursor as a restorable snapshot.
    #[must_use]
    pub const fn state(&self) -> ControlUnitState {
        self.state
    }

    /// Restores a snapshot taken with [`Self::state`].
    pub const fn restore(&mut self, state: ControlUnitState) {
        self.state = state;
    }

    /// Returns to the first micro of the fetch sequence.
    pub const fn reset(&mut self) {
        self.state = ControlUnitState {
            sequence: Sequence::Fetch,
            micro_index: 0,
        };
    }

    /// Moves to the first micro of `sequence`.
    pub const fn jump_to(&mut self, sequence: Sequence) {
        self.state = ControlUnitState {
            sequence,
            micro_index: 0,
        };
    }

    /// Sets the index of the next micro.
    pub const fn set_micro_index(&mut self, index: usize) {
        self.state.micro_index = index;
    }

    pub(crate) fn reidentify(
        &self,
        id: ComponentId,
        owner: MachineId,
        remap: impl FnOnce(ComponentId) -> ComponentId,
    ) -> Self {
        let sequence = match self.state.sequence {
            Sequence::Fetch => Sequence::Fetch,
            Sequence::Instruction(old) => Sequence::Instruction(remap(old)),
        };
        Self {
            id,
            owner,
            name: self.name.clone(),
            state: ControlUnitState {
                sequence,
                micro_index: self.state.micro_index,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ControlUnit, ControlUnitState, Sequence};
    use crate::{ComponentId, MachineId};

    #[test]
    fn defaults_to_start_of_fetch_sequence() {
        let cu = ControlUnit::new(ComponentId::new(1), MachineId::fresh(), "cu".into());
        assert_eq!(cu.sequence(), Sequence::Fetch);
        assert_eq!(cu.micro_index(), 0);
    }

    #[test]
    fn snapshot_and_restore_round_trip_the_cursor() {
        let mut cu = ControlUnit::new(ComponentId::new(1), MachineId::fresh(), "cu".into());
        cu.jump_to(Sequence::Instruction(ComponentId::new(7)));
        cu.set_micro_index(3);
        let saved = cu.state();

        cu.reset();
        assert_eq!(cu.state(), ControlUnitState::default());

        cu.restore(saved);
        assert_eq!(cu.sequence(), Sequence::Instruction(ComponentId::new(7)));
        assert_eq!(cu.micro_index(), 3);
    }
}
