//! Machine instructions and the fields that make up their formats.

use crate::component::impl_component;
use crate::convert::{max_value, min_value};
use crate::machine::Machine;
use crate::{ComponentId, MachineId, SimResult};

/// Whether an assembler must supply a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FieldKind {
    /// Must be present.
    #[default]
    Required,
    /// May be omitted; the default value is used.
    Optional,
    /// Always filled with the default value.
    Ignored,
}

/// How a field's value relates to the program counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Relativity {
    /// Value used as written.
    #[default]
    Absolute,
    /// Offset from the program counter before it is incremented.
    PcRelativePreIncr,
    /// Offset from the program counter after it is incremented.
    PcRelativePostIncr,
}

/// Named constant an assembler may use in place of a number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct FieldValue {
    /// Symbolic name.
    pub name: String,
    /// Numeric value.
    pub value: i64,
}

/// One bit field of an instruction format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub(crate) id: ComponentId,
    pub(crate) owner: MachineId,
    pub(crate) name: String,
    /// Whether the field must be supplied.
    pub kind: FieldKind,
    /// Width in bits.
    pub num_bits: u32,
    /// Program-counter relativity.
    pub relativity: Relativity,
    /// Value used when the field is omitted or ignored.
    pub default_value: i64,
    /// Whether values are two's complement.
    pub signed: bool,
    /// Named values.
    pub values: Vec<FieldValue>,
}

impl_component!(Field);

impl Field {
    pub(crate) const fn new(id: ComponentId, owner: MachineId, name: String, num_bits: u32) -> Self {
        Self {
            id,
            owner,
            name,
            kind: FieldKind::Required,
            num_bits,
            relativity: Relativity::Absolute,
            default_value: 0,
            signed: false,
            values: Vec::new(),
        }
    }

    /// Returns `true` when `value` is representable in this field.
    #[must_use]
    pub fn fits(&self, value: i64) -> bool {
        let value = i128::from(value);
        if self.signed {
            (min_value(self.num_bits)..=max_value(self.num_bits) / 2).contains(&value)
        } else {
            (0..=max_value(self.num_bits)).contains(&value)
        }
    }

    /// Value bound to a symbolic name.
    #[must_use]
    pub fn value_named(&self, name: &str) -> Option<i64> {
        self.values
            .iter()
            .find(|value| value.name == name)
            .map(|value| value.value)
    }

    pub(crate) fn reidentify(&self, id: ComponentId, owner: MachineId) -> Self {
        Self {
            id,
            owner,
            ..self.clone()
        }
    }
}

/// A user-defined machine instruction: an opcode, a format and the
/// microinstructions executed after decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineInstruction {
    pub(crate) id: ComponentId,
    pub(crate) owner: MachineId,
    pub(crate) name: String,
    /// Opcode matched against the leftmost bits of the instruction register.
    pub opcode: u64,
    /// Instruction format; the first field holds the opcode.
    pub fields: Vec<ComponentId>,
    /// Microinstructions executed for this instruction.
    pub micros: Vec<ComponentId>,
}

impl_component!(MachineInstruction);

impl MachineInstruction {
    pub(crate) const fn new(
        id: ComponentId,
        owner: MachineId,
        name: String,
        opcode: u64,
        fields: Vec<ComponentId>,
        micros: Vec<ComponentId>,
    ) -> Self {
        Self {
            id,
            owner,
            name,
            opcode,
            fields,
            micros,
        }
    }

    /// Field holding the opcode.
    #[must_use]
    pub fn opcode_field(&self) -> Option<ComponentId> {
        self.fields.first().copied()
    }

    /// Total width of the instruction format.
    ///
    /// # Errors
    ///
    /// Returns the lookup error of the first field that does not resolve.
    pub fn num_bits(&self, machine: &Machine) -> SimResult<u32> {
        self.fields
            .iter()
            .try_fold(0, |total, id| Ok(total + machine.field(*id)?.num_bits))
    }

    pub(crate) fn reidentify(
        &self,
        id: ComponentId,
        owner: MachineId,
        mut remap: impl FnMut(ComponentId) -> ComponentId,
    ) -> Self {
        Self {
            id,
            owner,
            name: self.name.clone(),
            opcode: self.opcode,
            fields: self.fields.iter().map(|field| remap(*field)).collect(),
            micros: self.micros.iter().map(|micro| remap(*micro)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Field, FieldValue};
    use crate::{ComponentId, MachineId};

    fn field(num_bits: u32, signed: bool) -> Field {
        let mut field = Field::new(ComponentId::new(1), MachineId::fresh(), "f".into(), num_bits);
        field.signed = signed;
        field
    }

    #[test]
    fn unsigned_fields_accept_zero_to_max() {
        let f = field(4, false);
        assert!(f.fits(0));
        assert!(f.fits(15));
        assert!(!f.fits(16));
        assert!(!f.fits(-1));
    }

    #[test]
    fn signed_fields_accept_twos_complement_range() {
        let f = field(4, true);
        assert!(f.fits(-8));
        assert!(f.fits(7));
        assert!(!f.fits(8));
        assert!(!f.fits(-9));
        assert!(field(64, true).fits(i64::MIN));
        assert!(field(64, true).fits(i64::MAX));
    }

    #[test]
    fn named_values_resolve() {
        let mut f = field(2, false);
        f.values.push(FieldValue {
            name: "R1".into(),
            value: 1,
        });
        assert_eq!(f.value_named("R1"), Some(1));
        assert_eq!(f.value_named("R2"), None);
    }
}
