//! Identity shared by every module, field, instruction and microinstruction.

use std::sync::atomic::{AtomicU64, Ordering};

/// Machine-scoped identifier of a component.
///
/// Identifiers are allocated by the owning [`crate::Machine`] and never
/// reused within it. A deep copy allocates fresh identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ComponentId(u32);

impl ComponentId {
    /// Wraps a raw identifier value.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Process-unique handle of a machine, stored by components as a non-owning
/// back-reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MachineId(u64);

static NEXT_MACHINE_ID: AtomicU64 = AtomicU64::new(1);

impl MachineId {
    /// Allocates a handle never handed out before in this process.
    #[must_use]
    pub fn fresh() -> Self {
        Self(NEXT_MACHINE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw handle value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Naming and identity surface common to all machine components.
pub trait Component {
    /// Immutable machine-scoped identifier.
    fn id(&self) -> ComponentId;

    /// Machine that owns this component.
    fn owner(&self) -> MachineId;

    /// Current display name.
    fn name(&self) -> &str;

    /// Renames the component. Uniqueness is checked by the validator.
    fn set_name(&mut self, name: String);
}

/// Implements [`Component`] for a struct with `id`, `owner` and `name` fields.
macro_rules! impl_component {
    ($ty:ty) => {
        impl $crate::component::Component for $ty {
            fn id(&self) -> $crate::component::ComponentId {
                self.id
            }

            fn owner(&self) -> $crate::component::MachineId {
                self.owner
            }

            fn name(&self) -> &str {
                &self.name
            }

            fn set_name(&mut self, name: String) {
                self.name = name;
            }
        }
    };
}

pub(crate) use impl_component;
