//! Configuration slots a driver binds before the machine starts.

/// Named, optionally-required binding point in a device's interface.
///
/// Devices expose their slots through [`crate::Device::interface`]; the
/// machine refuses to start while a required slot is unbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot<T> {
    name: &'static str,
    required: bool,
    value: Option<T>,
}

impl<T: Copy> Slot<T> {
    /// A slot that must be bound before start.
    #[must_use]
    pub const fn required(name: &'static str) -> Self {
        Self {
            name,
            required: true,
            value: None,
        }
    }

    /// A slot that may stay unbound.
    #[must_use]
    pub const fn optional(name: &'static str) -> Self {
        Self {
            name,
            required: false,
            value: None,
        }
    }

    /// Binds the slot, replacing any previous binding.
    pub fn bind(&mut self, value: T) {
        self.value = Some(value);
    }

    /// Builder form of [`Slot::bind`].
    #[must_use]
    pub fn with(mut self, value: T) -> Self {
        self.value = Some(value);
        self
    }

    /// Bound value, if any.
    #[must_use]
    pub const fn get(&self) -> Option<T> {
        self.value
    }

    /// Slot name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` once a value is bound.
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        self.value.is_some()
    }

    /// Describes the slot for start-time validation.
    #[must_use]
    pub const fn info(&self) -> SlotInfo {
        SlotInfo {
            name: self.name,
            required: self.required,
            bound: self.value.is_some(),
        }
    }
}

/// Binding status of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotInfo {
    /// Slot name.
    pub name: &'static str,
    /// Whether the slot must be bound.
    pub required: bool,
    /// Whether the slot is bound.
    pub bound: bool,
}

impl SlotInfo {
    /// Returns `true` when the slot blocks machine start.
    #[must_use]
    pub const fn is_unresolved(self) -> bool {
        self.required && !self.bound
    }
}
