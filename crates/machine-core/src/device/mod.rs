//! Clocked devices: identity, lifecycle, and the capability traits the
//! machine drives them through.

use std::any::Any;

use crate::{Access, ConfigError, Machine, StateVisitor, TimerId};

/// Interface slots bound by drivers at configuration time.
pub mod slot;
pub use slot::{Slot, SlotInfo};

/// Handle to a device owned by the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DeviceId(pub(crate) u32);

impl DeviceId {
    /// Raw device index. Indices are never reused after removal.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Device lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum DeviceState {
    /// Added to the machine, not yet started.
    #[default]
    Constructed,
    /// `start` succeeded; waiting for the machine to begin running.
    Started,
    /// Participating in scheduling.
    Running,
    /// Stopped or removed. Terminal.
    Stopped,
}

/// Reasons an executing device is suspended. Suspension holds while any bit
/// is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SuspendReason(u32);

impl SuspendReason {
    /// No reason.
    pub const NONE: Self = Self(0);
    /// Halted by an external line.
    pub const HALT: Self = Self(1 << 0);
    /// Held in reset.
    pub const RESET: Self = Self(1 << 1);
    /// Spinning until the next interrupt or slice.
    pub const SPIN: Self = Self(1 << 2);
    /// Waiting for a trigger.
    pub const TRIGGER: Self = Self(1 << 3);
    /// Disabled by the driver.
    pub const DISABLE: Self = Self(1 << 4);

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Builds a reason set from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns `true` when every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` when no bit is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Union of both sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// `self` without the bits of `other`.
    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

/// Upcast helper so boxed devices can be downcast to their concrete type.
pub trait AsAny: Any {
    /// `self` as [`Any`].
    fn as_any(&self) -> &dyn Any;
    /// `self` as mutable [`Any`].
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A piece of simulated hardware.
///
/// Every method that can have side effects receives the machine, so a device
/// can schedule timers, drive lines, and access address spaces. While one of
/// these methods runs the device is checked out of the machine: accesses
/// routed back to it are answered with open bus and line changes addressed to
/// it are delivered after it returns.
pub trait Device: AsAny {
    /// Unique instance tag, used in diagnostics and save-state keys.
    fn tag(&self) -> &str;

    /// Clock rate in Hz. Zero for unclocked devices.
    fn clock_hz(&self) -> u32 {
        0
    }

    /// Configuration slots, validated before any device starts.
    fn interface(&self) -> Vec<SlotInfo> {
        Vec::new()
    }

    /// One-time start, after every slot has been validated.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the device cannot operate with its
    /// configuration; the machine then refuses to start.
    fn start(&mut self, _machine: &mut Machine, _id: DeviceId) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Power-on or soft reset.
    fn reset(&mut self, _machine: &mut Machine) {}

    /// Called once when the machine stops or the device is removed.
    fn stop(&mut self, _machine: &mut Machine) {}

    /// Cycles of this device's clock between [`Device::tick`] calls.
    fn tick_interval(&self) -> Option<u64> {
        None
    }

    /// Periodic tick.
    fn tick(&mut self, _machine: &mut Machine) {}

    /// A timer allocated with this device as target expired.
    fn timer_fired(&mut self, _machine: &mut Machine, _timer: TimerId, _param: u64) {}

    /// A subscribed line changed level.
    fn input_changed(&mut self, _machine: &mut Machine, _input: u32, _active: bool) {}

    /// Bus read routed to this device. `None` floats the bus.
    fn read(&mut self, _machine: &mut Machine, _access: Access) -> Option<u64> {
        None
    }

    /// Bus write routed to this device.
    fn write(&mut self, _machine: &mut Machine, _access: Access, _value: u64) {}

    /// Registers the fields that make up this device's save state.
    fn visit_state(&mut self, _visitor: &mut dyn StateVisitor) {}

    /// The execution capability, for devices that consume scheduler slices.
    fn as_executor(&mut self) -> Option<&mut dyn Executor> {
        None
    }
}

/// Devices that run on their own clock between scheduler events.
pub trait Executor {
    /// Runs for at most `budget` cycles and returns the cycles consumed.
    ///
    /// Implementations report progress through
    /// [`Machine::consume_cycles`] as they go so that anything scheduled
    /// mid-slice sees the correct local time, and return early once
    /// [`Machine::timeslice_aborted`] turns true.
    fn execute(&mut self, machine: &mut Machine, budget: u64) -> u64;
}

#[cfg(test)]
mod tests {
    use super::{AsAny, DeviceState, SuspendReason};

    #[test]
    fn suspend_reasons_combine_as_bit_sets() {
        let both = SuspendReason::HALT.union(SuspendReason::TRIGGER);
        assert!(both.contains(SuspendReason::HALT));
        assert!(!both.contains(SuspendReason::RESET));
        assert_eq!(both.difference(SuspendReason::HALT), SuspendReason::TRIGGER);
        assert!(SuspendReason::NONE.is_empty());
        assert_eq!(SuspendReason::from_bits(both.bits()), both);
    }

    #[test]
    fn lifecycle_starts_constructed() {
        assert_eq!(DeviceState::default(), DeviceState::Constructed);
    }

    #[test]
    fn as_any_downcasts_to_concrete_type() {
        let value = 5_u16;
        assert_eq!(value.as_any().downcast_ref::<u16>(), Some(&5));
    }
}
