//! Machine-emulation kernel: address spaces, a timer scheduler, signal lines,
//! a CPU framework, device lifecycle, and save states.
//!
//! A [`Machine`] owns every device, space, line, and timer. Configuration
//! happens before [`Machine::start`]; afterwards the machine is driven with
//! [`Machine::run_until`] and inspected through its accessors.

/// Attosecond time base and device clocks.
pub mod time;
pub use time::{Clock, EmuTime, ATTOS_PER_MICRO, ATTOS_PER_MILLI, ATTOS_PER_NANO, ATTOS_PER_SECOND};

/// Configuration, run, state, and runtime fault types.
pub mod fault;
pub use fault::{ConfigError, FaultClass, RunError, RuntimeFault, StateError};

/// Runtime fault counters.
pub mod diag;
pub use diag::Diagnostics;

/// Address spaces, regions, banks, and handler tables.
pub mod memory;
pub use memory::{
    Access, AccessWidth, AddressSpace, Bank, BankEntry, BankId, Endianness, Handler, MapDirection,
    OpenBus, ReadHandlerId, Region, RegionId, RegionKind, SpaceConfig, SpaceId, WriteHandlerId,
};

/// Device trait, lifecycle, and configuration slots.
pub mod device;
pub use device::{AsAny, Device, DeviceId, DeviceState, Executor, Slot, SlotInfo, SuspendReason};

/// Timer queue.
pub mod scheduler;
pub use scheduler::{SchedulerConfig, TimerCallbackId, TimerId, TimerTarget, DEFAULT_QUANTUM};

/// Signal lines between devices.
pub mod line;
pub use line::{Line, LineAction, LineCallbackId, LineId, LineKind, LineLatch, LineSink};

/// Structured execution trace.
pub mod trace;
pub use trace::{TraceEvent, TraceLog, TraceSink};

/// Save-state registration and snapshots.
pub mod state;
pub use state::{
    validate_layout, Snapshot, SnapshotEntry, SnapshotVersion, StateItem, StateKey, StateVisitor,
    SNAPSHOT_MAGIC,
};

/// CPU framework and the reference core.
pub mod cpu;
pub use cpu::{
    Acc8, Cpu, CpuBus, CpuConfig, CpuCore, CpuInputs, CpuRunState, CpuStats, IllegalOpcodePolicy,
    InterruptKind, StepResult,
};

/// The machine: ownership, dispatch, and the run loop.
pub mod machine;
pub use machine::{Machine, MachinePhase, RunOutcome};

/// Reference peripherals.
pub mod peripherals;
pub use peripherals::{IntervalTimer, IntervalTimerConfig};

mod slots;

#[cfg(test)]
use env_logger as _;
#[cfg(test)]
use proptest as _;
#[cfg(feature = "serde")]
use serde as _;
