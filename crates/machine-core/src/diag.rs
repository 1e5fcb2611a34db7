//! Runtime diagnostics counters.
//!
//! Every non-fatal [`RuntimeFault`] the core recovers from is recorded here in
//! addition to being logged, so hosts and tests can observe recoveries without
//! scraping log output.

use crate::{EmuTime, FaultClass, RuntimeFault};

/// Saturating fault counters plus the most recent fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Diagnostics {
    /// The last fault that was recorded, if any.
    pub last_fault: Option<RuntimeFault>,
    /// Emulated time of the last fault.
    pub last_fault_time: EmuTime,
    /// Unmapped reads.
    pub unmapped_reads: u32,
    /// Unmapped writes.
    pub unmapped_writes: u32,
    /// Writes dropped because the target was read-only.
    pub rom_writes: u32,
    /// Bank accesses that fell outside their region.
    pub bank_faults: u32,
    /// Illegal opcodes encountered by CPU cores.
    pub illegal_opcodes: u32,
    /// Timer or line dispatches to torn-down targets.
    pub defused_dispatches: u32,
    /// Rejected reentrant scheduler or callback invocations.
    pub reentrancy_violations: u32,
    /// Accesses answered with open bus because the target device was busy.
    pub busy_devices: u32,
    /// Timers fired since start.
    pub timers_fired: u64,
}

impl Diagnostics {
    /// Creates a new set of counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a fault occurrence and bumps its counter.
    pub fn record(&mut self, fault: RuntimeFault, time: EmuTime) {
        self.last_fault = Some(fault);
        self.last_fault_time = time;
        let counter = match fault {
            RuntimeFault::UnmappedRead => &mut self.unmapped_reads,
            RuntimeFault::UnmappedWrite => &mut self.unmapped_writes,
            RuntimeFault::RomWrite => &mut self.rom_writes,
            RuntimeFault::BankOutOfRange => &mut self.bank_faults,
            RuntimeFault::IllegalOpcode => &mut self.illegal_opcodes,
            RuntimeFault::DefusedTimer => &mut self.defused_dispatches,
            RuntimeFault::Reentrancy => &mut self.reentrancy_violations,
            RuntimeFault::DeviceBusy => &mut self.busy_devices,
        };
        *counter = counter.saturating_add(1);
    }

    /// Counts one fired timer.
    pub fn record_timer_fired(&mut self) {
        self.timers_fired = self.timers_fired.saturating_add(1);
    }

    /// Total number of recorded faults in a class.
    #[must_use]
    pub fn class_total(&self, class: FaultClass) -> u32 {
        match class {
            FaultClass::Memory => self
                .unmapped_reads
                .saturating_add(self.unmapped_writes)
                .saturating_add(self.rom_writes)
                .saturating_add(self.bank_faults),
            FaultClass::Execution => self.illegal_opcodes,
            FaultClass::Scheduling => self
                .defused_dispatches
                .saturating_add(self.reentrancy_violations)
                .saturating_add(self.busy_devices),
        }
    }

    /// Resets all counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
