use thiserror::Error;

/// Fault classes used for diagnostics aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FaultClass {
    /// Address decoding or data transfer anomaly.
    Memory,
    /// CPU interpreter anomaly.
    Execution,
    /// Timer, dispatch, or reentrancy anomaly.
    Scheduling,
}

/// Machine-build errors. Any of these keeps the machine from starting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Range start is above its end.
    #[error("malformed range {start:#x}..={end:#x} in space `{space}`")]
    MalformedRange {
        /// Name of the address space.
        space: String,
        /// Inclusive range start.
        start: u64,
        /// Inclusive range end.
        end: u64,
    },
    /// Range exceeds the address width of its space.
    #[error("range {start:#x}..={end:#x} exceeds the {address_bits}-bit space `{space}`")]
    RangeOutOfBounds {
        /// Name of the address space.
        space: String,
        /// Inclusive range start.
        start: u64,
        /// Inclusive range end.
        end: u64,
        /// Address width of the space.
        address_bits: u8,
    },
    /// Address width outside the supported 8..=64 bit window.
    #[error("address width {address_bits} of space `{space}` is not supported")]
    InvalidAddressWidth {
        /// Name of the address space.
        space: String,
        /// Requested address width.
        address_bits: u8,
    },
    /// A required interface slot was never bound.
    #[error("device `{device}` has unresolved required slot `{slot}`")]
    UnresolvedCallback {
        /// Tag of the offending device.
        device: String,
        /// Name of the unresolved slot.
        slot: String,
    },
    /// Device handle does not refer to a live device.
    #[error("unknown device handle {0}")]
    UnknownDevice(u32),
    /// Address-space handle is unknown.
    #[error("unknown address space handle {0}")]
    UnknownSpace(u32),
    /// Memory-region handle is unknown.
    #[error("unknown memory region handle {0}")]
    UnknownRegion(u32),
    /// Bank handle is unknown.
    #[error("unknown bank handle {0}")]
    UnknownBank(u32),
    /// Line handle is unknown.
    #[error("unknown line handle {0}")]
    UnknownLine(u32),
    /// Bank entry selection is outside the configured entries.
    #[error("bank `{bank}` has no entry {entry} ({count} configured)")]
    BankEntryOutOfRange {
        /// Name of the bank.
        bank: String,
        /// Requested entry index.
        entry: usize,
        /// Number of configured entries.
        count: usize,
    },
    /// Mapping or bank entry points outside its backing region.
    #[error("offset {offset:#x} exceeds region `{region}` ({size} bytes)")]
    RegionOverrun {
        /// Name of the backing region.
        region: String,
        /// Requested base offset.
        offset: u64,
        /// Region size in bytes.
        size: usize,
    },
    /// Callback handler installed in the wrong direction's table.
    #[error("{kind} callback cannot be installed for {direction} in space `{space}`")]
    HandlerDirection {
        /// Name of the address space.
        space: String,
        /// Kind of callback that was offered.
        kind: &'static str,
        /// Direction it was installed for.
        direction: &'static str,
    },
    /// Executing device declared a zero clock.
    #[error("executing device `{device}` has no clock")]
    InvalidClock {
        /// Tag of the offending device.
        device: String,
    },
    /// Two devices share the same tag.
    #[error("duplicate device tag `{tag}`")]
    DuplicateTag {
        /// The duplicated tag.
        tag: String,
    },
    /// Operation is only valid before the machine starts.
    #[error("machine already started")]
    AlreadyStarted,
    /// Device refused to start.
    #[error("device `{device}` failed to start: {reason}")]
    DeviceStart {
        /// Tag of the offending device.
        device: String,
        /// Reason reported by the device.
        reason: String,
    },
}

/// Errors returned by the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RunError {
    /// `run_until` called before `start` or after `stop`.
    #[error("machine is not running")]
    NotRunning,
    /// `run_until` called from inside a scheduler callback.
    #[error("scheduler entered reentrantly from a callback")]
    Reentrant,
}

/// Errors reported when a save state cannot be restored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// Snapshot bytes do not start with the expected magic.
    #[error("snapshot magic mismatch")]
    BadMagic,
    /// Snapshot version is not understood.
    #[error("unsupported snapshot version {0}")]
    VersionMismatch(u16),
    /// Snapshot bytes ended early.
    #[error("snapshot truncated")]
    Truncated,
    /// Registered items differ from the snapshot entries.
    #[error("state layout mismatch at `{key}`")]
    LayoutMismatch {
        /// First key that did not match.
        key: String,
    },
    /// Snapshot contents are internally inconsistent.
    #[error("corrupt state entry `{key}`")]
    Corrupt {
        /// Offending key.
        key: String,
    },
    /// Save or load attempted while the scheduler is dispatching.
    #[error("machine busy")]
    Busy,
}

/// Non-fatal runtime anomalies. These are logged and counted, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RuntimeFault {
    /// Read from an address with no read handler.
    #[error("unmapped read")]
    UnmappedRead,
    /// Write to an address with no write handler.
    #[error("unmapped write")]
    UnmappedWrite,
    /// Write to read-only memory.
    #[error("write to read-only memory")]
    RomWrite,
    /// Access through a bank fell outside the selected region.
    #[error("bank access outside its region")]
    BankOutOfRange,
    /// CPU fetched an undefined opcode.
    #[error("illegal opcode")]
    IllegalOpcode,
    /// Scheduled work targeted a torn-down device or callback.
    #[error("dispatch to a removed target was defused")]
    DefusedTimer,
    /// Scheduler or callback reentered while already running.
    #[error("reentrant scheduler or callback invocation")]
    Reentrancy,
    /// Access targeted a device that is currently executing.
    #[error("device busy")]
    DeviceBusy,
}

impl RuntimeFault {
    /// Returns the diagnostics class for this fault.
    #[must_use]
    pub const fn class(self) -> FaultClass {
        match self {
            Self::UnmappedRead | Self::UnmappedWrite | Self::RomWrite | Self::BankOutOfRange => {
                FaultClass::Memory
            }
            Self::IllegalOpcode => FaultClass::Execution,
            Self::DefusedTimer | Self::Reentrancy | Self::DeviceBusy => FaultClass::Scheduling,
        }
    }

    /// Stable numeric code, used by trace fingerprints and diagnostics.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::UnmappedRead => 0x01,
            Self::UnmappedWrite => 0x02,
            Self::RomWrite => 0x03,
            Self::BankOutOfRange => 0x04,
            Self::IllegalOpcode => 0x05,
            Self::DefusedTimer => 0x06,
            Self::Reentrancy => 0x07,
            Self::DeviceBusy => 0x08,
        }
    }

    /// Converts a stable numeric code back into a fault.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::UnmappedRead),
            0x02 => Some(Self::UnmappedWrite),
            0x03 => Some(Self::RomWrite),
            0x04 => Some(Self::BankOutOfRange),
            0x05 => Some(Self::IllegalOpcode),
            0x06 => Some(Self::DefusedTimer),
            0x07 => Some(Self::Reentrancy),
            0x08 => Some(Self::DeviceBusy),
            _ => None,
        }
    }
}
