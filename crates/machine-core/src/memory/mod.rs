//! Address spaces, memory regions, banks, and handler resolution.
//!
//! Dispatch itself lives on [`crate::Machine`], because handlers may call back
//! into devices and closures that need the whole machine.

/// Access widths, byte order, and open-bus policy.
pub mod access;
pub use access::{Access, AccessWidth, Endianness, OpenBus};

/// Runtime-redirectable banks.
pub mod bank;
pub use bank::{Bank, BankEntry, BankId};

/// Sorted range tables.
pub mod map;
pub use map::{Handler, HandlerTable, MapEntry, ReadHandlerId, Segment, WriteHandlerId};

/// Named backing buffers.
pub mod region;
pub use region::{Region, RegionArena, RegionId, RegionKind};

/// Per-bus configuration and decode state.
pub mod space;
pub use space::{
    AddressSpace, MapDirection, SpaceConfig, SpaceId, MAX_ADDRESS_BITS, MIN_ADDRESS_BITS,
};
