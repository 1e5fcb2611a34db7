//! Address space configuration and per-space decode state.

use crate::memory::{Endianness, HandlerTable, MapEntry, OpenBus};
use crate::ConfigError;

/// Handle to an address space owned by the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SpaceId(pub(crate) u32);

impl SpaceId {
    /// Raw space index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Smallest supported address width.
pub const MIN_ADDRESS_BITS: u8 = 8;
/// Largest supported address width.
pub const MAX_ADDRESS_BITS: u8 = 64;

/// Static description of an address space.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SpaceConfig {
    /// Space name, used in diagnostics and save-state keys.
    pub name: String,
    /// Address width in bits (8..=64).
    pub address_bits: u8,
    /// Byte order of multi-byte accesses.
    pub endianness: Endianness,
    /// Value floated back by unmapped reads.
    pub open_bus: OpenBus,
    /// Log unmapped accesses at `warn` instead of `trace`.
    pub log_unmapped: bool,
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            name: "program".to_owned(),
            address_bits: 16,
            endianness: Endianness::Little,
            open_bus: OpenBus::default(),
            log_unmapped: true,
        }
    }
}

impl SpaceConfig {
    /// Creates a little-endian space with default open-bus behavior.
    #[must_use]
    pub fn new(name: impl Into<String>, address_bits: u8) -> Self {
        Self {
            name: name.into(),
            address_bits,
            ..Self::default()
        }
    }

    /// Sets the byte order.
    #[must_use]
    pub const fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    /// Sets the open-bus policy.
    #[must_use]
    pub const fn with_open_bus(mut self, open_bus: OpenBus) -> Self {
        self.open_bus = open_bus;
        self
    }

    /// Sets whether unmapped accesses are logged loudly.
    #[must_use]
    pub const fn with_log_unmapped(mut self, log_unmapped: bool) -> Self {
        self.log_unmapped = log_unmapped;
        self
    }
}

/// Which handler table(s) an install targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapDirection {
    /// Read table only.
    Read,
    /// Write table only.
    Write,
    /// Both tables.
    ReadWrite,
}

impl MapDirection {
    /// Returns `true` when the read table is affected.
    #[must_use]
    pub const fn reads(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    /// Returns `true` when the write table is affected.
    #[must_use]
    pub const fn writes(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    pub(crate) const fn label(self) -> &'static str {
        match self {
            Self::Read => "reads",
            Self::Write => "writes",
            Self::ReadWrite => "reads and writes",
        }
    }
}

/// One bus: configuration, read and write tables, and the data-bus latch.
#[derive(Debug, Clone)]
pub struct AddressSpace {
    config: SpaceConfig,
    mask: u64,
    read: HandlerTable,
    write: HandlerTable,
    last_value: u64,
}

impl AddressSpace {
    /// Builds an empty space.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddressWidth`] when the width is outside
    /// 8..=64 bits.
    pub fn new(config: SpaceConfig) -> Result<Self, ConfigError> {
        if !(MIN_ADDRESS_BITS..=MAX_ADDRESS_BITS).contains(&config.address_bits) {
            return Err(ConfigError::InvalidAddressWidth {
                space: config.name,
                address_bits: config.address_bits,
            });
        }
        let mask = if config.address_bits == 64 {
            u64::MAX
        } else {
            (1_u64 << config.address_bits) - 1
        };
        Ok(Self {
            config,
            mask,
            read: HandlerTable::new(),
            write: HandlerTable::new(),
            last_value: 0,
        })
    }

    /// Space configuration.
    #[must_use]
    pub const fn config(&self) -> &SpaceConfig {
        &self.config
    }

    /// Space name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Mask of valid address bits.
    #[must_use]
    pub const fn address_mask(&self) -> u64 {
        self.mask
    }

    /// Read-side handler table.
    #[must_use]
    pub const fn read_table(&self) -> &HandlerTable {
        &self.read
    }

    /// Write-side handler table.
    #[must_use]
    pub const fn write_table(&self) -> &HandlerTable {
        &self.write
    }

    /// Last value driven on the data bus.
    #[must_use]
    pub const fn last_value(&self) -> u64 {
        self.last_value
    }

    pub(crate) fn set_last_value(&mut self, value: u64) {
        self.last_value = value;
    }

    /// Validates that `start..=end` is well formed and inside the space.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MalformedRange`] or
    /// [`ConfigError::RangeOutOfBounds`].
    pub fn check_range(&self, start: u64, end: u64) -> Result<(), ConfigError> {
        if start > end {
            return Err(ConfigError::MalformedRange {
                space: self.config.name.clone(),
                start,
                end,
            });
        }
        if end > self.mask {
            return Err(ConfigError::RangeOutOfBounds {
                space: self.config.name.clone(),
                start,
                end,
                address_bits: self.config.address_bits,
            });
        }
        Ok(())
    }

    /// Installs an entry; returns `true` if an existing mapping was overridden.
    pub(crate) fn install(
        &mut self,
        direction: MapDirection,
        start: u64,
        end: u64,
        entry: MapEntry,
    ) -> Result<bool, ConfigError> {
        self.check_range(start, end)?;
        let mut overridden = false;
        if direction.reads() {
            overridden |= self.read.install(start, end, entry);
        }
        if direction.writes() {
            overridden |= self.write.install(start, end, entry);
        }
        Ok(overridden)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{AddressSpace, MapDirection, SpaceConfig};
    use crate::memory::{Handler, MapEntry};
    use crate::ConfigError;

    #[rstest]
    #[case(8, 0xFF)]
    #[case(16, 0xFFFF)]
    #[case(24, 0xFF_FFFF)]
    #[case(64, u64::MAX)]
    fn address_mask_follows_width(#[case] bits: u8, #[case] mask: u64) {
        let space = AddressSpace::new(SpaceConfig::new("s", bits)).expect("valid width");
        assert_eq!(space.address_mask(), mask);
    }

    #[rstest]
    #[case(0)]
    #[case(7)]
    #[case(65)]
    fn unsupported_widths_are_rejected(#[case] bits: u8) {
        assert_eq!(
            AddressSpace::new(SpaceConfig::new("io", bits)).err(),
            Some(ConfigError::InvalidAddressWidth {
                space: "io".into(),
                address_bits: bits,
            })
        );
    }

    #[test]
    fn ranges_are_validated_against_the_space() {
        let space = AddressSpace::new(SpaceConfig::default()).expect("default is valid");
        assert!(space.check_range(0, 0xFFFF).is_ok());
        assert!(matches!(
            space.check_range(0x2000, 0x1000),
            Err(ConfigError::MalformedRange { .. })
        ));
        assert!(matches!(
            space.check_range(0x0000, 0x1_0000),
            Err(ConfigError::RangeOutOfBounds {
                address_bits: 16,
                ..
            })
        ));
    }

    #[test]
    fn direction_selects_tables() {
        let mut space = AddressSpace::new(SpaceConfig::default()).expect("valid");
        space
            .install(MapDirection::Read, 0, 0xFF, MapEntry::new(Handler::Nop))
            .expect("in range");
        assert!(space.read_table().lookup(0x10).is_some());
        assert!(space.write_table().lookup(0x10).is_none());

        space
            .install(MapDirection::ReadWrite, 0x100, 0x1FF, MapEntry::new(Handler::Nop))
            .expect("in range");
        assert!(space.write_table().lookup(0x100).is_some());
    }
}
