//! Access widths, byte ordering, and open-bus policy.

/// Width of a single data transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessWidth {
    /// 8-bit transfer.
    Byte,
    /// 16-bit transfer.
    Word,
    /// 32-bit transfer.
    DWord,
    /// 64-bit transfer.
    QWord,
}

impl AccessWidth {
    /// Number of bytes moved by this width.
    #[must_use]
    pub const fn bytes(self) -> u64 {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::DWord => 4,
            Self::QWord => 8,
        }
    }

    /// Number of bits moved by this width.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Byte => 8,
            Self::Word => 16,
            Self::DWord => 32,
            Self::QWord => 64,
        }
    }

    /// Mask covering the data bits of this width.
    #[must_use]
    pub const fn mask(self) -> u64 {
        match self {
            Self::QWord => u64::MAX,
            other => (1_u64 << other.bits()) - 1,
        }
    }

    /// Decodes a width from a byte count.
    #[must_use]
    pub const fn from_bytes(bytes: u8) -> Option<Self> {
        match bytes {
            1 => Some(Self::Byte),
            2 => Some(Self::Word),
            4 => Some(Self::DWord),
            8 => Some(Self::QWord),
            _ => None,
        }
    }
}

/// Byte order used to compose multi-byte accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Endianness {
    /// Least-significant byte at the lowest address.
    #[default]
    Little,
    /// Most-significant byte at the lowest address.
    Big,
}

impl Endianness {
    /// Bit shift for the byte at `index` within an access of `width`.
    #[must_use]
    pub const fn shift(self, width: AccessWidth, index: u64) -> u32 {
        match self {
            Self::Little => (index * 8) as u32,
            Self::Big => ((width.bytes() - 1 - index) * 8) as u32,
        }
    }

    /// Assembles a value from bytes laid out in address order.
    #[must_use]
    pub fn compose(self, width: AccessWidth, bytes: &[u8]) -> u64 {
        let mut value = 0_u64;
        for (index, byte) in (0_u64..).zip(bytes.iter().take(width.bytes() as usize)) {
            value |= u64::from(*byte) << self.shift(width, index);
        }
        value
    }

    /// Extracts the byte that lands at `index` (address order) for `value`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn byte_at(self, width: AccessWidth, value: u64, index: u64) -> u8 {
        (value >> self.shift(width, index)) as u8
    }
}

/// Value returned by reads that hit no handler.
///
/// Real buses disagree on what floats back: some chip families read a fixed
/// pull-up pattern, others the last value driven on the data lines. Each
/// address space picks its own policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum OpenBus {
    /// Fixed byte, replicated across the access width.
    Constant(u8),
    /// Last value read or written on this space's data bus.
    LastValue,
}

impl Default for OpenBus {
    fn default() -> Self {
        Self::Constant(0xFF)
    }
}

impl OpenBus {
    /// Resolves the open-bus value for an access of `width`.
    #[must_use]
    pub const fn value(self, width: AccessWidth, last: u64) -> u64 {
        match self {
            Self::Constant(byte) => (byte as u64 * 0x0101_0101_0101_0101) & width.mask(),
            Self::LastValue => last & width.mask(),
        }
    }
}

/// One data transfer as seen by a callback or device handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Access {
    /// Absolute address on the bus.
    pub address: u64,
    /// Offset relative to the start of the handler's range (mirror mask applied).
    pub offset: u64,
    /// Transfer width.
    pub width: AccessWidth,
}
