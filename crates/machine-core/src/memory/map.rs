//! Sorted, non-overlapping range table resolving addresses to handlers.

use std::cell::Cell;

use crate::{BankId, DeviceId, RegionId};

/// Handle to a read callback registered with the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReadHandlerId(pub(crate) u32);

/// Handle to a write callback registered with the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WriteHandlerId(pub(crate) u32);

/// What an address range resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handler {
    /// Directly addressed read/write memory.
    Ram {
        /// Backing region.
        region: RegionId,
        /// Region offset of the range start.
        base: u64,
    },
    /// Directly addressed read-only memory. Writes are dropped and diagnosed.
    Rom {
        /// Backing region.
        region: RegionId,
        /// Region offset of the range start.
        base: u64,
    },
    /// Memory reached through a switchable bank.
    Bank(BankId),
    /// Read callback closure.
    Read(ReadHandlerId),
    /// Write callback closure.
    Write(WriteHandlerId),
    /// Delegation to a device's `read`/`write` methods.
    Device(DeviceId),
    /// Decoded but inert: reads float, writes vanish, nothing is diagnosed.
    Nop,
    /// Not decoded. Installing this removes whatever covered the range.
    Unmapped,
}

/// A handler plus the mirror mask applied to range-relative offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapEntry {
    /// Target of the range.
    pub handler: Handler,
    /// Mask applied to `address - range_start`. `u64::MAX` for no mirroring.
    pub mask: u64,
}

impl MapEntry {
    /// Entry without mirroring.
    #[must_use]
    pub const fn new(handler: Handler) -> Self {
        Self {
            handler,
            mask: u64::MAX,
        }
    }

    /// Entry that repeats every `mask + 1` bytes across its range.
    #[must_use]
    pub const fn mirrored(handler: Handler, mask: u64) -> Self {
        Self { handler, mask }
    }
}

/// One contiguous piece of an installed range.
///
/// Later installs may trim or split a segment; `origin` keeps the start of
/// the range it was installed with so offsets stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Segment {
    /// First address covered.
    pub start: u64,
    /// Last address covered.
    pub end: u64,
    /// Start of the originally installed range.
    pub origin: u64,
    /// Handler and mirror mask.
    pub entry: MapEntry,
}

impl Segment {
    /// Returns `true` when `address` lies inside this segment.
    #[must_use]
    pub const fn contains(&self, address: u64) -> bool {
        address >= self.start && address <= self.end
    }

    /// Handler-relative offset for `address`.
    #[must_use]
    pub const fn offset(&self, address: u64) -> u64 {
        address.wrapping_sub(self.origin) & self.entry.mask
    }
}

/// How a multi-byte access lines up with the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Span {
    /// Entirely inside one segment.
    Within(Segment),
    /// Touches no segment.
    Unmapped,
    /// Straddles a boundary or wraps; resolved byte by byte.
    Split,
}

/// Range table for one direction (read or write) of an address space.
#[derive(Debug, Clone, Default)]
pub struct HandlerTable {
    segments: Vec<Segment>,
    last_hit: Cell<usize>,
}

impl HandlerTable {
    /// Creates an empty (fully unmapped) table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `entry` over `start..=end`; the newest install wins.
    ///
    /// Returns `true` when a differently-handled segment was overridden.
    pub fn install(&mut self, start: u64, end: u64, entry: MapEntry) -> bool {
        let mut overridden = false;
        let mut segments = Vec::with_capacity(self.segments.len() + 2);

        for segment in self.segments.drain(..) {
            if segment.end < start || segment.start > end {
                segments.push(segment);
                continue;
            }
            if segment.entry != entry || segment.origin != start {
                overridden = true;
            }
            if segment.start < start {
                segments.push(Segment {
                    end: start - 1,
                    ..segment
                });
            }
            if segment.end > end {
                segments.push(Segment {
                    start: end + 1,
                    ..segment
                });
            }
        }

        if entry.handler != Handler::Unmapped {
            segments.push(Segment {
                start,
                end,
                origin: start,
                entry,
            });
        }
        segments.sort_unstable_by_key(|segment| segment.start);

        self.segments = segments;
        self.last_hit.set(0);
        overridden
    }

    /// Resolves `address` to its segment.
    #[must_use]
    pub fn lookup(&self, address: u64) -> Option<&Segment> {
        if let Some(segment) = self.segments.get(self.last_hit.get()) {
            if segment.contains(address) {
                return Some(segment);
            }
        }
        let index = self.segments.partition_point(|segment| segment.end < address);
        let segment = self.segments.get(index)?;
        if segment.start <= address {
            self.last_hit.set(index);
            Some(segment)
        } else {
            None
        }
    }

    /// Classifies the inclusive span `start..=end` of one access.
    pub(crate) fn span(&self, start: u64, end: u64) -> Span {
        if end < start {
            return Span::Split;
        }
        match self.lookup(start) {
            Some(segment) if segment.contains(end) => Span::Within(*segment),
            Some(_) => Span::Split,
            None => {
                let index = self.segments.partition_point(|segment| segment.end < start);
                match self.segments.get(index) {
                    Some(segment) if segment.start <= end => Span::Split,
                    _ => Span::Unmapped,
                }
            }
        }
    }

    /// Installed segments in address order.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Removes every segment.
    pub fn clear(&mut self) {
        self.segments.clear();
        self.last_hit.set(0);
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{Handler, HandlerTable, MapEntry, Span};
    use crate::RegionId;

    fn ram(base: u64) -> MapEntry {
        MapEntry::new(Handler::Ram {
            region: RegionId(0),
            base,
        })
    }

    #[test]
    fn empty_table_resolves_nothing() {
        let table = HandlerTable::new();
        assert!(table.lookup(0).is_none());
        assert!(table.segments().is_empty());
    }

    #[test]
    fn newest_install_splits_older_range() {
        let mut table = HandlerTable::new();
        assert!(!table.install(0x0000, 0xFFFF, ram(0)));
        assert!(table.install(0x4000, 0x4FFF, MapEntry::new(Handler::Nop)));

        let spans: Vec<_> = table
            .segments()
            .iter()
            .map(|segment| (segment.start, segment.end))
            .collect();
        assert_eq!(
            spans,
            vec![(0x0000, 0x3FFF), (0x4000, 0x4FFF), (0x5000, 0xFFFF)]
        );

        let tail = table.lookup(0x5000).expect("tail stays mapped");
        assert_eq!(tail.offset(0x5000), 0x5000);
        assert_eq!(
            table.lookup(0x4800).map(|segment| segment.entry.handler),
            Some(Handler::Nop)
        );
    }

    #[test]
    fn reinstalling_identical_entry_is_not_an_override() {
        let mut table = HandlerTable::new();
        table.install(0x10, 0x1F, ram(0));
        assert!(!table.install(0x10, 0x1F, ram(0)));
        assert_eq!(table.segments().len(), 1);
    }

    #[test]
    fn unmapped_install_removes_coverage() {
        let mut table = HandlerTable::new();
        table.install(0x00, 0xFF, ram(0));
        table.install(0x80, 0x8F, MapEntry::new(Handler::Unmapped));
        assert!(table.lookup(0x85).is_none());
        assert!(table.lookup(0x7F).is_some());
        assert!(table.lookup(0x90).is_some());
    }

    #[test]
    fn spans_classify_boundary_crossings() {
        let mut table = HandlerTable::new();
        table.install(0x10, 0x1F, ram(0));
        assert!(matches!(table.span(0x10, 0x11), Span::Within(_)));
        assert_eq!(table.span(0x1F, 0x20), Span::Split);
        assert_eq!(table.span(0x0E, 0x11), Span::Split);
        assert_eq!(table.span(0x20, 0x23), Span::Unmapped);
        assert_eq!(table.span(0xFF, 0x00), Span::Split);
    }

    #[test]
    fn mirror_mask_folds_offsets() {
        let mut table = HandlerTable::new();
        table.install(0x0000, 0x1FFF, MapEntry::mirrored(Handler::Nop, 0x07FF));
        let segment = table.lookup(0x1801).expect("mapped");
        assert_eq!(segment.offset(0x1801), 0x0001);
        assert_eq!(segment.offset(0x0801), 0x0001);
    }

    proptest! {
        #[test]
        fn every_address_resolves_to_the_last_covering_install(
            installs in proptest::collection::vec((0_u64..256, 0_u64..64, 0_u64..4), 1..24),
            probe in 0_u64..320,
        ) {
            let mut table = HandlerTable::new();
            for (start, len, tag) in &installs {
                table.install(*start, start + len, ram(*tag));
            }

            let expected = installs
                .iter()
                .rev()
                .find(|(start, len, _)| probe >= *start && probe <= start + len)
                .map(|(_, _, tag)| ram(*tag));
            prop_assert_eq!(table.lookup(probe).map(|segment| segment.entry), expected);

            for pair in table.segments().windows(2) {
                prop_assert!(pair[0].end < pair[1].start);
            }
        }
    }
}
