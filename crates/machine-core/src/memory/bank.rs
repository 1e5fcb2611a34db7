//! Runtime-redirectable memory banks.
//!
//! A bank is an indirection between an address range and a memory region.
//! Switching banks never touches the address map: only the selected entry
//! changes, and every lookup that resolves to the bank follows it.

use crate::{ConfigError, RegionId};

/// Handle to a bank owned by the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BankId(pub(crate) u32);

impl BankId {
    /// Raw bank index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// One selectable target of a bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BankEntry {
    /// Backing region.
    pub region: RegionId,
    /// Byte offset inside the region where the bank window starts.
    pub offset: u64,
}

/// A named bank with its entries and current selection.
#[derive(Debug, Clone)]
pub struct Bank {
    name: String,
    writable: bool,
    entries: Vec<BankEntry>,
    current: usize,
}

impl Bank {
    pub(crate) fn new(name: impl Into<String>, writable: bool) -> Self {
        Self {
            name: name.into(),
            writable,
            entries: Vec::new(),
            current: 0,
        }
    }

    /// Bank name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether writes through this bank reach the backing region.
    #[must_use]
    pub const fn writable(&self) -> bool {
        self.writable
    }

    /// Configured entries.
    #[must_use]
    pub fn entries(&self) -> &[BankEntry] {
        &self.entries
    }

    /// Index of the selected entry.
    #[must_use]
    pub const fn current(&self) -> usize {
        self.current
    }

    /// The selected entry, if any entry is configured.
    #[must_use]
    pub fn target(&self) -> Option<BankEntry> {
        self.entries.get(self.current).copied()
    }

    pub(crate) fn push(&mut self, entry: BankEntry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    pub(crate) fn select(&mut self, entry: usize) -> Result<(), ConfigError> {
        if entry >= self.entries.len() {
            return Err(ConfigError::BankEntryOutOfRange {
                bank: self.name.clone(),
                entry,
                count: self.entries.len(),
            });
        }
        self.current = entry;
        Ok(())
    }

    /// Restores a selection from a save state without validation side effects.
    pub(crate) fn restore_selection(&mut self, entry: usize) -> bool {
        if entry < self.entries.len() || (entry == 0 && self.entries.is_empty()) {
            self.current = entry;
            true
        } else {
            false
        }
    }
}
