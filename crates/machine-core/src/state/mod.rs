//! Save-state registration and byte-exact capture/restore.
//!
//! Owners describe their state by visiting named fields; the same visit is
//! used to enumerate the layout, to capture a [`Snapshot`], and to restore
//! one. Field order is the registration order, so it must not depend on the
//! values being saved.

use crate::state::codec::ByteReader;
use crate::StateError;

pub(crate) mod codec;

/// Versioned snapshot container.
pub mod snapshot;
pub use snapshot::{Snapshot, SnapshotEntry, SnapshotVersion, SNAPSHOT_MAGIC};

/// A mutable reference to one saved field.
#[derive(Debug)]
pub enum StateItem<'a> {
    /// 8-bit integer.
    U8(&'a mut u8),
    /// 16-bit integer.
    U16(&'a mut u16),
    /// 32-bit integer.
    U32(&'a mut u32),
    /// 64-bit integer.
    U64(&'a mut u64),
    /// 128-bit integer.
    U128(&'a mut u128),
    /// Boolean, saved as one byte.
    Bool(&'a mut bool),
    /// Fixed-size byte buffer.
    Bytes(&'a mut [u8]),
    /// Variable-size byte buffer.
    Blob(&'a mut Vec<u8>),
}

impl StateItem<'_> {
    /// Serialized size, or `None` for variable-size blobs.
    #[must_use]
    pub fn fixed_len(&self) -> Option<usize> {
        match self {
            Self::U8(_) | Self::Bool(_) => Some(1),
            Self::U16(_) => Some(2),
            Self::U32(_) => Some(4),
            Self::U64(_) => Some(8),
            Self::U128(_) => Some(16),
            Self::Bytes(bytes) => Some(bytes.len()),
            Self::Blob(_) => None,
        }
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            Self::U8(value) => vec![**value],
            Self::U16(value) => value.to_le_bytes().to_vec(),
            Self::U32(value) => value.to_le_bytes().to_vec(),
            Self::U64(value) => value.to_le_bytes().to_vec(),
            Self::U128(value) => value.to_le_bytes().to_vec(),
            Self::Bool(value) => vec![u8::from(**value)],
            Self::Bytes(bytes) => bytes.to_vec(),
            Self::Blob(bytes) => bytes.to_vec(),
        }
    }

    fn decode(self, data: &[u8]) -> Option<()> {
        if self.fixed_len().is_some_and(|len| len != data.len()) {
            return None;
        }
        let mut input = ByteReader::new(data);
        match self {
            Self::U8(value) => *value = input.u8()?,
            Self::U16(value) => *value = input.u16()?,
            Self::U32(value) => *value = input.u32()?,
            Self::U64(value) => *value = input.u64()?,
            Self::U128(value) => *value = input.u128()?,
            Self::Bool(value) => *value = input.bool()?,
            Self::Bytes(bytes) => bytes.copy_from_slice(data),
            Self::Blob(bytes) => {
                bytes.clear();
                bytes.extend_from_slice(data);
            }
        }
        Some(())
    }
}

/// Receives every saved field of a state owner.
pub trait StateVisitor {
    /// Visits one named field.
    fn item(&mut self, name: &str, item: StateItem<'_>);

    /// Reports that the value just restored into the named field is not
    /// valid for its owner. Only restoring visitors act on it.
    fn reject(&mut self, _name: &str) {}
}

/// One entry of a machine's state layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
    /// `owner/field` key.
    pub key: String,
    /// Serialized size, `None` for variable-size blobs.
    pub len: Option<usize>,
}

/// Prefixes every key with an owner name.
pub(crate) struct Scoped<'v> {
    prefix: &'v str,
    inner: &'v mut dyn StateVisitor,
}

impl<'v> Scoped<'v> {
    pub(crate) fn new(prefix: &'v str, inner: &'v mut dyn StateVisitor) -> Self {
        Self { prefix, inner }
    }
}

impl StateVisitor for Scoped<'_> {
    fn item(&mut self, name: &str, item: StateItem<'_>) {
        let key = format!("{}/{name}", self.prefix);
        self.inner.item(&key, item);
    }

    fn reject(&mut self, name: &str) {
        let key = format!("{}/{name}", self.prefix);
        self.inner.reject(&key);
    }
}

#[derive(Debug, Default)]
pub(crate) struct LayoutCollector {
    pub(crate) keys: Vec<StateKey>,
}

impl StateVisitor for LayoutCollector {
    fn item(&mut self, name: &str, item: StateItem<'_>) {
        self.keys.push(StateKey {
            key: name.to_owned(),
            len: item.fixed_len(),
        });
    }
}

#[derive(Debug, Default)]
pub(crate) struct SaveCollector {
    pub(crate) entries: Vec<SnapshotEntry>,
}

impl StateVisitor for SaveCollector {
    fn item(&mut self, name: &str, item: StateItem<'_>) {
        self.entries.push(SnapshotEntry {
            key: name.to_owned(),
            data: item.encode(),
        });
    }
}

/// Writes snapshot entries back in layout order. The first failure sticks.
pub(crate) struct LoadApplier<'s> {
    entries: std::slice::Iter<'s, SnapshotEntry>,
    pub(crate) error: Option<StateError>,
}

impl<'s> LoadApplier<'s> {
    pub(crate) fn new(entries: &'s [SnapshotEntry]) -> Self {
        Self {
            entries: entries.iter(),
            error: None,
        }
    }
}

impl StateVisitor for LoadApplier<'_> {
    fn item(&mut self, name: &str, item: StateItem<'_>) {
        if self.error.is_some() {
            return;
        }
        let Some(entry) = self.entries.next() else {
            self.error = Some(StateError::LayoutMismatch {
                key: name.to_owned(),
            });
            return;
        };
        if entry.key != name {
            self.error = Some(StateError::LayoutMismatch {
                key: name.to_owned(),
            });
        } else if item.decode(&entry.data).is_none() {
            self.reject(name);
        }
    }

    fn reject(&mut self, name: &str) {
        if self.error.is_none() {
            self.error = Some(StateError::Corrupt {
                key: name.to_owned(),
            });
        }
    }
}

/// Checks snapshot entries against a layout without touching any state.
///
/// # Errors
///
/// Returns [`StateError::LayoutMismatch`] naming the first differing key, or
/// [`StateError::Corrupt`] when a fixed-size field has the wrong length.
pub fn validate_layout(layout: &[StateKey], entries: &[SnapshotEntry]) -> Result<(), StateError> {
    for (index, key) in layout.iter().enumerate() {
        let Some(entry) = entries.get(index) else {
            return Err(StateError::LayoutMismatch {
                key: key.key.clone(),
            });
        };
        if entry.key != key.key {
            return Err(StateError::LayoutMismatch {
                key: key.key.clone(),
            });
        }
        if key.len.is_some_and(|len| len != entry.data.len()) {
            return Err(StateError::Corrupt {
                key: key.key.clone(),
            });
        }
    }
    if let Some(extra) = entries.get(layout.len()) {
        return Err(StateError::LayoutMismatch {
            key: extra.key.clone(),
        });
    }
    Ok(())
}
