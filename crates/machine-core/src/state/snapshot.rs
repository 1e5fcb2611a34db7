//! Versioned, self-describing save-state container.

use crate::state::codec::{ByteReader, ByteWriter};
use crate::StateError;

/// Leading bytes of a serialized snapshot.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"MCSS";

/// Stable snapshot wire-version identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u16)]
pub enum SnapshotVersion {
    /// Initial schema revision.
    V1 = 1,
}

impl SnapshotVersion {
    /// Converts wire value to known snapshot version.
    #[must_use]
    pub const fn from_u16(version: u16) -> Option<Self> {
        match version {
            1 => Some(Self::V1),
            _ => None,
        }
    }

    /// Wire value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

/// One registered field and its serialized bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SnapshotEntry {
    /// `owner/field` key.
    pub key: String,
    /// Little-endian field bytes.
    pub data: Vec<u8>,
}

/// Full machine state in registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Snapshot {
    /// Snapshot schema version.
    pub version: SnapshotVersion,
    /// Entries, in the machine's state layout order.
    pub entries: Vec<SnapshotEntry>,
}

impl Snapshot {
    /// Looks up an entry's bytes by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.data.as_slice())
    }

    /// Serializes to the binary container format.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = ByteWriter::new();
        out.bytes(&SNAPSHOT_MAGIC);
        out.u16(self.version.as_u16());
        out.u32(u32::try_from(self.entries.len()).unwrap_or(u32::MAX));
        for entry in &self.entries {
            out.u16(u16::try_from(entry.key.len()).unwrap_or(u16::MAX));
            out.bytes(entry.key.as_bytes());
            out.u32(u32::try_from(entry.data.len()).unwrap_or(u32::MAX));
            out.bytes(&entry.data);
        }
        out.finish()
    }

    /// Parses the binary container format.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::BadMagic`], [`StateError::VersionMismatch`],
    /// [`StateError::Truncated`], or [`StateError::Corrupt`] for keys that are
    /// not UTF-8 or trailing garbage.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StateError> {
        let mut input = ByteReader::new(bytes);
        if input.take(SNAPSHOT_MAGIC.len()) != Some(&SNAPSHOT_MAGIC[..]) {
            return Err(StateError::BadMagic);
        }
        let raw_version = input.u16().ok_or(StateError::Truncated)?;
        let version =
            SnapshotVersion::from_u16(raw_version).ok_or(StateError::VersionMismatch(raw_version))?;
        let count = input.u32().ok_or(StateError::Truncated)?;

        let mut entries = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            let key_len = input.u16().ok_or(StateError::Truncated)?;
            let key = input
                .take(usize::from(key_len))
                .ok_or(StateError::Truncated)?;
            let key = String::from_utf8(key.to_vec()).map_err(|_| StateError::Corrupt {
                key: String::from_utf8_lossy(key).into_owned(),
            })?;
            let data_len = input.u32().ok_or(StateError::Truncated)?;
            let data = input
                .take(data_len as usize)
                .ok_or(StateError::Truncated)?
                .to_vec();
            entries.push(SnapshotEntry { key, data });
        }
        if !input.is_empty() {
            return Err(StateError::Corrupt {
                key: "<trailer>".to_owned(),
            });
        }
        Ok(Self { version, entries })
    }
}
