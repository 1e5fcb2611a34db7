//! Arena of named backing buffers referenced by stable index.

/// Handle to a memory region owned by the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RegionId(pub(crate) u32);

impl RegionId {
    /// Raw arena index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Kind of backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    /// Externally supplied image (ROM, cartridge, BIOS). Not part of save states.
    Rom,
    /// Machine-allocated read/write storage. Saved with the machine state.
    Ram,
}

/// A named byte buffer.
#[derive(Debug, Clone)]
pub struct Region {
    name: String,
    kind: RegionKind,
    data: Box<[u8]>,
}

impl Region {
    /// Region name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Region kind.
    #[must_use]
    pub const fn kind(&self) -> RegionKind {
        self.kind
    }

    /// Region contents.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable region contents.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` for a zero-length region.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn byte(&self, offset: u64) -> Option<u8> {
        usize::try_from(offset)
            .ok()
            .and_then(|index| self.data.get(index).copied())
    }

    pub(crate) fn byte_mut(&mut self, offset: u64) -> Option<&mut u8> {
        usize::try_from(offset)
            .ok()
            .and_then(|index| self.data.get_mut(index))
    }

    /// Returns `len` contiguous bytes at `offset`, when fully in bounds.
    pub(crate) fn slice(&self, offset: u64, len: u64) -> Option<&[u8]> {
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(usize::try_from(len).ok()?)?;
        self.data.get(start..end)
    }

    pub(crate) fn slice_mut(&mut self, offset: u64, len: u64) -> Option<&mut [u8]> {
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(usize::try_from(len).ok()?)?;
        self.data.get_mut(start..end)
    }
}

/// Owner of every region of a machine.
#[derive(Debug, Clone, Default)]
pub struct RegionArena {
    regions: Vec<Region>,
}

impl RegionArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a region and returns its handle.
    pub fn add(&mut self, name: impl Into<String>, kind: RegionKind, data: Vec<u8>) -> RegionId {
        let id = RegionId(u32::try_from(self.regions.len()).unwrap_or(u32::MAX));
        self.regions.push(Region {
            name: name.into(),
            kind,
            data: data.into_boxed_slice(),
        });
        id
    }

    /// Looks up a region.
    #[must_use]
    pub fn get(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id.0 as usize)
    }

    /// Looks up a region mutably.
    pub fn get_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        self.regions.get_mut(id.0 as usize)
    }

    /// Finds a region by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<RegionId> {
        self.regions
            .iter()
            .position(|region| region.name == name)
            .and_then(|index| u32::try_from(index).ok())
            .map(RegionId)
    }

    /// Iterates regions in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (RegionId, &Region)> {
        (0_u32..).zip(self.regions.iter()).map(|(i, r)| (RegionId(i), r))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (RegionId, &mut Region)> {
        (0_u32..)
            .zip(self.regions.iter_mut())
            .map(|(i, r)| (RegionId(i), r))
    }
}
