use std::collections::BTreeMap;

use super::MemorySource;
use crate::{address::Address, Error::NotMapped, Result};

/// Target memory held in host buffers.
///
/// A `MemoryBuffer` is a sparse map of regions, each a contiguous byte vector anchored at a
/// base address. Reads must fall entirely inside one region; a read straddling two adjacent
/// regions is rejected like any other unmapped access. Regions must not overlap.
///
/// This is the source produced by [`crate::builder::HeapImageBuilder`] and the natural choice
/// for dump readers that load their memory ranges eagerly.
#[derive(Debug, Default, Clone)]
pub struct MemoryBuffer {
    regions: BTreeMap<u64, Vec<u8>>,
}

impl MemoryBuffer {
    /// Create an empty buffer with no mapped regions.
    #[must_use]
    pub fn new() -> MemoryBuffer {
        MemoryBuffer::default()
    }

    /// Create a buffer with a single region.
    ///
    /// ## Arguments
    /// * 'base' - The target address of the first byte
    /// * 'data' - The region contents
    #[must_use]
    pub fn with_region(base: Address, data: Vec<u8>) -> MemoryBuffer {
        let mut buffer = MemoryBuffer::new();
        buffer.insert_region(base, data);
        buffer
    }

    /// Map a region at `base`, replacing any region that starts at the same address.
    pub fn insert_region(&mut self, base: Address, data: Vec<u8>) {
        self.regions.insert(base.value(), data);
    }

    /// Iterate over `(base, length)` of every mapped region, in address order.
    pub fn regions(&self) -> impl Iterator<Item = (Address, usize)> + '_ {
        self.regions
            .iter()
            .map(|(base, data)| (Address::new(*base), data.len()))
    }

    /// Total number of mapped bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.values().map(Vec::len).sum()
    }

    /// Returns `true` if nothing is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite bytes at `address`.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotMapped`] if the range is not inside one region.
    pub fn write(&mut self, address: Address, bytes: &[u8]) -> Result<()> {
        let (base, data) = self
            .regions
            .range_mut(..=address.value())
            .next_back()
            .ok_or(NotMapped(address))?;
        let start = usize::try_from(address.value() - *base).map_err(|_| NotMapped(address))?;
        let end = start.checked_add(bytes.len()).ok_or(NotMapped(address))?;
        if end > data.len() {
            return Err(NotMapped(address));
        }

        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn slice(&self, address: Address, length: usize) -> Option<&[u8]> {
        let (base, data) = self.regions.range(..=address.value()).next_back()?;
        let start = usize::try_from(address.value() - *base).ok()?;
        let end = start.checked_add(length)?;
        data.get(start..end)
    }
}

impl MemorySource for MemoryBuffer {
    fn read(&self, address: Address, buf: &mut [u8]) -> Result<()> {
        let slice = self.slice(address, buf.len()).ok_or(NotMapped(address))?;
        buf.copy_from_slice(slice);
        Ok(())
    }

    fn is_mapped(&self, address: Address, length: usize) -> bool {
        self.slice(address, length).is_some()
    }
}
