//! Memory-mapped flat image files.
//!
//! A flat image is the simplest on-disk form of a memory snapshot: the raw bytes of one
//! contiguous target range, with the range's base address known out of band. Mapping the file
//! instead of reading it lets multi-gigabyte heaps be inspected with only the touched pages
//! resident.

use std::{fs, path::Path};

use memmap2::Mmap;

use super::MemorySource;
use crate::{address::Address, Error::NotMapped, Result};

/// A [`MemorySource`] backed by a memory-mapped file.
///
/// File offset `0` corresponds to target address `base`; every byte of the file is mapped.
///
/// # Examples
///
/// ```rust,no_run
/// use heapscope::{source::MappedImage, Address};
///
/// let image = MappedImage::open("gen0.bin", Address::new(0x0000_0000_03d7_0000))?;
/// println!("{} bytes mapped at {}", image.len(), image.base());
/// # Ok::<(), heapscope::Error>(())
/// ```
#[derive(Debug)]
pub struct MappedImage {
    /// Memory-mapped file data
    data: Mmap,
    /// Target address of the first byte
    base: Address,
}

impl MappedImage {
    /// Map the file at `path` read-only, anchored at `base`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped.
    pub fn open(path: impl AsRef<Path>, base: Address) -> Result<MappedImage> {
        let file = fs::File::open(path)?;
        Self::from_file(&file, base)
    }

    /// Map an already opened file, anchored at `base`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if mapping fails.
    pub fn from_file(file: &fs::File, base: Address) -> Result<MappedImage> {
        // The snapshot file is treated as immutable for the lifetime of the mapping.
        let data = unsafe { Mmap::map(file)? };

        Ok(MappedImage { data, base })
    }

    /// Target address of the first mapped byte.
    #[must_use]
    pub fn base(&self) -> Address {
        self.base
    }

    /// Number of mapped bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn slice(&self, address: Address, length: usize) -> Option<&[u8]> {
        let start = usize::try_from(address.distance_from(self.base)?).ok()?;
        let end = start.checked_add(length)?;
        self.data.get(start..end)
    }
}

impl MemorySource for MappedImage {
    fn read(&self, address: Address, buf: &mut [u8]) -> Result<()> {
        let slice = self.slice(address, buf.len()).ok_or(NotMapped(address))?;
        buf.copy_from_slice(slice);
        Ok(())
    }

    fn is_mapped(&self, address: Address, length: usize) -> bool {
        self.slice(address, length).is_some()
    }
}
