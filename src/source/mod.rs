//! Raw byte access to the target's address space.
//!
//! This module defines the only collaborator the engine needs from the outside world: a
//! [`MemorySource`] that returns the bytes stored at a target address, or
//! [`crate::Error::NotMapped`] if the snapshot does not contain them. Dump-container readers and
//! live-process readers implement this trait outside the crate; two implementations ship here so
//! the engine can be driven without one:
//!
//! - [`MemoryBuffer`] - Sparse set of in-memory regions, each anchored at a base address
//! - [`MappedImage`] - A memory-mapped flat image file covering one contiguous range
//!
//! # Decoding Helpers
//!
//! The trait itself is object safe and only knows how to fill a buffer. Typed reads
//! (`read_value`, `read_pointer`) live on [`MemorySourceExt`], which is implemented for every
//! source including `dyn MemorySource`.
//!
//! # Thread Safety
//!
//! Sources must be `Send + Sync`. Snapshots are immutable, so implementations only need to
//! make their own bookkeeping thread-safe.

pub mod io;
pub mod parser;

mod buffer;
mod mapped;

use std::sync::Arc;

pub use buffer::MemoryBuffer;
pub use mapped::MappedImage;

use crate::{address::Address, source::io::HeapIO, Error, Result};

/// Scratch size used by the default [`MemorySource::is_mapped`].
const SCRATCH_CHUNK: usize = 4096;

/// Supplier of raw target bytes.
///
/// Implementations must either fill the whole buffer or fail; partial reads are reported as
/// [`crate::Error::NotMapped`] with the address of the request.
pub trait MemorySource: Send + Sync {
    /// Fill `buf` with the bytes stored at `address`.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotMapped`] if any part of the range is not backed.
    fn read(&self, address: Address, buf: &mut [u8]) -> Result<()>;

    /// Returns `true` if `length` bytes starting at `address` are backed.
    ///
    /// The default implementation attempts a read; implementations with a region table
    /// should override it.
    fn is_mapped(&self, address: Address, length: usize) -> bool {
        let mut scratch = [0u8; SCRATCH_CHUNK];
        let mut offset = 0;
        while offset < length {
            let chunk = (length - offset).min(SCRATCH_CHUNK);
            let readable = address
                .offset(offset as u64)
                .and_then(|at| self.read(at, &mut scratch[..chunk]));
            if readable.is_err() {
                return false;
            }
            offset += chunk;
        }
        true
    }

    /// Read `length` bytes at `address` into a new vector.
    ///
    /// The range is checked with [`MemorySource::is_mapped`] before anything is allocated, so
    /// lengths taken from corrupt target memory fail instead of exhausting host memory.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotMapped`] if any part of the range is not backed.
    fn read_bytes(&self, address: Address, length: usize) -> Result<Vec<u8>> {
        if !self.is_mapped(address, length) {
            return Err(Error::NotMapped(address));
        }
        let mut buf = vec![0u8; length];
        self.read(address, &mut buf)?;
        Ok(buf)
    }
}

impl<S: MemorySource + ?Sized> MemorySource for Arc<S> {
    fn read(&self, address: Address, buf: &mut [u8]) -> Result<()> {
        (**self).read(address, buf)
    }

    fn is_mapped(&self, address: Address, length: usize) -> bool {
        (**self).is_mapped(address, length)
    }
}

impl<S: MemorySource + ?Sized> MemorySource for &S {
    fn read(&self, address: Address, buf: &mut [u8]) -> Result<()> {
        (**self).read(address, buf)
    }

    fn is_mapped(&self, address: Address, length: usize) -> bool {
        (**self).is_mapped(address, length)
    }
}

/// Typed reads on top of [`MemorySource`].
pub trait MemorySourceExt: MemorySource {
    /// Read a little-endian value at `address`.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotMapped`] if the value's bytes are not backed.
    fn read_value<T: HeapIO>(&self, address: Address) -> Result<T> {
        let mut buf = [0u8; 8];
        let bytes = &mut buf[..std::mem::size_of::<T>()];
        self.read(address, bytes)?;
        io::read_le(bytes)
    }

    /// Read a target pointer of `pointer_size` bytes at `address`.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotMapped`] if the pointer's bytes are not backed.
    fn read_pointer(&self, address: Address, pointer_size: usize) -> Result<Address> {
        let mut buf = [0u8; 8];
        let bytes = buf.get_mut(..pointer_size).ok_or(Error::OutOfBounds)?;
        self.read(address, bytes)?;
        let mut offset = 0;
        io::read_ptr_at(bytes, &mut offset, pointer_size).map(Address::new)
    }
}

impl<S: MemorySource + ?Sized> MemorySourceExt for S {}

#[cfg(test)]
mod tests {
    use super::*;

    /// A source that only implements `read`, relying on every default method.
    struct ReadOnly(MemoryBuffer);

    impl MemorySource for ReadOnly {
        fn read(&self, address: Address, buf: &mut [u8]) -> Result<()> {
            self.0.read(address, buf)
        }
    }

    #[test]
    fn test_ext_reads() {
        let mut data = vec![0u8; 16];
        data[..8].copy_from_slice(&0x7FF9_FD29_8538_u64.to_le_bytes());
        data[8..12].copy_from_slice(&72u32.to_le_bytes());
        let source = MemoryBuffer::with_region(Address::new(0x1000), data);

        assert_eq!(
            source.read_pointer(Address::new(0x1000), 8).unwrap(),
            Address::new(0x7FF9_FD29_8538)
        );
        assert_eq!(source.read_value::<u32>(Address::new(0x1008)).unwrap(), 72);
        assert_eq!(
            source.read_pointer(Address::new(0x1008), 4).unwrap(),
            Address::new(72)
        );
        assert!(matches!(
            source.read_value::<u64>(Address::new(0x100C)),
            Err(Error::NotMapped(_))
        ));
    }

    #[test]
    fn test_dyn_and_arc() {
        let source: Arc<dyn MemorySource> =
            Arc::new(MemoryBuffer::with_region(Address::new(0x10), vec![1, 2, 3, 4]));
        assert_eq!(source.read_value::<u16>(Address::new(0x12)).unwrap(), 0x0403);
        assert!(source.is_mapped(Address::new(0x10), 4));
        assert!(!source.is_mapped(Address::new(0x10), 5));
        assert_eq!(source.read_bytes(Address::new(0x11), 2).unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_default_read_bytes_checks_range_first() {
        let source = ReadOnly(MemoryBuffer::with_region(
            Address::new(0x1000),
            vec![0xAB; 10_000],
        ));
        assert!(source.is_mapped(Address::new(0x1000), 10_000));
        assert!(!source.is_mapped(Address::new(0x1000), 10_001));
        assert_eq!(
            source.read_bytes(Address::new(0x1000 + 9_000), 1_000).unwrap(),
            vec![0xAB; 1_000]
        );
        assert!(matches!(
            source.read_bytes(Address::new(0x1000), 1 << 40),
            Err(Error::NotMapped(_))
        ));
    }
}
