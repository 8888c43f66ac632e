//! Cursor-based decoding over a fetched byte block.
//!
//! The [`Parser`] keeps a position into a borrowed slice and hands out bounds-checked reads.
//! It is used wherever a structure is fetched from a [`crate::MemorySource`] in one read and then
//! picked apart field by field, most notably the type-descriptor and field-table decode.
//!
//! ```rust
//! use heapscope::source::parser::Parser;
//!
//! // length-prefixed UTF-16 "Hi"
//! let data = [0x02, 0x00, 0x00, 0x00, 0x48, 0x00, 0x69, 0x00];
//! let mut parser = Parser::new(&data);
//! let length = parser.read_le::<u32>()? as usize;
//! let units = parser.read_utf16_units(length)?;
//! assert_eq!(String::from_utf16(&units).unwrap(), "Hi");
//! assert!(!parser.has_more_data());
//! # Ok::<(), heapscope::Error>(())
//! ```

use crate::{
    source::io::{read_le_at, read_ptr_at, HeapIO},
    Error::OutOfBounds,
    Result,
};

/// A cursor over a byte slice with bounds-checked, little-endian reads.
pub struct Parser<'a> {
    /// The bytes being decoded
    data: &'a [u8],
    /// Current position within `data`
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new parser positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Total length of the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the underlying data is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if unread bytes remain.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Current position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Move to an absolute position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` lies past the end of the data.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(OutOfBounds);
        }

        self.position = pos;
        Ok(())
    }

    /// Move forward by `step` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if that would move past the end of the data.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        let target = self.position.checked_add(step).ok_or(OutOfBounds)?;
        self.seek(target)
    }

    /// Read a little-endian value and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if insufficient bytes remain.
    pub fn read_le<T: HeapIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Read a target pointer of `pointer_size` bytes and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if insufficient bytes remain.
    pub fn read_ptr(&mut self, pointer_size: usize) -> Result<u64> {
        read_ptr_at(self.data, &mut self.position, pointer_size)
    }

    /// Borrow the next `length` bytes and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if insufficient bytes remain.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self.position.checked_add(length).ok_or(OutOfBounds)?;
        if end > self.data.len() {
            return Err(OutOfBounds);
        }

        let slice = &self.data[self.position..end];
        self.position = end;
        Ok(slice)
    }

    /// Read `count` UTF-16 code units and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if insufficient bytes remain.
    pub fn read_utf16_units(&mut self, count: usize) -> Result<Vec<u16>> {
        let bytes = self.read_bytes(count.checked_mul(2).ok_or(OutOfBounds)?)?;
        Ok(bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }
}
