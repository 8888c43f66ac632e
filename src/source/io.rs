//! Bounds-checked little-endian decoding of fixed-width values.
//!
//! Every runtime this crate targets stores its heap little-endian, so unlike a general binary
//! parser there is no big-endian path here. The functions below are the only place where raw
//! bytes turn into numbers; the [`crate::source::parser::Parser`] cursor, the type-descriptor
//! decoder and the object accessor all go through them.
//!
//! # Key Components
//!
//! - [`HeapIO`] - Trait implemented by all primitive numeric types
//! - [`read_le`] / [`read_le_at`] - Read from buffer start or from a tracked offset
//! - [`write_le`] / [`write_le_at`] - The inverse, used by [`crate::builder::HeapImageBuilder`]
//!
//! # Error Handling
//!
//! All functions return [`crate::Error::OutOfBounds`] if the buffer is too short.

use crate::{Error::OutOfBounds, Result};

/// Trait for fixed-width values that can be decoded from and encoded to little-endian bytes.
///
/// The `Bytes` associated type is the fixed-size array backing the value (e.g. `[u8; 4]` for
/// `u32`), which lets [`read_le_at`] convert a checked slice without copying twice.
pub trait HeapIO: Sized + Copy {
    /// Associated byte array type for this numeric type.
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]> + AsRef<[u8]>;

    /// Decode from little-endian bytes
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Encode to little-endian bytes
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_heap_io {
    ($($ty:ty),* $(,)?) => {
        $(
            impl HeapIO for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_heap_io!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Safely reads a value of type `T` in little-endian byte order from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le<T: HeapIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Safely reads a value of type `T` in little-endian byte order at `offset`, advancing it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
///
/// # Examples
///
/// ```rust
/// use heapscope::source::io::read_le_at;
///
/// let data = [0x48, 0x00, 0x00, 0x00, 0x01, 0x00];
/// let mut offset = 0;
/// let length: u32 = read_le_at(&data, &mut offset)?;
/// let unit: u16 = read_le_at(&data, &mut offset)?;
/// assert_eq!((length, unit, offset), (72, 1, 6));
/// # Ok::<(), heapscope::Error>(())
/// ```
pub fn read_le_at<T: HeapIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Reads a pointer-sized unsigned value (4 or 8 bytes) at `offset`, advancing it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes, or
/// [`crate::Error::CorruptMetadata`] if `pointer_size` is neither 4 nor 8.
pub fn read_ptr_at(data: &[u8], offset: &mut usize, pointer_size: usize) -> Result<u64> {
    match pointer_size {
        4 => Ok(u64::from(read_le_at::<u32>(data, offset)?)),
        8 => read_le_at::<u64>(data, offset),
        other => Err(corrupt_metadata!("Unsupported pointer size - {}", other)),
    }
}

/// Writes `value` in little-endian byte order to the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small.
pub fn write_le<T: HeapIO>(data: &mut [u8], value: T) -> Result<()> {
    let mut offset = 0_usize;
    write_le_at(data, &mut offset, value)
}

/// Writes `value` in little-endian byte order at `offset`, advancing it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small.
pub fn write_le_at<T: HeapIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let bytes = value.to_le_bytes();
    let bytes = bytes.as_ref();
    let Some(end) = offset.checked_add(bytes.len()) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(bytes);
    *offset = end;
    Ok(())
}

/// Writes a pointer-sized value (4 or 8 bytes) at `offset`, advancing it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small or the value does not fit
/// a 4-byte pointer.
pub fn write_ptr_at(
    data: &mut [u8],
    offset: &mut usize,
    pointer_size: usize,
    value: u64,
) -> Result<()> {
    match pointer_size {
        4 => {
            let narrow = u32::try_from(value).map_err(|_| OutOfBounds)?;
            write_le_at(data, offset, narrow)
        }
        _ => write_le_at(data, offset, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_read_le_primitives() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(read_le::<u8>(&data).unwrap(), 0x01);
        assert_eq!(read_le::<u16>(&data).unwrap(), 0x0201);
        assert_eq!(read_le::<u32>(&data).unwrap(), 0x0403_0201);
        assert_eq!(read_le::<u64>(&data).unwrap(), 0x0807_0605_0403_0201);
        assert_eq!(read_le::<i8>(&[0xFF]).unwrap(), -1);
        assert_eq!(read_le::<i32>(&[0xFE, 0xFF, 0xFF, 0xFF]).unwrap(), -2);
    }

    #[test]
    fn test_read_le_float() {
        let data = 1.5_f64.to_le_bytes();
        assert_eq!(read_le::<f64>(&data).unwrap(), 1.5);
        let data = (-0.25_f32).to_le_bytes();
        assert_eq!(read_le::<f32>(&data).unwrap(), -0.25);
    }

    #[test]
    fn test_read_le_at_sequential() {
        let data = [0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x00, 0x00];
        let mut offset = 0;
        assert_eq!(read_le_at::<u16>(&data, &mut offset).unwrap(), 1);
        assert_eq!(read_le_at::<u16>(&data, &mut offset).unwrap(), 2);
        assert_eq!(read_le_at::<u32>(&data, &mut offset).unwrap(), 3);
        assert_eq!(offset, 8);
        assert!(matches!(read_le_at::<u8>(&data, &mut offset), Err(Error::OutOfBounds)));
    }

    #[test]
    fn test_read_errors() {
        assert!(matches!(read_le::<u32>(&[0x00, 0x01]), Err(Error::OutOfBounds)));
        let mut offset = usize::MAX;
        assert!(matches!(read_le_at::<u16>(&[0; 4], &mut offset), Err(Error::OutOfBounds)));
    }

    #[test]
    fn test_read_ptr() {
        let data = [0x10, 0x20, 0x30, 0x40, 0x50, 0x60, 0x70, 0x00];
        let mut offset = 0;
        assert_eq!(read_ptr_at(&data, &mut offset, 4).unwrap(), 0x4030_2010);
        assert_eq!(offset, 4);
        offset = 0;
        assert_eq!(read_ptr_at(&data, &mut offset, 8).unwrap(), 0x0070_6050_4030_2010);
        offset = 0;
        assert!(read_ptr_at(&data, &mut offset, 2).is_err());
    }

    #[test]
    fn test_write_le_at() {
        let mut data = [0u8; 8];
        let mut offset = 0;
        write_le_at(&mut data, &mut offset, 1u16).unwrap();
        write_le_at(&mut data, &mut offset, 2u16).unwrap();
        write_le_at(&mut data, &mut offset, 3u32).unwrap();
        assert_eq!(data, [0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x00, 0x00]);
        assert!(write_le(&mut data[..2], 0u32).is_err());
    }

    #[test]
    fn test_write_ptr_narrow() {
        let mut data = [0u8; 4];
        let mut offset = 0;
        assert!(write_ptr_at(&mut data, &mut offset, 4, 0x1_0000_0000).is_err());
        write_ptr_at(&mut data, &mut offset, 4, 0xDEAD_BEEF).unwrap();
        assert_eq!(data, [0xEF, 0xBE, 0xAD, 0xDE]);
    }
}
