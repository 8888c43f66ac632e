use crate::{source::io::read_le, typesystem::ElementKind, Error, Result};

/// A host type a primitive field or array element can be decoded into.
///
/// Every implementation is bound to exactly one [`ElementKind`]; reads check the declared kind
/// against [`Primitive::KIND`] and never widen or narrow.
pub trait Primitive: Sized + Copy {
    /// The element kind this type decodes
    const KIND: ElementKind;
    /// Number of bytes consumed
    const SIZE: usize;

    /// Decode a value from exactly [`Primitive::SIZE`] little-endian bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `bytes` is too short.
    fn decode(bytes: &[u8]) -> Result<Self>;
}

// Implement Primitive for the numeric types that map one-to-one onto an element kind
macro_rules! impl_primitive {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl Primitive for $ty {
                const KIND: ElementKind = ElementKind::$kind;
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn decode(bytes: &[u8]) -> Result<Self> {
                    read_le::<$ty>(bytes)
                }
            }
        )*
    };
}

impl_primitive!(
    i8 => I1,
    u8 => U1,
    i16 => I2,
    u16 => U2,
    i32 => I4,
    u32 => U4,
    i64 => I8,
    u64 => U8,
    f32 => R4,
    f64 => R8,
);

impl Primitive for bool {
    const KIND: ElementKind = ElementKind::Boolean;
    const SIZE: usize = 1;

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(read_le::<u8>(bytes)? != 0)
    }
}

impl Primitive for char {
    const KIND: ElementKind = ElementKind::Char;
    const SIZE: usize = 2;

    /// Lone surrogates decode to `U+FFFD`.
    fn decode(bytes: &[u8]) -> Result<Self> {
        let unit = read_le::<u16>(bytes)?;
        Ok(char::from_u32(u32::from(unit)).unwrap_or(char::REPLACEMENT_CHARACTER))
    }
}

/// Decode an integral value of any width into an `i64`.
///
/// Signed kinds are sign-extended, unsigned kinds and `Char`/`Boolean` are zero-extended;
/// `U8` values above `i64::MAX` wrap. Pointer-sized kinds use `pointer_size` bytes.
pub(crate) fn widen_integral(kind: ElementKind, bytes: &[u8], pointer_size: usize) -> Result<i64> {
    Ok(match kind {
        ElementKind::Boolean | ElementKind::U1 => i64::from(read_le::<u8>(bytes)?),
        ElementKind::I1 => i64::from(read_le::<i8>(bytes)?),
        ElementKind::Char | ElementKind::U2 => i64::from(read_le::<u16>(bytes)?),
        ElementKind::I2 => i64::from(read_le::<i16>(bytes)?),
        ElementKind::U4 => i64::from(read_le::<u32>(bytes)?),
        ElementKind::I4 => i64::from(read_le::<i32>(bytes)?),
        ElementKind::I8 | ElementKind::U8 => read_le::<i64>(bytes)?,
        ElementKind::I if pointer_size == 4 => i64::from(read_le::<i32>(bytes)?),
        ElementKind::U if pointer_size == 4 => i64::from(read_le::<u32>(bytes)?),
        ElementKind::I | ElementKind::U => read_le::<i64>(bytes)?,
        _ => return Err(Error::OutOfBounds),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        assert_eq!(i32::decode(&[0xFF, 0xFF, 0xFF, 0x7F]).unwrap(), i32::MAX);
        assert_eq!(u16::decode(&[0x34, 0x12]).unwrap(), 0x1234);
        assert_eq!(f64::decode(&1.5f64.to_le_bytes()).unwrap(), 1.5);
        assert!(bool::decode(&[1]).unwrap());
        assert!(bool::decode(&[0x80]).unwrap());
        assert!(!bool::decode(&[0]).unwrap());
        assert_eq!(char::decode(&[0x41, 0x00]).unwrap(), 'A');
        assert_eq!(char::decode(&[0x00, 0xD8]).unwrap(), char::REPLACEMENT_CHARACTER);
        assert!(i64::decode(&[0; 4]).is_err());
    }

    #[test]
    fn test_kinds() {
        assert_eq!(<i64 as Primitive>::KIND, ElementKind::I8);
        assert_eq!(<bool as Primitive>::KIND, ElementKind::Boolean);
        assert_eq!(<char as Primitive>::SIZE, 2);
        assert_eq!(<u8 as Primitive>::SIZE, 1);
    }

    #[test]
    fn test_widen_integral() {
        assert_eq!(widen_integral(ElementKind::I1, &[0xFF], 8).unwrap(), -1);
        assert_eq!(widen_integral(ElementKind::U1, &[0xFF], 8).unwrap(), 255);
        assert_eq!(
            widen_integral(ElementKind::I4, &(-7i32).to_le_bytes(), 8).unwrap(),
            -7
        );
        assert_eq!(
            widen_integral(ElementKind::U4, &u32::MAX.to_le_bytes(), 8).unwrap(),
            i64::from(u32::MAX)
        );
        assert_eq!(
            widen_integral(ElementKind::I, &(-2i32).to_le_bytes(), 4).unwrap(),
            -2
        );
        assert!(widen_integral(ElementKind::R4, &[0; 4], 8).is_err());
    }
}
