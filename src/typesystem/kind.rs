use strum::{Display, EnumIter, FromRepr};

/// Coarse classification of a value's decode strategy.
///
/// The discriminants are the runtime's own element-type tags (`CorElementType`), which is how
/// they appear in type descriptors and field tables. Tags this crate does not know map to
/// [`ElementKind::Unknown`] through [`ElementKind::from_tag`].
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter, FromRepr)]
#[repr(u8)]
pub enum ElementKind {
    Unknown = 0x00,
    Void = 0x01,
    Boolean = 0x02,
    Char = 0x03,
    I1 = 0x04,
    U1 = 0x05,
    I2 = 0x06,
    U2 = 0x07,
    I4 = 0x08,
    U4 = 0x09,
    I8 = 0x0a,
    U8 = 0x0b,
    R4 = 0x0c,
    R8 = 0x0d,
    String = 0x0e,
    Pointer = 0x0f,
    ValueType = 0x11,
    Class = 0x12,
    Array = 0x14,
    I = 0x18,
    U = 0x19,
    FunctionPointer = 0x1b,
    Object = 0x1c,
    SzArray = 0x1d,
}

impl ElementKind {
    /// Decode a raw element-type tag, mapping unrecognised tags to [`ElementKind::Unknown`].
    #[must_use]
    pub fn from_tag(tag: u8) -> ElementKind {
        ElementKind::from_repr(tag).unwrap_or(ElementKind::Unknown)
    }

    /// The raw element-type tag.
    #[must_use]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Returns `true` for kinds whose storage is a pointer to a heap object.
    #[must_use]
    pub fn is_object_reference(self) -> bool {
        matches!(
            self,
            ElementKind::String
                | ElementKind::Class
                | ElementKind::Array
                | ElementKind::SzArray
                | ElementKind::Object
        )
    }

    /// Returns `true` for array kinds.
    #[must_use]
    pub fn is_array(self) -> bool {
        matches!(self, ElementKind::Array | ElementKind::SzArray)
    }

    /// Returns `true` for the fixed-width integral kinds, including `Char` and `Boolean`.
    #[must_use]
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            ElementKind::Boolean
                | ElementKind::Char
                | ElementKind::I1
                | ElementKind::U1
                | ElementKind::I2
                | ElementKind::U2
                | ElementKind::I4
                | ElementKind::U4
                | ElementKind::I8
                | ElementKind::U8
        )
    }

    /// Returns `true` for kinds stored as a raw target pointer that is not an object reference.
    #[must_use]
    pub fn is_pointer_sized(self) -> bool {
        matches!(
            self,
            ElementKind::I | ElementKind::U | ElementKind::Pointer | ElementKind::FunctionPointer
        )
    }

    /// Size in bytes of a value of this kind when stored inline.
    ///
    /// Returns `None` for [`ElementKind::ValueType`] (size depends on the type),
    /// [`ElementKind::Void`] and [`ElementKind::Unknown`].
    #[must_use]
    pub fn inline_size(self, pointer_size: usize) -> Option<usize> {
        match self {
            ElementKind::Boolean | ElementKind::I1 | ElementKind::U1 => Some(1),
            ElementKind::Char | ElementKind::I2 | ElementKind::U2 => Some(2),
            ElementKind::I4 | ElementKind::U4 | ElementKind::R4 => Some(4),
            ElementKind::I8 | ElementKind::U8 | ElementKind::R8 => Some(8),
            kind if kind.is_object_reference() || kind.is_pointer_sized() => Some(pointer_size),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_tags_round_trip() {
        for kind in ElementKind::iter() {
            assert_eq!(ElementKind::from_tag(kind.tag()), kind);
        }
        assert_eq!(ElementKind::from_tag(0x08), ElementKind::I4);
        assert_eq!(ElementKind::from_tag(0x10), ElementKind::Unknown);
        assert_eq!(ElementKind::from_tag(0xFF), ElementKind::Unknown);
    }

    #[test]
    fn test_classification() {
        assert!(ElementKind::String.is_object_reference());
        assert!(ElementKind::SzArray.is_object_reference());
        assert!(!ElementKind::ValueType.is_object_reference());
        assert!(ElementKind::Boolean.is_integral());
        assert!(!ElementKind::R8.is_integral());
        assert!(ElementKind::I.is_pointer_sized());
    }

    #[test]
    fn test_inline_size() {
        assert_eq!(ElementKind::Boolean.inline_size(8), Some(1));
        assert_eq!(ElementKind::Char.inline_size(8), Some(2));
        assert_eq!(ElementKind::I8.inline_size(4), Some(8));
        assert_eq!(ElementKind::Class.inline_size(4), Some(4));
        assert_eq!(ElementKind::U.inline_size(8), Some(8));
        assert_eq!(ElementKind::ValueType.inline_size(8), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(ElementKind::I4.to_string(), "I4");
        assert_eq!(ElementKind::ValueType.to_string(), "ValueType");
    }
}
