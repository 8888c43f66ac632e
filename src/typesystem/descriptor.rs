//! Raw decode of type descriptors.
//!
//! A type descriptor is the runtime's in-memory record of a type's layout (the method table in
//! CLR terms). Everything version-specific about its binary shape is isolated behind the
//! [`TypeDescriptorReader`] trait, so a different runtime build only needs a different reader;
//! the catalog, object accessor, enumerator and walker are untouched.
//!
//! # Descriptor Layout
//!
//! [`MethodTableReader`] decodes the following little-endian layout, where `P` is the target
//! pointer size:
//!
//! | offset     | size | field                                                     |
//! |------------|------|-----------------------------------------------------------|
//! | `0x00`     | u32  | low 16 bits: component size, high bits: [`TypeFlags`]      |
//! | `0x04`     | u32  | base size (boxed size incl. header and descriptor pointer) |
//! | `0x08`     | u8   | element kind                                              |
//! | `0x09`     | u8   | component element kind (arrays only)                      |
//! | `0x0A`     | u16  | field-table entry count                                   |
//! | `0x0C`     | u32  | instance field data size                                  |
//! | `0x10`     | P    | parent descriptor                                         |
//! | `0x10+P`   | P    | name                                                      |
//! | `0x10+2P`  | P    | field table                                               |
//! | `0x10+3P`  | P    | component type descriptor (arrays only)                   |
//!
//! Each field-table entry is `8 + 2P` bytes: `u32` offset, `u8` element kind, `u8`
//! [`FieldFlags`], two reserved bytes, then the name pointer and the declared type
//! descriptor pointer. Names are stored as a `u32` count of UTF-16 code units followed by the
//! units themselves.

use bitflags::bitflags;
use widestring::U16String;

use crate::{
    address::Address,
    session::HeapConfig,
    source::{parser::Parser, MemorySource, MemorySourceExt},
    typesystem::ElementKind,
    Result,
};

bitflags! {
    /// Type-level flags stored in the high half of a descriptor's first word.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TypeFlags: u32 {
        /// Instances carry a `u32` element count and a per-element component size
        const HAS_COMPONENT_SIZE = 0x8000_0000;
        /// Instances hold at least one object reference
        const CONTAINS_POINTERS = 0x0100_0000;
        /// The type is a value type
        const IS_VALUE_TYPE = 0x0004_0000;
        /// The type is an enumeration
        const IS_ENUM = 0x0008_0000;
        /// The type describes free space between live objects
        const IS_FREE = 0x0010_0000;
    }
}

bitflags! {
    /// Field-table entry flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct FieldFlags: u8 {
        /// The field is static and has no per-instance storage
        const STATIC = 0x01;
    }
}

/// Byte geometry of the descriptor layout for a given pointer size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorGeometry {
    /// Target pointer size
    pub pointer_size: usize,
}

impl DescriptorGeometry {
    /// Size of the fixed part of a descriptor.
    #[must_use]
    pub fn header_size(self) -> usize {
        0x10 + 4 * self.pointer_size
    }

    /// Size of one field-table entry.
    #[must_use]
    pub fn field_entry_size(self) -> usize {
        8 + 2 * self.pointer_size
    }
}

/// A single field-table entry as stored in the target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawField {
    /// Field name
    pub name: String,
    /// Offset from the start of the owning instance's field data
    pub offset: u32,
    /// Declared element kind
    pub kind: ElementKind,
    /// Entry flags
    pub flags: FieldFlags,
    /// Declared type descriptor, null for primitives
    pub declared_type: Address,
}

/// A decoded type descriptor, before inherited fields are merged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawTypeDescriptor {
    /// Address the descriptor was read from
    pub address: Address,
    /// Type-level flags
    pub flags: TypeFlags,
    /// Per-element size for types with [`TypeFlags::HAS_COMPONENT_SIZE`]
    pub component_size: u16,
    /// Boxed instance size including header and descriptor pointer
    pub base_size: u32,
    /// Element kind of the type itself
    pub kind: ElementKind,
    /// Element kind of array elements
    pub component_kind: ElementKind,
    /// Bytes of instance field data
    pub field_data_size: u32,
    /// Parent descriptor, null for roots
    pub parent: Address,
    /// Fully qualified type name
    pub name: String,
    /// Element type descriptor of arrays, null otherwise
    pub component_type: Address,
    /// The type's own field-table entries, in table order
    pub fields: Vec<RawField>,
}

/// Decodes type descriptors from target memory.
///
/// Implementations must be pure functions of the bytes they read; the
/// [`crate::typesystem::TypeCatalog`] caches their output per descriptor address.
pub trait TypeDescriptorReader: Send + Sync {
    /// Decode the descriptor at `address`.
    ///
    /// # Errors
    /// Returns [`crate::Error::CorruptMetadata`] if the descriptor is unreadable or
    /// implausible.
    fn read_descriptor(
        &self,
        source: &dyn MemorySource,
        config: &HeapConfig,
        address: Address,
    ) -> Result<RawTypeDescriptor>;
}

/// The default [`TypeDescriptorReader`], implementing the layout documented on this module.
#[derive(Clone, Copy, Debug, Default)]
pub struct MethodTableReader;

impl MethodTableReader {
    fn read_name(
        source: &dyn MemorySource,
        config: &HeapConfig,
        address: Address,
        what: &str,
    ) -> Result<String> {
        if address.is_null() {
            return Err(corrupt_metadata!("Null {} name pointer", what));
        }

        let length = source
            .read_value::<u32>(address)
            .map_err(|_| corrupt_metadata!("Unreadable {} name at {}", what, address))?
            as usize;
        if length == 0 || length > config.max_name_length {
            return Err(corrupt_metadata!(
                "Implausible {} name length {} at {}",
                what,
                length,
                address
            ));
        }

        let bytes = source
            .read_bytes(address.offset(4)?, length * 2)
            .map_err(|_| corrupt_metadata!("Truncated {} name at {}", what, address))?;
        let units = Parser::new(&bytes).read_utf16_units(length)?;

        U16String::from_vec(units)
            .to_string()
            .map_err(|_| corrupt_metadata!("Invalid UTF-16 {} name at {}", what, address))
    }

    fn read_fields(
        source: &dyn MemorySource,
        config: &HeapConfig,
        table: Address,
        count: usize,
    ) -> Result<Vec<RawField>> {
        let pointer_size = config.layout.pointer_size;
        let geometry = DescriptorGeometry { pointer_size };
        if count == 0 {
            return Ok(Vec::new());
        }
        if table.is_null() {
            return Err(corrupt_metadata!("{} fields declared but no field table", count));
        }

        let bytes = source
            .read_bytes(table, count * geometry.field_entry_size())
            .map_err(|_| corrupt_metadata!("Truncated field table at {}", table))?;
        let mut parser = Parser::new(&bytes);
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let offset = parser.read_le::<u32>()?;
            let tag = parser.read_le::<u8>()?;
            let flags = FieldFlags::from_bits_truncate(parser.read_le::<u8>()?);
            parser.advance_by(2)?;
            let name_ptr = Address::new(parser.read_ptr(pointer_size)?);
            let declared_type = Address::new(parser.read_ptr(pointer_size)?);

            let kind = ElementKind::from_tag(tag);
            if kind == ElementKind::Unknown || kind == ElementKind::Void {
                return Err(corrupt_metadata!(
                    "Field at offset {} has invalid element type {:#x}",
                    offset,
                    tag
                ));
            }

            fields.push(RawField {
                name: Self::read_name(source, config, name_ptr, "field")?,
                offset,
                kind,
                flags,
                declared_type,
            });
        }

        Ok(fields)
    }
}

impl TypeDescriptorReader for MethodTableReader {
    fn read_descriptor(
        &self,
        source: &dyn MemorySource,
        config: &HeapConfig,
        address: Address,
    ) -> Result<RawTypeDescriptor> {
        let layout = &config.layout;
        let geometry = DescriptorGeometry {
            pointer_size: layout.pointer_size,
        };
        if address.is_null() {
            return Err(corrupt_metadata!("Null type descriptor"));
        }

        let bytes = source
            .read_bytes(address, geometry.header_size())
            .map_err(|_| corrupt_metadata!("Unreadable type descriptor at {}", address))?;
        let mut parser = Parser::new(&bytes);

        let word = parser.read_le::<u32>()?;
        let base_size = parser.read_le::<u32>()?;
        let kind_tag = parser.read_le::<u8>()?;
        let component_tag = parser.read_le::<u8>()?;
        let field_count = parser.read_le::<u16>()? as usize;
        let field_data_size = parser.read_le::<u32>()?;
        let parent = Address::new(parser.read_ptr(layout.pointer_size)?);
        let name_ptr = Address::new(parser.read_ptr(layout.pointer_size)?);
        let field_table = Address::new(parser.read_ptr(layout.pointer_size)?);
        let component_type = Address::new(parser.read_ptr(layout.pointer_size)?);

        let flags = TypeFlags::from_bits_truncate(word & 0xFFFF_0000);
        let component_size = (word & 0xFFFF) as u16;

        let kind = ElementKind::from_tag(kind_tag);
        if kind == ElementKind::Unknown || kind == ElementKind::Void {
            return Err(corrupt_metadata!(
                "Type descriptor at {} has invalid element type {:#x}",
                address,
                kind_tag
            ));
        }
        if u64::from(base_size) < 2 * layout.pointer_bytes() {
            return Err(corrupt_metadata!(
                "Type descriptor at {} has base size {} smaller than an object header",
                address,
                base_size
            ));
        }
        if u64::from(field_data_size) > u64::from(base_size) {
            return Err(corrupt_metadata!(
                "Type descriptor at {} has field data ({}) larger than its base size ({})",
                address,
                field_data_size,
                base_size
            ));
        }
        if field_count > config.max_field_count {
            return Err(corrupt_metadata!(
                "Type descriptor at {} declares {} fields",
                address,
                field_count
            ));
        }
        if parent == address {
            return Err(corrupt_metadata!(
                "Type descriptor at {} is its own parent",
                address
            ));
        }

        let component_kind = if flags.contains(TypeFlags::HAS_COMPONENT_SIZE) {
            ElementKind::from_tag(component_tag)
        } else {
            ElementKind::Unknown
        };

        let name = Self::read_name(source, config, name_ptr, "type")?;
        let fields = Self::read_fields(source, config, field_table, field_count)?;

        for field in fields.iter().filter(|f| !f.flags.contains(FieldFlags::STATIC)) {
            let width = field
                .kind
                .inline_size(layout.pointer_size)
                .unwrap_or(0) as u64;
            if u64::from(field.offset) + width > u64::from(field_data_size) {
                return Err(corrupt_metadata!(
                    "Field '{}' of '{}' at offset {} lies outside the field data ({} bytes)",
                    field.name,
                    name,
                    field.offset,
                    field_data_size
                ));
            }
        }

        Ok(RawTypeDescriptor {
            address,
            flags,
            component_size,
            base_size,
            kind,
            component_kind,
            field_data_size,
            parent,
            name,
            component_type,
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        source::MemoryBuffer,
        test::{descriptor_bytes, name_blob},
        Error,
    };

    const DESCRIPTOR: u64 = 0x7ff9_fd29_0000;
    const NAME: u64 = 0x7ff9_fd29_1000;
    const FIELDS: u64 = 0x7ff9_fd29_2000;
    const FIELD_NAME: u64 = 0x7ff9_fd29_3000;

    fn memory_with(descriptor: Vec<u8>) -> MemoryBuffer {
        let mut memory = MemoryBuffer::new();
        memory.insert_region(Address::new(DESCRIPTOR), descriptor);
        memory.insert_region(Address::new(NAME), name_blob("Sample.Point"));
        memory.insert_region(Address::new(FIELD_NAME), name_blob("_x"));
        let mut entry = Vec::new();
        entry.extend_from_slice(&0u32.to_le_bytes());
        entry.push(ElementKind::I4.tag());
        entry.push(0);
        entry.extend_from_slice(&[0, 0]);
        entry.extend_from_slice(&FIELD_NAME.to_le_bytes());
        entry.extend_from_slice(&0u64.to_le_bytes());
        memory.insert_region(Address::new(FIELDS), entry);
        memory
    }

    #[test]
    fn test_geometry() {
        assert_eq!(DescriptorGeometry { pointer_size: 8 }.header_size(), 0x30);
        assert_eq!(DescriptorGeometry { pointer_size: 4 }.header_size(), 0x20);
        assert_eq!(DescriptorGeometry { pointer_size: 8 }.field_entry_size(), 24);
    }

    #[test]
    fn test_read_descriptor() {
        let bytes = descriptor_bytes(
            TypeFlags::IS_VALUE_TYPE.bits(),
            24,
            ElementKind::ValueType,
            ElementKind::Unknown,
            1,
            4,
            [0, NAME, FIELDS, 0],
        );
        let memory = memory_with(bytes);
        let raw = MethodTableReader
            .read_descriptor(&memory, &HeapConfig::x64(), Address::new(DESCRIPTOR))
            .unwrap();

        assert_eq!(raw.name, "Sample.Point");
        assert_eq!(raw.kind, ElementKind::ValueType);
        assert!(raw.flags.contains(TypeFlags::IS_VALUE_TYPE));
        assert_eq!(raw.base_size, 24);
        assert_eq!(raw.field_data_size, 4);
        assert_eq!(raw.fields.len(), 1);
        assert_eq!(raw.fields[0].name, "_x");
        assert_eq!(raw.fields[0].kind, ElementKind::I4);
        assert!(raw.parent.is_null());
    }

    #[test]
    fn test_component_size_split() {
        let word = TypeFlags::HAS_COMPONENT_SIZE.bits() | 4;
        let bytes = descriptor_bytes(
            word,
            24,
            ElementKind::SzArray,
            ElementKind::I4,
            0,
            0,
            [0, NAME, 0, 0],
        );
        let memory = memory_with(bytes);
        let raw = MethodTableReader
            .read_descriptor(&memory, &HeapConfig::x64(), Address::new(DESCRIPTOR))
            .unwrap();
        assert_eq!(raw.component_size, 4);
        assert_eq!(raw.component_kind, ElementKind::I4);
        assert!(raw.fields.is_empty());
    }

    #[test]
    fn test_corrupt_descriptors() {
        let config = HeapConfig::x64();

        // Unmapped
        let memory = MemoryBuffer::new();
        assert!(matches!(
            MethodTableReader.read_descriptor(&memory, &config, Address::new(DESCRIPTOR)),
            Err(Error::CorruptMetadata { .. })
        ));

        // Invalid element kind
        let bytes = descriptor_bytes(
            0,
            24,
            ElementKind::Unknown,
            ElementKind::Unknown,
            0,
            0,
            [0, NAME, 0, 0],
        );
        let memory = memory_with(bytes);
        assert!(MethodTableReader
            .read_descriptor(&memory, &config, Address::new(DESCRIPTOR))
            .is_err());

        // Base size smaller than a header
        let bytes = descriptor_bytes(
            0,
            8,
            ElementKind::Class,
            ElementKind::Unknown,
            0,
            0,
            [0, NAME, 0, 0],
        );
        let memory = memory_with(bytes);
        assert!(MethodTableReader
            .read_descriptor(&memory, &config, Address::new(DESCRIPTOR))
            .is_err());

        // Field outside of the field data
        let bytes = descriptor_bytes(
            0,
            24,
            ElementKind::Class,
            ElementKind::Unknown,
            1,
            2,
            [0, NAME, FIELDS, 0],
        );
        let memory = memory_with(bytes);
        assert!(MethodTableReader
            .read_descriptor(&memory, &config, Address::new(DESCRIPTOR))
            .is_err());

        // Fields declared without a table
        let bytes = descriptor_bytes(
            0,
            24,
            ElementKind::Class,
            ElementKind::Unknown,
            1,
            8,
            [0, NAME, 0, 0],
        );
        let memory = memory_with(bytes);
        assert!(MethodTableReader
            .read_descriptor(&memory, &config, Address::new(DESCRIPTOR))
            .is_err());

        // Name pointer dangling
        let bytes = descriptor_bytes(
            0,
            24,
            ElementKind::Class,
            ElementKind::Unknown,
            0,
            0,
            [0, 0x10, 0, 0],
        );
        let memory = memory_with(bytes);
        assert!(MethodTableReader
            .read_descriptor(&memory, &config, Address::new(DESCRIPTOR))
            .is_err());

        // Self parent
        let bytes = descriptor_bytes(
            0,
            24,
            ElementKind::Class,
            ElementKind::Unknown,
            0,
            0,
            [DESCRIPTOR, NAME, 0, 0],
        );
        let memory = memory_with(bytes);
        assert!(matches!(
            MethodTableReader.read_descriptor(&memory, &config, Address::new(DESCRIPTOR)),
            Err(Error::CorruptMetadata { .. })
        ));
    }

    #[test]
    fn test_name_limits() {
        let bytes = descriptor_bytes(
            0,
            24,
            ElementKind::Class,
            ElementKind::Unknown,
            0,
            0,
            [0, NAME, 0, 0],
        );
        let memory = memory_with(bytes);
        let config = HeapConfig::x64().with_max_name_length(4);
        assert!(MethodTableReader
            .read_descriptor(&memory, &config, Address::new(DESCRIPTOR))
            .is_err());
    }
}
