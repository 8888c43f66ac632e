//! Runtime type model.
//!
//! Every object on the heap starts with a pointer to its type descriptor. This module turns
//! descriptors into [`ClrType`] values: the name, element kind, sizes and the instance field
//! layout the object accessor needs to decode fields by name.
//!
//! # Key Components
//!
//! - [`ElementKind`] - Element-type classification that drives every decode
//! - [`ClrType`] - A resolved, immutable type with its merged field map
//! - [`TypeCatalog`] - Per-session cache from descriptor address to [`ClrTypeRc`]
//! - [`TypeDescriptorReader`] - The seam for runtime-version specific descriptor layouts
//!
//! # Field Resolution
//!
//! A type's instance fields are its own field-table entries plus every instance field of its
//! parent chain. Fields are kept in layout order with inherited fields first. When a derived
//! type declares a field with the same name as one of its ancestors, lookups by name return the
//! derived field; the ancestor's storage is still part of the layout and is still visited when
//! references are enumerated.

mod catalog;
mod descriptor;
mod kind;

use std::{collections::HashMap, sync::Arc};

pub use catalog::TypeCatalog;
pub use descriptor::{
    DescriptorGeometry, FieldFlags, MethodTableReader, RawField, RawTypeDescriptor,
    TypeDescriptorReader, TypeFlags,
};
pub use kind::ElementKind;

use crate::{address::align_up, address::Address, session::RuntimeLayout, Result};

/// A reference to a resolved [`ClrType`].
pub type ClrTypeRc = Arc<ClrType>;

/// An instance field of a type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name
    pub name: String,
    /// Offset from the start of the instance's field data
    pub offset: u32,
    /// Declared element kind
    pub kind: ElementKind,
    /// Declared type descriptor; null for primitives
    pub declared_type: Address,
}

impl FieldDescriptor {
    /// Returns `true` if the field stores an object reference.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.kind.is_object_reference()
    }
}

/// A static field. Statics have no per-instance storage, only their declaration is kept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticField {
    /// Field name
    pub name: String,
    /// Declared element kind
    pub kind: ElementKind,
}

/// A resolved runtime type.
///
/// Instances are created by the [`TypeCatalog`] and shared as [`ClrTypeRc`]. They never change
/// after construction.
#[derive(Debug)]
pub struct ClrType {
    /// Address of the type descriptor, the identity of the type
    pub descriptor: Address,
    /// Fully qualified name
    pub name: String,
    /// Element kind of the type itself
    pub kind: ElementKind,
    /// Descriptor flags
    pub flags: TypeFlags,
    /// Boxed instance size, header included
    pub base_size: u32,
    /// Per-element size of arrays and strings
    pub component_size: u16,
    /// Bytes of instance field data
    pub field_data_size: u32,
    /// Element kind of array elements
    pub component_kind: ElementKind,
    /// Element type descriptor of arrays
    pub component_type: Address,
    /// Parent descriptor, null for roots
    pub parent: Address,
    fields: Vec<FieldDescriptor>,
    field_index: HashMap<String, usize>,
    statics: Vec<StaticField>,
}

impl ClrType {
    /// Build a type from its raw descriptor and the instance fields of its parent.
    ///
    /// ## Arguments
    /// * 'raw'       - The decoded descriptor
    /// * 'inherited' - Every instance field of the parent type, in layout order
    ///
    /// # Errors
    /// Returns [`crate::Error::CorruptMetadata`] if the descriptor declares the same instance
    /// field name twice.
    pub fn from_raw(raw: RawTypeDescriptor, inherited: &[FieldDescriptor]) -> Result<ClrType> {
        let mut fields = inherited.to_vec();
        let mut field_index: HashMap<String, usize> = fields
            .iter()
            .enumerate()
            .map(|(index, field)| (field.name.clone(), index))
            .collect();
        let inherited_count = fields.len();
        let mut statics = Vec::new();

        for field in raw.fields {
            if field.flags.contains(FieldFlags::STATIC) {
                statics.push(StaticField {
                    name: field.name,
                    kind: field.kind,
                });
                continue;
            }

            if let Some(&existing) = field_index.get(&field.name) {
                if existing >= inherited_count {
                    return Err(corrupt_metadata!(
                        "Type '{}' declares field '{}' twice",
                        raw.name,
                        field.name
                    ));
                }
            }

            field_index.insert(field.name.clone(), fields.len());
            fields.push(FieldDescriptor {
                name: field.name,
                offset: field.offset,
                kind: field.kind,
                declared_type: field.declared_type,
            });
        }

        Ok(ClrType {
            descriptor: raw.address,
            name: raw.name,
            kind: raw.kind,
            flags: raw.flags,
            base_size: raw.base_size,
            component_size: raw.component_size,
            field_data_size: raw.field_data_size,
            component_kind: raw.component_kind,
            component_type: raw.component_type,
            parent: raw.parent,
            fields,
            field_index,
            statics,
        })
    }

    /// Every instance field, inherited ones first.
    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Look up an instance field by exact name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.field_index.get(name).map(|&index| &self.fields[index])
    }

    /// Static fields declared by this type.
    #[must_use]
    pub fn statics(&self) -> &[StaticField] {
        &self.statics
    }

    /// Returns `true` for strings.
    #[must_use]
    pub fn is_string(&self) -> bool {
        self.kind == ElementKind::String
    }

    /// Returns `true` for array types.
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.kind.is_array() && self.flags.contains(TypeFlags::HAS_COMPONENT_SIZE)
    }

    /// Returns `true` if instances carry an element count.
    #[must_use]
    pub fn has_components(&self) -> bool {
        self.flags.contains(TypeFlags::HAS_COMPONENT_SIZE)
    }

    /// Returns `true` for value types.
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        self.flags.contains(TypeFlags::IS_VALUE_TYPE)
    }

    /// Returns `true` for enumerations.
    #[must_use]
    pub fn is_enum(&self) -> bool {
        self.flags.contains(TypeFlags::IS_ENUM)
    }

    /// Returns `true` for the free-space filler type.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.flags.contains(TypeFlags::IS_FREE)
    }

    /// Returns `true` if instances may hold object references.
    #[must_use]
    pub fn contains_pointers(&self) -> bool {
        self.flags.contains(TypeFlags::CONTAINS_POINTERS)
    }

    /// Unaligned size of an instance with `components` elements.
    #[must_use]
    pub fn raw_instance_size(&self, components: u64) -> u64 {
        if self.has_components() {
            u64::from(self.base_size)
                .saturating_add(components.saturating_mul(u64::from(self.component_size)))
        } else {
            u64::from(self.base_size)
        }
    }

    /// Heap footprint of an instance with `components` elements, aligned to `alignment`.
    ///
    /// Returns `None` if the size overflows the address space.
    #[must_use]
    pub fn instance_size(&self, components: u64, alignment: u64) -> Option<u64> {
        align_up(self.raw_instance_size(components), alignment)
    }

    /// Size of the inline storage of one value of this type when embedded in another instance
    /// or an array.
    #[must_use]
    pub fn inline_size(&self, layout: &RuntimeLayout) -> u64 {
        if self.is_value_type() {
            u64::from(self.field_data_size)
        } else {
            layout.pointer_bytes()
        }
    }
}

impl PartialEq for ClrType {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor == other.descriptor
    }
}

impl Eq for ClrType {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn raw(name: &str, fields: Vec<RawField>) -> RawTypeDescriptor {
        RawTypeDescriptor {
            address: Address::new(0x1000),
            flags: TypeFlags::empty(),
            component_size: 0,
            base_size: 32,
            kind: ElementKind::Class,
            component_kind: ElementKind::Unknown,
            field_data_size: 16,
            parent: Address::NULL,
            name: name.to_string(),
            component_type: Address::NULL,
            fields,
        }
    }

    fn raw_field(name: &str, offset: u32, kind: ElementKind, flags: FieldFlags) -> RawField {
        RawField {
            name: name.to_string(),
            offset,
            kind,
            flags,
            declared_type: Address::NULL,
        }
    }

    #[test]
    fn test_from_raw_splits_statics() {
        let ty = ClrType::from_raw(
            raw(
                "Sample.Counter",
                vec![
                    raw_field("_count", 0, ElementKind::I4, FieldFlags::empty()),
                    raw_field("s_instances", 0, ElementKind::I4, FieldFlags::STATIC),
                    raw_field("_name", 8, ElementKind::String, FieldFlags::empty()),
                ],
            ),
            &[],
        )
        .unwrap();

        assert_eq!(ty.fields().len(), 2);
        assert_eq!(ty.statics().len(), 1);
        assert_eq!(ty.field("_name").unwrap().offset, 8);
        assert!(ty.field("_name").unwrap().is_reference());
        assert!(ty.field("s_instances").is_none());
    }

    #[test]
    fn test_shadowing() {
        let inherited = vec![FieldDescriptor {
            name: "_value".to_string(),
            offset: 0,
            kind: ElementKind::I4,
            declared_type: Address::NULL,
        }];
        let ty = ClrType::from_raw(
            raw(
                "Sample.Derived",
                vec![raw_field("_value", 8, ElementKind::I8, FieldFlags::empty())],
            ),
            &inherited,
        )
        .unwrap();

        assert_eq!(ty.fields().len(), 2);
        let field = ty.field("_value").unwrap();
        assert_eq!(field.offset, 8);
        assert_eq!(field.kind, ElementKind::I8);
    }

    #[test]
    fn test_duplicate_field() {
        let result = ClrType::from_raw(
            raw(
                "Sample.Broken",
                vec![
                    raw_field("_a", 0, ElementKind::I4, FieldFlags::empty()),
                    raw_field("_a", 4, ElementKind::I4, FieldFlags::empty()),
                ],
            ),
            &[],
        );
        assert!(matches!(result, Err(Error::CorruptMetadata { .. })));
    }

    #[test]
    fn test_instance_size() {
        let mut descriptor = raw("System.Int32[]", vec![]);
        descriptor.flags = TypeFlags::HAS_COMPONENT_SIZE;
        descriptor.kind = ElementKind::SzArray;
        descriptor.component_size = 4;
        descriptor.base_size = 24;
        descriptor.field_data_size = 0;
        let ty = ClrType::from_raw(descriptor, &[]).unwrap();

        assert!(ty.is_array());
        assert_eq!(ty.instance_size(72, 8), Some(312));
        assert_eq!(ty.instance_size(1, 8), Some(32));
        assert_eq!(ty.raw_instance_size(1), 28);
    }

    #[test]
    fn test_inline_size() {
        let mut descriptor = raw("System.DateTime", vec![]);
        descriptor.flags = TypeFlags::IS_VALUE_TYPE;
        descriptor.kind = ElementKind::ValueType;
        descriptor.field_data_size = 8;
        let ty = ClrType::from_raw(descriptor, &[]).unwrap();
        assert_eq!(ty.inline_size(&RuntimeLayout::x64()), 8);

        let ty = ClrType::from_raw(raw("System.Object", vec![]), &[]).unwrap();
        assert_eq!(ty.inline_size(&RuntimeLayout::x86()), 4);
    }
}
