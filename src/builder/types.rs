use super::HeapImageBuilder;
use crate::{
    address::{align_up, Address},
    typesystem::{ElementKind, FieldFlags, TypeFlags},
};

/// Field layout recorded for every type the builder defines.
#[derive(Clone, Debug)]
pub(crate) struct FieldInfo {
    pub name: String,
    pub offset: u32,
    pub kind: ElementKind,
    pub declared_type: Address,
}

/// Everything the builder needs to know about a type it wrote.
#[derive(Clone, Debug)]
pub(crate) struct TypeInfo {
    pub flags: TypeFlags,
    pub base_size: u32,
    pub component_size: u16,
    pub field_data_size: u32,
    pub component_type: Address,
    /// Instance fields including inherited ones, later entries shadow earlier ones
    pub fields: Vec<FieldInfo>,
}

impl TypeInfo {
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().rev().find(|field| field.name == name)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct PendingField {
    pub name: String,
    pub kind: ElementKind,
    pub declared_type: Address,
    pub flags: FieldFlags,
    /// Explicit offset; computed from the running layout when `None`
    pub offset: Option<u32>,
}

/// Complete description of a descriptor to write.
#[derive(Clone, Debug)]
pub(crate) struct TypeSpec {
    pub name: String,
    pub kind: ElementKind,
    pub flags: TypeFlags,
    pub component_size: u16,
    pub component_kind: ElementKind,
    pub component_type: Address,
    pub parent: Address,
    pub at: Option<Address>,
    pub fields: Vec<PendingField>,
    pub base_size: Option<u32>,
}

impl TypeSpec {
    pub fn new(name: &str, kind: ElementKind, flags: TypeFlags) -> Self {
        TypeSpec {
            name: name.to_string(),
            kind,
            flags,
            component_size: 0,
            component_kind: ElementKind::Unknown,
            component_type: Address::NULL,
            parent: Address::NULL,
            at: None,
            fields: Vec::new(),
            base_size: None,
        }
    }
}

/// Fluent definition of a class or value type.
///
/// Created by [`HeapImageBuilder::define_class`] and [`HeapImageBuilder::define_value_type`].
/// Instance fields are laid out in declaration order, each aligned to its natural size capped
/// at the pointer size, after the fields of the parent type.
///
/// # Examples
///
/// ```rust
/// use heapscope::{builder::HeapImageBuilder, ElementKind};
///
/// let mut builder = HeapImageBuilder::x64();
/// let animal = builder
///     .define_class("Zoo.Animal")
///     .field("_name", ElementKind::String)
///     .build();
/// let dog = builder
///     .define_class("Zoo.Dog")
///     .parent(animal)
///     .field("_legs", ElementKind::I4)
///     .static_field("s_count", ElementKind::I4)
///     .build();
/// assert_ne!(animal, dog);
/// ```
#[must_use = "a type is only written by calling `build`"]
pub struct TypeBuilder<'b> {
    builder: &'b mut HeapImageBuilder,
    spec: TypeSpec,
}

impl<'b> TypeBuilder<'b> {
    pub(crate) fn new(builder: &'b mut HeapImageBuilder, spec: TypeSpec) -> Self {
        TypeBuilder { builder, spec }
    }

    /// Write the descriptor at `address` instead of allocating one.
    ///
    /// `address` is typically obtained from [`HeapImageBuilder::reserve_descriptor`], which
    /// allows types that refer to each other before both are written.
    pub fn at(mut self, address: Address) -> Self {
        self.spec.at = Some(address);
        self
    }

    /// Set the parent type. Its instance fields are inherited.
    pub fn parent(mut self, parent: Address) -> Self {
        self.spec.parent = parent;
        self
    }

    /// Add an instance field without a declared type.
    pub fn field(self, name: &str, kind: ElementKind) -> Self {
        self.typed_field(name, kind, Address::NULL)
    }

    /// Add an instance field with a declared type descriptor.
    pub fn typed_field(mut self, name: &str, kind: ElementKind, declared_type: Address) -> Self {
        self.spec.fields.push(PendingField {
            name: name.to_string(),
            kind,
            declared_type,
            flags: FieldFlags::empty(),
            offset: None,
        });
        self
    }

    /// Add an inline value-type field.
    pub fn value_field(self, name: &str, value_type: Address) -> Self {
        self.typed_field(name, ElementKind::ValueType, value_type)
    }

    /// Add a static field.
    pub fn static_field(mut self, name: &str, kind: ElementKind) -> Self {
        self.spec.fields.push(PendingField {
            name: name.to_string(),
            kind,
            declared_type: Address::NULL,
            flags: FieldFlags::STATIC,
            offset: None,
        });
        self
    }

    /// Write the type and return its descriptor address.
    pub fn build(self) -> Address {
        self.builder.write_type(self.spec)
    }
}

impl HeapImageBuilder {
    /// Size and alignment of a field of `kind` stored inline.
    fn field_geometry(&self, kind: ElementKind, declared_type: Address) -> (u64, u64) {
        let pointer_size = self.layout.pointer_bytes();
        if kind == ElementKind::ValueType {
            let size = self
                .types
                .get(&declared_type)
                .map_or(pointer_size, |info| u64::from(info.field_data_size));
            return (size, pointer_size.min(8));
        }

        let size = kind
            .inline_size(self.layout.pointer_size)
            .map_or(pointer_size, |size| size as u64);
        (size, size.clamp(1, pointer_size))
    }

    /// Lay out, encode and record a type.
    pub(crate) fn write_type(&mut self, spec: TypeSpec) -> Address {
        let pointer_size = self.layout.pointer_bytes();
        let parent = self.types.get(&spec.parent).cloned();
        let mut fields = parent.as_ref().map_or_else(Vec::new, |info| info.fields.clone());
        let mut cursor = parent
            .as_ref()
            .map_or(0, |info| u64::from(info.field_data_size));
        let mut flags = spec.flags;
        if parent
            .as_ref()
            .is_some_and(|info| info.flags.contains(TypeFlags::CONTAINS_POINTERS))
        {
            flags |= TypeFlags::CONTAINS_POINTERS;
        }

        let mut table = Vec::with_capacity(spec.fields.len());
        for field in &spec.fields {
            if field.flags.contains(FieldFlags::STATIC) {
                table.push((field.clone(), 0u32));
                continue;
            }

            let (size, alignment) = self.field_geometry(field.kind, field.declared_type);
            let offset = match field.offset {
                Some(offset) => u64::from(offset),
                None => align_up(cursor, alignment).unwrap_or(cursor),
            };
            cursor = cursor.max(offset + size);

            let nested_pointers = field.kind == ElementKind::ValueType
                && self
                    .types
                    .get(&field.declared_type)
                    .is_some_and(|info| info.flags.contains(TypeFlags::CONTAINS_POINTERS));
            if field.kind.is_object_reference() || nested_pointers {
                flags |= TypeFlags::CONTAINS_POINTERS;
            }

            let offset = offset as u32;
            fields.push(FieldInfo {
                name: field.name.clone(),
                offset,
                kind: field.kind,
                declared_type: field.declared_type,
            });
            table.push((field.clone(), offset));
        }

        let field_data_size = cursor as u32;
        let base_size = spec.base_size.unwrap_or_else(|| {
            let padded = align_up(cursor, pointer_size).unwrap_or(cursor);
            (2 * pointer_size + padded).max(self.layout.min_object_size) as u32
        });

        let address = self.encode_descriptor(&spec, flags, base_size, field_data_size, &table);
        self.types.insert(
            address,
            TypeInfo {
                flags,
                base_size,
                component_size: spec.component_size,
                field_data_size,
                component_type: spec.component_type,
                fields,
            },
        );
        address
    }

    fn encode_descriptor(
        &mut self,
        spec: &TypeSpec,
        flags: TypeFlags,
        base_size: u32,
        field_data_size: u32,
        table: &[(PendingField, u32)],
    ) -> Address {
        let pointer_size = self.layout.pointer_size;
        let name = self.write_name(&spec.name);

        let mut entries = Vec::with_capacity(table.len() * (8 + 2 * pointer_size));
        for (field, offset) in table {
            let field_name = self.write_name(&field.name);
            entries.extend_from_slice(&offset.to_le_bytes());
            entries.push(field.kind.tag());
            entries.push(field.flags.bits());
            entries.extend_from_slice(&[0, 0]);
            push_pointer(&mut entries, pointer_size, field_name.value());
            push_pointer(&mut entries, pointer_size, field.declared_type.value());
        }
        let field_table = if entries.is_empty() {
            Address::NULL
        } else {
            self.alloc_metadata(&entries)
        };

        let word = flags.bits() | u32::from(spec.component_size);
        let mut bytes = Vec::with_capacity(0x10 + 4 * pointer_size);
        bytes.extend_from_slice(&word.to_le_bytes());
        bytes.extend_from_slice(&base_size.to_le_bytes());
        bytes.push(spec.kind.tag());
        bytes.push(spec.component_kind.tag());
        bytes.extend_from_slice(&(table.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&field_data_size.to_le_bytes());
        push_pointer(&mut bytes, pointer_size, spec.parent.value());
        push_pointer(&mut bytes, pointer_size, name.value());
        push_pointer(&mut bytes, pointer_size, field_table.value());
        push_pointer(&mut bytes, pointer_size, spec.component_type.value());

        match spec.at {
            Some(address) => {
                self.write_metadata(address, &bytes);
                address
            }
            None => self.alloc_metadata(&bytes),
        }
    }

    fn write_name(&mut self, name: &str) -> Address {
        let units: Vec<u16> = name.encode_utf16().collect();
        let mut blob = Vec::with_capacity(4 + 2 * units.len());
        blob.extend_from_slice(&(units.len() as u32).to_le_bytes());
        for unit in units {
            blob.extend_from_slice(&unit.to_le_bytes());
        }
        self.alloc_metadata(&blob)
    }
}

fn push_pointer(bytes: &mut Vec<u8>, pointer_size: usize, value: u64) {
    if pointer_size == 4 {
        bytes.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
}
