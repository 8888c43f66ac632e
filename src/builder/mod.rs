//! Synthesis of heap images.
//!
//! [`HeapImageBuilder`] writes type descriptors, field tables, names and objects into a
//! [`MemoryBuffer`], laid out exactly the way [`crate::typesystem::MethodTableReader`] and the
//! object accessor expect, and returns the matching segment list. It is the fixture behind this
//! crate's own tests, benches and fuzz target, and is public so that tools built on the crate
//! can unit-test their heap analyses without a dump file.
//!
//! # Example
//!
//! ```rust
//! use heapscope::{builder::HeapImageBuilder, ElementKind, HeapConfig, SegmentKind, Session};
//!
//! let mut builder = HeapImageBuilder::x64();
//! let person = builder
//!     .define_class("Sample.Person")
//!     .field("_name", ElementKind::String)
//!     .field("_age", ElementKind::I4)
//!     .build();
//!
//! let segment = builder.segment(SegmentKind::Small);
//! let alice = builder.alloc(segment, person)?;
//! let name = builder.alloc_string(segment, "Alice")?;
//! builder.set_reference(alice, "_name", name)?;
//! builder.set_field(alice, "_age", 36i32)?;
//!
//! let (memory, segments) = builder.finish();
//! let session = Session::attach(memory, segments, HeapConfig::x64())?;
//! let alice = session.get_object(alice)?;
//! assert_eq!(alice.read_string_field("_name")?, "Alice");
//! assert_eq!(alice.read_field::<i32>("_age")?, 36);
//! # Ok::<(), heapscope::Error>(())
//! ```

mod types;

use std::collections::HashMap;

pub use types::TypeBuilder;
use types::{FieldInfo, PendingField, TypeInfo, TypeSpec};

use crate::{
    address::{align_up, Address},
    heap::{Segment, SegmentKind},
    session::RuntimeLayout,
    source::{
        io::{write_le, write_ptr_at, HeapIO},
        MemoryBuffer,
    },
    typesystem::{DescriptorGeometry, ElementKind, FieldFlags, TypeFlags},
    Error, Result,
};

/// First address of the metadata arena for 64-bit images.
const METADATA_BASE_X64: u64 = 0x0000_7ff9_fd20_0000;
/// First address of the metadata arena for 32-bit images.
const METADATA_BASE_X86: u64 = 0x7300_0000;
/// Base of the first automatically placed segment.
const SEGMENT_BASE: u64 = 0x0200_0000;
/// Distance between automatically placed segments.
const SEGMENT_STRIDE: u64 = 0x0100_0000;

struct SegmentImage {
    start: Address,
    kind: SegmentKind,
    /// Address of the next object
    cursor: Address,
    /// Bytes from `start - P` onwards
    data: Vec<u8>,
}

#[derive(Clone, Copy)]
struct ObjectInfo {
    descriptor: Address,
    components: u64,
}

/// Writer for synthetic heap images.
///
/// Types are written when they are defined; objects are allocated back to back inside
/// segments. Field writes address fields by name, with `.` separating the steps of a path
/// through inline value types (`"_when._dateData"`).
pub struct HeapImageBuilder {
    layout: RuntimeLayout,
    metadata_base: u64,
    metadata: Vec<u8>,
    /// Descriptors placed outside the arena with [`TypeBuilder::at`]
    pinned: Vec<(Address, Vec<u8>)>,
    types: HashMap<Address, TypeInfo>,
    string_type: Option<Address>,
    free_type: Option<Address>,
    segments: Vec<SegmentImage>,
    objects: HashMap<Address, ObjectInfo>,
}

impl HeapImageBuilder {
    /// Create a builder for the given runtime layout.
    #[must_use]
    pub fn new(layout: RuntimeLayout) -> Self {
        let metadata_base = if layout.pointer_size == 4 {
            METADATA_BASE_X86
        } else {
            METADATA_BASE_X64
        };
        HeapImageBuilder {
            layout,
            metadata_base,
            metadata: Vec::new(),
            pinned: Vec::new(),
            types: HashMap::new(),
            string_type: None,
            free_type: None,
            segments: Vec::new(),
            objects: HashMap::new(),
        }
    }

    /// Builder for a 64-bit runtime.
    #[must_use]
    pub fn x64() -> Self {
        Self::new(RuntimeLayout::x64())
    }

    /// Builder for a 32-bit runtime.
    #[must_use]
    pub fn x86() -> Self {
        Self::new(RuntimeLayout::x86())
    }

    /// The runtime layout images are written for.
    #[must_use]
    pub fn layout(&self) -> &RuntimeLayout {
        &self.layout
    }

    // Metadata arena

    fn alloc_metadata(&mut self, bytes: &[u8]) -> Address {
        let offset = align_up(self.metadata.len() as u64, 8).unwrap_or(0) as usize;
        self.metadata.resize(offset, 0);
        self.metadata.extend_from_slice(bytes);
        Address::new(self.metadata_base + offset as u64)
    }

    fn write_metadata(&mut self, address: Address, bytes: &[u8]) {
        if let Some(start) = address.distance_from(Address::new(self.metadata_base)) {
            let start = start as usize;
            if let Some(target) = self.metadata.get_mut(start..start + bytes.len()) {
                target.copy_from_slice(bytes);
                return;
            }
        }
        self.pinned.push((address, bytes.to_vec()));
    }

    /// Allocate an empty descriptor slot, to be filled later with [`TypeBuilder::at`].
    pub fn reserve_descriptor(&mut self) -> Address {
        let geometry = DescriptorGeometry {
            pointer_size: self.layout.pointer_size,
        };
        self.alloc_metadata(&vec![0; geometry.header_size()])
    }

    // Types

    /// Start defining a reference type.
    pub fn define_class(&mut self, name: &str) -> TypeBuilder<'_> {
        TypeBuilder::new(
            self,
            TypeSpec::new(name, ElementKind::Class, TypeFlags::empty()),
        )
    }

    /// Start defining a value type.
    pub fn define_value_type(&mut self, name: &str) -> TypeBuilder<'_> {
        TypeBuilder::new(
            self,
            TypeSpec::new(name, ElementKind::ValueType, TypeFlags::IS_VALUE_TYPE),
        )
    }

    /// Define an enumeration with a single `value__` field of kind `underlying`.
    pub fn define_enum(&mut self, name: &str, underlying: ElementKind) -> Address {
        let mut spec = TypeSpec::new(
            name,
            ElementKind::ValueType,
            TypeFlags::IS_VALUE_TYPE | TypeFlags::IS_ENUM,
        );
        spec.fields.push(PendingField {
            name: "value__".to_string(),
            kind: underlying,
            declared_type: Address::NULL,
            flags: FieldFlags::empty(),
            offset: None,
        });
        self.write_type(spec)
    }

    /// Define a single-dimensional array type.
    ///
    /// ## Arguments
    /// * 'name'           - Type name, e.g. `System.Int32[]`
    /// * 'component_kind' - Element kind of the elements
    /// * 'component_type' - Element type descriptor; required for value-type elements
    pub fn define_array(
        &mut self,
        name: &str,
        component_kind: ElementKind,
        component_type: Address,
    ) -> Address {
        let spec = self.array_spec(name, component_kind, component_type);
        self.write_type(spec)
    }

    /// Define a single-dimensional array type whose descriptor lives at `address`.
    pub fn define_array_at(
        &mut self,
        address: Address,
        name: &str,
        component_kind: ElementKind,
        component_type: Address,
    ) -> Address {
        let mut spec = self.array_spec(name, component_kind, component_type);
        spec.at = Some(address);
        self.write_type(spec)
    }

    fn array_spec(
        &self,
        name: &str,
        component_kind: ElementKind,
        component_type: Address,
    ) -> TypeSpec {
        let pointer_size = self.layout.pointer_bytes();
        let (component_size, nested_pointers) = if component_kind == ElementKind::ValueType {
            self.types.get(&component_type).map_or((pointer_size, false), |info| {
                (
                    u64::from(info.field_data_size),
                    info.flags.contains(TypeFlags::CONTAINS_POINTERS),
                )
            })
        } else {
            (
                component_kind
                    .inline_size(self.layout.pointer_size)
                    .map_or(pointer_size, |size| size as u64),
                false,
            )
        };

        let mut flags = TypeFlags::HAS_COMPONENT_SIZE;
        if component_kind.is_object_reference() || nested_pointers {
            flags |= TypeFlags::CONTAINS_POINTERS;
        }

        let mut spec = TypeSpec::new(name, ElementKind::SzArray, flags);
        spec.component_size = component_size as u16;
        spec.component_kind = component_kind;
        spec.component_type = component_type;
        spec.base_size = Some((self.layout.array_data_offset + pointer_size) as u32);
        spec
    }

    /// The `System.String` type, defined on first use.
    pub fn string_type(&mut self) -> Address {
        if let Some(address) = self.string_type {
            return address;
        }

        let pointer_size = self.layout.pointer_bytes();
        let mut spec = TypeSpec::new(
            "System.String",
            ElementKind::String,
            TypeFlags::HAS_COMPONENT_SIZE,
        );
        spec.component_size = 2;
        spec.component_kind = ElementKind::Char;
        spec.base_size = Some((pointer_size + self.layout.string_data_offset + 2) as u32);
        for (name, kind, offset) in [
            ("_stringLength", ElementKind::I4, self.layout.length_offset),
            ("_firstChar", ElementKind::Char, self.layout.string_data_offset),
        ] {
            spec.fields.push(PendingField {
                name: name.to_string(),
                kind,
                declared_type: Address::NULL,
                flags: FieldFlags::empty(),
                offset: Some((offset - pointer_size) as u32),
            });
        }

        let address = self.write_type(spec);
        self.string_type = Some(address);
        address
    }

    /// The free-space filler type, defined on first use.
    pub fn free_type(&mut self) -> Address {
        if let Some(address) = self.free_type {
            return address;
        }

        let mut spec = TypeSpec::new(
            "Free",
            ElementKind::Class,
            TypeFlags::IS_FREE | TypeFlags::HAS_COMPONENT_SIZE,
        );
        spec.component_size = 1;
        spec.component_kind = ElementKind::U1;
        spec.base_size = Some((self.layout.array_data_offset + self.layout.pointer_bytes()) as u32);

        let address = self.write_type(spec);
        self.free_type = Some(address);
        address
    }

    fn type_info(&self, descriptor: Address) -> Result<&TypeInfo> {
        self.types
            .get(&descriptor)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown type descriptor {descriptor}")))
    }

    // Segments and objects

    /// Add a segment at the next free default location, returning its index.
    pub fn segment(&mut self, kind: SegmentKind) -> usize {
        let base = SEGMENT_BASE + self.segments.len() as u64 * SEGMENT_STRIDE;
        self.segment_at(Address::new(base + self.layout.pointer_bytes()), kind)
    }

    /// Add a segment whose first object lives at `start`, returning its index.
    pub fn segment_at(&mut self, start: Address, kind: SegmentKind) -> usize {
        self.segments.push(SegmentImage {
            start,
            kind,
            cursor: start,
            data: Vec::new(),
        });
        self.segments.len() - 1
    }

    fn alignment(&self, kind: SegmentKind) -> u64 {
        match kind {
            SegmentKind::Small => self.layout.object_alignment,
            SegmentKind::Large | SegmentKind::Pinned => self.layout.large_object_alignment,
        }
    }

    fn segment_image(&self, segment: usize) -> Result<&SegmentImage> {
        self.segments
            .get(segment)
            .ok_or_else(|| Error::InvalidSegment(format!("no segment with index {segment}")))
    }

    /// Aligned size of an instance of `descriptor` with `components` elements in `segment`.
    fn object_size(&self, segment: usize, descriptor: Address, components: u64) -> Result<u64> {
        let info = self.type_info(descriptor)?;
        let alignment = self.alignment(self.segment_image(segment)?.kind);
        let raw = u64::from(info.base_size);
        let raw = if info.flags.contains(TypeFlags::HAS_COMPONENT_SIZE) {
            raw + components * u64::from(info.component_size)
        } else {
            raw
        };
        align_up(raw, alignment).ok_or(Error::OutOfBounds)
    }

    fn emplace(
        &mut self,
        segment: usize,
        descriptor: Address,
        components: u64,
    ) -> Result<Address> {
        let size = self.object_size(segment, descriptor, components)?;
        let pointer_size = self.layout.pointer_size;
        let length_offset = self.layout.length_offset;
        let has_components = self
            .type_info(descriptor)?
            .flags
            .contains(TypeFlags::HAS_COMPONENT_SIZE);

        let image = self
            .segments
            .get_mut(segment)
            .ok_or_else(|| Error::InvalidSegment(format!("no segment with index {segment}")))?;
        let address = image.cursor;
        let offset = (address.value() - image.start.value()) as usize + pointer_size;
        image.data.resize(offset - pointer_size + size as usize, 0);

        let mut position = offset;
        write_ptr_at(&mut image.data, &mut position, pointer_size, descriptor.value())?;
        if has_components {
            write_le(&mut image.data[offset + length_offset as usize..], components as u32)?;
        }
        image.cursor = address.offset(size)?;

        self.objects.insert(
            address,
            ObjectInfo {
                descriptor,
                components,
            },
        );
        Ok(address)
    }

    /// Allocate an instance of a non-array type.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidConfig`] if the type was not defined by this builder.
    pub fn alloc(&mut self, segment: usize, descriptor: Address) -> Result<Address> {
        self.emplace(segment, descriptor, 0)
    }

    /// Allocate an array with `length` zeroed elements.
    ///
    /// # Errors
    /// See [`HeapImageBuilder::alloc`].
    pub fn alloc_array(
        &mut self,
        segment: usize,
        descriptor: Address,
        length: usize,
    ) -> Result<Address> {
        self.emplace(segment, descriptor, length as u64)
    }

    /// Allocate a string.
    ///
    /// # Errors
    /// See [`HeapImageBuilder::alloc`].
    pub fn alloc_string(&mut self, segment: usize, value: &str) -> Result<Address> {
        let units: Vec<u16> = value.encode_utf16().collect();
        self.alloc_string_utf16(segment, &units)
    }

    /// Allocate a string from raw UTF-16 code units.
    ///
    /// # Errors
    /// See [`HeapImageBuilder::alloc`].
    pub fn alloc_string_utf16(&mut self, segment: usize, units: &[u16]) -> Result<Address> {
        let string_type = self.string_type();
        let address = self.emplace(segment, string_type, units.len() as u64)?;
        let bytes: Vec<u8> = units.iter().flat_map(|unit| unit.to_le_bytes()).collect();
        self.write_bytes(address.offset(self.layout.string_data_offset)?, &bytes)?;
        Ok(address)
    }

    /// Move the allocation cursor of `segment` to `address`, filling the gap with a free object.
    fn advance_to(&mut self, segment: usize, address: Address) -> Result<()> {
        let image = self.segment_image(segment)?;
        let cursor = image.cursor;
        let alignment = self.alignment(image.kind);

        let gap = address.distance_from(cursor).ok_or_else(|| {
            Error::InvalidSegment(format!("{address} lies before the allocation cursor {cursor}"))
        })?;
        if gap == 0 {
            return Ok(());
        }

        let free_base = self.layout.array_data_offset + self.layout.pointer_bytes();
        if gap < free_base || gap % alignment != 0 {
            return Err(Error::InvalidSegment(format!(
                "gap of {gap} bytes before {address} cannot hold a free object"
            )));
        }

        let free = self.free_type();
        self.emplace(segment, free, gap - free_base)?;
        Ok(())
    }

    /// Place an object at an exact address; the space before it becomes a free object.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidSegment`] if `address` lies before the segment's
    /// allocation cursor or leaves a gap too small for a free object.
    pub fn place(
        &mut self,
        segment: usize,
        address: Address,
        descriptor: Address,
        components: usize,
    ) -> Result<Address> {
        self.advance_to(segment, address)?;
        self.emplace(segment, descriptor, components as u64)
    }

    /// Place a string at an exact address. See [`HeapImageBuilder::place`].
    ///
    /// # Errors
    /// See [`HeapImageBuilder::place`].
    pub fn place_string(
        &mut self,
        segment: usize,
        address: Address,
        value: &str,
    ) -> Result<Address> {
        self.advance_to(segment, address)?;
        self.alloc_string(segment, value)
    }

    // Writes

    /// Overwrite raw bytes inside a segment or the metadata arena.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotMapped`] if the range is not inside the image.
    pub fn write_bytes(&mut self, address: Address, bytes: &[u8]) -> Result<()> {
        let pointer_size = self.layout.pointer_bytes();
        for image in &mut self.segments {
            let Some(base) = image.start.value().checked_sub(pointer_size) else {
                continue;
            };
            let Some(start) = address.value().checked_sub(base) else {
                continue;
            };
            let start = start as usize;
            if let Some(target) = image.data.get_mut(start..start + bytes.len()) {
                target.copy_from_slice(bytes);
                return Ok(());
            }
        }

        if let Some(start) = address.distance_from(Address::new(self.metadata_base)) {
            let start = start as usize;
            if let Some(target) = self.metadata.get_mut(start..start + bytes.len()) {
                target.copy_from_slice(bytes);
                return Ok(());
            }
        }

        Err(Error::NotMapped(address))
    }

    fn write_value<T: HeapIO>(&mut self, address: Address, value: T) -> Result<()> {
        let mut bytes = vec![0u8; std::mem::size_of::<T>()];
        write_le(&mut bytes, value)?;
        self.write_bytes(address, &bytes)
    }

    fn write_pointer(&mut self, address: Address, target: Address) -> Result<()> {
        let mut bytes = vec![0u8; self.layout.pointer_size];
        write_ptr_at(&mut bytes, &mut 0, self.layout.pointer_size, target.value())?;
        self.write_bytes(address, &bytes)
    }

    /// Follow a dotted field path starting at field data `data` of type `descriptor`.
    fn resolve_path(
        &self,
        descriptor: Address,
        data: Address,
        path: &str,
    ) -> Result<(Address, FieldInfo)> {
        let mut descriptor = descriptor;
        let mut data = data;
        let mut steps = path.split('.').peekable();

        while let Some(step) = steps.next() {
            let info = self.type_info(descriptor)?;
            let field = info.field(step).ok_or_else(|| Error::FieldNotFound {
                type_name: descriptor.to_string(),
                field: step.to_string(),
            })?;
            let address = data.offset(u64::from(field.offset))?;

            if steps.peek().is_none() {
                return Ok((address, field.clone()));
            }
            if field.kind != ElementKind::ValueType {
                return Err(Error::TypeMismatch {
                    field: step.to_string(),
                    expected: ElementKind::ValueType,
                    actual: field.kind,
                });
            }
            descriptor = field.declared_type;
            data = address;
        }

        Err(Error::FieldNotFound {
            type_name: descriptor.to_string(),
            field: path.to_string(),
        })
    }

    fn object_info(&self, object: Address) -> Result<ObjectInfo> {
        self.objects
            .get(&object)
            .copied()
            .ok_or(Error::NotMapped(object))
    }

    /// Address of the field at `path` inside `object`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FieldNotFound`] if a step of the path does not exist.
    pub fn field_address(&self, object: Address, path: &str) -> Result<Address> {
        let info = self.object_info(object)?;
        let data = object.offset(self.layout.pointer_bytes())?;
        Ok(self.resolve_path(info.descriptor, data, path)?.0)
    }

    /// Write a primitive value into the field at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FieldNotFound`] if a step of the path does not exist.
    pub fn set_field<T: HeapIO>(&mut self, object: Address, path: &str, value: T) -> Result<()> {
        let address = self.field_address(object, path)?;
        self.write_value(address, value)
    }

    /// Store a reference into the field at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeMismatch`] if the field is not a reference.
    pub fn set_reference(&mut self, object: Address, path: &str, target: Address) -> Result<()> {
        let info = self.object_info(object)?;
        let data = object.offset(self.layout.pointer_bytes())?;
        let (address, field) = self.resolve_path(info.descriptor, data, path)?;
        if !field.kind.is_object_reference() {
            return Err(Error::TypeMismatch {
                field: path.to_string(),
                expected: ElementKind::Class,
                actual: field.kind,
            });
        }
        self.write_pointer(address, target)
    }

    fn element_address(&self, array: Address, index: usize) -> Result<(Address, Address)> {
        let object = self.object_info(array)?;
        let info = self.type_info(object.descriptor)?;
        if index as u64 >= object.components {
            return Err(Error::IndexOutOfRange {
                index,
                length: object.components as usize,
            });
        }

        let offset = self.layout.array_data_offset + index as u64 * u64::from(info.component_size);
        Ok((array.offset(offset)?, info.component_type))
    }

    /// Write a primitive array element.
    ///
    /// # Errors
    /// Returns [`crate::Error::IndexOutOfRange`] for a bad index.
    pub fn set_element<T: HeapIO>(&mut self, array: Address, index: usize, value: T) -> Result<()> {
        let (address, _) = self.element_address(array, index)?;
        self.write_value(address, value)
    }

    /// Store a reference into an array element.
    ///
    /// # Errors
    /// Returns [`crate::Error::IndexOutOfRange`] for a bad index.
    pub fn set_element_reference(
        &mut self,
        array: Address,
        index: usize,
        target: Address,
    ) -> Result<()> {
        let (address, _) = self.element_address(array, index)?;
        self.write_pointer(address, target)
    }

    /// Write a primitive field of a value-type array element.
    ///
    /// # Errors
    /// Returns [`crate::Error::FieldNotFound`] if a step of the path does not exist.
    pub fn set_element_field<T: HeapIO>(
        &mut self,
        array: Address,
        index: usize,
        path: &str,
        value: T,
    ) -> Result<()> {
        let (element, element_type) = self.element_address(array, index)?;
        let (address, _) = self.resolve_path(element_type, element, path)?;
        self.write_value(address, value)
    }

    /// Store a reference into a field of a value-type array element.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeMismatch`] if the field is not a reference.
    pub fn set_element_field_reference(
        &mut self,
        array: Address,
        index: usize,
        path: &str,
        target: Address,
    ) -> Result<()> {
        let (element, element_type) = self.element_address(array, index)?;
        let (address, field) = self.resolve_path(element_type, element, path)?;
        if !field.kind.is_object_reference() {
            return Err(Error::TypeMismatch {
                field: path.to_string(),
                expected: ElementKind::Class,
                actual: field.kind,
            });
        }
        self.write_pointer(address, target)
    }

    /// Produce the memory image and its segment list, in segment index order.
    #[must_use]
    pub fn finish(self) -> (MemoryBuffer, Vec<Segment>) {
        let pointer_size = self.layout.pointer_bytes();
        let mut memory = MemoryBuffer::new();
        memory.insert_region(Address::new(self.metadata_base), self.metadata);
        for (address, bytes) in self.pinned {
            memory.insert_region(address, bytes);
        }

        let mut segments = Vec::with_capacity(self.segments.len());
        for image in self.segments {
            memory.insert_region(Address::new(image.start.value() - pointer_size), image.data);
            segments.push(Segment::new(image.start, image.cursor, image.cursor, image.kind));
        }

        (memory, segments)
    }
}
