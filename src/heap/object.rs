use std::{
    fmt,
    hash::{Hash, Hasher},
};

use widestring::U16String;

use super::{
    access::{collect_field_references, FieldAccess},
    ClrValueType, GraphWalker, Primitive,
};
use crate::{
    address::Address,
    session::Session,
    source::{io::read_ptr_at, MemorySourceExt},
    typesystem::{ClrTypeRc, ElementKind},
    Error, Result,
};

/// A handle to an object on the managed heap.
///
/// A `ClrObject` pairs an object address with the type resolved from the object's own
/// descriptor pointer. Handles borrow the [`Session`] they were created by and are cheap to
/// clone. Two handles are equal iff their addresses are equal.
///
/// Null references are represented by a sentinel with address `0` and no type; every field
/// read through it fails with [`crate::Error::NullReference`].
///
/// # Examples
///
/// ```rust,no_run
/// use heapscope::Session;
///
/// # fn inspect(session: &Session) -> heapscope::Result<()> {
/// let carrier = session.get_object(0x0000_0000_03d7_2000.into())?;
/// let flag: bool = carrier.read_field("TrueBool")?;
/// let text = carrier.read_string_field("HelloWorldString")?;
/// let pointee = carrier.read_object_field("SamplePointer")?;
/// println!("{flag} {text} {}", pointee.type_name().unwrap_or("<null>"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ClrObject<'s> {
    session: &'s Session,
    address: Address,
    ty: Option<ClrTypeRc>,
}

impl<'s> ClrObject<'s> {
    pub(crate) fn new(session: &'s Session, address: Address, ty: ClrTypeRc) -> Self {
        ClrObject {
            session,
            address,
            ty: Some(ty),
        }
    }

    pub(crate) fn null(session: &'s Session) -> Self {
        ClrObject {
            session,
            address: Address::NULL,
            ty: None,
        }
    }

    /// The object's address.
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// The object's runtime type, `None` for the null sentinel.
    #[must_use]
    pub fn ty(&self) -> Option<&ClrTypeRc> {
        self.ty.as_ref()
    }

    /// The object's type name, `None` for the null sentinel.
    #[must_use]
    pub fn type_name(&self) -> Option<&str> {
        self.ty.as_ref().map(|ty| ty.name.as_str())
    }

    /// Returns `true` for the null sentinel.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.ty.is_none()
    }

    /// The session this handle reads from.
    #[must_use]
    pub fn session(&self) -> &'s Session {
        self.session
    }

    fn require_type(&self) -> Result<&ClrTypeRc> {
        self.ty.as_ref().ok_or(Error::NullReference)
    }

    fn fields(&self) -> Result<FieldAccess<'s, '_>> {
        let ty = self.require_type()?;
        Ok(FieldAccess {
            session: self.session,
            data: self.address.offset(self.session.layout().pointer_bytes())?,
            ty,
        })
    }

    /// Read a primitive instance field.
    ///
    /// The field's declared kind must be exactly `T::KIND`; reading an `I4` field as `i64`
    /// fails with [`crate::Error::TypeMismatch`].
    ///
    /// # Errors
    /// Returns [`crate::Error::FieldNotFound`], [`crate::Error::TypeMismatch`],
    /// [`crate::Error::NullReference`] or [`crate::Error::NotMapped`].
    pub fn read_field<T: Primitive>(&self, name: &str) -> Result<T> {
        self.fields()?.read(name)
    }

    /// Read a `String` field and decode it, replacing unpaired surrogates.
    ///
    /// # Errors
    /// Returns [`crate::Error::NullReference`] if the field holds null, and
    /// [`crate::Error::TypeMismatch`] if the field is not a string.
    pub fn read_string_field(&self, name: &str) -> Result<String> {
        self.read_string_field_opt(name)?
            .ok_or(Error::NullReference)
    }

    /// Read a `String` field, returning `None` if it holds null.
    ///
    /// # Errors
    /// See [`ClrObject::read_string_field`].
    pub fn read_string_field_opt(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .fields()?
            .string_utf16(name)?
            .map(|units| units.to_string_lossy()))
    }

    /// Read a `String` field as exact UTF-16 code units, `None` if it holds null.
    ///
    /// # Errors
    /// See [`ClrObject::read_string_field`].
    pub fn read_string_field_utf16(&self, name: &str) -> Result<Option<U16String>> {
        self.fields()?.string_utf16(name)
    }

    /// Follow a reference field.
    ///
    /// The returned handle carries the referent's runtime type, read from its own header, which
    /// may be a subtype of the field's declared type. A null field yields the null sentinel.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeMismatch`] if the field is not a reference, and
    /// [`crate::Error::CorruptMetadata`] if the referent's type cannot be resolved.
    pub fn read_object_field(&self, name: &str) -> Result<ClrObject<'s>> {
        self.fields()?.object(name)
    }

    /// View an inline value-type field.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeMismatch`] if the field is not a value type.
    pub fn read_value_type_field(&self, name: &str) -> Result<ClrValueType<'s>> {
        self.fields()?.value_type(name)
    }

    /// Read an enum field and convert its underlying value.
    ///
    /// The value is read at the field's declared width and sign- or zero-extended. Values that
    /// name no variant are passed to `E::from` unchanged.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeMismatch`] if the field is not integral.
    pub fn read_enum_field<E: From<i64>>(&self, name: &str) -> Result<E> {
        self.fields()?.enum_value(name).map(E::from)
    }

    /// Read a pointer-sized field (`I`, `U`, pointers) as an address.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeMismatch`] for any other kind.
    pub fn read_pointer_field(&self, name: &str) -> Result<Address> {
        self.fields()?.pointer(name)
    }

    /// Returns `true` if the object is an array.
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.ty.as_ref().is_some_and(|ty| ty.is_array())
    }

    /// Number of components: array elements or string code units, `0` for other objects.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotMapped`] if the length word cannot be read.
    pub fn component_count(&self) -> Result<u64> {
        let ty = self.require_type()?;
        if !ty.has_components() {
            return Ok(0);
        }

        let length_offset = self.session.layout().length_offset;
        let count = self
            .session
            .source()
            .read_value::<u32>(self.address.offset(length_offset)?)?;
        Ok(u64::from(count))
    }

    fn require_array(&self) -> Result<&ClrTypeRc> {
        let ty = self.require_type()?;
        if ty.is_array() {
            return Ok(ty);
        }
        Err(Error::TypeMismatch {
            field: ty.name.clone(),
            expected: ElementKind::SzArray,
            actual: ty.kind,
        })
    }

    /// Number of elements of an array.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeMismatch`] if the object is not an array.
    pub fn array_length(&self) -> Result<usize> {
        self.require_array()?;
        usize::try_from(self.component_count()?).map_err(|_| Error::OutOfBounds)
    }

    /// Address of element `index`, after a bounds check.
    ///
    /// # Errors
    /// Returns [`crate::Error::IndexOutOfRange`] if `index` is not below the array length.
    pub fn element_address(&self, index: usize) -> Result<Address> {
        let ty = self.require_array()?;
        let length = self.array_length()?;
        if index >= length {
            return Err(Error::IndexOutOfRange { index, length });
        }

        let offset = (index as u64)
            .checked_mul(u64::from(ty.component_size))
            .and_then(|offset| offset.checked_add(self.session.layout().array_data_offset))
            .ok_or(Error::OutOfBounds)?;
        self.address.offset(offset)
    }

    fn require_component(&self, index: usize, expected: ElementKind, accept: bool) -> Result<()> {
        if accept {
            return Ok(());
        }
        Err(Error::TypeMismatch {
            field: format!("[{index}]"),
            expected,
            actual: self.require_type()?.component_kind,
        })
    }

    /// Read a primitive array element.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeMismatch`] if the element kind is not `T::KIND`, and
    /// [`crate::Error::IndexOutOfRange`] for a bad index.
    pub fn read_array_element<T: Primitive>(&self, index: usize) -> Result<T> {
        let ty = self.require_array()?;
        self.require_component(index, T::KIND, ty.component_kind == T::KIND)?;

        let bytes = self
            .session
            .source()
            .read_bytes(self.element_address(index)?, T::SIZE)?;
        T::decode(&bytes)
    }

    /// Follow a reference array element.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeMismatch`] if elements are not references.
    pub fn read_array_object(&self, index: usize) -> Result<ClrObject<'s>> {
        let ty = self.require_array()?;
        self.require_component(index, ElementKind::Class, ty.component_kind.is_object_reference())?;

        let target = self
            .session
            .source()
            .read_pointer(self.element_address(index)?, self.session.layout().pointer_size)?;
        self.session.get_object(target)
    }

    /// View a value-type array element.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeMismatch`] if elements are not value types.
    pub fn read_array_value_type(&self, index: usize) -> Result<ClrValueType<'s>> {
        let ty = self.require_array()?;
        self.require_component(
            index,
            ElementKind::ValueType,
            ty.component_kind == ElementKind::ValueType,
        )?;

        let element_type = self.session.resolve_type(ty.component_type)?;
        Ok(ClrValueType::interior(
            self.session,
            self.element_address(index)?,
            element_type,
        ))
    }

    /// Shallow size of the object.
    ///
    /// Objects inside a known segment are aligned the way that segment is stepped through, so
    /// large-object segments use [`crate::RuntimeLayout::large_object_alignment`]. Objects
    /// outside every segment use the small-object alignment.
    ///
    /// # Errors
    /// Returns [`crate::Error::NullReference`] for the null sentinel, and
    /// [`crate::Error::CorruptMetadata`] if the size overruns the object's segment.
    pub fn size(&self) -> Result<u64> {
        let ty = self.require_type()?;
        let components = self.component_count()?;
        let layout = self.session.layout();
        let segment = self.session.segment_of(self.address);
        let alignment = segment.map_or(layout.object_alignment, |segment| {
            segment.alignment(layout)
        });

        let size = ty
            .instance_size(components, alignment)
            .ok_or_else(|| corrupt_metadata!("Size of object at {} overflows", self.address))?;
        if let Some(segment) = segment {
            if self.address.offset(size)? > segment.walk_end() {
                return Err(corrupt_metadata!(
                    "Object at {} of size {} overruns its segment ending at {}",
                    self.address,
                    size,
                    segment.walk_end()
                ));
            }
        }
        Ok(size)
    }

    /// Every non-null reference held by the object.
    ///
    /// Covers reference fields, reference array elements and references nested inside inline
    /// value types, in layout order. Duplicates are kept.
    ///
    /// # Errors
    /// Returns the first error met while decoding the object's own storage.
    pub fn enumerate_references(&self) -> Result<Vec<Address>> {
        let mut references = Vec::new();
        let mut failures = Vec::new();
        self.collect_references(&mut references, &mut failures)?;
        match failures.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(references),
        }
    }

    /// Append the object's references to `out`.
    ///
    /// A field or element whose storage cannot be decoded is recorded in `failures` and the
    /// rest of the object is still scanned. An `Err` means nothing past the object header
    /// could be read.
    pub(crate) fn collect_references(
        &self,
        out: &mut Vec<Address>,
        failures: &mut Vec<Error>,
    ) -> Result<()> {
        let ty = self.require_type()?;
        if !ty.contains_pointers() {
            return Ok(());
        }

        let layout = self.session.layout();
        if !ty.is_array() {
            let data = self.address.offset(layout.pointer_bytes())?;
            return collect_field_references(self.session, data, ty, 0, out, failures);
        }

        let length = self.array_length()?;
        if length == 0 {
            return Ok(());
        }
        let first = self.address.offset(layout.array_data_offset)?;

        if ty.component_kind.is_object_reference() {
            let block = self.element_block(first, length, layout.pointer_size as u64)?;
            let bytes = self.session.source().read_bytes(first, block)?;
            let mut offset = 0;
            for _ in 0..length {
                let target = read_ptr_at(&bytes, &mut offset, layout.pointer_size)?;
                if target != 0 {
                    out.push(Address::new(target));
                }
            }
        } else if ty.component_kind == ElementKind::ValueType {
            let element_type = self.session.resolve_type(ty.component_type)?;
            if element_type.contains_pointers() {
                let stride = u64::from(ty.component_size);
                self.element_block(first, length, stride)?;
                for index in 0..length as u64 {
                    let element = first.offset(index * stride)?;
                    collect_field_references(
                        self.session,
                        element,
                        &element_type,
                        1,
                        out,
                        failures,
                    )?;
                }
            }
        }

        Ok(())
    }

    /// Byte length of `length` elements of `stride` bytes starting at `first`.
    ///
    /// The block must end inside the object's segment and be readable from the source.
    fn element_block(&self, first: Address, length: usize, stride: u64) -> Result<usize> {
        let bytes = (length as u64)
            .checked_mul(stride)
            .ok_or_else(|| corrupt_metadata!("Array at {} is too long", self.address))?;
        let end = first.offset(bytes)?;
        if let Some(segment) = self.session.segment_of(self.address) {
            if end > segment.walk_end() {
                return Err(corrupt_metadata!(
                    "Elements of array at {} overrun its segment ending at {}",
                    self.address,
                    segment.walk_end()
                ));
            }
        }

        let bytes = usize::try_from(bytes).map_err(|_| Error::OutOfBounds)?;
        if !self.session.source().is_mapped(first, bytes) {
            return Err(Error::NotMapped(first));
        }
        Ok(bytes)
    }

    /// Total size of every object reachable from this one, each counted once.
    ///
    /// See [`GraphWalker`] for the traversal rules.
    ///
    /// # Errors
    /// Returns [`crate::Error::NullReference`] for the null sentinel.
    pub fn graph_size(&self) -> Result<u64> {
        self.require_type()?;
        Ok(GraphWalker::new(self.session).walk(self).bytes)
    }

    /// Decode the object as a string.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeMismatch`] if the object is not a string.
    pub fn as_string(&self) -> Result<String> {
        let ty = self.require_type()?;
        if !ty.is_string() {
            return Err(Error::TypeMismatch {
                field: ty.name.clone(),
                expected: ElementKind::String,
                actual: ty.kind,
            });
        }
        self.session.get_string_value(self.address)
    }
}

impl PartialEq for ClrObject<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for ClrObject<'_> {}

impl Hash for ClrObject<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Debug for ClrObject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClrObject")
            .field("address", &self.address)
            .field("type", &self.type_name())
            .finish()
    }
}

impl fmt::Display for ClrObject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.type_name() {
            Some(name) => write!(f, "{} {}", self.address, name),
            None => write!(f, "null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::{
        builder::HeapImageBuilder,
        heap::SegmentKind,
        test::{attach, carrier_heap, BIRTHDAY_TICKS, HELLO_WORLD, ONE_LARGER_MAX_INT, SOME_ENUM},
    };

    #[derive(Debug, PartialEq)]
    enum EnumType {
        Zero,
        One,
        Two,
        Other(i64),
    }

    impl From<i64> for EnumType {
        fn from(value: i64) -> Self {
            match value {
                0 => EnumType::Zero,
                1 => EnumType::One,
                2 => EnumType::Two,
                other => EnumType::Other(other),
            }
        }
    }

    #[test]
    fn test_read_primitives() {
        let heap = carrier_heap();
        let carrier = heap.session.get_object(heap.carrier).unwrap();

        assert_eq!(carrier.type_name(), Some("PrimitiveTypeCarrier"));
        assert!(carrier.read_field::<bool>("TrueBool").unwrap());
        assert_eq!(
            carrier.read_field::<i64>("OneLargerMaxInt").unwrap(),
            ONE_LARGER_MAX_INT
        );
        assert_eq!(carrier.read_field::<i32>("SomeEnum").unwrap(), SOME_ENUM);
    }

    #[test]
    fn test_read_field_errors() {
        let heap = carrier_heap();
        let carrier = heap.session.get_object(heap.carrier).unwrap();

        assert!(matches!(
            carrier.read_field::<i64>("SomeEnum"),
            Err(Error::TypeMismatch {
                expected: ElementKind::I8,
                actual: ElementKind::I4,
                ..
            })
        ));
        assert!(matches!(
            carrier.read_field::<i32>("nonExistingField"),
            Err(Error::FieldNotFound { .. })
        ));
        assert!(matches!(
            carrier.read_field::<i32>("s_count"),
            Err(Error::FieldNotFound { .. })
        ));
    }

    #[test]
    fn test_read_enum() {
        let heap = carrier_heap();
        let carrier = heap.session.get_object(heap.carrier).unwrap();

        assert_eq!(
            carrier.read_enum_field::<EnumType>("SomeEnum").unwrap(),
            EnumType::Two
        );
        assert_eq!(carrier.read_enum_field::<i64>("TrueBool").unwrap(), 1);
        assert!(matches!(
            carrier.read_enum_field::<EnumType>("HelloWorldString"),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_read_strings() {
        let heap = carrier_heap();
        let carrier = heap.session.get_object(heap.carrier).unwrap();

        assert_eq!(
            carrier.read_string_field("HelloWorldString").unwrap(),
            HELLO_WORLD
        );
        assert_eq!(
            carrier
                .read_string_field_utf16("HelloWorldString")
                .unwrap()
                .unwrap()
                .len(),
            HELLO_WORLD.len()
        );
        assert!(matches!(
            carrier.read_string_field("SomeEnum"),
            Err(Error::TypeMismatch {
                expected: ElementKind::String,
                ..
            })
        ));
    }

    #[test]
    fn test_read_object_fields() {
        let heap = carrier_heap();
        let carrier = heap.session.get_object(heap.carrier).unwrap();

        let text = carrier.read_object_field("HelloWorldString").unwrap();
        assert_eq!(text.address(), heap.hello);
        assert_eq!(text.as_string().unwrap(), HELLO_WORLD);

        let sample = carrier.read_object_field("SamplePointer").unwrap();
        assert_eq!(sample.type_name(), Some("SamplePointerType"));
        assert_eq!(sample.read_field::<i32>("_id").unwrap(), 42);

        let next = carrier.read_object_field("_next").unwrap();
        assert!(next.is_null());
        assert_eq!(next.address(), Address::NULL);
        assert!(matches!(
            next.read_field::<i32>("_id"),
            Err(Error::NullReference)
        ));

        assert!(matches!(
            carrier.read_object_field("nonExistingField"),
            Err(Error::FieldNotFound { .. })
        ));
        assert!(matches!(
            carrier.read_object_field("TrueBool"),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_read_value_types() {
        let heap = carrier_heap();
        let carrier = heap.session.get_object(heap.carrier).unwrap();

        let birthday = carrier.read_value_type_field("Birthday").unwrap();
        assert_eq!(birthday.ty().name, "System.DateTime");
        assert!(birthday.is_interior());
        assert_eq!(
            birthday.read_field::<u64>("_dateData").unwrap(),
            BIRTHDAY_TICKS
        );

        let guid = carrier.read_value_type_field("SampleGuid").unwrap();
        assert_eq!(guid.ty().name, "System.Guid");

        assert!(matches!(
            carrier.read_value_type_field("SomeEnum"),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_read_pointer_field() {
        let heap = carrier_heap();
        let carrier = heap.session.get_object(heap.carrier).unwrap();
        assert_eq!(
            carrier.read_pointer_field("_handle").unwrap(),
            Address::new(0x7ff9_0000_1000)
        );
        assert!(carrier.read_pointer_field("TrueBool").is_err());
    }

    #[test]
    fn test_references_and_identity() {
        let heap = carrier_heap();
        let carrier = heap.session.get_object(heap.carrier).unwrap();

        let references = carrier.enumerate_references().unwrap();
        assert_eq!(references, vec![heap.hello, heap.sample]);

        let again = heap.session.get_object(heap.carrier).unwrap();
        assert_eq!(carrier, again);
        let set: HashSet<_> = [carrier.clone(), again].into_iter().collect();
        assert_eq!(set.len(), 1);
        assert!(!carrier.is_array());
        assert!(matches!(
            carrier.array_length(),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_string_is_leaf() {
        let heap = carrier_heap();
        let text = heap.session.get_object(heap.hello).unwrap();
        assert!(text.enumerate_references().unwrap().is_empty());
        assert_eq!(text.component_count().unwrap(), HELLO_WORLD.len() as u64);
        // 22 + 11 * 2 = 44, aligned to 48
        assert_eq!(text.size().unwrap(), 48);
        assert_eq!(text.graph_size().unwrap(), 48);
    }

    #[test]
    fn test_size_uses_segment_alignment() {
        let mut builder = HeapImageBuilder::x86();
        let node = builder
            .define_class("Sample.Node")
            .field("_next", ElementKind::Class)
            .build();
        let small = builder.segment(SegmentKind::Small);
        let large = builder.segment(SegmentKind::Large);
        let compact = builder.alloc(small, node).unwrap();
        let padded = builder.alloc(large, node).unwrap();
        builder.alloc(large, node).unwrap();
        let session = attach(builder);

        // Base size 12 stays 12 at 4-byte alignment and rounds to 16 at 8-byte alignment
        let compact = session.get_object(compact).unwrap();
        let padded = session.get_object(padded).unwrap();
        assert_eq!(compact.size().unwrap(), 12);
        assert_eq!(padded.size().unwrap(), 16);
        assert_eq!(padded.graph_size().unwrap(), 16);

        let stats = session.statistics();
        assert_eq!(stats.by_name("Sample.Node").unwrap().total_size, 12 + 16 + 16);
    }
}
