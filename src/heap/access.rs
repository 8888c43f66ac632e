//! Field decoding shared by [`ClrObject`] and [`ClrValueType`].
//!
//! Both handles boil down to a type plus the address where that type's field data starts:
//! `address + P` for heap objects, the address itself for interior value types. Everything
//! below works on that pair, so the two public handles stay thin.

use widestring::U16String;

use super::{primitive::widen_integral, ClrObject, ClrValueType, Primitive};
use crate::{
    address::Address,
    session::Session,
    source::MemorySourceExt,
    typesystem::{ClrType, ClrTypeRc, ElementKind, FieldDescriptor},
    Error, Result,
};

/// A type's field data at a concrete address.
pub(crate) struct FieldAccess<'s, 't> {
    pub session: &'s Session,
    pub data: Address,
    pub ty: &'t ClrTypeRc,
}

impl<'s, 't> FieldAccess<'s, 't> {
    pub fn field(&self, name: &str) -> Result<&'t FieldDescriptor> {
        self.ty.field(name).ok_or_else(|| Error::FieldNotFound {
            type_name: self.ty.name.clone(),
            field: name.to_string(),
        })
    }

    /// Look up `name` and require its kind to satisfy `accept`.
    fn field_of_kind(
        &self,
        name: &str,
        expected: ElementKind,
        accept: impl Fn(ElementKind) -> bool,
    ) -> Result<&'t FieldDescriptor> {
        let field = self.field(name)?;
        if accept(field.kind) {
            return Ok(field);
        }
        Err(Error::TypeMismatch {
            field: name.to_string(),
            expected,
            actual: field.kind,
        })
    }

    pub fn address_of(&self, field: &FieldDescriptor) -> Result<Address> {
        self.data.offset(u64::from(field.offset))
    }

    pub fn read<T: Primitive>(&self, name: &str) -> Result<T> {
        let field = self.field_of_kind(name, T::KIND, |kind| kind == T::KIND)?;

        let mut buf = [0u8; 8];
        let bytes = &mut buf[..T::SIZE];
        self.session.source().read(self.address_of(field)?, bytes)?;
        T::decode(bytes)
    }

    fn reference(&self, field: &FieldDescriptor) -> Result<Address> {
        let pointer_size = self.session.layout().pointer_size;
        self.session
            .source()
            .read_pointer(self.address_of(field)?, pointer_size)
    }

    /// Address of the string a `String` field points to, `None` for null.
    pub fn string_address(&self, name: &str) -> Result<Option<Address>> {
        let field = self.field_of_kind(name, ElementKind::String, |kind| {
            kind == ElementKind::String
        })?;
        let target = self.reference(field)?;
        Ok((!target.is_null()).then_some(target))
    }

    pub fn string_utf16(&self, name: &str) -> Result<Option<U16String>> {
        match self.string_address(name)? {
            Some(target) => self.session.get_string_utf16(target).map(Some),
            None => Ok(None),
        }
    }

    pub fn object(&self, name: &str) -> Result<ClrObject<'s>> {
        let field =
            self.field_of_kind(name, ElementKind::Class, ElementKind::is_object_reference)?;
        let target = self.reference(field)?;
        self.session.get_object(target)
    }

    pub fn value_type(&self, name: &str) -> Result<ClrValueType<'s>> {
        let field = self.field_of_kind(name, ElementKind::ValueType, |kind| {
            kind == ElementKind::ValueType
        })?;
        let ty = self.declared_value_type(field)?;
        Ok(ClrValueType::interior(self.session, self.address_of(field)?, ty))
    }

    fn declared_value_type(&self, field: &FieldDescriptor) -> Result<ClrTypeRc> {
        if field.declared_type.is_null() {
            return Err(corrupt_metadata!(
                "Value type field '{}' of '{}' has no declared type",
                field.name,
                self.ty.name
            ));
        }
        self.session.resolve_type(field.declared_type)
    }

    pub fn enum_value(&self, name: &str) -> Result<i64> {
        let field = self.field(name)?;
        let pointer_size = self.session.layout().pointer_size;

        // A field declared with the enum's own type stores the underlying value inline.
        let (kind, address) = if field.kind == ElementKind::ValueType {
            let ty = self.declared_value_type(field)?;
            let underlying = ty
                .fields()
                .first()
                .filter(|_| ty.is_enum())
                .ok_or_else(|| Error::TypeMismatch {
                    field: name.to_string(),
                    expected: ElementKind::I4,
                    actual: ElementKind::ValueType,
                })?;
            (
                underlying.kind,
                self.address_of(field)?.offset(u64::from(underlying.offset))?,
            )
        } else {
            (field.kind, self.address_of(field)?)
        };

        let width = match kind.inline_size(pointer_size) {
            Some(width)
                if kind.is_integral() || kind == ElementKind::I || kind == ElementKind::U =>
            {
                width
            }
            _ => {
                return Err(Error::TypeMismatch {
                    field: name.to_string(),
                    expected: ElementKind::I4,
                    actual: kind,
                })
            }
        };

        let bytes = self.session.source().read_bytes(address, width)?;
        widen_integral(kind, &bytes, pointer_size)
    }

    pub fn pointer(&self, name: &str) -> Result<Address> {
        let field = self.field_of_kind(name, ElementKind::I, ElementKind::is_pointer_sized)?;
        self.reference(field)
    }
}

/// Append every non-null reference stored in the field data of `ty` at `data`.
///
/// Inline value-type fields are followed up to [`crate::HeapConfig::max_nesting_depth`] levels.
/// A field that cannot be decoded from the snapshot is recorded in `failures` and its siblings
/// are still visited. Errors that do not describe the snapshot are returned.
pub(crate) fn collect_field_references(
    session: &Session,
    data: Address,
    ty: &ClrType,
    depth: usize,
    out: &mut Vec<Address>,
    failures: &mut Vec<Error>,
) -> Result<()> {
    if !ty.contains_pointers() {
        return Ok(());
    }
    if depth > session.config().max_nesting_depth {
        failures.push(Error::RecursionLimit(session.config().max_nesting_depth));
        return Ok(());
    }

    for field in ty.fields() {
        match collect_field(session, data, field, depth, out, failures) {
            Ok(()) => {}
            Err(error) if error.is_data_error() => failures.push(error),
            Err(error) => return Err(error),
        }
    }

    Ok(())
}

fn collect_field(
    session: &Session,
    data: Address,
    field: &FieldDescriptor,
    depth: usize,
    out: &mut Vec<Address>,
    failures: &mut Vec<Error>,
) -> Result<()> {
    let address = data.offset(u64::from(field.offset))?;
    if field.is_reference() {
        let target = session
            .source()
            .read_pointer(address, session.layout().pointer_size)?;
        if !target.is_null() {
            out.push(target);
        }
    } else if field.kind == ElementKind::ValueType && !field.declared_type.is_null() {
        let nested = session.resolve_type(field.declared_type)?;
        collect_field_references(session, address, &nested, depth + 1, out, failures)?;
    }
    Ok(())
}
