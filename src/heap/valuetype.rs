use std::fmt;

use uguid::Guid;
use widestring::U16String;

use super::{access::FieldAccess, ClrObject, Primitive};
use crate::{
    address::Address,
    session::Session,
    typesystem::{ClrTypeRc, ElementKind},
    Error, Result,
};

/// A view over the bytes of a value-type instance.
///
/// Value types have no heap identity of their own. An *interior* view points directly at the
/// field data, as found inside an object, array or another value type. A non-interior view
/// points at a boxed instance whose field data starts one pointer further, like any object.
#[derive(Clone)]
pub struct ClrValueType<'s> {
    session: &'s Session,
    address: Address,
    ty: ClrTypeRc,
    interior: bool,
}

impl<'s> ClrValueType<'s> {
    pub(crate) fn interior(session: &'s Session, address: Address, ty: ClrTypeRc) -> Self {
        ClrValueType {
            session,
            address,
            ty,
            interior: true,
        }
    }

    /// View a boxed value type at `address`.
    #[must_use]
    pub fn boxed(session: &'s Session, address: Address, ty: ClrTypeRc) -> Self {
        ClrValueType {
            session,
            address,
            ty,
            interior: false,
        }
    }

    /// The view's address.
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// The value's type.
    #[must_use]
    pub fn ty(&self) -> &ClrTypeRc {
        &self.ty
    }

    /// Returns `true` if the address points directly at the field data.
    #[must_use]
    pub fn is_interior(&self) -> bool {
        self.interior
    }

    /// Address of the first byte of field data.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotMapped`] if the address arithmetic overflows.
    pub fn data_address(&self) -> Result<Address> {
        if self.interior {
            Ok(self.address)
        } else {
            self.address.offset(self.session.layout().pointer_bytes())
        }
    }

    fn fields(&self) -> Result<FieldAccess<'s, '_>> {
        Ok(FieldAccess {
            session: self.session,
            data: self.data_address()?,
            ty: &self.ty,
        })
    }

    /// Read a primitive field. See [`ClrObject::read_field`].
    ///
    /// # Errors
    /// Returns [`crate::Error::FieldNotFound`] or [`crate::Error::TypeMismatch`].
    pub fn read_field<T: Primitive>(&self, name: &str) -> Result<T> {
        self.fields()?.read(name)
    }

    /// Read a `String` field. See [`ClrObject::read_string_field`].
    ///
    /// # Errors
    /// Returns [`crate::Error::NullReference`] if the field holds null.
    pub fn read_string_field(&self, name: &str) -> Result<String> {
        self.fields()?
            .string_utf16(name)?
            .map(|units| units.to_string_lossy())
            .ok_or(Error::NullReference)
    }

    /// Read a `String` field as UTF-16 code units, `None` if it holds null.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeMismatch`] if the field is not a string.
    pub fn read_string_field_utf16(&self, name: &str) -> Result<Option<U16String>> {
        self.fields()?.string_utf16(name)
    }

    /// Follow a reference field. See [`ClrObject::read_object_field`].
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeMismatch`] if the field is not a reference.
    pub fn read_object_field(&self, name: &str) -> Result<ClrObject<'s>> {
        self.fields()?.object(name)
    }

    /// View a nested value-type field.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeMismatch`] if the field is not a value type.
    pub fn read_value_type_field(&self, name: &str) -> Result<ClrValueType<'s>> {
        self.fields()?.value_type(name)
    }

    /// Read an enum field. See [`ClrObject::read_enum_field`].
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeMismatch`] if the field is not integral.
    pub fn read_enum_field<E: From<i64>>(&self, name: &str) -> Result<E> {
        self.fields()?.enum_value(name).map(E::from)
    }

    /// Read a pointer-sized field.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeMismatch`] for non-pointer kinds.
    pub fn read_pointer_field(&self, name: &str) -> Result<Address> {
        self.fields()?.pointer(name)
    }

    /// Raw field data of the value.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotMapped`] if the bytes are not backed.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        self.session
            .source()
            .read_bytes(self.data_address()?, self.ty.field_data_size as usize)
    }

    /// Decode a `System.Guid` value.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeMismatch`] if the value is not a 16-byte `System.Guid`.
    pub fn read_guid(&self) -> Result<Guid> {
        if self.ty.name != "System.Guid" || self.ty.field_data_size != 16 {
            return Err(Error::TypeMismatch {
                field: self.ty.name.clone(),
                expected: ElementKind::ValueType,
                actual: self.ty.kind,
            });
        }

        let mut bytes = [0u8; 16];
        self.session.source().read(self.data_address()?, &mut bytes)?;
        Ok(Guid::from_bytes(bytes))
    }
}

impl fmt::Debug for ClrValueType<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClrValueType")
            .field("address", &self.address)
            .field("type", &self.ty.name)
            .field("interior", &self.interior)
            .finish()
    }
}
