use thiserror::Error;

use crate::{address::Address, typesystem::ElementKind};

macro_rules! corrupt_metadata {
    // Single string version
    ($msg:expr) => {
        crate::Error::CorruptMetadata {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::CorruptMetadata {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into two groups. Caller errors ([`Error::FieldNotFound`], [`Error::TypeMismatch`],
/// [`Error::NullReference`], [`Error::IndexOutOfRange`]) mean the request itself cannot be
/// satisfied for this object and retrying will not help. Data errors ([`Error::NotMapped`],
/// [`Error::CorruptMetadata`]) describe the snapshot: they are scoped to a single object or type,
/// and bulk operations such as [`crate::HeapEnumerator`] and [`crate::GraphWalker`] count them
/// and continue instead of failing the whole pass.
///
/// # Error Categories
///
/// ## Field Access Errors
/// - [`Error::FieldNotFound`] - The type has no instance field with the requested name
/// - [`Error::TypeMismatch`] - The field exists but its declared kind does not match the decode
/// - [`Error::NullReference`] - A read was attempted through a null object
/// - [`Error::IndexOutOfRange`] - An array element index exceeded the array length
///
/// ## Snapshot Errors
/// - [`Error::NotMapped`] - The address range is not backed by the memory source
/// - [`Error::CorruptMetadata`] - A type descriptor or object header could not be decoded
/// - [`Error::OutOfBounds`] - A decode ran past the end of a fetched byte buffer
/// - [`Error::RecursionLimit`] - A parent chain or value-type nesting exceeded its limit
///
/// ## Session Errors
/// - [`Error::InvalidSegment`] - The segment list handed to a session is inconsistent
/// - [`Error::InvalidConfig`] - The [`crate::HeapConfig`] failed validation
/// - [`Error::FileError`] - An image file could not be opened or mapped
///
/// # Examples
///
/// ```rust,no_run
/// use heapscope::{Error, Session};
///
/// # fn inspect(session: &Session) -> heapscope::Result<()> {
/// let object = session.get_object(0x0000_0000_03d7_2000.into())?;
/// match object.read_field::<i32>("_count") {
///     Ok(count) => println!("count = {count}"),
///     Err(Error::FieldNotFound { type_name, .. }) => println!("{type_name} has no _count"),
///     Err(Error::TypeMismatch { actual, .. }) => println!("_count is a {actual}"),
///     Err(e) => return Err(e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The requested field does not exist on the type.
    ///
    /// Field names are matched exactly against the instance fields of the resolved type,
    /// including inherited ones. This is always a caller error.
    #[error("Type '{type_name}' has no instance field named '{field}'")]
    FieldNotFound {
        /// Name of the type that was searched
        type_name: String,
        /// The field name that was requested
        field: String,
    },

    /// The field exists but its declared kind does not match the requested decode.
    ///
    /// No implicit widening is performed: reading an `I4` field as `i64` fails with this error.
    #[error("Field '{field}' is declared as {actual}, but was read as {expected}")]
    TypeMismatch {
        /// The field name
        field: String,
        /// The kind the caller asked for
        expected: ElementKind,
        /// The kind declared by the type
        actual: ElementKind,
    },

    /// The address range is not backed by the memory source.
    ///
    /// This is reported for unmapped regions of a dump as well as for pointers that lead
    /// outside the captured memory. The associated [`Address`] is the start of the failed read.
    #[error("Address {0} is not mapped in the target")]
    NotMapped(Address),

    /// A type descriptor or object header could not be decoded.
    ///
    /// The error includes the source location where the inconsistency was detected.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what could not be decoded
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Corrupt metadata - {file}:{line}: {message}")]
    CorruptMetadata {
        /// The message to be printed for the CorruptMetadata error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A field or element was read through the null object.
    #[error("Attempted to read through a null object reference")]
    NullReference,

    /// An array element index exceeded the array length.
    #[error("Index {index} is out of range for an array of length {length}")]
    IndexOutOfRange {
        /// The requested index
        index: usize,
        /// The length of the array
        length: usize,
    },

    /// An out of bound access was attempted while decoding a byte buffer.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// The segment list describing the heap is inconsistent.
    ///
    /// Raised once by [`crate::Session::attach`], for example when a segment's allocation
    /// pointer lies before its start.
    #[error("Invalid heap segment - {0}")]
    InvalidSegment(String),

    /// The heap configuration failed validation.
    #[error("Invalid configuration - {0}")]
    InvalidConfig(String),

    /// Recursion limit reached.
    ///
    /// Parent chains and value-type nesting are followed iteratively up to a configured depth.
    /// Exceeding it usually means the descriptors form a cycle.
    ///
    /// The associated value shows the limit that was reached.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// File I/O error.
    ///
    /// Wraps standard I/O errors raised while opening or mapping an image file.
    #[error("{0}")]
    FileError(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` for errors that describe the snapshot rather than the request.
    ///
    /// Bulk operations use this to decide whether an item can be skipped.
    #[must_use]
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Error::NotMapped(_)
                | Error::CorruptMetadata { .. }
                | Error::OutOfBounds
                | Error::RecursionLimit(_)
        )
    }
}
