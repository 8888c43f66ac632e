//! Heap session configuration.
//!
//! Configuration is split in two:
//!
//! - [`RuntimeLayout`] - Binary geometry of the target runtime (pointer size, alignment,
//!   object header and array/string payload offsets)
//! - [`HeapConfig`] - Top-level container combining a layout with decode limits that guard
//!   against corrupt snapshots
//!
//! # Configuration Presets
//!
//! - [`HeapConfig::x64()`] / [`RuntimeLayout::x64()`] - 64-bit CLR, the default
//! - [`HeapConfig::x86()`] / [`RuntimeLayout::x86()`] - 32-bit CLR
//!
//! # Example
//!
//! ```rust
//! use heapscope::HeapConfig;
//!
//! // Use a preset
//! let config = HeapConfig::x64();
//!
//! // Or customize
//! let config = HeapConfig::x64()
//!     .with_max_string_length(4096)
//!     .with_max_nesting_depth(16);
//! assert!(config.validate().is_ok());
//! ```

use crate::{Error, Result};

/// Binary geometry of the target runtime's heap.
///
/// All offsets are relative to an object's address, which points at the object's type
/// descriptor pointer. The object header (sync block) lives at `address - pointer_size` and is
/// accounted for in every type's base size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeLayout {
    /// Size of a target pointer in bytes (4 or 8).
    pub pointer_size: usize,

    /// Alignment of objects on the small-object heap.
    pub object_alignment: u64,

    /// Alignment of objects on large-object and pinned segments.
    pub large_object_alignment: u64,

    /// Smallest possible object size, header included.
    ///
    /// Any computed size below this marks a corrupt header.
    pub min_object_size: u64,

    /// Offset of the `u32` element count of arrays and strings.
    pub length_offset: u64,

    /// Offset of the first UTF-16 code unit of a string.
    pub string_data_offset: u64,

    /// Offset of the first element of a single-dimensional array.
    pub array_data_offset: u64,

    /// Mask applied to the descriptor pointer read from an object.
    ///
    /// The collector keeps mark and pin bits in the low bits of that pointer.
    pub descriptor_mask: u64,
}

impl RuntimeLayout {
    /// Layout of the 64-bit CLR.
    #[must_use]
    pub fn x64() -> Self {
        RuntimeLayout {
            pointer_size: 8,
            object_alignment: 8,
            large_object_alignment: 8,
            min_object_size: 24,
            length_offset: 8,
            string_data_offset: 12,
            array_data_offset: 16,
            descriptor_mask: !0b11,
        }
    }

    /// Layout of the 32-bit CLR.
    #[must_use]
    pub fn x86() -> Self {
        RuntimeLayout {
            pointer_size: 4,
            object_alignment: 4,
            large_object_alignment: 8,
            min_object_size: 12,
            length_offset: 4,
            string_data_offset: 8,
            array_data_offset: 8,
            descriptor_mask: !0b11,
        }
    }

    /// Pointer size as a `u64`, for address arithmetic.
    #[must_use]
    pub fn pointer_bytes(&self) -> u64 {
        self.pointer_size as u64
    }

    /// Checks the layout for internal consistency.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidConfig`] describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.pointer_size != 4 && self.pointer_size != 8 {
            return Err(Error::InvalidConfig(format!(
                "pointer size must be 4 or 8, got {}",
                self.pointer_size
            )));
        }
        for (name, alignment) in [
            ("object_alignment", self.object_alignment),
            ("large_object_alignment", self.large_object_alignment),
        ] {
            if !alignment.is_power_of_two() {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be a power of two, got {alignment}"
                )));
            }
        }
        if self.min_object_size < 2 * self.pointer_bytes() {
            return Err(Error::InvalidConfig(format!(
                "min_object_size {} cannot hold a header and a descriptor pointer",
                self.min_object_size
            )));
        }
        if self.length_offset < self.pointer_bytes()
            || self.string_data_offset < self.length_offset + 4
            || self.array_data_offset < self.length_offset + 4
        {
            return Err(Error::InvalidConfig(
                "length and payload offsets overlap the descriptor pointer".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RuntimeLayout {
    fn default() -> Self {
        RuntimeLayout::x64()
    }
}

/// Complete configuration of a [`crate::Session`].
///
/// The limits exist because a snapshot may contain arbitrary garbage where a length or count
/// is expected; they bound how much memory a single corrupt header can make the engine read.
///
/// # Default Configuration
///
/// - 64-bit layout
/// - strings truncated after 1 Mi code units
/// - type names up to 4096 code units
/// - up to 4096 field-table entries per type
/// - value types nested up to 32 levels
/// - parent chains up to 64 levels
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeapConfig {
    /// Binary geometry of the target runtime.
    pub layout: RuntimeLayout,

    /// Maximum number of UTF-16 code units decoded from a string object.
    ///
    /// Longer strings are truncated to this length.
    pub max_string_length: usize,

    /// Maximum length of a type or field name; longer names mark a corrupt descriptor.
    pub max_name_length: usize,

    /// Maximum number of field-table entries per type descriptor.
    pub max_field_count: usize,

    /// Maximum nesting depth of inline value types followed while collecting references.
    pub max_nesting_depth: usize,

    /// Maximum length of a parent chain followed while merging inherited fields.
    pub max_parent_depth: usize,
}

impl HeapConfig {
    /// Creates a configuration with default values.
    ///
    /// Equivalent to [`HeapConfig::default()`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default limits for a 64-bit target.
    #[must_use]
    pub fn x64() -> Self {
        HeapConfig {
            layout: RuntimeLayout::x64(),
            max_string_length: 1 << 20,
            max_name_length: 4096,
            max_field_count: 4096,
            max_nesting_depth: 32,
            max_parent_depth: 64,
        }
    }

    /// Default limits for a 32-bit target.
    #[must_use]
    pub fn x86() -> Self {
        HeapConfig {
            layout: RuntimeLayout::x86(),
            ..HeapConfig::x64()
        }
    }

    /// Sets the runtime layout.
    ///
    /// # Returns
    ///
    /// Returns `self` for method chaining.
    #[must_use]
    pub fn with_layout(mut self, layout: RuntimeLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Sets the maximum decoded string length in code units.
    ///
    /// # Returns
    ///
    /// Returns `self` for method chaining.
    #[must_use]
    pub fn with_max_string_length(mut self, max: usize) -> Self {
        self.max_string_length = max;
        self
    }

    /// Sets the maximum type or field name length.
    #[must_use]
    pub fn with_max_name_length(mut self, max: usize) -> Self {
        self.max_name_length = max;
        self
    }

    /// Sets the maximum number of field-table entries per type.
    #[must_use]
    pub fn with_max_field_count(mut self, max: usize) -> Self {
        self.max_field_count = max;
        self
    }

    /// Sets the maximum value-type nesting depth.
    #[must_use]
    pub fn with_max_nesting_depth(mut self, max: usize) -> Self {
        self.max_nesting_depth = max;
        self
    }

    /// Sets the maximum parent-chain depth.
    #[must_use]
    pub fn with_max_parent_depth(mut self, max: usize) -> Self {
        self.max_parent_depth = max;
        self
    }

    /// Checks the configuration for internal consistency.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidConfig`] describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        self.layout.validate()?;
        if self.max_name_length == 0 {
            return Err(Error::InvalidConfig(
                "max_name_length must be at least 1".to_string(),
            ));
        }
        if self.max_parent_depth == 0 || self.max_nesting_depth == 0 {
            return Err(Error::InvalidConfig(
                "depth limits must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        HeapConfig::x64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        assert!(HeapConfig::x64().validate().is_ok());
        assert!(HeapConfig::x86().validate().is_ok());
        assert_eq!(HeapConfig::default(), HeapConfig::x64());
        assert_eq!(HeapConfig::x86().layout.pointer_size, 4);
    }

    #[test]
    fn test_builder_methods() {
        let config = HeapConfig::new()
            .with_max_string_length(16)
            .with_max_name_length(32)
            .with_max_field_count(8)
            .with_max_nesting_depth(2)
            .with_max_parent_depth(3)
            .with_layout(RuntimeLayout::x86());
        assert_eq!(config.max_string_length, 16);
        assert_eq!(config.max_name_length, 32);
        assert_eq!(config.max_field_count, 8);
        assert_eq!(config.max_nesting_depth, 2);
        assert_eq!(config.max_parent_depth, 3);
        assert_eq!(config.layout, RuntimeLayout::x86());
    }

    #[test]
    fn test_invalid_layouts() {
        let mut layout = RuntimeLayout::x64();
        layout.pointer_size = 6;
        assert!(matches!(layout.validate(), Err(Error::InvalidConfig(_))));

        let mut layout = RuntimeLayout::x64();
        layout.object_alignment = 12;
        assert!(layout.validate().is_err());

        let mut layout = RuntimeLayout::x64();
        layout.min_object_size = 8;
        assert!(layout.validate().is_err());

        let mut layout = RuntimeLayout::x64();
        layout.array_data_offset = 10;
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_invalid_limits() {
        assert!(HeapConfig::x64().with_max_parent_depth(0).validate().is_err());
        assert!(HeapConfig::x64().with_max_name_length(0).validate().is_err());
    }
}
