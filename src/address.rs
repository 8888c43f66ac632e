//! Target virtual addresses.
//!
//! [`Address`] is the currency of the whole crate: every object, type descriptor, field and
//! segment boundary is identified by one. Addresses are plain 64-bit values in the target's
//! address space at snapshot time; they never refer to host memory. Arithmetic on them is
//! checked, because a corrupt header can easily produce an offset that wraps.

use std::fmt;

use crate::{Error, Result};

/// A location in the target's virtual address space.
///
/// Two addresses compare equal iff their numeric values are equal. The formatting
/// implementations print the value as `0x`-prefixed lower-case hex.
///
/// # Examples
///
/// ```rust
/// use heapscope::Address;
///
/// let object = Address::new(0x3d7_26e0);
/// assert_eq!(object.offset(8).unwrap(), Address::new(0x3d7_26e8));
/// assert_eq!(Address::new(0x1001).align_up(8).unwrap(), Address::new(0x1008));
/// assert_eq!(format!("{object}"), "0x3d726e0");
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u64);

impl Address {
    /// The null address.
    pub const NULL: Address = Address(0);

    /// Create a new address from its numeric value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Address(value)
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Returns `true` if this is the null address.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns the address `delta` bytes further.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotMapped`] if the addition overflows the address space.
    pub fn offset(self, delta: u64) -> Result<Address> {
        self.0
            .checked_add(delta)
            .map(Address)
            .ok_or(Error::NotMapped(self))
    }

    /// Rounds the address up to the next multiple of `alignment`.
    ///
    /// `alignment` must be a power of two.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotMapped`] if rounding overflows the address space.
    pub fn align_up(self, alignment: u64) -> Result<Address> {
        align_up(self.0, alignment).map(Address).ok_or(Error::NotMapped(self))
    }

    /// Returns the distance from `base` to `self`, or `None` if `self` lies below `base`.
    #[must_use]
    pub fn distance_from(self, base: Address) -> Option<u64> {
        self.0.checked_sub(base.0)
    }
}

/// Rounds `value` up to a multiple of the power-of-two `alignment`.
///
/// Returns `None` on overflow.
#[must_use]
pub fn align_up(value: u64, alignment: u64) -> Option<u64> {
    debug_assert!(alignment.is_power_of_two());
    let mask = alignment - 1;
    value.checked_add(mask).map(|v| v & !mask)
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Address(value)
    }
}

impl From<Address> for u64 {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::UpperHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_overflow() {
        assert!(Address::new(u64::MAX).offset(1).is_err());
        assert_eq!(Address::new(0x10).offset(0x10).unwrap(), Address::new(0x20));
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), Some(0));
        assert_eq!(align_up(1, 8), Some(8));
        assert_eq!(align_up(8, 8), Some(8));
        assert_eq!(align_up(310, 8), Some(312));
        assert_eq!(align_up(u64::MAX, 8), None);
    }

    #[test]
    fn test_distance() {
        let base = Address::new(0x1000);
        assert_eq!(Address::new(0x1018).distance_from(base), Some(0x18));
        assert_eq!(Address::new(0x0ff8).distance_from(base), None);
    }

    #[test]
    fn test_formatting() {
        let address = Address::new(0x3D7A_B10);
        assert_eq!(address.to_string(), "0x3d7ab10");
        assert_eq!(format!("{address:016X}"), "0000000003D7AB10");
        assert!(Address::NULL.is_null());
    }
}
