use std::fmt;
use std::ops::{Add, Sub};

use crate::{Alignment, Bytes};

macro_rules! address_type {
    ($name:ident, $permission:literal) => {
        #[doc = concat!("A ", $permission, " address in the process address space.")]
        ///
        /// Addresses are plain numbers used for arithmetic and diagnostics. They carry no pointer
        /// provenance and cannot be dereferenced. Memory is accessed through byte spans.
        #[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $name(usize);

        impl $name {
            /// Creates an address from its numeric value.
            #[must_use]
            pub const fn new(value: usize) -> Self {
                Self(value)
            }

            /// The numeric value of the address.
            #[must_use]
            pub const fn get(self) -> usize {
                self.0
            }

            /// Rounds the address up to the next multiple of `alignment`.
            ///
            /// # Panics
            ///
            /// Panics if the rounded address does not fit into the address space.
            #[must_use]
            pub fn align_up(self, alignment: Alignment) -> Self {
                Self(
                    alignment
                        .checked_align_up(self.0)
                        .expect("aligned address overflows the address space"),
                )
            }

            /// Rounds the address down to the previous multiple of `alignment`.
            #[must_use]
            pub const fn align_down(self, alignment: Alignment) -> Self {
                Self(alignment.align_down(self.0))
            }

            /// Whether the address is a multiple of `alignment`.
            #[must_use]
            pub const fn is_aligned(self, alignment: Alignment) -> bool {
                alignment.is_aligned(self.0)
            }

            /// Offsets the address by a (possibly negative) byte count, returning `None` if the
            /// result falls outside the address space.
            #[must_use]
            pub const fn checked_offset(self, offset: Bytes) -> Option<Self> {
                match self.0.checked_add_signed(offset.get()) {
                    Some(value) => Some(Self(value)),
                    None => None,
                }
            }
        }

        impl Add<Bytes> for $name {
            type Output = Self;

            fn add(self, rhs: Bytes) -> Self::Output {
                self.checked_offset(rhs)
                    .expect("address offset overflows the address space")
            }
        }

        impl Sub<Bytes> for $name {
            type Output = Self;

            fn sub(self, rhs: Bytes) -> Self::Output {
                self.checked_offset(-rhs)
                    .expect("address offset overflows the address space")
            }
        }

        impl Sub for $name {
            type Output = Bytes;

            #[expect(
                clippy::cast_possible_wrap,
                reason = "a distance inside one address space always fits into isize"
            )]
            fn sub(self, rhs: Self) -> Self::Output {
                Bytes::new(self.0.wrapping_sub(rhs.0) as isize)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

address_type!(Address, "read-only");
address_type!(RwAddress, "read-write");

impl Address {
    /// The address a pointer points at.
    #[must_use]
    pub fn of<T: ?Sized>(ptr: *const T) -> Self {
        Self(ptr.cast::<u8>().addr())
    }

    /// Re-exposes the address as read-write.
    ///
    /// This is the documented escape hatch for memory that was originally handed out as writable
    /// and was later narrowed to a read-only view. It does not grant any access by itself.
    #[must_use]
    pub const fn into_read_write(self) -> RwAddress {
        RwAddress(self.0)
    }
}

impl RwAddress {
    /// The address a pointer points at.
    #[must_use]
    pub fn of<T: ?Sized>(ptr: *mut T) -> Self {
        Self(ptr.cast::<u8>().addr())
    }
}

impl From<RwAddress> for Address {
    fn from(value: RwAddress) -> Self {
        Self(value.0)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::align;

    #[test]
    fn offsets() {
        let base = Address::new(0x1000);

        assert_eq!(base + Bytes::new(0x10), Address::new(0x1010));
        assert_eq!(base - Bytes::new(0x10), Address::new(0xff0));
        assert_eq!(base.checked_offset(Bytes::new(-0x2000)), None);
    }

    #[test]
    fn alignment() {
        let address = RwAddress::new(0x1234);

        assert_eq!(address.align_up(align!(0x100)), RwAddress::new(0x1300));
        assert_eq!(address.align_down(align!(0x100)), RwAddress::new(0x1200));
        assert!(!address.is_aligned(align!(8)));
        assert!(address.is_aligned(align!(4)));
        assert_eq!(address.align_up(Alignment::MIN), address);
    }

    #[test]
    fn difference_is_signed() {
        let low = Address::new(0x1000);
        let high = Address::new(0x1800);

        assert_eq!(high - low, Bytes::new(0x800));
        assert_eq!(low - high, Bytes::new(-0x800));
    }

    #[test]
    fn read_write_narrows_to_read_only() {
        let writable = RwAddress::new(0x40);
        let readable: Address = writable.into();

        assert_eq!(readable.get(), 0x40);
        assert_eq!(readable.into_read_write(), writable);
    }

    #[test]
    fn of_pointer() {
        let value = 5_u64;
        let ptr = &raw const value;

        assert_eq!(Address::of(ptr).get(), ptr.addr());
        assert!(Address::of(ptr).is_aligned(Alignment::of::<u64>()));
    }

    #[test]
    fn formatting() {
        assert_eq!(format!("{:?}", Address::new(0x10)), "Address(0x10)");
        assert_eq!(RwAddress::new(0x10).to_string(), "0x10");
    }
}
