use std::fmt::{self, Display};
use std::num::NonZero;

use crate::Bytes;

/// A power-of-two byte alignment.
///
/// Values that are not a power of two cannot be represented. Use [`Alignment::new()`] for runtime
/// values or the [`align!`][crate::align] macro for constants, which rejects invalid values at
/// compile time.
///
/// # Examples
///
/// ```
/// use tiered_memory::{Alignment, align};
///
/// assert_eq!(Alignment::new(64), Some(align!(64)));
/// assert_eq!(Alignment::new(48), None);
/// assert_eq!(Alignment::of::<u64>().get(), align_of::<u64>());
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Alignment(NonZero<usize>);

impl Alignment {
    /// Byte alignment, which every address satisfies.
    pub const MIN: Self = Self(NonZero::<usize>::MIN);

    /// The default alignment of allocations when the caller does not specify one.
    ///
    /// This is the largest alignment any fundamental type requires on the supported targets.
    pub const DEFAULT: Self = crate::align!(16);

    /// Creates an alignment, returning `None` if `value` is not a power of two.
    #[must_use]
    pub const fn new(value: usize) -> Option<Self> {
        if !value.is_power_of_two() {
            return None;
        }

        match NonZero::new(value) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// The alignment required by the type `T`.
    #[must_use]
    pub const fn of<T>() -> Self {
        match Self::new(align_of::<T>()) {
            Some(alignment) => alignment,
            None => panic!("type alignment is always a power of two"),
        }
    }

    /// The alignment in bytes.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0.get()
    }

    /// The alignment as a byte count.
    #[must_use]
    pub const fn as_bytes(self) -> Bytes {
        Bytes::from_usize(self.get())
    }

    /// The stricter of two alignments.
    #[must_use]
    pub const fn max(self, other: Self) -> Self {
        if self.get() >= other.get() {
            self
        } else {
            other
        }
    }

    /// Mask of the low bits that must be zero in an aligned address.
    #[must_use]
    pub(crate) const fn mask(self) -> usize {
        self.get().wrapping_sub(1)
    }

    /// Rounds `value` up to the next multiple of the alignment, returning `None` on overflow.
    #[must_use]
    pub(crate) const fn checked_align_up(self, value: usize) -> Option<usize> {
        match value.checked_add(self.mask()) {
            Some(bumped) => Some(bumped & !self.mask()),
            None => None,
        }
    }

    /// Rounds `value` down to the previous multiple of the alignment.
    #[must_use]
    pub(crate) const fn align_down(self, value: usize) -> usize {
        value & !self.mask()
    }

    /// Whether `value` is a multiple of the alignment.
    #[must_use]
    pub(crate) const fn is_aligned(self, value: usize) -> bool {
        value & self.mask() == 0
    }
}

impl Default for Alignment {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_bytes())
    }
}

impl From<Alignment> for usize {
    fn from(value: Alignment) -> Self {
        value.get()
    }
}

/// Creates an [`Alignment`][crate::Alignment] constant from an expression, failing the build if
/// the value is not a power of two.
///
/// ```
/// use tiered_memory::align;
///
/// let cache_line = align!(64);
/// assert_eq!(cache_line.get(), 64);
/// ```
#[macro_export]
macro_rules! align {
    ($x:expr) => {
        const { $crate::Alignment::new($x).expect("alignment must be a power of two") }
    };
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_powers_of_two() {
        assert_eq!(Alignment::new(0), None);
        assert_eq!(Alignment::new(3), None);
        assert_eq!(Alignment::new(24), None);
        assert_eq!(Alignment::new(usize::MAX), None);
    }

    #[test]
    fn accepts_powers_of_two() {
        for shift in 0..usize::BITS {
            let value = 1_usize << shift;
            assert_eq!(Alignment::new(value).map(Alignment::get), Some(value));
        }
    }

    #[test]
    fn const_macro() {
        const PAGE: Alignment = align!(4096);

        assert_eq!(PAGE.get(), 4096);
        assert_eq!(PAGE.as_bytes(), Bytes::kib(4));
    }

    #[test]
    fn of_type() {
        assert_eq!(Alignment::of::<u8>(), Alignment::MIN);
        assert_eq!(Alignment::of::<u32>().get(), 4);
    }

    #[test]
    fn max_picks_stricter() {
        assert_eq!(align!(8).max(align!(32)), align!(32));
        assert_eq!(align!(32).max(align!(8)), align!(32));
    }

    #[test]
    fn rounding_preserves_power_of_two() {
        let alignment = align!(16);

        assert_eq!(alignment.checked_align_up(0), Some(0));
        assert_eq!(alignment.checked_align_up(1), Some(16));
        assert_eq!(alignment.checked_align_up(16), Some(16));
        assert_eq!(alignment.checked_align_up(usize::MAX), None);
        assert_eq!(alignment.align_down(31), 16);
        assert!(alignment.is_aligned(48));
        assert!(!alignment.is_aligned(50));
    }

    #[test]
    fn displays_as_bytes() {
        assert_eq!(align!(64).to_string(), "64 B");
        assert_eq!(align!(4096).to_string(), "4 KiB");
    }
}
