use std::fmt::{self, Display};
use std::ops::{Div, Mul, Neg};
use std::str::FromStr;

use derive_more::{Add, AddAssign, Sub, SubAssign, Sum};

use crate::Error;

const KIB: isize = 1024;
const MIB: isize = KIB * 1024;
const GIB: isize = MIB * 1024;
// Does not fit into `isize` on 32-bit targets.
const TIB: Option<isize> = GIB.checked_mul(1024);

/// A signed quantity of bytes.
///
/// Byte counts can be added to and subtracted from each other, and scaled by plain integers.
/// Adding a plain integer to a byte count is not possible without first turning the integer into
/// a byte count via [`Bytes::new()`] or one of the unit factories.
///
/// # Examples
///
/// ```
/// use tiered_memory::Bytes;
///
/// let chunk = Bytes::kib(64);
/// let header = Bytes::new(48);
///
/// assert_eq!(chunk + header, Bytes::new(65_584));
/// assert_eq!(chunk * 2, Bytes::kib(128));
/// assert_eq!("64 KiB".parse::<Bytes>().unwrap(), chunk);
/// ```
#[derive(
    Add,
    AddAssign,
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Sub,
    SubAssign,
    Sum,
)]
pub struct Bytes(isize);

impl Bytes {
    /// Zero bytes.
    pub const ZERO: Self = Self(0);

    /// Creates a byte count from a raw number of bytes.
    #[must_use]
    pub const fn new(value: isize) -> Self {
        Self(value)
    }

    /// Creates a byte count from a number of kibibytes (1024 bytes).
    #[must_use]
    pub const fn kib(value: isize) -> Self {
        Self(value * KIB)
    }

    /// Creates a byte count from a number of mebibytes (1024 KiB).
    #[must_use]
    pub const fn mib(value: isize) -> Self {
        Self(value * MIB)
    }

    /// Creates a byte count from a number of gibibytes (1024 MiB).
    #[must_use]
    pub const fn gib(value: isize) -> Self {
        Self(value * GIB)
    }

    /// Creates a byte count from a number of tebibytes (1024 GiB).
    ///
    /// # Panics
    ///
    /// Panics if a tebibyte does not fit into `isize`, as on 32-bit targets.
    #[must_use]
    pub const fn tib(value: isize) -> Self {
        match TIB {
            Some(unit) => Self(value * unit),
            None => panic!("a tebibyte does not fit into isize on this target"),
        }
    }

    /// Creates a byte count from an unsigned size, as used by slices and layouts.
    ///
    /// # Panics
    ///
    /// Panics if the size does not fit into `isize`. No real allocation can be that large.
    #[must_use]
    #[expect(clippy::cast_possible_wrap, reason = "guarded by the assertion")]
    pub const fn from_usize(value: usize) -> Self {
        assert!(value <= isize::MAX as usize, "byte count overflows isize");

        Self(value as isize)
    }

    /// The raw number of bytes.
    #[must_use]
    pub const fn get(self) -> isize {
        self.0
    }

    /// The number of bytes as an unsigned size, or `None` if the count is negative.
    #[must_use]
    #[expect(clippy::cast_sign_loss, reason = "checked to be non-negative")]
    pub const fn to_usize(self) -> Option<usize> {
        if self.0 < 0 {
            None
        } else {
            Some(self.0 as usize)
        }
    }

    /// Whether this is exactly zero bytes.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Whether this is a negative byte count.
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Adds two byte counts, returning `None` on overflow.
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Subtracts a byte count, returning `None` on overflow.
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Multiplies by a plain integer, returning `None` on overflow.
    #[must_use]
    pub const fn checked_mul(self, factor: isize) -> Option<Self> {
        match self.0.checked_mul(factor) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }
}

impl Mul<isize> for Bytes {
    type Output = Self;

    fn mul(self, rhs: isize) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Mul<Bytes> for isize {
    type Output = Bytes;

    fn mul(self, rhs: Bytes) -> Self::Output {
        Bytes(self * rhs.0)
    }
}

impl Div<isize> for Bytes {
    type Output = Self;

    #[expect(
        clippy::integer_division,
        reason = "byte counts are whole numbers, truncation is the expected behavior"
    )]
    fn div(self, rhs: isize) -> Self::Output {
        Self(self.0 / rhs)
    }
}

/// Dividing two byte counts yields how many times one fits into the other.
impl Div for Bytes {
    type Output = isize;

    #[expect(
        clippy::integer_division,
        reason = "byte counts are whole numbers, truncation is the expected behavior"
    )]
    fn div(self, rhs: Self) -> Self::Output {
        self.0 / rhs.0
    }
}

impl Neg for Bytes {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.0;

        if value != 0 {
            let units = [(TIB, "TiB"), (Some(GIB), "GiB"), (Some(MIB), "MiB"), (Some(KIB), "KiB")];

            for (unit, suffix) in units {
                let Some(unit) = unit else {
                    continue;
                };

                if let (Some(0), Some(whole)) = (value.checked_rem(unit), value.checked_div(unit)) {
                    return write!(f, "{whole} {suffix}");
                }
            }
        }

        write!(f, "{value} B")
    }
}

impl FromStr for Bytes {
    type Err = Error;

    /// Parses a byte count such as `4096`, `512 B`, `16KiB` or `1 MiB`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();

        let digits_end = trimmed
            .char_indices()
            .find(|(index, c)| !(c.is_ascii_digit() || (*index == 0 && *c == '-')))
            .map_or(trimmed.len(), |(index, _)| index);

        let (number, suffix) = trimmed.split_at(digits_end);

        let number = number.parse::<isize>().map_err(|inner| {
            Error::invalid_bytes(
                s,
                format!("could not parse '{number}' as an integer: {inner}"),
            )
        })?;

        let multiplier = match suffix.trim() {
            "" | "B" => 1,
            "KiB" => KIB,
            "MiB" => MIB,
            "GiB" => GIB,
            "TiB" => TIB.ok_or_else(|| {
                Error::invalid_bytes(s, "a tebibyte does not fit into isize".to_string())
            })?,
            other => {
                return Err(Error::invalid_bytes(
                    s,
                    format!("unknown unit '{other}', expected one of B, KiB, MiB, GiB or TiB"),
                ));
            }
        };

        Self::new(number)
            .checked_mul(multiplier)
            .ok_or_else(|| Error::invalid_bytes(s, "value does not fit into isize".to_string()))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn unit_factories() {
        assert_eq!(Bytes::kib(1).get(), 1024);
        assert_eq!(Bytes::mib(1), Bytes::kib(1024));
        assert_eq!(Bytes::gib(1), Bytes::mib(1024));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn tebibytes() {
        assert_eq!(Bytes::tib(2), Bytes::gib(2048));
        assert_eq!(Bytes::tib(3).to_string(), "3 TiB");
    }

    #[test]
    #[cfg(target_pointer_width = "32")]
    fn tebibytes_do_not_fit() {
        let error = "1 TiB".parse::<Bytes>().unwrap_err();
        assert!(error.to_string().contains("1 TiB"));

        assert_eq!(Bytes::gib(1).to_string(), "1 GiB");
    }

    #[test]
    fn arithmetic() {
        let mut total = Bytes::kib(4);
        total += Bytes::new(10);
        total -= Bytes::new(20);

        assert_eq!(total, Bytes::new(4086));
        assert_eq!(Bytes::kib(8) / 2, Bytes::kib(4));
        assert_eq!(Bytes::kib(8) / Bytes::kib(2), 4);
        assert_eq!(3 * Bytes::new(5), Bytes::new(15));
        assert_eq!(-Bytes::new(5), Bytes::new(-5));
        assert_eq!(
            [Bytes::new(1), Bytes::new(2), Bytes::new(3)].into_iter().sum::<Bytes>(),
            Bytes::new(6)
        );
    }

    #[test]
    fn checked_arithmetic() {
        assert_eq!(Bytes::new(isize::MAX).checked_add(Bytes::new(1)), None);
        assert_eq!(Bytes::new(isize::MIN).checked_sub(Bytes::new(1)), None);
        assert_eq!(Bytes::new(isize::MAX).checked_mul(2), None);
        assert_eq!(Bytes::new(2).checked_mul(3), Some(Bytes::new(6)));
    }

    #[test]
    fn usize_conversions() {
        assert_eq!(Bytes::from_usize(123).to_usize(), Some(123));
        assert_eq!(Bytes::new(-1).to_usize(), None);
        assert!(Bytes::ZERO.is_zero());
        assert!(Bytes::new(-1).is_negative());
    }

    #[test]
    #[should_panic]
    fn from_usize_overflow_panics() {
        _ = Bytes::from_usize(usize::MAX);
    }

    #[test]
    fn display_uses_largest_exact_unit() {
        assert_eq!(Bytes::kib(64).to_string(), "64 KiB");
        assert_eq!(Bytes::mib(3).to_string(), "3 MiB");
        assert_eq!(Bytes::new(1025).to_string(), "1025 B");
        assert_eq!(Bytes::ZERO.to_string(), "0 B");
        assert_eq!(Bytes::gib(-2).to_string(), "-2 GiB");
    }

    #[test]
    fn parse_accepts_units() {
        assert_eq!("4096".parse::<Bytes>().unwrap(), Bytes::new(4096));
        assert_eq!("512 B".parse::<Bytes>().unwrap(), Bytes::new(512));
        assert_eq!("16KiB".parse::<Bytes>().unwrap(), Bytes::kib(16));
        assert_eq!(" 1 MiB ".parse::<Bytes>().unwrap(), Bytes::mib(1));
        assert_eq!("2GiB".parse::<Bytes>().unwrap(), Bytes::gib(2));
    }

    #[test]
    fn parse_rejects_garbage() {
        "".parse::<Bytes>().unwrap_err();
        "KiB".parse::<Bytes>().unwrap_err();
        "12 kb".parse::<Bytes>().unwrap_err();
        "9999999999999 TiB".parse::<Bytes>().unwrap_err();
    }
}
