use std::convert;
use std::fmt;
use std::ptr::{self, NonNull};
use std::slice;

use bytemuck::{AnyBitPattern, NoUninit, Pod};

use crate::{Address, Alignment, Bytes, RwAddress};

macro_rules! span_type {
    ($name:ident, $ptr:ty, $to_mut:expr, $address:ident) => {
        impl $name {
            /// A span of zero bytes that does not point anywhere.
            ///
            /// Allocation failures are signaled by returning this value.
            #[must_use]
            pub const fn empty() -> Self {
                Self {
                    start: ptr::null_mut(),
                    len: 0,
                }
            }

            /// Creates a span of `len` bytes starting at `start`.
            ///
            /// Creating a span grants no access to the memory. Reading or writing the bytes is
            /// only possible through `unsafe` methods whose callers vouch for the memory.
            ///
            /// # Panics
            ///
            /// Panics if `len` is negative or if the span would extend past the end of the
            /// address space.
            #[must_use]
            pub fn new(start: $ptr, len: Bytes) -> Self {
                let len = len.to_usize().expect("span length must not be negative");

                assert!(
                    start.addr().checked_add(len).is_some(),
                    "span must not extend past the end of the address space"
                );

                Self::from_raw_parts(start, len)
            }

            pub(crate) fn from_raw_parts(start: $ptr, len: usize) -> Self {
                debug_assert!(start.addr().checked_add(len).is_some());

                Self {
                    start: $to_mut(start),
                    len,
                }
            }

            /// The first byte of the span.
            #[must_use]
            pub fn start(self) -> $ptr {
                self.start
            }

            /// One past the last byte of the span.
            #[must_use]
            pub fn end(self) -> $ptr {
                self.start.wrapping_add(self.len)
            }

            /// The address of the first byte of the span.
            #[must_use]
            pub fn address(self) -> $address {
                $address::new(self.start.addr())
            }

            /// The address one past the last byte of the span.
            #[must_use]
            pub fn end_address(self) -> $address {
                $address::new(self.end().addr())
            }

            /// The length of the span.
            #[must_use]
            pub const fn len(self) -> Bytes {
                Bytes::from_usize(self.len)
            }

            /// The length of the span as an unsigned size.
            #[must_use]
            pub const fn size(self) -> usize {
                self.len
            }

            /// Whether the span covers zero bytes.
            #[must_use]
            pub const fn is_empty(self) -> bool {
                self.len == 0
            }

            /// Whether the first byte of the span is aligned to `alignment`.
            #[must_use]
            pub fn is_aligned(self, alignment: Alignment) -> bool {
                alignment.is_aligned(self.start.addr())
            }

            /// Whether both endpoints of `inner` lie within this span.
            ///
            /// Containment is reflexive and transitive.
            #[must_use]
            pub fn contains(self, inner: impl Into<ByteSpan>) -> bool {
                let inner = inner.into();

                inner.start.addr() >= self.start.addr() && inner.end().addr() <= self.end().addr()
            }

            /// Advances the start of the span to the next multiple of `alignment`.
            ///
            /// Returns an empty span at the end of this span if no aligned byte remains.
            #[must_use]
            pub fn align(self, alignment: Alignment) -> Self {
                let skip = alignment
                    .checked_align_up(self.start.addr())
                    .map_or(usize::MAX, |aligned| aligned.wrapping_sub(self.start.addr()));

                self.skip(skip)
            }

            /// Truncates the length of the span down to a multiple of `alignment`.
            #[must_use]
            pub fn floor(self, alignment: Alignment) -> Self {
                Self {
                    start: self.start,
                    len: alignment.align_down(self.len),
                }
            }

            /// The first `len` bytes of the span, or the whole span if it is shorter.
            #[must_use]
            pub fn front(self, len: Bytes) -> Self {
                debug_assert!(!len.is_negative(), "span length must not be negative");

                Self {
                    start: self.start,
                    len: len.to_usize().unwrap_or(0).min(self.len),
                }
            }

            /// Removes the first `len` bytes of the span and returns them.
            ///
            /// If the span is shorter than `len`, the whole span is returned and this span
            /// becomes empty at its former end.
            pub fn pop_front(&mut self, len: Bytes) -> Self {
                let front = self.front(len);
                *self = self.skip(front.len);
                front
            }

            /// Splits the span into the first `len` bytes and the remainder.
            #[must_use]
            pub fn split_at(self, len: Bytes) -> (Self, Self) {
                let mut back = self;
                let front = back.pop_front(len);
                (front, back)
            }

            /// Reinterprets the span as a slice.
            ///
            /// # Safety
            ///
            /// The caller must guarantee that the span denotes initialized memory that is valid for
            /// reads for the lifetime `'a` and not written through any other path meanwhile.
            #[must_use]
            pub unsafe fn as_slice<'a>(self) -> &'a [u8] {
                if self.len == 0 {
                    return &[];
                }

                // SAFETY: Forwarding guarantees from the caller.
                unsafe { slice::from_raw_parts(self.start, self.len) }
            }

            /// Whether the two spans hold elementwise-equal bytes.
            ///
            /// Equal spans are always equivalent. Spans over different memory can be equivalent
            /// as well.
            ///
            /// # Safety
            ///
            /// Same as [`as_slice()`][Self::as_slice] for both spans.
            #[must_use]
            pub unsafe fn is_equivalent(self, other: impl Into<ByteSpan>) -> bool {
                let other = other.into();

                // SAFETY: Forwarding guarantees from the caller.
                let ours = unsafe { self.as_slice() };
                // SAFETY: Forwarding guarantees from the caller.
                let theirs = unsafe { other.as_slice() };

                ours == theirs
            }

            fn skip(self, len: usize) -> Self {
                let skipped = len.min(self.len);

                Self {
                    start: self.start.wrapping_add(skipped),
                    len: self.len.wrapping_sub(skipped),
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::empty()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("address", &self.address())
                    .field("len", &self.len)
                    .finish()
            }
        }

        // SAFETY: A span is a description of a memory range. Every way to access the memory is
        // `unsafe` and makes the caller responsible for synchronization.
        unsafe impl Send for $name {}
        // SAFETY: See above.
        unsafe impl Sync for $name {}
    };
}

/// A non-owning read-only view of a contiguous range of bytes.
///
/// Spans compare equal when they denote the same address range. Comparing the bytes themselves
/// is done via [`is_equivalent()`][Self::is_equivalent].
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct ByteSpan {
    // Stored as `*mut` so both span types share one implementation. Never written through.
    start: *mut u8,
    len: usize,
}

span_type!(ByteSpan, *const u8, <*const u8>::cast_mut, Address);

impl ByteSpan {
    /// A span over the bytes of a slice.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self::from_raw_parts(bytes.as_ptr(), bytes.len())
    }

    /// Re-exposes the span as writable.
    ///
    /// # Safety
    ///
    /// The span must have been narrowed from a [`RwByteSpan`] whose memory is still writable,
    /// and no shared reference to the memory may be alive while it is written through.
    #[must_use]
    pub const unsafe fn into_read_write(self) -> RwByteSpan {
        RwByteSpan {
            start: self.start,
            len: self.len,
        }
    }
}

/// A non-owning read-write view of a contiguous range of bytes.
///
/// This is what memory resources hand out. It converts into a [`ByteSpan`] for free, while the
/// reverse direction requires [`ByteSpan::into_read_write()`].
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct RwByteSpan {
    start: *mut u8,
    len: usize,
}

span_type!(RwByteSpan, *mut u8, convert::identity, RwAddress);

impl RwByteSpan {
    /// A span over the bytes of a mutable slice.
    #[must_use]
    pub fn from_slice(bytes: &mut [u8]) -> Self {
        Self::from_raw_parts(bytes.as_mut_ptr(), bytes.len())
    }

    /// The first byte of the span, or `None` for the empty failure span.
    #[must_use]
    pub fn as_non_null(self) -> Option<NonNull<u8>> {
        NonNull::new(self.start)
    }

    /// Narrows the span to read-only.
    #[must_use]
    pub const fn as_read_only(self) -> ByteSpan {
        ByteSpan {
            start: self.start,
            len: self.len,
        }
    }

    /// Reinterprets the span as a mutable slice.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that the span denotes initialized memory that is valid for
    /// reads and writes for the lifetime `'a` and that no other path accesses it meanwhile.
    #[must_use]
    pub unsafe fn as_mut_slice<'a>(self) -> &'a mut [u8] {
        if self.len == 0 {
            return &mut [];
        }

        // SAFETY: Forwarding guarantees from the caller.
        unsafe { slice::from_raw_parts_mut(self.start, self.len) }
    }

    /// Sets every byte of the span to `value`.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that the span is valid for writes and that no other path
    /// accesses it meanwhile.
    pub unsafe fn fill(self, value: u8) {
        if self.len == 0 {
            return;
        }

        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            self.start.write_bytes(value, self.len);
        }
    }
}

impl From<RwByteSpan> for ByteSpan {
    fn from(value: RwByteSpan) -> Self {
        value.as_read_only()
    }
}

/// A read-only span over the bytes of a value.
#[must_use]
pub fn bytes_of<T: NoUninit>(value: &T) -> ByteSpan {
    ByteSpan::from_slice(bytemuck::bytes_of(value))
}

/// A read-write span over the bytes of a value.
#[must_use]
pub fn bytes_of_mut<T: Pod>(value: &mut T) -> RwByteSpan {
    RwByteSpan::from_slice(bytemuck::bytes_of_mut(value))
}

/// Reinterprets the bytes of a span as a reference to `T`.
///
/// # Panics
///
/// Panics if the span is not exactly `size_of::<T>()` bytes long or not aligned for `T`.
///
/// # Safety
///
/// Same as [`ByteSpan::as_slice()`], for the lifetime `'a`.
#[must_use]
pub unsafe fn from_bytes<'a, T: AnyBitPattern>(span: impl Into<ByteSpan>) -> &'a T {
    // SAFETY: Forwarding guarantees from the caller.
    let bytes = unsafe { span.into().as_slice() };

    bytemuck::from_bytes(bytes)
}

/// Reinterprets the bytes of a span as a mutable reference to `T`.
///
/// # Panics
///
/// Panics if the span is not exactly `size_of::<T>()` bytes long or not aligned for `T`.
///
/// # Safety
///
/// Same as [`RwByteSpan::as_mut_slice()`], for the lifetime `'a`.
#[must_use]
pub unsafe fn from_bytes_mut<'a, T: Pod>(span: RwByteSpan) -> &'a mut T {
    // SAFETY: Forwarding guarantees from the caller.
    let bytes = unsafe { span.as_mut_slice() };

    bytemuck::from_bytes_mut(bytes)
}
