//! Reserving address space and moving its pages between the reserved and committed states.
//!
//! The page size and allocation granularity are queried from the operating system on first use
//! and cached for the lifetime of the process.

use std::fmt;
use std::ptr::NonNull;

use tracing::{debug, trace, warn};

use crate::pal::{Platform, PlatformFacade};
use crate::{Alignment, ByteSpan, Bytes, RwAddress, RwByteSpan};

/// The size of a virtual memory page.
#[must_use]
pub fn page_size() -> Bytes {
    Bytes::from_usize(PlatformFacade::target().page_size())
}

/// The unit in which the operating system hands out address space. A multiple of the page size.
#[must_use]
pub fn allocation_granularity() -> Bytes {
    Bytes::from_usize(PlatformFacade::target().allocation_granularity())
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Rounding {
    /// Grow the range to the enclosing pages.
    Outward,

    /// Shrink the range to the pages it fully covers.
    Inward,
}

/// An owned reservation of contiguous address space.
///
/// Reserving address space does not consume physical memory. Pages become usable once committed
/// and can be decommitted again to return their physical memory while keeping the addresses
/// reserved. Dropping the range releases the whole reservation.
///
/// The base and length of the range are multiples of the
/// [allocation granularity][allocation_granularity].
///
/// # Examples
///
/// ```
/// use tiered_memory::{Bytes, VirtualMemoryRange, virtual_memory};
///
/// let range = VirtualMemoryRange::reserve(Bytes::mib(1)).unwrap();
/// let first_page = range.span().front(virtual_memory::page_size());
///
/// assert!(range.commit(first_page));
///
/// // SAFETY: The page was just committed and nothing else references it.
/// unsafe { first_page.fill(0xFF) };
///
/// assert!(range.decommit(first_page));
/// ```
pub struct VirtualMemoryRange {
    // `None` once released.
    base: Option<NonNull<u8>>,
    len: usize,
    platform: PlatformFacade,
}

impl VirtualMemoryRange {
    /// Reserves at least `len` bytes of address space, rounded up to the allocation granularity.
    ///
    /// Returns `None` if `len` is not positive, if the rounded length does not fit into `isize`
    /// or if the operating system refuses the request.
    #[must_use]
    pub fn reserve(len: Bytes) -> Option<Self> {
        Self::reserve_with(PlatformFacade::target(), len)
    }

    pub(crate) fn reserve_with(platform: PlatformFacade, len: Bytes) -> Option<Self> {
        let requested = len.to_usize().filter(|len| *len > 0)?;
        let len = requested
            .checked_next_multiple_of(platform.allocation_granularity())
            .filter(|len| isize::try_from(*len).is_ok())?;

        match platform.reserve(len) {
            Ok(base) => {
                debug!(
                    base = %RwAddress::of(base.as_ptr()),
                    len = %Bytes::from_usize(len),
                    "reserved virtual memory"
                );

                Some(Self {
                    base: Some(base),
                    len,
                    platform,
                })
            }
            Err(error) => {
                warn!(len = %Bytes::from_usize(len), %error, "failed to reserve virtual memory");
                None
            }
        }
    }

    /// The whole reservation as a span. Only committed pages may be accessed.
    #[must_use]
    pub fn span(&self) -> RwByteSpan {
        self.base.map_or_else(RwByteSpan::empty, |base| {
            RwByteSpan::from_raw_parts(base.as_ptr(), self.len)
        })
    }

    /// The first address of the reservation.
    #[must_use]
    pub fn base(&self) -> RwAddress {
        self.span().address()
    }

    /// The length of the reservation.
    #[must_use]
    pub fn len(&self) -> Bytes {
        self.span().len()
    }

    /// Whether the reservation has already been released.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.base.is_none()
    }

    /// The page size that commit and decommit round to.
    #[must_use]
    pub fn page_size(&self) -> Bytes {
        Bytes::from_usize(self.platform.page_size())
    }

    /// Commits the pages touched by `span`, rounding outward to whole pages.
    ///
    /// Committing already committed pages is allowed and leaves their contents intact.
    /// Returns `false` if the span lies outside the reservation or the operating system refuses.
    pub fn commit(&self, span: impl Into<ByteSpan>) -> bool {
        let span = span.into();

        let Some((start, len)) = self.page_range(span, Rounding::Outward) else {
            return false;
        };

        if len == 0 {
            return true;
        }

        trace!(start = %RwAddress::of(start.as_ptr()), len = %Bytes::from_usize(len), "commit");

        match self.platform.commit(start, len) {
            Ok(()) => true,
            Err(error) => {
                warn!(
                    start = %RwAddress::of(start.as_ptr()),
                    len = %Bytes::from_usize(len),
                    %error,
                    "failed to commit virtual memory"
                );
                false
            }
        }
    }

    /// Decommits the pages fully covered by `span`, rounding inward to whole pages.
    ///
    /// The contents of decommitted pages are lost. Decommitting pages that are not committed is a
    /// no-op. Returns `false` if the span lies outside the reservation or the operating system
    /// refuses.
    pub fn decommit(&self, span: impl Into<ByteSpan>) -> bool {
        let span = span.into();

        let Some((start, len)) = self.page_range(span, Rounding::Inward) else {
            return false;
        };

        if len == 0 {
            return true;
        }

        trace!(start = %RwAddress::of(start.as_ptr()), len = %Bytes::from_usize(len), "decommit");

        match self.platform.decommit(start, len) {
            Ok(()) => true,
            Err(error) => {
                warn!(
                    start = %RwAddress::of(start.as_ptr()),
                    len = %Bytes::from_usize(len),
                    %error,
                    "failed to decommit virtual memory"
                );
                false
            }
        }
    }

    /// Returns the reservation to the operating system.
    ///
    /// Dropping the range does the same. This method additionally reports whether the operating
    /// system accepted the release.
    pub fn release(mut self) -> bool {
        self.release_in_place()
    }

    fn release_in_place(&mut self) -> bool {
        let Some(base) = self.base.take() else {
            return true;
        };

        match self.platform.release(base, self.len) {
            Ok(()) => {
                debug!(
                    base = %RwAddress::of(base.as_ptr()),
                    len = %Bytes::from_usize(self.len),
                    "released virtual memory"
                );
                true
            }
            Err(error) => {
                warn!(
                    base = %RwAddress::of(base.as_ptr()),
                    len = %Bytes::from_usize(self.len),
                    %error,
                    "failed to release virtual memory"
                );
                false
            }
        }
    }

    /// Translates a span into a page-aligned (start, length) pair within the reservation.
    fn page_range(&self, span: ByteSpan, rounding: Rounding) -> Option<(NonNull<u8>, usize)> {
        let whole = self.span();
        let in_range = !whole.is_empty() && whole.contains(span);

        debug_assert!(in_range, "{span:?} is outside the reservation {whole:?}");

        if !in_range {
            return None;
        }

        let page = Alignment::new(self.platform.page_size())
            .expect("the platform page size is always a power of two");

        // Containment guarantees that neither subtraction underflows.
        let start = span.start().addr().wrapping_sub(whole.start().addr());
        let end = span.end().addr().wrapping_sub(whole.start().addr());

        let (start, end) = match rounding {
            Rounding::Outward => (
                page.align_down(start),
                page.checked_align_up(end)?.min(self.len),
            ),
            Rounding::Inward => (page.checked_align_up(start)?, page.align_down(end)),
        };

        let len = end.saturating_sub(start);
        let start = NonNull::new(whole.start().wrapping_add(start))?;

        Some((start, len))
    }
}

impl Drop for VirtualMemoryRange {
    fn drop(&mut self) {
        self.release_in_place();
    }
}

impl fmt::Debug for VirtualMemoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualMemoryRange")
            .field("base", &self.base())
            .field("len", &self.len())
            .field("platform", &self.platform)
            .finish()
    }
}

// SAFETY: The range exclusively owns its reservation. The operating system calls behind
// commit and decommit are thread-safe.
unsafe impl Send for VirtualMemoryRange {}
// SAFETY: See above.
unsafe impl Sync for VirtualMemoryRange {}
