use tracing::warn;

use crate::pal::{Platform, PlatformFacade};
use crate::resource::{check_ownership, requested_size};
use crate::sequential::bump;
use crate::{
    Alignment, BulkResource, ByteSpan, Bytes, HeadSavepoint, MemoryResource, RewindableResource,
    RwByteSpan, VirtualMemoryRange,
};

/// Bump allocation over a dedicated virtual memory reservation that is committed on demand.
///
/// The full capacity is reserved up front, which costs address space but no physical memory.
/// Pages are committed as the head crosses them, in batches of `granularity` bytes, and
/// decommitted again when the head moves back via [`restore()`][RewindableResource::restore] or
/// [`deallocate_all()`][BulkResource::deallocate_all].
///
/// Individual deallocation is a no-op.
///
/// # Examples
///
/// ```
/// use tiered_memory::{Bytes, LinearVirtualResource, MemoryResource, RewindableResource, align};
///
/// let mut frame = LinearVirtualResource::new(Bytes::mib(16), Bytes::kib(64)).unwrap();
///
/// let savepoint = frame.savepoint();
/// let block = frame.allocate(Bytes::kib(5), align!(64));
/// assert!(!block.is_empty());
/// assert_eq!(frame.committed(), Bytes::kib(64));
///
/// // SAFETY: Nothing allocated after the savepoint is used afterwards.
/// unsafe { frame.restore(savepoint) };
/// assert_eq!(frame.committed(), Bytes::ZERO);
/// ```
#[derive(Debug)]
pub struct LinearVirtualResource {
    reservation: VirtualMemoryRange,

    // Commit batch size. A multiple of the page size.
    granularity: usize,

    // Offset of the first free byte.
    head: usize,

    // Offset of the first uncommitted byte. A multiple of `granularity` or the capacity.
    committed: usize,
}

impl LinearVirtualResource {
    /// Reserves `capacity` bytes of address space and prepares to commit them in batches of
    /// `granularity` bytes.
    ///
    /// The capacity is rounded up to the allocation granularity of the operating system and the
    /// commit granularity is rounded up to a multiple of the page size.
    ///
    /// Returns `None` if the rounded granularity does not fit into `isize` or if the address
    /// space cannot be reserved.
    #[must_use]
    pub fn new(capacity: Bytes, granularity: Bytes) -> Option<Self> {
        Self::with_platform(PlatformFacade::target(), capacity, granularity)
    }

    /// The commit granularity that [`new()`][Self::new] uses when asked for `granularity`.
    ///
    /// Returns `None` if rounding up to a multiple of the page size does not fit into `isize`.
    ///
    /// # Examples
    ///
    /// ```
    /// use tiered_memory::{Bytes, LinearVirtualResource, virtual_memory};
    ///
    /// let page = virtual_memory::page_size();
    ///
    /// assert_eq!(LinearVirtualResource::commit_granularity(Bytes::new(1)), Some(page));
    /// assert_eq!(LinearVirtualResource::commit_granularity(Bytes::new(isize::MAX)), None);
    /// ```
    #[must_use]
    pub fn commit_granularity(granularity: Bytes) -> Option<Bytes> {
        round_granularity(granularity, PlatformFacade::target().page_size()).map(Bytes::from_usize)
    }

    pub(crate) fn with_platform(
        platform: PlatformFacade,
        capacity: Bytes,
        granularity: Bytes,
    ) -> Option<Self> {
        let page_size = platform.page_size();

        let granularity = round_granularity(granularity, page_size)?;

        let reservation = VirtualMemoryRange::reserve_with(platform, capacity)?;

        Some(Self {
            reservation,
            granularity,
            head: 0,
            committed: 0,
        })
    }

    /// The size of the reservation.
    #[must_use]
    pub fn capacity(&self) -> Bytes {
        self.reservation.len()
    }

    /// The batch size in which pages are committed.
    #[must_use]
    pub fn granularity(&self) -> Bytes {
        Bytes::from_usize(self.granularity)
    }

    /// The number of bytes consumed so far, including alignment padding.
    #[must_use]
    pub fn used(&self) -> Bytes {
        Bytes::from_usize(self.head)
    }

    /// The number of bytes currently committed.
    #[must_use]
    pub fn committed(&self) -> Bytes {
        Bytes::from_usize(self.committed)
    }

    /// The largest allocation with byte alignment that would currently succeed.
    ///
    /// This is advisory: a stricter alignment may need padding, and committing may still fail.
    #[must_use]
    pub fn max_allocation_size(&self) -> Bytes {
        Bytes::from_usize(self.reservation.span().size().saturating_sub(self.head))
    }

    /// The part of the reservation between two offsets.
    fn section(&self, start: usize, end: usize) -> RwByteSpan {
        let (_, tail) = self.reservation.span().split_at(Bytes::from_usize(start));
        tail.front(Bytes::from_usize(end.saturating_sub(start)))
    }

    /// Ensures everything before `end` is committed.
    fn commit_through(&mut self, end: usize) -> bool {
        if end <= self.committed {
            return true;
        }

        let capacity = self.reservation.span().size();

        let Some(target) = end.checked_next_multiple_of(self.granularity) else {
            return false;
        };
        let target = target.min(capacity);

        if !self.reservation.commit(self.section(self.committed, target)) {
            return false;
        }

        self.committed = target;
        true
    }

    /// Decommits whole batches that lie entirely at or after `head`.
    fn decommit_after(&mut self, head: usize) {
        let capacity = self.reservation.span().size();

        let Some(target) = head.checked_next_multiple_of(self.granularity) else {
            return;
        };
        let target = target.min(capacity);

        if target >= self.committed {
            return;
        }

        if self.reservation.decommit(self.section(target, self.committed)) {
            self.committed = target;
        } else {
            warn!(
                committed = %self.committed(),
                "keeping pages committed after a failed decommit"
            );
        }
    }
}

// SAFETY: Spans are carved from the reservation in increasing order and never overlap. Every
// span is committed before it is handed out and stays committed until the head moves back below
// it, which only happens when the caller reclaims it.
unsafe impl MemoryResource for LinearVirtualResource {
    fn allocate(&mut self, size: Bytes, alignment: Alignment) -> RwByteSpan {
        let Some(size) = requested_size(size) else {
            return RwByteSpan::empty();
        };

        let whole = self.reservation.span();

        let Some((offset, end)) =
            bump(whole.start().addr(), self.head, whole.size(), size, alignment)
        else {
            return RwByteSpan::empty();
        };

        if !self.commit_through(end) {
            return RwByteSpan::empty();
        }

        self.head = end;

        RwByteSpan::from_raw_parts(whole.start().wrapping_add(offset), size)
    }

    unsafe fn deallocate(&mut self, block: RwByteSpan, _alignment: Alignment) {
        check_ownership(self, block);
    }

    fn owns(&self, block: ByteSpan) -> Option<bool> {
        Some(self.reservation.span().front(self.used()).contains(block))
    }
}

impl BulkResource for LinearVirtualResource {
    fn deallocate_all(&mut self) {
        self.head = 0;
        self.decommit_after(0);
    }
}

impl RewindableResource for LinearVirtualResource {
    type Savepoint = HeadSavepoint;

    fn savepoint(&self) -> Self::Savepoint {
        HeadSavepoint { head: self.head }
    }

    unsafe fn restore(&mut self, savepoint: Self::Savepoint) {
        debug_assert!(
            savepoint.head <= self.head,
            "savepoint {savepoint:?} is ahead of the current head {}",
            self.head
        );

        self.head = savepoint.head;
        self.decommit_after(savepoint.head);
    }
}

/// Raises `granularity` to at least one page and rounds it up to a multiple of the page size.
fn round_granularity(granularity: Bytes, page_size: usize) -> Option<usize> {
    granularity
        .to_usize()
        .unwrap_or(0)
        .max(page_size)
        .checked_next_multiple_of(page_size)
        .filter(|rounded| isize::try_from(*rounded).is_ok())
}
