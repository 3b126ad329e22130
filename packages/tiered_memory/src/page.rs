use std::ptr::NonNull;

use tracing::trace;

use crate::pal::{Platform, PlatformFacade};
use crate::resource::{check_ownership, requested_size};
use crate::{
    Alignment, BulkResource, ByteSpan, Bytes, MemoryResource, RwByteSpan, VirtualMemoryRange,
};

/// Bookkeeping at the start of a free-list page. The rest of the page holds the addresses of
/// further free pages, which are decommitted.
#[repr(C)]
struct FreeListHeader {
    next: Option<NonNull<FreeListHeader>>,

    // Number of occupied address slots after the header.
    count: usize,
}

/// Hands out whole pages of one virtual memory reservation.
///
/// Every allocation occupies one page, so requests larger than a page or aligned beyond a page
/// fail. Returned pages are recycled in LIFO order. A returned page either becomes a free-list
/// page, which stays committed and records the addresses of further returned pages, or has its
/// address recorded in the current free-list page and is decommitted. A free-list page whose
/// records are used up is itself handed out next.
///
/// [`owns()`][MemoryResource::owns] reports whether a span lies in the part of the reservation
/// handed out so far, without distinguishing pages that have since been returned.
///
/// # Examples
///
/// ```
/// use tiered_memory::{Bytes, MemoryResource, PageResource, align};
///
/// let mut pages = PageResource::new(Bytes::mib(1)).unwrap();
///
/// let first = pages.allocate(Bytes::new(100), align!(64));
/// assert!(first.is_aligned(align!(4096)));
///
/// // SAFETY: The span came from this resource and is not used afterwards.
/// unsafe { pages.deallocate(first, align!(64)) };
///
/// // The most recently returned page is handed out first.
/// let second = pages.allocate(Bytes::new(100), align!(64));
/// assert_eq!(second.start(), first.start());
/// ```
#[derive(Debug)]
pub struct PageResource {
    reservation: VirtualMemoryRange,
    page_size: usize,

    // Offset of the first page never handed out.
    head: usize,

    free_list: Option<NonNull<FreeListHeader>>,

    outstanding: usize,
}

impl PageResource {
    /// Reserves `capacity` bytes of address space to hand out page by page.
    ///
    /// The capacity is rounded up to the allocation granularity of the operating system.
    /// Returns `None` if the address space cannot be reserved.
    #[must_use]
    pub fn new(capacity: Bytes) -> Option<Self> {
        Self::with_platform(PlatformFacade::target(), capacity)
    }

    pub(crate) fn with_platform(platform: PlatformFacade, capacity: Bytes) -> Option<Self> {
        let page_size = platform.page_size();
        let reservation = VirtualMemoryRange::reserve_with(platform, capacity)?;

        Some(Self {
            reservation,
            page_size,
            head: 0,
            free_list: None,
            outstanding: 0,
        })
    }

    /// The size of every allocation.
    #[must_use]
    pub fn page_size(&self) -> Bytes {
        Bytes::from_usize(self.page_size)
    }

    /// The size of the reservation.
    #[must_use]
    pub fn capacity(&self) -> Bytes {
        self.reservation.len()
    }

    /// The number of pages currently handed out.
    #[must_use]
    pub fn allocated_pages(&self) -> usize {
        self.outstanding
    }

    /// The number of returned pages waiting to be handed out again.
    #[must_use]
    pub fn free_pages(&self) -> usize {
        let mut total = 0;
        let mut current = self.free_list;

        while let Some(list) = current {
            // SAFETY: Free-list pages stay committed and only this resource references them.
            let header = unsafe { list.as_ref() };

            total += header.count + 1;
            current = header.next;
        }

        total
    }

    fn slot_capacity(&self) -> usize {
        self.page_size
            .saturating_sub(size_of::<FreeListHeader>())
            .checked_div(size_of::<*mut u8>())
            .unwrap_or(0)
    }

    fn slots(list: NonNull<FreeListHeader>) -> *mut *mut u8 {
        list.as_ptr().wrapping_add(1).cast()
    }

    fn page_span(&self, page: *mut u8) -> RwByteSpan {
        RwByteSpan::from_raw_parts(page, self.page_size)
    }

    /// Takes the most recently returned page.
    fn pop_free(&mut self, mut list: NonNull<FreeListHeader>) -> Option<*mut u8> {
        // SAFETY: Free-list pages stay committed and only this resource references them. We
        // hold `&mut self`, so nobody else looks at the header meanwhile.
        let header = unsafe { list.as_mut() };

        if header.count == 0 {
            self.free_list = header.next;
            return Some(list.as_ptr().cast());
        }

        let index = header.count - 1;

        let slot = Self::slots(list).wrapping_add(index);

        // SAFETY: Slots below `count` were written by `push_free()` and lie within the page.
        let page = unsafe { slot.read() };

        if !self.reservation.commit(self.page_span(page)) {
            return None;
        }

        header.count = index;
        Some(page)
    }

    /// Records a returned page.
    fn push_free(&mut self, page: *mut u8) {
        let capacity = self.slot_capacity();

        if let Some(mut list) = self.free_list {
            // SAFETY: Free-list pages stay committed and only this resource references them.
            let header = unsafe { list.as_mut() };

            if header.count < capacity {
                let slot = Self::slots(list).wrapping_add(header.count);

                // SAFETY: The slot lies within the free-list page because `count` is below the
                // slot capacity of a page.
                unsafe {
                    slot.write(page);
                }
                header.count += 1;

                // A page that stays committed is still recorded and simply gets committed again
                // when it is handed out.
                _ = self.reservation.decommit(self.page_span(page));
                return;
            }
        }

        let header = page.cast::<FreeListHeader>();

        // SAFETY: The page is committed, page-aligned and no longer referenced by the caller.
        unsafe {
            header.write(FreeListHeader {
                next: self.free_list,
                count: 0,
            });
        }

        self.free_list = NonNull::new(header);
    }

    /// Hands out a page that was never handed out before.
    fn bump(&mut self) -> Option<*mut u8> {
        let end = self.head.checked_add(self.page_size)?;

        if end > self.reservation.span().size() {
            return None;
        }

        let page = self.reservation.span().start().wrapping_add(self.head);

        if !self.reservation.commit(self.page_span(page)) {
            return None;
        }

        self.head = end;
        Some(page)
    }
}

// SAFETY: Every span lies in its own page, which is committed before it is handed out and is
// only written by this resource again after the caller returned it.
unsafe impl MemoryResource for PageResource {
    fn allocate(&mut self, size: Bytes, alignment: Alignment) -> RwByteSpan {
        let Some(size) = requested_size(size) else {
            return RwByteSpan::empty();
        };

        if size > self.page_size || alignment.get() > self.page_size {
            return RwByteSpan::empty();
        }

        let page = match self.free_list {
            Some(list) => self.pop_free(list),
            None => self.bump(),
        };

        let Some(page) = page else {
            return RwByteSpan::empty();
        };

        self.outstanding += 1;

        RwByteSpan::from_raw_parts(page, size)
    }

    unsafe fn deallocate(&mut self, block: RwByteSpan, _alignment: Alignment) {
        check_ownership(self, block);

        if block.is_empty() {
            return;
        }

        debug_assert!(
            block.start().addr() % self.page_size == 0,
            "{block:?} does not start at a page boundary"
        );

        self.push_free(block.start());
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    fn owns(&self, block: ByteSpan) -> Option<bool> {
        Some(
            self.reservation
                .span()
                .front(Bytes::from_usize(self.head))
                .contains(block),
        )
    }
}

impl BulkResource for PageResource {
    fn deallocate_all(&mut self) {
        let used = self.reservation.span().front(Bytes::from_usize(self.head));

        trace!(pages = self.head / self.page_size, "returning all pages");

        _ = self.reservation.decommit(used);

        self.head = 0;
        self.free_list = None;
        self.outstanding = 0;
    }
}

// SAFETY: The free list only points into pages of the reservation, which the resource owns
// exclusively. Shared references only read the free list.
unsafe impl Send for PageResource {}
// SAFETY: See above.
unsafe impl Sync for PageResource {}
