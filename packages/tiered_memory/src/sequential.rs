use std::marker::PhantomData;

use crate::resource::{check_ownership, requested_size};
use crate::{
    Alignment, BulkResource, ByteSpan, Bytes, HeadSavepoint, MemoryResource, RewindableResource,
    RwByteSpan,
};

/// Bump allocation over a caller-supplied range of memory.
///
/// Allocation aligns the head, hands out the next `size` bytes and advances the head past them.
/// Individual deallocation is a no-op. Memory is reclaimed by
/// [restoring a savepoint][RewindableResource::restore] or [in bulk][BulkResource::deallocate_all].
///
/// The resource never talks to the operating system. It is meant for memory that an outer layer
/// already owns, such as a stack buffer or a span obtained from another resource.
///
/// # Examples
///
/// ```
/// use tiered_memory::{Bytes, MemoryResource, RewindableResource, SequentialResource, align};
///
/// let mut buffer = [0_u8; 1024];
/// let mut scratch = SequentialResource::from_slice(&mut buffer);
///
/// let savepoint = scratch.savepoint();
/// let block = scratch.allocate(Bytes::new(100), align!(8));
/// assert_eq!(scratch.max_allocation_size(), Bytes::new(1024) - scratch.used());
///
/// // SAFETY: Nothing allocated after the savepoint is used afterwards.
/// unsafe { scratch.restore(savepoint) };
/// assert_eq!(scratch.used(), Bytes::ZERO);
/// ```
#[derive(Debug)]
pub struct SequentialResource<'a> {
    range: RwByteSpan,

    // Offset of the first free byte in `range`.
    head: usize,

    _memory: PhantomData<&'a mut [u8]>,
}

impl<'a> SequentialResource<'a> {
    /// Creates a resource that hands out the bytes of `memory`.
    #[must_use]
    pub fn from_slice(memory: &'a mut [u8]) -> Self {
        Self {
            range: RwByteSpan::from_slice(memory),
            head: 0,
            _memory: PhantomData,
        }
    }

    /// Creates a resource that hands out the bytes of `range`.
    ///
    /// # Safety
    ///
    /// The range must be valid for reads and writes for `'a` and must not be accessed by
    /// anything other than this resource and the holders of the spans it hands out.
    #[must_use]
    pub const unsafe fn from_span(range: RwByteSpan) -> Self {
        Self {
            range,
            head: 0,
            _memory: PhantomData,
        }
    }

    /// The range this resource allocates from.
    #[must_use]
    pub fn range(&self) -> RwByteSpan {
        self.range
    }

    /// The number of bytes consumed so far, including alignment padding.
    #[must_use]
    pub fn used(&self) -> Bytes {
        Bytes::from_usize(self.head)
    }

    /// The largest allocation with byte alignment that would currently succeed.
    ///
    /// This is advisory: a stricter alignment may need padding that reduces it.
    #[must_use]
    pub fn max_allocation_size(&self) -> Bytes {
        Bytes::from_usize(self.range.size().saturating_sub(self.head))
    }
}

/// Computes where a bump allocation of `size` bytes would land.
///
/// Returns the aligned offset of the allocation and the new head offset, or `None` if the
/// allocation does not fit before `capacity`.
pub(crate) fn bump(
    base: usize,
    head: usize,
    capacity: usize,
    size: usize,
    alignment: Alignment,
) -> Option<(usize, usize)> {
    let aligned = alignment.checked_align_up(base.checked_add(head)?)?;
    let offset = aligned.checked_sub(base)?;
    let end = offset.checked_add(size)?;

    (end <= capacity).then_some((offset, end))
}

// SAFETY: Spans are carved from the range in increasing order and never overlap. The range is
// valid for reads and writes per the constructor contracts.
unsafe impl MemoryResource for SequentialResource<'_> {
    fn allocate(&mut self, size: Bytes, alignment: Alignment) -> RwByteSpan {
        let Some(size) = requested_size(size) else {
            return RwByteSpan::empty();
        };

        let Some((offset, end)) = bump(
            self.range.start().addr(),
            self.head,
            self.range.size(),
            size,
            alignment,
        ) else {
            return RwByteSpan::empty();
        };

        self.head = end;

        RwByteSpan::from_raw_parts(self.range.start().wrapping_add(offset), size)
    }

    unsafe fn deallocate(&mut self, block: RwByteSpan, _alignment: Alignment) {
        check_ownership(self, block);
    }

    fn owns(&self, block: ByteSpan) -> Option<bool> {
        Some(self.range.front(self.used()).contains(block))
    }
}

impl BulkResource for SequentialResource<'_> {
    fn deallocate_all(&mut self) {
        self.head = 0;
    }
}

impl RewindableResource for SequentialResource<'_> {
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
    }
}
