use std::alloc::{self, Layout};
use std::ptr;

use crate::resource::requested_size;
use crate::{Alignment, ByteSpan, Bytes, MemoryResource, PolymorphicResource, RwByteSpan};

/// The process heap, as a memory resource.
///
/// This is the last-resort resource every thread starts out with as its
/// [active resource][crate::active_resource]. It is stateless and thread-safe.
///
/// [`owns()`][MemoryResource::owns] reports `true` for every span, so the system resource cannot
/// tell its own allocations apart from anyone else's. Use it as the leaf of a composition, never
/// layered underneath a resource that relies on ownership answers from below.
///
/// # Examples
///
/// ```
/// use tiered_memory::{Bytes, MemoryResource, SystemResource, align};
///
/// let mut system = SystemResource;
///
/// let block = system.allocate(Bytes::kib(1), align!(64));
/// assert!(!block.is_empty());
/// assert!(block.is_aligned(align!(64)));
///
/// // SAFETY: The block came from this resource with the same alignment.
/// unsafe { system.deallocate(block, align!(64)) };
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SystemResource;

static SYSTEM_RESOURCE: SystemResource = SystemResource;

impl SystemResource {
    fn layout(size: usize, alignment: Alignment) -> Option<Layout> {
        Layout::from_size_align(size, alignment.get()).ok()
    }

    fn allocate_shared(size: Bytes, alignment: Alignment) -> RwByteSpan {
        let Some(layout) = requested_size(size).and_then(|size| Self::layout(size, alignment))
        else {
            return RwByteSpan::empty();
        };

        // SAFETY: The layout has a non-zero size.
        let start = unsafe { alloc::alloc(layout) };

        if start.is_null() {
            return RwByteSpan::empty();
        }

        RwByteSpan::from_raw_parts(start, layout.size())
    }

    /// # Safety
    ///
    /// See [`MemoryResource::deallocate()`].
    unsafe fn deallocate_shared(block: RwByteSpan, alignment: Alignment) {
        if block.is_empty() {
            return;
        }

        let layout = Self::layout(block.size(), alignment)
            .expect("span and alignment must match a previous allocation");

        // SAFETY: The caller guarantees that the block came from `allocate_shared()` with the
        // same alignment, so the layout matches too.
        unsafe {
            alloc::dealloc(block.start(), layout);
        }
    }
}

// SAFETY: Spans come straight from the global allocator with the requested layout.
unsafe impl MemoryResource for SystemResource {
    fn allocate(&mut self, size: Bytes, alignment: Alignment) -> RwByteSpan {
        Self::allocate_shared(size, alignment)
    }

    unsafe fn deallocate(&mut self, block: RwByteSpan, alignment: Alignment) {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            Self::deallocate_shared(block, alignment);
        }
    }

    fn owns(&self, _block: ByteSpan) -> Option<bool> {
        Some(true)
    }
}

// SAFETY: Same as the `MemoryResource` implementation.
unsafe impl PolymorphicResource for SystemResource {
    fn allocate(&self, size: Bytes, alignment: Alignment) -> RwByteSpan {
        Self::allocate_shared(size, alignment)
    }

    unsafe fn deallocate(&self, block: RwByteSpan, alignment: Alignment) {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            Self::deallocate_shared(block, alignment);
        }
    }

    fn owns(&self, _block: ByteSpan) -> Option<bool> {
        Some(true)
    }

    // Every instance is the same process heap.
    fn identity(&self) -> *const () {
        ptr::from_ref(&SYSTEM_RESOURCE).cast()
    }
}
