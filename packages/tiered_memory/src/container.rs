use std::fmt;
use std::ptr::{self, NonNull};
use std::rc::Rc;

use allocator_api2::alloc::{AllocError, Allocator, Layout};

use crate::{Alignment, Bytes, PolymorphicResource, RwByteSpan, active_resource};

/// Connects containers that accept a custom allocator to memory resources.
///
/// The allocator implements the [`allocator_api2`] `Allocator` trait, so it works with the
/// containers of that crate and of other crates built on it. It forwards every request either to
/// the resource it was bound to or, if unbound, to the [active resource][active_resource] of the
/// current thread at the time of the call.
///
/// An unbound allocator must only deallocate memory while the resource that served the
/// allocation is still active. Containers that may outlive the current scope should capture the
/// active resource with [`ResourceAllocator::active()`] instead.
///
/// Two allocators compare equal if they forward to the same resource, which means memory
/// allocated through one may be deallocated through the other.
///
/// # Examples
///
/// ```
/// use std::rc::Rc;
///
/// use allocator_api2::vec::Vec;
/// use tiered_memory::{LinearResource, Polymorphic, ResourceAllocator, SystemResource};
///
/// let frame = Rc::new(Polymorphic::new(LinearResource::new(SystemResource)));
///
/// let mut numbers = Vec::new_in(ResourceAllocator::new(Rc::clone(&frame) as _));
/// numbers.extend([1_u32, 2, 3]);
///
/// assert_eq!(numbers.iter().sum::<u32>(), 6);
/// assert_eq!(frame.borrow().chunk_count(), 1);
/// ```
#[derive(Clone, Default)]
pub struct ResourceAllocator {
    // `None` forwards to the active resource of the calling thread.
    resource: Option<Rc<dyn PolymorphicResource>>,
}

impl ResourceAllocator {
    /// Creates an allocator bound to `resource`.
    #[must_use]
    pub fn new(resource: Rc<dyn PolymorphicResource>) -> Self {
        Self {
            resource: Some(resource),
        }
    }

    /// Creates an allocator bound to the current thread's active resource.
    #[must_use]
    pub fn active() -> Self {
        Self::new(active_resource())
    }

    /// Creates an allocator that looks up the active resource on every call.
    #[must_use]
    pub fn ambient() -> Self {
        Self::default()
    }

    /// Whether the allocator is bound to a specific resource.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.resource.is_some()
    }

    fn resource(&self) -> Rc<dyn PolymorphicResource> {
        self.resource.clone().unwrap_or_else(active_resource)
    }

    fn identity(&self) -> Option<*const ()> {
        self.resource.as_ref().map(|resource| resource.identity())
    }
}

fn dangling(layout: Layout) -> NonNull<u8> {
    // A layout alignment is never zero.
    NonNull::new(ptr::without_provenance_mut(layout.align())).unwrap_or_else(NonNull::dangling)
}

// SAFETY: Memory comes from a memory resource, which guarantees size, alignment and exclusivity.
// Bound allocators keep their resource alive for as long as any clone exists.
unsafe impl Allocator for ResourceAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        if layout.size() == 0 {
            return Ok(NonNull::slice_from_raw_parts(dangling(layout), 0));
        }

        let alignment = Alignment::new(layout.align()).ok_or(AllocError)?;

        let block = self
            .resource()
            .allocate(Bytes::from_usize(layout.size()), alignment);

        let start = block.as_non_null().ok_or(AllocError)?;

        Ok(NonNull::slice_from_raw_parts(start, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }

        let Some(alignment) = Alignment::new(layout.align()) else {
            return;
        };

        let block = RwByteSpan::from_raw_parts(ptr.as_ptr(), layout.size());

        // SAFETY: The caller guarantees that the memory was allocated through this allocator or
        // an equal one with the same layout, so it came from the same resource.
        unsafe {
            self.resource().deallocate(block, alignment);
        }
    }
}

impl PartialEq for ResourceAllocator {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for ResourceAllocator {}

impl fmt::Debug for ResourceAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceAllocator")
            .field("resource", &self.identity())
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use allocator_api2::boxed::Box;
    use allocator_api2::vec::Vec;
    use static_assertions::assert_not_impl_any;

    use super::*;
    use crate::{
        LinearResource, Polymorphic, PoolResource, QuotaResource, ResourceGuard, SystemResource,
        align,
    };

    assert_not_impl_any!(ResourceAllocator: Send, Sync);

    #[test]
    fn vector_grows_in_bound_resource() {
        let frame = Rc::new(Polymorphic::new(LinearResource::new(SystemResource)));
        let mut values = Vec::new_in(ResourceAllocator::new(Rc::clone(&frame) as _));

        for value in 0..1000_u64 {
            values.push(value);
        }

        assert_eq!(values.iter().sum::<u64>(), 999 * 1000 / 2);

        let first = RwByteSpan::from_raw_parts(values.as_mut_ptr().cast(), 8);
        assert_eq!(frame.owns(first.into()), Some(true));
    }

    #[test]
    fn boxes_return_blocks_to_the_pool() {
        let pool = Rc::new(Polymorphic::new(PoolResource::new(
            SystemResource,
            Bytes::new(16),
            align!(8),
        )));
        let allocator = ResourceAllocator::new(Rc::clone(&pool) as _);

        let boxed = Box::new_in([7_u64; 2], allocator.clone());
        assert_eq!(*boxed, [7, 7]);
        drop(boxed);

        assert_eq!(pool.borrow().free_block_count(), 1);

        // Larger than a block.
        assert!(Box::try_new_in([0_u64; 4], allocator).is_err());
    }

    #[test]
    fn unbound_allocator_follows_the_active_resource() {
        let quota = Rc::new(Polymorphic::new(QuotaResource::new(SystemResource, Bytes::kib(1))));
        let _guard = ResourceGuard::new(Rc::clone(&quota) as _);

        let allocator = ResourceAllocator::ambient();
        assert!(!allocator.is_bound());

        let mut values: Vec<u8, _> = Vec::with_capacity_in(100, allocator);
        values.push(1);

        assert_eq!(quota.borrow().allocated(), Bytes::new(100));

        drop(values);
        assert_eq!(quota.borrow().allocated(), Bytes::ZERO);
    }

    #[test]
    fn active_captures_the_resource() {
        let frame = Rc::new(Polymorphic::new(LinearResource::new(SystemResource)));

        let captured = {
            let _guard = ResourceGuard::new(Rc::clone(&frame) as _);
            ResourceAllocator::active()
        };

        assert!(captured.is_bound());

        let block = captured.allocate(Layout::new::<u64>()).unwrap();
        let span = RwByteSpan::from_raw_parts(block.cast::<u8>().as_ptr(), 8);
        assert_eq!(frame.owns(span.into()), Some(true));
    }

    #[test]
    fn equality_follows_identity() {
        let a = Rc::new(Polymorphic::new(LinearResource::new(SystemResource)));
        let b = Rc::new(Polymorphic::new(LinearResource::new(SystemResource)));

        assert_eq!(ResourceAllocator::new(Rc::clone(&a) as _), ResourceAllocator::new(Rc::clone(&a) as _));
        assert_ne!(ResourceAllocator::new(a), ResourceAllocator::new(b));
        assert_eq!(ResourceAllocator::ambient(), ResourceAllocator::default());
    }

    #[test]
    fn zero_sized_requests_do_not_reach_the_resource() {
        let quota = Rc::new(Polymorphic::new(QuotaResource::new(SystemResource, Bytes::ZERO)));
        let allocator = ResourceAllocator::new(quota);

        let block = allocator.allocate(Layout::new::<()>()).unwrap();
        assert_eq!(block.len(), 0);

        // SAFETY: The block came from this allocator with the same layout.
        unsafe {
            allocator.deallocate(block.cast(), Layout::new::<()>());
        }

        assert!(allocator.allocate(Layout::new::<u8>()).is_err());
    }
}
