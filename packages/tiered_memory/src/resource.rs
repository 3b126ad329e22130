use std::fmt::Debug;

use crate::{Alignment, ByteSpan, Bytes, RwByteSpan};

/// A source of memory that hands out byte spans and takes them back.
///
/// Resources compose: leaf resources talk to the operating system or the process heap, while
/// layered resources such as [`LinearResource`][crate::LinearResource] or
/// [`PoolResource`][crate::PoolResource] are generic over the resource they obtain memory from.
///
/// # Failure
///
/// Allocation never panics or returns an error. A resource that cannot satisfy a request returns
/// [`RwByteSpan::empty()`] and the caller is expected to check for it. Zero-byte requests always
/// fail this way.
///
/// # Safety
///
/// Implementations must guarantee that every non-empty span returned by
/// [`allocate()`][Self::allocate]:
///
/// * is at least `size` bytes long and starts at an address aligned to `alignment`;
/// * is valid for reads and writes until it is passed back to
///   [`deallocate()`][Self::deallocate] or reclaimed in bulk by an operation documented to do so;
/// * does not overlap any other span the resource has handed out and not yet reclaimed.
///
/// Layered resources write their bookkeeping into memory obtained from their underlying resource
/// and rely on these guarantees for soundness.
pub unsafe trait MemoryResource {
    /// Allocates `size` bytes aligned to `alignment`, returning an empty span on failure.
    fn allocate(&mut self, size: Bytes, alignment: Alignment) -> RwByteSpan;

    /// Returns a span obtained from [`allocate()`][Self::allocate].
    ///
    /// Deallocating an empty span is a no-op. Some resources only reclaim memory in bulk, in
    /// which case this is a no-op as well.
    ///
    /// # Safety
    ///
    /// The span must have been returned by `allocate()` on this resource with the same
    /// `alignment`, must not have been deallocated or reclaimed since, and must not be accessed
    /// after this call.
    unsafe fn deallocate(&mut self, block: RwByteSpan, alignment: Alignment);

    /// Reports whether `block` lies in memory handed out by this resource.
    ///
    /// Returns `None` if the resource cannot tell.
    fn owns(&self, block: ByteSpan) -> Option<bool> {
        _ = block;
        None
    }

    /// Allocates `size` bytes with [the default alignment][Alignment::DEFAULT].
    fn allocate_default(&mut self, size: Bytes) -> RwByteSpan {
        self.allocate(size, Alignment::DEFAULT)
    }
}

/// A resource that can reclaim everything it has handed out in one operation.
pub trait BulkResource: MemoryResource {
    /// Reclaims every span handed out by the resource.
    ///
    /// All outstanding spans become invalid. Accessing them afterwards is undefined behavior.
    fn deallocate_all(&mut self);
}

/// A resource whose allocations can be unwound to an earlier high-water mark.
///
/// Savepoints form a stack: restoring a savepoint invalidates every savepoint taken after it.
pub trait RewindableResource: MemoryResource {
    /// Captures the current high-water mark.
    type Savepoint: Copy + Debug;

    /// Captures the current high-water mark.
    fn savepoint(&self) -> Self::Savepoint;

    /// Reclaims every span allocated after `savepoint` was taken.
    ///
    /// Taking a savepoint and immediately restoring it changes nothing. Restoring the savepoint
    /// taken right after construction is equivalent to [`BulkResource::deallocate_all()`].
    ///
    /// # Safety
    ///
    /// The savepoint must come from this resource and must not have been invalidated by
    /// restoring an earlier savepoint or reclaiming everything. Spans allocated after the
    /// savepoint must not be accessed after this call.
    unsafe fn restore(&mut self, savepoint: Self::Savepoint);
}

/// Savepoint of a resource that allocates by advancing a single head offset.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeadSavepoint {
    pub(crate) head: usize,
}

// SAFETY: Forwarding to the referenced resource, which upholds the contract.
unsafe impl<R: MemoryResource + ?Sized> MemoryResource for &mut R {
    fn allocate(&mut self, size: Bytes, alignment: Alignment) -> RwByteSpan {
        (**self).allocate(size, alignment)
    }

    unsafe fn deallocate(&mut self, block: RwByteSpan, alignment: Alignment) {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            (**self).deallocate(block, alignment);
        }
    }

    fn owns(&self, block: ByteSpan) -> Option<bool> {
        (**self).owns(block)
    }
}

impl<R: BulkResource + ?Sized> BulkResource for &mut R {
    fn deallocate_all(&mut self) {
        (**self).deallocate_all();
    }
}

/// Whether a request can be served at all. Zero and negative sizes never can.
pub(crate) fn requested_size(size: Bytes) -> Option<usize> {
    debug_assert!(!size.is_negative(), "allocation size must not be negative");

    size.to_usize().filter(|size| *size > 0)
}

/// Verifies that a span being returned to `resource` belongs to it.
///
/// Runs in debug builds and whenever the `ownership_checks` feature is enabled.
#[cfg_attr(test, mutants::skip)] // Only has an effect when the contract is violated.
pub(crate) fn check_ownership<R: MemoryResource + ?Sized>(resource: &R, block: RwByteSpan) {
    if cfg!(any(debug_assertions, feature = "ownership_checks")) && !block.is_empty() {
        assert!(
            resource.owns(block.into()) != Some(false),
            "{block:?} was not allocated by this resource"
        );
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::{SequentialResource, align};

    fn allocate_then_clear(mut resource: impl BulkResource) -> RwByteSpan {
        let block = resource.allocate(Bytes::new(16), align!(8));
        assert_eq!(resource.owns(block.into()), Some(true));

        resource.deallocate_all();
        block
    }

    #[test]
    fn mutable_reference_forwards() {
        let mut buffer = [0_u8; 256];
        let mut resource = SequentialResource::from_slice(&mut buffer);

        let block = allocate_then_clear(&mut resource);

        assert!(!block.is_empty());
        assert_eq!(resource.used(), Bytes::ZERO);
    }

    #[test]
    fn default_alignment() {
        let mut buffer = [0_u8; 256];
        let mut resource = SequentialResource::from_slice(&mut buffer);

        _ = resource.allocate(Bytes::new(1), Alignment::MIN);
        let block = resource.allocate_default(Bytes::new(8));

        assert!(block.is_aligned(Alignment::DEFAULT));
    }

    #[test]
    fn requested_size_rejects_zero() {
        assert_eq!(requested_size(Bytes::ZERO), None);
        assert_eq!(requested_size(Bytes::new(5)), Some(5));
    }
}
