use crate::{Alignment, BulkResource, ByteSpan, Bytes, MemoryResource, RwByteSpan};

/// Caps the number of bytes outstanding from an underlying resource.
///
/// A request that would push the outstanding total past the quota fails without reaching the
/// underlying resource. Deallocation credits the bytes back. Ownership queries and bulk
/// reclamation are forwarded.
///
/// # Examples
///
/// ```
/// use tiered_memory::{Bytes, MemoryResource, QuotaResource, SystemResource, align};
///
/// let mut capped = QuotaResource::new(SystemResource, Bytes::kib(1));
///
/// let block = capped.allocate(Bytes::new(800), align!(8));
/// assert_eq!(capped.allocated(), Bytes::new(800));
/// assert!(capped.allocate(Bytes::new(300), align!(8)).is_empty());
///
/// // SAFETY: The block came from this resource and is not used afterwards.
/// unsafe { capped.deallocate(block, align!(8)) };
/// assert_eq!(capped.allocated(), Bytes::ZERO);
/// ```
#[derive(Debug)]
pub struct QuotaResource<U> {
    underlying: U,
    quota: Bytes,
    allocated: Bytes,
}

impl<U: MemoryResource> QuotaResource<U> {
    /// Wraps `underlying`, allowing at most `quota` bytes to be outstanding at a time.
    #[must_use]
    pub fn new(underlying: U, quota: Bytes) -> Self {
        debug_assert!(!quota.is_negative(), "quota must not be negative");

        Self {
            underlying,
            quota,
            allocated: Bytes::ZERO,
        }
    }

    /// The maximum number of bytes that may be outstanding.
    #[must_use]
    pub fn quota(&self) -> Bytes {
        self.quota
    }

    /// The number of bytes currently outstanding.
    #[must_use]
    pub fn allocated(&self) -> Bytes {
        self.allocated
    }

    /// The wrapped resource.
    #[must_use]
    pub fn underlying(&self) -> &U {
        &self.underlying
    }

    /// Unwraps the resource, discarding the accounting.
    #[must_use]
    pub fn into_inner(self) -> U {
        self.underlying
    }
}

// SAFETY: Every span comes from the underlying resource, which upholds the contract.
unsafe impl<U: MemoryResource> MemoryResource for QuotaResource<U> {
    fn allocate(&mut self, size: Bytes, alignment: Alignment) -> RwByteSpan {
        let within_quota = self
            .allocated
            .checked_add(size)
            .is_some_and(|total| total <= self.quota);

        if !within_quota {
            return RwByteSpan::empty();
        }

        let block = self.underlying.allocate(size, alignment);
        self.allocated += block.len();

        block
    }

    unsafe fn deallocate(&mut self, block: RwByteSpan, alignment: Alignment) {
        debug_assert!(
            block.len() <= self.allocated,
            "{block:?} is larger than everything outstanding ({})",
            self.allocated
        );

        self.allocated -= block.len();

        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            self.underlying.deallocate(block, alignment);
        }
    }

    fn owns(&self, block: ByteSpan) -> Option<bool> {
        self.underlying.owns(block)
    }
}

impl<U: BulkResource> BulkResource for QuotaResource<U> {
    fn deallocate_all(&mut self) {
        self.underlying.deallocate_all();
        self.allocated = Bytes::ZERO;
    }
}
