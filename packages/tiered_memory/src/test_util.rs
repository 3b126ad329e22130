//! Helpers shared by unit tests.

use crate::{Alignment, BulkResource, ByteSpan, Bytes, MemoryResource, RwByteSpan};

/// Wraps a resource and records the calls that reach it.
#[derive(Debug, Default)]
pub(crate) struct Counting<U> {
    pub(crate) inner: U,

    /// Sizes of all successful allocations, in order.
    pub(crate) allocated: Vec<Bytes>,

    pub(crate) allocate_calls: usize,
    pub(crate) deallocate_calls: usize,
}

impl<U> Counting<U> {
    pub(crate) fn new(inner: U) -> Self {
        Self {
            inner,
            allocated: Vec::new(),
            allocate_calls: 0,
            deallocate_calls: 0,
        }
    }

    /// Successful allocations not yet deallocated.
    pub(crate) fn outstanding(&self) -> usize {
        self.allocated.len() - self.deallocate_calls
    }
}

// SAFETY: Forwarding to the inner resource, which upholds the contract.
unsafe impl<U: MemoryResource> MemoryResource for Counting<U> {
    fn allocate(&mut self, size: Bytes, alignment: Alignment) -> RwByteSpan {
        self.allocate_calls += 1;

        let block = self.inner.allocate(size, alignment);

        if !block.is_empty() {
            self.allocated.push(block.len());
        }

        block
    }

    unsafe fn deallocate(&mut self, block: RwByteSpan, alignment: Alignment) {
        if !block.is_empty() {
            self.deallocate_calls += 1;
        }

        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            self.inner.deallocate(block, alignment);
        }
    }

    fn owns(&self, block: ByteSpan) -> Option<bool> {
        self.inner.owns(block)
    }
}

impl<U: BulkResource> BulkResource for Counting<U> {
    fn deallocate_all(&mut self) {
        self.deallocate_calls = self.allocated.len();
        self.inner.deallocate_all();
    }
}
