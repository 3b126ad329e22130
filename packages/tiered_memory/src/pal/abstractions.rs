#![cfg_attr(
    test,
    expect(
        clippy::struct_field_names,
        reason = "false positive from automock generated code"
    )
)]

use std::fmt::Debug;
use std::io;
use std::ptr::NonNull;

/// Operating system virtual memory operations.
///
/// Callers pass page-aligned ranges that lie within a single reservation obtained from
/// [`reserve()`][Platform::reserve]. The implementations do not validate this.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Platform: Debug + Send + Sync + 'static {
    /// Size of a virtual memory page in bytes. Always a power of two.
    fn page_size(&self) -> usize;

    /// Unit in which address space is reserved. A multiple of the page size.
    fn allocation_granularity(&self) -> usize;

    /// Reserves `len` bytes of address space without committing any of it.
    ///
    /// `len` is a multiple of the allocation granularity.
    fn reserve(&self, len: usize) -> Result<NonNull<u8>, io::Error>;

    /// Returns a whole reservation to the operating system.
    fn release(&self, base: NonNull<u8>, len: usize) -> Result<(), io::Error>;

    /// Makes the pages in the range readable and writable.
    fn commit(&self, base: NonNull<u8>, len: usize) -> Result<(), io::Error>;

    /// Discards the contents of the pages in the range and makes them inaccessible, keeping
    /// the address space reserved.
    fn decommit(&self, base: NonNull<u8>, len: usize) -> Result<(), io::Error>;
}
