use std::io;
use std::ptr::{self, NonNull};
use std::sync::OnceLock;

use crate::pal::Platform;

// Used if the operating system refuses to tell us. Every supported Unix has at least this.
const FALLBACK_PAGE_SIZE: usize = 4096;

/// Virtual memory bindings for the Unix family, built on `mmap()` and friends.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetPlatform;

// Real OS bindings are excluded from coverage measurement because:
// 1. They are exercised by the tests of every virtual memory backed resource.
// 2. Error paths require OS-level failures that are impractical to trigger in tests.
#[cfg_attr(coverage_nightly, coverage(off))]
impl Platform for BuildTargetPlatform {
    fn page_size(&self) -> usize {
        static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

        *PAGE_SIZE.get_or_init(|| {
            // SAFETY: No safety requirements.
            let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

            usize::try_from(page_size)
                .ok()
                .filter(|page_size| page_size.is_power_of_two())
                .unwrap_or(FALLBACK_PAGE_SIZE)
        })
    }

    fn allocation_granularity(&self) -> usize {
        // Unix maps address space at page granularity.
        self.page_size()
    }

    fn reserve(&self, len: usize) -> Result<NonNull<u8>, io::Error> {
        // SAFETY: An anonymous mapping without an address hint does not touch existing memory.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        NonNull::new(base.cast::<u8>()).ok_or_else(|| io::Error::other("mmap() returned null"))
    }

    fn release(&self, base: NonNull<u8>, len: usize) -> Result<(), io::Error> {
        // SAFETY: The caller passes a whole reservation that nothing references anymore.
        let result = unsafe { libc::munmap(base.as_ptr().cast(), len) };

        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn commit(&self, base: NonNull<u8>, len: usize) -> Result<(), io::Error> {
        let protection = libc::PROT_READ | libc::PROT_WRITE;

        // SAFETY: The caller passes page-aligned memory inside one of our reservations.
        let result = unsafe { libc::mprotect(base.as_ptr().cast(), len, protection) };

        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn decommit(&self, base: NonNull<u8>, len: usize) -> Result<(), io::Error> {
        // Dropping the pages first releases the physical memory, the protection change then
        // turns any later access into a fault instead of silently committing a zero page.

        // SAFETY: The caller passes page-aligned memory inside one of our reservations whose
        // contents are no longer needed.
        let result = unsafe { libc::madvise(base.as_ptr().cast(), len, libc::MADV_DONTNEED) };

        if result != 0 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: The caller passes page-aligned memory inside one of our reservations.
        let result = unsafe { libc::mprotect(base.as_ptr().cast(), len, libc::PROT_NONE) };

        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}
