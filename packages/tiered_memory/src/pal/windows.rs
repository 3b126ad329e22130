use std::io;
use std::ptr::NonNull;
use std::sync::OnceLock;

use ::windows::Win32::System::Memory::{
    MEM_COMMIT, MEM_DECOMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_NOACCESS, PAGE_READWRITE, VirtualAlloc,
    VirtualFree,
};
use ::windows::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

use crate::pal::Platform;

/// Virtual memory bindings for Windows, built on `VirtualAlloc()` and `VirtualFree()`.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetPlatform;

impl BuildTargetPlatform {
    /// Page size and allocation granularity, queried once on first use.
    fn system_info() -> (usize, usize) {
        static INFO: OnceLock<(usize, usize)> = OnceLock::new();

        *INFO.get_or_init(|| {
            let mut info = SYSTEM_INFO::default();

            // SAFETY: No safety requirements beyond passing a valid output pointer.
            unsafe {
                GetSystemInfo(&raw mut info);
            }

            (info.dwPageSize as usize, info.dwAllocationGranularity as usize)
        })
    }
}

// Real OS bindings are excluded from coverage measurement because:
// 1. They are exercised by the tests of every virtual memory backed resource.
// 2. Error paths require OS-level failures that are impractical to trigger in tests.
#[cfg_attr(coverage_nightly, coverage(off))]
impl Platform for BuildTargetPlatform {
    fn page_size(&self) -> usize {
        Self::system_info().0
    }

    fn allocation_granularity(&self) -> usize {
        Self::system_info().1
    }

    fn reserve(&self, len: usize) -> Result<NonNull<u8>, io::Error> {
        // SAFETY: Reserving fresh address space does not touch existing memory.
        let base = unsafe { VirtualAlloc(None, len, MEM_RESERVE, PAGE_NOACCESS) };

        NonNull::new(base.cast::<u8>()).ok_or_else(io::Error::last_os_error)
    }

    fn release(&self, base: NonNull<u8>, _len: usize) -> Result<(), io::Error> {
        // Windows releases whole reservations by base address, the length must be zero.

        // SAFETY: The caller passes a whole reservation that nothing references anymore.
        unsafe { VirtualFree(base.as_ptr().cast(), 0, MEM_RELEASE) }.map_err(io::Error::from)
    }

    fn commit(&self, base: NonNull<u8>, len: usize) -> Result<(), io::Error> {
        // SAFETY: The caller passes page-aligned memory inside one of our reservations.
        let committed = unsafe {
            VirtualAlloc(
                Some(base.as_ptr().cast_const().cast()),
                len,
                MEM_COMMIT,
                PAGE_READWRITE,
            )
        };

        if committed.is_null() {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn decommit(&self, base: NonNull<u8>, len: usize) -> Result<(), io::Error> {
        // SAFETY: The caller passes page-aligned memory inside one of our reservations whose
        // contents are no longer needed.
        unsafe { VirtualFree(base.as_ptr().cast(), len, MEM_DECOMMIT) }.map_err(io::Error::from)
    }
}
