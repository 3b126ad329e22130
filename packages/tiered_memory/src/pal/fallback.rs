use std::alloc::{self, Layout};
use std::io;
use std::ptr::NonNull;

use crate::pal::Platform;

const PAGE_SIZE: usize = 4096;

/// Virtual memory emulated on top of the global allocator, for platforms without bindings.
///
/// A reservation is an ordinary zeroed heap allocation that is always accessible, so commit and
/// decommit only validate their input.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetPlatform;

impl BuildTargetPlatform {
    fn layout(len: usize) -> Result<Layout, io::Error> {
        Layout::from_size_align(len, PAGE_SIZE)
            .map_err(|inner| io::Error::new(io::ErrorKind::InvalidInput, inner))
    }
}

impl Platform for BuildTargetPlatform {
    fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    fn allocation_granularity(&self) -> usize {
        PAGE_SIZE
    }

    fn reserve(&self, len: usize) -> Result<NonNull<u8>, io::Error> {
        let layout = Self::layout(len)?;

        if layout.size() == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot reserve zero bytes",
            ));
        }

        // SAFETY: The layout has a non-zero size.
        let base = unsafe { alloc::alloc_zeroed(layout) };

        NonNull::new(base).ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))
    }

    fn release(&self, base: NonNull<u8>, len: usize) -> Result<(), io::Error> {
        let layout = Self::layout(len)?;

        // SAFETY: The caller passes a whole reservation, which we allocated with this layout.
        unsafe {
            alloc::dealloc(base.as_ptr(), layout);
        }

        Ok(())
    }

    fn commit(&self, base: NonNull<u8>, len: usize) -> Result<(), io::Error> {
        check_page_range(base, len)
    }

    fn decommit(&self, base: NonNull<u8>, len: usize) -> Result<(), io::Error> {
        check_page_range(base, len)
    }
}

fn check_page_range(base: NonNull<u8>, len: usize) -> Result<(), io::Error> {
    if base.as_ptr().addr() % PAGE_SIZE == 0 && len % PAGE_SIZE == 0 {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "range is not page-aligned",
        ))
    }
}
