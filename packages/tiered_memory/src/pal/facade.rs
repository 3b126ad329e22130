#![cfg_attr(coverage_nightly, coverage(off))]

use std::fmt::Debug;
use std::io;
use std::ptr::NonNull;
#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use crate::pal::MockPlatform;
use crate::pal::{BuildTargetPlatform, Platform};

/// Enum to hide the real/mock choice behind a single wrapper type.
#[derive(Clone)]
pub(crate) enum PlatformFacade {
    Target(&'static BuildTargetPlatform),

    #[cfg(test)]
    Mock(Arc<MockPlatform>),
}

impl PlatformFacade {
    pub(crate) const fn target() -> Self {
        Self::Target(&BuildTargetPlatform)
    }

    #[cfg(test)]
    pub(crate) fn from_mock(mock: MockPlatform) -> Self {
        Self::Mock(Arc::new(mock))
    }
}

impl Platform for PlatformFacade {
    fn page_size(&self) -> usize {
        match self {
            Self::Target(platform) => platform.page_size(),
            #[cfg(test)]
            Self::Mock(mock) => mock.page_size(),
        }
    }

    fn allocation_granularity(&self) -> usize {
        match self {
            Self::Target(platform) => platform.allocation_granularity(),
            #[cfg(test)]
            Self::Mock(mock) => mock.allocation_granularity(),
        }
    }

    fn reserve(&self, len: usize) -> Result<NonNull<u8>, io::Error> {
        match self {
            Self::Target(platform) => platform.reserve(len),
            #[cfg(test)]
            Self::Mock(mock) => mock.reserve(len),
        }
    }

    fn release(&self, base: NonNull<u8>, len: usize) -> Result<(), io::Error> {
        match self {
            Self::Target(platform) => platform.release(base, len),
            #[cfg(test)]
            Self::Mock(mock) => mock.release(base, len),
        }
    }

    fn commit(&self, base: NonNull<u8>, len: usize) -> Result<(), io::Error> {
        match self {
            Self::Target(platform) => platform.commit(base, len),
            #[cfg(test)]
            Self::Mock(mock) => mock.commit(base, len),
        }
    }

    fn decommit(&self, base: NonNull<u8>, len: usize) -> Result<(), io::Error> {
        match self {
            Self::Target(platform) => platform.decommit(base, len),
            #[cfg(test)]
            Self::Mock(mock) => mock.decommit(base, len),
        }
    }
}

impl Debug for PlatformFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Target(inner) => inner.fmt(f),
            #[cfg(test)]
            Self::Mock(inner) => inner.fmt(f),
        }
    }
}
