//! Platform Abstraction Layer (PAL). All operating system calls for managing virtual memory go
//! through here so that the logic above can be tested against mock bindings.

mod abstractions;
pub(crate) use abstractions::*;

mod facade;
pub(crate) use facade::*;

#[cfg(all(unix, not(miri)))]
mod unix;
#[cfg(all(unix, not(miri)))]
pub(crate) use unix::*;

#[cfg(all(windows, not(miri)))]
mod windows;
#[cfg(all(windows, not(miri)))]
pub(crate) use windows::*;

// The fallback module is compiled in test mode on all platforms, under Miri, and as the primary
// implementation on platforms without virtual memory bindings. It is only glob-imported when it is
// the primary implementation. In test mode on supported platforms it is accessed via the explicit
// `fallback::` path.
#[cfg(any(test, miri, not(any(unix, windows))))]
pub(crate) mod fallback;

#[cfg(any(miri, not(any(unix, windows))))]
pub(crate) use fallback::*;
