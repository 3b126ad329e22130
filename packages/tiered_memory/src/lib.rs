#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Composable memory resources for programs that want to decide where their memory comes from.
//!
//! A [`MemoryResource`] hands out byte spans and takes them back. Resources come in two layers:
//!
//! * Leaf resources obtain memory from the outside world. [`SystemResource`] forwards to the
//!   process heap, [`SequentialResource`] bump-allocates from a caller-provided buffer,
//!   [`LinearVirtualResource`] bump-allocates from a reserved range of address space and commits
//!   pages on demand, and [`PageResource`] hands out individual pages of such a range.
//! * Layered resources are generic over the resource they obtain memory from.
//!   [`LinearResource`] bump-allocates from a chain of chunks, [`PoolResource`] recycles blocks of
//!   a single size and [`QuotaResource`] caps the number of outstanding bytes.
//!
//! Allocation never panics and never returns an error. A resource that cannot satisfy a request
//! returns [`RwByteSpan::empty()`].
//!
//! Resources that free everything at once implement [`BulkResource`]. Resources that can roll
//! back to an earlier state implement [`RewindableResource`].
//!
//! # Sharing resources
//!
//! Wrapping a resource in [`Polymorphic`] or [`Synchronized`] turns it into a
//! [`PolymorphicResource`] that can be shared through `Rc` or `Arc`. Such a resource can then be:
//!
//! * installed as the [active resource][active_resource] of the current thread via a
//!   [`ResourceGuard`];
//! * registered under a name in a [`Registry`] and looked up from anywhere in the process;
//! * bound to a [`ResourceAllocator`], which lets the containers of `allocator_api2` allocate from
//!   it.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//!
//! use allocator_api2::vec::Vec;
//! use tiered_memory::{
//!     Bytes, LinearResource, Polymorphic, QuotaResource, ResourceAllocator, ResourceGuard,
//!     SystemResource,
//! };
//!
//! // A frame allocator whose chunks count against a 1 MiB quota.
//! let frame = Rc::new(Polymorphic::new(LinearResource::new(QuotaResource::new(
//!     SystemResource,
//!     Bytes::mib(1),
//! ))));
//!
//! {
//!     let _guard = ResourceGuard::new(Rc::clone(&frame) as _);
//!
//!     let mut names = Vec::new_in(ResourceAllocator::active());
//!     names.extend(["alpha", "beta", "gamma"]);
//!     assert_eq!(names.len(), 3);
//! }
//!
//! assert_eq!(frame.borrow().underlying().allocated(), Bytes::kib(64));
//! ```
//!
//! # Virtual memory
//!
//! The [`virtual_memory`] module exposes the address space reservations that
//! [`LinearVirtualResource`] and [`PageResource`] are built on.

mod address;
mod alignment;
mod bytes;
mod container;
mod error;
mod linear;
mod linear_virtual;
mod page;
mod pal;
mod polymorphic;
mod pool;
mod quota;
mod registry;
mod resource;
mod scope;
mod sequential;
mod span;
mod system;
#[cfg(test)]
mod test_util;
pub mod virtual_memory;

pub use address::*;
pub use alignment::*;
pub use bytes::*;
pub use container::*;
pub use error::*;
pub use linear::*;
pub use linear_virtual::*;
pub use page::*;
pub use polymorphic::*;
pub use pool::*;
pub use quota::*;
pub use registry::*;
pub use resource::*;
pub use scope::*;
pub use sequential::*;
pub use span::*;
pub use system::*;
pub use virtual_memory::VirtualMemoryRange;

/// Locks are only poisoned if a resource panicked while holding one, after which the state of the
/// resource cannot be trusted.
const ERR_POISONED_LOCK: &str = "encountered poisoned lock - program validity cannot be guaranteed";
