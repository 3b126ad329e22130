use std::cell::{Ref, RefCell};
use std::fmt;
use std::ptr;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{Alignment, ByteSpan, Bytes, ERR_POISONED_LOCK, MemoryResource, RwByteSpan};

/// A memory resource behind dynamic dispatch.
///
/// This is the shape in which resources are installed as the
/// [active resource][crate::active_resource], placed in a [`Registry`][crate::Registry] or bound
/// to a [`ResourceAllocator`][crate::ResourceAllocator]. Operations take `&self` so that a
/// resource can be shared through `Rc` or `Arc`. Wrap a [`MemoryResource`] in [`Polymorphic`]
/// for use on one thread or in [`Synchronized`] for use on many.
///
/// `Rc<T>` and `Arc<T>` implement [`MemoryResource`] for every polymorphic `T`, so a shared
/// resource can also serve as the underlying resource of a layered one.
///
/// # Safety
///
/// Same as [`MemoryResource`].
pub unsafe trait PolymorphicResource {
    /// See [`MemoryResource::allocate()`].
    fn allocate(&self, size: Bytes, alignment: Alignment) -> RwByteSpan;

    /// See [`MemoryResource::deallocate()`].
    ///
    /// # Safety
    ///
    /// Same as [`MemoryResource::deallocate()`].
    unsafe fn deallocate(&self, block: RwByteSpan, alignment: Alignment);

    /// See [`MemoryResource::owns()`].
    fn owns(&self, block: ByteSpan) -> Option<bool> {
        _ = block;
        None
    }

    /// An address that identifies the resource. Handles to the same resource report the same
    /// identity.
    fn identity(&self) -> *const () {
        ptr::from_ref(self).cast()
    }
}

/// A resource shared between threads.
pub type SharedResource = Arc<dyn PolymorphicResource + Send + Sync>;

/// Adapts a [`MemoryResource`] for use behind dynamic dispatch on a single thread.
///
/// # Panics
///
/// Operations panic if they are re-entered, for example from within the wrapped resource.
///
/// # Examples
///
/// ```
/// use std::rc::Rc;
///
/// use tiered_memory::{
///     Bytes, LinearResource, Polymorphic, PolymorphicResource, SystemResource, align,
/// };
///
/// let frame: Rc<dyn PolymorphicResource> =
///     Rc::new(Polymorphic::new(LinearResource::new(SystemResource)));
///
/// let block = frame.allocate(Bytes::new(32), align!(8));
/// assert_eq!(frame.owns(block.into()), Some(true));
/// ```
#[derive(Debug, Default)]
pub struct Polymorphic<R> {
    inner: RefCell<R>,
}

impl<R: MemoryResource> Polymorphic<R> {
    /// Wraps `resource`.
    #[must_use]
    pub fn new(resource: R) -> Self {
        Self {
            inner: RefCell::new(resource),
        }
    }

    /// Borrows the wrapped resource, for example to read its counters.
    ///
    /// # Panics
    ///
    /// Panics if the resource is in the middle of an operation.
    #[must_use]
    pub fn borrow(&self) -> Ref<'_, R> {
        self.inner.borrow()
    }

    /// Unwraps the resource.
    #[must_use]
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

// SAFETY: Forwarding to the wrapped resource, which upholds the contract.
unsafe impl<R: MemoryResource> PolymorphicResource for Polymorphic<R> {
    fn allocate(&self, size: Bytes, alignment: Alignment) -> RwByteSpan {
        self.inner.borrow_mut().allocate(size, alignment)
    }

    unsafe fn deallocate(&self, block: RwByteSpan, alignment: Alignment) {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            self.inner.borrow_mut().deallocate(block, alignment);
        }
    }

    fn owns(&self, block: ByteSpan) -> Option<bool> {
        self.inner.borrow().owns(block)
    }
}

/// Adapts a [`MemoryResource`] for use behind dynamic dispatch from any thread.
///
/// Every operation locks a mutex around the wrapped resource.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use tiered_memory::{
///     Bytes, PolymorphicResource, QuotaResource, SharedResource, Synchronized, SystemResource,
///     align,
/// };
///
/// let capped: SharedResource =
///     Arc::new(Synchronized::new(QuotaResource::new(SystemResource, Bytes::mib(1))));
///
/// let worker = {
///     let capped = Arc::clone(&capped);
///     thread::spawn(move || !capped.allocate(Bytes::kib(1), align!(8)).is_empty())
/// };
///
/// assert!(worker.join().unwrap());
/// ```
#[derive(Debug, Default)]
pub struct Synchronized<R> {
    inner: Mutex<R>,
}

impl<R: MemoryResource> Synchronized<R> {
    /// Wraps `resource`.
    #[must_use]
    pub fn new(resource: R) -> Self {
        Self {
            inner: Mutex::new(resource),
        }
    }

    /// Locks the wrapped resource, for example to read its counters.
    pub fn lock(&self) -> MutexGuard<'_, R> {
        self.inner.lock().expect(ERR_POISONED_LOCK)
    }

    /// Unwraps the resource.
    #[must_use]
    pub fn into_inner(self) -> R {
        self.inner.into_inner().expect(ERR_POISONED_LOCK)
    }
}

// SAFETY: Forwarding to the wrapped resource, which upholds the contract.
unsafe impl<R: MemoryResource> PolymorphicResource for Synchronized<R> {
    fn allocate(&self, size: Bytes, alignment: Alignment) -> RwByteSpan {
        self.lock().allocate(size, alignment)
    }

    unsafe fn deallocate(&self, block: RwByteSpan, alignment: Alignment) {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            self.lock().deallocate(block, alignment);
        }
    }

    fn owns(&self, block: ByteSpan) -> Option<bool> {
        self.lock().owns(block)
    }
}

/// A registered resource installed on one thread. Reports the identity of the shared resource
/// so that every handle to it compares equal.
pub(crate) struct Shared(pub(crate) SharedResource);

// SAFETY: Forwarding to the shared resource, which upholds the contract.
unsafe impl PolymorphicResource for Shared {
    fn allocate(&self, size: Bytes, alignment: Alignment) -> RwByteSpan {
        PolymorphicResource::allocate(&*self.0, size, alignment)
    }

    unsafe fn deallocate(&self, block: RwByteSpan, alignment: Alignment) {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            PolymorphicResource::deallocate(&*self.0, block, alignment);
        }
    }

    fn owns(&self, block: ByteSpan) -> Option<bool> {
        PolymorphicResource::owns(&*self.0, block)
    }

    fn identity(&self) -> *const () {
        self.0.identity()
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shared").field(&self.0.identity()).finish()
    }
}

// SAFETY: Forwarding to the shared resource, which upholds the contract.
unsafe impl<T: PolymorphicResource + ?Sized> MemoryResource for Rc<T> {
    fn allocate(&mut self, size: Bytes, alignment: Alignment) -> RwByteSpan {
        PolymorphicResource::allocate(&**self, size, alignment)
    }

    unsafe fn deallocate(&mut self, block: RwByteSpan, alignment: Alignment) {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            PolymorphicResource::deallocate(&**self, block, alignment);
        }
    }

    fn owns(&self, block: ByteSpan) -> Option<bool> {
        PolymorphicResource::owns(&**self, block)
    }
}

// SAFETY: Forwarding to the shared resource, which upholds the contract.
unsafe impl<T: PolymorphicResource + ?Sized> MemoryResource for Arc<T> {
    fn allocate(&mut self, size: Bytes, alignment: Alignment) -> RwByteSpan {
        PolymorphicResource::allocate(&**self, size, alignment)
    }

    unsafe fn deallocate(&mut self, block: RwByteSpan, alignment: Alignment) {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            PolymorphicResource::deallocate(&**self, block, alignment);
        }
    }

    fn owns(&self, block: ByteSpan) -> Option<bool> {
        PolymorphicResource::owns(&**self, block)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::thread;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::{LinearResource, PoolResource, QuotaResource, SystemResource, align};

    assert_impl_all!(Polymorphic<SystemResource>: Send);
    assert_not_impl_any!(Polymorphic<SystemResource>: Sync);
    assert_impl_all!(Synchronized<SystemResource>: Send, Sync);
    assert_impl_all!(Synchronized<LinearResource<SystemResource>>: Send, Sync);

    #[test]
    fn dynamic_dispatch_forwards() {
        let handle: Rc<dyn PolymorphicResource> =
            Rc::new(Polymorphic::new(LinearResource::new(SystemResource)));
        let frame = &*handle;

        let block = frame.allocate(Bytes::new(64), align!(32));
        assert!(block.is_aligned(align!(32)));
        assert_eq!(frame.owns(block.into()), Some(true));

        // SAFETY: The block came from this resource and is not used afterwards.
        unsafe {
            frame.deallocate(block, align!(32));
        }
    }

    #[test]
    fn counters_are_reachable_through_the_wrapper() {
        let pool = Polymorphic::new(PoolResource::new(SystemResource, Bytes::new(32), align!(8)));

        let block = pool.allocate(Bytes::new(32), align!(8));
        // SAFETY: The block came from this resource and is not used afterwards.
        unsafe {
            pool.deallocate(block, align!(8));
        }

        assert_eq!(pool.borrow().free_block_count(), 1);
        assert_eq!(pool.into_inner().slab_count(), 1);
    }

    #[test]
    fn identity_distinguishes_instances() {
        let a = Polymorphic::new(LinearResource::new(SystemResource));
        let b = Polymorphic::new(LinearResource::new(SystemResource));

        assert_eq!(a.identity(), a.identity());
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn shared_wrapper_reports_inner_identity() {
        let shared: SharedResource = Arc::new(Synchronized::new(SystemResource));
        let first = Shared(Arc::clone(&shared));
        let second = Shared(Arc::clone(&shared));

        assert_eq!(first.identity(), shared.identity());
        assert_eq!(first.identity(), second.identity());
    }

    #[test]
    fn rc_serves_as_underlying_resource() {
        let shared: Rc<dyn PolymorphicResource> = Rc::new(Polymorphic::new(QuotaResource::new(
            SystemResource,
            Bytes::kib(128),
        )));

        let mut linear = LinearResource::with_granularity(Rc::clone(&shared), Bytes::kib(64));
        assert!(!linear.allocate(Bytes::new(10), align!(8)).is_empty());

        // A second chunk would exceed the quota.
        assert!(linear.allocate(Bytes::kib(100), align!(8)).is_empty());

        drop(linear);
        assert!(!PolymorphicResource::allocate(&*shared, Bytes::kib(128), align!(8)).is_empty());
    }

    #[test]
    fn synchronized_serves_many_threads() {
        let shared: Arc<Synchronized<QuotaResource<SystemResource>>> = Arc::new(
            Synchronized::new(QuotaResource::new(SystemResource, Bytes::mib(1))),
        );

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    let resource = &*shared;

                    for _ in 0..100 {
                        let block = resource.allocate(Bytes::kib(1), align!(16));
                        assert!(!block.is_empty());

                        // SAFETY: The block came from this resource and is not used afterwards.
                        unsafe {
                            resource.deallocate(block, align!(16));
                        }
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(shared.lock().allocated(), Bytes::ZERO);
    }

    #[test]
    fn arc_serves_as_underlying_resource() {
        let shared: SharedResource = Arc::new(Synchronized::new(SystemResource));
        let mut handle = Arc::clone(&shared);

        let block = MemoryResource::allocate(&mut handle, Bytes::new(16), align!(8));
        assert_eq!(MemoryResource::owns(&handle, block.into()), Some(true));

        // SAFETY: The block came from this resource and is not used afterwards.
        unsafe {
            MemoryResource::deallocate(&mut handle, block, align!(8));
        }
    }
}
