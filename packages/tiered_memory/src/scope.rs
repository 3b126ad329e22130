use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::rc::Rc;
use std::thread;

use crate::polymorphic::Shared;
use crate::{PolymorphicResource, Registry, SystemResource};

thread_local! {
    static ACTIVE: RefCell<Rc<dyn PolymorphicResource>> = RefCell::new(Rc::new(SystemResource));
}

/// The resource that code on the current thread allocates from when it is not handed one
/// explicitly.
///
/// Every thread starts out with the [`SystemResource`].
#[must_use]
pub fn active_resource() -> Rc<dyn PolymorphicResource> {
    ACTIVE.with_borrow(Rc::clone)
}

/// Replaces the active resource of the current thread, returning the previous one.
///
/// Prefer [`ResourceGuard`], which restores the previous resource automatically.
pub fn set_active_resource(resource: Rc<dyn PolymorphicResource>) -> Rc<dyn PolymorphicResource> {
    ACTIVE.with_borrow_mut(|active| mem::replace(active, resource))
}

/// Makes a resource the [active resource][active_resource] of the current thread for as long as
/// the guard lives.
///
/// Dropping the guard reinstates the resource that was active before. Guards on one thread must
/// be dropped in the reverse order of their creation, which debug builds verify. Each thread has
/// its own stack of guards and the guard cannot leave the thread it was created on.
///
/// # Examples
///
/// ```
/// use std::rc::Rc;
///
/// use tiered_memory::{
///     LinearResource, Polymorphic, PolymorphicResource, ResourceGuard, SystemResource,
///     active_resource,
/// };
///
/// let frame: Rc<dyn PolymorphicResource> =
///     Rc::new(Polymorphic::new(LinearResource::new(SystemResource)));
///
/// {
///     let _guard = ResourceGuard::new(Rc::clone(&frame));
///     assert_eq!(active_resource().identity(), frame.identity());
/// }
///
/// assert_ne!(active_resource().identity(), frame.identity());
/// ```
#[must_use = "the previous resource is reinstated as soon as the guard is dropped"]
pub struct ResourceGuard {
    // Taken when the guard is dropped.
    previous: Option<Rc<dyn PolymorphicResource>>,

    installed: *const (),
}

impl ResourceGuard {
    /// Activates `resource` on the current thread.
    pub fn new(resource: Rc<dyn PolymorphicResource>) -> Self {
        let installed = resource.identity();
        let previous = set_active_resource(resource);

        Self {
            previous: Some(previous),
            installed,
        }
    }

    /// Activates the resource registered under `name` in the
    /// [process-wide registry][Registry::global] on the current thread.
    ///
    /// Returns `None` if no resource is registered under `name`.
    #[must_use]
    pub fn named(name: &str) -> Option<Self> {
        Self::named_in(Registry::global(), name)
    }

    /// Activates the resource registered under `name` in `registry` on the current thread.
    ///
    /// Returns `None` if no resource is registered under `name`.
    #[must_use]
    pub fn named_in(registry: &Registry, name: &str) -> Option<Self> {
        let resource = registry.lookup(name)?;
        Some(Self::new(Rc::new(Shared(resource))))
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        let Some(previous) = self.previous.take() else {
            return;
        };

        let displaced = set_active_resource(previous);

        if !thread::panicking() {
            debug_assert_eq!(
                displaced.identity(),
                self.installed,
                "resource guards must be dropped in the reverse order of their creation"
            );
        }
    }
}

impl fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("installed", &self.installed)
            .field(
                "previous",
                &self.previous.as_ref().map(|previous| previous.identity()),
            )
            .finish()
    }
}
