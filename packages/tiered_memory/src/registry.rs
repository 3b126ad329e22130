use std::collections::BTreeSet;
use std::fmt;
use std::hash::BuildHasher;
use std::sync::{Arc, LazyLock, Mutex};

use foldhash::fast::FixedState;
use tracing::debug;

use crate::error::Result;
use crate::{ERR_POISONED_LOCK, Error, SharedResource, SystemResource};

/// The name under which the [`SystemResource`] is always registered.
pub const SYSTEM_LABEL: &str = "system";

/// The hashed form of a resource name.
///
/// Labels are stable across runs and processes, so they can be stored in place of names.
///
/// # Examples
///
/// ```
/// use tiered_memory::Label;
///
/// assert_eq!(Label::of("frame"), Label::of("frame"));
/// assert_ne!(Label::of("frame"), Label::of("scratch"));
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Label(u64);

impl Label {
    /// The label of `name`.
    #[must_use]
    pub fn of(name: &str) -> Self {
        Self(FixedState::with_seed(0).hash_one(name))
    }

    /// The hash value of the label.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

struct Entry {
    name: String,
    resource: SharedResource,
}

/// Named resources that can be looked up from anywhere in the program.
///
/// Registrations are permanent. Registering a second resource under a taken name fails.
/// The name [`SYSTEM_LABEL`] always resolves to the [`SystemResource`] and cannot be taken.
///
/// Most programs use the [process-wide registry][Registry::global] through the free functions
/// [`register()`] and [`lookup()`]. Separate instances are useful to pass resources around
/// explicitly.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use tiered_memory::{
///     Bytes, LinearResource, PolymorphicResource, Registry, Synchronized, SystemResource, align,
/// };
///
/// let registry = Registry::new();
/// registry
///     .register("frame", Arc::new(Synchronized::new(LinearResource::new(SystemResource))))
///     .unwrap();
///
/// let frame = registry.lookup("frame").unwrap();
/// assert!(!frame.allocate(Bytes::new(64), align!(8)).is_empty());
///
/// assert!(registry.lookup("system").is_some());
/// assert!(registry.lookup("scratch").is_none());
/// ```
pub struct Registry {
    entries: Mutex<foldhash::HashMap<Label, Entry>>,
}

impl Registry {
    /// Creates a registry that only knows the system resource.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(foldhash::HashMap::default()),
        }
    }

    /// The process-wide registry.
    #[must_use]
    pub fn global() -> &'static Self {
        static GLOBAL: LazyLock<Registry> = LazyLock::new(Registry::new);

        &GLOBAL
    }

    /// Registers `resource` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateLabel`] if the name, or another name with the same label, is
    /// already taken.
    pub fn register(&self, name: &str, resource: SharedResource) -> Result<Label> {
        let label = Label::of(name);

        if label == Label::of(SYSTEM_LABEL) {
            return Err(Error::DuplicateLabel {
                name: name.to_string(),
            });
        }

        let mut entries = self.entries.lock().expect(ERR_POISONED_LOCK);

        if entries.contains_key(&label) {
            return Err(Error::DuplicateLabel {
                name: name.to_string(),
            });
        }

        entries.insert(
            label,
            Entry {
                name: name.to_string(),
                resource,
            },
        );

        debug!(name, label = label.get(), "registered memory resource");

        Ok(label)
    }

    /// Registers every resource under its name, or none of them.
    ///
    /// The whole batch is checked and inserted while the registry is locked, so no concurrent
    /// registration can take one of the names halfway through. Returns the labels in the order
    /// of the batch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateLabel`] for the first name whose label is already taken, is the
    /// label of [`SYSTEM_LABEL`] or appears twice in the batch. Nothing is registered then.
    pub fn register_all<'n>(
        &self,
        resources: impl IntoIterator<Item = (&'n str, SharedResource)>,
    ) -> Result<Vec<Label>> {
        let batch: Vec<_> = resources
            .into_iter()
            .map(|(name, resource)| (name, Label::of(name), resource))
            .collect();

        let mut entries = self.entries.lock().expect(ERR_POISONED_LOCK);
        let mut seen = BTreeSet::new();

        for (name, label, _) in &batch {
            if *label == Label::of(SYSTEM_LABEL)
                || entries.contains_key(label)
                || !seen.insert(*label)
            {
                return Err(Error::DuplicateLabel {
                    name: (*name).to_string(),
                });
            }
        }

        let mut labels = Vec::with_capacity(batch.len());

        for (name, label, resource) in batch {
            entries.insert(
                label,
                Entry {
                    name: name.to_string(),
                    resource,
                },
            );

            debug!(name, label = label.get(), "registered memory resource");

            labels.push(label);
        }

        Ok(labels)
    }

    /// The resource registered under `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<SharedResource> {
        if name == SYSTEM_LABEL {
            return Some(Arc::new(SystemResource));
        }

        let entries = self.entries.lock().expect(ERR_POISONED_LOCK);

        entries
            .get(&Label::of(name))
            .filter(|entry| entry.name == name)
            .map(|entry| Arc::clone(&entry.resource))
    }

    /// The resource registered under `label`.
    #[must_use]
    pub fn lookup_label(&self, label: Label) -> Option<SharedResource> {
        if label == Label::of(SYSTEM_LABEL) {
            return Some(Arc::new(SystemResource));
        }

        let entries = self.entries.lock().expect(ERR_POISONED_LOCK);

        entries.get(&label).map(|entry| Arc::clone(&entry.resource))
    }

    /// The names of all registered resources, excluding the built-in system resource.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let entries = self.entries.lock().expect(ERR_POISONED_LOCK);

        let mut names: Vec<_> = entries.values().map(|entry| entry.name.clone()).collect();
        names.sort();
        names
    }

    /// The number of registered resources, excluding the built-in system resource.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect(ERR_POISONED_LOCK).len()
    }

    /// Whether nothing but the built-in system resource is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.names())
            .finish()
    }
}

/// Registers `resource` under `name` in the [process-wide registry][Registry::global].
///
/// # Errors
///
/// Returns [`Error::DuplicateLabel`] if the name is already taken.
pub fn register(name: &str, resource: SharedResource) -> Result<Label> {
    Registry::global().register(name, resource)
}

/// The resource registered under `name` in the [process-wide registry][Registry::global].
#[must_use]
pub fn lookup(name: &str) -> Option<SharedResource> {
    Registry::global().lookup(name)
}
