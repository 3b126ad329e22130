use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use tiered_memory::{
    Alignment, Bytes, DEFAULT_CHUNK_GRANULARITY, Label, LinearResource, LinearVirtualResource,
    PageResource, PoolResource, QuotaResource, Registry, RwByteSpan, SYSTEM_LABEL,
    SequentialResource, SharedResource, Synchronized, SystemResource, virtual_memory,
};
use tracing::debug;

use crate::{ConfigError, ResourceConfig, ResourceDefinition, Result};

/// Instantiates the resources of a [`ResourceConfig`] and registers them in a [`Registry`].
///
/// Definitions are instantiated in dependency order, so a resource is always created after the
/// resource it names as `underlying`. Every instantiated resource is wrapped in a
/// [`Synchronized`] adapter, which makes it usable from any thread.
///
/// Sequential resources hand out memory that the caller owns. The memory is supplied per label
/// via [`with_buffer()`][Self::with_buffer] or [`with_range()`][Self::with_range] before loading.
///
/// Either all resources of a configuration are registered or, if any of them fails to
/// instantiate, none are.
///
/// # Examples
///
/// ```
/// use tiered_memory::{Bytes, PolymorphicResource, Registry, align};
/// use tiered_memory_config::{Loader, ResourceConfig};
///
/// let config = ResourceConfig::parse(
///     r#"
///     [resources.frame]
///     kind = "linear_chunked"
///     chunk_size = "64 KiB"
///     underlying = "capped"
///
///     [resources.capped]
///     kind = "quota"
///     quota = "1 MiB"
///     "#,
/// )
/// .unwrap();
///
/// let registry = Registry::new();
/// Loader::with_registry(&registry).load(&config).unwrap();
///
/// let frame = registry.lookup("frame").unwrap();
/// assert!(!frame.allocate(Bytes::new(128), align!(8)).is_empty());
/// ```
#[derive(Debug)]
pub struct Loader<'r> {
    registry: &'r Registry,
    ranges: BTreeMap<String, RwByteSpan>,
}

impl Loader<'static> {
    /// Creates a loader that registers resources in the
    /// [process-wide registry][Registry::global].
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(Registry::global())
    }
}

impl Default for Loader<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'r> Loader<'r> {
    /// Creates a loader that registers resources in `registry`.
    #[must_use]
    pub fn with_registry(registry: &'r Registry) -> Self {
        Self {
            registry,
            ranges: BTreeMap::new(),
        }
    }

    /// Supplies the memory of the sequential resource under `label`.
    #[must_use]
    pub fn with_buffer(self, label: impl Into<String>, buffer: &'static mut [u8]) -> Self {
        let range = RwByteSpan::from_slice(buffer);

        // SAFETY: The buffer is exclusively borrowed for the rest of the process.
        unsafe { self.with_range(label, range) }
    }

    /// Supplies the memory of the sequential resource under `label`.
    ///
    /// # Safety
    ///
    /// The range must be valid for reads and writes for the rest of the process and must not be
    /// accessed by anything other than the resource and the holders of the spans it hands out.
    #[must_use]
    pub unsafe fn with_range(mut self, label: impl Into<String>, range: RwByteSpan) -> Self {
        self.ranges.insert(label.into(), range);
        self
    }

    /// Instantiates and registers every resource in `config`, returning their labels in the
    /// order they were created.
    ///
    /// # Errors
    ///
    /// Returns an error if a definition is invalid, names an underlying resource that cannot be
    /// resolved, uses a label that is already registered or lacks a memory range, if a supplied
    /// range has no matching sequential definition or if the operating system refuses to reserve
    /// address space.
    pub fn load(self, config: &ResourceConfig) -> Result<Vec<Label>> {
        for label in self.ranges.keys() {
            if !matches!(config.get(label), Some(ResourceDefinition::Sequential)) {
                return Err(ConfigError::UnusedRange {
                    label: label.clone(),
                });
            }
        }

        for label in config.labels() {
            if label == SYSTEM_LABEL || self.registry.lookup(label).is_some() {
                return Err(ConfigError::DuplicateLabel {
                    label: label.to_string(),
                });
            }
        }

        let order = instantiation_order(config)?;

        let mut created: BTreeMap<&str, SharedResource> = BTreeMap::new();
        let mut sequence = Vec::with_capacity(order.len());

        for label in order {
            let Some(definition) = config.get(label) else {
                continue;
            };

            let resource = self.instantiate(label, definition, &created)?;

            debug!(label, kind = definition.kind(), "instantiated memory resource");

            created.insert(label, resource);
            sequence.push(label);
        }

        let batch = sequence
            .into_iter()
            .filter_map(|label| created.remove(label).map(|resource| (label, resource)));

        let labels = self
            .registry
            .register_all(batch)
            .map_err(|error| match error {
                tiered_memory::Error::DuplicateLabel { name } => {
                    ConfigError::DuplicateLabel { label: name }
                }
                other => ConfigError::Registration(other),
            })?;

        debug!(count = labels.len(), "loaded memory resource configuration");

        Ok(labels)
    }

    /// Parses `document` and [loads][Self::load] it.
    ///
    /// # Errors
    ///
    /// Same as [`ResourceConfig::parse()`] and [`load()`][Self::load].
    pub fn load_str(self, document: &str) -> Result<Vec<Label>> {
        self.load(&ResourceConfig::parse(document)?)
    }

    /// Reads the file at `path` and [loads][Self::load] it.
    ///
    /// # Errors
    ///
    /// Same as [`ResourceConfig::from_file()`] and [`load()`][Self::load].
    pub fn load_file(self, path: impl AsRef<Path>) -> Result<Vec<Label>> {
        self.load(&ResourceConfig::from_file(path)?)
    }

    fn instantiate(
        &self,
        label: &str,
        definition: &ResourceDefinition,
        created: &BTreeMap<&str, SharedResource>,
    ) -> Result<SharedResource> {
        let resource: SharedResource = match definition {
            ResourceDefinition::LinearVirtual {
                capacity,
                granularity,
            } => {
                let granularity = granularity.unwrap_or_else(virtual_memory::page_size);
                require_positive(label, "capacity", *capacity)?;
                require_positive(label, "granularity", granularity)?;

                if LinearVirtualResource::commit_granularity(granularity).is_none() {
                    return Err(ConfigError::InvalidSize {
                        label: label.to_string(),
                        field: "granularity",
                        value: granularity,
                    });
                }

                let arena = LinearVirtualResource::new(*capacity, granularity).ok_or_else(|| {
                    ConfigError::ReservationFailed {
                        label: label.to_string(),
                        capacity: *capacity,
                    }
                })?;

                Arc::new(Synchronized::new(arena))
            }
            ResourceDefinition::Page { capacity } => {
                require_positive(label, "capacity", *capacity)?;

                let pages =
                    PageResource::new(*capacity).ok_or_else(|| ConfigError::ReservationFailed {
                        label: label.to_string(),
                        capacity: *capacity,
                    })?;

                Arc::new(Synchronized::new(pages))
            }
            ResourceDefinition::Sequential => {
                let range = self.ranges.get(label).copied().ok_or_else(|| {
                    ConfigError::MissingRange {
                        label: label.to_string(),
                    }
                })?;

                // SAFETY: The caller of `with_range()` vouched for the range. The loader is
                // consumed by loading, so the range is handed to exactly one resource.
                let scratch = unsafe { SequentialResource::from_span(range) };

                Arc::new(Synchronized::new(scratch))
            }
            ResourceDefinition::LinearChunked {
                chunk_size,
                underlying,
            } => {
                let chunk_size = chunk_size.unwrap_or(DEFAULT_CHUNK_GRANULARITY);
                require_positive(label, "chunk_size", chunk_size)?;

                let underlying = self.resolve(label, underlying.as_deref(), created)?;

                Arc::new(Synchronized::new(LinearResource::with_granularity(
                    underlying, chunk_size,
                )))
            }
            ResourceDefinition::Pool {
                block_size,
                alignment,
                slab_size,
                underlying,
            } => {
                require_positive(label, "block_size", *block_size)?;

                let alignment = match alignment {
                    Some(value) => {
                        Alignment::new(*value).ok_or_else(|| ConfigError::InvalidAlignment {
                            label: label.to_string(),
                            value: *value,
                        })?
                    }
                    None => Alignment::DEFAULT,
                };

                let underlying = self.resolve(label, underlying.as_deref(), created)?;

                let mut pool = PoolResource::try_new(underlying, *block_size, alignment)
                    .ok_or_else(|| ConfigError::InvalidSize {
                        label: label.to_string(),
                        field: "block_size",
                        value: *block_size,
                    })?;

                if let Some(slab_size) = slab_size {
                    require_positive(label, "slab_size", *slab_size)?;
                    pool = pool.with_slab_size(*slab_size);
                }

                Arc::new(Synchronized::new(pool))
            }
            ResourceDefinition::Quota { quota, underlying } => {
                if quota.is_negative() {
                    return Err(ConfigError::InvalidSize {
                        label: label.to_string(),
                        field: "quota",
                        value: *quota,
                    });
                }

                let underlying = self.resolve(label, underlying.as_deref(), created)?;

                Arc::new(Synchronized::new(QuotaResource::new(underlying, *quota)))
            }
        };

        Ok(resource)
    }

    fn resolve(
        &self,
        label: &str,
        underlying: Option<&str>,
        created: &BTreeMap<&str, SharedResource>,
    ) -> Result<SharedResource> {
        let Some(name) = underlying else {
            return Ok(Arc::new(SystemResource));
        };

        if let Some(resource) = created.get(name) {
            return Ok(Arc::clone(resource));
        }

        // Covers `system` as well as resources registered before this configuration.
        self.registry
            .lookup(name)
            .ok_or_else(|| ConfigError::UnknownUnderlying {
                label: label.to_string(),
                underlying: name.to_string(),
            })
    }
}

fn require_positive(label: &str, field: &'static str, value: Bytes) -> Result<()> {
    if value > Bytes::ZERO {
        Ok(())
    } else {
        Err(ConfigError::InvalidSize {
            label: label.to_string(),
            field,
            value,
        })
    }
}

/// Orders the labels of `config` so that every label comes after the label it names as its
/// underlying resource.
fn instantiation_order(config: &ResourceConfig) -> Result<Vec<&str>> {
    let mut order = Vec::with_capacity(config.len());
    let mut visiting = BTreeSet::new();
    let mut done = BTreeSet::new();

    for label in config.labels() {
        visit(config, label, &mut visiting, &mut done, &mut order)?;
    }

    Ok(order)
}

fn visit<'c>(
    config: &'c ResourceConfig,
    label: &'c str,
    visiting: &mut BTreeSet<&'c str>,
    done: &mut BTreeSet<&'c str>,
    order: &mut Vec<&'c str>,
) -> Result<()> {
    if done.contains(label) {
        return Ok(());
    }

    if !visiting.insert(label) {
        return Err(ConfigError::Cycle {
            label: label.to_string(),
        });
    }

    let underlying = config
        .get(label)
        .and_then(ResourceDefinition::underlying)
        .filter(|underlying| config.get(underlying).is_some());

    if let Some(underlying) = underlying {
        visit(config, underlying, visiting, done, order)?;
    }

    visiting.remove(label);
    done.insert(label);
    order.push(label);

    Ok(())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use tiered_memory::{PolymorphicResource, align};

    use super::*;

    fn parse(document: &str) -> ResourceConfig {
        ResourceConfig::parse(document).unwrap()
    }

    #[test]
    fn underlying_resources_are_created_first() {
        let config = parse(
            r#"
            [resources.a_frame]
            kind = "linear_chunked"
            underlying = "b_capped"

            [resources.b_capped]
            kind = "quota"
            quota = "1 MiB"
            underlying = "c_objects_heap"

            [resources.c_objects_heap]
            kind = "linear_chunked"
            "#,
        );

        let order = instantiation_order(&config).unwrap();

        assert_eq!(order, ["c_objects_heap", "b_capped", "a_frame"]);
    }

    #[test]
    fn cycles_are_rejected() {
        let config = parse(
            r#"
            [resources.first]
            kind = "quota"
            quota = 1024
            underlying = "second"

            [resources.second]
            kind = "linear_chunked"
            underlying = "first"
            "#,
        );

        let error = instantiation_order(&config).unwrap_err();
        assert!(matches!(error, ConfigError::Cycle { .. }));

        let registry = Registry::new();
        assert!(Loader::with_registry(&registry).load(&config).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let config = parse(
            r#"
            [resources.ouroboros]
            kind = "quota"
            quota = 1024
            underlying = "ouroboros"
            "#,
        );

        let error = instantiation_order(&config).unwrap_err();
        assert!(matches!(error, ConfigError::Cycle { label } if label == "ouroboros"));
    }

    #[test]
    fn loaded_resources_are_registered_and_chained() {
        let registry = Registry::new();
        let config = parse(
            r#"
            [resources.frame]
            kind = "linear_chunked"
            chunk_size = "4 KiB"
            underlying = "capped"

            [resources.capped]
            kind = "quota"
            quota = "8 KiB"
            "#,
        );

        let labels = Loader::with_registry(&registry).load(&config).unwrap();

        assert_eq!(labels, [Label::of("capped"), Label::of("frame")]);
        assert_eq!(registry.names(), ["capped", "frame"]);

        let frame = registry.lookup("frame").unwrap();

        // Two 4 KiB chunks fit into the quota, a third does not.
        assert!(!frame.allocate(Bytes::kib(3), align!(8)).is_empty());
        assert!(!frame.allocate(Bytes::kib(3), align!(8)).is_empty());
        assert!(frame.allocate(Bytes::kib(3), align!(8)).is_empty());
    }

    #[test]
    fn pools_use_configured_alignment() {
        let registry = Registry::new();

        Loader::with_registry(&registry)
            .load_str(
                r#"
                [resources.objects]
                kind = "pool"
                block_size = 96
                alignment = 32
                slab_size = "4 KiB"
                "#,
            )
            .unwrap();

        let objects = registry.lookup("objects").unwrap();

        let block = objects.allocate(Bytes::new(96), align!(32));
        assert!(block.is_aligned(align!(32)));
        assert!(objects.allocate(Bytes::new(97), align!(8)).is_empty());
        assert!(objects.allocate(Bytes::new(8), align!(64)).is_empty());
    }

    #[test]
    fn invalid_alignment_is_rejected() {
        let registry = Registry::new();

        let error = Loader::with_registry(&registry)
            .load_str(
                r#"
                [resources.objects]
                kind = "pool"
                block_size = 64
                alignment = 24
                "#,
            )
            .unwrap_err();

        assert!(matches!(error, ConfigError::InvalidAlignment { value: 24, .. }));
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let registry = Registry::new();

        let error = Loader::with_registry(&registry)
            .load_str(
                r#"
                [resources.objects]
                kind = "pool"
                block_size = 0
                "#,
            )
            .unwrap_err();

        assert!(matches!(
            error,
            ConfigError::InvalidSize {
                field: "block_size",
                ..
            }
        ));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn block_size_too_large_for_a_slab_is_rejected() {
        let registry = Registry::new();

        let error = Loader::with_registry(&registry)
            .load_str(
                r#"
                [resources.objects]
                kind = "pool"
                block_size = "1048576 TiB"

                [resources.aligned]
                kind = "pool"
                block_size = 64
                "#,
            )
            .unwrap_err();

        assert!(matches!(
            error,
            ConfigError::InvalidSize { label, field: "block_size", value }
                if label == "objects" && value == Bytes::tib(1_048_576)
        ));
        assert!(registry.is_empty());
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn alignment_too_large_for_a_slab_is_rejected() {
        let registry = Registry::new();

        let error = Loader::with_registry(&registry)
            .load_str(
                r#"
                [resources.objects]
                kind = "pool"
                block_size = 64
                alignment = 4611686018427387904
                "#,
            )
            .unwrap_err();

        assert!(matches!(
            error,
            ConfigError::InvalidSize {
                field: "block_size",
                ..
            }
        ));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn granularity_that_cannot_be_rounded_is_rejected() {
        let registry = Registry::new();

        let error = Loader::with_registry(&registry)
            .load_str(
                r#"
                [resources.arena]
                kind = "linear_virtual"
                capacity = "1 MiB"
                granularity = 9223372036854775807
                "#,
            )
            .unwrap_err();

        assert!(matches!(
            error,
            ConfigError::InvalidSize {
                field: "granularity",
                ..
            }
        ));
    }

    #[test]
    fn unknown_underlying_is_rejected() {
        let registry = Registry::new();

        let error = Loader::with_registry(&registry)
            .load_str(
                r#"
                [resources.frame]
                kind = "linear_chunked"
                underlying = "nowhere"
                "#,
            )
            .unwrap_err();

        assert!(matches!(
            error,
            ConfigError::UnknownUnderlying { underlying, .. } if underlying == "nowhere"
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn underlying_may_be_already_registered() {
        let registry = Registry::new();
        registry
            .register(
                "shared_quota",
                Arc::new(Synchronized::new(QuotaResource::new(
                    SystemResource,
                    Bytes::kib(64),
                ))),
            )
            .unwrap();

        Loader::with_registry(&registry)
            .load_str(
                r#"
                [resources.frame]
                kind = "linear_chunked"
                chunk_size = "64 KiB"
                underlying = "shared_quota"

                [resources.direct]
                kind = "linear_chunked"
                underlying = "system"
                "#,
            )
            .unwrap();

        let frame = registry.lookup("frame").unwrap();
        assert!(!frame.allocate(Bytes::kib(1), align!(8)).is_empty());

        // The shared quota is exhausted by the chunk of the frame.
        let shared_quota = registry.lookup("shared_quota").unwrap();
        assert!(shared_quota.allocate(Bytes::new(1), align!(1)).is_empty());
    }

    #[test]
    fn taken_labels_are_rejected_before_anything_is_created() {
        let registry = Registry::new();
        registry.register("frame", Arc::new(SystemResource)).unwrap();

        let error = Loader::with_registry(&registry)
            .load_str(
                r#"
                [resources.frame]
                kind = "linear_chunked"

                [resources.other]
                kind = "linear_chunked"
                "#,
            )
            .unwrap_err();

        assert!(matches!(error, ConfigError::DuplicateLabel { label } if label == "frame"));
        assert!(registry.lookup("other").is_none());
    }

    #[test]
    fn system_label_cannot_be_defined() {
        let registry = Registry::new();

        let error = Loader::with_registry(&registry)
            .load_str(
                r#"
                [resources.system]
                kind = "linear_chunked"
                "#,
            )
            .unwrap_err();

        assert!(matches!(error, ConfigError::DuplicateLabel { .. }));
    }

    #[test]
    fn sequential_resources_use_supplied_buffers() {
        let registry = Registry::new();
        let buffer: &'static mut [u8] = Box::leak(vec![0_u8; 256].into_boxed_slice());
        let range = RwByteSpan::from_slice(buffer);

        // SAFETY: The buffer is leaked and only reachable through the range.
        let loader = unsafe { Loader::with_registry(&registry).with_range("scratch", range) };

        loader
            .load_str(
                r#"
                [resources.scratch]
                kind = "sequential"
                "#,
            )
            .unwrap();

        let scratch = registry.lookup("scratch").unwrap();

        let block = scratch.allocate(Bytes::new(200), align!(8));
        assert!(range.contains(block));
        assert!(scratch.allocate(Bytes::new(100), align!(8)).is_empty());
    }

    #[test]
    fn sequential_without_range_is_rejected() {
        let registry = Registry::new();

        let error = Loader::with_registry(&registry)
            .load_str(
                r#"
                [resources.scratch]
                kind = "sequential"
                "#,
            )
            .unwrap_err();

        assert!(matches!(error, ConfigError::MissingRange { .. }));
    }

    #[test]
    fn range_without_sequential_definition_is_rejected() {
        let registry = Registry::new();
        let buffer: &'static mut [u8] = Box::leak(vec![0_u8; 64].into_boxed_slice());

        let error = Loader::with_registry(&registry)
            .with_buffer("scratch", buffer)
            .load_str(
                r#"
                [resources.scratch]
                kind = "linear_chunked"
                "#,
            )
            .unwrap_err();

        assert!(matches!(error, ConfigError::UnusedRange { .. }));
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri cannot use the real operating system APIs.
    fn virtual_memory_kinds_reserve_address_space() {
        let registry = Registry::new();

        Loader::with_registry(&registry)
            .load_str(
                r#"
                [resources.arena]
                kind = "linear_virtual"
                capacity = "1 MiB"
                granularity = "64 KiB"

                [resources.pages]
                kind = "page"
                capacity = "1 MiB"
                "#,
            )
            .unwrap();

        let arena = registry.lookup("arena").unwrap();
        let block = arena.allocate(Bytes::kib(10), align!(64));
        assert_eq!(block.len(), Bytes::kib(10));
        assert_eq!(arena.owns(block.into()), Some(true));

        let pages = registry.lookup("pages").unwrap();
        let page = pages.allocate(virtual_memory::page_size(), align!(8));
        assert_eq!(page.len(), virtual_memory::page_size());
    }
}
