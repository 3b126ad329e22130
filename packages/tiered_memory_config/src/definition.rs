use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde::de::{self, Deserializer, Visitor};
use tiered_memory::Bytes;

use crate::{ConfigError, Result};

/// A document of named resource definitions.
///
/// The document consists of `[resources.<label>]` tables. Each table has a `kind` key that selects
/// the type of resource plus the options of that kind:
///
/// ```toml
/// [resources.arena]
/// kind = "linear_virtual"
/// capacity = "64 MiB"
/// granularity = "256 KiB"
///
/// [resources.frame]
/// kind = "linear_chunked"
/// chunk_size = "64 KiB"
/// underlying = "capped"
///
/// [resources.capped]
/// kind = "quota"
/// quota = "16 MiB"
/// ```
///
/// Byte quantities are either integers or strings with a `B`, `KiB`, `MiB`, `GiB` or `TiB`
/// suffix. The order of the tables does not matter.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct ResourceConfig {
    #[serde(default)]
    resources: BTreeMap<String, ResourceDefinition>,
}

impl ResourceConfig {
    /// Parses a configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the document is not valid TOML, names an unknown kind
    /// or is missing a required option.
    pub fn parse(document: &str) -> Result<Self> {
        Ok(toml::from_str(document)?)
    }

    /// Reads and parses a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read and [`ConfigError::Parse`] if its
    /// contents cannot be parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let document = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&document)
    }

    /// Adds or replaces the definition under `label`.
    pub fn insert(&mut self, label: impl Into<String>, definition: ResourceDefinition) {
        self.resources.insert(label.into(), definition);
    }

    /// The definition under `label`.
    #[must_use]
    pub fn get(&self, label: &str) -> Option<&ResourceDefinition> {
        self.resources.get(label)
    }

    /// The labels of all definitions, in sorted order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// The number of definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the document defines no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// The definition of one named resource.
///
/// Options that name an `underlying` resource refer to another definition in the same document,
/// to a resource already present in the target registry or to `system`, which is also the default.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ResourceDefinition {
    /// A [`LinearVirtualResource`][tiered_memory::LinearVirtualResource].
    LinearVirtual {
        /// The size of the address space reservation.
        #[serde(deserialize_with = "byte_quantity")]
        capacity: Bytes,

        /// The batch size in which pages are committed. Defaults to one page.
        #[serde(default, deserialize_with = "optional_byte_quantity")]
        granularity: Option<Bytes>,
    },

    /// A [`PageResource`][tiered_memory::PageResource].
    Page {
        /// The size of the address space reservation.
        #[serde(deserialize_with = "byte_quantity")]
        capacity: Bytes,
    },

    /// A [`SequentialResource`][tiered_memory::SequentialResource] over a memory range that is
    /// supplied to the [`Loader`][crate::Loader] by the caller.
    Sequential,

    /// A [`LinearResource`][tiered_memory::LinearResource].
    LinearChunked {
        /// The granularity of the chunks requested from the underlying resource.
        #[serde(default, deserialize_with = "optional_byte_quantity")]
        chunk_size: Option<Bytes>,

        /// The resource chunks are requested from.
        #[serde(default)]
        underlying: Option<String>,
    },

    /// A [`PoolResource`][tiered_memory::PoolResource].
    Pool {
        /// The size of every block.
        #[serde(deserialize_with = "byte_quantity")]
        block_size: Bytes,

        /// The alignment of every block. Defaults to the maximum fundamental alignment.
        #[serde(default)]
        alignment: Option<usize>,

        /// The size of the slabs requested from the underlying resource.
        #[serde(default, deserialize_with = "optional_byte_quantity")]
        slab_size: Option<Bytes>,

        /// The resource slabs are requested from.
        #[serde(default)]
        underlying: Option<String>,
    },

    /// A [`QuotaResource`][tiered_memory::QuotaResource].
    Quota {
        /// The maximum number of bytes outstanding at a time.
        #[serde(deserialize_with = "byte_quantity")]
        quota: Bytes,

        /// The resource that allocations are forwarded to.
        #[serde(default)]
        underlying: Option<String>,
    },
}

impl ResourceDefinition {
    /// The name of the kind, as written in the `kind` key.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LinearVirtual { .. } => "linear_virtual",
            Self::Page { .. } => "page",
            Self::Sequential => "sequential",
            Self::LinearChunked { .. } => "linear_chunked",
            Self::Pool { .. } => "pool",
            Self::Quota { .. } => "quota",
        }
    }

    /// The name of the underlying resource, if the kind has one and it is set.
    #[must_use]
    pub fn underlying(&self) -> Option<&str> {
        match self {
            Self::LinearChunked { underlying, .. }
            | Self::Pool { underlying, .. }
            | Self::Quota { underlying, .. } => underlying.as_deref(),
            Self::LinearVirtual { .. } | Self::Page { .. } | Self::Sequential => None,
        }
    }
}

struct ByteQuantityVisitor;

impl Visitor<'_> for ByteQuantityVisitor {
    type Value = Bytes;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a number of bytes or a string such as \"64 KiB\"")
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> std::result::Result<Self::Value, E> {
        isize::try_from(value)
            .map(Bytes::new)
            .map_err(|error| E::custom(format!("{value} bytes is out of range: {error}")))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> std::result::Result<Self::Value, E> {
        isize::try_from(value)
            .map(Bytes::new)
            .map_err(|error| E::custom(format!("{value} bytes is out of range: {error}")))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<Self::Value, E> {
        value.parse().map_err(E::custom)
    }
}

fn byte_quantity<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Bytes, D::Error> {
    deserializer.deserialize_any(ByteQuantityVisitor)
}

fn optional_byte_quantity<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Bytes>, D::Error> {
    byte_quantity(deserializer).map(Some)
}
