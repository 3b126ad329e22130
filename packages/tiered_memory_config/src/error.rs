use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tiered_memory::Bytes;

/// Errors that can occur when loading a resource configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read resource configuration from '{}'", path.display())]
    Read {
        /// The file that could not be read.
        path: PathBuf,

        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The configuration is not valid TOML or does not match the expected structure.
    #[error("invalid resource configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A definition names an underlying resource that is neither defined nor registered.
    #[error("resource '{label}' names unknown underlying resource '{underlying}'")]
    UnknownUnderlying {
        /// The definition that names the underlying resource.
        label: String,

        /// The name that could not be resolved.
        underlying: String,
    },

    /// A sequential resource was defined but no memory range was supplied for it.
    #[error("no memory range was supplied for sequential resource '{label}'")]
    MissingRange {
        /// The sequential resource without a range.
        label: String,
    },

    /// A memory range was supplied for a label that is not a sequential resource.
    #[error("a memory range was supplied for '{label}', which is not a sequential resource")]
    UnusedRange {
        /// The label the range was supplied for.
        label: String,
    },

    /// An alignment is not a power of two.
    #[error("resource '{label}' has alignment {value}, which is not a power of two")]
    InvalidAlignment {
        /// The definition with the invalid alignment.
        label: String,

        /// The configured alignment.
        value: usize,
    },

    /// A size must be positive but is not.
    #[error("resource '{label}' has {field} = {value}, which is not positive")]
    InvalidSize {
        /// The definition with the invalid size.
        label: String,

        /// The name of the offending option.
        field: &'static str,

        /// The configured size.
        value: Bytes,
    },

    /// The operating system refused to reserve address space for a resource.
    #[error("failed to reserve {capacity} of address space for resource '{label}'")]
    ReservationFailed {
        /// The resource whose reservation failed.
        label: String,

        /// The requested capacity.
        capacity: Bytes,
    },

    /// Definitions name each other as underlying resources in a loop.
    #[error("resource '{label}' is part of a cycle of underlying resources")]
    Cycle {
        /// One of the definitions in the cycle.
        label: String,
    },

    /// A label is already taken in the target registry.
    #[error("a resource is already registered under the label '{label}'")]
    DuplicateLabel {
        /// The label that is already taken.
        label: String,
    },

    /// The registry rejected a resource.
    #[error(transparent)]
    Registration(#[from] tiered_memory::Error),
}

/// A specialized `Result` type for configuration operations, returning the crate's
/// [`ConfigError`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(ConfigError: Send, Sync, Debug);

    #[test]
    fn messages_name_the_resource() {
        let error = ConfigError::UnknownUnderlying {
            label: "frame".to_string(),
            underlying: "heap".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "resource 'frame' names unknown underlying resource 'heap'"
        );

        let error = ConfigError::InvalidSize {
            label: "objects".to_string(),
            field: "block_size",
            value: Bytes::ZERO,
        };
        assert!(error.to_string().contains("block_size = 0 B"));
    }

    #[test]
    fn read_error_keeps_the_source() {
        let error = ConfigError::Read {
            path: PathBuf::from("memory.toml"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };

        assert!(error.to_string().contains("memory.toml"));
        assert!(std::error::Error::source(&error).is_some());
    }
}
