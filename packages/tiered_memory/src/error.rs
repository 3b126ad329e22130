use thiserror::Error;

/// Errors from the parts of the crate that sit outside the allocation path.
///
/// Allocation itself never returns an error. An out-of-memory condition is signaled by an empty
/// [`RwByteSpan`][crate::RwByteSpan] instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A resource was registered under a label that is already taken.
    #[error("a resource is already registered under the label '{name}'")]
    DuplicateLabel {
        /// The label that was already taken.
        name: String,
    },

    /// A string could not be parsed as a [`Bytes`][crate::Bytes] quantity.
    #[error("invalid byte quantity: '{invalid_value}' is invalid: {problem}")]
    InvalidBytes {
        /// The value that failed to parse.
        invalid_value: String,

        /// A human-readable description of the problem.
        problem: String,
    },
}

impl Error {
    pub(crate) fn invalid_bytes(invalid_value: &str, problem: String) -> Self {
        Self::InvalidBytes {
            invalid_value: invalid_value.to_string(),
            problem,
        }
    }
}

/// A specialized `Result` type for fallible operations in this crate, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn messages_name_the_offending_value() {
        let duplicate = Error::DuplicateLabel {
            name: "frame".to_string(),
        };
        assert!(duplicate.to_string().contains("'frame'"));

        let invalid = Error::invalid_bytes("12 kb", "unknown unit".to_string());
        assert!(invalid.to_string().contains("'12 kb'"));
        assert!(invalid.to_string().contains("unknown unit"));
    }
}
