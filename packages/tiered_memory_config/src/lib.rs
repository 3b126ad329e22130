#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Loads named [`tiered_memory`] resources from TOML configuration.
//!
//! A [`ResourceConfig`] describes resources by label and kind. A [`Loader`] instantiates them in
//! dependency order and registers them in a [`Registry`][tiered_memory::Registry], from where
//! the rest of the program can look them up by name or activate them on a thread with
//! [`ResourceGuard::named()`][tiered_memory::ResourceGuard::named].
//!
//! ```toml
//! [resources.request_frame]
//! kind = "linear_chunked"
//! chunk_size = "64 KiB"
//! underlying = "request_quota"
//!
//! [resources.request_quota]
//! kind = "quota"
//! quota = "32 MiB"
//!
//! [resources.connections]
//! kind = "pool"
//! block_size = 256
//! alignment = 64
//! ```
//!
//! # Example
//!
//! ```
//! use tiered_memory::{Registry, ResourceGuard};
//! use tiered_memory_config::Loader;
//!
//! let registry = Registry::new();
//!
//! Loader::with_registry(&registry)
//!     .load_str(
//!         r#"
//!         [resources.request_frame]
//!         kind = "linear_chunked"
//!         "#,
//!     )
//!     .unwrap();
//!
//! let _guard = ResourceGuard::named_in(&registry, "request_frame").unwrap();
//! ```

mod definition;
mod error;
mod loader;

pub use definition::*;
pub use error::*;
pub use loader::*;
