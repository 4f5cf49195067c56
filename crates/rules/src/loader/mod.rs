//! Filesystem configuration loader with hot-reload via `notify` watcher.
//!
//! Watches a directory for YAML file changes (create, modify, delete),
//! reloads affected documents into the in-memory set and bumps a generation
//! counter that subscribers observe through a `tokio::sync::watch` channel.

mod core;
mod error;
mod watcher;


pub use self::core::ConfigLoader;
pub use self::error::{ConfigError, LoadResult, LoadStatus, Result};
