//! filesync-daemon library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod cache_store;
pub mod config;
pub mod daemon;
pub mod doc_store;
pub mod native_fs;

// Re-export key types for convenience
pub use cache_store::JsonCacheStore;
pub use config::{Args, Config, ConfigError};
pub use daemon::{Daemon, PassSummary};
pub use doc_store::DocStore;
pub use native_fs::NativeFs;
