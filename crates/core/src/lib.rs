//! Shared building blocks for kiln: configuration, change detection and
//! dependency collection.

pub mod change;
pub mod config;
pub mod deps;

pub use change::ChangeTracker;
pub use config::{BuildConfig, CacheConfig, Config, ConfigError, LogConfig, PoolConfig, WatchConfig};
pub use deps::Dependencies;
