//! # Cluster Configuration
//!
//! Configuration loading and logging setup shared by cluster services.
//!
//! ## Features
//!
//! - **Layered Loading**: defaults, then a TOML file, then `CLUSTER_*`
//!   environment overrides
//! - **Defaults**: discovery, registry and invoker timing constants
//! - **Logging**: `tracing-subscriber` initialization with `RUST_LOG` support
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cluster_config::{init_logging, ClusterConfig};
//!
//! let config = ClusterConfig::load(Some("config/cluster.toml".as_ref())).unwrap();
//! init_logging(&config.logging).unwrap();
//! ```

pub mod cluster_config;
pub mod defaults;
pub mod logging;

// Re-export commonly used types
pub use cluster_config::{
    load_config, ClusterConfig, DiscoveryConfig, DiscoveryMode, InvokerConfig, RegistryConfig,
};
pub use logging::{init_logging, LogFormat, LoggingConfig};
