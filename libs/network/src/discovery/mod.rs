//! Instance Discovery
//!
//! Finds the connect addresses of peer instances and announces changes.
//!
//! ## Implementations
//!
//! - [`StaticInstanceDiscoveryService`]: a fixed host list, never changes
//! - [`SrvInstanceDiscoveryService`]: polls a DNS SRV record on a fixed
//!   interval and publishes the difference between consecutive results
//!
//! Both follow the same lifecycle: `start` on a stopped service and `stop` on
//! a running one; anything else fails with `IllegalState`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cluster_config::DiscoveryConfig;
//! use cluster_network::discovery::discovery_from_config;
//!
//! # async fn run() -> cluster_network::Result<()> {
//! let discovery = discovery_from_config(&DiscoveryConfig::default())?;
//! let _subscription = discovery.subscribe_to_discovery(Box::new(|host: &cluster_network::InstanceHostInfo| {
//!     println!("found {}", host);
//! }));
//! discovery.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod resolver;
pub mod srv;
pub mod static_hosts;

pub use resolver::{DnsSrvResolver, SrvRecord, SrvResolver};
pub use srv::SrvInstanceDiscoveryService;
pub use static_hosts::StaticInstanceDiscoveryService;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use cluster_config::{DiscoveryConfig, DiscoveryMode};
use serde::{Deserialize, Serialize};

use crate::event::Subscription;
use crate::{NetworkError, Result};

/// A reachable peer instance; identity is the connect address alone
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceHostInfo {
    connect_address: String,
}

impl InstanceHostInfo {
    pub fn new(connect_address: impl Into<String>) -> Self {
        Self {
            connect_address: connect_address.into(),
        }
    }

    /// `tcp://<target>:<port>`, with the target's root dot removed
    pub fn from_srv(record: &SrvRecord) -> Self {
        let host = record.target.strip_suffix('.').unwrap_or(&record.target);
        Self::new(format!("tcp://{}:{}", host, record.port))
    }

    pub fn connect_address(&self) -> &str {
        &self.connect_address
    }
}

impl fmt::Display for InstanceHostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.connect_address)
    }
}

pub type HostHandler = Box<dyn Fn(&InstanceHostInfo) + Send + Sync>;

/// Source of peer instance addresses
#[async_trait]
pub trait InstanceDiscoveryService: Send + Sync {
    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Hosts currently known; fails unless running
    fn known_hosts(&self) -> Result<Vec<InstanceHostInfo>>;

    fn subscribe_to_discovery(&self, handler: HostHandler) -> Subscription;

    fn subscribe_to_undiscovery(&self, handler: HostHandler) -> Subscription;
}

/// Build the discovery service selected by `config.mode`
pub fn discovery_from_config(config: &DiscoveryConfig) -> Result<Arc<dyn InstanceDiscoveryService>> {
    match config.mode {
        DiscoveryMode::Static => Ok(Arc::new(StaticInstanceDiscoveryService::from_config(config))),
        DiscoveryMode::Srv => {
            let query = config
                .srv_query
                .clone()
                .filter(|q| !q.is_empty())
                .ok_or_else(|| {
                    NetworkError::configuration("SRV query is required", Some("discovery.srv_query"))
                })?;
            Ok(Arc::new(SrvInstanceDiscoveryService::from_config(query, config)))
        }
    }
}
