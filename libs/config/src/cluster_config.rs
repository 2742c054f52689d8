//! Cluster Configuration Module
//!
//! Loads the settings of the discovery service, the invoker registry and the
//! TCP invokers. Values come from built-in defaults, then an optional TOML
//! file, then `CLUSTER_`-prefixed environment variables, e.g.
//! `CLUSTER_DISCOVERY__SRV_QUERY=_cluster._tcp.example.com`.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::defaults;
use crate::logging::LoggingConfig;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "CLUSTER";

/// Main cluster configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ClusterConfig {
    pub discovery: DiscoveryConfig,
    pub registry: RegistryConfig,
    pub invoker: InvokerConfig,
    pub logging: LoggingConfig,
}

/// Where peer addresses come from
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Fixed host list
    #[default]
    Static,
    /// DNS SRV polling
    Srv,
}

/// Instance discovery settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub mode: DiscoveryMode,

    /// Connect addresses used in static mode
    pub static_hosts: Vec<String>,

    /// SRV record name polled in srv mode
    pub srv_query: Option<String>,

    /// Resolver servers, `dns://host:port` or `host[:port]`, separated by
    /// whitespace or commas; unset means the system resolver
    pub srv_servers: Option<String>,

    pub poll_interval_ms: u64,
    pub query_timeout_ms: u64,
    pub shutdown_timeout_secs: u64,
}

/// Remote invoker registry settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    pub refresh_interval_secs: u64,
    pub metadata_timeout_ms: u64,
    pub total_refresh_timeout_ms: u64,
    pub report_interval_secs: u64,
    pub shutdown_timeout_secs: u64,
}

/// TCP invoker settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct InvokerConfig {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub max_frame_size: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::Static,
            static_hosts: Vec::new(),
            srv_query: None,
            srv_servers: None,
            poll_interval_ms: defaults::discovery::POLL_INTERVAL_MS,
            query_timeout_ms: defaults::discovery::QUERY_TIMEOUT_MS,
            shutdown_timeout_secs: defaults::discovery::SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: defaults::registry::REFRESH_INTERVAL_SECS,
            metadata_timeout_ms: defaults::registry::METADATA_TIMEOUT_MS,
            total_refresh_timeout_ms: defaults::registry::TOTAL_REFRESH_TIMEOUT_MS,
            report_interval_secs: defaults::registry::REPORT_INTERVAL_SECS,
            shutdown_timeout_secs: defaults::registry::SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: defaults::invoker::CONNECT_TIMEOUT_MS,
            request_timeout_ms: defaults::invoker::REQUEST_TIMEOUT_MS,
            max_frame_size: defaults::invoker::MAX_FRAME_SIZE,
        }
    }
}

impl DiscoveryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl RegistryConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    pub fn total_refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.total_refresh_timeout_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl InvokerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl ClusterConfig {
    /// Load configuration from an optional file with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading cluster config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        // Override with environment variables (CLUSTER_ prefix, __ between levels)
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("discovery.static_hosts"),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut cluster: ClusterConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        cluster.expand_env_vars()?;
        cluster.validate()?;
        debug!(?cluster, "cluster configuration loaded");
        Ok(cluster)
    }

    /// Reject settings no service could run with
    pub fn validate(&self) -> Result<()> {
        let discovery = &self.discovery;
        if discovery.mode == DiscoveryMode::Srv
            && discovery.srv_query.as_deref().map_or(true, str::is_empty)
        {
            bail!("discovery.srv_query is required in srv mode");
        }
        if discovery.poll_interval_ms == 0 {
            bail!("discovery.poll_interval_ms must be positive");
        }
        if self.registry.refresh_interval_secs == 0 || self.registry.report_interval_secs == 0 {
            bail!("registry intervals must be positive");
        }
        if self.invoker.max_frame_size == 0 {
            bail!("invoker.max_frame_size must be positive");
        }
        Ok(())
    }

    /// Expand environment variables in host and query strings
    pub fn expand_env_vars(&mut self) -> Result<()> {
        for host in &mut self.discovery.static_hosts {
            let expanded = shellexpand::env(host).context("Failed to expand static host")?;
            *host = expanded.into_owned();
        }

        if let Some(query) = &self.discovery.srv_query {
            let expanded = shellexpand::env(query).context("Failed to expand SRV query")?;
            self.discovery.srv_query = Some(expanded.into_owned());
        }

        if let Some(servers) = &self.discovery.srv_servers {
            let expanded = shellexpand::env(servers).context("Failed to expand SRV servers")?;
            self.discovery.srv_servers = Some(expanded.into_owned());
        }

        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

/// Convenience function to load configuration from an optional file
pub fn load_config(path: Option<&Path>) -> Result<ClusterConfig> {
    ClusterConfig::load(path)
}
