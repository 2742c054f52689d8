//! Fixed host list discovery

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use cluster_config::DiscoveryConfig;
use tracing::info;

use super::{HostHandler, InstanceDiscoveryService, InstanceHostInfo};
use crate::event::Subscription;
use crate::{NetworkError, Result};

/// Discovery over a host set fixed at construction; never publishes
pub struct StaticInstanceDiscoveryService {
    hosts: Vec<InstanceHostInfo>,
    running: AtomicBool,
}

impl StaticInstanceDiscoveryService {
    pub fn new(hosts: impl IntoIterator<Item = InstanceHostInfo>) -> Self {
        Self {
            hosts: hosts.into_iter().collect(),
            running: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(config.static_hosts.iter().map(InstanceHostInfo::new))
    }
}

#[async_trait]
impl InstanceDiscoveryService for StaticInstanceDiscoveryService {
    async fn start(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(NetworkError::illegal_state("Already started."));
        }
        info!(hosts = self.hosts.len(), "Static discovery started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(NetworkError::illegal_state("Not running."));
        }
        Ok(())
    }

    fn known_hosts(&self) -> Result<Vec<InstanceHostInfo>> {
        if !self.running.load(Ordering::Acquire) {
            return Err(NetworkError::illegal_state("Not running."));
        }
        Ok(self.hosts.clone())
    }

    fn subscribe_to_discovery(&self, _handler: HostHandler) -> Subscription {
        Subscription::empty()
    }

    fn subscribe_to_undiscovery(&self, _handler: HostHandler) -> Subscription {
        Subscription::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> StaticInstanceDiscoveryService {
        StaticInstanceDiscoveryService::new([
            InstanceHostInfo::new("tcp://a:9000"),
            InstanceHostInfo::new("tcp://b:9000"),
        ])
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let discovery = service();
        assert!(discovery.known_hosts().is_err());
        assert!(discovery.stop().await.is_err());

        discovery.start().await.unwrap();
        assert!(matches!(discovery.start().await, Err(NetworkError::IllegalState { .. })));

        let hosts = discovery.known_hosts().unwrap();
        assert_eq!(hosts[0].connect_address(), "tcp://a:9000");
        assert_eq!(hosts.len(), 2);

        discovery.stop().await.unwrap();
        assert!(discovery.stop().await.is_err());
    }

    #[tokio::test]
    async fn test_subscriptions_are_inert() {
        let discovery = service();
        let subscription = discovery.subscribe_to_discovery(Box::new(|_: &InstanceHostInfo| panic!("no churn")));
        discovery.start().await.unwrap();
        subscription.unsubscribe();
    }
}
