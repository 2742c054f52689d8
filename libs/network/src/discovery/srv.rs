//! DNS SRV polling discovery
//!
//! A single background task queries the SRV record on a fixed interval,
//! unions the answers of every resolver, and compares the result with the
//! previous one. Hosts that appeared are published to discovery subscribers,
//! hosts that vanished to undiscovery subscribers. Publication happens on the
//! poller task itself, so deliveries never overlap.
//!
//! A lookup failure on one resolver contributes no hosts for that cycle;
//! when every resolver fails, every known host is undiscovered.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cluster_config::DiscoveryConfig;
use parking_lot::RwLock;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::resolver::{DnsSrvResolver, SrvResolver};
use super::{HostHandler, InstanceDiscoveryService, InstanceHostInfo};
use crate::event::{Publisher, Subscription};
use crate::{NetworkError, Result};

/// Where resolvers come from at start
enum ResolverSource {
    /// Built from a server list (or the system resolver) on every start
    Configured {
        servers: Option<String>,
        query_timeout: Duration,
    },
    Provided(Vec<Arc<dyn SrvResolver>>),
}

struct Running {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
    resolvers: Vec<Arc<dyn SrvResolver>>,
}

/// Discovery by polling a DNS SRV record
pub struct SrvInstanceDiscoveryService {
    query: String,
    source: ResolverSource,
    poll_interval: Duration,
    shutdown_timeout: Duration,
    known: Arc<RwLock<BTreeSet<InstanceHostInfo>>>,
    on_discovery: Arc<Publisher<InstanceHostInfo>>,
    on_undiscovery: Arc<Publisher<InstanceHostInfo>>,
    running: Mutex<Option<Running>>,
    active: AtomicBool,
}

impl SrvInstanceDiscoveryService {
    pub fn from_config(query: impl Into<String>, config: &DiscoveryConfig) -> Self {
        Self::with_source(
            query.into(),
            ResolverSource::Configured {
                servers: config.srv_servers.clone(),
                query_timeout: config.query_timeout(),
            },
            config,
        )
    }

    /// Poll through the given resolvers instead of DNS
    pub fn with_resolvers(
        query: impl Into<String>,
        resolvers: Vec<Arc<dyn SrvResolver>>,
        config: &DiscoveryConfig,
    ) -> Self {
        Self::with_source(query.into(), ResolverSource::Provided(resolvers), config)
    }

    fn with_source(query: String, source: ResolverSource, config: &DiscoveryConfig) -> Self {
        Self {
            query,
            source,
            poll_interval: config.poll_interval(),
            shutdown_timeout: config.shutdown_timeout(),
            known: Arc::new(RwLock::new(BTreeSet::new())),
            on_discovery: Arc::new(Publisher::new()),
            on_undiscovery: Arc::new(Publisher::new()),
            running: Mutex::new(None),
            active: AtomicBool::new(false),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    async fn resolvers(&self) -> Result<Vec<Arc<dyn SrvResolver>>> {
        match &self.source {
            ResolverSource::Provided(resolvers) => Ok(resolvers.clone()),
            ResolverSource::Configured {
                servers,
                query_timeout,
            } => Ok(DnsSrvResolver::from_server_list(servers.as_deref(), *query_timeout)
                .await?
                .into_iter()
                .map(|r| Arc::new(r) as Arc<dyn SrvResolver>)
                .collect()),
        }
    }
}

/// State owned by the poll task
struct Poller {
    query: String,
    resolvers: Vec<Arc<dyn SrvResolver>>,
    known: Arc<RwLock<BTreeSet<InstanceHostInfo>>>,
    on_discovery: Arc<Publisher<InstanceHostInfo>>,
    on_undiscovery: Arc<Publisher<InstanceHostInfo>>,
}

impl Poller {
    async fn run(self, interval: Duration, mut shutdown: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = async {
                    ticker.tick().await;
                    self.refresh().await;
                } => {}
            }
        }
        debug!(query = %self.query, "SRV poller exiting");
    }

    async fn refresh(&self) {
        let update = self.lookup().await;
        self.update(update);
    }

    async fn lookup(&self) -> BTreeSet<InstanceHostInfo> {
        let mut hosts = BTreeSet::new();
        for resolver in &self.resolvers {
            match resolver.query_srv(&self.query).await {
                Ok(records) => hosts.extend(records.iter().map(InstanceHostInfo::from_srv)),
                Err(NetworkError::NameNotFound { .. }) => {
                    info!("No hosts found for record {}", self.query);
                }
                Err(e) => {
                    error!(resolver = %resolver.describe(), error = %e, "Error querying SRV records");
                }
            }
        }
        hosts
    }

    fn update(&self, update: BTreeSet<InstanceHostInfo>) {
        let (added, removed) = {
            let mut known = self.known.write();
            if *known == update {
                debug!("No change between {:?} -> {:?}. Ignoring.", *known, update);
                return;
            }

            let added: Vec<InstanceHostInfo> = update.difference(&known).cloned().collect();
            let removed: Vec<InstanceHostInfo> = known.difference(&update).cloned().collect();
            *known = update;
            (added, removed)
        };

        info!(?added, ?removed, "Discovery update");

        for host in &added {
            self.on_discovery.publish(host);
        }
        for host in &removed {
            self.on_undiscovery.publish(host);
        }
    }
}

#[async_trait]
impl InstanceDiscoveryService for SrvInstanceDiscoveryService {
    async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(NetworkError::illegal_state("Already started."));
        }

        let resolvers = self.resolvers().await?;
        let described: Vec<String> = resolvers.iter().map(|r| r.describe()).collect();
        info!("Using SRV FQDN {} querying servers {:?}", self.query, described);

        let poller = Poller {
            query: self.query.clone(),
            resolvers: resolvers.clone(),
            known: self.known.clone(),
            on_discovery: self.on_discovery.clone(),
            on_undiscovery: self.on_undiscovery.clone(),
        };

        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(poller.run(self.poll_interval, shutdown_rx));

        *running = Some(Running {
            shutdown,
            task,
            resolvers,
        });
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let Running {
            shutdown,
            mut task,
            resolvers,
        } = self
            .running
            .lock()
            .await
            .take()
            .ok_or_else(|| NetworkError::illegal_state("Not running."))?;
        self.active.store(false, Ordering::Release);

        let _ = shutdown.send(());
        match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
            Ok(Ok(())) => info!("Terminated successfully."),
            Ok(Err(e)) => error!("SRV poller failed: {}", e),
            Err(_) => {
                warn!("Termination timed out.");
                task.abort();
            }
        }

        for resolver in &resolvers {
            if let Err(e) = resolver.close().await {
                error!(resolver = %resolver.describe(), "Could not close resolver: {}", e);
            }
        }

        self.known.write().clear();
        Ok(())
    }

    fn known_hosts(&self) -> Result<Vec<InstanceHostInfo>> {
        if !self.active.load(Ordering::Acquire) {
            return Err(NetworkError::illegal_state("Not running."));
        }
        Ok(self.known.read().iter().cloned().collect())
    }

    fn subscribe_to_discovery(&self, handler: HostHandler) -> Subscription {
        self.on_discovery.subscribe(handler)
    }

    fn subscribe_to_undiscovery(&self, handler: HostHandler) -> Subscription {
        self.on_undiscovery.subscribe(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::super::resolver::SrvRecord;
    use super::*;

    struct FixedResolver(Vec<SrvRecord>);

    #[async_trait]
    impl SrvResolver for FixedResolver {
        async fn query_srv(&self, name: &str) -> Result<Vec<SrvRecord>> {
            if self.0.is_empty() {
                Err(NetworkError::name_not_found(name))
            } else {
                Ok(self.0.clone())
            }
        }

        fn describe(&self) -> String {
            "fixed".to_string()
        }
    }

    /// Resolver whose server is unreachable
    struct BrokenResolver;

    #[async_trait]
    impl SrvResolver for BrokenResolver {
        async fn query_srv(&self, _name: &str) -> Result<Vec<SrvRecord>> {
            Err(NetworkError::discovery("server unreachable"))
        }

        fn describe(&self) -> String {
            "broken".to_string()
        }
    }

    fn record(target: &str, port: u16) -> SrvRecord {
        SrvRecord {
            priority: 0,
            weight: 0,
            port,
            target: target.to_string(),
        }
    }

    fn poller(resolvers: Vec<Arc<dyn SrvResolver>>) -> Poller {
        Poller {
            query: "_svc._tcp.test".to_string(),
            resolvers,
            known: Arc::new(RwLock::new(BTreeSet::new())),
            on_discovery: Arc::new(Publisher::new()),
            on_undiscovery: Arc::new(Publisher::new()),
        }
    }

    #[tokio::test]
    async fn test_lookup_unions_resolvers() {
        let poller = poller(vec![
            Arc::new(FixedResolver(vec![record("a.test.", 1), record("b.test.", 1)])),
            Arc::new(FixedResolver(vec![record("b.test.", 1), record("c.test.", 1)])),
            Arc::new(FixedResolver(vec![])),
        ]);

        let hosts = poller.lookup().await;
        let addresses: Vec<&str> = hosts.iter().map(|h| h.connect_address()).collect();
        assert_eq!(addresses, vec!["tcp://a.test:1", "tcp://b.test:1", "tcp://c.test:1"]);
    }

    #[tokio::test]
    async fn test_update_publishes_difference() {
        let poller = poller(vec![]);
        let events = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let _d = {
            let events = events.clone();
            poller.on_discovery.subscribe(move |h: &InstanceHostInfo| {
                events.lock().push(format!("+{}", h))
            })
        };
        let _u = {
            let events = events.clone();
            poller.on_undiscovery.subscribe(move |h: &InstanceHostInfo| {
                events.lock().push(format!("-{}", h))
            })
        };

        let first: BTreeSet<_> = ["tcp://a:1", "tcp://b:1"].into_iter().map(InstanceHostInfo::new).collect();
        let second: BTreeSet<_> = ["tcp://b:1", "tcp://c:1"].into_iter().map(InstanceHostInfo::new).collect();

        poller.update(first);
        poller.update(second.clone());
        poller.update(second);
        poller.update(BTreeSet::new());

        assert_eq!(
            *events.lock(),
            vec!["+tcp://a:1", "+tcp://b:1", "+tcp://c:1", "-tcp://a:1", "-tcp://b:1", "-tcp://c:1"]
        );
    }

    #[tokio::test]
    async fn test_failed_lookups_contribute_no_hosts() {
        let healthy = poller(vec![
            Arc::new(BrokenResolver),
            Arc::new(FixedResolver(vec![record("a.test.", 1)])),
        ]);
        let hosts = healthy.lookup().await;
        assert_eq!(hosts.len(), 1);

        let outage = poller(vec![Arc::new(BrokenResolver), Arc::new(BrokenResolver)]);
        let undiscovered = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let _u = {
            let undiscovered = undiscovered.clone();
            outage.on_undiscovery.subscribe(move |h: &InstanceHostInfo| {
                undiscovered.lock().push(h.to_string())
            })
        };

        outage.update(hosts);
        outage.refresh().await;

        assert!(outage.known.read().is_empty());
        assert_eq!(*undiscovered.lock(), vec!["tcp://a.test:1"]);
    }
}
