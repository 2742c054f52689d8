//! Discovery services driven through their public lifecycle

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cluster_config::{DiscoveryConfig, DiscoveryMode};
use cluster_network::discovery::{SrvRecord, SrvResolver};
use cluster_network::{
    discovery_from_config, InstanceDiscoveryService, InstanceHostInfo, NetworkError, Result,
    SrvInstanceDiscoveryService,
};
use parking_lot::Mutex;

use common::eventually;

/// Resolver whose answer the test swaps between polls
#[derive(Default)]
struct ScriptedResolver {
    answer: Mutex<Option<Vec<SrvRecord>>>,
    queries: Mutex<usize>,
}

impl ScriptedResolver {
    fn answer(&self, targets: &[(&str, u16)]) {
        let records = targets
            .iter()
            .map(|(target, port)| SrvRecord {
                priority: 10,
                weight: 5,
                port: *port,
                target: target.to_string(),
            })
            .collect();
        *self.answer.lock() = Some(records);
    }

    fn fail(&self) {
        *self.answer.lock() = None;
    }

    fn queries(&self) -> usize {
        *self.queries.lock()
    }
}

#[async_trait]
impl SrvResolver for ScriptedResolver {
    async fn query_srv(&self, name: &str) -> Result<Vec<SrvRecord>> {
        *self.queries.lock() += 1;
        self.answer
            .lock()
            .clone()
            .ok_or_else(|| NetworkError::name_not_found(name))
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

fn fast_config() -> DiscoveryConfig {
    DiscoveryConfig {
        mode: DiscoveryMode::Srv,
        srv_query: Some("_cluster._tcp.test".to_string()),
        poll_interval_ms: 5,
        shutdown_timeout_secs: 1,
        ..DiscoveryConfig::default()
    }
}

fn recorder(discovery: &SrvInstanceDiscoveryService) -> (Arc<Mutex<Vec<String>>>, Vec<cluster_network::Subscription>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let subscriptions = vec![
        {
            let events = events.clone();
            discovery.subscribe_to_discovery(Box::new(move |host: &InstanceHostInfo| {
                events.lock().push(format!("+{}", host))
            }))
        },
        {
            let events = events.clone();
            discovery.subscribe_to_undiscovery(Box::new(move |host: &InstanceHostInfo| {
                events.lock().push(format!("-{}", host))
            }))
        },
    ];
    (events, subscriptions)
}

#[tokio::test]
async fn test_srv_discovery_publishes_only_changes() {
    let resolver = Arc::new(ScriptedResolver::default());
    resolver.answer(&[("a.cluster.test.", 7000), ("b.cluster.test.", 7000)]);

    let discovery = SrvInstanceDiscoveryService::with_resolvers(
        "_cluster._tcp.test",
        vec![resolver.clone() as Arc<dyn SrvResolver>],
        &fast_config(),
    );
    let (events, _subscriptions) = recorder(&discovery);

    assert!(matches!(discovery.known_hosts(), Err(NetworkError::IllegalState { .. })));
    discovery.start().await.unwrap();
    assert!(matches!(discovery.start().await, Err(NetworkError::IllegalState { .. })));

    assert!(eventually(|| events.lock().len() == 2).await);

    // the same answer again publishes nothing
    let seen = resolver.queries();
    assert!(eventually(|| resolver.queries() >= seen + 3).await);
    assert_eq!(
        *events.lock(),
        vec!["+tcp://a.cluster.test:7000", "+tcp://b.cluster.test:7000"]
    );

    resolver.answer(&[("b.cluster.test.", 7000), ("c.cluster.test.", 7001)]);
    assert!(eventually(|| events.lock().len() == 4).await);
    assert_eq!(
        events.lock()[2..],
        ["+tcp://c.cluster.test:7001".to_string(), "-tcp://a.cluster.test:7000".to_string()]
    );

    let known: Vec<String> = discovery
        .known_hosts()
        .unwrap()
        .iter()
        .map(|h| h.connect_address().to_string())
        .collect();
    assert_eq!(known, vec!["tcp://b.cluster.test:7000", "tcp://c.cluster.test:7001"]);

    // name not found undiscovers everything
    resolver.fail();
    assert!(eventually(|| events.lock().len() == 6).await);
    assert!(discovery.known_hosts().unwrap().is_empty());

    discovery.stop().await.unwrap();
    assert!(matches!(discovery.stop().await, Err(NetworkError::IllegalState { .. })));

    // no polling after stop
    let stopped_at = resolver.queries();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(resolver.queries(), stopped_at);
}

#[tokio::test]
async fn test_static_discovery_from_config() {
    let config = DiscoveryConfig {
        static_hosts: vec!["tcp://10.0.0.1:7000".to_string(), "tcp://10.0.0.2:7000".to_string()],
        ..DiscoveryConfig::default()
    };
    let discovery = discovery_from_config(&config).unwrap();

    discovery.start().await.unwrap();
    let hosts = discovery.known_hosts().unwrap();
    assert_eq!(
        hosts,
        vec![
            InstanceHostInfo::new("tcp://10.0.0.1:7000"),
            InstanceHostInfo::new("tcp://10.0.0.2:7000"),
        ]
    );
    discovery.stop().await.unwrap();
    assert!(discovery.known_hosts().is_err());
}
