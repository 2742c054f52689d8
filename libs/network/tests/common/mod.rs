//! Recording mocks shared by the integration tests

#![allow(dead_code)]

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cluster_network::connection::ConnectionHandler;
use cluster_network::{
    ConnectionRef, InstanceConnection, InstanceConnectionService, InstanceMetadata,
    InstanceMetadataContext, Invocation, InvocationError, NetworkError, Publisher, RemoteInvoker,
    RemoteInvokerProvider, Result, Subscription,
};
use cluster_types::{ApplicationId, InstanceId, NodeId};
use parking_lot::Mutex;
use serde_json::Value;

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Invoker answering every invocation with its own node id
pub struct MockInvoker {
    pub node_id: NodeId,
    pub address: Mutex<Option<String>>,
    pub stops: AtomicUsize,
    fail_start: bool,
}

impl MockInvoker {
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteInvoker for MockInvoker {
    async fn start(&self, address: &str) -> Result<()> {
        if self.fail_start {
            return Err(NetworkError::invoker(format!("refusing to start {}", self.node_id)));
        }
        *self.address.lock() = Some(address.to_string());
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn invoke(&self, _invocation: &Invocation) -> std::result::Result<Value, InvocationError> {
        Ok(Value::String(self.node_id.to_string()))
    }
}

/// Provider keeping every invoker it created
#[derive(Default)]
pub struct MockProvider {
    created: Mutex<Vec<Arc<MockInvoker>>>,
    failing: Mutex<HashSet<NodeId>>,
}

impl MockProvider {
    pub fn fail_node(&self, node_id: &NodeId) {
        self.failing.lock().insert(node_id.clone());
    }

    pub fn created(&self) -> Vec<Arc<MockInvoker>> {
        self.created.lock().clone()
    }

    pub fn created_for(&self, node_id: &NodeId) -> Vec<Arc<MockInvoker>> {
        self.created
            .lock()
            .iter()
            .filter(|i| &i.node_id == node_id)
            .cloned()
            .collect()
    }
}

impl RemoteInvokerProvider for MockProvider {
    fn create(&self, node_id: &NodeId) -> Arc<dyn RemoteInvoker> {
        let invoker = Arc::new(MockInvoker {
            node_id: node_id.clone(),
            address: Mutex::new(None),
            stops: AtomicUsize::new(0),
            fail_start: self.failing.lock().contains(node_id),
        });
        self.created.lock().push(invoker.clone());
        invoker
    }
}

struct MockMetadata {
    metadata: Mutex<Option<InstanceMetadata>>,
}

#[async_trait]
impl InstanceMetadataContext for MockMetadata {
    async fn instance_metadata(&self) -> Result<InstanceMetadata> {
        self.metadata
            .lock()
            .clone()
            .ok_or_else(|| NetworkError::connection("metadata unavailable", None))
    }
}

/// Connection to a simulated instance hosting the given applications
pub struct MockConnection {
    pub instance_id: InstanceId,
    context: Arc<MockMetadata>,
}

impl MockConnection {
    pub fn new(quality: f64, applications: &[ApplicationId]) -> Arc<Self> {
        let instance_id = InstanceId::random();
        let node_ids: BTreeSet<NodeId> = applications
            .iter()
            .map(|app| NodeId::for_instance_and_application(&instance_id, app))
            .collect();

        Arc::new(Self {
            instance_id,
            context: Arc::new(MockMetadata {
                metadata: Mutex::new(Some(InstanceMetadata { quality, node_ids })),
            }),
        })
    }

    /// Connection whose metadata fetch always fails
    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            instance_id: InstanceId::random(),
            context: Arc::new(MockMetadata {
                metadata: Mutex::new(None),
            }),
        })
    }

    pub fn node_for(&self, application: &ApplicationId) -> NodeId {
        NodeId::for_instance_and_application(&self.instance_id, application)
    }

    pub fn set_metadata(&self, metadata: InstanceMetadata) {
        *self.context.metadata.lock() = Some(metadata);
    }
}

#[async_trait]
impl InstanceConnection for MockConnection {
    fn instance_id(&self) -> InstanceId {
        self.instance_id.clone()
    }

    fn instance_metadata_context(&self) -> Arc<dyn InstanceMetadataContext> {
        self.context.clone()
    }

    async fn open_route_to_node(&self, node_id: &NodeId) -> Result<String> {
        Ok(format!("mock://{}", node_id))
    }
}

/// Connection service driven by the test
pub struct MockConnectionService {
    instance_id: InstanceId,
    connections: Mutex<Vec<ConnectionRef>>,
    on_connect: Publisher<ConnectionRef>,
    on_disconnect: Publisher<ConnectionRef>,
}

impl MockConnectionService {
    pub fn new(connections: Vec<Arc<MockConnection>>) -> Arc<Self> {
        Arc::new(Self {
            instance_id: InstanceId::random(),
            connections: Mutex::new(connections.into_iter().map(|c| c as ConnectionRef).collect()),
            on_connect: Publisher::new(),
            on_disconnect: Publisher::new(),
        })
    }

    pub fn connect(&self, connection: Arc<MockConnection>) {
        let connection: ConnectionRef = connection;
        self.connections.lock().push(connection.clone());
        self.on_connect.publish(&connection);
    }

    pub fn disconnect(&self, instance_id: &InstanceId) {
        let removed: Vec<ConnectionRef> = {
            let mut connections = self.connections.lock();
            let (gone, kept): (Vec<ConnectionRef>, Vec<ConnectionRef>) = connections
                .drain(..)
                .partition(|c| &c.instance_id() == instance_id);
            *connections = kept;
            gone
        };
        for connection in &removed {
            self.on_disconnect.publish(connection);
        }
    }

    /// Publish a disconnect while still listing the connection as active,
    /// as a listing taken just before the disconnect would
    pub fn announce_disconnect(&self, instance_id: &InstanceId) {
        let listed: Vec<ConnectionRef> = self
            .connections
            .lock()
            .iter()
            .filter(|c| &c.instance_id() == instance_id)
            .cloned()
            .collect();
        for connection in &listed {
            self.on_disconnect.publish(connection);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.on_connect.subscriber_count() + self.on_disconnect.subscriber_count()
    }
}

#[async_trait]
impl InstanceConnectionService for MockConnectionService {
    fn instance_id(&self) -> InstanceId {
        self.instance_id.clone()
    }

    fn local_control_address(&self) -> String {
        "mock://local".to_string()
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    fn active_connections(&self) -> Vec<ConnectionRef> {
        self.connections.lock().clone()
    }

    fn subscribe_to_connect(&self, handler: ConnectionHandler) -> Subscription {
        self.on_connect.subscribe(move |c: &ConnectionRef| handler(c))
    }

    fn subscribe_to_disconnect(&self, handler: ConnectionHandler) -> Subscription {
        self.on_disconnect.subscribe(move |c: &ConnectionRef| handler(c))
    }
}
