//! Event-driven invoker table
//!
//! The table is an immutable [`Storage`] snapshot behind a narrow
//! `RwLock`. Readers clone the `Arc` and never wait on a writer doing I/O;
//! writers copy the snapshot, change it and swap it in. Invokers are started
//! before the swap and stopped after it, never under the lock.
//!
//! Every connected instance carries a connection epoch. A bootstrap installs
//! its invokers only if the epoch it started with is still current, so an
//! instance that disconnects mid-bootstrap cannot leave invokers behind.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cluster_config::RegistryConfig;
use cluster_types::{ApplicationId, InstanceId, NodeId};
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{InvokerStatus, RemoteInvokerRegistry};
use crate::connection::{ConnectionRef, InstanceConnectionService, InstanceMetadata};
use crate::event::Subscription;
use crate::invoker::{RemoteInvoker, RemoteInvokerProvider};
use crate::{NetworkError, Result};

type Invokers = Vec<(NodeId, Arc<dyn RemoteInvoker>)>;

#[derive(Clone)]
struct Entry {
    instance_id: InstanceId,
    quality: f64,
    invoker: Arc<dyn RemoteInvoker>,
}

#[derive(Clone, Default)]
struct Storage {
    /// Connection epoch of every connected instance
    connections: HashMap<InstanceId, u64>,
    invokers: BTreeMap<NodeId, Entry>,
    /// Node ids of each application in rank order
    ranked: HashMap<ApplicationId, Vec<NodeId>>,
}

impl Storage {
    fn reindex(&mut self) {
        let mut ranked: HashMap<ApplicationId, Vec<NodeId>> = HashMap::new();
        for node_id in self.invokers.keys() {
            ranked
                .entry(node_id.application_id())
                .or_default()
                .push(node_id.clone());
        }

        let invokers = &self.invokers;
        for nodes in ranked.values_mut() {
            nodes.sort_by(|a, b| {
                invokers[b]
                    .quality
                    .total_cmp(&invokers[a].quality)
                    .then_with(|| a.cmp(b))
            });
        }
        self.ranked = ranked;
    }

    fn remove_instance(&mut self, instance_id: &InstanceId) -> Invokers {
        let nodes: Vec<NodeId> = self
            .invokers
            .iter()
            .filter(|(_, entry)| &entry.instance_id == instance_id)
            .map(|(node_id, _)| node_id.clone())
            .collect();

        nodes
            .into_iter()
            .filter_map(|node_id| {
                self.invokers
                    .remove(&node_id)
                    .map(|entry| (node_id, entry.invoker))
            })
            .collect()
    }

    /// Install the outcome of one bootstrap; returns invokers to stop
    fn install(
        &mut self,
        instance_id: &InstanceId,
        epoch: u64,
        metadata: &InstanceMetadata,
        opened: Invokers,
        prune: bool,
    ) -> Invokers {
        if self.connections.get(instance_id) != Some(&epoch) {
            debug!(%instance_id, "Discarding bootstrap of a stale connection");
            return opened;
        }

        let mut discarded = Vec::new();
        for (node_id, invoker) in opened {
            if self.invokers.contains_key(&node_id) {
                discarded.push((node_id, invoker));
                continue;
            }
            self.invokers.insert(
                node_id,
                Entry {
                    instance_id: instance_id.clone(),
                    quality: metadata.quality,
                    invoker,
                },
            );
        }

        for entry in self.invokers.values_mut() {
            if &entry.instance_id == instance_id {
                entry.quality = metadata.quality;
            }
        }

        if prune {
            let stale: Vec<NodeId> = self
                .invokers
                .iter()
                .filter(|(node_id, entry)| {
                    &entry.instance_id == instance_id && !metadata.node_ids.contains(*node_id)
                })
                .map(|(node_id, _)| node_id.clone())
                .collect();
            for node_id in stale {
                if let Some(entry) = self.invokers.remove(&node_id) {
                    discarded.push((node_id, entry.invoker));
                }
            }
        }

        self.reindex();
        discarded
    }
}

async fn stop_all(invokers: Invokers) {
    join_all(invokers.into_iter().map(|(node_id, invoker)| async move {
        if let Err(e) = invoker.stop().await {
            error!(%node_id, error = %e, "Failed to stop remote invoker");
        }
    }))
    .await;
}

struct Inner {
    connections: Arc<dyn InstanceConnectionService>,
    provider: Arc<dyn RemoteInvokerProvider>,
    config: RegistryConfig,
    storage: RwLock<Arc<Storage>>,
    next_epoch: AtomicU64,
}

impl Inner {
    fn snapshot(&self) -> Arc<Storage> {
        self.storage.read().clone()
    }

    /// Apply `change` to a copy of the table and publish the copy
    fn mutate<R>(&self, change: impl FnOnce(&mut Storage) -> R) -> R {
        let mut guard = self.storage.write();
        let mut next = (**guard).clone();
        let result = change(&mut next);
        *guard = Arc::new(next);
        result
    }

    fn register(&self, instance_id: &InstanceId) -> u64 {
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        self.mutate(|storage| storage.connections.insert(instance_id.clone(), epoch));
        epoch
    }

    /// Epoch of a connection still registered; only start and connect
    /// events register new ones
    fn live_epoch(&self, instance_id: &InstanceId) -> Option<u64> {
        self.snapshot().connections.get(instance_id).copied()
    }

    fn on_connect(self: &Arc<Self>, connection: &ConnectionRef, runtime: &Handle) {
        let instance_id = connection.instance_id();
        info!(%instance_id, "Instance connected");

        let epoch = self.register(&instance_id);
        runtime.spawn(self.clone().bootstrap(connection.clone(), epoch, false));
    }

    fn on_disconnect(&self, connection: &ConnectionRef, runtime: &Handle) {
        let instance_id = connection.instance_id();
        let removed = self.mutate(|storage| {
            storage.connections.remove(&instance_id);
            let removed = storage.remove_instance(&instance_id);
            storage.reindex();
            removed
        });

        info!(%instance_id, invokers = removed.len(), "Instance disconnected");
        if !removed.is_empty() {
            runtime.spawn(stop_all(removed));
        }
    }

    async fn fetch_metadata(&self, connection: &ConnectionRef) -> Result<InstanceMetadata> {
        let timeout = self.config.metadata_timeout();
        let context = connection.instance_metadata_context();
        tokio::time::timeout(timeout, context.instance_metadata())
            .await
            .map_err(|_| NetworkError::timeout("instance metadata", timeout.as_millis() as u64))?
    }

    async fn open_invoker(&self, connection: &ConnectionRef, node_id: &NodeId) -> Result<Arc<dyn RemoteInvoker>> {
        let address = connection.open_route_to_node(node_id).await?;
        let invoker = self.provider.create(node_id);
        invoker.start(&address).await?;
        debug!(%node_id, %address, "Remote invoker started");
        Ok(invoker)
    }

    /// Read one connection's metadata and install invokers for its nodes
    async fn bootstrap(self: Arc<Self>, connection: ConnectionRef, epoch: u64, prune: bool) {
        let instance_id = connection.instance_id();
        let metadata = match self.fetch_metadata(&connection).await {
            Ok(metadata) => metadata,
            Err(e) => {
                error!(%instance_id, error = %e, "Failed to fetch instance metadata");
                return;
            }
        };

        let missing: Vec<NodeId> = {
            let known = self.snapshot();
            metadata
                .node_ids
                .iter()
                .filter(|node_id| !known.invokers.contains_key(*node_id))
                .cloned()
                .collect()
        };

        let this = &*self;
        let opened = join_all(missing.into_iter().map(|node_id| {
            let connection = connection.clone();
            async move {
                match this.open_invoker(&connection, &node_id).await {
                    Ok(invoker) => Some((node_id, invoker)),
                    Err(e) => {
                        error!(%node_id, error = %e, "Failed to start remote invoker");
                        None
                    }
                }
            }
        }))
        .await;
        let opened: Invokers = opened.into_iter().flatten().collect();

        let discarded =
            self.mutate(|storage| storage.install(&instance_id, epoch, &metadata, opened, prune));
        stop_all(discarded).await;
    }

    async fn refresh(self: &Arc<Self>) -> Result<()> {
        // instances registered after this point are not pruned by this cycle
        let horizon = self.next_epoch.load(Ordering::Relaxed);
        let connections = self.connections.active_connections();
        let active: HashSet<InstanceId> = connections.iter().map(|c| c.instance_id()).collect();

        let vanished = self.mutate(|storage| {
            let gone: Vec<InstanceId> = storage
                .connections
                .iter()
                .filter(|(instance_id, epoch)| **epoch < horizon && !active.contains(*instance_id))
                .map(|(instance_id, _)| instance_id.clone())
                .collect();

            let mut removed = Vec::new();
            for instance_id in &gone {
                storage.connections.remove(instance_id);
                removed.extend(storage.remove_instance(instance_id));
            }
            storage.reindex();
            removed
        });
        if !vanished.is_empty() {
            info!(invokers = vanished.len(), "Pruning invokers of vanished instances");
            stop_all(vanished).await;
        }

        let tasks: Vec<JoinHandle<()>> = connections
            .into_iter()
            .filter_map(|connection| {
                let instance_id = connection.instance_id();
                match self.live_epoch(&instance_id) {
                    Some(epoch) => Some(tokio::spawn(self.clone().bootstrap(connection, epoch, true))),
                    None => {
                        debug!(%instance_id, "Skipping refresh of disconnected instance");
                        None
                    }
                }
            })
            .collect();

        let timeout = self.config.total_refresh_timeout();
        tokio::time::timeout(timeout, join_all(tasks))
            .await
            .map(|_| ())
            .map_err(|_| NetworkError::timeout("registry refresh", timeout.as_millis() as u64))
    }

    fn status(&self) -> Vec<InvokerStatus> {
        self.snapshot()
            .invokers
            .iter()
            .map(|(node_id, entry)| InvokerStatus {
                node_id: node_id.clone(),
                instance_id: entry.instance_id.clone(),
                quality: entry.quality,
            })
            .collect()
    }

    fn report(&self) {
        let status = self.status();
        debug!(invokers = status.len(), "Remote invocation table");
        for row in &status {
            debug!("  {}", row);
        }
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn maintain(inner: Arc<Inner>, mut shutdown: oneshot::Receiver<()>) {
    let mut refresh = ticker(inner.config.refresh_interval());
    let mut report = ticker(inner.config.report_interval());

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = refresh.tick() => {
                if let Err(e) = inner.refresh().await {
                    warn!(error = %e, "Skipping registry refresh cycle");
                }
            }
            _ = report.tick() => inner.report(),
        }
    }
    debug!("Registry maintenance exiting");
}

struct Running {
    subscriptions: Vec<Subscription>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Registry fed by an [`InstanceConnectionService`]
pub struct SimpleRemoteInvokerRegistry {
    inner: Arc<Inner>,
    lifecycle: Mutex<Option<Running>>,
}

impl SimpleRemoteInvokerRegistry {
    pub fn new(
        connections: Arc<dyn InstanceConnectionService>,
        provider: Arc<dyn RemoteInvokerProvider>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connections,
                provider,
                config,
                storage: RwLock::new(Arc::new(Storage::default())),
                next_epoch: AtomicU64::new(0),
            }),
            lifecycle: Mutex::new(None),
        }
    }

    /// Log the current invocation table at debug level
    pub fn log_invocation_table(&self) {
        self.inner.report();
    }
}

#[async_trait]
impl RemoteInvokerRegistry for SimpleRemoteInvokerRegistry {
    async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Err(NetworkError::illegal_state("Already started."));
        }

        let config = &self.inner.config;
        if config.refresh_interval().is_zero() || config.report_interval().is_zero() {
            return Err(NetworkError::configuration(
                "Registry intervals must be positive",
                Some("registry"),
            ));
        }

        let runtime = Handle::current();
        let subscriptions = vec![
            {
                let inner = self.inner.clone();
                let runtime = runtime.clone();
                self.inner
                    .connections
                    .subscribe_to_connect(Box::new(move |c: &ConnectionRef| inner.on_connect(c, &runtime)))
            },
            {
                let inner = self.inner.clone();
                let runtime = runtime.clone();
                self.inner
                    .connections
                    .subscribe_to_disconnect(Box::new(move |c: &ConnectionRef| {
                        inner.on_disconnect(c, &runtime)
                    }))
            },
        ];

        let connections = self.inner.connections.active_connections();
        info!(connections = connections.len(), "Starting remote invoker registry");

        let bootstraps: Vec<JoinHandle<()>> = connections
            .into_iter()
            .map(|connection| {
                let epoch = self.inner.register(&connection.instance_id());
                tokio::spawn(self.inner.clone().bootstrap(connection, epoch, false))
            })
            .collect();
        for outcome in join_all(bootstraps).await {
            if let Err(e) = outcome {
                error!("Bootstrap task failed: {}", e);
            }
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(maintain(self.inner.clone(), shutdown_rx));

        *lifecycle = Some(Running {
            subscriptions,
            shutdown,
            task,
        });
        self.inner.report();
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let Running {
            subscriptions,
            shutdown,
            mut task,
        } = self
            .lifecycle
            .lock()
            .await
            .take()
            .ok_or_else(|| NetworkError::illegal_state("Not running."))?;

        drop(subscriptions);
        let _ = shutdown.send(());
        let timeout = self.inner.config.shutdown_timeout();
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => debug!("Registry maintenance terminated"),
            Ok(Err(e)) => error!("Registry maintenance failed: {}", e),
            Err(_) => {
                warn!("Registry maintenance termination timed out.");
                task.abort();
            }
        }

        let removed = self.inner.mutate(|storage| {
            let removed: Invokers = storage
                .invokers
                .iter()
                .map(|(node_id, entry)| (node_id.clone(), entry.invoker.clone()))
                .collect();
            *storage = Storage::default();
            removed
        });

        info!(invokers = removed.len(), "Stopping remote invoker registry");
        stop_all(removed).await;
        Ok(())
    }

    async fn refresh(&self) -> Result<()> {
        if self.lifecycle.lock().await.is_none() {
            return Err(NetworkError::illegal_state("Not running."));
        }
        self.inner.refresh().await
    }

    fn get_remote_invoker(&self, node_id: &NodeId) -> Result<Arc<dyn RemoteInvoker>> {
        self.inner
            .snapshot()
            .invokers
            .get(node_id)
            .map(|entry| entry.invoker.clone())
            .ok_or_else(|| NetworkError::node_not_found(node_id))
    }

    fn get_best_remote_invoker(&self, application_id: &ApplicationId) -> Result<Arc<dyn RemoteInvoker>> {
        let storage = self.inner.snapshot();
        storage
            .ranked
            .get(application_id)
            .and_then(|nodes| nodes.first())
            .and_then(|node_id| storage.invokers.get(node_id))
            .map(|entry| entry.invoker.clone())
            .ok_or_else(|| NetworkError::no_invokers(application_id))
    }

    fn get_all_remote_invokers(&self, application_id: &ApplicationId) -> Vec<Arc<dyn RemoteInvoker>> {
        let storage = self.inner.snapshot();
        storage
            .ranked
            .get(application_id)
            .map(|nodes| {
                nodes
                    .iter()
                    .filter_map(|node_id| storage.invokers.get(node_id))
                    .map(|entry| entry.invoker.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn all_remote_invoker_status(&self) -> Vec<InvokerStatus> {
        self.inner.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::{Invocation, InvocationError};
    use serde_json::Value;
    use std::collections::BTreeSet;

    struct NullInvoker;

    #[async_trait]
    impl RemoteInvoker for NullInvoker {
        async fn start(&self, _address: &str) -> Result<()> {
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }

        async fn invoke(&self, _invocation: &Invocation) -> std::result::Result<Value, InvocationError> {
            Ok(Value::Null)
        }
    }

    fn opened(nodes: &[NodeId]) -> Invokers {
        nodes
            .iter()
            .map(|n| (n.clone(), Arc::new(NullInvoker) as Arc<dyn RemoteInvoker>))
            .collect()
    }

    fn metadata(quality: f64, nodes: &[NodeId]) -> InstanceMetadata {
        InstanceMetadata {
            quality,
            node_ids: nodes.iter().cloned().collect::<BTreeSet<_>>(),
        }
    }

    #[test]
    fn test_rank_by_quality_then_node_id() {
        let app = ApplicationId::random();
        let (i1, i2, i3) = (InstanceId::random(), InstanceId::random(), InstanceId::random());
        let n1 = NodeId::for_instance_and_application(&i1, &app);
        let n2 = NodeId::for_instance_and_application(&i2, &app);
        let n3 = NodeId::for_instance_and_application(&i3, &app);

        let mut storage = Storage::default();
        for (instance, node, quality) in [(&i1, &n1, 0.5), (&i2, &n2, 0.9), (&i3, &n3, 0.9)] {
            storage.connections.insert(instance.clone(), 1);
            let discarded = storage.install(instance, 1, &metadata(quality, &[node.clone()]), opened(&[node.clone()]), false);
            assert!(discarded.is_empty());
        }

        let mut tied = vec![n2.clone(), n3.clone()];
        tied.sort();
        assert_eq!(storage.ranked[&app], vec![tied[0].clone(), tied[1].clone(), n1]);
    }

    #[test]
    fn test_stale_epoch_is_discarded() {
        let instance = InstanceId::random();
        let node = NodeId::for_instance_and_application(&instance, &ApplicationId::random());

        let mut storage = Storage::default();
        storage.connections.insert(instance.clone(), 2);
        let discarded = storage.install(&instance, 1, &metadata(1.0, &[node.clone()]), opened(&[node.clone()]), false);

        assert_eq!(discarded.len(), 1);
        assert!(storage.invokers.is_empty());
    }

    #[test]
    fn test_prune_removes_unreported_nodes() {
        let instance = InstanceId::random();
        let a = NodeId::for_instance_and_application(&instance, &ApplicationId::random());
        let b = NodeId::for_instance_and_application(&instance, &ApplicationId::random());

        let mut storage = Storage::default();
        storage.connections.insert(instance.clone(), 0);
        storage.install(&instance, 0, &metadata(0.1, &[a.clone(), b.clone()]), opened(&[a.clone(), b.clone()]), false);

        let discarded = storage.install(&instance, 0, &metadata(0.7, &[a.clone()]), Vec::new(), true);
        assert_eq!(discarded.len(), 1);
        assert_eq!(discarded[0].0, b);
        assert_eq!(storage.invokers[&a].quality, 0.7);
        assert!(storage.ranked.get(&b.application_id()).is_none());
    }
}
