//! Routing Strategy Implementations
//!
//! Each strategy asks the invoker registry for candidates at call time, so
//! the topology seen by an invocation is the one current when it starts.

use std::sync::Arc;

use async_trait::async_trait;
use cluster_types::{ApplicationId, NodeId, ResourceId, TaskId};
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use super::{RoutingStrategy, RoutingStrategyType};
use crate::invocation::{FaultKind, Invocation, InvocationError};
use crate::invoker::RemoteInvoker;
use crate::registry::RemoteInvokerRegistry;
use crate::NetworkError;

type Outcome = std::result::Result<Value, InvocationError>;

/// Node addressed by a NodeId, ResourceId or TaskId string
fn node_from_address(address: &[Value]) -> std::result::Result<NodeId, InvocationError> {
    let text = address.first().and_then(Value::as_str).ok_or_else(|| {
        InvocationError::new(FaultKind::Routing, "Address must start with an identifier string")
    })?;

    NodeId::parse(text)
        .or_else(|_| ResourceId::parse(text).map(|id| id.node_id()))
        .or_else(|_| TaskId::parse(text).map(|id| id.node_id()))
        .map_err(|e| InvocationError::from(NetworkError::from(e)))
}

/// Invoke every invoker concurrently; outcomes keep invoker order
async fn invoke_all(invokers: &[Arc<dyn RemoteInvoker>], invocation: &Invocation) -> Vec<Outcome> {
    join_all(invokers.iter().map(|invoker| invoker.invoke(invocation))).await
}

/// Routes to the best invoker of one application
pub struct DefaultRoutingStrategy {
    registry: Arc<dyn RemoteInvokerRegistry>,
    application_id: ApplicationId,
}

impl DefaultRoutingStrategy {
    pub fn new(registry: Arc<dyn RemoteInvokerRegistry>, application_id: ApplicationId) -> Self {
        Self {
            registry,
            application_id,
        }
    }
}

#[async_trait]
impl RoutingStrategy for DefaultRoutingStrategy {
    fn strategy_type(&self) -> RoutingStrategyType {
        RoutingStrategyType::Default
    }

    async fn invoke(&self, _address: &[Value], invocation: &Invocation) -> Outcome {
        let invoker = self.registry.get_best_remote_invoker(&self.application_id)?;
        invoker.invoke(invocation).await
    }
}

/// Routes to the node named by the first address element
pub struct AddressRoutingStrategy {
    registry: Arc<dyn RemoteInvokerRegistry>,
}

impl AddressRoutingStrategy {
    pub fn new(registry: Arc<dyn RemoteInvokerRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl RoutingStrategy for AddressRoutingStrategy {
    fn strategy_type(&self) -> RoutingStrategyType {
        RoutingStrategyType::Address
    }

    async fn invoke(&self, address: &[Value], invocation: &Invocation) -> Outcome {
        let node_id = node_from_address(address)?;
        debug!(%node_id, method = %invocation.method, "Routing by address");
        let invoker = self.registry.get_remote_invoker(&node_id)?;
        invoker.invoke(invocation).await
    }
}

/// Sends to every invoker of one application; the result is always null
pub struct BroadcastRoutingStrategy {
    registry: Arc<dyn RemoteInvokerRegistry>,
    application_id: ApplicationId,
}

impl BroadcastRoutingStrategy {
    pub fn new(registry: Arc<dyn RemoteInvokerRegistry>, application_id: ApplicationId) -> Self {
        Self {
            registry,
            application_id,
        }
    }
}

#[async_trait]
impl RoutingStrategy for BroadcastRoutingStrategy {
    fn strategy_type(&self) -> RoutingStrategyType {
        RoutingStrategyType::Broadcast
    }

    async fn invoke(&self, _address: &[Value], invocation: &Invocation) -> Outcome {
        let invokers = self.registry.get_all_remote_invokers(&self.application_id);
        if invokers.is_empty() {
            warn!(application_id = %self.application_id, "Broadcast reached no invokers");
        }

        for outcome in invoke_all(&invokers, invocation).await {
            outcome?;
        }
        Ok(Value::Null)
    }
}

/// Sends to every invoker of one application and concatenates list results
pub struct ListAggregateRoutingStrategy {
    registry: Arc<dyn RemoteInvokerRegistry>,
    application_id: ApplicationId,
}

impl ListAggregateRoutingStrategy {
    pub fn new(registry: Arc<dyn RemoteInvokerRegistry>, application_id: ApplicationId) -> Self {
        Self {
            registry,
            application_id,
        }
    }
}

#[async_trait]
impl RoutingStrategy for ListAggregateRoutingStrategy {
    fn strategy_type(&self) -> RoutingStrategyType {
        RoutingStrategyType::ListAggregate
    }

    async fn invoke(&self, _address: &[Value], invocation: &Invocation) -> Outcome {
        let invokers = self.registry.get_all_remote_invokers(&self.application_id);

        let mut aggregate = Vec::new();
        for outcome in invoke_all(&invokers, invocation).await {
            match outcome? {
                Value::Array(items) => aggregate.extend(items),
                Value::Null => {}
                other => aggregate.push(other),
            }
        }
        Ok(Value::Array(aggregate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InvokerStatus;
    use crate::invocation::DispatchType;
    use crate::Result;
    use cluster_types::InstanceId;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Canned {
        reply: Outcome,
        calls: Mutex<usize>,
    }

    impl Canned {
        fn new(reply: Outcome) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl RemoteInvoker for Canned {
        async fn start(&self, _address: &str) -> Result<()> {
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }

        async fn invoke(&self, _invocation: &Invocation) -> Outcome {
            *self.calls.lock() += 1;
            self.reply.clone()
        }
    }

    /// Registry answering every application with the same invokers
    struct Fixed {
        node_id: NodeId,
        invokers: Vec<Arc<dyn RemoteInvoker>>,
    }

    #[async_trait]
    impl RemoteInvokerRegistry for Fixed {
        async fn start(&self) -> Result<()> {
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }

        async fn refresh(&self) -> Result<()> {
            Ok(())
        }

        fn get_remote_invoker(&self, node_id: &NodeId) -> Result<Arc<dyn RemoteInvoker>> {
            if node_id == &self.node_id {
                self.invokers.first().cloned().ok_or_else(|| NetworkError::node_not_found(node_id))
            } else {
                Err(NetworkError::node_not_found(node_id))
            }
        }

        fn get_best_remote_invoker(&self, application_id: &ApplicationId) -> Result<Arc<dyn RemoteInvoker>> {
            self.invokers
                .first()
                .cloned()
                .ok_or_else(|| NetworkError::no_invokers(application_id))
        }

        fn get_all_remote_invokers(&self, _application_id: &ApplicationId) -> Vec<Arc<dyn RemoteInvoker>> {
            self.invokers.clone()
        }

        fn all_remote_invoker_status(&self) -> Vec<InvokerStatus> {
            Vec::new()
        }
    }

    fn registry(replies: Vec<Outcome>) -> (Arc<Fixed>, Vec<Arc<Canned>>) {
        let canned: Vec<Arc<Canned>> = replies.into_iter().map(Canned::new).collect();
        let registry = Arc::new(Fixed {
            node_id: NodeId::random(),
            invokers: canned.iter().map(|c| c.clone() as Arc<dyn RemoteInvoker>).collect(),
        });
        (registry, canned)
    }

    fn invocation() -> Invocation {
        Invocation::new("Inventory", "list", DispatchType::Synchronous)
    }

    #[tokio::test]
    async fn test_default_uses_best_invoker() {
        let (registry, canned) = registry(vec![Ok(json!(1)), Ok(json!(2))]);
        let strategy = DefaultRoutingStrategy::new(registry, ApplicationId::random());

        assert_eq!(strategy.invoke(&[], &invocation()).await.unwrap(), json!(1));
        assert_eq!(*canned[0].calls.lock(), 1);
        assert_eq!(*canned[1].calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_default_without_invokers_is_routing_fault() {
        let (registry, _) = registry(vec![]);
        let strategy = DefaultRoutingStrategy::new(registry, ApplicationId::random());

        let err = strategy.invoke(&[], &invocation()).await.unwrap_err();
        assert_eq!(err.kind, FaultKind::Routing);
    }

    #[tokio::test]
    async fn test_address_accepts_narrower_ids() {
        let (registry, canned) = registry(vec![Ok(json!("hit"))]);
        let node_id = registry.node_id.clone();
        let strategy = AddressRoutingStrategy::new(registry);

        let resource = ResourceId::for_node(&node_id);
        let task = TaskId::for_resource(&resource);
        for address in [node_id.to_string(), resource.to_string(), task.to_string()] {
            let value = strategy.invoke(&[json!(address)], &invocation()).await.unwrap();
            assert_eq!(value, json!("hit"));
        }
        assert_eq!(*canned[0].calls.lock(), 3);

        let other = NodeId::for_master_node(&InstanceId::random());
        let err = strategy.invoke(&[json!(other.to_string())], &invocation()).await.unwrap_err();
        assert_eq!(err.kind, FaultKind::Routing);

        let err = strategy.invoke(&[json!("V1::bogus")], &invocation()).await.unwrap_err();
        assert_eq!(err.kind, FaultKind::Routing);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let (registry, canned) = registry(vec![Ok(json!(1)), Ok(json!(2)), Ok(json!(3))]);
        let strategy = BroadcastRoutingStrategy::new(registry, ApplicationId::random());

        assert_eq!(strategy.invoke(&[], &invocation()).await.unwrap(), Value::Null);
        assert!(canned.iter().all(|c| *c.calls.lock() == 1));
    }

    #[tokio::test]
    async fn test_broadcast_fails_with_first_error() {
        let (registry, canned) = registry(vec![
            Ok(json!(1)),
            Err(InvocationError::remote("first")),
            Err(InvocationError::remote("second")),
        ]);
        let strategy = BroadcastRoutingStrategy::new(registry, ApplicationId::random());

        let err = strategy.invoke(&[], &invocation()).await.unwrap_err();
        assert_eq!(err.message, "first");
        assert!(canned.iter().all(|c| *c.calls.lock() == 1));
    }

    #[tokio::test]
    async fn test_list_aggregate_concatenates_in_invoker_order() {
        let (registry, _) = registry(vec![Ok(json!([1, 2])), Ok(json!([])), Ok(json!([3]))]);
        let strategy = ListAggregateRoutingStrategy::new(registry, ApplicationId::random());

        assert_eq!(strategy.invoke(&[], &invocation()).await.unwrap(), json!([1, 2, 3]));
    }
}
