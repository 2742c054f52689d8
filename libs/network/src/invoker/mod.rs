//! Remote Invokers
//!
//! An invoker carries invocations to one node over a route opened by the
//! node's connection. The registry owns every invoker's lifecycle: it is
//! created through a [`RemoteInvokerProvider`], started with the route
//! address, and stopped once when its node goes away.

pub mod tcp;

pub use tcp::{TcpInvokerProvider, TcpRemoteInvoker};

use std::sync::Arc;

use async_trait::async_trait;
use cluster_types::NodeId;
use serde_json::Value;

use crate::invocation::{Invocation, InvocationError};
use crate::Result;

/// Transport handle bound to one node
#[async_trait]
pub trait RemoteInvoker: Send + Sync {
    /// Bind to `address` and establish the transport
    async fn start(&self, address: &str) -> Result<()>;

    /// Release the transport; safe to call more than once
    async fn stop(&self) -> Result<()>;

    /// Perform one invocation and wait for its outcome
    async fn invoke(&self, invocation: &Invocation) -> std::result::Result<Value, InvocationError>;
}

/// Creates unstarted invokers for nodes
pub trait RemoteInvokerProvider: Send + Sync {
    fn create(&self, node_id: &NodeId) -> Arc<dyn RemoteInvoker>;
}

impl<F> RemoteInvokerProvider for F
where
    F: Fn(&NodeId) -> Arc<dyn RemoteInvoker> + Send + Sync,
{
    fn create(&self, node_id: &NodeId) -> Arc<dyn RemoteInvoker> {
        self(node_id)
    }
}
