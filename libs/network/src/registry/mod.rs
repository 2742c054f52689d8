//! Remote Invoker Registry
//!
//! The routing table of the cluster: one started invoker per reachable node,
//! and per application the list of its nodes ranked by the quality their
//! instance reports.
//!
//! ## Ranking
//!
//! Invokers of an application are ordered by instance quality, highest
//! first; equal qualities fall back to ascending `NodeId` order, so the
//! choice is stable while the topology does not change.

mod simple;

pub use simple::SimpleRemoteInvokerRegistry;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use cluster_types::{ApplicationId, InstanceId, NodeId};

use crate::invoker::RemoteInvoker;
use crate::Result;

/// One row of the invoker table
#[derive(Debug, Clone, PartialEq)]
pub struct InvokerStatus {
    pub node_id: NodeId,
    pub instance_id: InstanceId,
    pub quality: f64,
}

impl fmt::Display for InvokerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (quality {:.3})", self.node_id, self.quality)
    }
}

/// Lookup surface used by routing strategies
#[async_trait]
pub trait RemoteInvokerRegistry: Send + Sync {
    /// Subscribe to connection events and bootstrap every active connection
    async fn start(&self) -> Result<()>;

    /// Unsubscribe and stop every managed invoker
    async fn stop(&self) -> Result<()>;

    /// Re-read metadata of every active connection and reconcile
    async fn refresh(&self) -> Result<()>;

    /// Invoker of exactly `node_id`
    fn get_remote_invoker(&self, node_id: &NodeId) -> Result<Arc<dyn RemoteInvoker>>;

    /// Highest ranked invoker of the application
    fn get_best_remote_invoker(&self, application_id: &ApplicationId) -> Result<Arc<dyn RemoteInvoker>>;

    /// Every live invoker of the application, in rank order
    fn get_all_remote_invokers(&self, application_id: &ApplicationId) -> Vec<Arc<dyn RemoteInvoker>>;

    /// Every live invoker, in `NodeId` order
    fn all_remote_invoker_status(&self) -> Vec<InvokerStatus>;
}
