//! Instance Connection Contract
//!
//! The connection service owns the live transport links to peer instances.
//! This crate only consumes it: the registry reads the active connections,
//! listens for connect/disconnect events and asks each connection for its
//! metadata and for routes to its nodes.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use cluster_types::{InstanceId, NodeId};
use serde::{Deserialize, Serialize};

use crate::event::Subscription;
use crate::Result;

/// Load and membership report of one peer instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceMetadata {
    /// Higher is better; used to rank invokers of the same application
    pub quality: f64,
    /// Nodes hosted by the instance
    pub node_ids: BTreeSet<NodeId>,
}

/// Source of an instance's current metadata
#[async_trait]
pub trait InstanceMetadataContext: Send + Sync {
    async fn instance_metadata(&self) -> Result<InstanceMetadata>;
}

/// One live link to a peer instance
#[async_trait]
pub trait InstanceConnection: Send + Sync {
    fn instance_id(&self) -> InstanceId;

    fn instance_metadata_context(&self) -> Arc<dyn InstanceMetadataContext>;

    /// Open a route to `node_id` over this link and return its address
    async fn open_route_to_node(&self, node_id: &NodeId) -> Result<String>;
}

/// Shared handle to a connection, as carried by events
pub type ConnectionRef = Arc<dyn InstanceConnection>;

pub type ConnectionHandler = Box<dyn Fn(&ConnectionRef) + Send + Sync>;

/// Maintains connections to discovered peers
#[async_trait]
pub trait InstanceConnectionService: Send + Sync {
    /// Id of the local instance
    fn instance_id(&self) -> InstanceId;

    fn local_control_address(&self) -> String;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Re-examine discovery results and reconnect as needed
    async fn refresh(&self) -> Result<()>;

    /// Snapshot of the currently connected peers
    fn active_connections(&self) -> Vec<ConnectionRef>;

    fn subscribe_to_connect(&self, handler: ConnectionHandler) -> Subscription;

    fn subscribe_to_disconnect(&self, handler: ConnectionHandler) -> Subscription;
}
