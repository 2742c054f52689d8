//! Cluster Networking
//!
//! Discovery of peer instances, the invoker registry that tracks live nodes,
//! and the dispatch path that carries invocations to them:
//!
//! ```text
//! discovery ──hosts──▶ connection service ──connect/disconnect──▶ registry
//!                                                                     │
//! proxy ──Invocation──▶ dispatcher ──Route──▶ routing strategy ──────┘
//! ```
//!
//! The connection service is consumed through the traits in [`connection`];
//! the registry and the dispatcher are the surfaces proxy code depends on.

pub mod connection;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod invocation;
pub mod invoker;
pub mod proxy;
pub mod registry;
pub mod routing;

pub use connection::{
    ConnectionRef, InstanceConnection, InstanceConnectionService, InstanceMetadata,
    InstanceMetadataContext,
};
pub use discovery::{
    discovery_from_config, InstanceDiscoveryService, InstanceHostInfo, SrvInstanceDiscoveryService,
    StaticInstanceDiscoveryService,
};
pub use dispatch::{
    AsyncOperation, InvocationFuture, RemoteInvocationDispatcher, SimpleRemoteInvocationDispatcher,
};
pub use error::{NetworkError, Result};
pub use event::{Publisher, Subscription};
pub use invocation::{
    DispatchType, FaultKind, Invocation, InvocationError, InvocationHandlers, InvocationResult,
};
pub use invoker::{RemoteInvoker, RemoteInvokerProvider, TcpInvokerProvider, TcpRemoteInvoker};
pub use proxy::{
    MethodDescriptor, MethodShape, ProxyBuilder, ProxyRegistry, ProxyReturn, RemoteInterface,
    RemoteProxy, ReturnKind,
};
pub use registry::{InvokerStatus, RemoteInvokerRegistry, SimpleRemoteInvokerRegistry};
pub use routing::{
    Route, RoutingStrategy, RoutingStrategyRegistry, RoutingStrategyResolver, RoutingStrategyType,
};
