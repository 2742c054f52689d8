//! Network Error Types
//!
//! Error handling for discovery, connections, invokers and routing.

use cluster_types::{ApplicationId, InvalidIdError, NodeId};
use thiserror::Error;

use crate::invocation::{FaultKind, InvocationError};

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Main network error type
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Lifecycle call made in the wrong state
    #[error("Illegal state: {message}")]
    IllegalState { message: String },

    /// No live invoker for the node
    #[error("No remote invoker for node {node_id}")]
    NodeNotFound { node_id: NodeId },

    /// No live invoker for any node of the application
    #[error("No remote invoker for application {application_id}")]
    NoInvokers { application_id: ApplicationId },

    /// Discovery lookup errors
    #[error("Discovery error: {message}")]
    Discovery {
        message: String,
        source: Option<BoxedSource>,
    },

    /// Directory has no record for the queried name
    #[error("Name not found: {name}")]
    NameNotFound { name: String },

    /// Connection management errors
    #[error("Connection error: {message} (remote: {remote_addr:?})")]
    Connection {
        message: String,
        remote_addr: Option<String>,
        source: Option<BoxedSource>,
    },

    /// Invoker lifecycle or call errors
    #[error("Invoker error: {message}")]
    Invoker {
        message: String,
        source: Option<BoxedSource>,
    },

    /// No routing strategy for the requested type and name
    #[error("No routing strategy registered for {strategy_type} (name: {name:?})")]
    RoutingStrategyUnresolved {
        strategy_type: String,
        name: Option<String>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Protocol and serialization errors
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        source: Option<BoxedSource>,
    },

    /// Operation timeout errors
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },

    /// Identifier parse errors
    #[error(transparent)]
    InvalidId(#[from] InvalidIdError),

    /// Terminal failure of a remote invocation
    #[error(transparent)]
    Invocation(#[from] InvocationError),
}

/// Result type alias for network operations
pub type Result<T> = std::result::Result<T, NetworkError>;

impl NetworkError {
    /// Create an illegal state error
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    pub fn node_not_found(node_id: &NodeId) -> Self {
        Self::NodeNotFound {
            node_id: node_id.clone(),
        }
    }

    pub fn no_invokers(application_id: &ApplicationId) -> Self {
        Self::NoInvokers {
            application_id: application_id.clone(),
        }
    }

    /// Create a discovery error
    pub fn discovery(message: impl Into<String>) -> Self {
        Self::Discovery {
            message: message.into(),
            source: None,
        }
    }

    pub fn name_not_found(name: impl Into<String>) -> Self {
        Self::NameNotFound { name: name.into() }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>, remote_addr: Option<&str>) -> Self {
        Self::Connection {
            message: message.into(),
            remote_addr: remote_addr.map(str::to_string),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        remote_addr: Option<&str>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            remote_addr: remote_addr.map(str::to_string),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invoker error
    pub fn invoker(message: impl Into<String>) -> Self {
        Self::Invoker {
            message: message.into(),
            source: None,
        }
    }

    pub fn routing_unresolved(strategy_type: impl Into<String>, name: Option<&str>) -> Self {
        Self::RoutingStrategyUnresolved {
            strategy_type: strategy_type.into(),
            name: name.map(str::to_string),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            source: None,
        }
    }

    /// Create a protocol error with source
    pub fn protocol_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Protocol {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create an I/O error
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        match self {
            NetworkError::NodeNotFound { .. } => true,
            NetworkError::NoInvokers { .. } => true,
            NetworkError::Discovery { .. } => true,
            NetworkError::NameNotFound { .. } => true,
            NetworkError::Connection { .. } => true,
            NetworkError::Invoker { .. } => true,
            NetworkError::Timeout { .. } => true,
            NetworkError::Io { .. } => true,
            NetworkError::IllegalState { .. } => false,
            NetworkError::RoutingStrategyUnresolved { .. } => false,
            NetworkError::Configuration { .. } => false,
            NetworkError::Protocol { .. } => false,
            NetworkError::InvalidId(_) => false,
            NetworkError::Invocation(e) => matches!(e.kind, FaultKind::Transport | FaultKind::Timeout),
        }
    }

    /// Misconfiguration that must fail fast
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NetworkError::RoutingStrategyUnresolved { .. } | NetworkError::Configuration { .. }
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            NetworkError::IllegalState { .. } => "illegal_state",
            NetworkError::NodeNotFound { .. } => "node_not_found",
            NetworkError::NoInvokers { .. } => "no_invokers",
            NetworkError::Discovery { .. } => "discovery",
            NetworkError::NameNotFound { .. } => "name_not_found",
            NetworkError::Connection { .. } => "connection",
            NetworkError::Invoker { .. } => "invoker",
            NetworkError::RoutingStrategyUnresolved { .. } => "routing",
            NetworkError::Configuration { .. } => "configuration",
            NetworkError::Protocol { .. } => "protocol",
            NetworkError::Timeout { .. } => "timeout",
            NetworkError::Io { .. } => "io",
            NetworkError::InvalidId(_) => "invalid_id",
            NetworkError::Invocation(_) => "invocation",
        }
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(err: std::io::Error) -> Self {
        NetworkError::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(err: serde_json::Error) -> Self {
        NetworkError::protocol_with_source("JSON encoding failed", err)
    }
}
