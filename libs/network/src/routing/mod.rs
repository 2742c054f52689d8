//! Invocation Routing
//!
//! A [`Route`] names a routing strategy and carries the address the strategy
//! interprets. Strategies are looked up by `(type, name)` through a
//! [`RoutingStrategyResolver`]; an unknown combination is a configuration
//! error and is never retried.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut strategies = RoutingStrategyRegistry::new();
//! strategies.register(None, Arc::new(DefaultRoutingStrategy::new(registry.clone(), app_id)));
//! let strategy = strategies.resolve(RoutingStrategyType::Default, None)?;
//! ```

pub mod strategy;

pub use strategy::{
    AddressRoutingStrategy, BroadcastRoutingStrategy, DefaultRoutingStrategy,
    ListAggregateRoutingStrategy,
};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::invocation::{Invocation, InvocationError};
use crate::{NetworkError, Result};

/// Kind of routing applied to an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutingStrategyType {
    /// Best invoker of one application
    Default,
    /// Exact node named by the address
    Address,
    /// Every invoker of one application, no result
    Broadcast,
    /// Every invoker of one application, list results concatenated
    ListAggregate,
}

impl fmt::Display for RoutingStrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Default => "DEFAULT",
            Self::Address => "ADDRESS",
            Self::Broadcast => "BROADCAST",
            Self::ListAggregate => "LIST_AGGREGATE",
        };
        f.write_str(name)
    }
}

/// Address plus strategy selection for one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Opaque to the dispatcher, interpreted by the strategy
    pub address: Vec<Value>,
    pub strategy_type: RoutingStrategyType,
    pub strategy_name: Option<String>,
}

impl Route {
    pub fn new(strategy_type: RoutingStrategyType) -> Self {
        Self {
            address: Vec::new(),
            strategy_type,
            strategy_name: None,
        }
    }

    pub fn with_address(mut self, address: Vec<Value>) -> Self {
        self.address = address;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.strategy_name = Some(name.into());
        self
    }
}

/// Picks the invoker(s) for an invocation and combines their outcomes
#[async_trait]
pub trait RoutingStrategy: Send + Sync {
    fn strategy_type(&self) -> RoutingStrategyType;

    async fn invoke(&self, address: &[Value], invocation: &Invocation) -> std::result::Result<Value, InvocationError>;
}

/// Lookup of strategies by type and optional name
pub trait RoutingStrategyResolver: Send + Sync {
    fn resolve(&self, strategy_type: RoutingStrategyType, name: Option<&str>) -> Result<Arc<dyn RoutingStrategy>>;
}

/// Resolver over strategies registered at startup
#[derive(Default)]
pub struct RoutingStrategyRegistry {
    strategies: HashMap<(RoutingStrategyType, Option<String>), Arc<dyn RoutingStrategy>>,
}

impl RoutingStrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the strategy's own type; replaces an earlier entry
    pub fn register(&mut self, name: Option<&str>, strategy: Arc<dyn RoutingStrategy>) -> &mut Self {
        let key = (strategy.strategy_type(), name.map(str::to_string));
        self.strategies.insert(key, strategy);
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl RoutingStrategyResolver for RoutingStrategyRegistry {
    fn resolve(&self, strategy_type: RoutingStrategyType, name: Option<&str>) -> Result<Arc<dyn RoutingStrategy>> {
        self.strategies
            .get(&(strategy_type, name.map(str::to_string)))
            .cloned()
            .ok_or_else(|| NetworkError::routing_unresolved(strategy_type.to_string(), name))
    }
}

impl fmt::Debug for RoutingStrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self
            .strategies
            .keys()
            .map(|(t, n)| match n {
                Some(n) => format!("{}/{}", t, n),
                None => t.to_string(),
            })
            .collect();
        keys.sort();
        f.debug_struct("RoutingStrategyRegistry")
            .field("strategies", &keys)
            .finish()
    }
}
