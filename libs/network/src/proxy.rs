//! Remote Proxies
//!
//! A remote service is described once, at startup, by a [`RemoteInterface`]
//! table listing its methods. [`ProxyBuilder`] checks the table against the
//! routing strategies available and produces a [`RemoteProxy`] that turns
//! method calls into invocations on a dispatcher. Built proxies live in a
//! [`ProxyRegistry`] owned by the application and passed by reference.
//!
//! ## Dispatch mode
//!
//! The mode of a method follows from its shape:
//!
//! | returns | handler parameters | mode           |
//! |---------|--------------------|----------------|
//! | future  | none               | `Future`       |
//! | unit    | some               | `Asynchronous` |
//! | any     | none               | `Synchronous`  |
//! | value   | some               | rejected       |
//!
//! ## Usage
//!
//! ```rust,ignore
//! let interface = RemoteInterface::new("Greeter", RoutingStrategyType::Default)
//!     .method(MethodDescriptor::new("greet", &["String"], MethodShape::returning(ReturnKind::Value)));
//! let proxy = ProxyBuilder::new(interface, dispatcher).validate_with(resolver).build()?;
//! let reply = proxy.call("greet", vec![json!("x")], InvocationHandlers::new()).await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::dispatch::{AsyncOperation, InvocationFuture, RemoteInvocationDispatcher};
use crate::invocation::{DispatchType, Invocation, InvocationHandlers};
use crate::routing::{Route, RoutingStrategyResolver, RoutingStrategyType};
use crate::{NetworkError, Result};

/// What a method hands back to its caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnKind {
    Unit,
    Value,
    Future,
}

/// Call-site shape of a remote method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodShape {
    /// Number of result handler parameters
    pub result_handlers: usize,
    /// Whether the method takes an error handler parameter
    pub error_handler: bool,
    pub returns: ReturnKind,
}

impl MethodShape {
    pub fn returning(returns: ReturnKind) -> Self {
        Self {
            result_handlers: 0,
            error_handler: false,
            returns,
        }
    }

    /// Unit-returning method taking handler parameters
    pub fn with_handlers(result_handlers: usize, error_handler: bool) -> Self {
        Self {
            result_handlers,
            error_handler,
            returns: ReturnKind::Unit,
        }
    }

    pub fn has_handlers(&self) -> bool {
        self.result_handlers > 0 || self.error_handler
    }
}

impl DispatchType {
    /// Mode implied by a method's shape
    pub fn determine(shape: &MethodShape) -> Result<DispatchType> {
        match (shape.returns, shape.has_handlers()) {
            (ReturnKind::Future, _) => Ok(DispatchType::Future),
            (ReturnKind::Unit, true) => Ok(DispatchType::Asynchronous),
            (_, false) => Ok(DispatchType::Synchronous),
            (returns, true) => Err(NetworkError::configuration(
                format!("Method returning {:?} cannot take result or error handlers", returns),
                Some("shape"),
            )),
        }
    }
}

/// One remotely invokable method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    /// Parameter type names, handler parameters excluded
    pub parameters: Vec<String>,
    pub shape: MethodShape,
    /// Overrides the interface's routing for this method
    pub routing: Option<(RoutingStrategyType, Option<String>)>,
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>, parameters: &[&str], shape: MethodShape) -> Self {
        Self {
            name: name.into(),
            parameters: parameters.iter().map(|p| p.to_string()).collect(),
            shape,
            routing: None,
        }
    }

    pub fn routed(mut self, strategy_type: RoutingStrategyType, name: Option<&str>) -> Self {
        self.routing = Some((strategy_type, name.map(str::to_string)));
        self
    }
}

/// Descriptor table of a remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteInterface {
    pub type_name: String,
    pub strategy_type: RoutingStrategyType,
    pub strategy_name: Option<String>,
    pub methods: Vec<MethodDescriptor>,
}

impl RemoteInterface {
    pub fn new(type_name: impl Into<String>, strategy_type: RoutingStrategyType) -> Self {
        Self {
            type_name: type_name.into(),
            strategy_type,
            strategy_name: None,
            methods: Vec::new(),
        }
    }

    pub fn strategy_name(mut self, name: impl Into<String>) -> Self {
        self.strategy_name = Some(name.into());
        self
    }

    pub fn method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }
}

/// What a proxied call hands back, by dispatch mode
#[derive(Debug)]
pub enum ProxyReturn {
    Value(Value),
    Operation(AsyncOperation),
    Future(InvocationFuture),
}

impl ProxyReturn {
    pub fn into_value(self) -> Option<Value> {
        match self {
            ProxyReturn::Value(value) => Some(value),
            _ => None,
        }
    }
}

struct PreparedMethod {
    template: Invocation,
    route: Route,
    shape: MethodShape,
}

/// Typed client for one remote interface
pub struct RemoteProxy {
    type_name: String,
    name: Option<String>,
    dispatcher: Arc<dyn RemoteInvocationDispatcher>,
    methods: HashMap<String, PreparedMethod>,
}

impl RemoteProxy {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn dispatch_type(&self, method: &str) -> Option<DispatchType> {
        self.methods.get(method).map(|m| m.template.dispatch_type)
    }

    /// Invoke `method` with `arguments`
    ///
    /// Synchronous methods wait for the outcome; the others return as soon as
    /// the invocation is dispatched.
    pub async fn call(&self, method: &str, arguments: Vec<Value>, handlers: InvocationHandlers) -> Result<ProxyReturn> {
        let prepared = self.methods.get(method).ok_or_else(|| {
            NetworkError::configuration(
                format!("{} has no remote method {}", self.type_name, method),
                Some("method"),
            )
        })?;

        if arguments.len() != prepared.template.parameters.len() {
            return Err(NetworkError::configuration(
                format!(
                    "{}.{} takes {} arguments, got {}",
                    self.type_name,
                    method,
                    prepared.template.parameters.len(),
                    arguments.len()
                ),
                Some("arguments"),
            ));
        }
        if handlers.result_handler_count() > prepared.shape.result_handlers
            || (handlers.has_error_handler() && !prepared.shape.error_handler)
        {
            return Err(NetworkError::configuration(
                format!("{}.{} does not take the supplied handlers", self.type_name, method),
                Some("handlers"),
            ));
        }

        let mut invocation = prepared.template.clone();
        invocation.arguments = arguments;
        debug!(type_name = %self.type_name, %method, mode = ?invocation.dispatch_type, "Dispatching remote call");

        let route = &prepared.route;
        match invocation.dispatch_type {
            DispatchType::Synchronous => {
                let value = self.dispatcher.invoke_sync(route, invocation, handlers).await?;
                Ok(ProxyReturn::Value(value))
            }
            DispatchType::Asynchronous => self
                .dispatcher
                .invoke_async(route, invocation, handlers)
                .map(ProxyReturn::Operation),
            DispatchType::Future => self
                .dispatcher
                .invoke_future(route, invocation, handlers)
                .map(ProxyReturn::Future),
        }
    }
}

impl fmt::Debug for RemoteProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&String> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("RemoteProxy")
            .field("type_name", &self.type_name)
            .field("name", &self.name)
            .field("methods", &methods)
            .finish()
    }
}

/// Builds a [`RemoteProxy`], rejecting bad tables before first use
pub struct ProxyBuilder {
    interface: RemoteInterface,
    name: Option<String>,
    address: Vec<Value>,
    dispatcher: Arc<dyn RemoteInvocationDispatcher>,
    resolver: Option<Arc<dyn RoutingStrategyResolver>>,
}

impl ProxyBuilder {
    pub fn new(interface: RemoteInterface, dispatcher: Arc<dyn RemoteInvocationDispatcher>) -> Self {
        Self {
            interface,
            name: None,
            address: Vec::new(),
            dispatcher,
            resolver: None,
        }
    }

    /// Name carried on every invocation, for interfaces registered more than once
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Route address passed to the strategy on every call
    pub fn address(mut self, address: Vec<Value>) -> Self {
        self.address = address;
        self
    }

    /// Check every method's routing against `resolver` at build time
    pub fn validate_with(mut self, resolver: Arc<dyn RoutingStrategyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn build(self) -> Result<RemoteProxy> {
        let interface = self.interface;
        let mut methods = HashMap::with_capacity(interface.methods.len());

        for descriptor in &interface.methods {
            let dispatch_type = DispatchType::determine(&descriptor.shape).map_err(|e| {
                NetworkError::configuration(format!("{}.{}: {}", interface.type_name, descriptor.name, e), Some("shape"))
            })?;

            let (strategy_type, strategy_name) = descriptor
                .routing
                .clone()
                .unwrap_or_else(|| (interface.strategy_type, interface.strategy_name.clone()));

            if let Some(resolver) = &self.resolver {
                resolver.resolve(strategy_type, strategy_name.as_deref())?;
            }

            let mut template = Invocation::new(interface.type_name.clone(), descriptor.name.clone(), dispatch_type);
            template.name = self.name.clone();
            template.parameters = descriptor.parameters.clone();

            let route = Route {
                address: self.address.clone(),
                strategy_type,
                strategy_name,
            };

            let prepared = PreparedMethod {
                template,
                route,
                shape: descriptor.shape,
            };
            if methods.insert(descriptor.name.clone(), prepared).is_some() {
                return Err(NetworkError::configuration(
                    format!("{} declares {} more than once", interface.type_name, descriptor.name),
                    Some("methods"),
                ));
            }
        }

        Ok(RemoteProxy {
            type_name: interface.type_name,
            name: self.name,
            dispatcher: self.dispatcher,
            methods,
        })
    }
}

/// Proxies keyed by interface and optional name
#[derive(Debug, Default)]
pub struct ProxyRegistry {
    proxies: HashMap<(String, Option<String>), Arc<RemoteProxy>>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, proxy: RemoteProxy) -> Result<Arc<RemoteProxy>> {
        let key = (proxy.type_name.clone(), proxy.name.clone());
        if self.proxies.contains_key(&key) {
            return Err(NetworkError::configuration(
                format!("Proxy for {} (name: {:?}) already registered", key.0, key.1),
                Some("proxies"),
            ));
        }
        let proxy = Arc::new(proxy);
        self.proxies.insert(key, proxy.clone());
        Ok(proxy)
    }

    pub fn get(&self, type_name: &str, name: Option<&str>) -> Option<Arc<RemoteProxy>> {
        self.proxies
            .get(&(type_name.to_string(), name.map(str::to_string)))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}
