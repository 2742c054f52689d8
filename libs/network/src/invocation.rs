//! Invocations and Their Outcomes
//!
//! An [`Invocation`] describes one remote method call. Every invocation ends
//! in exactly one terminal outcome, an [`InvocationResult`] or an
//! [`InvocationError`], which is handed to the caller's
//! [`InvocationHandlers`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::error;

use crate::NetworkError;

/// How the caller waits for the outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchType {
    /// Caller blocks until the outcome is known
    Synchronous,
    /// Caller gets the outcome through result and error handlers only
    Asynchronous,
    /// Caller gets a future; handlers fire as well
    Future,
}

/// Serializable description of a remote method call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    /// Remote interface the method belongs to
    pub type_name: String,
    /// Named instance of the interface, if several are registered
    pub name: Option<String>,
    pub method: String,
    /// Parameter type names, in declaration order
    pub parameters: Vec<String>,
    pub arguments: Vec<Value>,
    pub dispatch_type: DispatchType,
}

impl Invocation {
    pub fn new(
        type_name: impl Into<String>,
        method: impl Into<String>,
        dispatch_type: DispatchType,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            name: None,
            method: method.into(),
            parameters: Vec::new(),
            arguments: Vec::new(),
            dispatch_type,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_argument(mut self, parameter: impl Into<String>, argument: Value) -> Self {
        self.parameters.push(parameter.into());
        self.arguments.push(argument);
        self
    }
}

/// Successful outcome of an invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub value: Value,
}

impl InvocationResult {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}

/// Origin of an invocation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Remote method raised an error
    Remote,
    /// Invocation never reached the remote side or its response was lost
    Transport,
    /// No invoker or strategy could serve the route
    Routing,
    /// Caller cancelled the operation
    Cancelled,
    Timeout,
}

/// Failed outcome of an invocation
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind:?} fault: {message}")]
pub struct InvocationError {
    pub kind: FaultKind,
    pub message: String,
}

impl InvocationError {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Remote, message)
    }

    pub fn cancelled() -> Self {
        Self::new(FaultKind::Cancelled, "operation cancelled")
    }
}

impl From<NetworkError> for InvocationError {
    fn from(err: NetworkError) -> Self {
        let kind = match &err {
            NetworkError::Invocation(inner) => return inner.clone(),
            NetworkError::Timeout { .. } => FaultKind::Timeout,
            NetworkError::NodeNotFound { .. }
            | NetworkError::NoInvokers { .. }
            | NetworkError::RoutingStrategyUnresolved { .. }
            | NetworkError::InvalidId(_) => FaultKind::Routing,
            _ => FaultKind::Transport,
        };
        Self::new(kind, err.to_string())
    }
}

pub type ResultHandler = Box<dyn FnOnce(Value) + Send>;
pub type ErrorHandler = Box<dyn FnOnce(InvocationError) + Send>;

/// Call-site handlers receiving the terminal outcome
///
/// Result handlers run in registration order. At most one of the two sides
/// ever runs, and each handler runs at most once.
#[derive(Default)]
pub struct InvocationHandlers {
    results: Vec<ResultHandler>,
    error: Option<ErrorHandler>,
}

impl InvocationHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_result(mut self, handler: impl FnOnce(Value) + Send + 'static) -> Self {
        self.results.push(Box::new(handler));
        self
    }

    pub fn on_error(mut self, handler: impl FnOnce(InvocationError) + Send + 'static) -> Self {
        self.error = Some(Box::new(handler));
        self
    }

    pub fn result_handler_count(&self) -> usize {
        self.results.len()
    }

    pub fn has_error_handler(&self) -> bool {
        self.error.is_some()
    }

    /// Hand the outcome to the handlers, consuming them
    pub fn deliver(self, outcome: &Result<Value, InvocationError>) {
        match outcome {
            Ok(value) => {
                for handler in self.results {
                    handler(value.clone());
                }
            }
            Err(err) => match self.error {
                Some(handler) => handler(err.clone()),
                None => error!(kind = ?err.kind, "Unhandled invocation error: {}", err.message),
            },
        }
    }
}

impl std::fmt::Debug for InvocationHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationHandlers")
            .field("results", &self.results.len())
            .field("error", &self.error.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_invocation_structural_equality() {
        let a = Invocation::new("Greeter", "greet", DispatchType::Synchronous)
            .with_argument("String", json!("x"));
        let b = Invocation::new("Greeter", "greet", DispatchType::Synchronous)
            .with_argument("String", json!("x"));
        assert_eq!(a, b);
        assert_ne!(a, b.clone().with_name("secondary"));
    }

    #[test]
    fn test_dispatch_type_wire_names() {
        assert_eq!(serde_json::to_string(&DispatchType::Future).unwrap(), "\"FUTURE\"");
    }

    #[test]
    fn test_results_delivered_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (s1, s2) = (seen.clone(), seen.clone());
        let errors = Arc::new(Mutex::new(0));
        let e = errors.clone();

        InvocationHandlers::new()
            .on_result(move |v| s1.lock().push(format!("first {v}")))
            .on_result(move |v| s2.lock().push(format!("second {v}")))
            .on_error(move |_| *e.lock() += 1)
            .deliver(&Ok(json!(42)));

        assert_eq!(*seen.lock(), vec!["first 42", "second 42"]);
        assert_eq!(*errors.lock(), 0);
    }

    #[test]
    fn test_error_delivered_once_without_results() {
        let seen = Arc::new(Mutex::new(Vec::<InvocationError>::new()));
        let s = seen.clone();
        let results = Arc::new(Mutex::new(0));
        let r = results.clone();

        InvocationHandlers::new()
            .on_result(move |_| *r.lock() += 1)
            .on_error(move |err| s.lock().push(err))
            .deliver(&Err(InvocationError::remote("boom")));

        assert_eq!(*results.lock(), 0);
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0].kind, FaultKind::Remote);
    }

    #[test]
    fn test_network_error_fault_kinds() {
        let err: InvocationError = NetworkError::timeout("call", 5).into();
        assert_eq!(err.kind, FaultKind::Timeout);

        let err: InvocationError = NetworkError::routing_unresolved("Default", None).into();
        assert_eq!(err.kind, FaultKind::Routing);

        let err: InvocationError = NetworkError::connection("reset", None).into();
        assert_eq!(err.kind, FaultKind::Transport);
    }
}
