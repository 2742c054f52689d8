//! Remote Invocation Dispatch
//!
//! Turns a [`Route`] plus an [`Invocation`] into a call on the resolved
//! routing strategy, in one of three modes:
//!
//! - **sync**: the caller awaits the outcome, which is also handed to the
//!   handlers
//! - **async**: the call runs on the runtime; the outcome reaches the caller
//!   only through the handlers, and [`AsyncOperation::cancel`] suppresses it
//! - **future**: like async, plus an [`InvocationFuture`] that yields the
//!   same outcome
//!
//! The routing strategy is resolved before anything is dispatched. A route
//! that does not resolve fails the call immediately and no handler runs.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::invocation::{Invocation, InvocationError, InvocationHandlers};
use crate::routing::{Route, RoutingStrategy, RoutingStrategyResolver};
use crate::{NetworkError, Result};

type Outcome = std::result::Result<Value, InvocationError>;

const PENDING: u8 = 0;
const DELIVERED: u8 = 1;
const CANCELLED: u8 = 2;

/// Handle to an invocation dispatched without waiting
#[derive(Debug)]
pub struct AsyncOperation {
    state: Arc<AtomicU8>,
    task: JoinHandle<()>,
}

impl AsyncOperation {
    /// Run `outcome` on `runtime` and hand its result to `handlers` unless
    /// cancelled first
    pub fn spawn<F>(runtime: &Handle, outcome: F, handlers: InvocationHandlers) -> Self
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(PENDING));
        let task = {
            let state = state.clone();
            runtime.spawn(async move {
                let outcome = outcome.await;
                if state
                    .compare_exchange(PENDING, DELIVERED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    handlers.deliver(&outcome);
                } else {
                    debug!("Dropping outcome of cancelled invocation");
                }
            })
        };
        Self { state, task }
    }

    /// Stop caring about the outcome
    ///
    /// Returns `false` when the outcome was already handed to the handlers.
    /// The remote side may still execute the call.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if cancelled {
            self.task.abort();
        }
        cancelled
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    pub fn is_done(&self) -> bool {
        self.task.is_finished()
    }
}

/// Outcome of an invocation dispatched in future mode
///
/// Cloning yields another handle to the same outcome.
#[derive(Clone)]
pub struct InvocationFuture {
    outcome: Shared<BoxFuture<'static, Outcome>>,
}

impl InvocationFuture {
    /// Run `outcome` on `runtime`; handlers fire before the future resolves
    pub fn spawn<F>(runtime: &Handle, outcome: F, handlers: InvocationHandlers) -> Self
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        runtime.spawn(async move {
            let outcome = outcome.await;
            handlers.deliver(&outcome);
            let _ = sender.send(outcome);
        });

        let outcome = receiver
            .map(|received| received.unwrap_or_else(|_| Err(InvocationError::cancelled())))
            .boxed()
            .shared();
        Self { outcome }
    }

    /// Wait for the outcome
    pub async fn get(&self) -> Outcome {
        self.outcome.clone().await
    }

    /// Outcome, if already known
    pub fn peek(&self) -> Option<Outcome> {
        self.outcome.peek().cloned()
    }
}

impl Future for InvocationFuture {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.outcome).poll(cx)
    }
}

impl std::fmt::Debug for InvocationFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationFuture")
            .field("done", &self.outcome.peek().is_some())
            .finish()
    }
}

/// Surface used by proxies to send invocations
#[async_trait]
pub trait RemoteInvocationDispatcher: Send + Sync {
    async fn invoke_sync(&self, route: &Route, invocation: Invocation, handlers: InvocationHandlers) -> Outcome;

    fn invoke_async(&self, route: &Route, invocation: Invocation, handlers: InvocationHandlers) -> Result<AsyncOperation>;

    fn invoke_future(&self, route: &Route, invocation: Invocation, handlers: InvocationHandlers) -> Result<InvocationFuture>;
}

/// Dispatcher over a [`RoutingStrategyResolver`]
pub struct SimpleRemoteInvocationDispatcher {
    resolver: Arc<dyn RoutingStrategyResolver>,
}

impl SimpleRemoteInvocationDispatcher {
    pub fn new(resolver: Arc<dyn RoutingStrategyResolver>) -> Self {
        Self { resolver }
    }

    fn resolve(&self, route: &Route) -> Result<Arc<dyn RoutingStrategy>> {
        self.resolver
            .resolve(route.strategy_type, route.strategy_name.as_deref())
            .map_err(|e| {
                error!(strategy = %route.strategy_type, name = ?route.strategy_name, "Unresolvable route: {}", e);
                e
            })
    }

    fn runtime() -> Result<Handle> {
        Handle::try_current().map_err(|_| NetworkError::illegal_state("No async runtime to dispatch on."))
    }
}

#[async_trait]
impl RemoteInvocationDispatcher for SimpleRemoteInvocationDispatcher {
    async fn invoke_sync(&self, route: &Route, invocation: Invocation, handlers: InvocationHandlers) -> Outcome {
        let strategy = self.resolve(route)?;
        let outcome = strategy.invoke(&route.address, &invocation).await;
        handlers.deliver(&outcome);
        outcome
    }

    fn invoke_async(&self, route: &Route, invocation: Invocation, handlers: InvocationHandlers) -> Result<AsyncOperation> {
        let strategy = self.resolve(route)?;
        let runtime = Self::runtime()?;
        let address = route.address.clone();

        Ok(AsyncOperation::spawn(
            &runtime,
            async move { strategy.invoke(&address, &invocation).await },
            handlers,
        ))
    }

    fn invoke_future(&self, route: &Route, invocation: Invocation, handlers: InvocationHandlers) -> Result<InvocationFuture> {
        let strategy = self.resolve(route)?;
        let runtime = Self::runtime()?;
        let address = route.address.clone();

        Ok(InvocationFuture::spawn(
            &runtime,
            async move { strategy.invoke(&address, &invocation).await },
            handlers,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::{DispatchType, FaultKind};
    use crate::routing::{RoutingStrategyRegistry, RoutingStrategyType};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Strategy that waits for a release before answering
    struct Gated {
        gate: Arc<Notify>,
        reply: Outcome,
    }

    #[async_trait]
    impl RoutingStrategy for Gated {
        fn strategy_type(&self) -> RoutingStrategyType {
            RoutingStrategyType::Default
        }

        async fn invoke(&self, _address: &[Value], _invocation: &Invocation) -> Outcome {
            self.gate.notified().await;
            self.reply.clone()
        }
    }

    fn dispatcher(reply: Outcome) -> (SimpleRemoteInvocationDispatcher, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let mut strategies = RoutingStrategyRegistry::new();
        strategies.register(
            None,
            Arc::new(Gated {
                gate: gate.clone(),
                reply,
            }),
        );
        (SimpleRemoteInvocationDispatcher::new(Arc::new(strategies)), gate)
    }

    fn recording() -> (InvocationHandlers, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (r, e) = (seen.clone(), seen.clone());
        let handlers = InvocationHandlers::new()
            .on_result(move |v| r.lock().push(format!("result {v}")))
            .on_error(move |err| e.lock().push(format!("error {}", err.message)));
        (handlers, seen)
    }

    fn invocation(dispatch_type: DispatchType) -> Invocation {
        Invocation::new("Counter", "next", dispatch_type)
    }

    #[tokio::test]
    async fn test_sync_returns_and_delivers() {
        let (dispatcher, gate) = dispatcher(Ok(json!(7)));
        gate.notify_one();
        let (handlers, seen) = recording();

        let route = Route::new(RoutingStrategyType::Default);
        let value = dispatcher
            .invoke_sync(&route, invocation(DispatchType::Synchronous), handlers)
            .await
            .unwrap();

        assert_eq!(value, json!(7));
        assert_eq!(*seen.lock(), vec!["result 7"]);
    }

    #[tokio::test]
    async fn test_unresolved_route_fails_fast() {
        let (dispatcher, _gate) = dispatcher(Ok(json!(1)));
        let (handlers, seen) = recording();

        let route = Route::new(RoutingStrategyType::Broadcast);
        let err = dispatcher
            .invoke_async(&route, invocation(DispatchType::Asynchronous), handlers)
            .err()
            .unwrap();

        assert!(err.is_fatal());
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_suppresses_callbacks() {
        let (dispatcher, gate) = dispatcher(Ok(json!(1)));
        let (handlers, seen) = recording();

        let route = Route::new(RoutingStrategyType::Default);
        let operation = dispatcher
            .invoke_async(&route, invocation(DispatchType::Asynchronous), handlers)
            .unwrap();

        assert!(operation.cancel());
        assert!(operation.is_cancelled());
        assert!(!operation.cancel());
        gate.notify_one();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_future_yields_error_and_fires_handler() {
        let (dispatcher, gate) = dispatcher(Err(InvocationError::remote("nope")));
        let (handlers, seen) = recording();

        let route = Route::new(RoutingStrategyType::Default);
        let future = dispatcher
            .invoke_future(&route, invocation(DispatchType::Future), handlers)
            .unwrap();
        assert!(future.peek().is_none());

        gate.notify_one();
        let err = future.get().await.unwrap_err();
        assert_eq!(err.kind, FaultKind::Remote);
        assert_eq!(future.clone().await.unwrap_err(), err);
        assert_eq!(*seen.lock(), vec!["error nope"]);
    }
}
