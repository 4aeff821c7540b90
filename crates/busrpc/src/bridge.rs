//! RpcBridge: the caller-facing facade.
//!
//! Owns the shared state (registry, correlation table), the dispatcher
//! lifecycle, and the proxy side of a call: build a request envelope,
//! publish it to the peer's inbox, and await the correlated response with a
//! bound on waiting time.
//!
//! # Topology
//!
//! Each process owns one inbox (topic + subscription) it consumes. Requests
//! for the peer and responses to the peer's requests are both published to
//! the peer's inbox topic; the envelope `kind` tag tells them apart. Two
//! processes bridge by crossing their configs:
//!
//! ```text
//! app:    topic="app",    subscription="app-sub",    peer_topic="worker"
//! worker: topic="worker", subscription="worker-sub", peer_topic="app"
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::MessageBus;
use crate::codec;
use crate::correlation::{CallOutcome, CorrelationTable};
use crate::dispatcher::Dispatcher;
use crate::envelope::{CallArgs, CorrelationId, Envelope, ResponseOutcome};
use crate::error::{CallError, StartError};
use crate::registry::{DuplicateMethodError, MethodHandler, MethodRegistry};

/// Bound on waiting for a response when the caller does not specify one.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(100);

/// Channel wiring and call defaults for one bridge instance.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Inbox topic this bridge consumes.
    pub topic: String,
    /// Subscription name on the inbox topic.
    pub subscription: String,
    /// Inbox topic of the process on the other side.
    pub peer_topic: String,
    pub default_timeout: Duration,
}

impl BridgeConfig {
    pub fn new(
        topic: impl Into<String>,
        subscription: impl Into<String>,
        peer_topic: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            subscription: subscription.into(),
            peer_topic: peer_topic.into(),
            default_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

enum Lifecycle {
    Idle,
    Running {
        stop: CancellationToken,
        task: JoinHandle<()>,
    },
    Stopped,
}

struct BridgeInner {
    bus: Arc<dyn MessageBus>,
    config: BridgeConfig,
    registry: Arc<MethodRegistry>,
    table: Arc<CorrelationTable>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

/// RPC facade over a pub/sub bus. Cheap to clone; all clones share one
/// dispatcher, registry, and correlation table.
#[derive(Clone)]
pub struct RpcBridge {
    inner: Arc<BridgeInner>,
}

impl RpcBridge {
    pub fn new(bus: Arc<dyn MessageBus>, config: BridgeConfig) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                bus,
                config,
                registry: Arc::new(MethodRegistry::new()),
                table: Arc::new(CorrelationTable::new()),
                lifecycle: tokio::sync::Mutex::new(Lifecycle::Idle),
            }),
        }
    }

    /// Bind `name` to a locally hosted handler. Rejects names already bound.
    pub fn register<H: MethodHandler>(
        &self,
        name: &str,
        handler: H,
    ) -> Result<(), DuplicateMethodError> {
        tracing::debug!(method = name, "Registering handler");
        self.inner.registry.register(name, Arc::new(handler))
    }

    /// A function-call-shaped handle for one remote method.
    pub fn method(&self, name: impl Into<String>) -> MethodProxy {
        MethodProxy {
            bridge: self.clone(),
            name: name.into(),
        }
    }

    /// Invoke a remote method and await its result, bounded by the
    /// bridge-wide default timeout.
    pub async fn call(&self, method: &str, args: CallArgs) -> Result<Value, CallError> {
        self.call_with_timeout(method, args, self.inner.config.default_timeout)
            .await
    }

    /// Invoke a remote method with a caller-specified timeout.
    ///
    /// Exactly one of {result, remote error, timeout, bridge shutdown}
    /// resolves the call, and a timed-out call leaves nothing behind in the
    /// correlation table.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        args: CallArgs,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        let inner = &self.inner;
        let id = CorrelationId::new();
        let deadline = Instant::now() + timeout;
        let mut receiver = inner
            .table
            .register(id, method, deadline)
            .map_err(|_| CallError::BridgeClosed)?;
        // Covers every early exit, including this future being dropped at an
        // await point: the entry must not outlive the call.
        let _guard = PendingGuard {
            table: Arc::clone(&inner.table),
            id,
        };

        let envelope = Envelope::request(id, method, args);
        let payload = codec::encode(&envelope)?;
        inner
            .bus
            .publish(&inner.config.peer_topic, payload)
            .await
            .map_err(CallError::Bus)?;
        tracing::debug!(correlation_id = %id, method, "Request published");

        match tokio::time::timeout(timeout, &mut receiver).await {
            Ok(released) => resolve(method, released),
            Err(_elapsed) => {
                if inner.table.forget(&id) {
                    tracing::debug!(correlation_id = %id, method, "Call timed out");
                    Err(CallError::Timeout {
                        method: method.to_string(),
                        correlation_id: id,
                    })
                } else {
                    // The dispatcher removed the entry first, so the outcome
                    // is already in flight on our receiver.
                    resolve(method, receiver.await)
                }
            }
        }
    }

    /// Number of calls currently awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.table.len()
    }

    /// Verify the inbox subscription exists and start the dispatcher.
    ///
    /// Idempotent while running. A stopped bridge does not restart.
    pub async fn start(&self) -> Result<(), StartError> {
        let inner = &self.inner;
        let mut lifecycle = inner.lifecycle.lock().await;
        match &*lifecycle {
            Lifecycle::Running { .. } => return Ok(()),
            Lifecycle::Stopped => return Err(StartError::Closed),
            Lifecycle::Idle => {}
        }

        let config = &inner.config;
        inner
            .bus
            .create_subscription(&config.subscription, &config.topic)
            .await
            .map_err(StartError::Subscription)?;
        let inbound = inner
            .bus
            .subscribe(&config.subscription)
            .await
            .map_err(StartError::Subscribe)?;

        let stop = CancellationToken::new();
        let dispatcher = Dispatcher::new(
            Arc::clone(&inner.bus),
            Arc::clone(&inner.registry),
            Arc::clone(&inner.table),
            config.peer_topic.clone(),
        );
        let task = tokio::spawn(dispatcher.run(inbound, stop.clone()));
        tracing::info!(
            topic = %config.topic,
            subscription = %config.subscription,
            peer_topic = %config.peer_topic,
            "Bridge started"
        );

        *lifecycle = Lifecycle::Running { stop, task };
        Ok(())
    }

    /// Stop the dispatcher after its current message, join it, and release
    /// every still-blocked caller with `BridgeClosed`.
    pub async fn stop(&self) {
        let inner = &self.inner;
        let mut lifecycle = inner.lifecycle.lock().await;
        if let Lifecycle::Running { stop, task } =
            std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
        {
            stop.cancel();
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Dispatcher task failed");
            }
        }
        inner.table.close();
        tracing::info!("Bridge stopped");
    }
}

/// Removes the pending-call entry when the call exits by any path. A no-op
/// when the dispatcher, the timeout branch, or `close()` got there first.
struct PendingGuard {
    table: Arc<CorrelationTable>,
    id: CorrelationId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.forget(&self.id);
    }
}

fn resolve(
    method: &str,
    released: Result<CallOutcome, oneshot::error::RecvError>,
) -> Result<Value, CallError> {
    match released {
        Ok(CallOutcome::Resolved(ResponseOutcome::Result(value))) => Ok(value),
        Ok(CallOutcome::Resolved(ResponseOutcome::Error(message))) => {
            Err(CallError::from_remote(method, message))
        }
        Ok(CallOutcome::Closed) | Err(_) => Err(CallError::BridgeClosed),
    }
}

/// Cloneable handle invoking one remote method through its bridge.
#[derive(Clone)]
pub struct MethodProxy {
    bridge: RpcBridge,
    name: String,
}

impl MethodProxy {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn invoke(&self, args: CallArgs) -> Result<Value, CallError> {
        self.bridge.call(&self.name, args).await
    }

    pub async fn invoke_with_timeout(
        &self,
        args: CallArgs,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        self.bridge.call_with_timeout(&self.name, args, timeout).await
    }
}
