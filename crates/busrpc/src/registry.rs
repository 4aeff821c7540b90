//! Method registry: name → handler bindings served by the dispatcher.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};

/// Registration conflict. Overwriting silently would hide collisions between
/// independently developed handlers, so a bound name stays bound.
#[derive(Debug, thiserror::Error)]
#[error("method '{0}' is already registered")]
pub struct DuplicateMethodError(pub String);

/// A locally hosted method, invocable by remote callers.
///
/// Handlers run one at a time on the dispatcher; a handler needing
/// parallelism hands work off to its own tasks. Failures are returned, not
/// raised — the dispatcher turns them into error responses.
#[async_trait]
pub trait MethodHandler: Send + Sync + 'static {
    async fn invoke(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> anyhow::Result<Value>;
}

/// [`MethodHandler`] built from an async closure. See [`handler_fn`].
pub struct FnHandler {
    f: Box<dyn Fn(Vec<Value>, Map<String, Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>,
}

/// Lift an async closure into a [`MethodHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler
where
    F: Fn(Vec<Value>, Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    FnHandler {
        f: Box::new(move |args, kwargs| Box::pin(f(args, kwargs))),
    }
}

#[async_trait]
impl MethodHandler for FnHandler {
    async fn invoke(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> anyhow::Result<Value> {
        (self.f)(args, kwargs).await
    }
}

/// Name → handler map shared between registration calls and the dispatcher.
/// The lock is held only for point mutations, never across an invocation.
#[derive(Default)]
pub struct MethodRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn MethodHandler>>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        name: &str,
        handler: Arc<dyn MethodHandler>,
    ) -> Result<(), DuplicateMethodError> {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if handlers.contains_key(name) {
            return Err(DuplicateMethodError(name.to_string()));
        }
        handlers.insert(name.to_string(), handler);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn MethodHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo() -> Arc<dyn MethodHandler> {
        Arc::new(handler_fn(|args, _kwargs| async move {
            Ok(args.into_iter().next().unwrap_or(Value::Null))
        }))
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let registry = MethodRegistry::new();
        registry.register("echo", echo()).unwrap();

        let handler = registry.lookup("echo").expect("registered");
        let result = handler.invoke(vec![json!(42)], Map::new()).await.unwrap();
        assert_eq!(result, json!(42));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = MethodRegistry::new();
        registry.register("echo", echo()).unwrap();

        let err = registry.register("echo", echo()).unwrap_err();
        assert_eq!(err.0, "echo");
    }

    #[test]
    fn lookup_missing_returns_none() {
        let registry = MethodRegistry::new();
        assert!(registry.lookup("missing").is_none());
    }

    #[tokio::test]
    async fn handler_failure_is_returned_not_raised() {
        let registry = MethodRegistry::new();
        registry
            .register(
                "boom",
                Arc::new(handler_fn(|_args, _kwargs| async move {
                    anyhow::bail!("x")
                })),
            )
            .unwrap();

        let handler = registry.lookup("boom").unwrap();
        let err = handler.invoke(Vec::new(), Map::new()).await.unwrap_err();
        assert!(err.to_string().contains("x"));
    }
}
