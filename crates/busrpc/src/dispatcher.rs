//! Dispatcher: the single background consumer of a bridge's inbox.
//!
//! One dispatcher task per bridge instance. Messages are processed strictly
//! one at a time, so handlers never run concurrently with each other or with
//! correlation-table updates — a slow handler stalls the rest of the inbox,
//! which is the accepted trade-off; run more bridge instances or hand off to
//! worker tasks from inside the handler when that matters.
//!
//! Every failure in here is per-message: decode errors, unknown methods, and
//! handler failures are logged or answered, acked, and never terminate the
//! loop. A message is acked only after it has been fully handled, so a crash
//! mid-processing leads to redelivery rather than loss.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusMessage, MessageBus};
use crate::codec;
use crate::correlation::CorrelationTable;
use crate::envelope::{CorrelationId, Envelope, METHOD_NOT_REGISTERED_MARKER, ResponseOutcome};
use crate::registry::MethodRegistry;

pub(crate) struct Dispatcher {
    bus: Arc<dyn MessageBus>,
    registry: Arc<MethodRegistry>,
    table: Arc<CorrelationTable>,
    /// Inbox topic of the process on the other side; both replies we serve
    /// and requests we issue land there.
    peer_topic: String,
}

impl Dispatcher {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        registry: Arc<MethodRegistry>,
        table: Arc<CorrelationTable>,
        peer_topic: String,
    ) -> Self {
        Self {
            bus,
            registry,
            table,
            peer_topic,
        }
    }

    /// Consume the inbox until the stop token fires or the bus closes the
    /// stream. The stop signal is observed between messages, never mid-one.
    pub async fn run(self, mut inbound: mpsc::UnboundedReceiver<BusMessage>, stop: CancellationToken) {
        tracing::info!(peer_topic = %self.peer_topic, "Dispatcher started");
        loop {
            tokio::select! {
                biased;

                _ = stop.cancelled() => {
                    tracing::debug!("Stop requested");
                    break;
                }

                message = inbound.recv() => {
                    match message {
                        Some(message) => self.process(message).await,
                        None => {
                            tracing::warn!("Inbound stream closed by the bus");
                            break;
                        }
                    }
                }
            }
        }
        tracing::info!("Dispatcher exiting");
    }

    async fn process(&self, message: BusMessage) {
        let envelope = match codec::decode(message.payload()) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding undecodable message");
                message.ack();
                return;
            }
        };

        match envelope {
            Envelope::Request {
                correlation_id,
                method_name,
                args,
                kwargs,
            } => {
                self.serve(correlation_id, &method_name, args, kwargs, message)
                    .await;
            }
            Envelope::Response {
                correlation_id,
                outcome,
            } => {
                if !self.table.complete(&correlation_id, outcome) {
                    tracing::debug!(
                        %correlation_id,
                        "No pending call for response (timed out or duplicate), discarding"
                    );
                }
                message.ack();
            }
        }
    }

    /// Execute a request and publish its response, then ack. A failed
    /// publish leaves the request unacked so the bus redelivers it.
    async fn serve(
        &self,
        correlation_id: CorrelationId,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        message: BusMessage,
    ) {
        let outcome = self.execute(method, args, kwargs).await;
        let reply = Envelope::response(correlation_id, outcome);
        let payload = match codec::encode(&reply) {
            Ok(payload) => payload,
            Err(e) => {
                // Redelivery would hit the same serialization failure.
                tracing::error!(%correlation_id, method, error = %e, "Failed to encode response, dropping");
                message.ack();
                return;
            }
        };

        match self.bus.publish(&self.peer_topic, payload).await {
            Ok(()) => {
                tracing::debug!(%correlation_id, method, "Response published");
                message.ack();
            }
            Err(e) => {
                tracing::error!(
                    %correlation_id,
                    method,
                    error = %e,
                    "Failed to publish response, leaving request unacked for redelivery"
                );
            }
        }
    }

    async fn execute(
        &self,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> ResponseOutcome {
        let Some(handler) = self.registry.lookup(method) else {
            tracing::warn!(method, "Request for unregistered method");
            return ResponseOutcome::Error(format!(
                "{METHOD_NOT_REGISTERED_MARKER}: no handler registered for '{method}'"
            ));
        };

        tracing::debug!(method, "Invoking handler");
        match handler.invoke(args, kwargs).await {
            Ok(result) => ResponseOutcome::Result(result),
            Err(e) => {
                let chain = format!("{e:#}");
                tracing::warn!(method, error = %chain, "Handler failed");
                ResponseOutcome::Error(chain)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::envelope::CallArgs;
    use crate::registry::handler_fn;
    use serde_json::json;

    struct Fixture {
        bus: Arc<InMemoryBus>,
        dispatcher: Dispatcher,
        inbound: mpsc::UnboundedReceiver<BusMessage>,
        reply_rx: mpsc::UnboundedReceiver<BusMessage>,
    }

    /// Dispatcher consuming "inbox", replying to "peer".
    async fn fixture() -> Fixture {
        let bus = Arc::new(InMemoryBus::new());
        bus.create_subscription("inbox-sub", "inbox").await.unwrap();
        bus.create_subscription("peer-sub", "peer").await.unwrap();
        let inbound = bus.subscribe("inbox-sub").await.unwrap();
        let reply_rx = bus.subscribe("peer-sub").await.unwrap();

        let registry = Arc::new(MethodRegistry::new());
        registry
            .register(
                "echo",
                Arc::new(handler_fn(|args, _kwargs| async move {
                    Ok(args.into_iter().next().unwrap_or(Value::Null))
                })),
            )
            .unwrap();

        let dispatcher = Dispatcher::new(
            Arc::clone(&bus) as Arc<dyn MessageBus>,
            registry,
            Arc::new(CorrelationTable::new()),
            "peer".to_string(),
        );

        Fixture {
            bus,
            dispatcher,
            inbound,
            reply_rx,
        }
    }

    #[tokio::test]
    async fn request_is_served_and_acked() {
        let mut fx = fixture().await;
        let id = CorrelationId::new();
        let request = codec::encode(&Envelope::request(id, "echo", CallArgs::new().arg(7))).unwrap();
        fx.bus.publish("inbox", request).await.unwrap();

        let message = fx.inbound.recv().await.unwrap();
        fx.dispatcher.process(message).await;

        let reply = fx.reply_rx.recv().await.unwrap();
        let envelope = codec::decode(reply.payload()).unwrap();
        assert_eq!(
            envelope,
            Envelope::response(id, ResponseOutcome::Result(json!(7)))
        );
        assert_eq!(fx.bus.acked("inbox-sub"), 1);
    }

    #[tokio::test]
    async fn unregistered_method_yields_marked_error_response() {
        let mut fx = fixture().await;
        let id = CorrelationId::new();
        let request = codec::encode(&Envelope::request(id, "missing", CallArgs::new())).unwrap();
        fx.bus.publish("inbox", request).await.unwrap();

        let message = fx.inbound.recv().await.unwrap();
        fx.dispatcher.process(message).await;

        let reply = fx.reply_rx.recv().await.unwrap();
        match codec::decode(reply.payload()).unwrap() {
            Envelope::Response { outcome: ResponseOutcome::Error(message), .. } => {
                assert!(message.starts_with(METHOD_NOT_REGISTERED_MARKER));
                assert!(message.contains("missing"));
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_message_is_acked_and_dropped() {
        let mut fx = fixture().await;
        fx.bus.publish("inbox", b"{not json".to_vec()).await.unwrap();
        fx.bus.publish("inbox", Vec::new()).await.unwrap();

        for _ in 0..2 {
            let message = fx.inbound.recv().await.unwrap();
            fx.dispatcher.process(message).await;
        }

        assert_eq!(fx.bus.acked("inbox-sub"), 2);
        // Nothing was published in reply.
        assert!(fx.reply_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn response_with_no_pending_call_is_discarded() {
        let mut fx = fixture().await;
        let stray =
            codec::encode(&Envelope::response(CorrelationId::new(), ResponseOutcome::Result(json!(1))))
                .unwrap();
        fx.bus.publish("inbox", stray).await.unwrap();

        let message = fx.inbound.recv().await.unwrap();
        fx.dispatcher.process(message).await;

        assert_eq!(fx.bus.acked("inbox-sub"), 1);
    }
}
