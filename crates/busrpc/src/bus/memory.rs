//! In-process bus over Tokio channels.
//!
//! Backs every end-to-end test in this crate and suffices for single-process
//! deployments where two bridge halves share a runtime. Delivery is ordered
//! and exactly-once — the redelivery behavior of a real bus is simulated in
//! tests by publishing the same payload again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{BusError, BusMessage, MessageBus};

struct SubscriptionState {
    topic: String,
    sender: mpsc::UnboundedSender<BusMessage>,
    /// Taken by the first `subscribe` call.
    receiver: Option<mpsc::UnboundedReceiver<BusMessage>>,
    delivered: Arc<AtomicUsize>,
    acked: Arc<AtomicUsize>,
}

#[derive(Default)]
struct Inner {
    /// topic -> subscription names fanned out to on publish.
    topics: HashMap<String, Vec<String>>,
    subscriptions: HashMap<String, SubscriptionState>,
}

/// In-memory [`MessageBus`].
#[derive(Default)]
pub struct InMemoryBus {
    inner: Mutex<Inner>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages handed to `subscription` so far.
    pub fn delivered(&self, subscription: &str) -> usize {
        self.counter(subscription, |s| &s.delivered)
    }

    /// Messages `subscription`'s consumer has acknowledged so far.
    pub fn acked(&self, subscription: &str) -> usize {
        self.counter(subscription, |s| &s.acked)
    }

    fn counter(
        &self,
        subscription: &str,
        pick: impl Fn(&SubscriptionState) -> &Arc<AtomicUsize>,
    ) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .subscriptions
            .get(subscription)
            .map(|s| pick(s).load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn create_subscription(&self, subscription: &str, topic: &str) -> Result<(), BusError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = inner.subscriptions.get(subscription) {
            if existing.topic == topic {
                return Ok(());
            }
            return Err(BusError::SubscriptionConflict {
                subscription: subscription.to_string(),
                topic: existing.topic.clone(),
            });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        inner.subscriptions.insert(
            subscription.to_string(),
            SubscriptionState {
                topic: topic.to_string(),
                sender,
                receiver: Some(receiver),
                delivered: Arc::new(AtomicUsize::new(0)),
                acked: Arc::new(AtomicUsize::new(0)),
            },
        );
        inner
            .topics
            .entry(topic.to_string())
            .or_default()
            .push(subscription.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // A topic nobody subscribed to swallows the message, as pub/sub does.
        let Some(subscription_names) = inner.topics.get(topic) else {
            return Ok(());
        };

        for name in subscription_names {
            let Some(state) = inner.subscriptions.get(name) else {
                continue;
            };
            state.delivered.fetch_add(1, Ordering::SeqCst);
            let acked = Arc::clone(&state.acked);
            let message = BusMessage::new(
                payload.clone(),
                Box::new(move || {
                    acked.fetch_add(1, Ordering::SeqCst);
                }),
            );
            if state.sender.send(message).is_err() {
                tracing::debug!(subscription = %name, "Subscriber gone, dropping message");
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        subscription: &str,
    ) -> Result<mpsc::UnboundedReceiver<BusMessage>, BusError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let state = inner
            .subscriptions
            .get_mut(subscription)
            .ok_or_else(|| BusError::UnknownSubscription(subscription.to_string()))?;
        state
            .receiver
            .take()
            .ok_or_else(|| BusError::SubscriptionBusy(subscription.to_string()))
    }
}
