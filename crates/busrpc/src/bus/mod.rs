//! Bus capability contract.
//!
//! The bridge assumes an asynchronous, at-least-once, unordered pub/sub
//! transport and is written against this trait rather than any vendor
//! client. Topic/subscription administration beyond idempotent creation,
//! acknowledgement deadlines, and redelivery policy all belong to the
//! implementation behind the seam.

mod memory;

pub use memory::InMemoryBus;

use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("subscription '{0}' does not exist")]
    UnknownSubscription(String),

    /// The subscription's message stream has already been handed out.
    #[error("subscription '{0}' is already being consumed")]
    SubscriptionBusy(String),

    /// `create_subscription` named an existing subscription bound to a
    /// different topic. "Already exists on the same topic" is not an error.
    #[error("subscription '{subscription}' is already bound to topic '{topic}'")]
    SubscriptionConflict { subscription: String, topic: String },

    #[error("bus connection closed")]
    Closed,
}

/// A delivered message: payload bytes plus a single-use acknowledgement.
///
/// A message that is never acked is eligible for redelivery by the bus.
pub struct BusMessage {
    payload: Vec<u8>,
    acker: Option<Box<dyn FnOnce() + Send>>,
}

impl BusMessage {
    pub fn new(payload: Vec<u8>, acker: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            payload,
            acker: Some(acker),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Mark the message consumed. Consumes the message; the bus will not
    /// redeliver it.
    pub fn ack(mut self) {
        if let Some(acker) = self.acker.take() {
            acker();
        }
    }
}

impl std::fmt::Debug for BusMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusMessage")
            .field("payload_len", &self.payload.len())
            .field("acked", &self.acker.is_none())
            .finish()
    }
}

/// The pub/sub operations the bridge requires of its transport.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Create `subscription` on `topic`. Idempotent: an existing
    /// subscription on the same topic is not an error.
    async fn create_subscription(&self, subscription: &str, topic: &str) -> Result<(), BusError>;

    /// Publish `payload` to every subscription on `topic`.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Begin consuming `subscription`, yielding each delivered message.
    /// At-least-once and unordered: consumers must tolerate duplicates.
    async fn subscribe(
        &self,
        subscription: &str,
    ) -> Result<mpsc::UnboundedReceiver<BusMessage>, BusError>;
}
