//! Caller-facing error taxonomy.
//!
//! Per-message failures inside the dispatch loop never surface here; they
//! are logged and isolated. These are the failures a caller can observe from
//! `call` and `start`. All three of `Remote`/`Timeout`/`BridgeClosed` are
//! safe to treat as retryable unless the specific method says otherwise.

use crate::bus::BusError;
use crate::codec::EncodeError;
use crate::envelope::{CorrelationId, METHOD_NOT_REGISTERED_MARKER};

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The remote process has no handler bound to this method name.
    #[error("method '{method}' is not registered on the remote side: {message}")]
    MethodNotRegistered { method: String, message: String },

    /// The remote handler executed and failed; carries its error text.
    #[error("remote execution of '{method}' failed: {message}")]
    Remote { method: String, message: String },

    #[error("call to '{method}' timed out (correlation id {correlation_id})")]
    Timeout {
        method: String,
        correlation_id: CorrelationId,
    },

    /// The bridge was stopped while (or before) this call was waiting.
    #[error("bridge is shut down")]
    BridgeClosed,

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("failed to publish request: {0}")]
    Bus(#[from] BusError),
}

impl CallError {
    /// Map the error text of an error RESPONSE back to a typed failure.
    pub(crate) fn from_remote(method: &str, message: String) -> Self {
        if message.starts_with(METHOD_NOT_REGISTERED_MARKER) {
            Self::MethodNotRegistered {
                method: method.to_string(),
                message,
            }
        } else {
            Self::Remote {
                method: method.to_string(),
                message,
            }
        }
    }
}

/// Resource-acquisition failures at `start()`. Fatal, unlike anything the
/// dispatch loop encounters afterwards.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("failed to create subscription: {0}")]
    Subscription(BusError),

    #[error("failed to open subscription stream: {0}")]
    Subscribe(BusError),

    /// The bridge was already stopped; a stopped bridge does not restart.
    #[error("bridge is shut down")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_prefix_maps_to_method_not_registered() {
        let err = CallError::from_remote(
            "missing",
            format!("{METHOD_NOT_REGISTERED_MARKER}: no handler registered for 'missing'"),
        );
        assert!(matches!(err, CallError::MethodNotRegistered { .. }));
    }

    #[test]
    fn plain_message_maps_to_remote() {
        let err = CallError::from_remote("boom", "ValueError: x".to_string());
        match err {
            CallError::Remote { method, message } => {
                assert_eq!(method, "boom");
                assert!(message.contains("x"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
