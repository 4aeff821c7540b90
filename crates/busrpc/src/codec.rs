//! Envelope codec: UTF-8 JSON bytes on the bus.
//!
//! The bus delivers whole messages, so there is no framing layer — encoding
//! is a straight serde_json round trip with typed failure reporting.

use crate::envelope::Envelope;

/// A payload that could not be decoded into an [`Envelope`].
///
/// Decode failures are per-message: the dispatcher logs, acks, and moves on.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The bus delivered a message with no payload at all.
    #[error("empty message payload")]
    Empty,

    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
#[error("failed to encode envelope: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, EncodeError> {
    let json = serde_json::to_vec(envelope)?;
    let json_len = json.len();
    tracing::trace!(json_size_bytes = json_len, "Encoding envelope");
    if json_len > 100_000 {
        tracing::info!(
            json_size_bytes = json_len,
            json_size_kb = json_len / 1024,
            "Large envelope being encoded"
        );
    }
    Ok(json)
}

pub fn decode(payload: &[u8]) -> Result<Envelope, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{CallArgs, CorrelationId, ResponseOutcome};
    use serde_json::json;

    #[test]
    fn roundtrip_request() {
        let env = Envelope::request(
            CorrelationId::new(),
            "echo",
            CallArgs::new().arg(42),
        );
        let bytes = encode(&env).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn roundtrip_response() {
        let env = Envelope::response(
            CorrelationId::new(),
            ResponseOutcome::Result(json!({"labels": ["a", "b"]})),
        );
        let bytes = encode(&env).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn empty_payload_is_distinct_error() {
        assert!(matches!(decode(b""), Err(DecodeError::Empty)));
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert!(matches!(decode(b"{not json"), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn unknown_kind_is_malformed() {
        let payload = serde_json::to_vec(&json!({
            "kind": "NOTIFY",
            "correlation_id": "550e8400-e29b-41d4-a716-446655440000",
        }))
        .unwrap();
        assert!(matches!(decode(&payload), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn missing_correlation_id_is_malformed() {
        let payload = serde_json::to_vec(&json!({
            "kind": "REQUEST",
            "method_name": "echo",
        }))
        .unwrap();
        assert!(matches!(decode(&payload), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn response_without_outcome_is_malformed() {
        let payload = serde_json::to_vec(&json!({
            "kind": "RESPONSE",
            "correlation_id": "550e8400-e29b-41d4-a716-446655440000",
        }))
        .unwrap();
        assert!(matches!(decode(&payload), Err(DecodeError::Malformed(_))));
    }
}
