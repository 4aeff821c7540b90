//! busrpc: function-call semantics over fire-and-forget pub/sub messaging.
//!
//! Two independently deployed processes that share only an asynchronous,
//! at-least-once, unordered message bus get a blocking, correctly-correlated
//! request/response interface: invoke a named method with arguments, get its
//! result back, bounded by a timeout.
//!
//! # Architecture
//!
//! - **envelope / codec**: the wire format (kind-tagged JSON) and its
//!   encode/decode with per-message failure reporting
//! - **registry**: name → handler bindings served locally
//! - **correlation**: in-flight calls keyed by correlation id, each caller
//!   parked on its own release signal
//! - **dispatcher**: one background task consuming the inbox, executing
//!   handlers and resolving pending calls, one message at a time
//! - **bridge**: the public facade — `register`, `call`, `start`, `stop`
//! - **bus**: the transport seam the bridge is written against, plus an
//!   in-process implementation

mod bridge;
pub mod bus;
mod codec;
mod correlation;
mod dispatcher;
mod envelope;
mod error;
mod registry;

pub use bridge::{BridgeConfig, DEFAULT_CALL_TIMEOUT, MethodProxy, RpcBridge};
pub use codec::{DecodeError, EncodeError, decode, encode};
pub use envelope::{
    CallArgs, CorrelationId, Envelope, METHOD_NOT_REGISTERED_MARKER, ResponseOutcome,
};
pub use error::{CallError, StartError};
pub use registry::{DuplicateMethodError, FnHandler, MethodHandler, handler_fn};
