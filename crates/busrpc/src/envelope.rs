//! Wire types for request/response exchange over the bus.
//!
//! Both message roles share one channel per direction; the `kind` tag tells
//! them apart. A RESPONSE carries exactly one of `result`/`error` — the
//! exclusivity is enforced by [`ResponseOutcome`], not by convention.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Marker prefix on error strings produced for calls to unregistered methods.
///
/// The wire format carries only an error string, so the dispatcher labels
/// this class of failure and the caller side maps it back to a typed error.
pub const METHOD_NOT_REGISTERED_MARKER: &str = "MethodNotRegisteredError";

/// Unique identifier correlating a request with its eventual response.
///
/// UUID v4 keeps concurrent callers collision-free without any shared counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(uuid::Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        let uuid = uuid::Uuid::parse_str(s)?;
        Ok(Self(uuid))
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Positional and keyword arguments for a remote call.
///
/// Mirrors the `*args, **kwargs` calling convention of the wire format.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }
}

/// Disposition of a completed handler execution.
///
/// Serialized flattened into the RESPONSE envelope as either a `result` or an
/// `error` field, never both, never neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseOutcome {
    #[serde(rename = "result")]
    Result(Value),
    #[serde(rename = "error")]
    Error(String),
}

impl ResponseOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// The unit exchanged over the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Envelope {
    #[serde(rename = "REQUEST")]
    Request {
        correlation_id: CorrelationId,
        method_name: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        kwargs: Map<String, Value>,
    },

    #[serde(rename = "RESPONSE")]
    Response {
        correlation_id: CorrelationId,
        #[serde(flatten)]
        outcome: ResponseOutcome,
    },
}

impl Envelope {
    pub fn request(correlation_id: CorrelationId, method_name: impl Into<String>, args: CallArgs) -> Self {
        Self::Request {
            correlation_id,
            method_name: method_name.into(),
            args: args.args,
            kwargs: args.kwargs,
        }
    }

    pub fn response(correlation_id: CorrelationId, outcome: ResponseOutcome) -> Self {
        Self::Response {
            correlation_id,
            outcome,
        }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            Self::Request { correlation_id, .. } => *correlation_id,
            Self::Response { correlation_id, .. } => *correlation_id,
        }
    }
}
