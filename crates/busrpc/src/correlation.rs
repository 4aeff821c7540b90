//! Correlation table: in-flight calls awaiting their responses.
//!
//! Each caller parks on its own release signal, keyed by correlation id —
//! never on a shared queue — so no caller can consume another caller's
//! response. The entry is removed exactly once: by the dispatcher on
//! response arrival, by the caller on timeout, or by `close()` on shutdown.
//! Whichever removal races first decides the call; the loser is a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::envelope::{CorrelationId, ResponseOutcome};

/// How a pending call was released.
#[derive(Debug)]
pub(crate) enum CallOutcome {
    /// The matching RESPONSE arrived.
    Resolved(ResponseOutcome),
    /// The bridge shut down before a response arrived.
    Closed,
}

/// The table refused a new entry because the bridge is shut down.
#[derive(Debug)]
pub(crate) struct TableClosed;

struct PendingCall {
    method: String,
    deadline: Instant,
    release: oneshot::Sender<CallOutcome>,
}

pub(crate) struct CorrelationTable {
    calls: DashMap<CorrelationId, PendingCall>,
    closed: AtomicBool,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self {
            calls: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Insert a pending call, returning the receiver the caller waits on.
    pub fn register(
        &self,
        id: CorrelationId,
        method: &str,
        deadline: Instant,
    ) -> Result<oneshot::Receiver<CallOutcome>, TableClosed> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TableClosed);
        }

        let (release, receiver) = oneshot::channel();
        self.calls.insert(
            id,
            PendingCall {
                method: method.to_string(),
                deadline,
                release,
            },
        );

        // close() may have drained between the first check and the insert;
        // re-check so no entry outlives shutdown.
        if self.closed.load(Ordering::Acquire) {
            self.calls.remove(&id);
            return Err(TableClosed);
        }
        Ok(receiver)
    }

    /// Fill a pending call's result slot and signal its release.
    ///
    /// Returns false when no matching entry exists (timed out, duplicate
    /// response, or a call issued by some other process).
    pub fn complete(&self, id: &CorrelationId, outcome: ResponseOutcome) -> bool {
        let Some((_, call)) = self.calls.remove(id) else {
            return false;
        };
        if Instant::now() > call.deadline {
            tracing::debug!(
                correlation_id = %id,
                method = %call.method,
                "Response arrived past the call deadline"
            );
        }
        if call.release.send(CallOutcome::Resolved(outcome)).is_err() {
            tracing::debug!(correlation_id = %id, "Pending call receiver dropped before release");
        }
        true
    }

    /// Drop a pending call without releasing it (the caller's timeout path).
    ///
    /// Returns false when the entry is already gone, meaning the dispatcher
    /// won the race and the outcome is in flight on the caller's receiver.
    pub fn forget(&self, id: &CorrelationId) -> bool {
        self.calls.remove(id).is_some()
    }

    /// Refuse new entries and release every blocked caller.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let ids: Vec<CorrelationId> = self.calls.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, call)) = self.calls.remove(&id) {
                tracing::debug!(
                    correlation_id = %id,
                    method = %call.method,
                    "Releasing pending call on shutdown"
                );
                let _ = call.release.send(CallOutcome::Closed);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }
}
