//! Registry of in-flight method calls, keyed by call id.
//!
//! Owned by the dispatcher task, so no locking is involved. Every entry is
//! resolved exactly once: by its `result`, by cancellation, or by
//! [`PendingCalls::fail_all`] when the session ends.

use crate::{error::LinkError, error::Result, models::MethodError};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::oneshot;

pub(crate) type CallReply = oneshot::Sender<Result<JsonValue>>;

struct PendingCall {
    method: String,
    started: Instant,
    reply: CallReply,
}

#[derive(Default)]
pub(crate) struct PendingCalls {
    calls: HashMap<String, PendingCall>,
}

impl PendingCalls {
    /// Register a call. A duplicate id is answered with `IllegalState`
    /// immediately and not registered.
    pub fn insert(&mut self, id: String, method: String, reply: CallReply) -> bool {
        if self.calls.contains_key(&id) {
            let _ = reply.send(Err(LinkError::IllegalState(format!(
                "Call id '{}' is already pending",
                id
            ))));
            return false;
        }
        self.calls.insert(
            id,
            PendingCall {
                method,
                started: Instant::now(),
                reply,
            },
        );
        true
    }

    /// Deliver a `result` message to its caller.
    ///
    /// Returns `false` if no call with this id is pending (already cancelled
    /// or never issued).
    pub fn resolve(
        &mut self,
        id: &str,
        error: Option<MethodError>,
        result: Option<JsonValue>,
    ) -> bool {
        let Some(call) = self.calls.remove(id) else {
            return false;
        };
        log::debug!(
            "[truenas-link] Call '{}' ({}) completed in {:?}",
            id,
            call.method,
            call.started.elapsed()
        );
        let outcome = match error {
            Some(error) => Err(LinkError::MethodCall(error)),
            None => Ok(result.unwrap_or(JsonValue::Null)),
        };
        let _ = call.reply.send(outcome);
        true
    }

    /// Fail one call with `error`, e.g. when its `result` was undecodable.
    pub fn fail(&mut self, id: &str, error: LinkError) -> bool {
        let Some(call) = self.calls.remove(id) else {
            return false;
        };
        log::debug!("[truenas-link] Call '{}' ({}) failed: {}", id, call.method, error);
        let _ = call.reply.send(Err(error));
        true
    }

    /// Forget a call whose caller went away.
    pub fn cancel(&mut self, id: &str) -> bool {
        match self.calls.remove(id) {
            Some(call) => {
                log::debug!("[truenas-link] Call '{}' ({}) cancelled by caller", id, call.method);
                true
            },
            None => false,
        }
    }

    /// Fail every pending call with `error`. Returns how many were failed.
    pub fn fail_all(&mut self, error: &LinkError) -> usize {
        let count = self.calls.len();
        for (_, call) in self.calls.drain() {
            let _ = call.reply.send(Err(error.clone()));
        }
        count
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
