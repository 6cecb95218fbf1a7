//! Request/response correlation
//!
//! Issues request ids and owns the table of outstanding calls. Every entry
//! is removed exactly once: by its response, by its timer, or by a flush
//! when the child that should answer it is gone.

use crate::bridge::error::BridgeError;
use crate::rpc::message::RequestId;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Outcome delivered to the caller of a request
pub type RequestOutcome = Result<Value, BridgeError>;

/// One outstanding request
#[derive(Debug)]
pub struct PendingRequest {
    /// Method name, kept for timeouts and diagnostics
    pub method: String,

    /// Child generation the request was written to
    pub generation: u64,

    responder: oneshot::Sender<RequestOutcome>,

    /// Timeout task, aborted when the request settles first
    timer: Option<JoinHandle<()>>,
}

impl PendingRequest {
    fn complete(self, outcome: RequestOutcome) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        // Caller may have stopped waiting; nothing to do then
        let _ = self.responder.send(outcome);
    }
}

/// Pending request table with a monotonic id counter
///
/// The counter continues across child generations so ids are never reused
/// for the lifetime of a bridge.
#[derive(Debug)]
pub struct RequestCorrelator {
    next_id: RequestId,
    pending: HashMap<RequestId, PendingRequest>,
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Allocate the next request id
    pub fn next_id(&mut self) -> RequestId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Track a request and hand back the receiver its caller waits on
    pub fn register(
        &mut self,
        id: RequestId,
        method: impl Into<String>,
        generation: u64,
        timer: Option<JoinHandle<()>>,
    ) -> oneshot::Receiver<RequestOutcome> {
        let (responder, receiver) = oneshot::channel();
        let method = method.into();
        trace!("Correlator: registered request {} ({})", id, method);
        self.pending.insert(
            id,
            PendingRequest {
                method,
                generation,
                responder,
                timer,
            },
        );
        receiver
    }

    /// Deliver the outcome for `id`
    ///
    /// Returns false when no such request is pending (already timed out,
    /// flushed, or never issued).
    pub fn settle(&mut self, id: RequestId, outcome: RequestOutcome) -> bool {
        match self.pending.remove(&id) {
            Some(pending) => {
                trace!("Correlator: settled request {} ({})", id, pending.method);
                pending.complete(outcome);
                true
            }
            None => {
                debug!("Correlator: dropping response for unknown request id {}", id);
                false
            }
        }
    }

    /// Remove `id` on behalf of its own timer and fail it
    ///
    /// Returns the method name when the request was still pending.
    pub fn expire(&mut self, id: RequestId, error: BridgeError) -> Option<String> {
        let mut pending = self.pending.remove(&id)?;
        // Called from inside the timer task itself
        pending.timer.take();
        let method = pending.method.clone();
        pending.complete(Err(error));
        Some(method)
    }

    /// Fail every request that was written to `generation`
    pub fn flush_generation(&mut self, generation: u64, error: &BridgeError) -> usize {
        let ids: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.generation == generation)
            .map(|(id, _)| *id)
            .collect();

        for id in &ids {
            if let Some(pending) = self.pending.remove(id) {
                pending.complete(Err(error.clone()));
            }
        }

        if !ids.is_empty() {
            debug!(
                "Correlator: flushed {} pending requests of generation {}: {}",
                ids.len(),
                generation,
                error
            );
        }
        ids.len()
    }

    /// Fail every pending request
    pub fn flush_all(&mut self, error: &BridgeError) -> usize {
        let count = self.pending.len();
        for (_, pending) in self.pending.drain() {
            pending.complete(Err(error.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_ids_are_monotonic() {
        let mut correlator = RequestCorrelator::new();
        let ids: Vec<_> = (0..5).map(|_| correlator.next_id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_out_of_order_settlement() {
        let mut correlator = RequestCorrelator::new();
        let receivers: Vec<_> = (0..3)
            .map(|_| {
                let id = correlator.next_id();
                (id, correlator.register(id, "m", 1, None))
            })
            .collect();

        assert!(correlator.settle(3, Ok(json!("three"))));
        assert!(correlator.settle(1, Ok(json!("one"))));
        assert!(correlator.settle(2, Ok(json!("two"))));
        assert!(correlator.is_empty());

        let mut results = Vec::new();
        for (id, receiver) in receivers {
            results.push((id, receiver.await.unwrap().unwrap()));
        }
        assert_eq!(
            results,
            vec![(1, json!("one")), (2, json!("two")), (3, json!("three"))]
        );
    }

    #[tokio::test]
    async fn test_settles_exactly_once() {
        let mut correlator = RequestCorrelator::new();
        let id = correlator.next_id();
        let receiver = correlator.register(id, "m", 1, None);

        assert!(correlator.settle(id, Ok(json!(1))));
        assert!(!correlator.settle(id, Ok(json!(2))));
        assert!(correlator.expire(id, BridgeError::NotRunning).is_none());
        assert_eq!(correlator.flush_all(&BridgeError::Disposed), 0);

        assert_eq!(receiver.await.unwrap().unwrap(), json!(1));
    }

    #[tokio::test]
    async fn test_settle_aborts_timer() {
        let mut correlator = RequestCorrelator::new();
        let id = correlator.next_id();
        let timer = tokio::spawn(tokio::time::sleep(Duration::from_secs(60)));
        let handle = timer.abort_handle();
        let _receiver = correlator.register(id, "m", 1, Some(timer));

        correlator.settle(id, Ok(Value::Null));
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_expire_reports_method() {
        let mut correlator = RequestCorrelator::new();
        let id = correlator.next_id();
        let receiver = correlator.register(id, "thread/start", 1, None);

        let error = BridgeError::Timeout {
            method: "thread/start".to_string(),
            timeout: Duration::from_millis(5),
        };
        assert_eq!(
            correlator.expire(id, error).as_deref(),
            Some("thread/start")
        );
        assert!(matches!(
            receiver.await.unwrap(),
            Err(BridgeError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_flush_generation_only_touches_that_generation() {
        let mut correlator = RequestCorrelator::new();
        let old: Vec<_> = (0..3)
            .map(|_| {
                let id = correlator.next_id();
                correlator.register(id, "m", 1, None)
            })
            .collect();
        let id = correlator.next_id();
        let current = correlator.register(id, "m", 2, None);

        let error = BridgeError::Exited {
            reason: "exited:code=1:signal=none".to_string(),
        };
        assert_eq!(correlator.flush_generation(1, &error), 3);
        assert_eq!(correlator.len(), 1);

        for receiver in old {
            assert!(matches!(
                receiver.await.unwrap(),
                Err(BridgeError::Exited { .. })
            ));
        }

        assert!(correlator.settle(id, Ok(json!("fresh"))));
        assert_eq!(current.await.unwrap().unwrap(), json!("fresh"));
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_break_settlement() {
        let mut correlator = RequestCorrelator::new();
        let id = correlator.next_id();
        drop(correlator.register(id, "m", 1, None));
        assert!(correlator.settle(id, Ok(Value::Null)));
    }
}
