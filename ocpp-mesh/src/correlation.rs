//! Request/response correlation
//!
//! Every request this node originates is registered in a pending table keyed
//! by request id. The matching Response or error frame, the deadline or the
//! caller's cancellation signal resolves it exactly once; the entry leaves
//! the table in every case, including when the waiting future is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cancel::CancellationSignal;
use crate::frame::{ErrorFrame, Frame, RequestFrame, RequestId, ResponseFrame};
use crate::network::SourceRouting;
use crate::transport::{SentMessageResult, Transport};

/// How a correlated exchange ended
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Response(ResponseFrame),
    RequestError(ErrorFrame),
    ResponseError(ErrorFrame),
    Timeout,
    Canceled,
    TransportFailure(String),
    DuplicateRequestId,
}

/// Record of one correlated exchange
#[derive(Debug, Clone)]
pub struct SendRequestState {
    pub request_id: RequestId,
    pub destination: SourceRouting,
    pub sent_at: Instant,
    pub resolved_at: Instant,
    /// Transport result, when a send was attempted
    pub sent: Option<SentMessageResult>,
    pub outcome: RequestOutcome,
}

impl SendRequestState {
    pub fn runtime(&self) -> Duration {
        self.resolved_at.saturating_duration_since(self.sent_at)
    }
}

enum Completion {
    Response(ResponseFrame),
    RequestError(ErrorFrame),
    ResponseError(ErrorFrame),
}

struct PendingRequest {
    ticket: u64,
    action: String,
    destination: SourceRouting,
    sent_at: Instant,
    deadline: Instant,
    completion: oneshot::Sender<Completion>,
}

/// Pending-request table of one node
pub struct CorrelationEngine {
    transport: Arc<dyn Transport>,
    default_timeout: Duration,
    next_ticket: AtomicU64,
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
}

/// Removes a pending entry when the waiting future ends, however it ends
struct PendingGuard<'a> {
    engine: &'a CorrelationEngine,
    request_id: RequestId,
    ticket: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut pending = self.engine.pending.lock();
        // the id may already belong to a newer request
        if pending.get(&self.request_id).map(|p| p.ticket) == Some(self.ticket) {
            pending.remove(&self.request_id);
        }
    }
}

impl CorrelationEngine {
    pub fn new(transport: Arc<dyn Transport>, default_timeout: Duration) -> Self {
        Self {
            transport,
            default_timeout,
            next_ticket: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Send `frame` once and wait for its answer, the deadline or `cancel`
    pub async fn send_request_and_wait(
        &self,
        frame: RequestFrame,
        timeout: Option<Duration>,
        cancel: &CancellationSignal,
    ) -> SendRequestState {
        let sent_at = Instant::now();
        let deadline = sent_at + timeout.unwrap_or(self.default_timeout);
        let request_id = frame.request_id.clone();
        let destination = frame.destination.clone();

        let finish = |sent: Option<SentMessageResult>, outcome: RequestOutcome| SendRequestState {
            request_id: request_id.clone(),
            destination: destination.clone(),
            sent_at,
            resolved_at: Instant::now(),
            sent,
            outcome,
        };

        let (tx, rx) = oneshot::channel();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        {
            let mut pending = self.pending.lock();
            if pending.contains_key(&request_id) {
                warn!("Request id {} is already pending", request_id);
                return finish(None, RequestOutcome::DuplicateRequestId);
            }
            pending.insert(
                request_id.clone(),
                PendingRequest {
                    ticket,
                    action: frame.action.clone(),
                    destination: destination.clone(),
                    sent_at,
                    deadline,
                    completion: tx,
                },
            );
        }
        let guard = PendingGuard {
            engine: self,
            request_id: request_id.clone(),
            ticket,
        };

        if cancel.is_cancelled() {
            drop(guard);
            return finish(None, RequestOutcome::Canceled);
        }

        debug!("Sending {} request {} to {}", frame.action, request_id, destination);
        let sent = self.transport.send(&Frame::Request(frame)).await;
        if !sent.is_success() {
            drop(guard);
            let reason = sent.outcome.to_string();
            return finish(Some(sent), RequestOutcome::TransportFailure(reason));
        }

        // an answer accepted by `deliver` always wins
        let outcome = tokio::select! {
            biased;
            completion = rx => match completion {
                Ok(Completion::Response(frame)) => RequestOutcome::Response(frame),
                Ok(Completion::RequestError(frame)) => RequestOutcome::RequestError(frame),
                Ok(Completion::ResponseError(frame)) => RequestOutcome::ResponseError(frame),
                // only possible if the entry vanished without an answer
                Err(_) => RequestOutcome::Canceled,
            },
            _ = cancel.cancelled() => RequestOutcome::Canceled,
            _ = tokio::time::sleep_until(deadline) => RequestOutcome::Timeout,
        };
        drop(guard);

        if outcome == RequestOutcome::Timeout {
            debug!("Request {} timed out", request_id);
        }
        finish(Some(sent), outcome)
    }

    /// Hand a Response to its waiting request; `false` if nothing waits
    pub fn receive_response(&self, frame: ResponseFrame) -> bool {
        let request_id = frame.request_id.clone();
        self.deliver(&request_id, Completion::Response(frame))
    }

    pub fn receive_request_error(&self, frame: ErrorFrame) -> bool {
        let request_id = frame.request_id.clone();
        self.deliver(&request_id, Completion::RequestError(frame))
    }

    pub fn receive_response_error(&self, frame: ErrorFrame) -> bool {
        let request_id = frame.request_id.clone();
        self.deliver(&request_id, Completion::ResponseError(frame))
    }

    fn deliver(&self, request_id: &RequestId, completion: Completion) -> bool {
        let now = Instant::now();
        let entry = {
            let mut pending = self.pending.lock();
            match pending.get(request_id) {
                None => {
                    warn!("Discarding answer for unknown or resolved request {}", request_id);
                    return false;
                }
                // the waiter reports Timeout; its guard removes the entry
                Some(entry) if now >= entry.deadline => {
                    warn!("Discarding answer for {}: it arrived after the deadline", request_id);
                    return false;
                }
                Some(_) => {}
            }
            match pending.remove(request_id) {
                Some(entry) => entry,
                None => return false,
            }
        };

        debug!(
            "Resolved {} request {} from {} after {:?}",
            entry.action,
            request_id,
            entry.destination,
            now.saturating_duration_since(entry.sent_at)
        );

        if entry.completion.send(completion).is_err() {
            warn!("Request {} was abandoned before its answer arrived", request_id);
            return false;
        }
        true
    }

    pub fn is_pending(&self, request_id: &RequestId) -> bool {
        self.pending.lock().contains_key(request_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn pending_ids(&self) -> Vec<RequestId> {
        let mut ids: Vec<_> = self.pending.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}
