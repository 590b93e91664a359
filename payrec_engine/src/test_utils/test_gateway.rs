//! A scriptable, in-memory stand-in for the payment gateway.
//!
//! By default every submission is accepted with a fresh `re_{n}` reference in the `pending` state. Tests can
//! queue per-call scripts to exercise rejections, timeouts, and the lost-response case where the gateway
//! registered the refund but the caller never heard back.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::traits::{GatewayError, GatewayRefundState, GatewayRefundStatus, RefundGateway, RefundSubmission};

/// What the gateway should do with the next submission. Scripts are consumed in FIFO order; when the queue is
/// empty the default is `Accept(Pending)`.
#[derive(Debug, Clone)]
pub enum SubmitScript {
    /// Register the refund and answer with the given status.
    Accept(GatewayRefundStatus),
    /// Refuse the submission outright. Nothing is registered.
    Reject { code: String, message: String },
    /// The submission never reaches the gateway. Nothing is registered.
    Timeout,
    /// The gateway registers the refund under the idempotency key, but the response is lost. Reconciliation
    /// can find it again via [`RefundGateway::find_refund_by_key`].
    TimeoutAfterAccept(GatewayRefundStatus),
}

#[derive(Debug, Default)]
struct GatewayState {
    submissions: Vec<RefundSubmission>,
    scripts: Vec<SubmitScript>,
    /// Registered refunds by gateway reference.
    refunds: HashMap<String, GatewayRefundState>,
    /// Idempotency key to gateway reference.
    keys: HashMap<String, String>,
    counter: u64,
}

#[derive(Clone, Debug, Default)]
pub struct TestGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl TestGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap()
    }

    /// Queues a script for the next unscripted submission.
    pub fn script_next(&self, script: SubmitScript) {
        self.lock().scripts.push(script);
    }

    /// Overwrites the status of a registered refund, as if the gateway had progressed it. Panics if the
    /// reference is unknown.
    pub fn set_refund_status(&self, reference: &str, status: GatewayRefundStatus, failure_reason: Option<&str>) {
        let mut state = self.lock();
        let refund = state.refunds.get_mut(reference).expect("unknown gateway refund reference");
        refund.status = status;
        refund.failure_reason = failure_reason.map(String::from);
    }

    /// Every submission the gateway has seen, in order, including rejected ones.
    pub fn submissions(&self) -> Vec<RefundSubmission> {
        self.lock().submissions.clone()
    }

    fn register(state: &mut GatewayState, key: &str, status: GatewayRefundStatus) -> GatewayRefundState {
        state.counter += 1;
        let reference = format!("re_{}", state.counter);
        let refund = GatewayRefundState { reference: reference.clone(), status, failure_reason: None };
        state.refunds.insert(reference.clone(), refund.clone());
        state.keys.insert(key.to_string(), reference);
        refund
    }
}

impl RefundGateway for TestGateway {
    async fn submit_refund(&self, submission: RefundSubmission) -> Result<GatewayRefundState, GatewayError> {
        let mut state = self.lock();
        // Idempotent replays return the refund registered for the key, whatever the current script says.
        if let Some(reference) = state.keys.get(&submission.idempotency_key).cloned() {
            state.submissions.push(submission);
            let refund = state.refunds.get(&reference).cloned();
            return refund.ok_or_else(|| GatewayError::UnexpectedResponse(format!("No refund [{reference}]")));
        }
        let script = if state.scripts.is_empty() {
            SubmitScript::Accept(GatewayRefundStatus::Pending)
        } else {
            state.scripts.remove(0)
        };
        match script {
            SubmitScript::Accept(status) => {
                let refund = Self::register(&mut state, &submission.idempotency_key, status);
                state.submissions.push(submission);
                Ok(refund)
            },
            SubmitScript::Reject { code, message } => {
                state.submissions.push(submission);
                Err(GatewayError::Rejected { code, message })
            },
            SubmitScript::Timeout => Err(GatewayError::Timeout),
            SubmitScript::TimeoutAfterAccept(status) => {
                Self::register(&mut state, &submission.idempotency_key, status);
                state.submissions.push(submission);
                Err(GatewayError::Timeout)
            },
        }
    }

    async fn fetch_refund(&self, reference: &str) -> Result<GatewayRefundState, GatewayError> {
        self.lock()
            .refunds
            .get(reference)
            .cloned()
            .ok_or_else(|| GatewayError::UnexpectedResponse(format!("No refund [{reference}]")))
    }

    async fn find_refund_by_key(&self, idempotency_key: &str) -> Result<Option<GatewayRefundState>, GatewayError> {
        let state = self.lock();
        let refund = state.keys.get(idempotency_key).and_then(|r| state.refunds.get(r)).cloned();
        Ok(refund)
    }
}
