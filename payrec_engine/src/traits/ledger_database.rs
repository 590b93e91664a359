use chrono::Duration;
use payrec_common::MinorUnits;
use thiserror::Error;

use crate::{
    db_types::{NewOrder, NewPayment, NewRefundRequest, Order, Payment, Refund},
    traits::{
        CallbackOutcome,
        GatewayError,
        GatewayRefundState,
        GatewayRefundStatus,
        LedgerManagement,
        PaymentConfirmation,
        PaymentNotice,
        PaymentUpdate,
        RefundTarget,
    },
};

/// The `LedgerDatabase` trait defines the highest level of behaviour for storage backends of the reconciliation
/// engine.
///
/// The backend owns every state transition of the order-payment-refund ledger and is the sole enforcer of the
/// reserved-amount invariant: across all refunds of a payment, the sum of `PENDING`, `PROCESSING` and
/// `SUCCEEDED` amounts never exceeds the payment amount. Each mutating method runs in a single transaction so
/// that concurrent requests observe the invariant atomically.
///
/// The [`RefundFlowApi`](crate::RefundFlowApi) composes this trait with a [`RefundGateway`](crate::RefundGateway)
/// client to run the full submission lifecycle. Nothing in this trait talks to the gateway; it only records
/// what the flow and the webhooks tell it.
#[allow(async_fn_in_trait)]
pub trait LedgerDatabase: Clone + LedgerManagement {
    /// The database URL for the database instance.
    fn url(&self) -> &str;

    /// Inserts a new order in the `NEW` state.
    async fn insert_order(&self, order: NewOrder) -> Result<Order, LedgerError>;

    /// Inserts a new payment against an existing order.
    ///
    /// Returns [`LedgerError::OrderNotFound`] if the order does not exist, and [`LedgerError::Conflict`] if a
    /// payment with the same gateway reference is already recorded.
    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, LedgerError>;

    /// Validates a refund request and durably records it as `PENDING`, before anything is sent to the gateway.
    ///
    /// In one transaction, the backend:
    /// * loads the order and its settled payment,
    /// * checks eligibility (order in a refundable state, payment holding funds),
    /// * sums the amounts of refunds in `PENDING`, `PROCESSING` or `SUCCEEDED` against that payment, and
    /// * inserts the new `PENDING` row only if the requested amount fits in the remaining headroom.
    ///
    /// An omitted amount means "whatever remains refundable". Returns the new refund together with the payment
    /// it draws from, which the caller needs to build the gateway submission.
    ///
    /// # Errors
    /// * [`LedgerError::OrderNotFound`] if the order does not exist.
    /// * [`LedgerError::NotEligible`] if the order or payment state does not admit refunds.
    /// * [`LedgerError::AmountExceeded`] if the request does not fit in the remaining headroom.
    async fn create_pending_refund(&self, req: NewRefundRequest) -> Result<(Refund, Payment), LedgerError>;

    /// Records the gateway's synchronous answer to a refund submission against a `PENDING` refund.
    ///
    /// Stores the gateway's refund reference and moves the refund to the status mapped from `status`
    /// (see [`GatewayRefundStatus::as_refund_status`]). Settlement bookkeeping runs if the gateway already
    /// reports `succeeded`.
    async fn attach_gateway_result(
        &self,
        refund_id: i64,
        reference: &str,
        status: GatewayRefundStatus,
    ) -> Result<Refund, LedgerError>;

    /// Moves a refund to `FAILED` with the given reason, releasing its reserved amount.
    ///
    /// Used when the gateway rejects a submission outright, and by reconciliation when a submission provably
    /// never reached the gateway. A refund that is already terminal is left alone and returned as-is.
    async fn mark_refund_failed(&self, refund_id: i64, reason: &str) -> Result<Refund, LedgerError>;

    /// Cancels a refund that is still `PENDING`.
    ///
    /// # Errors
    /// * [`LedgerError::RefundNotFound`] if the refund does not exist.
    /// * [`LedgerError::Conflict`] if the refund has left `PENDING`. A refund that the gateway has accepted
    ///   can only be resolved by the gateway.
    async fn cancel_refund(&self, refund_id: i64, cancelled_by: &str) -> Result<Refund, LedgerError>;

    /// Moves a `FAILED` refund back to `PENDING` for another submission attempt, incrementing its retry count.
    ///
    /// The same refund record is reused; retrying never creates a new row. Headroom is re-checked, since other
    /// refunds may have consumed it while this one sat in `FAILED`. `requested_by` is recorded on the journal
    /// entry for the transition; the refund itself keeps its original requester. As with
    /// [`create_pending_refund`](Self::create_pending_refund), the payment comes back with the refund so the
    /// caller can rebuild the gateway submission.
    ///
    /// # Errors
    /// * [`LedgerError::RefundNotFound`] if the refund does not exist.
    /// * [`LedgerError::Conflict`] if the refund is not `FAILED`, or `max_retries` attempts are spent.
    /// * [`LedgerError::AmountExceeded`] if the amount no longer fits in the remaining headroom.
    async fn prepare_retry(
        &self,
        refund_id: i64,
        max_retries: i64,
        requested_by: &str,
    ) -> Result<(Refund, Payment), LedgerError>;

    /// Applies a gateway-reported status to a refund, addressed by ledger id or by gateway reference.
    ///
    /// Legal transitions are `PENDING → {PROCESSING, SUCCEEDED, FAILED, CANCELLED}`, `PROCESSING →
    /// {SUCCEEDED, FAILED}` and `FAILED → PENDING`. Reporting the status the refund is already in is not an
    /// error; the outcome comes back with `changed == false` and nothing else happens. A transition to
    /// `SUCCEEDED` also settles the refund: `settled_at` is stamped and the payment and order are recomputed
    /// to `PARTIALLY_REFUNDED`/`REFUNDED` as the totals dictate.
    ///
    /// # Errors
    /// * [`LedgerError::RefundNotFound`] / [`LedgerError::RefundReferenceUnknown`] if the target does not
    ///   resolve to a refund.
    /// * [`LedgerError::Conflict`] if the reported status is not reachable from the current one.
    async fn apply_gateway_transition(
        &self,
        target: RefundTarget,
        state: GatewayRefundState,
    ) -> Result<CallbackOutcome, LedgerError>;

    /// Records a refund that originated at the gateway itself and has no ledger row yet.
    ///
    /// The refund is inserted directly in `SUCCEEDED` against the payment with the given gateway reference,
    /// but only if the amount fits in the payment's remaining headroom and the currency (when given) matches
    /// the payment's. Returns `None` when it cannot be recorded; the caller decides whether that is worth an
    /// alert. The invariant is never broken to match the gateway.
    ///
    /// # Errors
    /// * [`LedgerError::PaymentNotFound`] if no payment carries `payment_ref`.
    async fn record_gateway_refund(
        &self,
        reference: &str,
        payment_ref: &str,
        amount: MinorUnits,
        currency: Option<&str>,
    ) -> Result<Option<CallbackOutcome>, LedgerError>;

    /// Confirms a payment from a gateway notification, marking it `SUCCEEDED` and its order `PAID`.
    ///
    /// If the ledger has no payment with the notice's gateway reference, the backend places one on the notice's
    /// order instead. Returns `None` when the payment cannot be placed at all (no matching payment and no
    /// usable order id); a confirmation that arrives twice comes back with `changed == false`.
    async fn confirm_payment(&self, notice: PaymentNotice) -> Result<Option<PaymentConfirmation>, LedgerError>;

    /// Marks the payment with the given gateway reference `FAILED`, recording the gateway's reason.
    ///
    /// Returns `None` if no such payment exists. Confirmed payments are not failed retroactively; the call
    /// comes back with `changed == false` and the payment untouched.
    async fn fail_payment(&self, payment_ref: &str, reason: Option<String>)
        -> Result<Option<PaymentUpdate>, LedgerError>;

    /// Voids the payment with the given gateway reference, cancelling its order if nothing else paid for it.
    ///
    /// Returns `None` if no such payment exists.
    async fn void_payment(&self, payment_ref: &str) -> Result<Option<PaymentUpdate>, LedgerError>;

    /// Fetches refunds that have sat in `PENDING` or `PROCESSING` for longer than `stale_after`, oldest first.
    async fn fetch_stale_refunds(&self, stale_after: Duration) -> Result<Vec<Refund>, LedgerError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), LedgerError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Order #{0} does not exist")]
    OrderNotFound(i64),
    #[error("Refund #{0} does not exist")]
    RefundNotFound(i64),
    #[error("No refund carries the gateway reference [{0}]")]
    RefundReferenceUnknown(String),
    #[error("No payment carries the gateway reference [{0}]")]
    PaymentNotFound(String),
    #[error("The refund request is not eligible: {0}")]
    NotEligible(String),
    #[error("Requested refund of {requested} exceeds the remaining refundable amount of {remaining}")]
    AmountExceeded { requested: MinorUnits, remaining: MinorUnits },
    #[error("Conflicting ledger state: {0}")]
    Conflict(String),
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::DatabaseError(e.to_string())
    }
}
