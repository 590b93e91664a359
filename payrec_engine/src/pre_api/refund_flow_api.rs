use std::{fmt::Debug, sync::Arc};

use chrono::Duration;
use log::*;
use serde::Serialize;

use crate::{
    db_types::{NewRefundRequest, Payment, Refund, RefundStatus},
    events::{
        EventBus,
        EventEnvelope,
        OrderEventInfo,
        PaymentEventInfo,
        RefundEventInfo,
        TOPIC_ORDER_CANCELLED,
        TOPIC_PAYMENT_FAILED,
        TOPIC_PAYMENT_SUCCEEDED,
        TOPIC_REFUND_CANCELLED,
        TOPIC_REFUND_FAILED,
        TOPIC_REFUND_INITIATED,
        TOPIC_REFUND_STATUS_UPDATED,
    },
    helpers::refund_idempotency_key,
    traits::{
        CallbackOutcome,
        GatewayError,
        GatewayRefundState,
        LedgerDatabase,
        LedgerError,
        PaymentConfirmation,
        PaymentNotice,
        PaymentUpdate,
        ReconcileReport,
        RefundGateway,
        RefundNotice,
        RefundSubmission,
        RefundTarget,
    },
};

/// The default ceiling on retry attempts per refund. A refund that has failed this many times after its
/// initial attempt stays `FAILED` for good.
pub const DEFAULT_MAX_REFUND_RETRIES: i64 = 3;

/// The `source` stamped on every event this module publishes.
const EVENT_SOURCE: &str = "payrec-engine";

/// `RefundFlowApi` is the primary API for driving refunds through their lifecycle: durable recording, gateway
/// submission, webhook-reported transitions, cancellation and retries, and the reconciliation sweep that
/// resolves refunds the gateway went quiet on.
///
/// The ledger commit always comes first. Domain events are published only after the database transaction is
/// through, so a subscriber can never observe an event for a state that got rolled back. The price is the
/// usual one: if the process dies between commit and publish, the event is lost, and downstream consumers
/// must treat the ledger as the source of truth.
pub struct RefundFlowApi<B, G> {
    db: B,
    gateway: G,
    bus: Arc<dyn EventBus>,
    max_retries: i64,
}

impl<B, G> Debug for RefundFlowApi<B, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RefundFlowApi")
    }
}

impl<B, G> RefundFlowApi<B, G> {
    pub fn new(db: B, gateway: G, bus: Arc<dyn EventBus>) -> Self {
        Self { db, gateway, bus, max_retries: DEFAULT_MAX_REFUND_RETRIES }
    }

    pub fn with_max_retries(mut self, max_retries: i64) -> Self {
        self.max_retries = max_retries;
        self
    }
}

impl<B, G> RefundFlowApi<B, G>
where
    B: LedgerDatabase,
    G: RefundGateway,
{
    /// Creates a refund and submits it to the gateway.
    ///
    /// The request is validated and recorded as a `PENDING` refund in one transaction, which commits *before*
    /// the gateway is contacted. Whatever happens on the wire afterwards, the ledger knows the refund was
    /// attempted. The gateway's synchronous answer is then folded in:
    ///
    /// * an accepted submission stores the gateway's reference, moves the refund along, and publishes
    ///   `refund.initiated`;
    /// * an outright rejection marks the refund `FAILED` and publishes `refund.failed`;
    /// * a timeout or transport failure leaves the refund `PENDING` untouched. The submission may or may not
    ///   have reached the gateway, and only the reconciliation sweep can tell which.
    ///
    /// The returned refund reflects the post-submission state, so callers see `FAILED` rejections without a
    /// second lookup.
    pub async fn create_refund(&self, req: NewRefundRequest) -> Result<Refund, LedgerError> {
        let correlation_id = req.correlation_id.clone();
        let order_id = req.order_id;
        let (refund, payment) = self.db.create_pending_refund(req).await?;
        debug!(
            "🔄️💸️ Refund #{} of {} {} recorded for order #{order_id}. Submitting to the gateway",
            refund.id, refund.amount, refund.currency
        );
        self.submit_to_gateway(refund, &payment, correlation_id.as_deref()).await
    }

    /// Re-submits a `FAILED` refund, reusing the same ledger record and the same idempotency key.
    ///
    /// The refund moves back to `PENDING` (incrementing its retry count, with the headroom re-checked) and
    /// goes through the same submission path as [`create_refund`](Self::create_refund). `requested_by` names
    /// whoever asked for the retry and lands in the audit journal; the refund record keeps its original
    /// requester. Because the idempotency key is derived from the refund id and never changes, a retry of a
    /// submission that secretly succeeded earlier is collapsed by the gateway rather than refunded twice.
    pub async fn retry_failed_refund(&self, refund_id: i64, requested_by: &str) -> Result<Refund, LedgerError> {
        let (refund, payment) = self.db.prepare_retry(refund_id, self.max_retries, requested_by).await?;
        info!(
            "🔄️💸️ Refund #{refund_id} queued for retry attempt #{} by {requested_by}",
            refund.retry_count
        );
        self.submit_to_gateway(refund, &payment, None).await
    }

    /// Cancels a refund that the gateway has not accepted yet, and publishes `refund.cancelled`.
    pub async fn cancel_refund(&self, refund_id: i64, cancelled_by: &str) -> Result<Refund, LedgerError> {
        let refund = self.db.cancel_refund(refund_id, cancelled_by).await?;
        info!("🔄️❌️ Refund #{refund_id} cancelled by {cancelled_by}");
        self.publish_refund_event(TOPIC_REFUND_CANCELLED, &refund, None, None).await;
        Ok(refund)
    }

    /// Applies a webhook-reported refund transition to the ledger.
    ///
    /// `causation_id` is the id of the webhook event that carried the notice; it is stamped on any events
    /// published as a result. A duplicate notice (reporting the status the refund is already in) changes
    /// nothing and publishes nothing.
    pub async fn handle_refund_update(
        &self,
        notice: &RefundNotice,
        causation_id: Option<&str>,
    ) -> Result<CallbackOutcome, LedgerError> {
        let state = GatewayRefundState {
            reference: notice.gateway_refund_ref.clone(),
            status: notice.status,
            failure_reason: notice.failure_reason.clone(),
        };
        let target = RefundTarget::GatewayReference(notice.gateway_refund_ref.clone());
        let outcome = self.db.apply_gateway_transition(target, state).await?;
        if outcome.changed {
            debug!(
                "🔄️💸️ Refund #{} moved from {} to {} on the gateway's say-so",
                outcome.refund.id, outcome.previous, outcome.refund.status
            );
            self.publish_transition_events(&outcome, causation_id).await;
        }
        Ok(outcome)
    }

    /// Records a refund the gateway issued on its own (a `charge.refunded` with a reference the ledger has
    /// never seen).
    ///
    /// Returns `Ok(None)` when the notice cannot be recorded: the payment reference or amount is missing, the
    /// currency contradicts the payment's, or the amount does not fit the payment's remaining headroom. The
    /// reserved-amount invariant wins over mirroring the gateway; the mismatch is logged for a human.
    pub async fn record_external_refund(
        &self,
        notice: &RefundNotice,
        causation_id: Option<&str>,
    ) -> Result<Option<CallbackOutcome>, LedgerError> {
        let reference = notice.gateway_refund_ref.as_str();
        let (Some(payment_ref), Some(amount)) = (notice.gateway_payment_ref.as_deref(), notice.amount) else {
            warn!(
                "🔄️💸️ The gateway reports refund [{reference}] against an unknown ledger refund, but the notice \
                 does not identify a payment and amount. It cannot be recorded."
            );
            return Ok(None);
        };
        let outcome = self.db.record_gateway_refund(reference, payment_ref, amount, notice.currency.as_deref()).await?;
        if let Some(outcome) = &outcome {
            if outcome.changed {
                info!("🔄️💸️ Gateway-issued refund [{reference}] recorded as refund #{}", outcome.refund.id);
                self.publish_transition_events(outcome, causation_id).await;
            }
        }
        Ok(outcome)
    }

    /// Confirms a payment from a gateway notification and publishes `payment.succeeded` if anything changed.
    pub async fn record_payment_succeeded(
        &self,
        notice: PaymentNotice,
        causation_id: Option<&str>,
    ) -> Result<Option<PaymentConfirmation>, LedgerError> {
        let confirmation = self.db.confirm_payment(notice).await?;
        if let Some(confirmation) = &confirmation {
            if confirmation.changed {
                debug!(
                    "🔄️💰️ Payment [{}] confirmed; order #{} is {}",
                    confirmation.payment.gateway_payment_ref, confirmation.order.id, confirmation.order.status
                );
                let payload = PaymentEventInfo::from(&confirmation.payment);
                self.publish(TOPIC_PAYMENT_SUCCEEDED, &payload, None, causation_id).await;
            }
        }
        Ok(confirmation)
    }

    /// Marks a payment `FAILED` from a gateway notification and publishes `payment.failed` if anything
    /// changed.
    pub async fn record_payment_failed(
        &self,
        notice: &PaymentNotice,
        causation_id: Option<&str>,
    ) -> Result<Option<PaymentUpdate>, LedgerError> {
        let update = self.db.fail_payment(&notice.gateway_payment_ref, notice.failure_reason.clone()).await?;
        if let Some(update) = &update {
            if update.changed {
                let mut payload = PaymentEventInfo::from(&update.payment);
                payload.failure_reason = notice.failure_reason.clone();
                self.publish(TOPIC_PAYMENT_FAILED, &payload, None, causation_id).await;
            }
        }
        Ok(update)
    }

    /// Voids a payment from a gateway cancellation notice. If the void leaves the order unpaid, the order is
    /// cancelled and `order.cancelled` is published.
    pub async fn record_payment_cancelled(
        &self,
        notice: &PaymentNotice,
        causation_id: Option<&str>,
    ) -> Result<Option<PaymentUpdate>, LedgerError> {
        let update = self.db.void_payment(&notice.gateway_payment_ref).await?;
        if let Some(update) = &update {
            if let Some(order) = &update.order {
                let payload = OrderEventInfo::from(order);
                self.publish(TOPIC_ORDER_CANCELLED, &payload, None, causation_id).await;
            }
        }
        Ok(update)
    }

    /// Sweeps refunds that have sat in `PENDING` or `PROCESSING` past `stale_after` and resolves each against
    /// the gateway.
    ///
    /// A refund with a gateway reference is polled directly. A refund without one never got a synchronous
    /// answer, so the sweep looks its idempotency key up at the gateway instead:
    ///
    /// * the gateway knows the key: the submission did arrive. The gateway's reference and current status are
    ///   adopted as if the original call had returned them.
    /// * the gateway does not know the key: the submission provably never arrived. The refund is marked
    ///   `FAILED` (releasing its reserved amount) and becomes eligible for retry.
    ///
    /// Gateway errors during the sweep leave the refund as it was and are counted in the report; the next
    /// sweep picks it up again.
    pub async fn reconcile_stale_refunds(&self, stale_after: Duration) -> Result<ReconcileReport, LedgerError> {
        let stale = self.db.fetch_stale_refunds(stale_after).await?;
        let mut report = ReconcileReport::default();
        for refund in stale {
            report.examined += 1;
            match self.reconcile_one(&refund).await {
                Ok(Some(updated)) => {
                    report.updated += 1;
                    if updated.status == RefundStatus::Failed {
                        report.marked_failed += 1;
                    }
                },
                Ok(None) => {},
                Err(e) => {
                    error!("🔄️🧹️ Could not reconcile refund #{}: {e}", refund.id);
                    report.errors += 1;
                },
            }
        }
        if report.examined > 0 {
            info!("🔄️🧹️ Reconciliation sweep complete. {report}");
        } else {
            trace!("🔄️🧹️ Reconciliation sweep found no stale refunds");
        }
        Ok(report)
    }

    /// Resolves one stale refund against the gateway. Returns the refund when its status changed.
    async fn reconcile_one(&self, refund: &Refund) -> Result<Option<Refund>, LedgerError> {
        match &refund.gateway_refund_ref {
            Some(reference) => {
                let state = self.gateway.fetch_refund(reference).await?;
                let outcome = self.db.apply_gateway_transition(RefundTarget::Id(refund.id), state).await?;
                if outcome.changed {
                    debug!(
                        "🔄️🧹️ Stale refund #{} caught up with the gateway: {} to {}",
                        refund.id, outcome.previous, outcome.refund.status
                    );
                    self.publish_transition_events(&outcome, None).await;
                    Ok(Some(outcome.refund))
                } else {
                    trace!("🔄️🧹️ Stale refund #{} is still {} at the gateway", refund.id, refund.status);
                    Ok(None)
                }
            },
            None => {
                let key = refund_idempotency_key(refund.id);
                match self.gateway.find_refund_by_key(&key).await? {
                    Some(state) => {
                        info!(
                            "🔄️🧹️ Refund #{} did reach the gateway as [{}] even though the submission call \
                             never returned. Adopting it.",
                            refund.id, state.reference
                        );
                        let updated =
                            self.db.attach_gateway_result(refund.id, &state.reference, state.status).await?;
                        self.publish_refund_event(TOPIC_REFUND_INITIATED, &updated, None, None).await;
                        if updated.status == RefundStatus::Failed {
                            self.publish_refund_event(TOPIC_REFUND_FAILED, &updated, None, None).await;
                        }
                        Ok(Some(updated))
                    },
                    None => {
                        let failed = self
                            .db
                            .mark_refund_failed(refund.id, "The refund submission never reached the gateway")
                            .await?;
                        warn!("🔄️🧹️ Refund #{} never reached the gateway and is now marked as failed", refund.id);
                        self.publish_refund_event(TOPIC_REFUND_FAILED, &failed, None, None).await;
                        Ok(Some(failed))
                    },
                }
            },
        }
    }

    /// The shared submission path for new refunds and retries. The refund must already be `PENDING` in the
    /// ledger; its idempotency key is derived from its id and is therefore stable across retries.
    async fn submit_to_gateway(
        &self,
        refund: Refund,
        payment: &Payment,
        correlation_id: Option<&str>,
    ) -> Result<Refund, LedgerError> {
        let key = refund_idempotency_key(refund.id);
        let submission = RefundSubmission {
            payment_reference: payment.gateway_payment_ref.clone(),
            amount: refund.amount,
            currency: refund.currency.clone(),
            reason: Some(refund.reason.clone()),
            idempotency_key: key,
        };
        match self.gateway.submit_refund(submission).await {
            Ok(state) => {
                let updated = self.db.attach_gateway_result(refund.id, &state.reference, state.status).await?;
                info!(
                    "🔄️💸️ The gateway accepted refund #{} as [{}]; it is now {}",
                    updated.id, state.reference, updated.status
                );
                self.publish_refund_event(TOPIC_REFUND_INITIATED, &updated, correlation_id, None).await;
                if updated.status == RefundStatus::Failed {
                    self.publish_refund_event(TOPIC_REFUND_FAILED, &updated, correlation_id, None).await;
                }
                Ok(updated)
            },
            Err(GatewayError::Rejected { code, message }) => {
                let reason = format!("{code}: {message}");
                let failed = self.db.mark_refund_failed(refund.id, &reason).await?;
                warn!("🔄️💸️ The gateway rejected refund #{}: {reason}", failed.id);
                self.publish_refund_event(TOPIC_REFUND_FAILED, &failed, correlation_id, None).await;
                Ok(failed)
            },
            Err(e @ (GatewayError::Timeout | GatewayError::Transport(_) | GatewayError::UnexpectedResponse(_))) => {
                // No proof either way whether the submission landed. The refund stays Pending and keeps its
                // reservation until the reconciliation sweep settles the question via the idempotency key.
                warn!(
                    "🔄️💸️ No usable answer from the gateway for refund #{} ({e}). It stays Pending until \
                     reconciliation resolves it",
                    refund.id
                );
                Ok(refund)
            },
        }
    }

    /// Publishes the events for an applied refund transition: `refund.status-updated`, plus `refund.failed`
    /// when the transition landed on `FAILED`.
    async fn publish_transition_events(&self, outcome: &CallbackOutcome, causation_id: Option<&str>) {
        self.publish_refund_event(TOPIC_REFUND_STATUS_UPDATED, &outcome.refund, None, causation_id).await;
        if outcome.refund.status == RefundStatus::Failed {
            self.publish_refund_event(TOPIC_REFUND_FAILED, &outcome.refund, None, causation_id).await;
        }
    }

    async fn publish_refund_event(
        &self,
        topic: &str,
        refund: &Refund,
        correlation_id: Option<&str>,
        causation_id: Option<&str>,
    ) {
        let payload = RefundEventInfo::from(refund);
        self.publish(topic, &payload, correlation_id, causation_id).await;
    }

    /// Wraps a payload in an envelope and hands it to the bus. Publish failures are logged and swallowed: the
    /// ledger transaction this event describes has already committed, and un-committing it is not an option.
    async fn publish<T: Serialize>(
        &self,
        topic: &str,
        payload: &T,
        correlation_id: Option<&str>,
        causation_id: Option<&str>,
    ) {
        let mut event = EventEnvelope::new(topic, EVENT_SOURCE, payload);
        if let Some(id) = correlation_id {
            event = event.with_correlation_id(id);
        }
        if let Some(id) = causation_id {
            event = event.with_causation_id(id);
        }
        if let Err(e) = self.bus.publish(event).await {
            error!("🔄️📬️ Could not deliver the {topic} event: {e}");
        }
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut B {
        &mut self.db
    }

    pub fn bus(&self) -> Arc<dyn EventBus> {
        Arc::clone(&self.bus)
    }
}
