//! Exactly-once intake for gateway webhook events.
//!
//! The HTTP layer verifies the signature and converts the gateway's wire format into an [`InboundEvent`];
//! everything after that lives here. The router consults the [`IdempotencyStore`] before dispatching, so a
//! redelivered event acknowledges without running its handler again, and only marks an event processed after
//! its handler has committed. A handler failure therefore leaves the event unmarked, and the gateway's
//! redelivery loop gets another chance at it.

use std::{fmt::Debug, sync::Arc};

use chrono::Duration;
use log::*;

use crate::{
    pre_api::{errors::WebhookApiError, refund_flow_api::RefundFlowApi},
    traits::{DisputeNotice, IdempotencyStore, LedgerDatabase, LedgerError, PaymentNotice, RefundGateway, RefundNotice, WebhookDisposition},
};

/// How long processed-event markers are kept. Redeliveries arriving after this window would be dispatched
/// again, so it must comfortably exceed the gateway's redelivery horizon.
pub const DEFAULT_EVENT_TTL_SECS: i64 = 172_800;

/// A gateway webhook event after signature verification and payload conversion.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// The gateway's unique id for this event. Deduplication keys on it.
    pub event_id: String,
    /// Which gateway sent the event, e.g. `"stripe-like"`. Recorded alongside the dedup marker.
    pub gateway: String,
    /// The gateway's name for the event type, kept for logging and audit.
    pub event_type: String,
    pub kind: InboundEventKind,
}

/// The typed payload of an inbound event, dispatched on by the router.
#[derive(Debug, Clone)]
pub enum InboundEventKind {
    PaymentSucceeded(PaymentNotice),
    PaymentFailed(PaymentNotice),
    PaymentCancelled(PaymentNotice),
    /// A status change for a refund, in any direction the gateway supports.
    RefundUpdated(RefundNotice),
    /// A settled refund on a charge. Usually echoes a refund the ledger initiated; an unknown reference means
    /// the gateway issued it on its own.
    ChargeRefunded(RefundNotice),
    DisputeCreated(DisputeNotice),
    DisputeUpdated(DisputeNotice),
    /// An event type this service does not consume. Acknowledged for forward compatibility.
    Unknown,
}

/// Routes verified webhook events to the refund flow with deduplication on the gateway's event id.
pub struct WebhookRouter<B, G, I> {
    flow: Arc<RefundFlowApi<B, G>>,
    guard: I,
    ttl: Duration,
}

impl<B, G, I> Debug for WebhookRouter<B, G, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WebhookRouter")
    }
}

impl<B, G, I> WebhookRouter<B, G, I>
where
    B: LedgerDatabase,
    G: RefundGateway,
    I: IdempotencyStore,
{
    pub fn new(flow: Arc<RefundFlowApi<B, G>>, guard: I) -> Self {
        Self { flow, guard, ttl: Duration::seconds(DEFAULT_EVENT_TTL_SECS) }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Handles one verified webhook event end to end.
    ///
    /// An event id that has been processed before acknowledges immediately as
    /// [`WebhookDisposition::Duplicate`] without touching the ledger or the event bus. Otherwise the event is
    /// dispatched, and only a dispatch that returns cleanly marks the event processed. Errors bubble to the
    /// HTTP layer, which answers the gateway with a retryable failure.
    pub async fn handle_inbound(&self, event: InboundEvent) -> Result<WebhookDisposition, WebhookApiError> {
        if self.guard.is_processed(&event.event_id).await? {
            debug!("🔁️ Event {} ({}) was processed before. Acknowledging without dispatch", event.event_id, event.event_type);
            return Ok(WebhookDisposition::Duplicate);
        }
        let disposition = self.dispatch(&event).await?;
        let first = self.guard.mark_processed(&event.event_id, &event.gateway, &event.event_type, self.ttl).await?;
        if !first {
            // A concurrent delivery of the same event won the marker race. Both dispatches ran, but ledger
            // transitions are idempotent, so the second one was a no-op.
            debug!("🔁️ Event {} was marked processed by a concurrent delivery", event.event_id);
        }
        Ok(disposition)
    }

    async fn dispatch(&self, event: &InboundEvent) -> Result<WebhookDisposition, WebhookApiError> {
        let causation = Some(event.event_id.as_str());
        match &event.kind {
            InboundEventKind::PaymentSucceeded(notice) => {
                self.flow.record_payment_succeeded(notice.clone(), causation).await?;
                Ok(WebhookDisposition::Handled)
            },
            InboundEventKind::PaymentFailed(notice) => {
                self.flow.record_payment_failed(notice, causation).await?;
                Ok(WebhookDisposition::Handled)
            },
            InboundEventKind::PaymentCancelled(notice) => {
                self.flow.record_payment_cancelled(notice, causation).await?;
                Ok(WebhookDisposition::Handled)
            },
            InboundEventKind::RefundUpdated(notice) => self.apply_refund_notice(event, notice, false).await,
            InboundEventKind::ChargeRefunded(notice) => self.apply_refund_notice(event, notice, true).await,
            InboundEventKind::DisputeCreated(notice) | InboundEventKind::DisputeUpdated(notice) => {
                warn!(
                    "🔁️ Dispute [{}] on payment [{}] is {}: {}",
                    notice.dispute_ref,
                    notice.gateway_payment_ref,
                    notice.status,
                    notice.reason.as_deref().unwrap_or("no reason given")
                );
                Ok(WebhookDisposition::Handled)
            },
            InboundEventKind::Unknown => {
                info!("🔁️ Event type {} is not one this service consumes. Acknowledged", event.event_type);
                Ok(WebhookDisposition::Ignored)
            },
        }
    }

    /// Applies a refund notice, downgrading the errors that redelivery cannot fix to logged acknowledgements.
    /// `adopt_unknown` is set for `charge.refunded`, where an unknown reference is a gateway-issued refund to
    /// be recorded rather than a stray.
    async fn apply_refund_notice(
        &self,
        event: &InboundEvent,
        notice: &RefundNotice,
        adopt_unknown: bool,
    ) -> Result<WebhookDisposition, WebhookApiError> {
        let causation = Some(event.event_id.as_str());
        match self.flow.handle_refund_update(notice, causation).await {
            Ok(_) => Ok(WebhookDisposition::Handled),
            Err(LedgerError::RefundReferenceUnknown(reference)) if adopt_unknown => {
                match self.flow.record_external_refund(notice, causation).await {
                    Ok(Some(_)) => {},
                    Ok(None) => {
                        error!(
                            "🔁️ Gateway refund [{reference}] could not be recorded; the ledger and the gateway \
                             disagree about payment [{}]. A human needs to look at this.",
                            notice.gateway_payment_ref.as_deref().unwrap_or("?")
                        );
                    },
                    Err(LedgerError::PaymentNotFound(payment_ref)) => {
                        error!(
                            "🔁️ Gateway refund [{reference}] draws on payment [{payment_ref}], which is not on \
                             the ledger. Acknowledged; redelivery cannot fix this."
                        );
                    },
                    Err(e) => return Err(e.into()),
                }
                Ok(WebhookDisposition::Handled)
            },
            Err(LedgerError::RefundReferenceUnknown(reference)) => {
                warn!(
                    "🔁️ The gateway reports an update for refund [{reference}], which is not on the ledger. \
                     Acknowledged; reconciliation will adopt the refund if it is ours."
                );
                Ok(WebhookDisposition::Handled)
            },
            Err(LedgerError::Conflict(msg)) => {
                warn!("🔁️ Out-of-order update in event {}: {msg}. Acknowledged without applying it", event.event_id);
                Ok(WebhookDisposition::Handled)
            },
            Err(e) => Err(e.into()),
        }
    }
}
