//! Seam between the gateway's wire format and the vendor-neutral types the engine consumes.
//!
//! Everything gateway-shaped stops here: outbound, [`LiveGateway`] adapts the engine's
//! [`RefundGateway`] calls onto the REST client; inbound, [`inbound_event_from_envelope`] turns a verified
//! webhook envelope into the [`InboundEvent`] the router dispatches on.

use gateway_tools::{
    DisputeResource,
    GatewayApi,
    GatewayApiError,
    GatewayEventEnvelope,
    PaymentResource,
    RefundRequest,
    RefundResource,
};
use log::*;
use payrec_engine::{
    traits::{DisputeNotice, GatewayRefundState, GatewayRefundStatus, PaymentNotice, RefundNotice, RefundSubmission},
    GatewayError,
    InboundEvent,
    InboundEventKind,
    RefundGateway,
};
use serde_json::Value;

/// The production [`RefundGateway`], backed by the gateway's REST API.
#[derive(Clone)]
pub struct LiveGateway {
    api: GatewayApi,
}

impl LiveGateway {
    pub fn new(api: GatewayApi) -> Self {
        Self { api }
    }
}

impl RefundGateway for LiveGateway {
    async fn submit_refund(&self, submission: RefundSubmission) -> Result<GatewayRefundState, GatewayError> {
        let request = RefundRequest {
            payment_reference: submission.payment_reference,
            amount_minor: submission.amount,
            currency: submission.currency,
            reason: submission.reason,
            idempotency_key: submission.idempotency_key,
        };
        let resource = self.api.create_refund(&request).await.map_err(into_gateway_error)?;
        refund_state(resource)
    }

    async fn fetch_refund(&self, reference: &str) -> Result<GatewayRefundState, GatewayError> {
        let resource = self.api.get_refund(reference).await.map_err(into_gateway_error)?;
        refund_state(resource)
    }

    async fn find_refund_by_key(&self, idempotency_key: &str) -> Result<Option<GatewayRefundState>, GatewayError> {
        let found = self.api.find_refund_by_idempotency_key(idempotency_key).await.map_err(into_gateway_error)?;
        found.map(refund_state).transpose()
    }
}

fn refund_state(resource: RefundResource) -> Result<GatewayRefundState, GatewayError> {
    let status = resource.status.parse::<GatewayRefundStatus>()?;
    Ok(GatewayRefundState { reference: resource.id, status, failure_reason: resource.failure_reason })
}

fn into_gateway_error(e: GatewayApiError) -> GatewayError {
    match e {
        GatewayApiError::Timeout => GatewayError::Timeout,
        GatewayApiError::Refused { code, message, .. } => GatewayError::Rejected { code, message },
        GatewayApiError::Initialization(m) | GatewayApiError::RestResponseError(m) => GatewayError::Transport(m),
        GatewayApiError::JsonError(m) => GatewayError::UnexpectedResponse(m),
        GatewayApiError::QueryError { status, message } => {
            GatewayError::UnexpectedResponse(format!("HTTP {status}: {message}"))
        },
    }
}

/// Converts a signature-verified webhook envelope into the event the router dispatches on.
///
/// An event type this service does not consume maps to [`InboundEventKind::Unknown`], as does a payload that
/// does not match its advertised type; both are acknowledged to the gateway rather than redelivered forever.
pub fn inbound_event_from_envelope(gateway: &str, envelope: GatewayEventEnvelope) -> InboundEvent {
    let GatewayEventEnvelope { id: event_id, event_type, data, .. } = envelope;
    let kind = match event_type.as_str() {
        "payment.succeeded" => payment_notice(&data).map(InboundEventKind::PaymentSucceeded),
        "payment.failed" => payment_notice(&data).map(InboundEventKind::PaymentFailed),
        "payment.canceled" => payment_notice(&data).map(InboundEventKind::PaymentCancelled),
        "refund.updated" => refund_notice(&data).map(InboundEventKind::RefundUpdated),
        "charge.refunded" => refund_notice(&data).map(InboundEventKind::ChargeRefunded),
        "dispute.created" => dispute_notice(&data).map(InboundEventKind::DisputeCreated),
        "dispute.updated" => dispute_notice(&data).map(InboundEventKind::DisputeUpdated),
        _ => {
            debug!("🛒️ No handler consumes {event_type} events");
            Some(InboundEventKind::Unknown)
        },
    };
    let kind = kind.unwrap_or_else(|| {
        warn!("🛒️ The payload of {event_type} event [{event_id}] did not match its advertised type");
        InboundEventKind::Unknown
    });
    InboundEvent { event_id, gateway: gateway.to_string(), event_type, kind }
}

fn payment_notice(data: &Value) -> Option<PaymentNotice> {
    let payment = serde_json::from_value::<PaymentResource>(data.clone()).ok()?;
    Some(PaymentNotice {
        gateway_payment_ref: payment.id,
        order_id: payment.order_id,
        amount: payment.amount_minor,
        currency: payment.currency,
        failure_reason: payment.failure_reason,
    })
}

fn refund_notice(data: &Value) -> Option<RefundNotice> {
    let refund = serde_json::from_value::<RefundResource>(data.clone()).ok()?;
    let status = refund.status.parse::<GatewayRefundStatus>().ok()?;
    Some(RefundNotice {
        gateway_refund_ref: refund.id,
        gateway_payment_ref: Some(refund.payment_reference),
        amount: Some(refund.amount_minor),
        currency: Some(refund.currency),
        status,
        failure_reason: refund.failure_reason,
    })
}

fn dispute_notice(data: &Value) -> Option<DisputeNotice> {
    let dispute = serde_json::from_value::<DisputeResource>(data.clone()).ok()?;
    Some(DisputeNotice {
        dispute_ref: dispute.id,
        gateway_payment_ref: dispute.payment_reference,
        reason: dispute.reason,
        status: dispute.status,
    })
}
