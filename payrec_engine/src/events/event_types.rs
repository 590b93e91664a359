use chrono::{DateTime, Utc};
use log::*;
use payrec_common::MinorUnits;
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{Order, OrderStatus, Payment, PaymentStatus, Refund, RefundStatus},
    helpers::new_event_id,
};

pub const TOPIC_REFUND_INITIATED: &str = "refund.initiated";
pub const TOPIC_REFUND_STATUS_UPDATED: &str = "refund.status-updated";
pub const TOPIC_REFUND_FAILED: &str = "refund.failed";
pub const TOPIC_REFUND_CANCELLED: &str = "refund.cancelled";
pub const TOPIC_PAYMENT_SUCCEEDED: &str = "payment.succeeded";
pub const TOPIC_PAYMENT_FAILED: &str = "payment.failed";
pub const TOPIC_ORDER_CANCELLED: &str = "order.cancelled";
/// Subscribing to the wildcard topic delivers every published event.
pub const TOPIC_WILDCARD: &str = "*";

/// The envelope every domain event travels in.
///
/// `correlation_id` ties together everything done on behalf of one external request; `causation_id` names the
/// event or webhook delivery that directly triggered this one. Both are optional and flow through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: String,
    pub event_type: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    pub fn new<T: Serialize>(event_type: &str, source: &str, payload: &T) -> Self {
        let payload = serde_json::to_value(payload).unwrap_or_else(|e| {
            warn!("📬️ Could not serialize the payload for a {event_type} event: {e}");
            serde_json::Value::Null
        });
        Self {
            event_id: new_event_id(),
            event_type: event_type.to_string(),
            source: source.to_string(),
            timestamp: Utc::now(),
            correlation_id: None,
            causation_id: None,
            payload,
        }
    }

    pub fn with_correlation_id<S: Into<String>>(mut self, id: S) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_causation_id<S: Into<String>>(mut self, id: S) -> Self {
        self.causation_id = Some(id.into());
        self
    }
}

impl std::fmt::Display for EventEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} event {}", self.event_type, self.event_id)
    }
}

/// Payload for the `refund.*` topics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundEventInfo {
    pub refund_id: i64,
    pub order_id: i64,
    pub payment_id: i64,
    pub amount: MinorUnits,
    pub currency: String,
    pub status: RefundStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl From<&Refund> for RefundEventInfo {
    fn from(refund: &Refund) -> Self {
        Self {
            refund_id: refund.id,
            order_id: refund.order_id,
            payment_id: refund.payment_id,
            amount: refund.amount,
            currency: refund.currency.clone(),
            status: refund.status,
            requested_by: Some(refund.requested_by.clone()),
            failure_reason: refund.failure_reason.clone(),
        }
    }
}

/// Payload for the `payment.*` topics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEventInfo {
    pub payment_id: i64,
    pub order_id: i64,
    pub gateway_payment_ref: String,
    pub amount: MinorUnits,
    pub currency: String,
    pub status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl From<&Payment> for PaymentEventInfo {
    fn from(payment: &Payment) -> Self {
        Self {
            payment_id: payment.id,
            order_id: payment.order_id,
            gateway_payment_ref: payment.gateway_payment_ref.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            status: payment.status,
            failure_reason: None,
        }
    }
}

/// Payload for the `order.*` topics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEventInfo {
    pub order_id: i64,
    pub status: OrderStatus,
    pub total_amount: MinorUnits,
    pub currency: String,
}

impl From<&Order> for OrderEventInfo {
    fn from(order: &Order) -> Self {
        Self { order_id: order.id, status: order.status, total_amount: order.total_amount, currency: order.currency.clone() }
    }
}
