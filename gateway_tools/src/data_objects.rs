use chrono::{DateTime, Utc};
use payrec_common::MinorUnits;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A refund creation request as POSTed to `/refunds`. The gateway deduplicates on `idempotency_key`: the same
/// key always answers with the refund created for it the first time.
#[derive(Debug, Clone, Serialize)]
pub struct RefundRequest {
    pub payment_reference: String,
    pub amount_minor: MinorUnits,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub idempotency_key: String,
}

/// The gateway's representation of a refund.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RefundResource {
    pub id: String,
    pub payment_reference: String,
    pub amount_minor: MinorUnits,
    pub currency: String,
    /// One of `pending`, `requires_action`, `succeeded`, `failed` or `canceled`.
    pub status: String,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefundList {
    pub data: Vec<RefundResource>,
    #[serde(default)]
    pub has_more: bool,
}

/// The gateway's representation of a payment, as carried in webhook payloads. `order_id` echoes the merchant
/// metadata attached at checkout, when there is any.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaymentResource {
    pub id: String,
    #[serde(default)]
    pub order_id: Option<i64>,
    pub amount_minor: MinorUnits,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

/// A dispute as carried in webhook payloads.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DisputeResource {
    pub id: String,
    pub payment_reference: String,
    #[serde(default)]
    pub reason: Option<String>,
    pub status: String,
}

/// The envelope every webhook delivery arrives in. `data` is decoded into [`RefundResource`],
/// [`PaymentResource`] or [`DisputeResource`] once `type` has been inspected.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayEventEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub created_at: DateTime<Utc>,
    pub data: Value,
}

/// The body the gateway attaches to a refusal.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiError,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}
