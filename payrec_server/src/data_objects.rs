use chrono::{DateTime, Utc};
use payrec_common::MinorUnits;
use payrec_engine::{
    db_types::{Order, OrderStatus, Payment, PaymentStatus, Refund, RefundEvent, RefundStatus},
    refund_objects::{PagedResult, Pagination, RefundDetail, RefundQueryFilter},
};
use serde::{Deserialize, Serialize};

use crate::errors::FieldError;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequestBody {
    pub order_id: i64,
    /// Major-unit amount with two decimals, e.g. `"12.50"`. Omitted means "the remaining refundable amount".
    #[serde(default)]
    pub amount: Option<String>,
    pub reason: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Validates a refund request body, returning the parsed amount on success and the full list of field
/// problems otherwise.
pub fn validate_refund_request(body: &RefundRequestBody) -> Result<Option<MinorUnits>, Vec<FieldError>> {
    let mut errors = Vec::new();
    if body.reason.trim().is_empty() {
        errors.push(FieldError::new("reason", "A reason for the refund is required"));
    }
    let amount = match &body.amount {
        Some(s) => match MinorUnits::from_decimal_str(s) {
            Ok(amount) if amount.is_positive() => Some(amount),
            Ok(_) => {
                errors.push(FieldError::new("amount", "The amount must be greater than zero"));
                None
            },
            Err(e) => {
                errors.push(FieldError::new("amount", e.to_string()));
                None
            },
        },
        None => None,
    };
    if errors.is_empty() {
        Ok(amount)
    } else {
        Err(errors)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    pub id: i64,
    pub order_id: i64,
    pub payment_id: i64,
    pub amount: String,
    pub currency: String,
    pub status: RefundStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_refund_ref: Option<String>,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub retry_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub requested_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Refund> for RefundResponse {
    fn from(refund: Refund) -> Self {
        Self {
            id: refund.id,
            order_id: refund.order_id,
            payment_id: refund.payment_id,
            amount: refund.amount.to_string(),
            currency: refund.currency,
            status: refund.status,
            gateway_refund_ref: refund.gateway_refund_ref,
            reason: refund.reason,
            notes: refund.notes,
            retry_count: refund.retry_count,
            failure_reason: refund.failure_reason,
            requested_by: refund.requested_by,
            cancelled_by: refund.cancelled_by,
            processed_at: refund.processed_at,
            settled_at: refund.settled_at,
            cancelled_at: refund.cancelled_at,
            created_at: refund.created_at,
            updated_at: refund.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub id: i64,
    pub status: OrderStatus,
    pub total_amount: String,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Order> for OrderSummary {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            status: order.status,
            total_amount: order.total_amount.to_string(),
            currency: order.currency,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSummary {
    pub id: i64,
    pub order_id: i64,
    pub gateway_payment_ref: String,
    pub amount: String,
    pub currency: String,
    pub status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Payment> for PaymentSummary {
    fn from(payment: Payment) -> Self {
        Self {
            id: payment.id,
            order_id: payment.order_id,
            gateway_payment_ref: payment.gateway_payment_ref,
            amount: payment.amount.to_string(),
            currency: payment.currency,
            status: payment.status,
            captured_at: payment.captured_at,
            created_at: payment.created_at,
            updated_at: payment.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundEventEntry {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_status: Option<RefundStatus>,
    pub new_status: RefundStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<RefundEvent> for RefundEventEntry {
    fn from(event: RefundEvent) -> Self {
        Self {
            id: event.id,
            old_status: event.old_status,
            new_status: event.new_status,
            note: event.note,
            created_at: event.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundDetailResponse {
    pub refund: RefundResponse,
    pub order: OrderSummary,
    pub payment: PaymentSummary,
    pub history: Vec<RefundEventEntry>,
}

impl From<RefundDetail> for RefundDetailResponse {
    fn from(detail: RefundDetail) -> Self {
        Self {
            refund: detail.refund.into(),
            order: detail.order.into(),
            payment: detail.payment.into(),
            history: detail.history.into_iter().map(RefundEventEntry::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundSearchQuery {
    pub order_id: Option<i64>,
    /// One or more refund statuses, comma-separated.
    pub status: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl RefundSearchQuery {
    pub fn into_query(self) -> Result<(RefundQueryFilter, Pagination), Vec<FieldError>> {
        let mut errors = Vec::new();
        let mut filter = RefundQueryFilter::default();
        if let Some(order_id) = self.order_id {
            filter = filter.with_order_id(order_id);
        }
        if let Some(statuses) = &self.status {
            for part in statuses.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                match part.parse::<RefundStatus>() {
                    Ok(status) => filter = filter.with_status(status),
                    Err(e) => errors.push(FieldError::new("status", e.to_string())),
                }
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }
        let pagination =
            Pagination::new(self.page.unwrap_or(1), self.limit.unwrap_or(Pagination::DEFAULT_LIMIT));
        Ok((filter, pagination))
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetaResponse {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PagedRefundsResponse {
    pub data: Vec<RefundResponse>,
    pub meta: PageMetaResponse,
}

impl From<PagedResult<Refund>> for PagedRefundsResponse {
    fn from(result: PagedResult<Refund>) -> Self {
        let meta = PageMetaResponse {
            page: result.meta.page,
            limit: result.meta.limit,
            total: result.meta.total,
            total_pages: result.meta.total_pages,
        };
        Self { data: result.data.into_iter().map(RefundResponse::from).collect(), meta }
    }
}

/// The acknowledgement body every accepted webhook delivery receives.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

#[cfg(test)]
mod test {
    use super::{validate_refund_request, RefundRequestBody, RefundSearchQuery};

    fn body(amount: Option<&str>, reason: &str) -> RefundRequestBody {
        RefundRequestBody {
            order_id: 1,
            amount: amount.map(String::from),
            reason: reason.to_string(),
            notes: None,
        }
    }

    #[test]
    fn omitted_amount_is_valid() {
        let amount = validate_refund_request(&body(None, "duplicate charge")).expect("Expected a valid request");
        assert!(amount.is_none());
    }

    #[test]
    fn two_decimal_amounts_parse() {
        let amount = validate_refund_request(&body(Some("12.50"), "goodwill")).expect("Expected a valid request");
        assert_eq!(amount.map(|a| a.value()), Some(1250));
    }

    #[test]
    fn sub_minor_precision_is_rejected() {
        let errors = validate_refund_request(&body(Some("12.345"), "goodwill")).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "amount");
    }

    #[test]
    fn empty_amount_is_rejected() {
        let errors = validate_refund_request(&body(Some(""), "goodwill")).unwrap_err();
        assert_eq!(errors[0].field, "amount");
    }

    #[test]
    fn negative_amount_is_rejected() {
        let errors = validate_refund_request(&body(Some("-3"), "goodwill")).unwrap_err();
        assert_eq!(errors[0].field, "amount");
        assert!(errors[0].message.contains("greater than zero"));
    }

    #[test]
    fn blank_reason_is_rejected() {
        let errors = validate_refund_request(&body(None, "  ")).unwrap_err();
        assert_eq!(errors[0].field, "reason");
    }

    #[test]
    fn all_problems_are_reported_together() {
        let errors = validate_refund_request(&body(Some("ten"), "")).unwrap_err();
        let fields = errors.iter().map(|e| e.field).collect::<Vec<_>>();
        assert!(fields.contains(&"reason"));
        assert!(fields.contains(&"amount"));
    }

    #[test]
    fn search_query_parses_statuses() {
        let query = RefundSearchQuery {
            order_id: Some(12),
            status: Some("pending,failed".to_string()),
            page: None,
            limit: Some(10),
        };
        let (filter, pagination) = query.into_query().expect("Expected a valid query");
        assert_eq!(filter.order_id, Some(12));
        assert_eq!(filter.status.map(|s| s.len()), Some(2));
        assert_eq!(pagination.page, 1);
        assert_eq!(pagination.limit, 10);
    }

    #[test]
    fn search_query_rejects_unknown_status() {
        let query = RefundSearchQuery { status: Some("sideways".to_string()), ..Default::default() };
        let errors = query.into_query().unwrap_err();
        assert_eq!(errors[0].field, "status");
    }
}
