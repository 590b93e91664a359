use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::db_types::{Order, Payment, Refund, RefundEvent, RefundStatus};

/// Filter criteria for refund searches. All fields are conjunctive; an empty filter matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefundQueryFilter {
    pub order_id: Option<i64>,
    pub payment_id: Option<i64>,
    pub requested_by: Option<String>,
    pub status: Option<Vec<RefundStatus>>,
}

impl RefundQueryFilter {
    pub fn with_order_id(mut self, order_id: i64) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn with_payment_id(mut self, payment_id: i64) -> Self {
        self.payment_id = Some(payment_id);
        self
    }

    pub fn with_requested_by<S: Into<String>>(mut self, requested_by: S) -> Self {
        self.requested_by = Some(requested_by.into());
        self
    }

    pub fn with_status(mut self, status: RefundStatus) -> Self {
        self.status.get_or_insert_with(Vec::new).push(status);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.order_id.is_none() && self.payment_id.is_none() && self.requested_by.is_none() && self.status.is_none()
    }
}

impl Display for RefundQueryFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            write!(f, "No filters.")?;
            return Ok(());
        }
        if let Some(order_id) = &self.order_id {
            write!(f, "order_id: {order_id}. ")?;
        }
        if let Some(payment_id) = &self.payment_id {
            write!(f, "payment_id: {payment_id}. ")?;
        }
        if let Some(requested_by) = &self.requested_by {
            write!(f, "requested_by: {requested_by}. ")?;
        }
        if let Some(statuses) = &self.status {
            let statuses = statuses.iter().map(|s| s.to_string()).collect::<Vec<String>>().join(",");
            write!(f, "statuses: [{statuses}]. ")?;
        }
        Ok(())
    }
}

/// A page request. Pages are 1-based; page 1 with the default limit returns the 50 most recent refunds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub const DEFAULT_LIMIT: u32 = 50;

    pub fn new(page: u32, limit: u32) -> Self {
        Self { page: page.max(1), limit }
    }

    pub fn offset(&self) -> u32 {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, limit: Self::DEFAULT_LIMIT }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PageMeta {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

/// One page of search results together with the total count of matches across all pages.
#[derive(Debug, Clone, Serialize)]
pub struct PagedResult<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

impl<T> PagedResult<T> {
    pub fn new(data: Vec<T>, pagination: &Pagination, total: i64) -> Self {
        let limit = i64::from(pagination.limit.max(1));
        let total_pages = (total + limit - 1) / limit;
        Self { data, meta: PageMeta { page: pagination.page, limit: pagination.limit, total, total_pages } }
    }
}

/// A refund together with the order and payment it belongs to and its full audit journal.
#[derive(Debug, Clone, Serialize)]
pub struct RefundDetail {
    pub refund: Refund,
    pub order: Order,
    pub payment: Payment,
    pub history: Vec<RefundEvent>,
}

impl RefundDetail {
    /// The sum still reserved or settled against the payment by this refund, zero once it fails or is
    /// cancelled.
    pub fn reserved_amount(&self) -> payrec_common::MinorUnits {
        if self.refund.status.reserves_funds() {
            self.refund.amount
        } else {
            payrec_common::MinorUnits::from(0)
        }
    }
}

/// An order with every payment and refund recorded against it.
#[derive(Debug, Clone, Serialize)]
pub struct OrderActivity {
    pub order: Order,
    pub payments: Vec<Payment>,
    pub refunds: Vec<Refund>,
}

impl OrderActivity {
    /// Total settled refunds across all payments of the order.
    pub fn total_refunded(&self) -> payrec_common::MinorUnits {
        self.refunds.iter().filter(|r| r.status == RefundStatus::Succeeded).map(|r| r.amount).sum()
    }
}
