use payrec_common::MinorUnits;
use serde::Serialize;

use crate::{
    db_types::{Order, Payment, Refund, RefundStatus},
    traits::GatewayRefundStatus,
};

/// Vendor-neutral payload of a payment webhook event, after the HTTP layer has converted the gateway's shape.
#[derive(Debug, Clone)]
pub struct PaymentNotice {
    pub gateway_payment_ref: String,
    /// The merchant order the gateway associates with the charge, when it round-trips one.
    pub order_id: Option<i64>,
    pub amount: MinorUnits,
    pub currency: String,
    pub failure_reason: Option<String>,
}

/// Vendor-neutral payload of a refund webhook event.
#[derive(Debug, Clone)]
pub struct RefundNotice {
    pub gateway_refund_ref: String,
    pub gateway_payment_ref: Option<String>,
    pub amount: Option<MinorUnits>,
    pub currency: Option<String>,
    pub status: GatewayRefundStatus,
    pub failure_reason: Option<String>,
}

/// Vendor-neutral payload of a dispute webhook event. Disputes carry no ledger aggregate; the router logs and
/// acknowledges them.
#[derive(Debug, Clone)]
pub struct DisputeNotice {
    pub dispute_ref: String,
    pub gateway_payment_ref: String,
    pub reason: Option<String>,
    pub status: String,
}

/// How a refund row is addressed when applying a gateway-reported transition.
#[derive(Debug, Clone)]
pub enum RefundTarget {
    Id(i64),
    GatewayReference(String),
}

impl std::fmt::Display for RefundTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefundTarget::Id(id) => write!(f, "refund #{id}"),
            RefundTarget::GatewayReference(r) => write!(f, "refund [{r}]"),
        }
    }
}

/// Result of applying a gateway-reported refund transition.
///
/// `changed` is false when the refund was already in the reported state (duplicate delivery); callers publish
/// domain events only when it is true.
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub refund: Refund,
    pub previous: RefundStatus,
    pub changed: bool,
    /// Present when the settlement recomputation also moved the order (to `PARTIALLY_REFUNDED`/`REFUNDED`).
    pub order: Option<Order>,
}

/// Result of confirming a payment from a gateway notification.
#[derive(Debug, Clone)]
pub struct PaymentConfirmation {
    pub payment: Payment,
    pub order: Order,
    pub changed: bool,
}

/// Result of failing or voiding a payment. `order` is present when the update also cancelled the order.
#[derive(Debug, Clone)]
pub struct PaymentUpdate {
    pub payment: Payment,
    pub order: Option<Order>,
    pub changed: bool,
}

/// The router's answer for one inbound webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookDisposition {
    /// A handler ran and the event is now marked processed.
    Handled,
    /// The event id was already marked processed; nothing was dispatched.
    Duplicate,
    /// The event type is unknown to this router. Acknowledged for forward compatibility.
    Ignored,
}

/// Counts from one reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReconcileReport {
    pub examined: u32,
    pub updated: u32,
    pub marked_failed: u32,
    pub errors: u32,
}

impl std::fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} stale refunds examined, {} updated, {} marked failed, {} errors",
            self.examined, self.updated, self.marked_failed, self.errors
        )
    }
}
