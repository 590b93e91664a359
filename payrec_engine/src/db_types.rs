use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use payrec_common::{MinorUnits, DEFAULT_CURRENCY};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid status value: {0}")]
pub struct StatusConversionError(String);

fn normalize(s: &str) -> String {
    s.chars().filter(|c| *c != '_' && *c != '-').collect::<String>().to_ascii_lowercase()
}

//--------------------------------------    OrderStatus      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// The order exists but no payment has settled yet.
    New,
    /// A payment has settled in full.
    Paid,
    /// The merchant is preparing the order.
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    /// Some, but not all, of the paid amount has been returned. Derived from refund settlement, never set by
    /// client input.
    PartiallyRefunded,
    /// The full paid amount has been returned. Derived, as above.
    Refunded,
}

impl OrderStatus {
    /// Order states from which a refund may be requested.
    pub fn refundable(&self) -> bool {
        use OrderStatus::*;
        matches!(self, Paid | Processing | Shipped | Delivered | PartiallyRefunded)
    }
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::New => "New",
            OrderStatus::Paid => "Paid",
            OrderStatus::Processing => "Processing",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::PartiallyRefunded => "PartiallyRefunded",
            OrderStatus::Refunded => "Refunded",
        };
        write!(f, "{s}")
    }
}

impl FromStr for OrderStatus {
    type Err = StatusConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "new" => Ok(Self::New),
            "paid" => Ok(Self::Paid),
            "processing" => Ok(Self::Processing),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            "partiallyrefunded" => Ok(Self::PartiallyRefunded),
            "refunded" => Ok(Self::Refunded),
            _ => Err(StatusConversionError(format!("Invalid order status: {s}"))),
        }
    }
}

//--------------------------------------   PaymentStatus     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    Voided,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    /// True when the capture settled and (some of) the funds are still held, i.e. the payment can back a refund.
    pub fn holds_funds(&self) -> bool {
        use PaymentStatus::*;
        matches!(self, Succeeded | PartiallyRefunded | Refunded)
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self, PaymentStatus::Pending | PaymentStatus::Processing)
    }
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Processing => "Processing",
            PaymentStatus::Succeeded => "Succeeded",
            PaymentStatus::Failed => "Failed",
            PaymentStatus::Voided => "Voided",
            PaymentStatus::Refunded => "Refunded",
            PaymentStatus::PartiallyRefunded => "PartiallyRefunded",
        };
        write!(f, "{s}")
    }
}

impl FromStr for PaymentStatus {
    type Err = StatusConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "voided" => Ok(Self::Voided),
            "refunded" => Ok(Self::Refunded),
            "partiallyrefunded" => Ok(Self::PartiallyRefunded),
            _ => Err(StatusConversionError(format!("Invalid payment status: {s}"))),
        }
    }
}

//--------------------------------------    RefundStatus     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    /// Recorded in the ledger; the gateway has not accepted the submission yet.
    Pending,
    /// The gateway accepted the submission and is moving the money.
    Processing,
    Succeeded,
    /// The gateway rejected or failed the refund. May be retried while the retry budget lasts.
    Failed,
    Cancelled,
}

impl RefundStatus {
    /// The documented transition graph: `PENDING → PROCESSING → {SUCCEEDED, FAILED}`, `PENDING → CANCELLED`,
    /// `FAILED → PENDING` (retry). A gateway may collapse the `PROCESSING` hop when the intermediate
    /// notification was never delivered, so `PENDING` may also move straight to a terminal state.
    pub fn can_transition_to(&self, next: RefundStatus) -> bool {
        use RefundStatus::*;
        match (self, next) {
            (Pending, Processing | Succeeded | Failed | Cancelled) => true,
            (Processing, Succeeded | Failed) => true,
            (Failed, Pending) => true,
            _ => false,
        }
    }

    /// Refunds in these states count against the payment's refundable amount.
    pub fn reserves_funds(&self) -> bool {
        use RefundStatus::*;
        matches!(self, Pending | Processing | Succeeded)
    }

    pub fn is_terminal(&self) -> bool {
        use RefundStatus::*;
        matches!(self, Succeeded | Failed | Cancelled)
    }
}

impl Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RefundStatus::Pending => "Pending",
            RefundStatus::Processing => "Processing",
            RefundStatus::Succeeded => "Succeeded",
            RefundStatus::Failed => "Failed",
            RefundStatus::Cancelled => "Cancelled",
        };
        write!(f, "{s}")
    }
}

impl FromStr for RefundStatus {
    type Err = StatusConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(StatusConversionError(format!("Invalid refund status: {s}"))),
        }
    }
}

//--------------------------------------       Order         ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Order {
    pub id: i64,
    pub status: OrderStatus,
    pub total_amount: MinorUnits,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub total_amount: MinorUnits,
    pub currency: String,
}

impl NewOrder {
    pub fn new(total_amount: MinorUnits) -> Self {
        Self { total_amount, currency: DEFAULT_CURRENCY.to_string() }
    }

    pub fn with_currency<S: Into<String>>(mut self, currency: S) -> Self {
        self.currency = currency.into();
        self
    }
}

//--------------------------------------      Payment        ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Payment {
    pub id: i64,
    pub order_id: i64,
    /// The gateway's identifier for the charge. Unique; webhook payloads reference payments by it.
    pub gateway_payment_ref: String,
    pub amount: MinorUnits,
    pub currency: String,
    pub status: PaymentStatus,
    pub captured_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_id: i64,
    pub gateway_payment_ref: String,
    pub amount: MinorUnits,
    pub currency: String,
    pub status: PaymentStatus,
}

impl NewPayment {
    pub fn new<S: Into<String>>(order_id: i64, gateway_payment_ref: S, amount: MinorUnits) -> Self {
        Self {
            order_id,
            gateway_payment_ref: gateway_payment_ref.into(),
            amount,
            currency: DEFAULT_CURRENCY.to_string(),
            status: PaymentStatus::Pending,
        }
    }

    pub fn with_currency<S: Into<String>>(mut self, currency: S) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_status(mut self, status: PaymentStatus) -> Self {
        self.status = status;
        self
    }
}

//--------------------------------------       Refund        ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Refund {
    pub id: i64,
    pub payment_id: i64,
    pub order_id: i64,
    pub amount: MinorUnits,
    pub currency: String,
    pub status: RefundStatus,
    /// The gateway's identifier for the refund. Absent until the gateway has accepted the submission.
    pub gateway_refund_ref: Option<String>,
    pub reason: String,
    pub notes: Option<String>,
    pub retry_count: i64,
    pub failure_reason: Option<String>,
    pub requested_by: String,
    pub cancelled_by: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A refund request as it enters the orchestrator. The refund inherits currency and payment linkage from the
/// order's settled payment; when `amount` is `None` the full remaining refundable amount is used.
#[derive(Debug, Clone)]
pub struct NewRefundRequest {
    pub order_id: i64,
    pub amount: Option<MinorUnits>,
    pub reason: String,
    pub notes: Option<String>,
    pub requested_by: String,
    pub correlation_id: Option<String>,
}

impl NewRefundRequest {
    pub fn new<S: Into<String>, R: Into<String>>(order_id: i64, reason: S, requested_by: R) -> Self {
        Self {
            order_id,
            amount: None,
            reason: reason.into(),
            notes: None,
            requested_by: requested_by.into(),
            correlation_id: None,
        }
    }

    pub fn with_amount(mut self, amount: MinorUnits) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_notes<S: Into<String>>(mut self, notes: S) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_correlation_id<S: Into<String>>(mut self, correlation_id: S) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

//--------------------------------------     RefundEvent     ---------------------------------------------------------
/// One entry in a refund's audit journal. Written in the same transaction as the state change it records.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RefundEvent {
    pub id: i64,
    pub refund_id: i64,
    pub old_status: Option<RefundStatus>,
    pub new_status: RefundStatus,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn refund_transition_graph() {
        use RefundStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Pending.can_transition_to(Succeeded));
        assert!(Processing.can_transition_to(Succeeded));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));
        assert!(!Processing.can_transition_to(Cancelled));
        assert!(!Succeeded.can_transition_to(Failed));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Succeeded));
    }

    #[test]
    fn status_round_trips() {
        for s in ["PENDING", "Processing", "succeeded", "FAILED", "cancelled"] {
            let parsed: RefundStatus = s.parse().unwrap();
            let back: RefundStatus = parsed.to_string().parse().unwrap();
            assert_eq!(parsed, back);
        }
        assert_eq!("PARTIALLY_REFUNDED".parse::<OrderStatus>().unwrap(), OrderStatus::PartiallyRefunded);
        assert_eq!("PartiallyRefunded".parse::<PaymentStatus>().unwrap(), PaymentStatus::PartiallyRefunded);
        assert!("sideways".parse::<RefundStatus>().is_err());
    }

    #[test]
    fn reservation_rules() {
        assert!(RefundStatus::Pending.reserves_funds());
        assert!(RefundStatus::Processing.reserves_funds());
        assert!(RefundStatus::Succeeded.reserves_funds());
        assert!(!RefundStatus::Failed.reserves_funds());
        assert!(!RefundStatus::Cancelled.reserves_funds());
    }
}
