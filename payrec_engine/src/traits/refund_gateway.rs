//! The outbound side of the gateway integration.
//!
//! [`RefundGateway`] is the trait the refund flow calls to submit and look up refunds at the payment provider.
//! The engine never talks HTTP itself; the server crate supplies a live client and the test suite supplies a
//! scriptable stub.

use std::str::FromStr;

use payrec_common::MinorUnits;
use thiserror::Error;

use crate::db_types::RefundStatus;

/// Status vocabulary the gateway reports for a refund. Deliberately the gateway's words, not ours; call
/// [`GatewayRefundStatus::as_refund_status`] to land in ledger vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayRefundStatus {
    Pending,
    RequiresAction,
    Succeeded,
    Failed,
    Canceled,
}

impl GatewayRefundStatus {
    /// Maps the gateway's wire status onto the ledger's refund status.
    ///
    /// `pending` and `requires_action` both mean "accepted, not settled", which the ledger records as
    /// `PROCESSING`. The other three map one-to-one.
    pub fn as_refund_status(&self) -> RefundStatus {
        match self {
            GatewayRefundStatus::Pending | GatewayRefundStatus::RequiresAction => RefundStatus::Processing,
            GatewayRefundStatus::Succeeded => RefundStatus::Succeeded,
            GatewayRefundStatus::Failed => RefundStatus::Failed,
            GatewayRefundStatus::Canceled => RefundStatus::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GatewayRefundStatus::Succeeded | GatewayRefundStatus::Failed | GatewayRefundStatus::Canceled)
    }
}

impl FromStr for GatewayRefundStatus {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(GatewayRefundStatus::Pending),
            "requires_action" => Ok(GatewayRefundStatus::RequiresAction),
            "succeeded" => Ok(GatewayRefundStatus::Succeeded),
            "failed" => Ok(GatewayRefundStatus::Failed),
            "canceled" => Ok(GatewayRefundStatus::Canceled),
            other => Err(GatewayError::UnexpectedResponse(format!("unknown refund status '{other}'"))),
        }
    }
}

impl std::fmt::Display for GatewayRefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GatewayRefundStatus::Pending => "pending",
            GatewayRefundStatus::RequiresAction => "requires_action",
            GatewayRefundStatus::Succeeded => "succeeded",
            GatewayRefundStatus::Failed => "failed",
            GatewayRefundStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// A refund creation request as the gateway wants it.
#[derive(Debug, Clone)]
pub struct RefundSubmission {
    /// The gateway's reference for the charge being refunded.
    pub payment_reference: String,
    pub amount: MinorUnits,
    pub currency: String,
    pub reason: Option<String>,
    /// Dedup key the gateway honours across retries of the same submission.
    pub idempotency_key: String,
}

/// The gateway's view of one refund, as returned from a submission or a lookup.
#[derive(Debug, Clone)]
pub struct GatewayRefundState {
    /// The gateway's reference for the refund.
    pub reference: String,
    pub status: GatewayRefundStatus,
    pub failure_reason: Option<String>,
}

/// Client-side interface to the payment gateway's refund endpoints.
#[allow(async_fn_in_trait)]
pub trait RefundGateway: Clone {
    /// Submits a refund to the gateway.
    ///
    /// Implementations must pass `submission.idempotency_key` through to the gateway so that retries of the
    /// same ledger refund cannot create a second gateway refund.
    async fn submit_refund(&self, submission: RefundSubmission) -> Result<GatewayRefundState, GatewayError>;

    /// Fetches the current state of a refund by the gateway's reference.
    async fn fetch_refund(&self, reference: &str) -> Result<GatewayRefundState, GatewayError>;

    /// Looks up a refund by the idempotency key it was submitted under. Returns `None` when the gateway has no
    /// refund for that key, which tells reconciliation the original submission never landed.
    async fn find_refund_by_key(&self, idempotency_key: &str) -> Result<Option<GatewayRefundState>, GatewayError>;
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("The gateway did not respond within the configured deadline")]
    Timeout,
    #[error("The gateway rejected the request ({code}): {message}")]
    Rejected { code: String, message: String },
    #[error("Could not reach the gateway: {0}")]
    Transport(String),
    #[error("The gateway sent a response we could not interpret: {0}")]
    UnexpectedResponse(String),
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use crate::{
        db_types::RefundStatus,
        traits::refund_gateway::GatewayRefundStatus,
    };

    #[test]
    fn wire_statuses_parse() {
        assert_eq!(GatewayRefundStatus::from_str("pending").unwrap(), GatewayRefundStatus::Pending);
        assert_eq!(GatewayRefundStatus::from_str("requires_action").unwrap(), GatewayRefundStatus::RequiresAction);
        assert_eq!(GatewayRefundStatus::from_str("succeeded").unwrap(), GatewayRefundStatus::Succeeded);
        assert_eq!(GatewayRefundStatus::from_str("failed").unwrap(), GatewayRefundStatus::Failed);
        assert_eq!(GatewayRefundStatus::from_str("canceled").unwrap(), GatewayRefundStatus::Canceled);
        assert!(GatewayRefundStatus::from_str("reversed").is_err());
    }

    #[test]
    fn gateway_statuses_map_onto_ledger_statuses() {
        assert_eq!(GatewayRefundStatus::Pending.as_refund_status(), RefundStatus::Processing);
        assert_eq!(GatewayRefundStatus::RequiresAction.as_refund_status(), RefundStatus::Processing);
        assert_eq!(GatewayRefundStatus::Succeeded.as_refund_status(), RefundStatus::Succeeded);
        assert_eq!(GatewayRefundStatus::Failed.as_refund_status(), RefundStatus::Failed);
        assert_eq!(GatewayRefundStatus::Canceled.as_refund_status(), RefundStatus::Cancelled);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!GatewayRefundStatus::Pending.is_terminal());
        assert!(!GatewayRefundStatus::RequiresAction.is_terminal());
        assert!(GatewayRefundStatus::Succeeded.is_terminal());
        assert!(GatewayRefundStatus::Failed.is_terminal());
        assert!(GatewayRefundStatus::Canceled.is_terminal());
    }
}
