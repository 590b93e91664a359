use thiserror::Error;

use crate::traits::{IdempotencyError, LedgerError};

/// Failures of the webhook intake path. The router needs to distinguish a broken dedup guard from a broken
/// handler, since only the latter may safely be retried by the gateway's redelivery loop.
#[derive(Debug, Clone, Error)]
pub enum WebhookApiError {
    #[error("Webhook dedup guard failure: {0}")]
    Guard(#[from] IdempotencyError),
    #[error("Webhook handler failure: {0}")]
    Handler(#[from] LedgerError),
}
