use chrono::Duration;
use thiserror::Error;

/// Replay guard for inbound webhook events.
///
/// The router consults this store before dispatching and records the event id after a handler succeeds. Event
/// ids are kept for at least the TTL supplied to [`IdempotencyStore::mark_processed`]; expired rows are reaped
/// by [`IdempotencyStore::purge_expired`], which the background worker calls on its schedule.
#[allow(async_fn_in_trait)]
pub trait IdempotencyStore: Clone {
    /// Returns true when `event_id` has already been processed and not yet expired.
    async fn is_processed(&self, event_id: &str) -> Result<bool, IdempotencyError>;

    /// Records `event_id` as processed, keeping it for at least `ttl`. Returns false when the id was already
    /// recorded (a lost race with a concurrent delivery), true when this call inserted it.
    async fn mark_processed(
        &self,
        event_id: &str,
        gateway: &str,
        event_type: &str,
        ttl: Duration,
    ) -> Result<bool, IdempotencyError>;

    /// Deletes entries whose retention window has passed. Returns the number of rows removed.
    async fn purge_expired(&self) -> Result<u64, IdempotencyError>;
}

#[derive(Debug, Clone, Error)]
pub enum IdempotencyError {
    #[error("Could not access the processed-event store. {0}")]
    StorageError(String),
}

impl From<sqlx::Error> for IdempotencyError {
    fn from(e: sqlx::Error) -> Self {
        IdempotencyError::StorageError(e.to_string())
    }
}
