use rand::{distributions::Alphanumeric, Rng};

/// Generates a fresh domain event id, e.g. `evt_h9PdQzT2c4R7wK1mXsYbAvLN`.
pub fn new_event_id() -> String {
    let suffix: String = rand::thread_rng().sample_iter(&Alphanumeric).take(24).map(char::from).collect();
    format!("evt_{suffix}")
}

/// The idempotency key a refund is submitted to the gateway under.
///
/// Derived from the ledger id so that every attempt for the same refund, including retries after a failure,
/// carries the same key and the gateway deduplicates them.
pub fn refund_idempotency_key(refund_id: i64) -> String {
    format!("refund-{refund_id}")
}
