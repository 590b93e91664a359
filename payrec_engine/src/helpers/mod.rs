mod ids;

pub use ids::{new_event_id, refund_idempotency_key};
