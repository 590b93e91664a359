//! Event-bus subscribers the server wires up at startup.
//!
//! Both are best-effort side effects behind the ledger: a failure dead-letters the delivery and is replayed
//! later, it never rolls back the ledger change that triggered it.

use std::sync::Arc;

use futures::FutureExt;
use log::*;
use payrec_engine::events::{EventBus, EventEnvelope, TOPIC_REFUND_FAILED, TOPIC_REFUND_STATUS_UPDATED, TOPIC_WILDCARD};
use serde_json::Value;

/// Read-side cache invalidation, keyed by `DEL` pattern.
///
/// The default sink just logs the patterns; a deployment that fronts the ledger with a cache can drop in a
/// real client behind this trait without touching the subscription wiring.
pub trait CacheInvalidator: Send + Sync + 'static {
    fn invalidate(&self, pattern: &str);
}

/// The default [`CacheInvalidator`]: logs every pattern it would delete.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingCacheInvalidator;

impl CacheInvalidator for LoggingCacheInvalidator {
    fn invalidate(&self, pattern: &str) {
        info!("🧹️ DEL {pattern}");
    }
}

/// Subscribes `cache` to every topic. Each state-changing event invalidates the cache entries for the
/// aggregates named in its payload.
pub fn subscribe_cache_invalidator(bus: &dyn EventBus, cache: Arc<dyn CacheInvalidator>) {
    bus.subscribe(
        TOPIC_WILDCARD,
        "cache-invalidator",
        Arc::new(move |event| {
            let cache = Arc::clone(&cache);
            async move {
                for pattern in invalidation_patterns(&event) {
                    cache.invalidate(&pattern);
                }
                Ok(())
            }
            .boxed()
        }),
    );
}

fn invalidation_patterns(event: &EventEnvelope) -> Vec<String> {
    let mut patterns = Vec::new();
    if let Some(order_id) = event.payload.get("orderId").and_then(Value::as_i64) {
        patterns.push(format!("order:{order_id}:*"));
    }
    if let Some(refund_id) = event.payload.get("refundId").and_then(Value::as_i64) {
        patterns.push(format!("refund:{refund_id}:*"));
    }
    patterns
}

/// Subscribes the notification dispatcher to the refund outcome topics. Dispatch is fire-and-forget; this
/// sink logs the notification that would go out.
pub fn subscribe_notifier(bus: &dyn EventBus) {
    for topic in [TOPIC_REFUND_STATUS_UPDATED, TOPIC_REFUND_FAILED] {
        bus.subscribe(
            topic,
            "notifier",
            Arc::new(|event| {
                async move {
                    let refund_id = event.payload.get("refundId").and_then(Value::as_i64);
                    let status = event.payload.get("status").and_then(Value::as_str).unwrap_or("unknown");
                    match refund_id {
                        Some(id) => info!("📣️ Notify: refund #{id} is now {status}"),
                        None => debug!("📣️ Notify: {} event without a refund id", event.event_type),
                    }
                    Ok(())
                }
                .boxed()
            }),
        );
    }
}
