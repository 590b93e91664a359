//! Topic-based pub-sub with dead-lettering.
//!
//! This module provides the event bus that components of the system use to react to ledger changes. Subscribers
//! are stateless: all they receive is the [`EventEnvelope`] itself. Delivery inside one `publish` call is
//! synchronous and sequential in subscription order, so a caller that sequences its publishes gets per-topic
//! ordering for free. The bus does not impose any ordering across publishers.
//!
//! A subscriber that returns an error does not stop delivery to the others. The failed delivery is parked on
//! the dead-letter queue and can be re-driven with [`EventBus::replay`]; because replay re-invokes handlers,
//! handlers must be idempotent. Whether the publisher also sees the failure is the [`FailureMode`] of the bus.
//!
//! [`EventBus`] is the contract. [`InProcessEventBus`] is the in-memory implementation; a durable queue can be
//! swapped in behind the same trait without touching any publisher.
use std::{
    fmt::Debug,
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use log::*;
use serde::Serialize;
use thiserror::Error;

use crate::events::{event_types::TOPIC_WILDCARD, EventEnvelope};

pub type SubscriberFn =
    Arc<dyn Fn(EventEnvelope) -> BoxFuture<'static, Result<(), EventHandlerError>> + Send + Sync>;

/// The error a subscriber hands back when it could not process an event.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct EventHandlerError(pub String);

impl EventHandlerError {
    pub fn new<S: Into<String>>(msg: S) -> Self {
        Self(msg.into())
    }
}

#[derive(Debug, Clone, Error)]
pub enum EventBusError {
    #[error("{failed} of {total} subscribers failed to handle a {event_type} event")]
    HandlerFailures { event_type: String, failed: usize, total: usize },
}

/// What the publisher sees when a subscriber fails.
///
/// The failed delivery lands on the dead-letter queue either way. `Swallow` is the production setting:
/// subscribers are best-effort side effects and must not fail an operation whose ledger change already
/// committed. `Propagate` surfaces the failure to the publisher, which is what you want in development and in
/// tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailureMode {
    #[default]
    Swallow,
    Propagate,
}

impl FromStr for FailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "swallow" => Ok(FailureMode::Swallow),
            "propagate" => Ok(FailureMode::Propagate),
            other => Err(format!("'{other}' is not a valid failure mode. Use 'swallow' or 'propagate'.")),
        }
    }
}

impl std::fmt::Display for FailureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureMode::Swallow => f.write_str("swallow"),
            FailureMode::Propagate => f.write_str("propagate"),
        }
    }
}

/// One failed delivery, as exposed for inspection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub envelope: EventEnvelope,
    pub subscriber: String,
    pub topic: String,
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

/// Counts from one [`EventBus::replay`] pass. `replayed` deliveries succeeded and left the queue; `requeued`
/// deliveries failed again and stay parked.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReplayReport {
    pub replayed: usize,
    pub requeued: usize,
}

/// The delivery contract between the ledger and its observers.
///
/// An implementation may be in-process or durable, but the semantics the publishers rely on are fixed:
/// synchronous sequential delivery to exact-topic and [`TOPIC_WILDCARD`] subscribers, dead-lettering of failed
/// deliveries, and replay that re-invokes only the handler that failed.
pub trait EventBus: Send + Sync {
    /// Delivers `envelope` to every subscriber of its event type and of the wildcard topic, in subscription
    /// order, waiting for each in turn.
    fn publish(&self, envelope: EventEnvelope) -> BoxFuture<'_, Result<(), EventBusError>>;

    /// Registers `handler` for `topic`. `name` identifies the subscriber in logs and dead-letter records.
    fn subscribe(&self, topic: &str, name: &str, handler: SubscriberFn);

    /// Re-drives every dead-lettered delivery once.
    fn replay(&self) -> BoxFuture<'_, ReplayReport>;

    /// A snapshot of the dead-letter queue.
    fn dead_letters(&self) -> Vec<DeadLetterRecord>;
}

struct Subscription {
    topic: String,
    name: String,
    handler: SubscriberFn,
}

struct DeadLetter {
    record: DeadLetterRecord,
    handler: SubscriberFn,
}

#[derive(Default)]
struct BusState {
    subscribers: Vec<Subscription>,
    dead_letters: Vec<DeadLetter>,
}

/// The in-memory [`EventBus`].
///
/// Cheap to clone; clones share subscribers and the dead-letter queue.
#[derive(Clone, Default)]
pub struct InProcessEventBus {
    state: Arc<Mutex<BusState>>,
    failure_mode: FailureMode,
}

impl Debug for InProcessEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        write!(
            f,
            "InProcessEventBus ({} mode, {} subscribers, {} dead letters)",
            self.failure_mode,
            state.subscribers.len(),
            state.dead_letters.len()
        )
    }
}

impl InProcessEventBus {
    pub fn new(failure_mode: FailureMode) -> Self {
        Self { state: Arc::new(Mutex::new(BusState::default())), failure_mode }
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    // A poisoned lock only means a subscriber panicked mid-bookkeeping; the state is still usable.
    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EventBus for InProcessEventBus {
    fn publish(&self, envelope: EventEnvelope) -> BoxFuture<'_, Result<(), EventBusError>> {
        Box::pin(async move {
            let targets = {
                let state = self.state();
                state
                    .subscribers
                    .iter()
                    .filter(|s| s.topic == envelope.event_type || s.topic == TOPIC_WILDCARD)
                    .map(|s| (s.name.clone(), s.topic.clone(), Arc::clone(&s.handler)))
                    .collect::<Vec<_>>()
            };
            let total = targets.len();
            trace!("📬️ Delivering {envelope} to {total} subscribers");
            let mut failures = Vec::new();
            for (name, topic, handler) in targets {
                if let Err(e) = handler(envelope.clone()).await {
                    warn!("📬️ Subscriber '{name}' failed to handle {envelope}: {e}");
                    failures.push((name, topic, handler, e));
                }
            }
            if failures.is_empty() {
                return Ok(());
            }
            let failed = failures.len();
            {
                let mut state = self.state();
                for (name, topic, handler, e) in failures {
                    let record = DeadLetterRecord {
                        envelope: envelope.clone(),
                        subscriber: name,
                        topic,
                        error: e.to_string(),
                        attempts: 1,
                        failed_at: Utc::now(),
                    };
                    state.dead_letters.push(DeadLetter { record, handler });
                }
            }
            match self.failure_mode {
                FailureMode::Swallow => {
                    error!("📬️ {failed} of {total} subscribers failed to handle {envelope}. Dead-lettered.");
                    Ok(())
                },
                FailureMode::Propagate => {
                    Err(EventBusError::HandlerFailures { event_type: envelope.event_type, failed, total })
                },
            }
        })
    }

    fn subscribe(&self, topic: &str, name: &str, handler: SubscriberFn) {
        debug!("📬️ '{name}' subscribed to {topic}");
        self.state().subscribers.push(Subscription {
            topic: topic.to_string(),
            name: name.to_string(),
            handler,
        });
    }

    fn replay(&self) -> BoxFuture<'_, ReplayReport> {
        Box::pin(async move {
            let parked = {
                let mut state = self.state();
                std::mem::take(&mut state.dead_letters)
            };
            if parked.is_empty() {
                return ReplayReport::default();
            }
            info!("📬️ Replaying {} dead-lettered deliveries", parked.len());
            let mut report = ReplayReport::default();
            let mut requeue = Vec::new();
            for mut letter in parked {
                match (letter.handler)(letter.record.envelope.clone()).await {
                    Ok(()) => {
                        debug!(
                            "📬️ Replay delivered {} to '{}'",
                            letter.record.envelope, letter.record.subscriber
                        );
                        report.replayed += 1;
                    },
                    Err(e) => {
                        warn!(
                            "📬️ Replay of {} to '{}' failed again: {e}",
                            letter.record.envelope, letter.record.subscriber
                        );
                        letter.record.attempts += 1;
                        letter.record.error = e.to_string();
                        letter.record.failed_at = Utc::now();
                        requeue.push(letter);
                        report.requeued += 1;
                    },
                }
            }
            if !requeue.is_empty() {
                self.state().dead_letters.append(&mut requeue);
            }
            report
        })
    }

    fn dead_letters(&self) -> Vec<DeadLetterRecord> {
        self.state().dead_letters.iter().map(|l| l.record.clone()).collect()
    }
}
