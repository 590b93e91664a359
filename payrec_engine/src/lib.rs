//! Payment reconciliation engine
//!
//! This library keeps an internal ledger of orders, payments and refunds consistent with an external payment
//! gateway that settles money movement asynchronously and reports outcomes via webhooks. It is vendor-agnostic;
//! gateway payload shapes live with the HTTP layer and are converted into the types in [`traits`] before they
//! reach the engine.
//!
//! The library is divided into three main sections:
//! 1. Database management and control ([`mod@db`]). SQLite is the reference backend. You should never need to
//!    access the database directly; use the public APIs instead. The exception is the data types used in the
//!    database, which are defined in the [`db_types`] module and are public.
//! 2. The engine public API ([`mod@pre_api`]). [`RefundFlowApi`] drives the refund state machine and talks to
//!    the gateway, [`WebhookRouter`] authenticates-and-dispatches inbound gateway events, and [`LedgerApi`]
//!    serves the read models. Backends implement the traits in [`traits`] to plug in.
//! 3. The event bus ([`mod@events`]). State-changing operations publish domain events
//!    (`refund.initiated`, `refund.status-updated`, ...) that subscribers use for cache invalidation and
//!    downstream side effects. The in-process bus and any durable replacement satisfy the same delivery
//!    contract.

#[cfg(feature = "sqlite")]
mod db;

pub mod db_types;
pub mod events;
pub mod helpers;
mod pre_api;
pub mod traits;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

#[cfg(feature = "sqlite")]
pub use db::sqlite::SqliteDatabase;
pub use pre_api::{
    errors::WebhookApiError,
    ledger_api::LedgerApi,
    refund_flow_api::{RefundFlowApi, DEFAULT_MAX_REFUND_RETRIES},
    refund_objects,
    webhook_api::{InboundEvent, InboundEventKind, WebhookRouter, DEFAULT_EVENT_TTL_SECS},
};
pub use traits::{
    GatewayError,
    IdempotencyError,
    IdempotencyStore,
    LedgerDatabase,
    LedgerError,
    LedgerManagement,
    LedgerQueryError,
    RefundGateway,
};
