//! # Payment reconciliation server
//! This module hosts the HTTP surface of the payment reconciliation core. It is responsible for:
//! Listening for incoming webhook deliveries from the payment gateway and verifying their signatures.
//! Converting gateway envelopes into ledger-neutral events and handing them to the webhook router.
//! Exposing the refund lifecycle (create, cancel, retry, query) as a JSON API.
//! Running the background reconciliation worker and wiring up the event-bus subscribers.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! The server exposes the following routes:
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/webhooks/{gateway}`: The signed webhook intake for gateway event deliveries.
//! * `/refunds`: Create (`POST`) and search (`GET`) refunds.
//! * `/refunds/{id}`: Fetch one refund with its audit history.
//! * `/refunds/{id}/cancel`, `/refunds/{id}/retry`: Operator actions on a refund.
//! * `/events/dead-letters`, `/events/replay`: Dead-letter queue inspection and replay.

pub mod config;
pub mod data_objects;
pub mod errors;

pub mod helpers;
pub mod integrations;
pub mod reconcile_worker;
pub mod routes;
pub mod server;
pub mod subscribers;
pub mod webhook_routes;

#[cfg(test)]
mod endpoint_tests;
