//! # Payment reconciliation engine public API
//!
//! The `pre_api` module exposes the programmatic API for the reconciliation engine. The API is modular, so
//! that clients can pick and choose the functionality they want, and different parts (say, the webhook
//! endpoint and an admin console) can be configured on different machines.
//!
//! * [`refund_flow_api`] is the primary API. It runs the refund submission lifecycle against the payment
//!   gateway, applies gateway callbacks to the ledger, and sweeps up refunds the gateway went quiet on.
//! * [`webhook_api`] sits in front of the flow API and gives inbound gateway events exactly-once semantics
//!   before dispatching them.
//! * [`ledger_api`] provides read access to orders and refunds, including audit histories and filtered
//!   searches.
//!
//! The other submodules hold support types shared by the APIs.
//!
//! # API usage
//!
//! The pattern for using all the APIs is the same. An API instance is created by supplying a database backend
//! that implements the specific backend traits required by the API.
//!
//! For example, to query refunds on the database:
//!
//! ```rust,ignore
//! use payrec_engine::{LedgerApi, SqliteDatabase};
//! let db = SqliteDatabase::new_with_url(...).await?;
//! // SqliteDatabase implements LedgerManagement
//! let api = LedgerApi::new(db);
//! let detail = api.refund_detail(refund_id).await?;
//! ```
pub mod errors;
pub mod ledger_api;
pub mod refund_flow_api;
pub mod refund_objects;
pub mod webhook_api;
