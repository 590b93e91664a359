//! # SQLite backend for the payment ledger
//!
//! [`db`] contains the low-level database interactions: simple functions (rather than stateful structs) that
//! accept a `&mut SqliteConnection` argument. Callers obtain a connection from a pool, or open a transaction
//! as the need arises, and call through to the functions without any other changes.
//!
//! [`SqliteDatabase`] composes those functions into the engine's backend traits. The transaction boundaries
//! live there, one per trait method.
mod sqlite_impl;

pub mod db;
pub use sqlite_impl::SqliteDatabase;
