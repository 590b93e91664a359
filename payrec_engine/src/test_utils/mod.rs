//! Helpers for integration tests: throwaway SQLite databases and a scriptable in-memory gateway.
#[cfg(feature = "sqlite")]
pub mod prepare_env;
pub mod test_gateway;

pub use test_gateway::{SubmitScript, TestGateway};
