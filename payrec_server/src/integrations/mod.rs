pub mod gateway;

pub use gateway::{inbound_event_from_envelope, LiveGateway};
