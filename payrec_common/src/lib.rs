mod helpers;
mod money;

pub mod op;
mod secret;

pub use helpers::parse_boolean_flag;
pub use money::{MinorUnits, MinorUnitsError, DEFAULT_CURRENCY};
pub use secret::Secret;
