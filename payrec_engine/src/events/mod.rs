mod bus;
mod event_types;

pub use bus::{
    DeadLetterRecord,
    EventBus,
    EventBusError,
    EventHandlerError,
    FailureMode,
    InProcessEventBus,
    ReplayReport,
    SubscriberFn,
};
pub use event_types::*;
