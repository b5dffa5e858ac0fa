pub mod address;
pub mod logging;
pub mod model;

pub use address::{EmailAddress, ValidationError};
pub use model::{
    DeliveryLogRecord, DeliveryOutcome, DeliveryRecordId, Issue, NewSubscriber, Subscriber,
    SubscriberId, issue_ordinal,
};
pub use tracing;

/// Process-wide lifecycle signal, broadcast to every long-running task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
