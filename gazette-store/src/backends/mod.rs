//! Storage backends
//!
//! - `memory`: in-process stores for development and tests
//! - `test`: instrumented wrappers with counters, failure injection and
//!   waiting helpers
//! - `sqlite`: durable storage for production

pub mod memory;
pub mod sqlite;

pub use memory::{MemoryDeliveryLog, MemorySubscriberStore};
pub use sqlite::{SqliteStore, latest_schema_version};
pub use test::{TestDeliveryLog, TestSubscriberStore};
