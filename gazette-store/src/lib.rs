//! Persistence for subscribers and delivery outcomes
//!
//! [`SubscriberStore`] and [`DeliveryLogStore`] are the seams the delivery
//! pipeline talks to; the backends in [`backends`] implement them.

pub mod backends;
pub mod config;
pub mod error;
pub mod store;

pub use backends::{
    MemoryDeliveryLog, MemorySubscriberStore, SqliteStore, TestDeliveryLog, TestSubscriberStore,
};
pub use config::{StoreConfig, Stores};
pub use error::{Result, StoreError};
pub use store::{DeliveryLogStore, PageRequest, SubscriberPage, SubscriberStore};
