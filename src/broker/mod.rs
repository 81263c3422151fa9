//! broker
//!
//! The stream broker the correlation bridge runs on: the `StreamBroker`
//! contract, consumer group bookkeeping and the in-process `Broker` engine
//! (optionally durable through `persistence::StreamStore`).

pub mod backend;
pub mod engine;
pub mod group;

pub use backend::{EntryId, PendingInfo, StreamBroker, StreamEntry};
pub use engine::{Broker, Retention};
