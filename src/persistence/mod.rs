//! The `persistence` module makes the broker's streams durable.
//!
//! Entries, stream cursors and consumer group pending sets are stored in an
//! embedded `sled` database so a restarted broker process resumes with the
//! same streams and the same unacknowledged entries.

pub mod sled_store;

pub use sled_store::{LoadedStream, StoredEntry, StreamStore};

#[cfg(test)]
mod tests;
