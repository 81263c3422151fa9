//! The stream broker contract
//!
//! `StreamBroker` is the only thing the correlation core and the workers know
//! about the broker: named append-only streams, consumer groups with a cursor
//! and a pending set, blocking group reads and per-entry acknowledgment. The
//! in-process [`Broker`](crate::broker::Broker) and the networked
//! [`RemoteBroker`](crate::transport::RemoteBroker) both implement it.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::utils::BrokerError;

/// Broker-assigned id of a stream entry. Strictly increasing per stream.
pub type EntryId = u64;

/// One entry of a stream: the broker id plus the opaque serialized envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEntry {
    pub id: EntryId,
    pub payload: String,
}

/// Snapshot of one pending (delivered but unacknowledged) entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInfo {
    pub id: EntryId,
    pub consumer: String,
    /// Milliseconds since the UNIX epoch of the latest delivery.
    pub delivered_at: i64,
    pub deliveries: u32,
}

#[async_trait]
pub trait StreamBroker: Send + Sync {
    /// Create `group` on `stream`, creating the stream if needed. The group only
    /// sees entries appended after it was created. Returns `false` if it already existed.
    async fn create_group(&self, stream: &str, group: &str) -> Result<bool, BrokerError>;

    /// Append one opaque payload and return its id.
    async fn append(&self, stream: &str, payload: String) -> Result<EntryId, BrokerError>;

    /// Read up to `count` entries never delivered to `group`, blocking without a
    /// timeout until at least one exists. Returned entries are pending for `consumer`.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, BrokerError>;

    /// Remove `id` from the group's pending set. Returns `false` if it was not pending.
    async fn ack(&self, stream: &str, group: &str, id: EntryId) -> Result<bool, BrokerError>;

    /// Transfer up to `count` entries pending for at least `min_idle` to `consumer`
    /// and return them. Never blocks.
    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, BrokerError>;

    /// Close this handle. Blocked readers return `BrokerError::Closed`, as does every later call.
    async fn close(&self);
}
