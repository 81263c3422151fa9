//! Consumer group state
//!
//! A `ConsumerGroup` is the cursor of one logical set of readers over a stream:
//! the id of the last entry handed out and the pending set of entries delivered
//! but not yet acknowledged, each attributed to the consumer that received it.
//!
//! Callers must synchronize access (the engine keeps groups behind its lock).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::broker::backend::{EntryId, PendingInfo};
use crate::utils::BrokerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub consumer: String,
    pub delivered_at: i64,
    pub deliveries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerGroup {
    pub name: String,
    pub last_delivered: EntryId,
    pub pending: BTreeMap<EntryId, PendingEntry>,
}

impl ConsumerGroup {
    /// Apply `change` to a copy of the group, hand the copy to `persist` and
    /// keep it only if that succeeds. On error the group is left untouched.
    pub fn update<T>(
        &mut self,
        change: impl FnOnce(&mut ConsumerGroup) -> T,
        persist: impl FnOnce(&ConsumerGroup) -> Result<(), BrokerError>,
    ) -> Result<T, BrokerError> {
        let mut next = self.clone();
        let outcome = change(&mut next);
        persist(&next)?;
        *self = next;
        Ok(outcome)
    }

    /// Create a group whose cursor starts after `last_delivered`.
    pub fn new(name: &str, last_delivered: EntryId) -> Self {
        Self {
            name: name.to_string(),
            last_delivered,
            pending: BTreeMap::new(),
        }
    }

    /// Record the first delivery of `id` to `consumer` and advance the cursor.
    pub fn deliver(&mut self, id: EntryId, consumer: &str, now: i64) {
        self.last_delivered = self.last_delivered.max(id);
        self.pending.insert(
            id,
            PendingEntry {
                consumer: consumer.to_string(),
                delivered_at: now,
                deliveries: 1,
            },
        );
    }

    /// Acknowledge `id`. Returns `false` if it was not pending.
    pub fn ack(&mut self, id: EntryId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Ids pending for at least `min_idle_ms`, oldest first.
    pub fn idle(&self, now: i64, min_idle_ms: i64) -> Vec<EntryId> {
        self.pending
            .iter()
            .filter(|(_, p)| now - p.delivered_at >= min_idle_ms)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Hand a pending entry to `consumer` as a fresh delivery.
    pub fn claim(&mut self, id: EntryId, consumer: &str, now: i64) -> bool {
        match self.pending.get_mut(&id) {
            Some(p) => {
                p.consumer = consumer.to_string();
                p.delivered_at = now;
                p.deliveries += 1;
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, id: EntryId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn pending_info(&self) -> Vec<PendingInfo> {
        self.pending
            .iter()
            .map(|(id, p)| PendingInfo {
                id: *id,
                consumer: p.consumer.clone(),
                delivered_at: p.delivered_at,
                deliveries: p.deliveries,
            })
            .collect()
    }
}
