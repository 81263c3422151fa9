//! Broker engine
//!
//! This module contains the in-process stream broker responsible for:
//! - keeping named append-only streams with strictly increasing entry ids
//! - tracking consumer groups: a cursor plus a pending set of delivered but
//!   unacknowledged entries per group
//! - blocking group reads that wake up when an entry is appended
//! - reclaiming entries that stayed pending too long (`claim_idle`)
//! - writing every state change through a `StreamStore` when one is attached
//!
//! Concurrency and usage notes:
//! - All state lives behind one `std::sync::Mutex` that is never held across
//!   an `.await`. Blocked readers wait on a `Notify` outside the lock.
//! - A reader registers for the wake-up before it checks for entries, so an
//!   append that lands between the check and the wait is never missed.
//! - Taking entries for a reader happens entirely under the lock with no
//!   suspension point, so cancelling a blocked `read_group` never loses an entry.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::broker::backend::{EntryId, PendingInfo, StreamBroker, StreamEntry};
use crate::broker::group::ConsumerGroup;
use crate::persistence::{StoredEntry, StreamStore};
use crate::utils::BrokerError;

/// Retention policy applied on every append.
///
/// Only entries that every group has already been handed and that are not
/// pending anywhere are eligible for removal.
#[derive(Debug, Clone, Copy, Default)]
pub struct Retention {
    pub max_entries_per_stream: Option<usize>,
    pub entry_ttl_secs: Option<i64>,
}

#[derive(Debug, Default)]
struct Stream {
    entries: BTreeMap<EntryId, StoredEntry>,
    last_id: EntryId,
    groups: HashMap<String, ConsumerGroup>,
}

impl Stream {
    fn is_removable(&self, id: EntryId) -> bool {
        self.groups
            .values()
            .all(|g| g.last_delivered >= id && !g.is_pending(id))
    }

    /// Drop entries past the retention limits, returning the removed ids.
    fn trim(&mut self, retention: Retention, now: i64) -> Vec<EntryId> {
        let mut removed = Vec::new();

        if let Some(ttl) = retention.entry_ttl_secs {
            let expiry_time = now - ttl * 1000;
            let expired: Vec<_> = self
                .entries
                .iter()
                .filter(|(id, e)| e.appended_at < expiry_time && self.is_removable(**id))
                .map(|(id, _)| *id)
                .collect();
            for id in expired {
                self.entries.remove(&id);
                removed.push(id);
            }
        }

        if let Some(max) = retention.max_entries_per_stream {
            if self.entries.len() > max {
                let excess = self.entries.len() - max;
                let oldest: Vec<_> = self
                    .entries
                    .keys()
                    .copied()
                    .filter(|id| self.is_removable(*id))
                    .take(excess)
                    .collect();
                for id in oldest {
                    self.entries.remove(&id);
                    removed.push(id);
                }
            }
        }

        removed
    }
}

pub struct Broker {
    streams: Mutex<HashMap<String, Stream>>,
    appended: Notify,
    closed: AtomicBool,
    store: Option<StreamStore>,
    retention: Retention,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("durable", &self.store.is_some())
            .field("retention", &self.retention)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl Broker {
    /// Default upper bound on entries returned by one read or claim.
    pub const MAX_BATCH: usize = 100;

    /// A purely in-memory broker: everything is lost when it is dropped.
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            appended: Notify::new(),
            closed: AtomicBool::new(false),
            store: None,
            retention: Retention::default(),
        }
    }

    /// A durable broker restored from `store`.
    pub fn with_store(store: StreamStore, retention: Retention) -> Result<Self, BrokerError> {
        let mut streams = HashMap::new();
        for loaded in store.load()? {
            let stream = Stream {
                entries: loaded.entries.into_iter().collect(),
                last_id: loaded.last_id,
                groups: loaded
                    .groups
                    .into_iter()
                    .map(|g| (g.name.clone(), g))
                    .collect(),
            };
            info!(
                stream = %loaded.name,
                entries = stream.entries.len(),
                groups = stream.groups.len(),
                "Restored stream"
            );
            streams.insert(loaded.name, stream);
        }

        Ok(Self {
            streams: Mutex::new(streams),
            appended: Notify::new(),
            closed: AtomicBool::new(false),
            store: Some(store),
            retention,
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Stream>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn persist_group(&self, stream: &str, group: &ConsumerGroup) -> Result<(), BrokerError> {
        match &self.store {
            Some(store) => store.save_group(stream, group),
            None => Ok(()),
        }
    }

    fn group_mut<'a>(
        streams: &'a mut HashMap<String, Stream>,
        stream: &str,
        group: &str,
    ) -> Result<(&'a mut ConsumerGroup, &'a BTreeMap<EntryId, StoredEntry>), BrokerError> {
        let unknown = || BrokerError::UnknownGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        };
        let s = streams.get_mut(stream).ok_or_else(unknown)?;
        let g = s.groups.get_mut(group).ok_or_else(unknown)?;
        Ok((g, &s.entries))
    }

    /// Deliver up to `count` new entries to `consumer`, without blocking.
    fn deliver_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, BrokerError> {
        let mut streams = self.lock();
        let (g, entries) = Self::group_mut(&mut streams, stream, group)?;
        let now = Self::now();

        let delivered: Vec<_> = entries
            .range(g.last_delivered + 1..)
            .take(count.max(1))
            .map(|(id, e)| StreamEntry {
                id: *id,
                payload: e.payload.clone(),
            })
            .collect();

        if delivered.is_empty() {
            return Ok(delivered);
        }

        g.update(
            |g| {
                for entry in &delivered {
                    g.deliver(entry.id, consumer, now);
                }
            },
            |g| self.persist_group(stream, g),
        )?;

        debug!(
            stream,
            group,
            consumer,
            count = delivered.len(),
            "Delivered entries"
        );
        Ok(delivered)
    }

    /// Pending entries of `group`, oldest first.
    pub fn pending(&self, stream: &str, group: &str) -> Result<Vec<PendingInfo>, BrokerError> {
        let mut streams = self.lock();
        let (g, _) = Self::group_mut(&mut streams, stream, group)?;
        Ok(g.pending_info())
    }

    /// Number of entries currently retained in `stream`.
    pub fn stream_len(&self, stream: &str) -> usize {
        self.lock().get(stream).map_or(0, |s| s.entries.len())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamBroker for Broker {
    async fn create_group(&self, stream: &str, group: &str) -> Result<bool, BrokerError> {
        self.ensure_open()?;
        let mut streams = self.lock();
        let is_new_stream = !streams.contains_key(stream);
        let s = streams.entry(stream.to_string()).or_default();

        if s.groups.contains_key(group) {
            return Ok(false);
        }

        let created = ConsumerGroup::new(group, s.last_id);
        if let Some(store) = &self.store {
            if is_new_stream {
                store.save_stream(stream, s.last_id)?;
            }
            store.save_group(stream, &created)?;
        }
        s.groups.insert(group.to_string(), created);

        info!(stream, group, "Created consumer group");
        Ok(true)
    }

    async fn append(&self, stream: &str, payload: String) -> Result<EntryId, BrokerError> {
        self.ensure_open()?;
        let id = {
            let mut streams = self.lock();
            let s = streams.entry(stream.to_string()).or_default();
            let now = Self::now();
            let id = s.last_id + 1;
            let entry = StoredEntry {
                payload,
                appended_at: now,
            };

            if let Some(store) = &self.store {
                store.append_entry(stream, id, &entry)?;
            }
            s.last_id = id;
            s.entries.insert(id, entry);

            // the entry is stored: trimming failures no longer fail the append
            let removed = s.trim(self.retention, now);
            if !removed.is_empty() {
                debug!(stream, removed = removed.len(), "Trimmed stream");
                if let Some(store) = &self.store {
                    if let Err(e) = store.remove_entries(stream, &removed) {
                        warn!(stream, error = %e, "Failed to drop trimmed entries from storage");
                    }
                }
            }
            id
        };

        self.appended.notify_waiters();
        Ok(id)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, BrokerError> {
        loop {
            let appended = self.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            self.ensure_open()?;
            let delivered = self.deliver_new(stream, group, consumer, count)?;
            if !delivered.is_empty() {
                return Ok(delivered);
            }

            appended.await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, id: EntryId) -> Result<bool, BrokerError> {
        self.ensure_open()?;
        let mut streams = self.lock();
        let (g, _) = Self::group_mut(&mut streams, stream, group)?;

        if !g.is_pending(id) {
            warn!(stream, group, entry_id = id, "Ack for an entry that is not pending");
            return Ok(false);
        }
        g.update(|g| g.ack(id), |g| self.persist_group(stream, g))
    }

    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, BrokerError> {
        self.ensure_open()?;
        let mut streams = self.lock();
        let (g, entries) = Self::group_mut(&mut streams, stream, group)?;
        let now = Self::now();
        let min_idle_ms = i64::try_from(min_idle.as_millis()).unwrap_or(i64::MAX);

        let idle: Vec<_> = g
            .idle(now, min_idle_ms)
            .into_iter()
            .take(count.max(1))
            .collect();
        if idle.is_empty() {
            return Ok(Vec::new());
        }

        let claimed = g.update(
            |g| {
                let mut claimed = Vec::new();
                for id in idle {
                    match entries.get(&id) {
                        Some(e) => {
                            g.claim(id, consumer, now);
                            claimed.push(StreamEntry {
                                id,
                                payload: e.payload.clone(),
                            });
                        }
                        // trimmed away: nothing left to redeliver
                        None => {
                            g.ack(id);
                        }
                    }
                }
                claimed
            },
            |g| self.persist_group(stream, g),
        )?;

        if !claimed.is_empty() {
            info!(
                stream,
                group,
                consumer,
                claimed = claimed.len(),
                "Claimed idle pending entries"
            );
        }
        Ok(claimed)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Some(store) = &self.store {
                if let Err(e) = store.flush() {
                    warn!(error = %e, "Failed to flush stream store on close");
                }
            }
            self.appended.notify_waiters();
        }
    }
}
