//! Correlation table
//!
//! Maps a task identity to the reply that arrived for it. One writer (the
//! inbound correlator) inserts; any number of waiters pop their own key.
//!
//! Invariants:
//! - an inserted key is never overwritten
//! - a popped key never reappears: it is remembered until the sweep drops it,
//!   so a redelivered duplicate reply is refused
//! - check-and-remove happens under one lock, so a reply is handed to at
//!   most one waiter
//!
//! Waiters are woken by `Notify` on every insert and also re-check on a fixed
//! interval, so the timeout contract does not depend on the wake-up.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::correlation::task_id::TaskId;

#[derive(Debug)]
struct Slot {
    message: Value,
    inserted_at: Instant,
}

#[derive(Debug, Default)]
struct Entries {
    ready: HashMap<TaskId, Slot>,
    delivered: HashMap<TaskId, Instant>,
}

#[derive(Debug, Default)]
pub struct CorrelationTable {
    entries: Mutex<Entries>,
    inserted: Notify,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the reply for `task_id`. Returns `false`, leaving the table
    /// untouched, if a reply for it is already stored or was already popped.
    pub fn insert(&self, task_id: TaskId, message: Value) -> bool {
        {
            let mut entries = self.lock();
            if entries.delivered.contains_key(&task_id) || entries.ready.contains_key(&task_id) {
                return false;
            }
            entries.ready.insert(
                task_id,
                Slot {
                    message,
                    inserted_at: Instant::now(),
                },
            );
        }
        self.inserted.notify_waiters();
        true
    }

    /// Remove and return the reply for `task_id`, if it has arrived.
    pub fn pop(&self, task_id: &TaskId) -> Option<Value> {
        let mut entries = self.lock();
        let slot = entries.ready.remove(task_id)?;
        entries.delivered.insert(task_id.clone(), Instant::now());
        Some(slot.message)
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.lock().ready.contains_key(task_id)
    }

    /// Replies waiting to be popped.
    pub fn len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until the reply for `task_id` arrives or `timeout` elapses.
    ///
    /// Returns no later than `timeout + poll_interval` even if no wake-up ever
    /// comes. `None` means the deadline passed; a reply that shows up later
    /// stays in the table until the sweep removes it.
    pub async fn wait(
        &self,
        task_id: &TaskId,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Option<Value> {
        let deadline = Instant::now() + timeout;

        loop {
            let inserted = self.inserted.notified();
            tokio::pin!(inserted);
            inserted.as_mut().enable();

            if let Some(message) = self.pop(task_id) {
                return Some(message);
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let nap = poll_interval.min(deadline - now);
            let _ = tokio::time::timeout(nap, inserted).await;
        }
    }

    /// Drop unclaimed replies and delivery records older than `ttl`.
    /// Returns the number of unclaimed replies removed.
    pub fn sweep(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();

        let before = entries.ready.len();
        entries
            .ready
            .retain(|_, slot| now.duration_since(slot.inserted_at) < ttl);
        let orphaned = before - entries.ready.len();

        entries
            .delivered
            .retain(|_, popped_at| now.duration_since(*popped_at) < ttl);

        orphaned
    }
}
