//! Communicator
//!
//! The server side of the request/response bridge:
//! - `send` generates a task identity and appends a request envelope to the
//!   request stream; it never waits for the reply
//! - a single background correlator drains the response stream through the
//!   response consumer group, stores each reply in the correlation table and
//!   only then acknowledges the entry
//! - `recv` waits on the table for one task identity until a deadline
//! - a sweeper drops replies nobody waited for
//!
//! The correlator is started once by `initialize` and never restarted. A
//! broker failure stops it for good and is logged at error level. From then
//! on `is_receiving` is false, `send` refuses new work and `stopped`
//! resolves, so the owning process can exit.
//!
//! If the process dies between storing a reply and acknowledging it, the reply
//! is lost with the process while the entry stays pending under
//! `correlator.consumer_name`. Nothing reclaims it; the caller sees a timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::StreamBroker;
use crate::config::{CorrelatorSettings, StreamSettings};
use crate::correlation::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::correlation::table::CorrelationTable;
use crate::correlation::task_id::TaskId;
use crate::utils::BrokerError;

pub struct Communicator {
    broker: Arc<dyn StreamBroker>,
    streams: StreamSettings,
    poll_interval: Duration,
    table: Arc<CorrelationTable>,
    will_recv: Arc<AtomicBool>,
    receiving: Arc<AtomicBool>,
    stopped: Arc<Notify>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Communicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Communicator")
            .field("streams", &self.streams)
            .field("waiting_replies", &self.table.len())
            .field("receiving", &self.is_receiving())
            .finish()
    }
}

impl Communicator {
    /// Create both consumer groups (idempotently) and start the correlator and
    /// the sweeper. Must be called from within a Tokio runtime.
    pub async fn initialize(
        broker: Arc<dyn StreamBroker>,
        streams: StreamSettings,
        correlator: CorrelatorSettings,
    ) -> Result<Arc<Self>, BrokerError> {
        broker
            .create_group(&streams.request_stream, &streams.request_group)
            .await?;
        broker
            .create_group(&streams.response_stream, &streams.response_group)
            .await?;

        let communicator = Arc::new(Self {
            broker,
            streams,
            poll_interval: Duration::from_millis(correlator.poll_interval_ms.max(1)),
            table: Arc::new(CorrelationTable::new()),
            will_recv: Arc::new(AtomicBool::new(true)),
            receiving: Arc::new(AtomicBool::new(true)),
            stopped: Arc::new(Notify::new()),
            sweeper: Mutex::new(None),
        });

        tokio::spawn(recv_loop(
            communicator.broker.clone(),
            communicator.streams.clone(),
            correlator.consumer_name.clone(),
            communicator.table.clone(),
            communicator.will_recv.clone(),
            communicator.receiving.clone(),
            communicator.stopped.clone(),
        ));
        let sweeper = tokio::spawn(sweep_loop(
            communicator.table.clone(),
            Duration::from_secs(correlator.result_ttl_secs),
            Duration::from_secs(correlator.sweep_interval_secs.max(1)),
        ));
        *communicator
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(sweeper);

        info!(
            request_stream = %communicator.streams.request_stream,
            response_stream = %communicator.streams.response_stream,
            consumer = %correlator.consumer_name,
            "Communicator initialized"
        );
        Ok(communicator)
    }

    /// Publish `message` as a new task and return its identity.
    ///
    /// No validation happens here. A broker failure is returned as is, and
    /// once the correlator has stopped every call fails with `BrokerError::Closed`.
    pub async fn send<M: Serialize>(&self, message: &M) -> Result<TaskId, BrokerError> {
        if !self.is_receiving() {
            return Err(BrokerError::Closed);
        }
        let task_id = TaskId::generate();
        let dump = serde_json::to_string(&RequestEnvelope {
            task_id: task_id.clone(),
            message,
        })?;

        let entry_id = self
            .broker
            .append(&self.streams.request_stream, dump)
            .await?;
        debug!(task_id = %task_id, entry_id, "Dispatched task");
        Ok(task_id)
    }

    /// Wait up to `timeout` for the reply to `task_id`.
    ///
    /// Each reply is returned to exactly one caller. `None` means the deadline passed.
    pub async fn recv(&self, task_id: &TaskId, timeout: Duration) -> Option<Value> {
        let reply = self.table.wait(task_id, timeout, self.poll_interval).await;
        if reply.is_none() {
            warn!(task_id = %task_id, ?timeout, "Timed out waiting for reply");
        }
        reply
    }

    /// Stop correlating: flag the loop, close the broker handle and stop the sweeper.
    ///
    /// The correlator exits once its pending read returns, which closing the
    /// handle forces for the brokers in this crate.
    pub async fn disconnect(&self) {
        self.will_recv.store(false, Ordering::SeqCst);
        self.broker.close().await;

        if let Some(sweeper) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sweeper.abort();
        }
        info!("Communicator disconnected");
    }

    /// Whether the correlator loop is still running.
    pub fn is_receiving(&self) -> bool {
        self.receiving.load(Ordering::SeqCst)
    }

    /// Resolves once the correlator loop has exited, for whatever reason.
    pub async fn stopped(&self) {
        loop {
            let stopped = self.stopped.notified();
            tokio::pin!(stopped);
            stopped.as_mut().enable();

            if !self.is_receiving() {
                return;
            }
            stopped.await;
        }
    }

    pub fn table(&self) -> &CorrelationTable {
        &self.table
    }
}

async fn recv_loop(
    broker: Arc<dyn StreamBroker>,
    streams: StreamSettings,
    consumer: String,
    table: Arc<CorrelationTable>,
    will_recv: Arc<AtomicBool>,
    receiving: Arc<AtomicBool>,
    stopped: Arc<Notify>,
) {
    correlate(&broker, &streams, &consumer, &table, &will_recv).await;
    receiving.store(false, Ordering::SeqCst);
    stopped.notify_waiters();
}

async fn correlate(
    broker: &Arc<dyn StreamBroker>,
    streams: &StreamSettings,
    consumer: &str,
    table: &CorrelationTable,
    will_recv: &AtomicBool,
) {
    while will_recv.load(Ordering::SeqCst) {
        let entries = match broker
            .read_group(
                &streams.response_stream,
                &streams.response_group,
                consumer,
                1,
            )
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                if will_recv.load(Ordering::SeqCst) {
                    error!(error = %e, "Correlator stopped: broker read failed");
                } else {
                    debug!(error = %e, "Correlator read ended by disconnect");
                }
                break;
            }
        };

        for entry in entries {
            match serde_json::from_str::<ResponseEnvelope<Value>>(&entry.payload) {
                Ok(envelope) => {
                    let task_id = envelope.task_id;
                    if table.insert(task_id.clone(), envelope.message) {
                        debug!(task_id = %task_id, entry_id = entry.id, "Stored reply");
                    } else {
                        warn!(task_id = %task_id, entry_id = entry.id, "Ignoring duplicate reply");
                    }
                }
                Err(e) => {
                    warn!(entry_id = entry.id, error = %e, "Skipping malformed reply");
                }
            }

            if let Err(e) = broker
                .ack(&streams.response_stream, &streams.response_group, entry.id)
                .await
            {
                if will_recv.load(Ordering::SeqCst) {
                    error!(entry_id = entry.id, error = %e, "Correlator stopped: ack failed");
                }
                return;
            }
        }
    }
}

async fn sweep_loop(table: Arc<CorrelationTable>, ttl: Duration, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        interval.tick().await;
        let orphaned = table.sweep(ttl);
        if orphaned > 0 {
            info!(orphaned, "Swept replies nobody waited for");
        }
    }
}
