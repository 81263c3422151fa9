//! Worker dispatch loop
//!
//! One `Worker` runs per process. It blocks on the request consumer group,
//! takes one entry at a time and for each one:
//! 1. decodes the request envelope
//! 2. runs the unit of work, turning any failure (a panic included) into an
//!    error reply
//! 3. acknowledges the request entry
//! 4. appends the response envelope to the response stream
//!
//! Broker failures in steps 1, 3 and 4 end the loop. A worker that dies
//! between reading and acknowledging leaves the entry pending under its
//! consumer name; another worker configured with `reclaim_idle_ms` picks it up
//! once it has been idle that long.

use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use rand::rngs::OsRng;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::broker::{EntryId, StreamBroker, StreamEntry};
use crate::config::{StreamSettings, WorkerSettings};
use crate::correlation::{ErrorReply, RequestEnvelope, ResponseEnvelope};
use crate::utils::BrokerError;
use crate::worker::job::{JobError, UnitOfWork};

pub struct Worker<J> {
    broker: Arc<dyn StreamBroker>,
    job: Arc<J>,
    streams: StreamSettings,
    consumer: String,
    reclaim_idle: Option<Duration>,
}

impl<J> std::fmt::Debug for Worker<J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("consumer", &self.consumer)
            .field("request_stream", &self.streams.request_stream)
            .field("reclaim_idle", &self.reclaim_idle)
            .finish()
    }
}

fn generated_consumer_name() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    format!("consumer-{}", hex::encode(bytes))
}

impl<J: UnitOfWork> Worker<J> {
    pub fn new(
        broker: Arc<dyn StreamBroker>,
        job: J,
        streams: StreamSettings,
        settings: &WorkerSettings,
    ) -> Self {
        let consumer = settings
            .consumer_name
            .clone()
            .unwrap_or_else(generated_consumer_name);

        Self {
            broker,
            job: Arc::new(job),
            streams,
            consumer,
            reclaim_idle: settings.reclaim_idle_ms.map(Duration::from_millis),
        }
    }

    /// Name this worker reads under in the request consumer group.
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Process requests until the broker fails.
    pub async fn run(&self) -> Result<(), BrokerError> {
        self.broker
            .create_group(&self.streams.request_stream, &self.streams.request_group)
            .await?;
        info!(
            consumer = %self.consumer,
            stream = %self.streams.request_stream,
            group = %self.streams.request_group,
            "Worker started"
        );

        loop {
            self.step().await?;
        }
    }

    /// Take and handle the next request, blocking until one exists.
    /// Returns the number of entries handled.
    pub async fn step(&self) -> Result<usize, BrokerError> {
        let mut entries = Vec::new();
        if let Some(min_idle) = self.reclaim_idle {
            entries = self
                .broker
                .claim_idle(
                    &self.streams.request_stream,
                    &self.streams.request_group,
                    &self.consumer,
                    min_idle,
                    1,
                )
                .await?;
            if !entries.is_empty() {
                warn!(consumer = %self.consumer, entry_id = entries[0].id, "Reclaimed stuck request");
            }
        }
        if entries.is_empty() {
            entries = self
                .broker
                .read_group(
                    &self.streams.request_stream,
                    &self.streams.request_group,
                    &self.consumer,
                    1,
                )
                .await?;
        }

        let handled = entries.len();
        for entry in entries {
            self.handle(entry).await?;
        }
        Ok(handled)
    }

    async fn handle(&self, entry: StreamEntry) -> Result<(), BrokerError> {
        let envelope = match serde_json::from_str::<RequestEnvelope<Value>>(&entry.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                // no task id to answer to
                warn!(entry_id = entry.id, error = %e, "Skipping malformed request");
                self.ack(entry.id).await?;
                return Ok(());
            }
        };
        let task_id = envelope.task_id;
        info!(task_id = %task_id, entry_id = entry.id, "Received task");

        let outcome = match serde_json::from_value::<J::Request>(envelope.message) {
            Ok(request) => self.process(request).await,
            Err(e) => Err(JobError::Malformed(e.to_string())),
        };
        let message = match outcome {
            Ok(reply) => serde_json::to_value(reply)?,
            Err(e) => {
                warn!(task_id = %task_id, code = e.code(), error = %e, "Task failed");
                serde_json::to_value(ErrorReply::new(e.code(), e.to_string()))?
            }
        };

        self.ack(entry.id).await?;
        let dump = serde_json::to_string(&ResponseEnvelope {
            task_id: task_id.clone(),
            message,
        })?;
        self.broker
            .append(&self.streams.response_stream, dump)
            .await?;
        info!(task_id = %task_id, "Sent reply");
        Ok(())
    }

    /// Run the job on its own task so a panic is contained.
    async fn process(&self, request: J::Request) -> Result<J::Reply, JobError> {
        let job = self.job.clone();
        match tokio::spawn(async move { job.process(request).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(consumer = %self.consumer, error = %e, "Unit of work panicked");
                Err(JobError::Panicked)
            }
        }
    }

    async fn ack(&self, id: EntryId) -> Result<(), BrokerError> {
        self.broker
            .ack(&self.streams.request_stream, &self.streams.request_group, id)
            .await?;
        Ok(())
    }
}
