//! Networked `StreamBroker`
//!
//! `RemoteBroker` speaks the broker wire protocol over one WebSocket
//! connection. Calls from any number of tasks are multiplexed on it: each
//! request gets a fresh `request_id` and a oneshot slot in `pending`, and the
//! receive loop routes every reply to its slot.
//!
//! Losing the connection fails every in-flight and later call with
//! `BrokerError::Closed`. Nothing reconnects: callers treat that as fatal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::spawn;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::{EntryId, StreamBroker, StreamEntry};
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::BrokerError;

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<ServerMessage>>>>;

fn lock_pending(
    pending: &PendingReplies,
) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<ServerMessage>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a request's reply slot if the call is dropped before the reply arrives.
struct PendingSlot<'a> {
    pending: &'a PendingReplies,
    request_id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        lock_pending(self.pending).remove(&self.request_id);
    }
}

pub struct RemoteBroker {
    url: String,
    sender: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    pending: PendingReplies,
    next_request_id: AtomicU64,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for RemoteBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBroker")
            .field("url", &self.url)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl RemoteBroker {
    /// Connect to a broker server at `url`, e.g. `ws://127.0.0.1:6380`.
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let (ws_stream, _response) = connect_async(url).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        {
            let url = url.to_string();
            spawn(async move {
                while let Some(msg) = rx.recv().await {
                    if let Err(e) = ws_sender.send(msg).await {
                        warn!(%url, error = %e, "Failed to send broker request");
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });
        }

        {
            let url = url.to_string();
            let pending = pending.clone();
            let closed = closed.clone();
            spawn(async move {
                while let Some(Ok(msg)) = ws_receiver.next().await {
                    if !msg.is_text() {
                        continue;
                    }
                    let Ok(text) = msg.to_text() else {
                        continue;
                    };
                    let reply = match serde_json::from_str::<ServerMessage>(text) {
                        Ok(reply) => reply,
                        Err(e) => {
                            warn!(%url, error = %e, "Unreadable broker reply");
                            continue;
                        }
                    };
                    match reply.request_id() {
                        Some(request_id) => {
                            if let Some(slot) = lock_pending(&pending).remove(&request_id) {
                                let _ = slot.send(reply);
                            } else {
                                debug!(request_id, "Reply for an abandoned request");
                            }
                        }
                        None => warn!(%url, ?reply, "Broker rejected a request"),
                    }
                }

                closed.store(true, Ordering::SeqCst);
                lock_pending(&pending).clear();
                info!(%url, "Broker connection closed");
            });
        }

        info!(%url, "Connected to broker");
        Ok(Self {
            url: url.to_string(),
            sender: Mutex::new(Some(tx)),
            pending,
            next_request_id: AtomicU64::new(1),
            closed,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(
        &self,
        build: impl FnOnce(u64) -> ClientMessage,
    ) -> Result<ServerMessage, BrokerError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let text = serde_json::to_string(&build(request_id))?;

        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(request_id, tx);
        let _slot = PendingSlot {
            pending: &self.pending,
            request_id,
        };

        // checked after registering so a concurrent close cannot miss this slot
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        let sent = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|sender| sender.send(WsMessage::text(text)).is_ok());
        if !sent {
            return Err(BrokerError::Closed);
        }

        match rx.await.map_err(|_| BrokerError::Closed)? {
            ServerMessage::Error { message, .. } => Err(BrokerError::Remote(message)),
            reply => Ok(reply),
        }
    }
}

fn unexpected(reply: ServerMessage) -> BrokerError {
    BrokerError::Protocol(format!("unexpected reply: {reply:?}"))
}

#[async_trait]
impl StreamBroker for RemoteBroker {
    async fn create_group(&self, stream: &str, group: &str) -> Result<bool, BrokerError> {
        let reply = self
            .call(|request_id| ClientMessage::CreateGroup {
                request_id,
                stream: stream.to_string(),
                group: group.to_string(),
            })
            .await?;
        match reply {
            ServerMessage::GroupCreated { created, .. } => Ok(created),
            other => Err(unexpected(other)),
        }
    }

    async fn append(&self, stream: &str, payload: String) -> Result<EntryId, BrokerError> {
        let reply = self
            .call(|request_id| ClientMessage::Append {
                request_id,
                stream: stream.to_string(),
                payload,
            })
            .await?;
        match reply {
            ServerMessage::Appended { id, .. } => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, BrokerError> {
        let reply = self
            .call(|request_id| ClientMessage::ReadGroup {
                request_id,
                stream: stream.to_string(),
                group: group.to_string(),
                consumer: consumer.to_string(),
                count,
            })
            .await?;
        match reply {
            ServerMessage::Entries { entries, .. } => Ok(entries),
            other => Err(unexpected(other)),
        }
    }

    async fn ack(&self, stream: &str, group: &str, id: EntryId) -> Result<bool, BrokerError> {
        let reply = self
            .call(|request_id| ClientMessage::Ack {
                request_id,
                stream: stream.to_string(),
                group: group.to_string(),
                id,
            })
            .await?;
        match reply {
            ServerMessage::Acked { acknowledged, .. } => Ok(acknowledged),
            other => Err(unexpected(other)),
        }
    }

    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, BrokerError> {
        let min_idle_ms = u64::try_from(min_idle.as_millis()).unwrap_or(u64::MAX);
        let reply = self
            .call(|request_id| ClientMessage::ClaimIdle {
                request_id,
                stream: stream.to_string(),
                group: group.to_string(),
                consumer: consumer.to_string(),
                min_idle_ms,
                count,
            })
            .await?;
        match reply {
            ServerMessage::Entries { entries, .. } => Ok(entries),
            other => Err(unexpected(other)),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // dropping the sender ends the send loop, which closes the socket
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        lock_pending(&self.pending).clear();
    }
}
