//! WebSocket broker server
//!
//! This file exposes a `StreamBroker` to other processes. Responsibilities:
//! - Accept TCP/WebSocket connections and create a `Client` for each one
//! - Parse `ClientMessage` frames and run every request on its own task, so a
//!   blocking `read_group` never holds up appends or acks on the same socket
//! - Send each `ServerMessage` reply back through the client's channel
//! - Abort the connection's in-flight requests when it goes away. An aborted
//!   read has not taken anything from the group, so no entry is stranded.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::{Broker, StreamBroker};
use crate::client::Client;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::AppError;

/// Bind `addr` and serve `broker` until the listener fails.
pub async fn start_broker_server(addr: &str, broker: Arc<dyn StreamBroker>) -> Result<(), AppError> {
    let listener = TcpListener::bind(addr).await?;
    info!("Broker server listening on ws://{addr}");
    serve(listener, broker).await;
    Ok(())
}

/// Accept connections on an already bound listener.
pub async fn serve(listener: TcpListener, broker: Arc<dyn StreamBroker>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "Accepted broker connection");
                spawn(handle_connection(stream, broker.clone()));
            }
            Err(e) => {
                warn!(error = %e, "Failed to accept broker connection");
                break;
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, broker: Arc<dyn StreamBroker>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(error = %e, "WebSocket handshake error");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let client = Client::new(tx);
    info!(client = %client.id, "Broker client connected");

    {
        let client_id = client.id.clone();
        spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    warn!(client = %client_id, error = %e, "Failed to send reply");
                    break;
                }
            }
            debug!(client = %client_id, "Send loop closed");
        });
    }

    let mut requests = JoinSet::new();

    while let Some(frame) = ws_receiver.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(e) => {
                warn!(client = %client.id, error = %e, "Broker connection failed");
                break;
            }
        };
        if msg.is_close() {
            break;
        }
        if !msg.is_text() {
            continue;
        }
        let Ok(text) = msg.to_text() else {
            continue;
        };

        // reap finished request tasks
        while requests.try_join_next().is_some() {}

        match serde_json::from_str::<ClientMessage>(text) {
            Ok(request) => {
                let broker = broker.clone();
                let client = client.clone();
                requests.spawn(async move {
                    let reply = execute(broker.as_ref(), request).await;
                    match serde_json::to_string(&reply) {
                        Ok(text) => {
                            client.send_text(text);
                        }
                        Err(e) => warn!(error = %e, "Failed to serialize reply"),
                    }
                });
            }
            Err(err) => {
                warn!(
                    client = %client.id,
                    error = %err,
                    "Invalid client message: {}",
                    text.chars().take(100).collect::<String>()
                );
                let reply = ServerMessage::Error {
                    request_id: None,
                    message: format!("invalid request: {err}"),
                };
                if let Ok(text) = serde_json::to_string(&reply) {
                    client.send_text(text);
                }
            }
        }
    }

    requests.abort_all();
    info!(client = %client.id, "Broker client disconnected");
}

/// Run one request against the broker and build its reply.
pub async fn execute(broker: &dyn StreamBroker, request: ClientMessage) -> ServerMessage {
    let request_id = request.request_id();

    let result = match request {
        ClientMessage::CreateGroup { stream, group, .. } => broker
            .create_group(&stream, &group)
            .await
            .map(|created| ServerMessage::GroupCreated {
                request_id,
                created,
            }),
        ClientMessage::Append {
            stream, payload, ..
        } => broker
            .append(&stream, payload)
            .await
            .map(|id| ServerMessage::Appended { request_id, id }),
        ClientMessage::ReadGroup {
            stream,
            group,
            consumer,
            count,
            ..
        } => broker
            .read_group(&stream, &group, &consumer, count.min(Broker::MAX_BATCH))
            .await
            .map(|entries| ServerMessage::Entries {
                request_id,
                entries,
            }),
        ClientMessage::Ack {
            stream, group, id, ..
        } => broker
            .ack(&stream, &group, id)
            .await
            .map(|acknowledged| ServerMessage::Acked {
                request_id,
                acknowledged,
            }),
        ClientMessage::ClaimIdle {
            stream,
            group,
            consumer,
            min_idle_ms,
            count,
            ..
        } => broker
            .claim_idle(
                &stream,
                &group,
                &consumer,
                std::time::Duration::from_millis(min_idle_ms),
                count.min(Broker::MAX_BATCH),
            )
            .await
            .map(|entries| ServerMessage::Entries {
                request_id,
                entries,
            }),
    };

    result.unwrap_or_else(|e| ServerMessage::Error {
        request_id: Some(request_id),
        message: e.to_string(),
    })
}
