//! Client representation
//!
//! `Client` models one connection to the broker server and holds the sending
//! side of the per-connection channel. Request tasks push their replies into
//! it and the connection's send loop writes them to the socket in order.

use tokio::sync::mpsc::UnboundedSender;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Client {
    pub id: String,
    pub sender: UnboundedSender<WsMessage>,
}

impl Client {
    /// Create a new client with a sender channel. The `id` is a UUID used to
    /// tell connections apart in logs.
    pub fn new(sender: UnboundedSender<WsMessage>) -> Self {
        Self {
            id: format!("client-{}", Uuid::new_v4()),
            sender,
        }
    }

    /// Queue a text frame for this client. Returns `false` once the connection is gone.
    pub fn send_text(&self, text: String) -> bool {
        self.sender.send(WsMessage::text(text)).is_ok()
    }
}
