//! Broker wire protocol
//!
//! Every frame is a JSON object tagged by `"type"`. Requests carry a
//! client-chosen `request_id` that the matching reply echoes, so one
//! connection can have many requests in flight, including blocking reads.

use serde::{Deserialize, Serialize};

use crate::broker::{EntryId, StreamEntry};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "create_group")]
    CreateGroup {
        request_id: u64,
        stream: String,
        group: String,
    },
    #[serde(rename = "append")]
    Append {
        request_id: u64,
        stream: String,
        payload: String,
    },
    #[serde(rename = "read_group")]
    ReadGroup {
        request_id: u64,
        stream: String,
        group: String,
        consumer: String,
        count: usize,
    },
    #[serde(rename = "ack")]
    Ack {
        request_id: u64,
        stream: String,
        group: String,
        id: EntryId,
    },
    #[serde(rename = "claim_idle")]
    ClaimIdle {
        request_id: u64,
        stream: String,
        group: String,
        consumer: String,
        min_idle_ms: u64,
        count: usize,
    },
}

impl ClientMessage {
    pub fn request_id(&self) -> u64 {
        match self {
            ClientMessage::CreateGroup { request_id, .. }
            | ClientMessage::Append { request_id, .. }
            | ClientMessage::ReadGroup { request_id, .. }
            | ClientMessage::Ack { request_id, .. }
            | ClientMessage::ClaimIdle { request_id, .. } => *request_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "group_created")]
    GroupCreated { request_id: u64, created: bool },
    #[serde(rename = "appended")]
    Appended { request_id: u64, id: EntryId },
    #[serde(rename = "entries")]
    Entries {
        request_id: u64,
        entries: Vec<StreamEntry>,
    },
    #[serde(rename = "acked")]
    Acked { request_id: u64, acknowledged: bool },
    /// `request_id` is absent when the request itself could not be parsed.
    #[serde(rename = "error")]
    Error {
        request_id: Option<u64>,
        message: String,
    },
}

impl ServerMessage {
    pub fn request_id(&self) -> Option<u64> {
        match self {
            ServerMessage::GroupCreated { request_id, .. }
            | ServerMessage::Appended { request_id, .. }
            | ServerMessage::Entries { request_id, .. }
            | ServerMessage::Acked { request_id, .. } => Some(*request_id),
            ServerMessage::Error { request_id, .. } => *request_id,
        }
    }
}
