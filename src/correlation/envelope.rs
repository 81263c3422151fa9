//! Envelopes exchanged over the request and response streams
//!
//! Both streams carry one JSON document per entry:
//!
//! ```text
//! request:  {"task_id": "<64 hex>", "message": {"length": 4, "file_name": "<name>"}}
//! response: {"task_id": "<64 hex>", "message": {"count": 7}}
//!           {"task_id": "<64 hex>", "message": {"error": {"code": 404, "message": "File not found"}}}
//! ```
//!
//! The envelopes are generic over `message`; the correlation core only ever
//! handles it as an opaque `serde_json::Value`.

use serde::{Deserialize, Serialize};

use crate::correlation::task_id::TaskId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope<M> {
    pub task_id: TaskId,
    pub message: M,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope<M> {
    pub task_id: TaskId,
    pub message: M,
}

/// Ask a worker to count the words of `length` characters in an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRequest {
    pub length: u32,
    pub file_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResult {
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: u16,
    pub message: String,
}

/// The error shape shared by every reply: `{"error": {"code": .., "message": ..}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub error: ErrorPayload,
}

impl ErrorReply {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            error: ErrorPayload {
                code,
                message: message.into(),
            },
        }
    }
}

/// A worker's reply to a `CountRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CountReply {
    Count(CountResult),
    Error(ErrorReply),
}
