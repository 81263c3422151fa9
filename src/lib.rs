//! # wordcount
//!
//! `wordcount` counts the words of a given length in an uploaded document. The
//! counting happens in a pool of worker processes that the HTTP front-end
//! reaches through a stream broker, and the interesting part is the bridge in
//! between: a synchronous request hands work to the pool over an
//! at-least-once channel and resumes with the matching reply.
//!
//! ## Core Modules
//!
//! - `broker`: The `StreamBroker` contract and the in-process engine: streams, consumer groups, pending sets.
//! - `persistence`: sled storage that makes the broker durable.
//! - `transport`: The WebSocket protocol, the broker server and `RemoteBroker`.
//! - `client`: A connection as tracked by the broker server.
//! - `correlation`: Task identities, envelopes, the correlation table and the `Communicator`.
//! - `worker`: The unit of work and the worker dispatch loop.
//! - `frontend`: The axum HTTP front-end.
//! - `config`: Handles loading and managing configuration.
//! - `utils`: Error types and logging.

pub mod broker;
pub mod client;
pub mod config;
pub mod correlation;
pub mod frontend;
pub mod persistence;
pub mod transport;
pub mod utils;
pub mod worker;
