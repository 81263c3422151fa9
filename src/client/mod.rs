//! The `client` module defines the broker server's view of a connection.
//!
//! It provides the `Client` struct, which encapsulates the state of a single
//! connected broker client: its identifier and the channel for sending
//! replies to it.

pub mod connection;
pub use connection::Client;

#[cfg(test)]
mod tests;
