//! The `transport` module puts the stream broker on the network.
//!
//! It defines the JSON protocol spoken over WebSockets, the broker server that
//! serves a `StreamBroker` to many processes, and `RemoteBroker`, the client
//! side that the front-end server and the workers connect with.

pub mod message;
pub mod remote;
pub mod websocket;

pub use message::{ClientMessage, ServerMessage};
pub use remote::RemoteBroker;
pub use websocket::{serve, start_broker_server};
