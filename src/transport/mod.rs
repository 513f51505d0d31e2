//! The `transport` module is responsible for the network side of PubSub.
//!
//! It defines the wire frames exchanged with the platform, the per-connection
//! state machine with its heartbeat and request correlation, and the
//! WebSocket connector used in production.

pub mod connection;
pub mod message;
pub mod websocket;

pub use connection::{Connection, ConnectionState, Connector, DeathNotice, Link};

#[cfg(test)]
pub(crate) mod mock;
