//! Client side of the starling graph stream.
//!
//! [`client::spawn`] drives one connection through the lifecycle in
//! [`state::ConnectionState`]: connect, wait for the readiness handshake,
//! stream snapshots, and reconnect with jittered exponential backoff when
//! the transport drops. Applications talk to it through a command channel
//! and receive decoded [`client::ClientEvent`]s.

pub mod backoff;
pub mod client;
pub mod state;

pub use backoff::ReconnectPolicy;
pub use client::{spawn, ClientCommand, ClientConfig, ClientEvent, ClientHandle};
pub use state::ConnectionState;
