//! The starling stream server.
//!
//! One simulation task owns the graph; sessions talk to it over a command
//! channel and receive snapshots through the broadcast hub. The gateway is
//! a thin axum layer that upgrades WebSocket connections and hands them to
//! [`session::run`].

pub mod config;
pub mod gateway;
pub mod hub;
pub mod metrics;
pub mod queue;
pub mod session;
pub mod sim;
