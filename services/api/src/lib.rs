//! Realtime Relay API Library Crate
//!
//! HTTP and WebSocket side of the relay: configuration, application state,
//! routing, the two socket links and the per-connection session coordinator.
//! The `relay` binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod router;
pub mod state;
pub mod ws;
