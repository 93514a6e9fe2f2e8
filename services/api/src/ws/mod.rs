//! WebSocket Session Management
//!
//! - `downstream`: the browser-facing socket.
//! - `upstream`: the socket to the realtime API.
//! - `session`: pairs the two and drives them through the translator.

pub mod downstream;
pub mod session;
pub mod upstream;

pub use session::ws_handler;
