//! Wire protocols on both sides of the relay.
//!
//! - `client`: JSON frames exchanged with the browser.
//! - `realtime`: JSON events exchanged with the realtime API.

pub mod client;
pub mod realtime;
