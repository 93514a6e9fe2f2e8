//! Core of the realtime relay: the browser and realtime API protocols, the
//! session defaults, the weather tool, and the translator that maps one
//! protocol onto the other.
//!
//! Nothing in here owns a socket. The service crate provides concrete
//! [`link::Downstream`] and [`link::Upstream`] implementations and drives a
//! [`translator::Translator`] from its receive loops.

pub mod defaults;
pub mod link;
pub mod protocol;
pub mod translator;
pub mod weather;

#[cfg(test)]
pub(crate) mod testing;
