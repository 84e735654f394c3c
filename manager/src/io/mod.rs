//! Pipe I/O: channels, the orchestrator handshake, instance lifecycle.

pub mod channel;
pub mod config;
pub mod emitter;
pub mod handshake;
pub mod kill;
pub mod lifecycle;
pub mod registry;
