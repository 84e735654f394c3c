//! Manager side of the interactive judging pipe protocol.
//!
//! A manager process sits between an orchestrator and up to 42 instances of
//! a contestant's submission, all connected through named pipes. This crate
//! performs the startup handshake, opens instance pipes in a deadlock-free
//! order, restarts or kills instances on request, and writes the verdict in
//! the format the orchestrator expects.
//!
//! - **[`core`]**: Pure logic (wire tokens, handshake state machine, verdict
//!   rendering). No I/O.
//! - **[`io`]**: Pipe handling, behind the [`io::channel::ChannelOpener`]
//!   seam so tests can script every byte.
//!
//! [`session`] ties both together for problem logic; [`echo`] is a complete
//! problem built on it.

pub mod collab;
pub mod core;
pub mod echo;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod trace;
