//! Pure protocol logic: wire format, handshake state machine, verdicts.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! values and return deterministic outputs suitable for tests.

pub mod state;
pub mod verdict;
pub mod wire;
