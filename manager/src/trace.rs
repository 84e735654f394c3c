//! Optional per-transition protocol tracing.
//!
//! When enabled, every control or instance exchange emits a `debug` event on
//! the `pipe_manager::protocol` target carrying the call site, so a manager
//! can be debugged against a live orchestrator with
//! `RUST_LOG=pipe_manager::protocol=debug`.

use std::panic::Location;

use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolTrace {
    enabled: bool,
}

impl ProtocolTrace {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Record one protocol step on `channel`.
    #[track_caller]
    pub fn step(&self, channel: &str, what: &str) {
        if !self.enabled {
            return;
        }
        let caller = Location::caller();
        debug!(
            target: "pipe_manager::protocol",
            file = caller.file(),
            line = caller.line(),
            channel,
            "{what}"
        );
    }

    /// Record bytes moving over `channel`, rendered lossily.
    #[track_caller]
    pub fn bytes(&self, channel: &str, direction: &str, bytes: &[u8]) {
        if !self.enabled {
            return;
        }
        let caller = Location::caller();
        let payload = String::from_utf8_lossy(bytes);
        debug!(
            target: "pipe_manager::protocol",
            file = caller.file(),
            line = caller.line(),
            channel,
            direction,
            payload = %payload.escape_debug(),
            "transfer"
        );
    }
}
