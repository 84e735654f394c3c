//! Stable exit codes for the `pipe-manager` binary.

/// A verdict was emitted.
pub const OK: i32 = 0;
/// Usage, config or input error before any verdict.
pub const INVALID: i32 = 1;
/// The orchestrator broke the pipe protocol; no verdict was emitted.
pub const PROTOCOL: i32 = 2;
