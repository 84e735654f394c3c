//! Error taxonomy for the manager.
//!
//! - [`ProtocolError`]: the orchestrator broke the contract. Fatal; no
//!   verdict can be trusted.
//! - [`ChannelError`]: an instance pipe failed. Recoverable; problem logic
//!   turns it into a score.
//! - [`ConfigError`]: rejected before any pipe is opened.

use std::io;

use thiserror::Error;

use crate::core::state::{HandshakeEvent, HandshakeState};
use crate::io::channel::Direction;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("open {path} for {direction}: {source}")]
    Open {
        path: String,
        direction: Direction,
        #[source]
        source: io::Error,
    },
    #[error("channel {0} is closed")]
    Closed(String),
    #[error("end of stream on {0}")]
    Eof(String),
    #[error("broken pipe writing to {0}")]
    BrokenPipe(String),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl ChannelError {
    /// Classify an I/O error raised while writing to `path`.
    pub fn from_write(path: &str, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::BrokenPipe {
            ChannelError::BrokenPipe(path.to_string())
        } else {
            ChannelError::Io {
                path: path.to_string(),
                source: err,
            }
        }
    }

    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, ChannelError::BrokenPipe(_))
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("expected {expected} from orchestrator, got {found}")]
    UnexpectedByte {
        expected: &'static str,
        found: String,
    },
    #[error("orchestrator closed the control channel during {0}")]
    UnexpectedEof(&'static str),
    #[error("malformed path on line {position}: {reason}")]
    MalformedPath { position: usize, reason: String },
    #[error("illegal {event:?} while {from}")]
    InvalidTransition {
        from: HandshakeState,
        event: HandshakeEvent,
    },
    #[error("control channel: {0}")]
    Control(#[from] ChannelError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("instance count {0} outside 1..=42")]
    InstanceCount(usize),
    #[error("{0} must be > 0")]
    Zero(&'static str),
    #[error("instance paths must come in (inbound, outbound) pairs, got {0} paths")]
    UnpairedPaths(usize),
    #[error("{0} requires a negotiated session")]
    NotNegotiated(&'static str),
    #[error("trace requires log_file; stderr is reserved for the verdict")]
    TraceWithoutLogFile,
}

/// Failure reported by a [`crate::collab::TokenService`].
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("missing token {0}")]
    Missing(String),
    #[error("{name}: {value:?} is not an integer")]
    NotInteger { name: String, value: String },
    #[error("{name} = {value} outside [{low}, {high}]")]
    OutOfBounds {
        name: String,
        value: i64,
        low: i64,
        high: i64,
    },
}

#[derive(Debug, Error)]
pub enum VerdictError {
    #[error("verdict already emitted")]
    AlreadyEmitted,
    #[error("write verdict: {0}")]
    Io(#[from] io::Error),
}

/// Everything a [`crate::session::Session`] operation can fail with.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Verdict(#[from] VerdictError),
    #[error(transparent)]
    Check(#[from] CheckError),
    #[error("orchestrator refused to continue")]
    Aborted,
    #[error("instances were killed")]
    InstancesKilled,
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),
}

impl SessionError {
    /// Only protocol violations escape without a verdict.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Protocol(_))
    }
}
