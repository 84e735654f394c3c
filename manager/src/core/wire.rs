//! Control-channel tokens and negotiation encoding.
//!
//! Everything exchanged with the orchestrator is a single byte, a short fixed
//! token, or a newline-terminated path. This module only builds and checks
//! those values; reading and writing them is done by `io::handshake`.

use crate::error::{ConfigError, ProtocolError};

/// Orchestrator greeting, sent once per negotiation.
pub const WELCOME: u8 = b'S';
/// Restart the current instances with the same pipe paths.
pub const CONTINUE: u8 = b'C';
/// Finish the current phase and negotiate a new instance set.
pub const NEXT_PHASE: u8 = b'N';
/// The manager is about to emit its verdict.
pub const QUIT: u8 = b'Q';
/// Orchestrator reply: the previous instances did not run successfully.
pub const ABORT: u8 = b'X';
/// Kill request written to the dedicated kill channel.
pub const KILL_TOKEN: &[u8] = b"<3";
/// Message sent to instances on shutdown when notification is enabled.
pub const SHUTDOWN_NOTICE: &[u8] = b"-1\n";
/// Terminator of each integer in the negotiation message.
pub const FIELD_DELIMITER: char = 'B';

/// Upper bound on concurrently running submission instances.
pub const MAX_INSTANCES: usize = 42;

/// A validated instance count in `1..=MAX_INSTANCES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceCount(usize);

impl InstanceCount {
    pub fn new(count: usize) -> Result<Self, ConfigError> {
        if count == 0 || count > MAX_INSTANCES {
            return Err(ConfigError::InstanceCount(count));
        }
        Ok(Self(count))
    }

    pub fn get(self) -> usize {
        self.0
    }
}

/// Orchestrator answer to a `C` or `N` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Proceed,
    Abort,
}

impl Reply {
    /// Interpret a reply byte; a closed channel counts as an abort.
    pub fn from_byte(byte: Option<u8>) -> Self {
        match byte {
            Some(ABORT) | None => Reply::Abort,
            Some(_) => Reply::Proceed,
        }
    }
}

/// Build the `"<N>B<T>B"` negotiation message.
pub fn encode_negotiation(count: InstanceCount, time_limit: u32) -> String {
    format!(
        "{}{FIELD_DELIMITER}{}{FIELD_DELIMITER}",
        count.get(),
        time_limit
    )
}

/// Validate the welcome byte.
pub fn expect_welcome(byte: Option<u8>) -> Result<(), ProtocolError> {
    match byte {
        Some(WELCOME) => Ok(()),
        Some(other) => Err(ProtocolError::UnexpectedByte {
            expected: "welcome 'S'",
            found: describe_byte(other),
        }),
        None => Err(ProtocolError::UnexpectedEof("welcome")),
    }
}

/// Turn a raw line from the orchestrator into a pipe path.
///
/// `position` is the 0-based line number within the path block. The bytes
/// must be valid UTF-8; a path is never rewritten.
pub fn parse_path_line(position: usize, line: &[u8]) -> Result<String, ProtocolError> {
    let malformed = |reason: &str| ProtocolError::MalformedPath {
        position,
        reason: reason.to_string(),
    };
    let path = line.strip_suffix(b"\n").unwrap_or(line);
    let path = path.strip_suffix(b"\r").unwrap_or(path);
    if path.is_empty() {
        return Err(malformed("empty path"));
    }
    if path.contains(&0) {
        return Err(malformed("path contains NUL"));
    }
    let path = std::str::from_utf8(path).map_err(|_| malformed("path is not valid UTF-8"))?;
    Ok(path.to_string())
}

/// Printable form of a protocol byte for error messages.
pub fn describe_byte(byte: u8) -> String {
    if byte.is_ascii_graphic() {
        format!("'{}'", byte as char)
    } else {
        format!("0x{byte:02x}")
    }
}
