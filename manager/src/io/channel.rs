//! Named-pipe channels.
//!
//! A channel is one direction of one pipe. Opening goes through
//! [`ChannelOpener`] so the protocol code never touches the filesystem
//! directly; production uses [`FifoOpener`], tests use scripted doubles.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};

use tracing::{debug, trace};

use crate::error::ChannelError;

/// Which end of a pipe this process holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("reading"),
            Direction::Write => f.write_str("writing"),
        }
    }
}

pub type ReadHandle = Box<dyn Read + Send>;
pub type WriteHandle = Box<dyn Write + Send>;

/// Source of pipe handles.
pub trait ChannelOpener {
    /// Open `path` for reading. For a FIFO this blocks until a writer appears.
    fn open_reader(&self, path: &str) -> Result<ReadHandle, ChannelError>;
    /// Open `path` for writing. For a FIFO this blocks until a reader appears.
    fn open_writer(&self, path: &str) -> Result<WriteHandle, ChannelError>;
}

/// Opens existing filesystem paths (FIFOs provisioned by the orchestrator).
#[derive(Debug, Clone, Copy, Default)]
pub struct FifoOpener;

impl ChannelOpener for FifoOpener {
    fn open_reader(&self, path: &str) -> Result<ReadHandle, ChannelError> {
        let file = File::open(path).map_err(|source| ChannelError::Open {
            path: path.to_string(),
            direction: Direction::Read,
            source,
        })?;
        Ok(Box::new(file))
    }

    fn open_writer(&self, path: &str) -> Result<WriteHandle, ChannelError> {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|source| ChannelError::Open {
                path: path.to_string(),
                direction: Direction::Write,
                source,
            })?;
        Ok(Box::new(file))
    }
}

/// Read end of a pipe.
pub struct InboundPipe {
    path: String,
    reader: Option<BufReader<ReadHandle>>,
}

impl InboundPipe {
    pub fn open<O: ChannelOpener + ?Sized>(opener: &O, path: &str) -> Result<Self, ChannelError> {
        debug!(path, "opening pipe for reading");
        let handle = opener.open_reader(path)?;
        Ok(Self {
            path: path.to_string(),
            reader: Some(BufReader::new(handle)),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Block until one newline-terminated record arrives; the newline is stripped.
    ///
    /// A final record without a newline is returned as-is; a stream that ends
    /// before any byte is read yields [`ChannelError::Eof`]. Invalid UTF-8 is
    /// replaced; use [`InboundPipe::read_raw_line`] where bytes matter.
    pub fn read_line(&mut self) -> Result<String, ChannelError> {
        let buf = self.read_raw_line()?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// [`InboundPipe::read_line`] without decoding.
    pub fn read_raw_line(&mut self) -> Result<Vec<u8>, ChannelError> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| ChannelError::Closed(self.path.clone()))?;
        let mut buf = Vec::new();
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(|source| ChannelError::Io {
                path: self.path.clone(),
                source,
            })?;
        if n == 0 {
            return Err(ChannelError::Eof(self.path.clone()));
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        trace!(path = %self.path, len = buf.len(), "read line");
        Ok(buf)
    }

    /// Read exactly one byte; `None` means the writer closed the pipe.
    pub fn read_byte(&mut self) -> Result<Option<u8>, ChannelError> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| ChannelError::Closed(self.path.clone()))?;
        let mut byte = [0u8; 1];
        match reader.read_exact(&mut byte) {
            Ok(()) => Ok(Some(byte[0])),
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(source) => Err(ChannelError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Drop the handle. Calling it again is a no-op.
    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            debug!(path = %self.path, "closed read end");
        }
    }
}

/// Write end of a pipe.
pub struct OutboundPipe {
    path: String,
    writer: Option<WriteHandle>,
}

impl OutboundPipe {
    pub fn open<O: ChannelOpener + ?Sized>(opener: &O, path: &str) -> Result<Self, ChannelError> {
        debug!(path, "opening pipe for writing");
        let handle = opener.open_writer(path)?;
        Ok(Self {
            path: path.to_string(),
            writer: Some(handle),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Write all of `bytes` and flush.
    ///
    /// A vanished reader surfaces as [`ChannelError::BrokenPipe`]; the
    /// channel stays usable for `close`.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| ChannelError::Closed(self.path.clone()))?;
        writer
            .write_all(bytes)
            .and_then(|()| writer.flush())
            .map_err(|err| ChannelError::from_write(&self.path, err))?;
        trace!(path = %self.path, len = bytes.len(), "wrote bytes");
        Ok(())
    }

    pub fn write_line(&mut self, text: &str) -> Result<(), ChannelError> {
        let mut buf = Vec::with_capacity(text.len() + 1);
        buf.extend_from_slice(text.as_bytes());
        buf.push(b'\n');
        self.write(&buf)
    }

    /// Flush (ignoring failures) and drop the handle. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
            debug!(path = %self.path, "closed write end");
        }
    }
}
