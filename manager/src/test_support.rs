//! Test doubles for pipe channels.
//!
//! [`ScriptedOpener`] hands out in-memory readers and writers that record
//! every open, close, read and write into a shared [`ChannelLog`], so tests
//! can assert on the exact order of channel operations. [`FifoDir`] creates
//! real named pipes for end-to-end tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Cursor, Read, Write};
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};

use crate::error::ChannelError;
use crate::io::channel::{ChannelOpener, Direction, ReadHandle, WriteHandle};

/// One observable channel operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open { path: String, direction: Direction },
    Close { path: String, direction: Direction },
    Write { path: String, bytes: Vec<u8> },
    Read { path: String, len: usize },
}

impl ChannelEvent {
    pub fn path(&self) -> &str {
        match self {
            ChannelEvent::Open { path, .. }
            | ChannelEvent::Close { path, .. }
            | ChannelEvent::Write { path, .. }
            | ChannelEvent::Read { path, .. } => path,
        }
    }
}

/// Shared, ordered record of channel operations.
#[derive(Debug, Clone, Default)]
pub struct ChannelLog {
    events: Arc<Mutex<Vec<ChannelEvent>>>,
}

impl ChannelLog {
    fn push(&self, event: ChannelEvent) {
        self.events.lock().expect("channel log poisoned").push(event);
    }

    pub fn events(&self) -> Vec<ChannelEvent> {
        self.events.lock().expect("channel log poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("channel log poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Paths of all `Open` events, in order.
    pub fn opened_paths(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ChannelEvent::Open { path, .. } => Some(path),
                _ => None,
            })
            .collect()
    }

    /// Concatenation of everything written to `path`.
    pub fn written(&self, path: &str) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ChannelEvent::Write { path: p, bytes } if p == path => Some(bytes),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Index of the first event matching `pred`.
    pub fn position(&self, pred: impl Fn(&ChannelEvent) -> bool) -> Option<usize> {
        self.events().iter().position(pred)
    }

    /// Events recorded for `path`, in order.
    pub fn events_for(&self, path: &str) -> Vec<ChannelEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.path() == path)
            .collect()
    }

    /// A writer that records into this log without an `Open` event, for
    /// standing in as a verdict sink.
    pub fn sink(&self, name: &str) -> ScriptedWriter {
        ScriptedWriter {
            path: name.to_string(),
            log: self.clone(),
            broken: false,
        }
    }
}

/// In-memory reader over a scripted byte string.
pub struct ScriptedReader {
    path: String,
    data: Cursor<Vec<u8>>,
    log: ChannelLog,
}

impl Read for ScriptedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.data.read(buf)?;
        self.log.push(ChannelEvent::Read {
            path: self.path.clone(),
            len: n,
        });
        Ok(n)
    }
}

impl Drop for ScriptedReader {
    fn drop(&mut self) {
        self.log.push(ChannelEvent::Close {
            path: self.path.clone(),
            direction: Direction::Read,
        });
    }
}

/// In-memory writer; a broken writer fails every write with `BrokenPipe`.
pub struct ScriptedWriter {
    path: String,
    log: ChannelLog,
    broken: bool,
}

impl Write for ScriptedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.broken {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        self.log.push(ChannelEvent::Write {
            path: self.path.clone(),
            bytes: buf.to_vec(),
        });
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ScriptedWriter {
    fn drop(&mut self) {
        self.log.push(ChannelEvent::Close {
            path: self.path.clone(),
            direction: Direction::Write,
        });
    }
}

/// Opener serving scripted contents per path.
///
/// Each `open_reader` of a path consumes the next script queued for it, so a
/// reopened pipe (after a restart) sees fresh data. Paths without a script
/// read as empty.
pub struct ScriptedOpener {
    log: ChannelLog,
    scripts: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    missing: HashSet<String>,
    broken: HashSet<String>,
}

impl ScriptedOpener {
    pub fn new(log: ChannelLog) -> Self {
        Self {
            log,
            scripts: Mutex::new(HashMap::new()),
            missing: HashSet::new(),
            broken: HashSet::new(),
        }
    }

    /// Queue `data` for the next open of `path`.
    pub fn script(self, path: &str, data: impl AsRef<[u8]>) -> Self {
        self.scripts
            .lock()
            .expect("scripts poisoned")
            .entry(path.to_string())
            .or_default()
            .push_back(data.as_ref().to_vec());
        self
    }

    /// Opening `path` fails.
    pub fn missing(mut self, path: &str) -> Self {
        self.missing.insert(path.to_string());
        self
    }

    /// Writes to `path` fail with a broken pipe.
    pub fn broken(mut self, path: &str) -> Self {
        self.broken.insert(path.to_string());
        self
    }

    fn check_missing(&self, path: &str, direction: Direction) -> Result<(), ChannelError> {
        if self.missing.contains(path) {
            return Err(ChannelError::Open {
                path: path.to_string(),
                direction,
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        Ok(())
    }
}

impl ChannelOpener for ScriptedOpener {
    fn open_reader(&self, path: &str) -> Result<ReadHandle, ChannelError> {
        self.check_missing(path, Direction::Read)?;
        self.log.push(ChannelEvent::Open {
            path: path.to_string(),
            direction: Direction::Read,
        });
        let data = self
            .scripts
            .lock()
            .expect("scripts poisoned")
            .get_mut(path)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();
        Ok(Box::new(ScriptedReader {
            path: path.to_string(),
            data: Cursor::new(data),
            log: self.log.clone(),
        }))
    }

    fn open_writer(&self, path: &str) -> Result<WriteHandle, ChannelError> {
        self.check_missing(path, Direction::Write)?;
        self.log.push(ChannelEvent::Open {
            path: path.to_string(),
            direction: Direction::Write,
        });
        Ok(Box::new(ScriptedWriter {
            path: path.to_string(),
            log: self.log.clone(),
            broken: self.broken.contains(path),
        }))
    }
}

/// Control-channel script for a negotiation handing out `paths`.
pub fn negotiation_script(paths: &[&str]) -> Vec<u8> {
    let mut script = vec![b'S'];
    for path in paths {
        script.extend_from_slice(path.as_bytes());
        script.push(b'\n');
    }
    script
}

/// Temporary directory holding real named pipes.
pub struct FifoDir {
    dir: tempfile::TempDir,
}

impl FifoDir {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir().context("create fifo dir")?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create a FIFO named `name` and return its path.
    pub fn fifo(&self, name: &str) -> Result<String> {
        let path = self.dir.path().join(name);
        let status = Command::new("mkfifo")
            .arg(&path)
            .status()
            .context("spawn mkfifo")?;
        if !status.success() {
            bail!("mkfifo {} failed with {:?}", path.display(), status.code());
        }
        path.to_str()
            .map(str::to_string)
            .with_context(|| format!("non-utf8 fifo path {}", path.display()))
    }
}
