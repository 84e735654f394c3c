//! Writes the verdict to the diagnostic and result sinks.

use std::io::{self, Write};

use tracing::{info, warn};

use crate::core::verdict::Verdict;
use crate::error::VerdictError;

pub type Sink = Box<dyn Write + Send>;

/// One-shot verdict writer. In production the diagnostic sink is stderr and
/// the result sink is stdout.
pub struct VerdictEmitter {
    diagnostic: Sink,
    result: Sink,
    emitted: bool,
}

impl VerdictEmitter {
    pub fn new(diagnostic: Sink, result: Sink) -> Self {
        Self {
            diagnostic,
            result,
            emitted: false,
        }
    }

    pub fn stdio() -> Self {
        Self::new(Box::new(io::stderr()), Box::new(io::stdout()))
    }

    pub fn has_emitted(&self) -> bool {
        self.emitted
    }

    /// Write the diagnostic part, then the result part, flushing each.
    ///
    /// A second call fails with [`VerdictError::AlreadyEmitted`] even if the
    /// first one failed halfway.
    pub fn emit(&mut self, verdict: &Verdict) -> Result<(), VerdictError> {
        if self.emitted {
            return Err(VerdictError::AlreadyEmitted);
        }
        self.emitted = true;
        if verdict.has_out_of_range_score() {
            warn!(?verdict, "score outside [0, 1], clamping");
        }
        let rendered = verdict.render();
        self.diagnostic.write_all(&rendered.diagnostic)?;
        self.diagnostic.flush()?;
        self.result.write_all(&rendered.result)?;
        self.result.flush()?;
        info!(kind = kind(verdict), "verdict emitted");
        Ok(())
    }
}

fn kind(verdict: &Verdict) -> &'static str {
    match verdict {
        Verdict::Scalar { .. } => "scalar",
        Verdict::Structured { .. } => "structured",
    }
}
