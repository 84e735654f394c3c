//! The manager session: the single object problem logic talks to.
//!
//! A session is built once at startup, either by negotiating with the
//! orchestrator ([`SessionBuilder::negotiate`]) or from instance paths given
//! on the command line ([`SessionBuilder::fixed`]). It ends with
//! [`Session::finish`], which consumes it, so a second verdict cannot be
//! emitted.
//!
//! Instance pipes that fail to open do not fail the build: the session is
//! returned with a startup failure recorded, and finishing it emits the
//! failure verdict inside the normal shutdown handshake.

use tracing::{error, info, instrument, warn};

use crate::core::verdict::Verdict;
use crate::core::wire::InstanceCount;
use crate::error::SessionError;
use crate::exit_codes;
use crate::io::channel::{ChannelOpener, FifoOpener};
use crate::io::config::ManagerConfig;
use crate::io::emitter::VerdictEmitter;
use crate::io::handshake::HandshakeClient;
use crate::io::kill::KillSwitch;
use crate::io::lifecycle::{Lifecycle, RestartOutcome};
use crate::io::registry::{Instance, InstancePaths};
use crate::trace::ProtocolTrace;

/// Collects everything needed before the first pipe is opened.
pub struct SessionBuilder<O: ChannelOpener = FifoOpener> {
    opener: O,
    config: ManagerConfig,
    kill: Option<(String, String)>,
    emitter: Option<VerdictEmitter>,
}

impl SessionBuilder<FifoOpener> {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            opener: FifoOpener,
            config,
            kill: None,
            emitter: None,
        }
    }
}

impl<O: ChannelOpener> SessionBuilder<O> {
    /// Use a different source of pipe handles.
    pub fn with_opener<P: ChannelOpener>(self, opener: P) -> SessionBuilder<P> {
        SessionBuilder {
            opener,
            config: self.config,
            kill: self.kill,
            emitter: self.emitter,
        }
    }

    /// Attach the kill-request pipe and its confirmation pipe.
    pub fn kill_switch(
        mut self,
        request: impl Into<String>,
        confirmation: impl Into<String>,
    ) -> Self {
        self.kill = Some((request.into(), confirmation.into()));
        self
    }

    /// Replace the stderr/stdout verdict sinks.
    pub fn emitter(mut self, emitter: VerdictEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Enable protocol tracing. The config must name a `log_file`, or the
    /// build fails validation.
    pub fn trace(mut self, enabled: bool) -> Self {
        self.config.trace = enabled;
        self
    }

    fn open_kill_switch(&self, trace: ProtocolTrace) -> Result<Option<KillSwitch>, SessionError> {
        match &self.kill {
            Some((request, confirmation)) => Ok(Some(KillSwitch::open(
                &self.opener,
                request,
                confirmation,
                trace,
            )?)),
            None => Ok(None),
        }
    }

    /// Open the control pair, negotiate `config.instances` instances and open them.
    #[instrument(skip_all, fields(control_out, control_in))]
    pub fn negotiate(
        self,
        control_out: &str,
        control_in: &str,
    ) -> Result<Session<O>, SessionError> {
        self.config.validate()?;
        let count = InstanceCount::new(self.config.instances)?;
        let trace = ProtocolTrace::new(self.config.trace);

        let handshake = HandshakeClient::open(&self.opener, control_out, control_in, trace)?;
        let kill = self.open_kill_switch(trace)?;
        let lifecycle = Lifecycle::negotiated(
            self.opener,
            handshake,
            kill,
            count,
            self.config.time_limit,
            self.config.open_order,
            trace,
        )?;
        info!(instances = count.get(), "session negotiated");
        into_session(lifecycle, self.emitter, self.config)
    }

    /// Open instances on known paths without talking to the orchestrator.
    #[instrument(skip_all, fields(instances = paths.len()))]
    pub fn fixed(self, paths: Vec<InstancePaths>) -> Result<Session<O>, SessionError> {
        self.config.validate()?;
        InstanceCount::new(paths.len())?;
        let trace = ProtocolTrace::new(self.config.trace);

        let kill = self.open_kill_switch(trace)?;
        let lifecycle =
            Lifecycle::fixed(self.opener, paths, kill, self.config.open_order, trace)?;
        info!(instances = lifecycle.instance_count(), "session registered fixed paths");
        into_session(lifecycle, self.emitter, self.config)
    }
}

/// Open the instances and wrap everything into a [`Session`].
fn into_session<O: ChannelOpener>(
    mut lifecycle: Lifecycle<O>,
    emitter: Option<VerdictEmitter>,
    config: ManagerConfig,
) -> Result<Session<O>, SessionError> {
    let startup_failure = match lifecycle.open_instances() {
        Ok(()) => None,
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => {
            warn!(%err, "instances failed to open");
            Some(err)
        }
    };
    Ok(Session {
        lifecycle,
        emitter: emitter.unwrap_or_else(VerdictEmitter::stdio),
        config,
        startup_failure,
    })
}

pub struct Session<O: ChannelOpener = FifoOpener> {
    lifecycle: Lifecycle<O>,
    emitter: VerdictEmitter,
    config: ManagerConfig,
    startup_failure: Option<SessionError>,
}

impl<O: ChannelOpener> Session<O> {
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn instance_count(&self) -> usize {
        self.lifecycle.instance_count()
    }

    /// Why the instances could not be opened, if they could not.
    pub fn startup_failure(&self) -> Option<&SessionError> {
        self.startup_failure.as_ref()
    }

    /// Borrow instance `index` for message exchange.
    pub fn instance(&mut self, index: usize) -> Result<&mut Instance, SessionError> {
        self.lifecycle.instance(index)
    }

    pub fn is_negotiated(&self) -> bool {
        self.lifecycle.is_negotiated()
    }

    pub fn has_kill_switch(&self) -> bool {
        self.lifecycle.has_kill_switch()
    }

    /// True once the orchestrator has refused a restart.
    pub fn is_terminated(&self) -> bool {
        self.lifecycle.is_aborted()
    }

    pub fn restart(&mut self) -> Result<RestartOutcome, SessionError> {
        self.lifecycle.restart()
    }

    /// Like [`Session::restart`], but an abort becomes `Err(SessionError::Aborted)`.
    pub fn restart_or_abort(&mut self) -> Result<(), SessionError> {
        match self.restart()? {
            RestartOutcome::Survived => Ok(()),
            RestartOutcome::Aborted => Err(SessionError::Aborted),
        }
    }

    /// End the current phase and negotiate `instances` new instances.
    pub fn next_phase(
        &mut self,
        instances: usize,
        time_limit: u32,
    ) -> Result<RestartOutcome, SessionError> {
        let count = InstanceCount::new(instances)?;
        self.lifecycle.next_phase(count, time_limit)
    }

    pub fn kill_and_wait(&mut self) -> Result<(), SessionError> {
        self.lifecycle.kill_and_wait()
    }

    /// Emit `verdict` inside the shutdown handshake.
    ///
    /// After an aborted restart only the verdict is written; the
    /// orchestrator is no longer listening. A session whose instances never
    /// opened emits the failure verdict instead of `verdict`.
    #[instrument(skip_all)]
    pub fn finish(mut self, verdict: Verdict) -> Result<(), SessionError> {
        let verdict = match self.startup_failure {
            Some(_) => Verdict::zero(self.config.failure_message.clone()),
            None => verdict,
        };
        if self.lifecycle.is_aborted() {
            self.emitter.emit(&verdict)?;
            return Ok(());
        }
        self.lifecycle
            .announce_shutdown(self.config.notify_instances_on_shutdown);
        let emitted = self.emitter.emit(&verdict);
        self.lifecycle.await_shutdown();
        emitted?;
        Ok(())
    }

    /// [`Session::finish`], then exit the process.
    pub fn finish_and_exit(self, verdict: Verdict) -> ! {
        let code = match self.finish(verdict) {
            Ok(()) => exit_codes::OK,
            Err(err) => {
                error!(%err, "could not emit verdict");
                exit_codes::INVALID
            }
        };
        std::process::exit(code)
    }
}

/// Run problem logic and always end with a verdict.
///
/// - `Ok(verdict)` is emitted as is.
/// - `SessionError::Aborted` becomes a zero verdict with `abort_message`.
/// - Protocol violations are returned without a verdict.
/// - Any other error becomes a zero verdict with `failure_message`.
///
/// `logic` is not run when the instances failed to open.
pub fn run_session<O, F>(mut session: Session<O>, logic: F) -> Result<(), SessionError>
where
    O: ChannelOpener,
    F: FnOnce(&mut Session<O>) -> Result<Verdict, SessionError>,
{
    if session.startup_failure.is_some() {
        let verdict = Verdict::zero(session.config.failure_message.clone());
        return session.finish(verdict);
    }
    let verdict = match logic(&mut session) {
        Ok(verdict) => verdict,
        Err(err) if err.is_fatal() => {
            error!(%err, "protocol violation, no verdict");
            return Err(err);
        }
        Err(SessionError::Aborted) => {
            info!("orchestrator aborted the run");
            Verdict::zero(session.config.abort_message.clone())
        }
        Err(err) => {
            warn!(%err, "problem logic failed");
            Verdict::zero(session.config.failure_message.clone())
        }
    };
    session.finish(verdict)
}
