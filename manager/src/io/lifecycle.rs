//! Open/close ordering of instance pipes around orchestrator requests.
//!
//! The orchestrator starts each instance by opening the instance's read end
//! before its write end. Restarting therefore has to happen in two phases:
//!
//! 1. close every manager-to-instance pipe, so the old instances read EOF and
//!    exit;
//! 2. send the request and wait for the reply (the old instances are gone
//!    once it arrives);
//! 3. close every instance-to-manager pipe. The replacements cannot have
//!    opened them yet, because they block opening their read end until step 4;
//! 4. reopen the whole set.
//!
//! Closing in any other order leaves both sides blocked in `open()`.

use tracing::{debug, info, instrument, warn};

use crate::core::state::{HandshakeEvent, HandshakeState};
use crate::core::wire::{CONTINUE, InstanceCount, NEXT_PHASE, Reply, SHUTDOWN_NOTICE};
use crate::error::{ConfigError, SessionError};
use crate::io::channel::{ChannelOpener, Direction};
use crate::io::handshake::HandshakeClient;
use crate::io::kill::{KillState, KillSwitch};
use crate::io::registry::{Instance, InstancePaths, InstanceRegistry, OpenOrder};
use crate::trace::ProtocolTrace;

const CHANNEL: &str = "instances";

/// Whether instances are still available after a restart-style request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    Survived,
    /// The orchestrator answered `X`; the session is over.
    Aborted,
}

pub struct Lifecycle<O: ChannelOpener> {
    opener: O,
    handshake: Option<HandshakeClient>,
    kill: Option<KillSwitch>,
    registry: InstanceRegistry,
    order: OpenOrder,
    trace: ProtocolTrace,
    aborted: bool,
    killed: bool,
}

impl<O: ChannelOpener> Lifecycle<O> {
    /// Welcome and negotiate. Instances are registered but not opened; call
    /// [`Lifecycle::open_instances`] next.
    pub fn negotiated(
        opener: O,
        handshake: HandshakeClient,
        kill: Option<KillSwitch>,
        count: InstanceCount,
        time_limit: u32,
        order: OpenOrder,
        trace: ProtocolTrace,
    ) -> Result<Self, SessionError> {
        let mut lifecycle = Self {
            opener,
            handshake: Some(handshake),
            kill,
            registry: InstanceRegistry::new(),
            order,
            trace,
            aborted: false,
            killed: false,
        };
        lifecycle.negotiate_instances(count, time_limit)?;
        Ok(lifecycle)
    }

    /// Register instances whose paths are already known (no control channel).
    pub fn fixed(
        opener: O,
        paths: Vec<InstancePaths>,
        kill: Option<KillSwitch>,
        order: OpenOrder,
        trace: ProtocolTrace,
    ) -> Result<Self, SessionError> {
        InstanceCount::new(paths.len())?;
        let registry = InstanceRegistry::from_paths(paths)?;
        Ok(Self {
            opener,
            handshake: None,
            kill,
            registry,
            order,
            trace,
            aborted: false,
            killed: false,
        })
    }

    #[instrument(skip_all, fields(count = count.get(), time_limit = time_limit))]
    fn negotiate_instances(
        &mut self,
        count: InstanceCount,
        time_limit: u32,
    ) -> Result<(), SessionError> {
        let handshake = self
            .handshake
            .as_mut()
            .ok_or(ConfigError::NotNegotiated("negotiation"))?;
        handshake.await_welcome()?;
        self.trace.step("control", "welcome received");
        let paths = handshake.negotiate(count, time_limit)?;
        self.registry.replace(paths)?;
        Ok(())
    }

    /// Open every registered instance.
    ///
    /// On failure every instance channel is closed again, so no instance is
    /// left usable, and the control channel stays ready for the shutdown
    /// handshake.
    pub fn open_instances(&mut self) -> Result<(), SessionError> {
        self.open_all_or_close()?;
        if let Some(handshake) = self.handshake.as_mut() {
            handshake.mark_running()?;
        }
        self.trace.step(CHANNEL, "instances open");
        Ok(())
    }

    fn open_all_or_close(&mut self) -> Result<(), SessionError> {
        let opened = self.registry.open_all(&self.opener, self.order);
        if opened.is_err() {
            self.registry.close_all(Direction::Write);
            self.registry.close_all(Direction::Read);
        }
        opened
    }

    pub fn instance_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn is_killed(&self) -> bool {
        self.killed
    }

    pub fn is_negotiated(&self) -> bool {
        self.handshake.is_some()
    }

    pub fn has_kill_switch(&self) -> bool {
        self.kill.is_some()
    }

    pub fn instance(&mut self, index: usize) -> Result<&mut Instance, SessionError> {
        if self.aborted {
            return Err(SessionError::Aborted);
        }
        if self.killed {
            return Err(SessionError::InstancesKilled);
        }
        self.registry.get(index)
    }

    /// Close outbound ends, send `token`, wait for the reply.
    ///
    /// On abort nothing else is touched: the orchestrator owns the teardown.
    fn request_fresh_instances(
        &mut self,
        token: u8,
        what: &'static str,
    ) -> Result<Reply, SessionError> {
        if self.aborted {
            return Err(SessionError::Aborted);
        }
        if self.killed {
            return Err(SessionError::InstancesKilled);
        }
        let handshake = self
            .handshake
            .as_mut()
            .ok_or(ConfigError::NotNegotiated(what))?;
        handshake.state().advance(HandshakeEvent::RestartRequested)?;

        self.trace.step(CHANNEL, "closing manager-to-instance pipes");
        self.registry.close_all(Direction::Write);
        let reply = handshake.request(token)?;
        if reply == Reply::Abort {
            warn!(what, "orchestrator refused, session over");
            self.aborted = true;
        }
        Ok(reply)
    }

    /// Replace every instance with a fresh copy on the same pipe paths.
    #[instrument(skip_all, fields(instances = self.registry.len()))]
    pub fn restart(&mut self) -> Result<RestartOutcome, SessionError> {
        if self.request_fresh_instances(CONTINUE, "restart")? == Reply::Abort {
            return Ok(RestartOutcome::Aborted);
        }
        self.trace.step(CHANNEL, "closing instance-to-manager pipes");
        self.registry.close_all(Direction::Read);
        self.open_all_or_close()?;
        if let Some(handshake) = self.handshake.as_mut() {
            handshake.resume()?;
        }
        self.trace.step(CHANNEL, "instances reopened");
        info!("instances restarted");
        Ok(RestartOutcome::Survived)
    }

    /// Finish this phase and negotiate a new instance set.
    #[instrument(skip_all, fields(count = count.get(), time_limit = time_limit))]
    pub fn next_phase(
        &mut self,
        count: InstanceCount,
        time_limit: u32,
    ) -> Result<RestartOutcome, SessionError> {
        if self.request_fresh_instances(NEXT_PHASE, "next phase")? == Reply::Abort {
            return Ok(RestartOutcome::Aborted);
        }
        self.registry.close_all(Direction::Read);
        if let Some(handshake) = self.handshake.as_mut() {
            handshake.begin_next_phase()?;
        }
        self.negotiate_instances(count, time_limit)?;
        self.open_instances()?;
        info!(instances = count.get(), "next phase started");
        Ok(RestartOutcome::Survived)
    }

    /// Ask the orchestrator to kill the instances and wait until it has.
    ///
    /// Afterwards every instance channel is closed and no instance can be
    /// borrowed any more.
    #[instrument(skip_all)]
    pub fn kill_and_wait(&mut self) -> Result<(), SessionError> {
        if self.aborted {
            return Err(SessionError::Aborted);
        }
        let kill = self
            .kill
            .as_mut()
            .ok_or(SessionError::InvalidState("no kill channel configured"))?;
        if self.killed || kill.state() != KillState::Armed {
            return Err(SessionError::InvalidState("kill already requested"));
        }
        kill.request()?;
        kill.await_confirmation()?;
        self.killed = true;
        self.registry.close_all(Direction::Write);
        self.registry.close_all(Direction::Read);
        self.trace.step(CHANNEL, "instances killed");
        Ok(())
    }

    /// First half of the shutdown handshake, before the verdict is written.
    ///
    /// Failures are logged, never returned: the verdict must still go out.
    pub fn announce_shutdown(&mut self, notify_instances: bool) {
        if self.aborted {
            return;
        }
        if let Some(handshake) = self.handshake.as_mut()
            && let Err(err) = handshake.announce_quit()
        {
            warn!(%err, "could not announce quit");
        }
        if let Some(kill) = self.kill.as_mut()
            && kill.state() == KillState::Armed
            && let Err(err) = kill.request()
        {
            warn!(%err, "could not request kill on shutdown");
        }
        if notify_instances && !self.killed {
            for instance in self.registry.instances_mut() {
                let index = instance.index();
                if let Some(pipe) = instance.outbound_mut()
                    && let Err(err) = pipe.write(SHUTDOWN_NOTICE)
                {
                    debug!(index, %err, "instance gone before shutdown notice");
                }
            }
            self.registry.close_all(Direction::Write);
        }
        self.trace.step("control", "shutdown announced");
    }

    /// Second half of the shutdown handshake, after the verdict is written.
    pub fn await_shutdown(&mut self) {
        if self.aborted {
            return;
        }
        if let Some(handshake) = self.handshake.as_mut()
            && handshake.state() == HandshakeState::Finalizing
            && let Err(err) = handshake.await_quit_reply()
        {
            warn!(%err, "no quit acknowledgement");
        }
        if let Some(kill) = self.kill.as_mut()
            && kill.state() == KillState::Requested
            && let Err(err) = kill.await_confirmation()
        {
            warn!(%err, "no kill confirmation");
        }
        self.trace.step("control", "shutdown acknowledged");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;
    use crate::test_support::{ChannelEvent, ChannelLog, ScriptedOpener, negotiation_script};

    const TWO: [&str; 4] = ["/fifo/u0", "/fifo/m0", "/fifo/u1", "/fifo/m1"];

    fn control_script(paths: &[&str], tail: &[u8]) -> Vec<u8> {
        let mut script = negotiation_script(paths);
        script.extend_from_slice(tail);
        script
    }

    fn negotiated_only(opener: ScriptedOpener, count: usize) -> Lifecycle<ScriptedOpener> {
        let trace = ProtocolTrace::new(false);
        let handshake =
            HandshakeClient::open(&opener, "/ctl/out", "/ctl/in", trace).expect("open control");
        Lifecycle::negotiated(
            opener,
            handshake,
            None,
            InstanceCount::new(count).expect("count"),
            5,
            OpenOrder::Ascending,
            trace,
        )
        .expect("negotiate")
    }

    fn negotiated(opener: ScriptedOpener, count: usize) -> Lifecycle<ScriptedOpener> {
        let mut lifecycle = negotiated_only(opener, count);
        lifecycle.open_instances().expect("open instances");
        lifecycle
    }

    fn fixed(
        opener: ScriptedOpener,
        paths: Vec<InstancePaths>,
        kill: Option<KillSwitch>,
        order: OpenOrder,
    ) -> Lifecycle<ScriptedOpener> {
        let mut lifecycle =
            Lifecycle::fixed(opener, paths, kill, order, ProtocolTrace::new(false)).expect("fixed");
        lifecycle.open_instances().expect("open instances");
        lifecycle
    }

    fn without_reads(events: &[ChannelEvent]) -> Vec<ChannelEvent> {
        events
            .iter()
            .filter(|event| !matches!(event, ChannelEvent::Read { .. }))
            .cloned()
            .collect()
    }

    fn open(path: &str, direction: Direction) -> ChannelEvent {
        ChannelEvent::Open {
            path: path.to_string(),
            direction,
        }
    }

    fn close(path: &str, direction: Direction) -> ChannelEvent {
        ChannelEvent::Close {
            path: path.to_string(),
            direction,
        }
    }

    #[test]
    fn negotiation_opens_control_then_instances() {
        let log = ChannelLog::default();
        let opener = ScriptedOpener::new(log.clone()).script("/ctl/in", control_script(&TWO, b""));
        let mut lifecycle = negotiated(opener, 2);

        assert_eq!(
            log.opened_paths(),
            ["/ctl/out", "/ctl/in", "/fifo/m0", "/fifo/u0", "/fifo/m1", "/fifo/u1"]
        );
        assert_eq!(log.written("/ctl/out"), b"2B5B");
        assert_eq!(lifecycle.instance_count(), 2);
        assert!(lifecycle.instance(1).is_ok());
    }

    #[test]
    fn failed_instance_open_leaves_nothing_open_and_control_usable() {
        let log = ChannelLog::default();
        let opener = ScriptedOpener::new(log.clone())
            .script("/ctl/in", control_script(&TWO, b"A"))
            .missing("/fifo/u1");
        let mut lifecycle = negotiated_only(opener, 2);

        let err = lifecycle.open_instances().expect_err("u1 is missing");
        assert!(matches!(err, SessionError::Channel(ChannelError::Open { .. })));
        for index in 0..2 {
            assert!(matches!(
                lifecycle.instance(index),
                Err(SessionError::Channel(ChannelError::Closed(_)))
            ));
        }
        assert!(log.events().contains(&close("/fifo/u0", Direction::Read)));
        assert!(log.events().contains(&close("/fifo/m1", Direction::Write)));

        lifecycle.announce_shutdown(false);
        lifecycle.await_shutdown();
        assert_eq!(log.written("/ctl/out"), b"2B5BQ");
    }

    #[test]
    fn descending_order_opens_last_instance_first() {
        let log = ChannelLog::default();
        let opener = ScriptedOpener::new(log.clone());
        let paths = vec![
            InstancePaths::new("/fifo/u0", "/fifo/m0"),
            InstancePaths::new("/fifo/u1", "/fifo/m1"),
        ];
        fixed(opener, paths, None, OpenOrder::Descending);
        assert_eq!(
            log.opened_paths(),
            ["/fifo/m1", "/fifo/u1", "/fifo/m0", "/fifo/u0"]
        );
    }

    #[test]
    fn restart_closes_outbound_before_request_and_inbound_after() {
        let log = ChannelLog::default();
        let opener =
            ScriptedOpener::new(log.clone()).script("/ctl/in", control_script(&TWO, b"O"));
        let mut lifecycle = negotiated(opener, 2);
        let before = log.len();

        assert_eq!(lifecycle.restart().expect("restart"), RestartOutcome::Survived);

        let tail = without_reads(&log.events()[before..]);
        assert_eq!(
            tail,
            vec![
                close("/fifo/m0", Direction::Write),
                close("/fifo/m1", Direction::Write),
                ChannelEvent::Write {
                    path: "/ctl/out".to_string(),
                    bytes: b"C".to_vec(),
                },
                close("/fifo/u0", Direction::Read),
                close("/fifo/u1", Direction::Read),
                open("/fifo/m0", Direction::Write),
                open("/fifo/u0", Direction::Read),
                open("/fifo/m1", Direction::Write),
                open("/fifo/u1", Direction::Read),
            ]
        );
        assert!(lifecycle.instance(0).is_ok());
    }

    #[test]
    fn refused_restart_touches_nothing_else() {
        let log = ChannelLog::default();
        let opener =
            ScriptedOpener::new(log.clone()).script("/ctl/in", control_script(&TWO, b"X"));
        let mut lifecycle = negotiated(opener, 2);

        assert_eq!(lifecycle.restart().expect("restart"), RestartOutcome::Aborted);
        let after_request = log.len();
        assert!(lifecycle.is_aborted());
        assert!(matches!(lifecycle.instance(0), Err(SessionError::Aborted)));
        assert!(matches!(lifecycle.restart(), Err(SessionError::Aborted)));
        lifecycle.announce_shutdown(true);
        lifecycle.await_shutdown();

        assert_eq!(log.len(), after_request);
        assert!(!log.events().contains(&close("/fifo/u0", Direction::Read)));
    }

    #[test]
    fn eof_instead_of_reply_is_an_abort() {
        let log = ChannelLog::default();
        let opener = ScriptedOpener::new(log.clone()).script("/ctl/in", control_script(&TWO, b""));
        let mut lifecycle = negotiated(opener, 2);
        assert_eq!(lifecycle.restart().expect("restart"), RestartOutcome::Aborted);
    }

    #[test]
    fn next_phase_renegotiates() {
        let log = ChannelLog::default();
        let mut script = control_script(&TWO[..2], b"O");
        script.extend(control_script(&TWO, b""));
        let opener = ScriptedOpener::new(log.clone()).script("/ctl/in", script);
        let mut lifecycle = negotiated(opener, 1);
        assert_eq!(lifecycle.instance_count(), 1);

        let outcome = lifecycle
            .next_phase(InstanceCount::new(2).expect("count"), 3)
            .expect("next phase");
        assert_eq!(outcome, RestartOutcome::Survived);
        assert_eq!(lifecycle.instance_count(), 2);
        assert_eq!(log.written("/ctl/out"), b"1B5BN2B3B");
    }

    #[test]
    fn kill_writes_token_then_waits_for_confirmation() {
        let log = ChannelLog::default();
        let opener = ScriptedOpener::new(log.clone()).script("/ctl/ack", "K");
        let trace = ProtocolTrace::new(false);
        let kill = KillSwitch::open(&opener, "/ctl/kill", "/ctl/ack", trace).expect("kill");
        let paths = vec![InstancePaths::new("/fifo/u0", "/fifo/m0")];
        let mut lifecycle = fixed(opener, paths, Some(kill), OpenOrder::Ascending);

        lifecycle.kill_and_wait().expect("kill");

        assert_eq!(log.written("/ctl/kill"), b"<3");
        let write = log
            .position(|e| matches!(e, ChannelEvent::Write { path, .. } if path == "/ctl/kill"))
            .expect("kill write");
        let read = log
            .position(|e| matches!(e, ChannelEvent::Read { path, len: 1 } if path == "/ctl/ack"))
            .expect("confirmation read");
        assert!(write < read);
        assert!(lifecycle.is_killed());
        assert!(matches!(lifecycle.instance(0), Err(SessionError::InstancesKilled)));
        assert!(matches!(
            lifecycle.kill_and_wait(),
            Err(SessionError::InvalidState(_))
        ));
    }

    #[test]
    fn kill_without_channel_is_rejected() {
        let paths = vec![InstancePaths::new("/fifo/u0", "/fifo/m0")];
        let opener = ScriptedOpener::new(ChannelLog::default());
        let mut lifecycle = fixed(opener, paths, None, OpenOrder::Ascending);
        assert!(matches!(
            lifecycle.kill_and_wait(),
            Err(SessionError::InvalidState(_))
        ));
        assert!(matches!(
            lifecycle.restart(),
            Err(SessionError::Config(ConfigError::NotNegotiated("restart")))
        ));
    }

    #[test]
    fn shutdown_quits_and_notifies_instances() {
        let log = ChannelLog::default();
        let opener =
            ScriptedOpener::new(log.clone()).script("/ctl/in", control_script(&TWO, b"A"));
        let mut lifecycle = negotiated(opener, 2);

        lifecycle.announce_shutdown(true);
        assert!(log.written("/ctl/out").ends_with(b"Q"));
        assert_eq!(log.written("/fifo/m0"), b"-1\n");
        assert_eq!(log.written("/fifo/m1"), b"-1\n");
        lifecycle.await_shutdown();
    }
}
