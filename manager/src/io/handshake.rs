//! Control-channel conversation with the orchestrator.
//!
//! The client owns both control pipes and the [`HandshakeState`]. Every
//! operation validates its transition before doing I/O, so a request issued
//! in the wrong state fails without sending anything.

use tracing::{debug, info, instrument};

use crate::core::state::{HandshakeEvent, HandshakeState};
use crate::core::wire::{
    self, InstanceCount, QUIT, Reply, encode_negotiation, expect_welcome, parse_path_line,
};
use crate::error::{ChannelError, ProtocolError};
use crate::io::channel::{ChannelOpener, InboundPipe, OutboundPipe};
use crate::io::registry::InstancePaths;
use crate::trace::ProtocolTrace;

const CHANNEL: &str = "control";

pub struct HandshakeClient {
    to_orchestrator: OutboundPipe,
    from_orchestrator: InboundPipe,
    state: HandshakeState,
    trace: ProtocolTrace,
}

impl HandshakeClient {
    /// Open the control pair: the manager-to-orchestrator pipe first, then
    /// the reply pipe, matching the orchestrator's open order.
    pub fn open<O: ChannelOpener + ?Sized>(
        opener: &O,
        control_out: &str,
        control_in: &str,
        trace: ProtocolTrace,
    ) -> Result<Self, ProtocolError> {
        let to_orchestrator = OutboundPipe::open(opener, control_out)?;
        let from_orchestrator = InboundPipe::open(opener, control_in)?;
        trace.step(CHANNEL, "control channel open");
        Ok(Self {
            to_orchestrator,
            from_orchestrator,
            state: HandshakeState::AwaitingWelcome,
            trace,
        })
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    fn transition(&mut self, event: HandshakeEvent) -> Result<(), ProtocolError> {
        let next = self.state.advance(event)?;
        debug!(from = %self.state, to = %next, ?event, "handshake transition");
        self.state = next;
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.trace.bytes(CHANNEL, ">>", bytes);
        self.to_orchestrator.write(bytes)?;
        Ok(())
    }

    fn receive_byte(&mut self) -> Result<Option<u8>, ProtocolError> {
        let byte = self.from_orchestrator.read_byte()?;
        match byte {
            Some(b) => self.trace.bytes(CHANNEL, "<<", &[b]),
            None => self.trace.step(CHANNEL, "<< eof"),
        }
        Ok(byte)
    }

    /// Block for the orchestrator's `S`.
    pub fn await_welcome(&mut self) -> Result<(), ProtocolError> {
        self.state.advance(HandshakeEvent::WelcomeReceived)?;
        let byte = self.receive_byte()?;
        expect_welcome(byte)?;
        self.transition(HandshakeEvent::WelcomeReceived)
    }

    /// Send `"<N>B<T>B"` and read back the 2N instance paths.
    #[instrument(skip_all, fields(count = count.get(), time_limit = time_limit))]
    pub fn negotiate(
        &mut self,
        count: InstanceCount,
        time_limit: u32,
    ) -> Result<Vec<InstancePaths>, ProtocolError> {
        self.state.advance(HandshakeEvent::InstancesOpened)?;
        let message = encode_negotiation(count, time_limit);
        self.send(message.as_bytes())?;

        let mut flat = Vec::with_capacity(count.get() * 2);
        for position in 0..count.get() * 2 {
            let line = match self.from_orchestrator.read_raw_line() {
                Ok(line) => line,
                Err(ChannelError::Eof(_)) => {
                    return Err(ProtocolError::UnexpectedEof("path exchange"));
                }
                Err(err) => return Err(err.into()),
            };
            self.trace.bytes(CHANNEL, "<<", &line);
            flat.push(parse_path_line(position, &line)?);
        }
        let paths: Vec<InstancePaths> = flat
            .chunks(2)
            .map(|pair| InstancePaths::new(pair[0].clone(), pair[1].clone()))
            .collect();
        info!(instances = paths.len(), "negotiated instance paths");
        Ok(paths)
    }

    /// Record that the negotiated instances are open.
    pub fn mark_running(&mut self) -> Result<(), ProtocolError> {
        self.transition(HandshakeEvent::InstancesOpened)
    }

    /// Send a restart-style request (`C` or `N`) and wait for the single reply byte.
    ///
    /// On [`Reply::Abort`] the client is terminated and must not be used again.
    pub fn request(&mut self, token: u8) -> Result<Reply, ProtocolError> {
        self.transition(HandshakeEvent::RestartRequested)?;
        self.send(&[token])?;
        let reply = Reply::from_byte(self.receive_byte()?);
        if reply == Reply::Abort {
            self.transition(HandshakeEvent::RequestDenied)?;
        }
        debug!(token = %wire::describe_byte(token), ?reply, "orchestrator replied");
        Ok(reply)
    }

    /// The replacement instances are open again.
    pub fn resume(&mut self) -> Result<(), ProtocolError> {
        self.transition(HandshakeEvent::RestartGranted)
    }

    /// The orchestrator accepted `N`; a new welcome follows.
    pub fn begin_next_phase(&mut self) -> Result<(), ProtocolError> {
        self.transition(HandshakeEvent::PhaseGranted)
    }

    /// Tell the orchestrator a verdict is coming (`Q`).
    pub fn announce_quit(&mut self) -> Result<(), ProtocolError> {
        self.transition(HandshakeEvent::FinalizeRequested)?;
        self.send(&[QUIT])
    }

    /// Wait for the orchestrator to acknowledge `Q`. The value is ignored and
    /// a closed channel counts as acknowledgement.
    pub fn await_quit_reply(&mut self) -> Result<(), ProtocolError> {
        self.receive_byte()?;
        self.transition(HandshakeEvent::ShutdownComplete)
    }

    pub fn close(&mut self) {
        self.to_orchestrator.close();
        self.from_orchestrator.close();
    }
}
