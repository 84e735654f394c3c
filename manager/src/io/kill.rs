//! Dedicated kill-request channel.
//!
//! The manager writes `"<3"` and closes the request pipe; the orchestrator
//! kills the instances, flushes whatever they were writing, and then writes
//! (or just closes) the confirmation pipe.

use tracing::{debug, info};

use crate::core::wire::KILL_TOKEN;
use crate::error::ProtocolError;
use crate::io::channel::{ChannelOpener, InboundPipe, OutboundPipe};
use crate::trace::ProtocolTrace;

const CHANNEL: &str = "kill";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillState {
    Armed,
    Requested,
    Confirmed,
}

pub struct KillSwitch {
    request: OutboundPipe,
    confirmation: InboundPipe,
    state: KillState,
    trace: ProtocolTrace,
}

impl KillSwitch {
    /// Open the request pipe, then the confirmation pipe.
    pub fn open<O: ChannelOpener + ?Sized>(
        opener: &O,
        request_path: &str,
        confirmation_path: &str,
        trace: ProtocolTrace,
    ) -> Result<Self, ProtocolError> {
        let request = OutboundPipe::open(opener, request_path)?;
        let confirmation = InboundPipe::open(opener, confirmation_path)?;
        trace.step(CHANNEL, "kill channel open");
        Ok(Self {
            request,
            confirmation,
            state: KillState::Armed,
            trace,
        })
    }

    pub fn state(&self) -> KillState {
        self.state
    }

    /// Write the kill token and close the request pipe. No-op unless armed.
    pub fn request(&mut self) -> Result<(), ProtocolError> {
        if self.state != KillState::Armed {
            return Ok(());
        }
        self.trace.bytes(CHANNEL, ">>", KILL_TOKEN);
        let written = self.request.write(KILL_TOKEN);
        self.request.close();
        self.state = KillState::Requested;
        written?;
        info!("kill requested");
        Ok(())
    }

    /// Block for one confirmation byte (any value, or EOF). No-op unless a
    /// kill was requested and not yet confirmed.
    pub fn await_confirmation(&mut self) -> Result<(), ProtocolError> {
        if self.state != KillState::Requested {
            return Ok(());
        }
        let byte = self.confirmation.read_byte();
        self.confirmation.close();
        self.state = KillState::Confirmed;
        let byte = byte?;
        self.trace.step(CHANNEL, "<< confirmation");
        debug!(received = byte.is_some(), "kill confirmed");
        Ok(())
    }

    pub fn close(&mut self) {
        self.request.close();
        self.confirmation.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ChannelEvent, ChannelLog, ScriptedOpener};

    const KILL: &str = "/abort/sq";
    const CONFIRM: &str = "/abort/mq";

    fn switch(confirmation: &[u8]) -> (KillSwitch, ChannelLog) {
        let log = ChannelLog::default();
        let opener = ScriptedOpener::new(log.clone()).script(CONFIRM, confirmation);
        let switch =
            KillSwitch::open(&opener, KILL, CONFIRM, ProtocolTrace::default()).expect("open");
        (switch, log)
    }

    #[test]
    fn request_then_confirm() {
        let (mut switch, log) = switch(b"K");
        switch.request().expect("request");
        switch.await_confirmation().expect("confirm");

        assert_eq!(switch.state(), KillState::Confirmed);
        let kill_events = log.events_for(KILL);
        assert_eq!(
            kill_events[1..],
            [
                ChannelEvent::Write {
                    path: KILL.to_string(),
                    bytes: b"<3".to_vec()
                },
                ChannelEvent::Close {
                    path: KILL.to_string(),
                    direction: crate::io::channel::Direction::Write
                },
            ]
        );
    }

    #[test]
    fn eof_counts_as_confirmation() {
        let (mut switch, _log) = switch(b"");
        switch.request().expect("request");
        switch.await_confirmation().expect("confirm");
        assert_eq!(switch.state(), KillState::Confirmed);
    }

    #[test]
    fn repeated_calls_are_no_ops() {
        let (mut switch, log) = switch(b"KK");
        switch.request().expect("request");
        switch.request().expect("request again");
        switch.await_confirmation().expect("confirm");
        switch.await_confirmation().expect("confirm again");

        assert_eq!(log.written(KILL), b"<3");
        let reads = log
            .events_for(CONFIRM)
            .iter()
            .filter(|event| matches!(event, ChannelEvent::Read { .. }))
            .count();
        assert_eq!(reads, 1);
    }

    #[test]
    fn confirmation_without_request_does_not_block() {
        let (mut switch, log) = switch(b"K");
        switch.await_confirmation().expect("no-op");
        assert_eq!(switch.state(), KillState::Armed);
        assert!(log.written(KILL).is_empty());
    }
}
