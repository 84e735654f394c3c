//! Handshake state machine for the control-channel conversation.
//!
//! Transitions are pure: `io::handshake` and `io::lifecycle` call
//! [`HandshakeState::advance`] before touching any channel so an out-of-order
//! request is rejected without side effects.

use std::fmt;

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Waiting for the orchestrator's `S`.
    AwaitingWelcome,
    /// Welcome received; counts sent and paths being read.
    Negotiated,
    /// Instance pipes open; problem logic is exchanging messages.
    Running,
    /// A `C` or `N` request is in flight.
    Restarting,
    /// Verdict emission and shutdown handshake in progress. Reachable before
    /// the instances are running, when they failed to open.
    Finalizing,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeEvent {
    WelcomeReceived,
    InstancesOpened,
    RestartRequested,
    RestartGranted,
    PhaseGranted,
    RequestDenied,
    FinalizeRequested,
    ShutdownComplete,
}

impl HandshakeState {
    /// Compute the state after `event`, or fail if the event is not legal here.
    pub fn advance(self, event: HandshakeEvent) -> Result<HandshakeState, ProtocolError> {
        use HandshakeEvent as E;
        use HandshakeState as S;

        let next = match (self, event) {
            (S::AwaitingWelcome, E::WelcomeReceived) => S::Negotiated,
            (S::Negotiated, E::InstancesOpened) => S::Running,
            (S::Running, E::RestartRequested) => S::Restarting,
            (S::Restarting, E::RestartGranted) => S::Running,
            (S::Restarting, E::PhaseGranted) => S::AwaitingWelcome,
            (S::Restarting, E::RequestDenied) => S::Terminated,
            (S::Negotiated | S::Running | S::Restarting, E::FinalizeRequested) => S::Finalizing,
            (S::Finalizing, E::ShutdownComplete) => S::Terminated,
            (from, event) => return Err(ProtocolError::InvalidTransition { from, event }),
        };
        Ok(next)
    }

    pub fn is_terminated(self) -> bool {
        self == HandshakeState::Terminated
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::AwaitingWelcome => "awaiting-welcome",
            HandshakeState::Negotiated => "negotiated",
            HandshakeState::Running => "running",
            HandshakeState::Restarting => "restarting",
            HandshakeState::Finalizing => "finalizing",
            HandshakeState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}
