//! The session state machine and disconnect classification.

/// Where a [`super::PeerSession`] currently sits in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    /// Constructed, not yet dialing.
    Idle,
    /// TCP connect in flight.
    Connecting,
    /// TCP connected; `version`/`verack` exchange in progress.
    HandshakePending,
    /// Handshake complete; normal request/response traffic flows.
    Ready,
    /// Terminal: the transport is gone and no further requests are
    /// accepted.
    Disposed,
}

impl SessionPhase {
    /// Whether the session had reached [`SessionPhase::Ready`] by the time
    /// it left this phase — the dividing line the spec's disconnect
    /// classification hinges on.
    pub fn reached_ready(&self) -> bool {
        matches!(self, SessionPhase::Ready | SessionPhase::Disposed)
    }
}

/// Why a session transitioned to [`SessionPhase::Disposed`], carried in
/// [`crate::event::Event::Disconnected`] so the pool can update metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The owner called `dispose` or cancelled the session's token.
    Intentional,
    /// Transport closed, errored, or timed out strictly before `Ready`.
    UnintentionalBeforeConnect,
    /// Transport closed, errored, or timed out at or after `Ready`.
    UnintentionalAfterConnect,
}

impl DisconnectReason {
    /// Classify a non-intentional disconnect given the phase the session
    /// was in when it happened.
    pub fn classify(phase_reached_ready: bool) -> DisconnectReason {
        if phase_reached_ready {
            DisconnectReason::UnintentionalAfterConnect
        } else {
            DisconnectReason::UnintentionalBeforeConnect
        }
    }
}
