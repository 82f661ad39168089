//! Control protocol states - RFC 1661 section 4.2

use std::fmt;

/// Automaton state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsmState {
    /// Lower layer down, no Open
    Initial,
    /// Open requested, waiting for the lower layer
    Starting,
    /// Lower layer up, no Open
    Closed,
    /// Negotiation gave up; waiting for the peer or an administrative action
    Stopped,
    /// Terminate-Request sent after Close
    Closing,
    /// Terminate-Request sent after a failure or peer teardown
    Stopping,
    /// Configure-Request sent, nothing acked yet
    ReqSent,
    /// Our request was acked, peer's is pending
    AckRcvd,
    /// We acked the peer, ours is pending
    AckSent,
    /// Both directions acked
    Opened,
}

impl FsmState {
    /// True while a Configure-Request exchange is in flight
    pub fn is_negotiating(self) -> bool {
        matches!(
            self,
            FsmState::ReqSent | FsmState::AckRcvd | FsmState::AckSent
        )
    }

    /// True while the lower layer is considered down
    pub fn is_lower_down(self) -> bool {
        matches!(self, FsmState::Initial | FsmState::Starting)
    }
}

impl fmt::Display for FsmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FsmState::Initial => "Initial",
            FsmState::Starting => "Starting",
            FsmState::Closed => "Closed",
            FsmState::Stopped => "Stopped",
            FsmState::Closing => "Closing",
            FsmState::Stopping => "Stopping",
            FsmState::ReqSent => "Req-Sent",
            FsmState::AckRcvd => "Ack-Rcvd",
            FsmState::AckSent => "Ack-Sent",
            FsmState::Opened => "Opened",
        };
        f.write_str(name)
    }
}
