//! Side effects requested by the engine
//!
//! The engine never performs I/O or touches a clock. Every entry point
//! returns the list of things the owner must do, in order.

use std::time::Duration;
use thiserror::Error;

/// Timers owned by one engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsmTimer {
    /// Configure-Request / Terminate-Request retransmission
    Restart,
    /// Keep-alive echo (recurring while Opened)
    Echo,
}

/// Why the engine gave up on the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("negotiation failed to converge")]
    NegotFailure,
    #[error("bad magic number")]
    BadMagic,
    #[error("no echo reply")]
    EchoTimeout,
    #[error("peer rejected a required code")]
    CodeRejected,
    #[error("peer rejected the protocol")]
    ProtocolRejected,
}

/// Action for the engine's owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsmAction {
    /// Transmit a control packet on this engine's protocol
    Send { code: u8, id: u8, data: Vec<u8> },
    /// Arm a timer. A running timer is stopped first with `StopTimer`
    StartTimer {
        timer: FsmTimer,
        after: Duration,
        recurring: bool,
    },
    /// Cancel a timer
    StopTimer(FsmTimer),
    /// This-Layer-Up
    LayerUp,
    /// This-Layer-Down
    LayerDown,
    /// This-Layer-Started: the lower layer is needed
    LayerStart,
    /// This-Layer-Finished: the lower layer is no longer needed
    LayerFinish,
    /// Peer sent Protocol-Reject for the given protocol number
    ProtocolRejected(u16),
    /// The engine went through `failure()`
    Failed(FailureReason),
}
