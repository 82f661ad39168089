//! Per-protocol capabilities plugged into the engine
//!
//! The engine knows packet codes, counters and transitions. Everything
//! about option semantics lives behind [`FsmProtocol`], implemented once
//! for LCP and once for IPCP.

use crate::protocol::lcp::DEFAULT_MRU;
use crate::protocol::options::{ConfigOption, OptionWriter};
use crate::Result;

/// Classification of one option from a peer's Configure-Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionVerdict {
    /// Acceptable as sent
    Ack,
    /// Recognized but unacceptable; suggest this value instead
    Nak(Vec<u8>),
    /// Not recognized or not negotiable
    Reject,
}

/// Hooks a concrete control protocol supplies to [`Fsm`](super::Fsm)
pub trait FsmProtocol {
    /// Short name for log lines ("LCP", "IPCP")
    fn name(&self) -> &'static str;

    /// PPP protocol number
    fn protocol(&self) -> u16;

    /// Whether the engine should handle `code` rather than Code-Reject it
    fn is_known_code(&self, code: u8) -> bool;

    /// Upper bound on options decoded from one packet
    fn max_options(&self) -> usize {
        32
    }

    /// Longest rejected packet echoed back in a Code-Reject
    fn max_reject_len(&self) -> usize {
        DEFAULT_MRU as usize - 4
    }

    /// Start a fresh negotiation from configuration
    fn configure(&mut self);

    /// Drop everything negotiated
    fn unconfigure(&mut self);

    /// Write the options of our next Configure-Request
    fn build_request(&mut self, out: &mut OptionWriter) -> Result<()>;

    /// Forget the peer's previous request before classifying a new one
    fn reset_peer(&mut self);

    /// Classify one option of the peer's Configure-Request
    fn check_option(&mut self, opt: &ConfigOption<'_>) -> OptionVerdict;

    /// Our in-flight request was acked
    fn recv_ack(&mut self);

    /// Peer suggested another value for one of our options
    fn recv_nak(&mut self, opt: &ConfigOption<'_>);

    /// Peer refused one of our options
    fn recv_reject(&mut self, opt: &ConfigOption<'_>);

    /// Our magic number, 0 when not negotiated
    fn local_magic(&self) -> u32 {
        0
    }

    /// Peer's magic number, 0 when not negotiated
    fn peer_magic(&self) -> u32 {
        0
    }

    /// Whether a wrong magic number on echo traffic is fatal
    fn check_magic(&self) -> bool {
        false
    }

    /// Code-Reject of `code` is fatal (RXJ-) rather than tolerated (RXJ+)
    fn code_reject_fatal(&self, code: u8) -> bool {
        (1..=7).contains(&code)
    }

    /// Reset-Request received while Opened
    fn recv_reset_request(&mut self, _id: u8, _data: &[u8]) {}

    /// Reset-Ack received while Opened
    fn recv_reset_ack(&mut self, _id: u8, _data: &[u8]) {}
}
