//! Option negotiation automaton - RFC 1661 section 4
//!
//! One [`Fsm`] runs per control protocol per link. It is a pure state
//! machine: events go in through [`open`](Fsm::open), [`close`](Fsm::close),
//! [`lower_up`](Fsm::lower_up), [`lower_down`](Fsm::lower_down),
//! [`input`](Fsm::input), [`failure`](Fsm::failure) and the two timer entry
//! points, and every call returns the [`FsmAction`]s the owner must carry out.
//!
//! Protocol specifics (which options exist, what values are acceptable) are
//! supplied through the [`FsmProtocol`] trait.

mod action;
pub mod ipcp;
pub mod lcp;
mod protocol;
mod state;

pub use action::{FailureReason, FsmAction, FsmTimer};
pub use protocol::{FsmProtocol, OptionVerdict};
pub use state::FsmState;

use crate::config::FsmConfig;
use crate::protocol::control::{codes, ControlPacket};
use crate::protocol::options::{self, OptionWriter};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Keep-alive echo settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoSettings {
    /// Period of the echo timer
    pub interval: Duration,
    /// Silence after which the peer is declared dead
    pub max: Duration,
}

/// Generic control protocol engine
#[derive(Debug)]
pub struct Fsm<P> {
    proto: P,
    link: String,
    state: FsmState,

    restart_timeout: Duration,
    max_configure: u32,
    max_terminate: u32,
    max_failure: u32,
    passive: bool,
    restart_on_open: bool,
    echo: Option<EchoSettings>,

    restart_counter: u32,
    /// Nak/Reject replies we may still send
    failure_budget: u32,
    /// Nak/Reject replies we may still accept
    config_budget: u32,

    request_id: u8,
    reject_id: u8,
    echo_id: u8,
    /// Options of the in-flight Configure-Request
    last_request: Option<Vec<u8>>,
    ack_seen: bool,

    restart_running: bool,
    echo_running: bool,
    quiet_count: u32,
    idle_snapshot: u64,

    last_failure: Option<FailureReason>,
    peer_ident: Option<String>,
    time_remaining: Option<u32>,

    actions: Vec<FsmAction>,
}

impl<P: FsmProtocol> Fsm<P> {
    /// Create an engine in the Initial state
    pub fn new(link: impl Into<String>, proto: P, config: &FsmConfig) -> Self {
        Self {
            proto,
            link: link.into(),
            state: FsmState::Initial,
            restart_timeout: config.restart_timeout(),
            max_configure: config.max_configure,
            max_terminate: config.max_terminate,
            max_failure: config.max_failure,
            passive: config.passive,
            restart_on_open: config.restart_on_open,
            echo: None,
            restart_counter: 0,
            failure_budget: config.max_failure,
            config_budget: config.max_configure,
            request_id: 0,
            reject_id: 0,
            echo_id: 0,
            last_request: None,
            ack_seen: false,
            restart_running: false,
            echo_running: false,
            quiet_count: 0,
            idle_snapshot: 0,
            last_failure: None,
            peer_ident: None,
            time_remaining: None,
            actions: Vec::new(),
        }
    }

    /// Enable keep-alive echo while Opened
    pub fn with_echo(mut self, echo: Option<EchoSettings>) -> Self {
        self.echo = echo;
        self
    }

    pub fn state(&self) -> FsmState {
        self.state
    }

    pub fn protocol(&self) -> &P {
        &self.proto
    }

    pub fn protocol_mut(&mut self) -> &mut P {
        &mut self.proto
    }

    /// Identifier of the most recent Configure-Request
    pub fn request_id(&self) -> u8 {
        self.request_id
    }

    pub fn restart_counter(&self) -> u32 {
        self.restart_counter
    }

    pub fn last_failure(&self) -> Option<FailureReason> {
        self.last_failure
    }

    /// Text from the peer's last Identification packet
    pub fn peer_ident(&self) -> Option<&str> {
        self.peer_ident.as_deref()
    }

    /// Seconds from the peer's last Time-Remaining packet
    pub fn time_remaining(&self) -> Option<u32> {
        self.time_remaining
    }

    /// Record the inbound traffic counter the next echo tick compares against
    pub fn set_idle_snapshot(&mut self, rx_packets: u64) {
        self.idle_snapshot = rx_packets;
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Administrative Open
    pub fn open(&mut self) -> Vec<FsmAction> {
        debug!("{}: open in {} on {}", self.proto.name(), self.state, self.link);
        match self.state {
            FsmState::Initial => {
                self.new_state(FsmState::Starting);
                self.push(FsmAction::LayerStart);
            }
            FsmState::Closed => {
                self.push(FsmAction::LayerStart);
                self.init_restart_count(self.max_configure);
                self.send_config_request();
                self.new_state(FsmState::ReqSent);
            }
            FsmState::Closing => {
                self.new_state(FsmState::Stopping);
                self.restart_if_configured();
            }
            FsmState::Opened | FsmState::Stopped | FsmState::Stopping => {
                self.restart_if_configured();
            }
            FsmState::Starting | FsmState::ReqSent | FsmState::AckRcvd | FsmState::AckSent => {}
        }
        self.take_actions()
    }

    /// Administrative Close
    pub fn close(&mut self) -> Vec<FsmAction> {
        debug!("{}: close in {} on {}", self.proto.name(), self.state, self.link);
        match self.state {
            FsmState::Starting => {
                self.new_state(FsmState::Initial);
                self.push(FsmAction::LayerFinish);
            }
            FsmState::Stopped => self.new_state(FsmState::Closed),
            FsmState::Stopping => self.new_state(FsmState::Closing),
            FsmState::Opened | FsmState::ReqSent | FsmState::AckRcvd | FsmState::AckSent => {
                if self.state == FsmState::Opened {
                    self.layer_down();
                }
                self.proto.unconfigure();
                self.init_restart_count(self.max_terminate);
                self.send_terminate_request(b"User request");
                self.new_state(FsmState::Closing);
            }
            FsmState::Initial | FsmState::Closed | FsmState::Closing => {}
        }
        self.take_actions()
    }

    /// The lower layer is ready to carry packets
    pub fn lower_up(&mut self) -> Vec<FsmAction> {
        debug!("{}: lower up in {} on {}", self.proto.name(), self.state, self.link);
        match self.state {
            FsmState::Initial => self.new_state(FsmState::Closed),
            FsmState::Starting => {
                self.init_restart_count(self.max_configure);
                self.send_config_request();
                self.new_state(FsmState::ReqSent);
            }
            state => {
                warn!(
                    "{}: lower up in unexpected state {} on {}",
                    self.proto.name(),
                    state,
                    self.link
                );
            }
        }
        self.take_actions()
    }

    /// The lower layer went away
    pub fn lower_down(&mut self) -> Vec<FsmAction> {
        debug!("{}: lower down in {} on {}", self.proto.name(), self.state, self.link);
        match self.state {
            FsmState::Closed | FsmState::Closing => self.new_state(FsmState::Initial),
            FsmState::Stopped => {
                self.new_state(FsmState::Starting);
                self.push(FsmAction::LayerStart);
            }
            FsmState::Stopping | FsmState::ReqSent | FsmState::AckRcvd | FsmState::AckSent => {
                self.proto.unconfigure();
                self.new_state(FsmState::Starting);
            }
            FsmState::Opened => {
                self.layer_down();
                self.proto.unconfigure();
                self.new_state(FsmState::Starting);
            }
            FsmState::Initial | FsmState::Starting => {}
        }
        self.take_actions()
    }

    /// Give up on the peer
    pub fn failure(&mut self, reason: FailureReason) -> Vec<FsmAction> {
        self.fail(reason);
        self.take_actions()
    }

    /// The restart timer expired
    pub fn restart_timeout(&mut self) -> Vec<FsmAction> {
        if !self.restart_running {
            debug!("{}: stale restart timer on {}", self.proto.name(), self.link);
            return Vec::new();
        }
        self.restart_running = false;

        match self.state {
            FsmState::Closing | FsmState::Stopping => {
                if self.restart_counter > 0 {
                    self.send_terminate_request(b"");
                } else {
                    self.push(FsmAction::LayerFinish);
                    let next = if self.state == FsmState::Closing {
                        FsmState::Closed
                    } else {
                        FsmState::Stopped
                    };
                    self.new_state(next);
                }
            }
            FsmState::ReqSent | FsmState::AckRcvd | FsmState::AckSent => {
                if self.restart_counter > 0 {
                    debug!(
                        "{}: retransmitting Configure-Request id={} on {}",
                        self.proto.name(),
                        self.request_id,
                        self.link
                    );
                    self.retransmit_config_request();
                    if self.state == FsmState::AckRcvd {
                        self.new_state(FsmState::ReqSent);
                    }
                } else {
                    warn!(
                        "{}: no response to Configure-Request on {}",
                        self.proto.name(),
                        self.link
                    );
                    self.fail(FailureReason::NegotFailure);
                }
            }
            _ => {}
        }
        self.take_actions()
    }

    /// The recurring echo timer fired; `rx_packets` is the link's inbound
    /// frame counter
    pub fn echo_timeout(&mut self, rx_packets: u64) -> Vec<FsmAction> {
        let Some(echo) = self.echo else {
            return Vec::new();
        };
        if !self.echo_running || self.state != FsmState::Opened {
            return Vec::new();
        }

        let quiet = rx_packets == self.idle_snapshot;
        self.idle_snapshot = rx_packets;
        if !quiet {
            self.quiet_count = 0;
            return Vec::new();
        }

        self.quiet_count += 1;
        if self.quiet_count == 1 {
            self.send_echo_request();
        }
        if echo.interval * self.quiet_count >= echo.max {
            warn!(
                "{}: peer silent for {:?} on {}",
                self.proto.name(),
                echo.interval * self.quiet_count,
                self.link
            );
            self.stop_echo_timer();
            self.fail(FailureReason::EchoTimeout);
        }
        self.take_actions()
    }

    /// Handle an inbound control packet
    pub fn input(&mut self, packet: &[u8]) -> Vec<FsmAction> {
        let pkt = match ControlPacket::parse(packet) {
            Ok(p) => p,
            Err(e) => {
                warn!("{}: malformed packet on {}: {}", self.proto.name(), self.link, e);
                return Vec::new();
            }
        };

        if self.state.is_lower_down() {
            debug!(
                "{}: dropping {} in {} on {}",
                self.proto.name(),
                codes::name(pkt.code()),
                self.state,
                self.link
            );
            return Vec::new();
        }

        let code = pkt.code();
        let id = pkt.identifier();
        let data = pkt.data();

        if !self.proto.is_known_code(code) {
            self.send_code_reject(pkt.as_bytes());
            return self.take_actions();
        }

        debug!(
            "{}: received {} id={} in {} on {}",
            self.proto.name(),
            codes::name(code),
            id,
            self.state,
            self.link
        );

        match code {
            codes::CONFIGURE_REQUEST => self.recv_config_request(id, data),
            codes::CONFIGURE_ACK => self.recv_config_ack(id, data),
            codes::CONFIGURE_NAK => self.recv_config_nak_rej(id, data, false),
            codes::CONFIGURE_REJECT => self.recv_config_nak_rej(id, data, true),
            codes::TERMINATE_REQUEST => self.recv_terminate_request(id),
            codes::TERMINATE_ACK => self.recv_terminate_ack(),
            codes::CODE_REJECT => self.recv_code_reject(data),
            codes::PROTOCOL_REJECT => self.recv_protocol_reject(data),
            codes::ECHO_REQUEST => self.recv_echo_request(id, data),
            codes::ECHO_REPLY => self.recv_echo_reply(data),
            codes::DISCARD_REQUEST => {
                self.check_magic(data);
            }
            codes::IDENTIFICATION => self.recv_ident(data),
            codes::TIME_REMAINING => self.recv_time_remaining(data),
            codes::VENDOR => {
                if self.check_magic(data).is_some() {
                    debug!("{}: ignoring vendor packet on {}", self.proto.name(), self.link);
                }
            }
            codes::RESET_REQUEST => {
                if self.state == FsmState::Opened {
                    self.proto.recv_reset_request(id, data);
                    self.send(codes::RESET_ACK, id, Vec::new());
                }
            }
            codes::RESET_ACK => {
                if self.state == FsmState::Opened {
                    self.proto.recv_reset_ack(id, data);
                }
            }
            _ => self.send_code_reject(pkt.as_bytes()),
        }
        self.take_actions()
    }

    /// Send an Echo-Request now (while Opened)
    pub fn send_echo(&mut self) -> Vec<FsmAction> {
        if self.state == FsmState::Opened {
            self.send_echo_request();
        }
        self.take_actions()
    }

    /// Send a Protocol-Reject for `protocol`, echoing the offending frame
    /// payload (while Opened)
    pub fn send_protocol_reject(&mut self, protocol: u16, payload: &[u8]) -> Vec<FsmAction> {
        if self.state == FsmState::Opened {
            let mut data = protocol.to_be_bytes().to_vec();
            let room = self.proto.max_reject_len().saturating_sub(2);
            data.extend_from_slice(&payload[..payload.len().min(room)]);
            self.reject_id = self.reject_id.wrapping_add(1);
            self.send(codes::PROTOCOL_REJECT, self.reject_id, data);
        }
        self.take_actions()
    }

    // ========================================================================
    // Packet handlers
    // ========================================================================

    fn recv_config_request(&mut self, id: u8, data: &[u8]) {
        match self.state {
            FsmState::Closed => {
                self.send_terminate_ack(id);
                return;
            }
            FsmState::Closing | FsmState::Stopping => return,
            _ => {}
        }

        // Classify every option; the buffers belong to this call only
        self.proto.reset_peer();
        let mut ack = OptionWriter::new();
        let mut nak = OptionWriter::new();
        let mut rej = OptionWriter::new();
        let mut iter = options::decode(data, self.proto.max_options());
        for opt in iter.by_ref() {
            match self.proto.check_option(&opt) {
                OptionVerdict::Ack => ack.push_option(&opt),
                OptionVerdict::Nak(value) => {
                    let suggested = options::ConfigOption {
                        opt_type: opt.opt_type,
                        data: &value,
                    };
                    nak.push_option(&suggested);
                }
                OptionVerdict::Reject => rej.push_option(&opt),
            }
        }
        if let Some(garbage) = iter.garbage() {
            warn!(
                "{}: {} bytes of garbage after options on {}",
                self.proto.name(),
                garbage.len(),
                self.link
            );
        }
        // Options past the cap were never classified, so they cannot be acked
        if let Some(rest) = iter.unscanned() {
            warn!(
                "{}: rejecting options beyond the first {} on {}",
                self.proto.name(),
                self.proto.max_options(),
                self.link
            );
            for opt in options::decode(rest, usize::MAX) {
                rej.push_option(&opt);
            }
        }

        let acked = nak.is_empty() && rej.is_empty();

        match self.state {
            FsmState::Opened => {
                // Peer restarted negotiation
                self.layer_down();
                self.send_config_request();
                self.new_state(FsmState::ReqSent);
            }
            FsmState::Stopped => {
                self.init_restart_count(self.max_configure);
                self.send_config_request();
                self.new_state(FsmState::ReqSent);
            }
            _ => {}
        }

        if acked {
            self.send(codes::CONFIGURE_ACK, id, data.to_vec());
            match self.state {
                FsmState::AckRcvd => {
                    self.new_state(FsmState::Opened);
                    self.layer_up();
                }
                FsmState::AckSent => {}
                _ => self.new_state(FsmState::AckSent),
            }
        } else {
            self.failure_budget = self.failure_budget.saturating_sub(1);
            if self.failure_budget == 0 {
                warn!(
                    "{}: peer keeps sending unacceptable options on {}",
                    self.proto.name(),
                    self.link
                );
                self.fail(FailureReason::NegotFailure);
                return;
            }
            if !rej.is_empty() {
                self.send(codes::CONFIGURE_REJECT, id, rej.into_bytes());
            } else {
                self.send(codes::CONFIGURE_NAK, id, nak.into_bytes());
            }
            if self.state != FsmState::AckRcvd {
                self.new_state(FsmState::ReqSent);
            }
        }
    }

    fn recv_config_ack(&mut self, id: u8, data: &[u8]) {
        if !self.matches_request(id, "Configure-Ack") {
            return;
        }
        if self.last_request.as_deref() != Some(data) {
            warn!(
                "{}: Configure-Ack id={} does not match our request on {}",
                self.proto.name(),
                id,
                self.link
            );
            return;
        }
        self.ack_seen = true;

        match self.state {
            FsmState::Closed | FsmState::Stopped => self.send_terminate_ack(id),
            FsmState::ReqSent => {
                self.proto.recv_ack();
                self.init_restart_count(self.max_configure);
                self.new_state(FsmState::AckRcvd);
            }
            FsmState::AckRcvd => {
                // Crossed connection
                self.send_config_request();
                self.new_state(FsmState::ReqSent);
            }
            FsmState::AckSent => {
                self.proto.recv_ack();
                self.init_restart_count(self.max_configure);
                self.new_state(FsmState::Opened);
                self.layer_up();
            }
            FsmState::Opened => {
                self.layer_down();
                self.send_config_request();
                self.new_state(FsmState::ReqSent);
            }
            _ => {}
        }
    }

    fn recv_config_nak_rej(&mut self, id: u8, data: &[u8], reject: bool) {
        let what = if reject {
            "Configure-Reject"
        } else {
            "Configure-Nak"
        };
        if !self.matches_request(id, what) {
            return;
        }
        self.ack_seen = true;

        if self.state.is_negotiating() {
            self.config_budget = self.config_budget.saturating_sub(1);
            if self.config_budget == 0 {
                warn!(
                    "{}: negotiation not converging after {} replies on {}",
                    self.proto.name(),
                    self.max_configure,
                    self.link
                );
                self.fail(FailureReason::NegotFailure);
                return;
            }
        }

        let mut iter = options::decode(data, self.proto.max_options());
        for opt in iter.by_ref() {
            if reject {
                self.proto.recv_reject(&opt);
            } else {
                self.proto.recv_nak(&opt);
            }
        }
        if iter.garbage().is_some() {
            warn!("{}: malformed {} on {}", self.proto.name(), what, self.link);
        }

        match self.state {
            FsmState::Closed | FsmState::Stopped => self.send_terminate_ack(id),
            FsmState::ReqSent | FsmState::AckSent => {
                self.init_restart_count(self.max_configure);
                self.send_config_request();
            }
            FsmState::AckRcvd => {
                self.init_restart_count(self.max_configure);
                self.send_config_request();
                self.new_state(FsmState::ReqSent);
            }
            FsmState::Opened => {
                self.layer_down();
                self.send_config_request();
                self.new_state(FsmState::ReqSent);
            }
            _ => {}
        }
    }

    fn recv_terminate_request(&mut self, id: u8) {
        match self.state {
            FsmState::ReqSent | FsmState::AckRcvd | FsmState::AckSent => {
                self.send_terminate_ack(id);
                self.new_state(FsmState::ReqSent);
            }
            FsmState::Opened => {
                info!("{}: terminated by peer on {}", self.proto.name(), self.link);
                self.layer_down();
                self.restart_counter = 0;
                self.send_terminate_ack(id);
                self.new_state(FsmState::Stopping);
                self.start_restart_timer();
            }
            _ => self.send_terminate_ack(id),
        }
    }

    fn recv_terminate_ack(&mut self) {
        match self.state {
            FsmState::Closing => {
                self.new_state(FsmState::Closed);
                self.push(FsmAction::LayerFinish);
            }
            FsmState::Stopping => {
                self.new_state(FsmState::Stopped);
                self.push(FsmAction::LayerFinish);
            }
            FsmState::AckRcvd => self.new_state(FsmState::ReqSent),
            FsmState::Opened => {
                self.layer_down();
                self.send_config_request();
                self.new_state(FsmState::ReqSent);
            }
            _ => {}
        }
    }

    fn recv_code_reject(&mut self, data: &[u8]) {
        let Some(&rejected) = data.first() else {
            warn!("{}: empty Code-Reject on {}", self.proto.name(), self.link);
            return;
        };
        if self.proto.code_reject_fatal(rejected) {
            warn!(
                "{}: peer rejected {} on {}",
                self.proto.name(),
                codes::name(rejected),
                self.link
            );
            self.fail(FailureReason::CodeRejected);
        } else {
            debug!(
                "{}: peer rejected code {} on {}",
                self.proto.name(),
                rejected,
                self.link
            );
            if self.state == FsmState::AckRcvd {
                self.new_state(FsmState::ReqSent);
            }
        }
    }

    fn recv_protocol_reject(&mut self, data: &[u8]) {
        let Some(proto) = data.get(..2).map(|b| u16::from_be_bytes([b[0], b[1]])) else {
            warn!("{}: short Protocol-Reject on {}", self.proto.name(), self.link);
            return;
        };
        info!(
            "{}: peer rejected protocol 0x{:04x} on {}",
            self.proto.name(),
            proto,
            self.link
        );
        if self.state == FsmState::AckRcvd {
            self.new_state(FsmState::ReqSent);
        }
        self.push(FsmAction::ProtocolRejected(proto));
    }

    fn recv_echo_request(&mut self, id: u8, data: &[u8]) {
        if self.state != FsmState::Opened {
            return;
        }
        let Some(rest) = self.check_magic(data) else {
            return;
        };
        let mut reply = self.proto.local_magic().to_be_bytes().to_vec();
        reply.extend_from_slice(rest);
        self.send(codes::ECHO_REPLY, id, reply);
    }

    fn recv_echo_reply(&mut self, data: &[u8]) {
        if self.state != FsmState::Opened {
            return;
        }
        if self.check_magic(data).is_some() {
            self.quiet_count = 0;
        }
    }

    fn recv_ident(&mut self, data: &[u8]) {
        if let Some(rest) = self.check_magic(data) {
            let text = String::from_utf8_lossy(rest).into_owned();
            info!("{}: peer identifies as '{}' on {}", self.proto.name(), text, self.link);
            self.peer_ident = Some(text);
        }
    }

    fn recv_time_remaining(&mut self, data: &[u8]) {
        let Some(rest) = self.check_magic(data) else {
            return;
        };
        let Some(secs) = rest.get(..4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        else {
            warn!("{}: short Time-Remaining on {}", self.proto.name(), self.link);
            return;
        };
        info!(
            "{}: {} seconds remaining ({}) on {}",
            self.proto.name(),
            secs,
            String::from_utf8_lossy(&rest[4..]),
            self.link
        );
        self.time_remaining = Some(secs);
    }

    /// Split off and verify the leading magic number. `None` means the packet
    /// must be dropped.
    fn check_magic<'a>(&mut self, data: &'a [u8]) -> Option<&'a [u8]> {
        let Some(head) = data.get(..4) else {
            warn!("{}: packet too short for magic number on {}", self.proto.name(), self.link);
            return None;
        };
        let magic = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
        let expected = self.proto.peer_magic();
        if self.proto.check_magic() && magic != 0 && expected != 0 && magic != expected {
            warn!(
                "{}: bad magic number 0x{:08x}, expected 0x{:08x} on {}",
                self.proto.name(),
                magic,
                expected,
                self.link
            );
            self.fail(FailureReason::BadMagic);
            return None;
        }
        Some(&data[4..])
    }

    fn matches_request(&self, id: u8, what: &str) -> bool {
        if id != self.request_id || self.last_request.is_none() {
            debug!(
                "{}: {} id={} does not match request id={} on {}",
                self.proto.name(),
                what,
                id,
                self.request_id,
                self.link
            );
            return false;
        }
        if self.ack_seen {
            debug!("{}: duplicate {} id={} on {}", self.proto.name(), what, id, self.link);
            return false;
        }
        true
    }

    // ========================================================================
    // RFC 1661 actions
    // ========================================================================

    fn fail(&mut self, reason: FailureReason) {
        warn!("{}: {} in {} on {}", self.proto.name(), reason, self.state, self.link);
        self.last_failure = Some(reason);
        self.push(FsmAction::Failed(reason));

        match self.state {
            FsmState::Opened => {
                self.layer_down();
                self.proto.unconfigure();
                self.init_restart_count(self.max_terminate);
                let text = reason.to_string();
                self.send_terminate_request(text.as_bytes());
                self.new_state(FsmState::Stopping);
            }
            FsmState::ReqSent | FsmState::AckRcvd | FsmState::AckSent => {
                self.proto.unconfigure();
                self.new_state(FsmState::Stopped);
                if !self.passive {
                    self.push(FsmAction::LayerFinish);
                }
            }
            FsmState::Stopped => {
                if !self.passive {
                    self.push(FsmAction::LayerFinish);
                }
            }
            FsmState::Closing | FsmState::Closed => {
                self.new_state(FsmState::Closed);
                self.push(FsmAction::LayerFinish);
            }
            FsmState::Stopping => {
                self.new_state(FsmState::Stopped);
                self.push(FsmAction::LayerFinish);
            }
            FsmState::Initial | FsmState::Starting => {}
        }
    }

    fn restart_if_configured(&mut self) {
        if self.restart_on_open {
            debug!("{}: restarting on open on {}", self.proto.name(), self.link);
            let down = self.lower_down();
            self.actions.extend(down);
            let up = self.lower_up();
            self.actions.extend(up);
        }
    }

    fn layer_up(&mut self) {
        info!("{}: layer up on {}", self.proto.name(), self.link);
        self.push(FsmAction::LayerUp);
    }

    fn layer_down(&mut self) {
        info!("{}: layer down on {}", self.proto.name(), self.link);
        self.push(FsmAction::LayerDown);
    }

    fn init_restart_count(&mut self, count: u32) {
        self.restart_counter = count;
    }

    /// scr: a new Configure-Request with a fresh identifier
    fn send_config_request(&mut self) {
        if !self.state.is_negotiating() {
            // Not negotiating yet: start over from configuration
            self.proto.configure();
            self.failure_budget = self.max_failure;
            self.config_budget = self.max_configure;
            self.init_restart_count(self.max_configure);
        }

        let mut writer = OptionWriter::new();
        if let Err(e) = self.proto.build_request(&mut writer) {
            warn!("{}: cannot encode request on {}: {}", self.proto.name(), self.link, e);
        }
        self.request_id = self.request_id.wrapping_add(1);
        self.last_request = Some(writer.into_bytes());
        self.ack_seen = false;
        self.retransmit_config_request();
    }

    /// Resend the in-flight Configure-Request unchanged
    fn retransmit_config_request(&mut self) {
        let data = self.last_request.clone().unwrap_or_default();
        self.restart_counter = self.restart_counter.saturating_sub(1);
        self.send(codes::CONFIGURE_REQUEST, self.request_id, data);
        self.start_restart_timer();
    }

    fn send_terminate_request(&mut self, reason: &[u8]) {
        self.restart_counter = self.restart_counter.saturating_sub(1);
        self.request_id = self.request_id.wrapping_add(1);
        self.last_request = None;
        self.send(codes::TERMINATE_REQUEST, self.request_id, reason.to_vec());
        self.start_restart_timer();
    }

    fn send_terminate_ack(&mut self, id: u8) {
        self.send(codes::TERMINATE_ACK, id, Vec::new());
    }

    fn send_code_reject(&mut self, packet: &[u8]) {
        let len = packet.len().min(self.proto.max_reject_len());
        warn!(
            "{}: unknown code {} on {}",
            self.proto.name(),
            packet.first().copied().unwrap_or_default(),
            self.link
        );
        self.reject_id = self.reject_id.wrapping_add(1);
        self.send(codes::CODE_REJECT, self.reject_id, packet[..len].to_vec());
    }

    fn send_echo_request(&mut self) {
        self.echo_id = self.echo_id.wrapping_add(1);
        let data = self.proto.local_magic().to_be_bytes().to_vec();
        self.send(codes::ECHO_REQUEST, self.echo_id, data);
    }

    fn send(&mut self, code: u8, id: u8, data: Vec<u8>) {
        debug!(
            "{}: sending {} id={} len={} on {}",
            self.proto.name(),
            codes::name(code),
            id,
            data.len(),
            self.link
        );
        self.push(FsmAction::Send { code, id, data });
    }

    // ========================================================================
    // State and timers
    // ========================================================================

    fn new_state(&mut self, next: FsmState) {
        let prev = self.state;
        if prev == next {
            return;
        }
        debug!("{}: {} -> {} on {}", self.proto.name(), prev, next, self.link);

        // Back in ReqSent the outstanding request may be acked again
        if next == FsmState::ReqSent {
            self.ack_seen = false;
        }

        if prev == FsmState::Opened {
            self.stop_echo_timer();
        }
        if matches!(
            next,
            FsmState::Initial
                | FsmState::Starting
                | FsmState::Closed
                | FsmState::Stopped
                | FsmState::Opened
        ) {
            self.stop_restart_timer();
        }
        self.state = next;

        if next == FsmState::Opened {
            self.start_echo_timer();
        }
    }

    fn start_restart_timer(&mut self) {
        if self.restart_running {
            self.push(FsmAction::StopTimer(FsmTimer::Restart));
        }
        self.restart_running = true;
        self.push(FsmAction::StartTimer {
            timer: FsmTimer::Restart,
            after: self.restart_timeout,
            recurring: false,
        });
    }

    fn stop_restart_timer(&mut self) {
        if self.restart_running {
            self.restart_running = false;
            self.push(FsmAction::StopTimer(FsmTimer::Restart));
        }
    }

    fn start_echo_timer(&mut self) {
        let Some(echo) = self.echo else {
            return;
        };
        if self.echo_running {
            self.push(FsmAction::StopTimer(FsmTimer::Echo));
        }
        self.echo_running = true;
        self.quiet_count = 0;
        self.push(FsmAction::StartTimer {
            timer: FsmTimer::Echo,
            after: echo.interval,
            recurring: true,
        });
    }

    fn stop_echo_timer(&mut self) {
        if self.echo_running {
            self.echo_running = false;
            self.push(FsmAction::StopTimer(FsmTimer::Echo));
        }
    }

    fn push(&mut self, action: FsmAction) {
        self.actions.push(action);
    }

    fn take_actions(&mut self) -> Vec<FsmAction> {
        std::mem::take(&mut self.actions)
    }
}

#[cfg(test)]
mod tests;
