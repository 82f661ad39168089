//! PPP link: phase machine and protocol demultiplexing
//!
//! A [`Link`] owns the LCP and IPCP engines and the authentication context
//! of one point-to-point link. It walks the RFC 1661 phases
//! (Dead, Establish, Authenticate, Network, Terminate), routes inbound
//! frames by protocol number and turns the engines' actions into
//! [`LinkAction`]s: framed packets to transmit, timers to arm and events for
//! the application.

use crate::auth::{AuthAction, AuthContext, AuthTimer, SecretStore};
use crate::config::LinkConfig;
use crate::fsm::ipcp::Ipcp;
use crate::fsm::lcp::Lcp;
use crate::fsm::{EchoSettings, FailureReason, Fsm, FsmAction, FsmState, FsmTimer};
use crate::protocol::control::ControlBuilder;
use crate::protocol::ppp::{protocols, PppBuilder, PppFrame};
use crate::telemetry::LinkStats;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Link phase - RFC 1661 section 3.2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Dead,
    Establish,
    Authenticate,
    Network,
    Terminate,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Dead => "Dead",
            Phase::Establish => "Establish",
            Phase::Authenticate => "Authenticate",
            Phase::Network => "Network",
            Phase::Terminate => "Terminate",
        };
        write!(f, "{}", name)
    }
}

/// Every timer a link may arm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    Lcp(FsmTimer),
    Ipcp(FsmTimer),
    Auth(AuthTimer),
}

/// Notification for the link's owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// LCP wants the lower layer brought up
    LowerLayerNeeded,
    /// LCP is done with the lower layer
    LowerLayerDone,
    AuthFinished { success: bool, message: String },
    NetworkUp {
        local: Option<Ipv4Addr>,
        peer: Option<Ipv4Addr>,
        dns: Vec<Ipv4Addr>,
    },
    NetworkDown,
    /// A control protocol gave up on the peer
    Failed { protocol: u16, reason: FailureReason },
}

/// Action for the link's owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    /// Transmit a PPP frame (protocol field + information)
    Send(Vec<u8>),
    StartTimer {
        timer: TimerId,
        after: Duration,
        recurring: bool,
    },
    StopTimer(TimerId),
    Event(LinkEvent),
}

/// One PPP link
#[derive(Debug)]
pub struct Link {
    name: String,
    phase: Phase,
    lcp: Fsm<Lcp>,
    ipcp: Fsm<Ipcp>,
    auth: AuthContext,
    stats: Arc<LinkStats>,
    actions: Vec<LinkAction>,
}

impl Link {
    pub fn new(
        name: impl Into<String>,
        config: &LinkConfig,
        secrets: Arc<dyn SecretStore>,
        stats: Arc<LinkStats>,
    ) -> Self {
        let name = name.into();
        let echo = config
            .lcp
            .echo()
            .map(|(interval, max)| EchoSettings { interval, max });
        let lcp = Fsm::new(name.as_str(), Lcp::new(&config.lcp, &config.auth), &config.fsm)
            .with_echo(echo);
        let ipcp = Fsm::new(name.as_str(), Ipcp::new(&config.ipcp), &config.fsm);
        let auth = AuthContext::new(name.as_str(), &config.auth, config.originate, secrets);

        Self {
            name,
            phase: Phase::Dead,
            lcp,
            ipcp,
            auth,
            stats,
            actions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn lcp(&self) -> &Fsm<Lcp> {
        &self.lcp
    }

    pub fn ipcp(&self) -> &Fsm<Ipcp> {
        &self.ipcp
    }

    pub fn stats(&self) -> &Arc<LinkStats> {
        &self.stats
    }

    /// True once IPCP is Opened
    pub fn is_network_up(&self) -> bool {
        self.phase == Phase::Network && self.ipcp.state() == FsmState::Opened
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Administrative Open of the link
    pub fn open(&mut self) -> Vec<LinkAction> {
        let actions = self.lcp.open();
        self.lcp_actions(actions);
        self.take_actions()
    }

    /// Administrative Close of the link
    pub fn close(&mut self) -> Vec<LinkAction> {
        let actions = self.lcp.close();
        self.lcp_actions(actions);
        self.take_actions()
    }

    /// The lower layer is up
    pub fn lower_up(&mut self) -> Vec<LinkAction> {
        let actions = self.lcp.lower_up();
        self.lcp_actions(actions);
        self.take_actions()
    }

    /// The lower layer is down
    pub fn lower_down(&mut self) -> Vec<LinkAction> {
        let actions = self.lcp.lower_down();
        self.lcp_actions(actions);
        self.set_phase(Phase::Dead);
        self.take_actions()
    }

    /// Handle a received PPP frame
    pub fn input(&mut self, frame: &[u8]) -> Vec<LinkAction> {
        self.stats.record_rx(frame.len());
        let ppp = match PppFrame::parse(frame) {
            Ok(f) => f,
            Err(e) => {
                warn!("LINK: malformed frame on {}: {}", self.name, e);
                self.stats.record_rx_error();
                return Vec::new();
            }
        };
        let protocol = ppp.protocol();
        let payload = ppp.payload();

        match protocol {
            protocols::LCP => {
                let actions = self.lcp.input(payload);
                self.lcp_actions(actions);
            }
            protocols::IPCP if self.phase == Phase::Network => {
                let actions = self.ipcp.input(payload);
                self.ipcp_actions(actions);
            }
            protocols::CHAP | protocols::PAP
                if matches!(self.phase, Phase::Authenticate | Phase::Network) =>
            {
                let actions = self.auth.input(protocol, payload);
                self.auth_actions(actions);
            }
            protocols::IPCP | protocols::CHAP | protocols::PAP | protocols::IP => {
                debug!(
                    "LINK: dropping {} in phase {} on {}",
                    protocols::name(protocol),
                    self.phase,
                    self.name
                );
                self.stats.record_rx_drop();
            }
            _ => {
                debug!(
                    "LINK: unsupported protocol 0x{:04x} on {}",
                    protocol, self.name
                );
                self.stats.record_rx_drop();
                let actions = self.lcp.send_protocol_reject(protocol, payload);
                self.lcp_actions(actions);
            }
        }
        self.take_actions()
    }

    /// A timer armed through [`LinkAction::StartTimer`] fired
    pub fn timeout(&mut self, timer: TimerId) -> Vec<LinkAction> {
        match timer {
            TimerId::Lcp(FsmTimer::Restart) => {
                let actions = self.lcp.restart_timeout();
                self.lcp_actions(actions);
            }
            TimerId::Lcp(FsmTimer::Echo) => {
                let actions = self.lcp.echo_timeout(self.stats.rx_packets.get());
                self.lcp_actions(actions);
            }
            TimerId::Ipcp(FsmTimer::Restart) => {
                let actions = self.ipcp.restart_timeout();
                self.ipcp_actions(actions);
            }
            TimerId::Ipcp(FsmTimer::Echo) => {
                let actions = self.ipcp.echo_timeout(self.stats.rx_packets.get());
                self.ipcp_actions(actions);
            }
            TimerId::Auth(t) => {
                let actions = self.auth.timeout(t);
                self.auth_actions(actions);
            }
        }
        self.take_actions()
    }

    /// An asynchronous secret lookup finished
    pub fn credentials_ready(&mut self, name: &str, secret: &str) -> Vec<LinkAction> {
        let actions = self.auth.credentials_ready(name, secret);
        self.auth_actions(actions);
        self.take_actions()
    }

    // ========================================================================
    // Engine actions
    // ========================================================================

    fn lcp_actions(&mut self, actions: Vec<FsmAction>) {
        for action in actions {
            match action {
                FsmAction::Send { code, id, data } => self.send_control(protocols::LCP, code, id, &data),
                FsmAction::StartTimer {
                    timer,
                    after,
                    recurring,
                } => self.push(LinkAction::StartTimer {
                    timer: TimerId::Lcp(timer),
                    after,
                    recurring,
                }),
                FsmAction::StopTimer(timer) => self.push(LinkAction::StopTimer(TimerId::Lcp(timer))),
                FsmAction::LayerUp => self.lcp_up(),
                FsmAction::LayerDown => self.lcp_down(),
                FsmAction::LayerStart => self.push(LinkAction::Event(LinkEvent::LowerLayerNeeded)),
                FsmAction::LayerFinish => {
                    self.set_phase(Phase::Dead);
                    self.push(LinkAction::Event(LinkEvent::LowerLayerDone));
                }
                FsmAction::ProtocolRejected(protocol) => self.protocol_rejected(protocol),
                FsmAction::Failed(reason) => self.failed(protocols::LCP, reason),
            }
        }
        let restarting = matches!(self.phase, Phase::Dead | Phase::Terminate);
        if restarting && self.lcp.state().is_negotiating() {
            self.set_phase(Phase::Establish);
        }
    }

    fn ipcp_actions(&mut self, actions: Vec<FsmAction>) {
        for action in actions {
            match action {
                FsmAction::Send { code, id, data } => {
                    self.send_control(protocols::IPCP, code, id, &data)
                }
                FsmAction::StartTimer {
                    timer,
                    after,
                    recurring,
                } => self.push(LinkAction::StartTimer {
                    timer: TimerId::Ipcp(timer),
                    after,
                    recurring,
                }),
                FsmAction::StopTimer(timer) => {
                    self.push(LinkAction::StopTimer(TimerId::Ipcp(timer)))
                }
                FsmAction::LayerUp => {
                    let ipcp = self.ipcp.protocol();
                    let event = LinkEvent::NetworkUp {
                        local: ipcp.local_address(),
                        peer: ipcp.peer_address(),
                        dns: ipcp.dns(),
                    };
                    info!(
                        "LINK: network up, local {:?} peer {:?} on {}",
                        ipcp.local_address(),
                        ipcp.peer_address(),
                        self.name
                    );
                    self.push(LinkAction::Event(event));
                }
                FsmAction::LayerDown => self.push(LinkAction::Event(LinkEvent::NetworkDown)),
                FsmAction::LayerStart => {}
                FsmAction::LayerFinish => {
                    // Last network protocol gone: nothing left to carry
                    if self.phase == Phase::Network {
                        info!("LINK: no network protocol left on {}", self.name);
                        let actions = self.lcp.close();
                        self.lcp_actions(actions);
                    }
                }
                FsmAction::ProtocolRejected(_) => {}
                FsmAction::Failed(reason) => self.failed(protocols::IPCP, reason),
            }
        }
    }

    fn auth_actions(&mut self, actions: Vec<AuthAction>) {
        for action in actions {
            match action {
                AuthAction::Send { protocol, packet } => self.send_frame(protocol, &packet),
                AuthAction::StartTimer { timer, after } => self.push(LinkAction::StartTimer {
                    timer: TimerId::Auth(timer),
                    after,
                    recurring: false,
                }),
                AuthAction::StopTimer(timer) => {
                    self.push(LinkAction::StopTimer(TimerId::Auth(timer)))
                }
                AuthAction::Finished { success, message } => self.auth_finished(success, message),
            }
        }
    }

    // ========================================================================
    // Phase transitions
    // ========================================================================

    fn lcp_up(&mut self) {
        self.lcp.set_idle_snapshot(self.stats.rx_packets.get());

        let lcp = self.lcp.protocol();
        if lcp.auth_refused() {
            warn!("LINK: peer refused to authenticate on {}", self.name);
            self.auth_finished(false, "peer refused authentication".to_string());
            return;
        }

        let (for_peer, for_self) = (lcp.auth_for_peer(), lcp.auth_for_self());
        self.set_phase(Phase::Authenticate);
        let actions = self.auth.start(for_peer, for_self);
        self.auth_actions(actions);
    }

    fn lcp_down(&mut self) {
        if self.phase != Phase::Dead {
            self.set_phase(Phase::Terminate);
        }
        let actions = self.auth.stop();
        self.auth_actions(actions);
        let actions = self.ipcp.lower_down();
        self.ipcp_actions(actions);
    }

    fn auth_finished(&mut self, success: bool, message: String) {
        self.push(LinkAction::Event(LinkEvent::AuthFinished {
            success,
            message: message.clone(),
        }));

        if !success {
            warn!("LINK: authentication failed ({}) on {}", message, self.name);
            self.stats.auth_failures.inc();
            let actions = self.lcp.close();
            self.lcp_actions(actions);
            return;
        }
        if self.phase != Phase::Authenticate {
            return;
        }

        self.set_phase(Phase::Network);
        let actions = self.ipcp.lower_up();
        self.ipcp_actions(actions);
        let actions = self.ipcp.open();
        self.ipcp_actions(actions);
    }

    fn protocol_rejected(&mut self, protocol: u16) {
        match protocol {
            protocols::IPCP => {
                let actions = self.ipcp.failure(FailureReason::ProtocolRejected);
                self.ipcp_actions(actions);
            }
            protocols::CHAP | protocols::PAP => {
                let actions = self.auth.protocol_rejected(protocol);
                self.auth_actions(actions);
            }
            protocols::LCP => {
                let actions = self.lcp.failure(FailureReason::ProtocolRejected);
                self.lcp_actions(actions);
            }
            _ => debug!(
                "LINK: peer rejected protocol 0x{:04x} we never sent on {}",
                protocol, self.name
            ),
        }
    }

    fn failed(&mut self, protocol: u16, reason: FailureReason) {
        self.stats.failures.inc();
        self.push(LinkAction::Event(LinkEvent::Failed { protocol, reason }));
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            info!("LINK: phase {} -> {} on {}", self.phase, phase, self.name);
            self.phase = phase;
        }
    }

    // ========================================================================
    // Output
    // ========================================================================

    fn send_control(&mut self, protocol: u16, code: u8, id: u8, data: &[u8]) {
        let packet = ControlBuilder::new(code, id).raw_data(data).build();
        self.send_frame(protocol, &packet);
    }

    fn send_frame(&mut self, protocol: u16, packet: &[u8]) {
        let frame = PppBuilder::new(protocol).payload(packet).build();
        self.stats.record_tx(frame.len());
        self.push(LinkAction::Send(frame));
    }

    fn push(&mut self, action: LinkAction) {
        self.actions.push(action);
    }

    fn take_actions(&mut self) -> Vec<LinkAction> {
        std::mem::take(&mut self.actions)
    }
}
