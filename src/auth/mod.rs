//! Authentication phase
//!
//! [`AuthContext`] runs both directions of authentication for one link:
//! the method we demand from the peer and the method the peer demands from
//! us, as agreed by LCP. Like the negotiation engine it performs no I/O;
//! every entry point returns the [`AuthAction`]s to carry out.

pub mod chap;
pub mod pap;
mod secret;

pub use secret::{MemorySecretStore, SecretLookup, SecretStore};

use crate::config::{AuthConfig, Originate};
use crate::protocol::chap::{self as chap_wire, ChapPacket};
use crate::protocol::lcp::auth;
use crate::protocol::pap::{self as pap_wire, PapPacket};
use crate::protocol::ppp::protocols;
use chap::{ChapAuthenticator, ChapPeer};
use pap::{PapAuthenticator, PapPeer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Authentication method as negotiated in the LCP Authentication-Protocol option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum AuthMethod {
    #[serde(rename = "pap")]
    Pap,
    #[serde(rename = "chap-md5")]
    ChapMd5,
    #[serde(rename = "mschap")]
    MsChap,
    #[serde(rename = "mschapv2")]
    MsChapV2,
}

impl AuthMethod {
    /// Method from an option's protocol and CHAP algorithm
    pub fn from_lcp(protocol: u16, algorithm: Option<u8>) -> Option<Self> {
        match (protocol, algorithm) {
            (auth::PAP, _) => Some(AuthMethod::Pap),
            (auth::CHAP, Some(auth::CHAP_MD5)) => Some(AuthMethod::ChapMd5),
            (auth::CHAP, Some(auth::CHAP_MSCHAP)) => Some(AuthMethod::MsChap),
            (auth::CHAP, Some(auth::CHAP_MSCHAPV2)) => Some(AuthMethod::MsChapV2),
            _ => None,
        }
    }

    /// Protocol and CHAP algorithm to put in the option
    pub fn lcp_value(self) -> (u16, Option<u8>) {
        match self {
            AuthMethod::Pap => (auth::PAP, None),
            AuthMethod::ChapMd5 => (auth::CHAP, Some(auth::CHAP_MD5)),
            AuthMethod::MsChap => (auth::CHAP, Some(auth::CHAP_MSCHAP)),
            AuthMethod::MsChapV2 => (auth::CHAP, Some(auth::CHAP_MSCHAPV2)),
        }
    }

    pub fn is_chap(self) -> bool {
        self != AuthMethod::Pap
    }

    pub fn is_mschap(self) -> bool {
        matches!(self, AuthMethod::MsChap | AuthMethod::MsChapV2)
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthMethod::Pap => "pap",
            AuthMethod::ChapMd5 => "chap-md5",
            AuthMethod::MsChap => "mschap",
            AuthMethod::MsChapV2 => "mschapv2",
        };
        write!(f, "{}", name)
    }
}

/// Timers owned by the authentication phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthTimer {
    /// CHAP Challenge retransmission
    Challenge,
    /// CHAP Response retransmission
    Response,
    /// PAP Authenticate-Request retransmission
    Request,
    /// Limit on the whole phase
    Timeout,
}

/// Outcome of one direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    Success(String),
    Failure(String),
}

/// Action for the context's owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthAction {
    /// Transmit a CHAP or PAP packet
    Send { protocol: u16, packet: Vec<u8> },
    StartTimer { timer: AuthTimer, after: Duration },
    StopTimer(AuthTimer),
    /// The phase is over
    Finished { success: bool, message: String },
}

#[derive(Debug)]
enum Authenticator {
    Chap(ChapAuthenticator),
    Pap(PapAuthenticator),
}

#[derive(Debug)]
enum Peer {
    Chap(ChapPeer),
    Pap(PapPeer),
}

/// Per-link authentication state
#[derive(Debug)]
pub struct AuthContext {
    link: String,
    config: AuthConfig,
    originate: Originate,
    secrets: Arc<dyn SecretStore>,

    authenticator: Option<Authenticator>,
    peer: Option<Peer>,
    authenticator_ok: bool,
    peer_ok: bool,
    message: String,

    active: bool,
    failed: bool,
    actions: Vec<AuthAction>,
}

impl AuthContext {
    pub fn new(
        link: impl Into<String>,
        config: &AuthConfig,
        originate: Originate,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            link: link.into(),
            config: config.clone(),
            originate,
            secrets,
            authenticator: None,
            peer: None,
            authenticator_ok: false,
            peer_ok: false,
            message: String::new(),
            active: false,
            failed: false,
            actions: Vec::new(),
        }
    }

    /// True between `start` and the phase's verdict
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Begin authentication. `for_peer` is the method we demand, `for_self`
    /// the one the peer demands.
    pub fn start(
        &mut self,
        for_peer: Option<AuthMethod>,
        for_self: Option<AuthMethod>,
    ) -> Vec<AuthAction> {
        self.reset();
        info!(
            "AUTH: starting (peer: {}, self: {}) on {}",
            for_peer.map_or("none".to_string(), |m| m.to_string()),
            for_self.map_or("none".to_string(), |m| m.to_string()),
            self.link
        );

        if for_peer.is_none() && for_self.is_none() {
            self.actions.push(AuthAction::Finished {
                success: true,
                message: String::new(),
            });
            return self.take_actions();
        }

        self.active = true;
        self.authenticator_ok = for_peer.is_none();
        self.peer_ok = for_self.is_none();
        self.actions.push(AuthAction::StartTimer {
            timer: AuthTimer::Timeout,
            after: self.config.timeout(),
        });

        let mut out = Vec::new();
        self.authenticator = for_peer.map(|method| match method {
            AuthMethod::Pap => Authenticator::Pap(PapAuthenticator::new(&self.link)),
            _ => Authenticator::Chap(ChapAuthenticator::start(
                &self.link,
                method,
                &self.config,
                self.originate,
                &mut out,
            )),
        });

        let mut early = None;
        self.peer = for_self.map(|method| match method {
            AuthMethod::Pap => {
                let (peer, result) =
                    PapPeer::start(&self.link, &self.config, self.secrets.as_ref(), &mut out);
                early = result;
                Peer::Pap(peer)
            }
            _ => Peer::Chap(ChapPeer::new(
                &self.link,
                method,
                &self.config,
                self.originate,
            )),
        });

        self.actions.extend(out);
        self.settle_peer(early);
        self.take_actions()
    }

    /// Handle an inbound CHAP or PAP packet
    pub fn input(&mut self, protocol: u16, packet: &[u8]) -> Vec<AuthAction> {
        match protocol {
            protocols::CHAP => self.input_chap(packet),
            protocols::PAP => self.input_pap(packet),
            _ => debug!("AUTH: ignoring protocol 0x{:04x} on {}", protocol, self.link),
        }
        self.take_actions()
    }

    fn input_chap(&mut self, packet: &[u8]) {
        let pkt = match ChapPacket::parse(packet) {
            Ok(p) => p,
            Err(e) => {
                warn!("AUTH: malformed CHAP packet on {}: {}", self.link, e);
                return;
            }
        };
        let mut out = Vec::new();
        match pkt.code() {
            chap_wire::codes::RESPONSE => {
                let Some(Authenticator::Chap(auth)) = self.authenticator.as_mut() else {
                    debug!("AUTH: unexpected CHAP Response on {}", self.link);
                    return;
                };
                let result = auth.recv_response(&pkt, self.secrets.as_ref(), &mut out);
                self.actions.extend(out);
                self.settle_authenticator(result);
            }
            chap_wire::codes::CHALLENGE => {
                let own = match &self.authenticator {
                    Some(Authenticator::Chap(auth)) => Some(auth.challenge().to_vec()),
                    _ => None,
                };
                let Some(Peer::Chap(peer)) = self.peer.as_mut() else {
                    debug!("AUTH: unexpected CHAP Challenge on {}", self.link);
                    return;
                };
                let result =
                    peer.recv_challenge(&pkt, own.as_deref(), self.secrets.as_ref(), &mut out);
                self.actions.extend(out);
                self.settle_peer(result);
            }
            chap_wire::codes::SUCCESS | chap_wire::codes::FAILURE => {
                let Some(Peer::Chap(peer)) = self.peer.as_mut() else {
                    debug!("AUTH: unexpected CHAP verdict on {}", self.link);
                    return;
                };
                let result = peer.recv_verdict(&pkt, &mut out);
                self.actions.extend(out);
                self.settle_peer(result);
            }
            code => debug!("AUTH: unknown CHAP code {} on {}", code, self.link),
        }
    }

    fn input_pap(&mut self, packet: &[u8]) {
        let pkt = match PapPacket::parse(packet) {
            Ok(p) => p,
            Err(e) => {
                warn!("AUTH: malformed PAP packet on {}: {}", self.link, e);
                return;
            }
        };
        let mut out = Vec::new();
        match pkt.code() {
            pap_wire::codes::AUTHENTICATE_REQUEST => {
                let Some(Authenticator::Pap(auth)) = self.authenticator.as_mut() else {
                    debug!("AUTH: unexpected PAP Request on {}", self.link);
                    return;
                };
                let result = auth.recv_request(&pkt, self.secrets.as_ref(), &mut out);
                self.actions.extend(out);
                self.settle_authenticator(result);
            }
            pap_wire::codes::AUTHENTICATE_ACK | pap_wire::codes::AUTHENTICATE_NAK => {
                let Some(Peer::Pap(peer)) = self.peer.as_mut() else {
                    debug!("AUTH: unexpected PAP verdict on {}", self.link);
                    return;
                };
                let result = peer.recv_verdict(&pkt, &mut out);
                self.actions.extend(out);
                self.settle_peer(result);
            }
            code => debug!("AUTH: unknown PAP code {} on {}", code, self.link),
        }
    }

    /// A timer owned by this context fired
    pub fn timeout(&mut self, timer: AuthTimer) -> Vec<AuthAction> {
        let mut out = Vec::new();
        match timer {
            AuthTimer::Challenge => {
                if let Some(Authenticator::Chap(auth)) = self.authenticator.as_mut() {
                    auth.timeout(&mut out);
                }
            }
            AuthTimer::Response => {
                if let Some(Peer::Chap(peer)) = self.peer.as_mut() {
                    peer.timeout(&mut out);
                }
            }
            AuthTimer::Request => {
                if let Some(Peer::Pap(peer)) = self.peer.as_mut() {
                    peer.timeout(&mut out);
                }
            }
            AuthTimer::Timeout => {
                if self.active {
                    warn!("AUTH: timed out on {}", self.link);
                    self.fail("authentication timed out".to_string());
                }
            }
        }
        self.actions.extend(out);
        self.take_actions()
    }

    /// Resume whatever was waiting on the secret for `name`
    pub fn credentials_ready(&mut self, name: &str, secret: &str) -> Vec<AuthAction> {
        let mut out = Vec::new();
        let result = match self.authenticator.as_mut() {
            Some(Authenticator::Chap(auth)) => auth.credentials_ready(name, secret, &mut out),
            Some(Authenticator::Pap(auth)) => auth.credentials_ready(name, secret, &mut out),
            None => None,
        };
        self.actions.extend(std::mem::take(&mut out));
        self.settle_authenticator(result);

        let result = match self.peer.as_mut() {
            Some(Peer::Chap(peer)) => peer.credentials_ready(name, secret, &mut out),
            Some(Peer::Pap(peer)) => {
                peer.credentials_ready(name, secret, &mut out);
                None
            }
            None => None,
        };
        self.actions.extend(out);
        self.settle_peer(result);
        self.take_actions()
    }

    /// The peer sent LCP Protocol-Reject for CHAP or PAP
    pub fn protocol_rejected(&mut self, protocol: u16) -> Vec<AuthAction> {
        if self.active {
            warn!(
                "AUTH: peer rejected {} on {}",
                protocols::name(protocol),
                self.link
            );
            self.fail(format!("peer rejected {}", protocols::name(protocol)));
        }
        self.take_actions()
    }

    /// Tear down: cancel timers and forget all exchange state
    pub fn stop(&mut self) -> Vec<AuthAction> {
        if self.authenticator.is_some() || self.peer.is_some() || self.active {
            debug!("AUTH: stopping on {}", self.link);
            self.stop_timers();
        }
        self.reset();
        self.take_actions()
    }

    fn reset(&mut self) {
        self.authenticator = None;
        self.peer = None;
        self.authenticator_ok = false;
        self.peer_ok = false;
        self.message.clear();
        self.active = false;
        self.failed = false;
    }

    fn settle_authenticator(&mut self, result: Option<AuthResult>) {
        match result {
            Some(AuthResult::Success(message)) => {
                self.authenticator_ok = true;
                self.message = message;
                self.check_done();
            }
            Some(AuthResult::Failure(message)) => self.fail(message),
            None => {}
        }
    }

    fn settle_peer(&mut self, result: Option<AuthResult>) {
        match result {
            Some(AuthResult::Success(message)) => {
                self.peer_ok = true;
                if self.message.is_empty() {
                    self.message = message;
                }
                self.check_done();
            }
            Some(AuthResult::Failure(message)) => self.fail(message),
            None => {}
        }
    }

    fn check_done(&mut self) {
        if self.active && self.authenticator_ok && self.peer_ok {
            info!("AUTH: complete on {}", self.link);
            self.active = false;
            self.actions.push(AuthAction::StopTimer(AuthTimer::Timeout));
            self.actions.push(AuthAction::Finished {
                success: true,
                message: self.message.clone(),
            });
        }
    }

    fn fail(&mut self, message: String) {
        // A failure after success (re-challenge) still counts
        if self.failed {
            return;
        }
        warn!("AUTH: failed: {} on {}", message, self.link);
        self.failed = true;
        self.active = false;
        self.stop_timers();
        self.actions.push(AuthAction::Finished {
            success: false,
            message,
        });
    }

    fn stop_timers(&mut self) {
        for timer in [
            AuthTimer::Challenge,
            AuthTimer::Response,
            AuthTimer::Request,
            AuthTimer::Timeout,
        ] {
            self.actions.push(AuthAction::StopTimer(timer));
        }
    }

    fn take_actions(&mut self) -> Vec<AuthAction> {
        std::mem::take(&mut self.actions)
    }
}
