//! PAP exchanges (RFC 1334)

use super::secret::{SecretLookup, SecretStore};
use super::{AuthAction, AuthResult, AuthTimer};
use crate::config::AuthConfig;
use crate::protocol::pap::{codes, PapBuilder, PapPacket};
use crate::protocol::ppp::protocols;
use std::time::Duration;
use tracing::{debug, info, warn};

const SUCCESS_TEXT: &str = "Welcome";
const FAILURE_TEXT: &str = "Authentication failed";
const MALFORMED_TEXT: &str = "Malformed request";

fn send(out: &mut Vec<AuthAction>, packet: Vec<u8>) {
    out.push(AuthAction::Send {
        protocol: protocols::PAP,
        packet,
    });
}

// ============================================================================
// Authenticator
// ============================================================================

#[derive(Debug)]
enum AuthenticatorState {
    Waiting,
    Verifying {
        id: u8,
        name: String,
        password: Vec<u8>,
    },
    Done {
        success: bool,
        message: String,
    },
}

/// We authenticate the peer; nothing is sent until its Request arrives
#[derive(Debug)]
pub struct PapAuthenticator {
    link: String,
    state: AuthenticatorState,
}

impl PapAuthenticator {
    pub fn new(link: &str) -> Self {
        Self {
            link: link.to_string(),
            state: AuthenticatorState::Waiting,
        }
    }

    pub fn recv_request(
        &mut self,
        pkt: &PapPacket<'_>,
        secrets: &dyn SecretStore,
        out: &mut Vec<AuthAction>,
    ) -> Option<AuthResult> {
        let id = pkt.identifier();
        match &self.state {
            AuthenticatorState::Waiting => {}
            AuthenticatorState::Verifying { .. } => {
                debug!("PAP: Request id={} while verifying on {}", id, self.link);
                return None;
            }
            AuthenticatorState::Done { success, message } => {
                debug!("PAP: repeated Request id={}, resending verdict on {}", id, self.link);
                send(out, verdict_packet(id, *success, message));
                return None;
            }
        }

        let Some((name, password)) = pkt.credentials() else {
            warn!("PAP: malformed Authenticate-Request on {}", self.link);
            return Some(self.reply(id, false, MALFORMED_TEXT, out));
        };
        let name = String::from_utf8_lossy(name).into_owned();
        debug!("PAP: Authenticate-Request from '{}' on {}", name, self.link);

        match secrets.lookup(&name) {
            SecretLookup::Found(secret) => {
                let ok = secret.as_bytes() == password;
                Some(self.conclude(id, &name, ok, out))
            }
            SecretLookup::NotFound => {
                warn!("PAP: no secret for '{}' on {}", name, self.link);
                Some(self.conclude(id, &name, false, out))
            }
            SecretLookup::Pending => {
                self.state = AuthenticatorState::Verifying {
                    id,
                    name,
                    password: password.to_vec(),
                };
                None
            }
        }
    }

    /// A pending secret lookup completed
    pub fn credentials_ready(
        &mut self,
        name: &str,
        secret: &str,
        out: &mut Vec<AuthAction>,
    ) -> Option<AuthResult> {
        let AuthenticatorState::Verifying {
            id,
            name: pending,
            password,
        } = &self.state
        else {
            return None;
        };
        if pending != name {
            return None;
        }
        let (id, ok) = (*id, secret.as_bytes() == password.as_slice());
        Some(self.conclude(id, name, ok, out))
    }

    fn conclude(&mut self, id: u8, name: &str, ok: bool, out: &mut Vec<AuthAction>) -> AuthResult {
        if ok {
            info!("PAP: peer '{}' authenticated on {}", name, self.link);
            self.reply(id, true, SUCCESS_TEXT, out)
        } else {
            warn!("PAP: peer '{}' failed authentication on {}", name, self.link);
            self.reply(id, false, FAILURE_TEXT, out)
        }
    }

    fn reply(&mut self, id: u8, ok: bool, message: &str, out: &mut Vec<AuthAction>) -> AuthResult {
        send(out, verdict_packet(id, ok, message));
        self.state = AuthenticatorState::Done {
            success: ok,
            message: message.to_string(),
        };
        if ok {
            AuthResult::Success(message.to_string())
        } else {
            AuthResult::Failure(message.to_string())
        }
    }
}

fn verdict_packet(id: u8, ok: bool, message: &str) -> Vec<u8> {
    if ok {
        PapBuilder::authenticate_ack(id, message).build()
    } else {
        PapBuilder::authenticate_nak(id, message).build()
    }
}

// ============================================================================
// Peer
// ============================================================================

#[derive(Debug)]
enum PeerState {
    /// Secret lookup in progress
    Pending { name: String },
    RequestSent,
    Done,
}

/// The peer authenticates us
#[derive(Debug)]
pub struct PapPeer {
    link: String,
    id: u8,
    retry_timeout: Duration,
    retries: u32,
    packet: Vec<u8>,
    state: PeerState,
}

impl PapPeer {
    /// Look up our secret and send the first Request. A result is returned
    /// right away if we have nothing to send.
    pub fn start(
        link: &str,
        config: &AuthConfig,
        secrets: &dyn SecretStore,
        out: &mut Vec<AuthAction>,
    ) -> (Self, Option<AuthResult>) {
        let mut peer = Self {
            link: link.to_string(),
            id: 0,
            retry_timeout: config.retry_timeout(),
            retries: config.max_retries.saturating_sub(1),
            packet: Vec::new(),
            state: PeerState::Done,
        };

        let Some(name) = config.name.clone() else {
            warn!("PAP: no name configured on {}", link);
            return (peer, Some(AuthResult::Failure("no name configured".into())));
        };
        let result = match secrets.lookup(&name) {
            SecretLookup::Found(secret) => {
                peer.send_request(&name, &secret, out);
                None
            }
            SecretLookup::NotFound => {
                warn!("PAP: no secret for '{}' on {}", name, link);
                Some(AuthResult::Failure(format!("no secret for {}", name)))
            }
            SecretLookup::Pending => {
                peer.state = PeerState::Pending { name };
                None
            }
        };
        (peer, result)
    }

    /// A pending secret lookup completed
    pub fn credentials_ready(&mut self, name: &str, secret: &str, out: &mut Vec<AuthAction>) {
        if matches!(&self.state, PeerState::Pending { name: n } if n == name) {
            self.send_request(name, secret, out);
        }
    }

    fn send_request(&mut self, name: &str, secret: &str, out: &mut Vec<AuthAction>) {
        self.id = self.id.wrapping_add(1);
        self.packet =
            PapBuilder::authenticate_request(self.id, name.as_bytes(), secret.as_bytes()).build();
        self.state = PeerState::RequestSent;
        debug!("PAP: sending Authenticate-Request as '{}' on {}", name, self.link);
        send(out, self.packet.clone());
        out.push(AuthAction::StartTimer {
            timer: AuthTimer::Request,
            after: self.retry_timeout,
        });
    }

    /// Authenticate-Ack or Authenticate-Nak
    pub fn recv_verdict(
        &mut self,
        pkt: &PapPacket<'_>,
        out: &mut Vec<AuthAction>,
    ) -> Option<AuthResult> {
        if !matches!(self.state, PeerState::RequestSent) {
            debug!("PAP: unexpected code {} on {}", pkt.code(), self.link);
            return None;
        }
        if pkt.identifier() != self.id {
            debug!(
                "PAP: verdict id={} does not match Request id={} on {}",
                pkt.identifier(),
                self.id,
                self.link
            );
            return None;
        }

        out.push(AuthAction::StopTimer(AuthTimer::Request));
        self.packet = Vec::new();
        self.state = PeerState::Done;

        let message = pkt
            .message()
            .map(|m| String::from_utf8_lossy(m).into_owned())
            .unwrap_or_default();
        if pkt.code() == codes::AUTHENTICATE_ACK {
            info!("PAP: authentication success: {} on {}", message, self.link);
            Some(AuthResult::Success(message))
        } else {
            warn!("PAP: authentication failed: {} on {}", message, self.link);
            Some(AuthResult::Failure(message))
        }
    }

    /// Request retransmission timer fired
    pub fn timeout(&mut self, out: &mut Vec<AuthAction>) {
        if !matches!(self.state, PeerState::RequestSent) {
            return;
        }
        if self.retries == 0 {
            warn!("PAP: no answer to Authenticate-Request on {}", self.link);
            return;
        }
        self.retries -= 1;
        debug!("PAP: retransmitting Authenticate-Request id={} on {}", self.id, self.link);
        send(out, self.packet.clone());
        out.push(AuthAction::StartTimer {
            timer: AuthTimer::Request,
            after: self.retry_timeout,
        });
    }
}
